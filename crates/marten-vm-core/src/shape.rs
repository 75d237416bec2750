//! Shapes: hidden classes for property access optimization
//!
//! A `Shape` is an immutable description of an object's property layout:
//! which properties exist, in what order, with what storage kind. Objects
//! with the same layout share the same shape through a hash-consed
//! transition table, so the dispatch caches can key on shape identity
//! instead of per-object structure.
//!
//! A transition is a pure function from a shape and a property descriptor to
//! a new shape; published shapes are never mutated. The only out-of-band slot
//! is the attached meta-object environment, which is deliberately excluded
//! from structural identity (see DESIGN.md).

use crate::class::Class;
use crate::environment::Environment;
use crate::error::StorageError;
use crate::symbol::Symbol;
use crate::value::{Value, ValueKind};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Process-unique shape id allocator. Ids are never reused.
static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);

/// Property key (symbol or field index)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Named property
    Symbol(Symbol),
    /// Numbered field slot
    Index(u32),
}

impl PropertyKey {
    /// Create a named property key
    pub fn symbol(s: &str) -> Self {
        Self::Symbol(Symbol::intern(s))
    }

    /// Create a numbered property key
    pub fn index(i: u32) -> Self {
        Self::Index(i)
    }
}

impl std::fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyKey::Symbol(s) => write!(f, "{s}"),
            PropertyKey::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::symbol(s)
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

/// How a property's slot stores its value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Any value
    Boxed,
    /// Integer-typed slot; writes of other kinds fail with `TypeMismatch`
    InlineInteger,
    /// Double-typed slot; writes of other kinds fail with `TypeMismatch`
    InlineDouble,
    /// Written once at initialization; later writes fail with `Immutable`
    Constant,
}

impl StorageKind {
    fn name(self) -> &'static str {
        match self {
            StorageKind::Boxed => "boxed",
            StorageKind::InlineInteger => "integer",
            StorageKind::InlineDouble => "double",
            StorageKind::Constant => "constant",
        }
    }
}

/// Property attributes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PropertyFlags {
    /// Property cannot be rewritten after initialization
    pub is_final: bool,
    /// Property is excluded from user-visible key listings
    pub is_hidden: bool,
}

impl PropertyFlags {
    /// Default mutable, visible property
    pub const fn none() -> Self {
        Self {
            is_final: false,
            is_hidden: false,
        }
    }

    /// Final (write-once) property
    pub const fn final_only() -> Self {
        Self {
            is_final: true,
            is_hidden: false,
        }
    }

    /// Hidden property
    pub const fn hidden() -> Self {
        Self {
            is_final: false,
            is_hidden: true,
        }
    }
}

/// Full description of one property: key, storage kind, and flags
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PropertyDescriptor {
    /// The property key
    pub key: PropertyKey,
    /// How the slot stores its value
    pub storage: StorageKind,
    /// Property attributes
    pub flags: PropertyFlags,
}

impl PropertyDescriptor {
    /// A boxed, mutable, visible property
    pub fn boxed(key: impl Into<PropertyKey>) -> Self {
        Self {
            key: key.into(),
            storage: StorageKind::Boxed,
            flags: PropertyFlags::none(),
        }
    }

    /// An integer-typed property
    pub fn inline_integer(key: impl Into<PropertyKey>) -> Self {
        Self {
            key: key.into(),
            storage: StorageKind::InlineInteger,
            flags: PropertyFlags::none(),
        }
    }

    /// A double-typed property
    pub fn inline_double(key: impl Into<PropertyKey>) -> Self {
        Self {
            key: key.into(),
            storage: StorageKind::InlineDouble,
            flags: PropertyFlags::none(),
        }
    }

    /// A constant property, written once at initialization
    pub fn constant(key: impl Into<PropertyKey>) -> Self {
        Self {
            key: key.into(),
            storage: StorageKind::Constant,
            flags: PropertyFlags::none(),
        }
    }

    /// Replace the flags
    pub fn with_flags(mut self, flags: PropertyFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Object category tag carried by a shape
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Ordinary object; never consulted by object-scoped MOP lookup
    Plain,
    /// Reflective object; its shape carries an environment slot
    Reflective,
}

/// A resolved property location inside an object's slot area
#[derive(Clone, Debug, PartialEq)]
pub struct Location {
    key: PropertyKey,
    index: usize,
    storage: StorageKind,
    flags: PropertyFlags,
}

impl Location {
    fn new(index: usize, descriptor: &PropertyDescriptor) -> Self {
        Self {
            key: descriptor.key.clone(),
            index,
            storage: descriptor.storage,
            flags: descriptor.flags,
        }
    }

    /// Slot index inside the object's value area
    pub fn index(&self) -> usize {
        self.index
    }

    /// The slot's storage kind
    pub fn storage(&self) -> StorageKind {
        self.storage
    }

    /// The property key this location was resolved for
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// Validate a write against the slot's storage kind and flags.
    ///
    /// Initialization writes go through the object's definition path and
    /// bypass this check.
    pub fn check_store(&self, value: &Value) -> Result<(), StorageError> {
        if self.storage == StorageKind::Constant || self.flags.is_final {
            return Err(StorageError::Immutable {
                key: self.key.clone(),
            });
        }
        let expected = match self.storage {
            StorageKind::InlineInteger => ValueKind::Integer,
            StorageKind::InlineDouble => ValueKind::Double,
            _ => return Ok(()),
        };
        if value.kind() != expected {
            return Err(StorageError::TypeMismatch {
                key: self.key.clone(),
                expected: self.storage.name(),
                found: value.kind().name(),
            });
        }
        Ok(())
    }
}

/// A Shape defines the layout of properties in an object.
///
/// Immutable after publication; the environment slot and the transition edge
/// cache are the only interior-mutable fields, and neither participates in
/// structural identity.
pub struct Shape {
    id: u64,
    root_id: u64,
    parent: Option<Arc<Shape>>,
    /// The descriptor added to the parent to create this shape
    descriptor: Option<PropertyDescriptor>,
    kind: ObjectKind,
    class_id: usize,
    class: Weak<Class>,
    property_map: FxHashMap<PropertyKey, Location>,
    /// Descriptors in insertion order; slot indices follow this order
    descriptors: Vec<PropertyDescriptor>,
    /// Attached meta-object environment (object-scoped MOP lookup)
    environment: RwLock<Option<Arc<Environment>>>,
    /// Memoized outgoing add-transitions.
    /// Weak to break cycles: child -> parent is the strong direction.
    transitions: RwLock<FxHashMap<PropertyDescriptor, Weak<Shape>>>,
}

impl Shape {
    /// Process-unique shape id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id of the root shape this shape transitioned from
    pub fn root_id(&self) -> u64 {
        self.root_id
    }

    /// The object category tag
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Whether objects of this shape participate in object-scoped MOP lookup
    pub fn is_reflective(&self) -> bool {
        self.kind == ObjectKind::Reflective
    }

    /// The parent shape, if any
    pub fn parent(&self) -> Option<&Arc<Shape>> {
        self.parent.as_ref()
    }

    /// The descriptor added relative to the parent
    pub fn descriptor(&self) -> Option<&PropertyDescriptor> {
        self.descriptor.as_ref()
    }

    /// Number of value slots objects of this shape carry
    pub fn slot_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Ordered property descriptors
    pub fn descriptors(&self) -> &[PropertyDescriptor] {
        &self.descriptors
    }

    /// Resolve a property key to its location, if present
    pub fn location_of(&self, key: &PropertyKey) -> Option<Location> {
        self.property_map.get(key).cloned()
    }

    /// User-visible property keys in insertion order (hidden ones excluded)
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        self.descriptors
            .iter()
            .filter(|d| !d.flags.is_hidden)
            .map(|d| d.key.clone())
            .collect()
    }

    /// The class this shape was installed for, if still alive
    pub fn class(&self) -> Option<Arc<Class>> {
        self.class.upgrade()
    }

    /// Walk the parent chain up to the root shape
    pub fn root(self: &Arc<Self>) -> Arc<Shape> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current
    }

    /// The attached environment, consulting parents when this shape has
    /// none of its own. Attaching to a root shape therefore covers every
    /// shape derived from it.
    pub fn environment(&self) -> Option<Arc<Environment>> {
        if let Some(env) = self.environment.read().clone() {
            return Some(env);
        }
        let mut current = self.parent.clone();
        while let Some(shape) = current {
            if let Some(env) = shape.environment.read().clone() {
                return Some(env);
            }
            current = shape.parent.clone();
        }
        None
    }

    /// Attach an environment to this shape's dedicated slot
    pub fn attach_environment(&self, environment: Arc<Environment>) {
        log::debug!("attaching environment to shape {}", self.id);
        *self.environment.write() = Some(environment);
    }

    /// Detach this shape's own environment, if any
    pub fn detach_environment(&self) -> Option<Arc<Environment>> {
        log::debug!("detaching environment from shape {}", self.id);
        self.environment.write().take()
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("descriptor", &self.descriptor)
            .field("slot_count", &self.slot_count())
            .finish()
    }
}

/// Structural identity of a shape: category tag, class, and the ordered
/// descriptor sequence. Shapes with equal signatures are interchangeable and
/// shared.
#[derive(Clone, PartialEq, Eq, Hash)]
struct ShapeSignature {
    kind: ObjectKind,
    class_id: usize,
    descriptors: Vec<PropertyDescriptor>,
}

/// Hash-consing table for shapes.
///
/// Every shape in a universe is interned here by its structural signature,
/// so identical property-addition sequences converge on the identical
/// `Arc<Shape>`. Entries are weak; a shape dies when no object and no cache
/// references it.
pub struct ShapeTable {
    table: DashMap<ShapeSignature, Weak<Shape>>,
}

impl ShapeTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            table: DashMap::new(),
        }
    }

    /// The empty root shape for the given category and class
    pub fn root(&self, kind: ObjectKind, class: Option<&Arc<Class>>) -> Arc<Shape> {
        let class_id = class.map(|c| Arc::as_ptr(c) as usize).unwrap_or(0);
        let class_weak = class.map(Arc::downgrade).unwrap_or_default();
        let signature = ShapeSignature {
            kind,
            class_id,
            descriptors: Vec::new(),
        };
        self.intern(signature, || {
            let id = NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed);
            Arc::new(Shape {
                id,
                root_id: id,
                parent: None,
                descriptor: None,
                kind,
                class_id,
                class: class_weak.clone(),
                property_map: FxHashMap::default(),
                descriptors: Vec::new(),
                environment: RwLock::new(None),
                transitions: RwLock::new(FxHashMap::default()),
            })
        })
    }

    /// Transition to the shape that adds `descriptor`.
    ///
    /// Pure and memoized: the source shape is never mutated, and equal
    /// addition sequences return the identical shape. Adding a key that
    /// already exists with an identical descriptor is a no-op; adding it
    /// with a different descriptor retypes it.
    pub fn transition_add(
        &self,
        shape: &Arc<Shape>,
        descriptor: PropertyDescriptor,
    ) -> Arc<Shape> {
        if let Some(existing) = shape.property_map.get(&descriptor.key) {
            let current = &shape.descriptors[existing.index()];
            if *current == descriptor {
                return Arc::clone(shape);
            }
            return self.transition_retype(shape, descriptor);
        }

        // Fast path: memoized edge
        if let Some(child) = shape
            .transitions
            .read()
            .get(&descriptor)
            .and_then(Weak::upgrade)
        {
            return child;
        }

        let mut descriptors = shape.descriptors.clone();
        descriptors.push(descriptor.clone());
        let signature = ShapeSignature {
            kind: shape.kind,
            class_id: shape.class_id,
            descriptors,
        };

        let child = self.intern(signature, || {
            let index = shape.descriptors.len();
            let mut property_map = shape.property_map.clone();
            property_map.insert(descriptor.key.clone(), Location::new(index, &descriptor));
            let mut descriptors = shape.descriptors.clone();
            descriptors.push(descriptor.clone());
            Arc::new(Shape {
                id: NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed),
                root_id: shape.root_id,
                parent: Some(Arc::clone(shape)),
                descriptor: Some(descriptor.clone()),
                kind: shape.kind,
                class_id: shape.class_id,
                class: shape.class.clone(),
                property_map,
                descriptors,
                environment: RwLock::new(None),
                transitions: RwLock::new(FxHashMap::default()),
            })
        });

        shape
            .transitions
            .write()
            .insert(descriptor, Arc::downgrade(&child));
        child
    }

    /// Transition to the shape without `key`.
    ///
    /// The remaining descriptor sequence is replayed from the root, so the
    /// result is shared with any shape built by the same sequence directly.
    pub fn transition_remove(&self, shape: &Arc<Shape>, key: &PropertyKey) -> Arc<Shape> {
        if !shape.property_map.contains_key(key) {
            return Arc::clone(shape);
        }
        let root = shape.root();
        shape
            .descriptors
            .iter()
            .filter(|d| d.key != *key)
            .cloned()
            .fold(root, |s, d| self.transition_add(&s, d))
    }

    /// Transition to the shape where `descriptor.key`'s descriptor is
    /// replaced by `descriptor`, keeping the key's position.
    pub fn transition_retype(
        &self,
        shape: &Arc<Shape>,
        descriptor: PropertyDescriptor,
    ) -> Arc<Shape> {
        let root = shape.root();
        shape
            .descriptors
            .iter()
            .map(|d| {
                if d.key == descriptor.key {
                    descriptor.clone()
                } else {
                    d.clone()
                }
            })
            .fold(root, |s, d| self.transition_add(&s, d))
    }

    /// Number of live shapes currently interned
    pub fn live_count(&self) -> usize {
        self.table
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    fn intern(&self, signature: ShapeSignature, build: impl FnOnce() -> Arc<Shape>) -> Arc<Shape> {
        // The entry holds the shard lock, so concurrent racers for the same
        // signature serialize here and observe one canonical shape.
        match self.table.entry(signature) {
            Entry::Occupied(mut entry) => {
                if let Some(shape) = entry.get().upgrade() {
                    shape
                } else {
                    let shape = build();
                    entry.insert(Arc::downgrade(&shape));
                    shape
                }
            }
            Entry::Vacant(entry) => {
                let shape = build();
                entry.insert(Arc::downgrade(&shape));
                shape
            }
        }
    }
}

impl Default for ShapeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShapeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeTable")
            .field("entries", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_additions_share_identity() {
        let table = ShapeTable::new();
        let root = table.root(ObjectKind::Plain, None);

        let a = table.transition_add(&root, PropertyDescriptor::boxed("x"));
        let b = table.transition_add(&root, PropertyDescriptor::boxed("x"));
        assert!(Arc::ptr_eq(&a, &b));

        let a2 = table.transition_add(&a, PropertyDescriptor::boxed("y"));
        let b2 = table.transition_add(&b, PropertyDescriptor::boxed("y"));
        assert!(Arc::ptr_eq(&a2, &b2));
        assert_eq!(a2.slot_count(), 2);
    }

    #[test]
    fn test_transition_does_not_mutate_source() {
        let table = ShapeTable::new();
        let root = table.root(ObjectKind::Plain, None);
        let child = table.transition_add(&root, PropertyDescriptor::boxed("x"));

        assert_eq!(root.slot_count(), 0);
        assert!(root.location_of(&PropertyKey::symbol("x")).is_none());
        assert_eq!(child.slot_count(), 1);
        assert_eq!(child.root_id(), root.id());
    }

    #[test]
    fn test_order_matters_for_identity() {
        let table = ShapeTable::new();
        let root = table.root(ObjectKind::Plain, None);

        let xy = table.transition_add(
            &table.transition_add(&root, PropertyDescriptor::boxed("x")),
            PropertyDescriptor::boxed("y"),
        );
        let yx = table.transition_add(
            &table.transition_add(&root, PropertyDescriptor::boxed("y")),
            PropertyDescriptor::boxed("x"),
        );
        assert!(!Arc::ptr_eq(&xy, &yx));
    }

    #[test]
    fn test_remove_replays_to_shared_shape() {
        let table = ShapeTable::new();
        let root = table.root(ObjectKind::Plain, None);

        let with_x = table.transition_add(&root, PropertyDescriptor::boxed("x"));
        let with_xy = table.transition_add(&with_x, PropertyDescriptor::boxed("y"));
        let only_y = table.transition_remove(&with_xy, &PropertyKey::symbol("x"));

        let direct_y = table.transition_add(&root, PropertyDescriptor::boxed("y"));
        assert!(Arc::ptr_eq(&only_y, &direct_y));
    }

    #[test]
    fn test_retype_keeps_position() {
        let table = ShapeTable::new();
        let root = table.root(ObjectKind::Plain, None);
        let with_x = table.transition_add(&root, PropertyDescriptor::boxed("x"));
        let with_xy = table.transition_add(&with_x, PropertyDescriptor::boxed("y"));

        let retyped = table.transition_retype(&with_xy, PropertyDescriptor::inline_integer("x"));
        let loc = retyped.location_of(&PropertyKey::symbol("x")).unwrap();
        assert_eq!(loc.index(), 0);
        assert_eq!(loc.storage(), StorageKind::InlineInteger);
    }

    #[test]
    fn test_kind_distinguishes_roots() {
        let table = ShapeTable::new();
        let plain = table.root(ObjectKind::Plain, None);
        let reflective = table.root(ObjectKind::Reflective, None);
        assert!(!Arc::ptr_eq(&plain, &reflective));
        assert!(reflective.is_reflective());
        assert!(!plain.is_reflective());
    }

    #[test]
    fn test_hidden_keys_excluded_from_listing() {
        let table = ShapeTable::new();
        let root = table.root(ObjectKind::Plain, None);
        let shape = table.transition_add(
            &root,
            PropertyDescriptor::boxed("secret").with_flags(PropertyFlags::hidden()),
        );
        let shape = table.transition_add(&shape, PropertyDescriptor::boxed("visible"));

        let keys = shape.own_keys();
        assert_eq!(keys, vec![PropertyKey::symbol("visible")]);
        assert_eq!(shape.slot_count(), 2);
    }

    #[test]
    fn test_check_store_type_mismatch() {
        let table = ShapeTable::new();
        let root = table.root(ObjectKind::Plain, None);
        let shape = table.transition_add(&root, PropertyDescriptor::inline_integer("n"));
        let loc = shape.location_of(&PropertyKey::symbol("n")).unwrap();

        assert!(loc.check_store(&Value::integer(1)).is_ok());
        assert!(matches!(
            loc.check_store(&Value::double(1.0)),
            Err(StorageError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_check_store_immutable() {
        let table = ShapeTable::new();
        let root = table.root(ObjectKind::Plain, None);
        let shape = table.transition_add(&root, PropertyDescriptor::constant("k"));
        let loc = shape.location_of(&PropertyKey::symbol("k")).unwrap();

        assert!(matches!(
            loc.check_store(&Value::integer(1)),
            Err(StorageError::Immutable { .. })
        ));
    }

    #[test]
    fn test_environment_visible_through_derived_shapes() {
        let table = ShapeTable::new();
        let root = table.root(ObjectKind::Reflective, None);
        let derived = table.transition_add(&root, PropertyDescriptor::boxed("x"));

        assert!(derived.environment().is_none());
        let env = Environment::named("meta");
        root.attach_environment(Arc::clone(&env));
        assert!(derived.environment().is_some());

        root.detach_environment();
        assert!(derived.environment().is_none());
    }
}
