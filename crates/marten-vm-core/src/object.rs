//! Object records: shaped slot storage
//!
//! An object is a shape reference plus a value area sized to it. Structural
//! mutation (adding, removing, retyping a property) transitions the object
//! to a new shape under its write lock; value updates stay in place.

use crate::environment::Environment;
use crate::error::StorageError;
use crate::shape::{
    Location, PropertyDescriptor, PropertyKey, Shape, ShapeTable, StorageKind,
};
use crate::value::{Value, ValueKind};
use parking_lot::RwLock;
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// Shared handle to an object record; identity is `Arc` identity
pub type ObjectRef = Arc<ObjectRecord>;

struct ObjectInner {
    shape: Arc<Shape>,
    slots: SmallVec<[Value; 8]>,
}

/// A Marten object: a shape and its value slots
///
/// Thread-safe with interior mutability. Slot growth is exclusive under the
/// object's write lock; readers of an unchanged shape never block each other.
pub struct ObjectRecord {
    inner: RwLock<ObjectInner>,
}

impl ObjectRecord {
    /// Allocate an object with the given initial shape, slots filled with nil
    pub fn new(shape: Arc<Shape>) -> ObjectRef {
        let slots = smallvec![Value::Nil; shape.slot_count()];
        Arc::new(Self {
            inner: RwLock::new(ObjectInner { shape, slots }),
        })
    }

    /// The object's current shape
    pub fn shape(&self) -> Arc<Shape> {
        Arc::clone(&self.inner.read().shape)
    }

    /// Read a property value, if the property exists
    pub fn get(&self, key: &PropertyKey) -> Option<Value> {
        let inner = self.inner.read();
        let location = inner.shape.location_of(key)?;
        Some(inner.slots[location.index()].clone())
    }

    /// Write a property value.
    ///
    /// An existing property is updated in place, subject to its storage kind
    /// and flags. A missing property is defined as a boxed property, which
    /// transitions the shape and grows the slot area.
    pub fn set(
        &self,
        table: &ShapeTable,
        key: impl Into<PropertyKey>,
        value: Value,
    ) -> Result<(), StorageError> {
        let key = key.into();
        let mut inner = self.inner.write();
        if let Some(location) = inner.shape.location_of(&key) {
            location.check_store(&value)?;
            inner.slots[location.index()] = value;
            return Ok(());
        }

        let new_shape = table.transition_add(&inner.shape, PropertyDescriptor::boxed(key));
        let index = new_shape.slot_count() - 1;
        inner.slots.resize(new_shape.slot_count(), Value::Nil);
        inner.slots[index] = value;
        inner.shape = new_shape;
        Ok(())
    }

    /// Define a property with an explicit descriptor and initial value.
    ///
    /// This is the initialization path: constant and final slots accept their
    /// first value here. Typed slots still reject values of the wrong kind.
    pub fn define_property(
        &self,
        table: &ShapeTable,
        descriptor: PropertyDescriptor,
        value: Value,
    ) -> Result<(), StorageError> {
        let expected = match descriptor.storage {
            StorageKind::InlineInteger => Some(ValueKind::Integer),
            StorageKind::InlineDouble => Some(ValueKind::Double),
            _ => None,
        };
        if let Some(expected) = expected
            && value.kind() != expected
        {
            return Err(StorageError::TypeMismatch {
                key: descriptor.key.clone(),
                expected: match descriptor.storage {
                    StorageKind::InlineInteger => "integer",
                    _ => "double",
                },
                found: value.kind().name(),
            });
        }

        let mut inner = self.inner.write();
        let new_shape = table.transition_add(&inner.shape, descriptor.clone());
        inner.slots.resize(new_shape.slot_count(), Value::Nil);
        if let Some(location) = new_shape.location_of(&descriptor.key) {
            inner.slots[location.index()] = value;
        }
        inner.shape = new_shape;
        Ok(())
    }

    /// Remove a property, transitioning to the shape without it.
    ///
    /// Returns false when the property does not exist. Remaining slot values
    /// are remapped to their locations in the new shape.
    pub fn remove_property(&self, table: &ShapeTable, key: &PropertyKey) -> bool {
        let mut inner = self.inner.write();
        if inner.shape.location_of(key).is_none() {
            return false;
        }

        let new_shape = table.transition_remove(&inner.shape, key);
        let mut new_slots: SmallVec<[Value; 8]> = smallvec![Value::Nil; new_shape.slot_count()];
        for descriptor in new_shape.descriptors() {
            if let (Some(old), Some(new)) = (
                inner.shape.location_of(&descriptor.key),
                new_shape.location_of(&descriptor.key),
            ) {
                new_slots[new.index()] = inner.slots[old.index()].clone();
            }
        }
        inner.slots = new_slots;
        inner.shape = new_shape;
        true
    }

    /// User-visible property keys
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        self.inner.read().shape.own_keys()
    }

    /// The environment attached to this object's shape, if any
    pub fn environment(&self) -> Option<Arc<Environment>> {
        self.inner.read().shape.environment()
    }

    /// Raw slot read; out-of-range reads yield nil
    pub fn slot(&self, index: usize) -> Value {
        self.inner
            .read()
            .slots
            .get(index)
            .cloned()
            .unwrap_or(Value::Nil)
    }

    fn write_slot(&self, location: &Location, value: Value) -> Result<(), StorageError> {
        location.check_store(&value)?;
        let mut inner = self.inner.write();
        if location.index() < inner.slots.len() {
            inner.slots[location.index()] = value;
        }
        Ok(())
    }
}

impl Location {
    /// Read the slot this location resolves to
    pub fn get(&self, object: &ObjectRecord) -> Value {
        object.slot(self.index())
    }

    /// Write the slot this location resolves to, subject to storage checks
    pub fn set(&self, object: &ObjectRecord, value: Value) -> Result<(), StorageError> {
        object.write_slot(self, value)
    }
}

impl std::fmt::Debug for ObjectRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ObjectRecord")
            .field("shape", &inner.shape.id())
            .field("slots", &inner.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{ObjectKind, PropertyFlags};

    fn fresh(table: &ShapeTable) -> ObjectRef {
        ObjectRecord::new(table.root(ObjectKind::Plain, None))
    }

    #[test]
    fn test_get_set_roundtrip() {
        let table = ShapeTable::new();
        let obj = fresh(&table);

        obj.set(&table, "x", Value::integer(7)).unwrap();
        assert_eq!(obj.get(&PropertyKey::symbol("x")), Some(Value::integer(7)));
        assert_eq!(obj.get(&PropertyKey::symbol("y")), None);
    }

    #[test]
    fn test_sibling_objects_converge_on_same_shape() {
        let table = ShapeTable::new();
        let o1 = fresh(&table);
        let o2 = fresh(&table);
        assert!(Arc::ptr_eq(&o1.shape(), &o2.shape()));

        o1.set(&table, "x", Value::integer(1)).unwrap();
        o2.set(&table, "x", Value::integer(2)).unwrap();
        assert!(Arc::ptr_eq(&o1.shape(), &o2.shape()));
        assert_ne!(o1.get(&PropertyKey::symbol("x")), o2.get(&PropertyKey::symbol("x")));
    }

    #[test]
    fn test_typed_slot_rejects_wrong_kind() {
        let table = ShapeTable::new();
        let obj = fresh(&table);
        obj.define_property(&table, PropertyDescriptor::inline_integer("n"), Value::integer(0))
            .unwrap();

        let err = obj.set(&table, "n", Value::symbol("oops")).unwrap_err();
        assert!(matches!(err, StorageError::TypeMismatch { .. }));
        assert_eq!(obj.get(&PropertyKey::symbol("n")), Some(Value::integer(0)));
    }

    #[test]
    fn test_constant_slot_rejects_rewrite() {
        let table = ShapeTable::new();
        let obj = fresh(&table);
        obj.define_property(&table, PropertyDescriptor::constant("k"), Value::integer(1))
            .unwrap();

        assert_eq!(obj.get(&PropertyKey::symbol("k")), Some(Value::integer(1)));
        let err = obj.set(&table, "k", Value::integer(2)).unwrap_err();
        assert!(matches!(err, StorageError::Immutable { .. }));
    }

    #[test]
    fn test_final_flag_rejects_rewrite() {
        let table = ShapeTable::new();
        let obj = fresh(&table);
        obj.define_property(
            &table,
            PropertyDescriptor::boxed("f").with_flags(PropertyFlags::final_only()),
            Value::integer(1),
        )
        .unwrap();

        assert!(matches!(
            obj.set(&table, "f", Value::integer(2)),
            Err(StorageError::Immutable { .. })
        ));
    }

    #[test]
    fn test_remove_remaps_remaining_slots() {
        let table = ShapeTable::new();
        let obj = fresh(&table);
        obj.set(&table, "x", Value::integer(1)).unwrap();
        obj.set(&table, "y", Value::integer(2)).unwrap();
        obj.set(&table, "z", Value::integer(3)).unwrap();

        assert!(obj.remove_property(&table, &PropertyKey::symbol("y")));
        assert_eq!(obj.get(&PropertyKey::symbol("x")), Some(Value::integer(1)));
        assert_eq!(obj.get(&PropertyKey::symbol("y")), None);
        assert_eq!(obj.get(&PropertyKey::symbol("z")), Some(Value::integer(3)));
        assert_eq!(obj.shape().slot_count(), 2);
    }

    #[test]
    fn test_remove_missing_property() {
        let table = ShapeTable::new();
        let obj = fresh(&table);
        assert!(!obj.remove_property(&table, &PropertyKey::symbol("ghost")));
    }

    #[test]
    fn test_location_get_set() {
        let table = ShapeTable::new();
        let obj = fresh(&table);
        obj.set(&table, "x", Value::integer(1)).unwrap();

        let location = obj.shape().location_of(&PropertyKey::symbol("x")).unwrap();
        assert_eq!(location.get(&obj), Value::integer(1));
        location.set(&obj, Value::integer(5)).unwrap();
        assert_eq!(location.get(&obj), Value::integer(5));
    }
}
