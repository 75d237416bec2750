//! Inline caches
//!
//! Each send and field access site carries a cache that moves monotonically
//! through Uninitialized, Cached, Polymorphic, and Megamorphic. A cached
//! entry pairs a guard with a resolved target; guards for sends key on the
//! receiver's shape root (constant across property transitions), guards for
//! field locations key on the exact shape, and primitive receivers key on
//! their value kind.
//!
//! Caches specialize under the reflection switch's current token. When the
//! switch flips the token is invalidated and the site resets to
//! `Uninitialized` the next time it executes.

use crate::assumption::Assumption;
use crate::environment::ReflectiveOp;
use crate::method::Method;
use crate::mop::MopSite;
use crate::shape::{Location, PropertyKey};
use crate::symbol::Symbol;
use crate::value::{Value, ValueKind};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;

/// Maximum number of cached entries before a site collapses to megamorphic
pub const INLINE_CACHE_SIZE: usize = 6;

/// Receiver predicate guarding one cached entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Receiver is an object whose shape descends from this root
    ShapeRoot(u64),
    /// Receiver is an object with exactly this shape
    Shape(u64),
    /// Receiver is a primitive of this kind
    ValueKind(ValueKind),
    /// Receiver is this exact method object
    MethodIdentity(usize),
}

impl Guard {
    /// The guard a send site uses for `receiver`.
    ///
    /// Objects key on their shape root: a method resolved for a class stays
    /// valid while instances gain and lose properties.
    pub fn for_send(receiver: &Value) -> Guard {
        match receiver {
            Value::Object(object) => Guard::ShapeRoot(object.shape().root_id()),
            Value::Method(method) => Guard::MethodIdentity(Method::identity_of(method)),
            other => Guard::ValueKind(other.kind()),
        }
    }

    /// The guard a field site uses for `receiver`.
    ///
    /// Objects key on their exact shape, since slot offsets differ between
    /// shapes of the same root.
    pub fn for_field(receiver: &Value) -> Guard {
        match receiver {
            Value::Object(object) => Guard::Shape(object.shape().id()),
            other => Guard::ValueKind(other.kind()),
        }
    }

    /// Whether the guard accepts `receiver`
    pub fn holds(&self, receiver: &Value) -> bool {
        match (self, receiver) {
            (Guard::ShapeRoot(root), Value::Object(object)) => {
                object.shape().root_id() == *root
            }
            (Guard::Shape(id), Value::Object(object)) => object.shape().id() == *id,
            (Guard::MethodIdentity(id), Value::Method(method)) => {
                Method::identity_of(method) == *id
            }
            (Guard::ValueKind(kind), value) => value.kind() == *kind,
            _ => false,
        }
    }
}

/// One cached guard/target pair
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    guard: Guard,
    target: T,
}

enum CacheState<T> {
    Uninitialized,
    Cached(CacheEntry<T>),
    Polymorphic(SmallVec<[CacheEntry<T>; INLINE_CACHE_SIZE]>),
    Megamorphic,
}

/// Result of probing a cache for a receiver
#[derive(Debug)]
pub enum CacheLookup<T> {
    /// A guard held; here is its target
    Hit(T),
    /// No guard held; the caller resolves and installs
    Miss,
    /// The site is megamorphic; the caller resolves without installing
    Megamorphic,
}

/// Result of installing a resolved target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The site became (or refreshed) a monomorphic cache
    Cached,
    /// The entry list grew within the bound
    Extended,
    /// The install exceeded the bound and the site collapsed to megamorphic
    Collapsed,
    /// The site was already megamorphic; nothing was stored
    AlreadyMegamorphic,
}

/// A bounded polymorphic inline cache
pub struct CacheSite<T> {
    state: RwLock<CacheState<T>>,
    token: RwLock<Arc<Assumption>>,
    bound: usize,
}

impl<T: Clone> CacheSite<T> {
    /// Create an empty site with the default bound
    pub fn new() -> Self {
        Self::with_bound(INLINE_CACHE_SIZE)
    }

    /// Create an empty site with an explicit bound
    pub fn with_bound(bound: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::Uninitialized),
            // Pre-invalidated so the first execution adopts the live token
            token: RwLock::new(Assumption::invalid("unresolved")),
            bound,
        }
    }

    /// Ensure the site's specializations are valid under `current`.
    ///
    /// Returns true when the site had specialized under a stale token and
    /// was reset to `Uninitialized`.
    pub fn revalidate(&self, current: &Arc<Assumption>) -> bool {
        {
            let token = self.token.read();
            if Arc::ptr_eq(&token, current) && token.is_valid() {
                return false;
            }
        }
        let mut token = self.token.write();
        if Arc::ptr_eq(&token, current) && token.is_valid() {
            return false;
        }
        *self.state.write() = CacheState::Uninitialized;
        *token = Arc::clone(current);
        true
    }

    /// Probe the cache for `receiver`
    pub fn lookup(&self, receiver: &Value) -> CacheLookup<T> {
        match &*self.state.read() {
            CacheState::Uninitialized => CacheLookup::Miss,
            CacheState::Cached(entry) => {
                if entry.guard.holds(receiver) {
                    CacheLookup::Hit(entry.target.clone())
                } else {
                    CacheLookup::Miss
                }
            }
            CacheState::Polymorphic(entries) => entries
                .iter()
                .find(|e| e.guard.holds(receiver))
                .map(|e| CacheLookup::Hit(e.target.clone()))
                .unwrap_or(CacheLookup::Miss),
            CacheState::Megamorphic => CacheLookup::Megamorphic,
        }
    }

    /// Install a resolved target under `guard`.
    ///
    /// A duplicate guard refreshes its target in place. A distinct guard
    /// extends the entry list; when the list would exceed the bound the site
    /// collapses to megamorphic and stays there.
    pub fn install(&self, guard: Guard, target: T) -> InstallOutcome {
        let mut state = self.state.write();
        match &mut *state {
            CacheState::Uninitialized => {
                *state = CacheState::Cached(CacheEntry { guard, target });
                InstallOutcome::Cached
            }
            CacheState::Cached(entry) => {
                if entry.guard == guard {
                    entry.target = target;
                    return InstallOutcome::Cached;
                }
                if self.bound < 2 {
                    *state = CacheState::Megamorphic;
                    return InstallOutcome::Collapsed;
                }
                let mut entries = SmallVec::new();
                entries.push(entry.clone());
                entries.push(CacheEntry { guard, target });
                *state = CacheState::Polymorphic(entries);
                InstallOutcome::Extended
            }
            CacheState::Polymorphic(entries) => {
                if let Some(entry) = entries.iter_mut().find(|e| e.guard == guard) {
                    entry.target = target;
                    return InstallOutcome::Extended;
                }
                if entries.len() >= self.bound {
                    *state = CacheState::Megamorphic;
                    return InstallOutcome::Collapsed;
                }
                entries.push(CacheEntry { guard, target });
                InstallOutcome::Extended
            }
            CacheState::Megamorphic => InstallOutcome::AlreadyMegamorphic,
        }
    }

    /// Number of cached entries
    pub fn entry_count(&self) -> usize {
        match &*self.state.read() {
            CacheState::Uninitialized | CacheState::Megamorphic => 0,
            CacheState::Cached(_) => 1,
            CacheState::Polymorphic(entries) => entries.len(),
        }
    }

    /// Whether the site has collapsed to megamorphic
    pub fn is_megamorphic(&self) -> bool {
        matches!(&*self.state.read(), CacheState::Megamorphic)
    }

    /// Name of the current state, for diagnostics
    pub fn state_name(&self) -> &'static str {
        match &*self.state.read() {
            CacheState::Uninitialized => "uninitialized",
            CacheState::Cached(_) => "cached",
            CacheState::Polymorphic(_) => "polymorphic",
            CacheState::Megamorphic => "megamorphic",
        }
    }
}

impl<T: Clone> Default for CacheSite<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for CacheSite<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.read() {
            CacheState::Uninitialized => "uninitialized",
            CacheState::Cached(_) => "cached",
            CacheState::Polymorphic(_) => "polymorphic",
            CacheState::Megamorphic => "megamorphic",
        };
        f.debug_struct("CacheSite")
            .field("state", &state)
            .field("bound", &self.bound)
            .finish()
    }
}

/// A message send site: method cache plus override resolution
#[derive(Debug)]
pub struct CallSite {
    selector: Symbol,
    /// Cached method resolutions
    pub cache: CacheSite<Arc<Method>>,
    /// Cached override resolutions
    pub mop: MopSite,
}

impl CallSite {
    /// Create a send site for `selector`
    pub fn new(selector: &str) -> Self {
        Self {
            selector: Symbol::intern(selector),
            cache: CacheSite::new(),
            mop: MopSite::new(ReflectiveOp::MessageSend),
        }
    }

    /// Create a send site with an explicit cache bound
    pub fn with_bound(selector: &str, bound: usize) -> Self {
        Self {
            selector: Symbol::intern(selector),
            cache: CacheSite::with_bound(bound),
            mop: MopSite::with_bound(ReflectiveOp::MessageSend, bound),
        }
    }

    /// The site's selector
    pub fn selector(&self) -> &Symbol {
        &self.selector
    }
}

/// Which direction a field site accesses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    /// Property read
    Read,
    /// Property write
    Write,
}

/// A field access site: location cache plus override resolution
#[derive(Debug)]
pub struct FieldSite {
    key: PropertyKey,
    access: FieldAccess,
    /// Cached location resolutions
    pub cache: CacheSite<Location>,
    /// Cached override resolutions
    pub mop: MopSite,
}

impl FieldSite {
    /// Create a field site for `key`
    pub fn new(key: impl Into<PropertyKey>, access: FieldAccess) -> Self {
        Self::with_bound(key, access, INLINE_CACHE_SIZE)
    }

    /// Create a field site with an explicit cache bound
    pub fn with_bound(key: impl Into<PropertyKey>, access: FieldAccess, bound: usize) -> Self {
        let op = match access {
            FieldAccess::Read => ReflectiveOp::FieldRead,
            FieldAccess::Write => ReflectiveOp::FieldWrite,
        };
        Self {
            key: key.into(),
            access,
            cache: CacheSite::with_bound(bound),
            mop: MopSite::with_bound(op, bound),
        }
    }

    /// The property key this site accesses
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// The access direction
    pub fn access(&self) -> FieldAccess {
        self.access
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRecord;
    use crate::shape::{ObjectKind, ShapeTable};

    fn object(table: &ShapeTable) -> Value {
        Value::Object(ObjectRecord::new(table.root(ObjectKind::Plain, None)))
    }

    #[test]
    fn test_send_guard_survives_property_transition() {
        let table = ShapeTable::new();
        let receiver = object(&table);
        let guard = Guard::for_send(&receiver);

        receiver
            .as_object()
            .unwrap()
            .set(&table, "x", Value::integer(1))
            .unwrap();
        assert!(guard.holds(&receiver));
    }

    #[test]
    fn test_field_guard_breaks_on_property_transition() {
        let table = ShapeTable::new();
        let receiver = object(&table);
        let guard = Guard::for_field(&receiver);
        assert!(guard.holds(&receiver));

        receiver
            .as_object()
            .unwrap()
            .set(&table, "x", Value::integer(1))
            .unwrap();
        assert!(!guard.holds(&receiver));
    }

    #[test]
    fn test_value_kind_guard() {
        let guard = Guard::for_send(&Value::integer(1));
        assert!(guard.holds(&Value::integer(99)));
        assert!(!guard.holds(&Value::double(1.0)));
        assert!(!guard.holds(&Value::Nil));
    }

    #[test]
    fn test_method_identity_guard() {
        let m1 = Method::primitive("value", |_, _| Ok(Value::Nil));
        let m2 = Method::primitive("value", |_, _| Ok(Value::Nil));
        let guard = Guard::for_send(&Value::Method(Arc::clone(&m1)));
        assert!(guard.holds(&Value::Method(m1)));
        assert!(!guard.holds(&Value::Method(m2)));
    }

    #[test]
    fn test_cache_progression_to_megamorphic() {
        let site: CacheSite<i32> = CacheSite::with_bound(2);
        assert_eq!(site.state_name(), "uninitialized");

        assert_eq!(site.install(Guard::Shape(1), 10), InstallOutcome::Cached);
        assert_eq!(site.state_name(), "cached");

        assert_eq!(site.install(Guard::Shape(2), 20), InstallOutcome::Extended);
        assert_eq!(site.state_name(), "polymorphic");
        assert_eq!(site.entry_count(), 2);

        // Third distinct guard exceeds the bound of two
        assert_eq!(site.install(Guard::Shape(3), 30), InstallOutcome::Collapsed);
        assert!(site.is_megamorphic());

        // Megamorphic is terminal
        assert_eq!(
            site.install(Guard::Shape(1), 10),
            InstallOutcome::AlreadyMegamorphic
        );
        assert!(site.is_megamorphic());
    }

    #[test]
    fn test_duplicate_guard_refreshes_without_growth() {
        let site: CacheSite<i32> = CacheSite::new();
        site.install(Guard::Shape(1), 10);
        site.install(Guard::Shape(1), 11);
        assert_eq!(site.entry_count(), 1);

        match site.lookup(&Value::Nil) {
            CacheLookup::Miss => {}
            other => panic!("expected miss, got {other:?}"),
        }
    }

    #[test]
    fn test_bound_of_one_collapses_on_second_guard() {
        let site: CacheSite<i32> = CacheSite::with_bound(1);
        assert_eq!(site.install(Guard::Shape(1), 10), InstallOutcome::Cached);
        assert_eq!(site.install(Guard::Shape(2), 20), InstallOutcome::Collapsed);
        assert!(site.is_megamorphic());
    }

    #[test]
    fn test_lookup_hit_and_miss() {
        let site: CacheSite<i32> = CacheSite::new();
        site.install(Guard::ValueKind(ValueKind::Integer), 7);

        match site.lookup(&Value::integer(3)) {
            CacheLookup::Hit(v) => assert_eq!(v, 7),
            other => panic!("expected hit, got {other:?}"),
        }
        assert!(matches!(site.lookup(&Value::Nil), CacheLookup::Miss));
    }

    #[test]
    fn test_revalidate_resets_on_stale_token() {
        let site: CacheSite<i32> = CacheSite::new();
        let token = Assumption::fresh("t1");

        // First execution adopts the live token
        assert!(site.revalidate(&token));
        site.install(Guard::Shape(1), 10);
        assert!(!site.revalidate(&token));
        assert_eq!(site.entry_count(), 1);

        token.invalidate();
        let fresh = Assumption::fresh("t2");
        assert!(site.revalidate(&fresh));
        assert_eq!(site.state_name(), "uninitialized");
    }
}
