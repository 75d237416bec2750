//! Meta-object environments
//!
//! An environment is a table of handlers keyed by reflective operation.
//! Attached to an activation it intercepts that frame's operations; attached
//! to a shape it intercepts operations on every object sharing the shape.
//! The version counter changes whenever the handler table changes, so cached
//! resolutions can detect that an environment they bound against has moved on.

use crate::method::Method;
use crate::symbol::Symbol;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The base-level operations an environment can intercept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflectiveOp {
    /// A message send
    MessageSend,
    /// A field read
    FieldRead,
    /// A field write
    FieldWrite,
    /// A frame-local read
    LocalRead,
    /// A frame-local write
    LocalWrite,
}

impl ReflectiveOp {
    /// Operation name, used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            ReflectiveOp::MessageSend => "messageSend",
            ReflectiveOp::FieldRead => "fieldRead",
            ReflectiveOp::FieldWrite => "fieldWrite",
            ReflectiveOp::LocalRead => "localRead",
            ReflectiveOp::LocalWrite => "localWrite",
        }
    }
}

/// A meta-object: named handler table over reflective operations
pub struct Environment {
    name: Symbol,
    handlers: RwLock<FxHashMap<ReflectiveOp, Arc<Method>>>,
    version: AtomicU64,
}

impl Environment {
    /// Create an empty environment with a diagnostic name
    pub fn named(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: Symbol::intern(name),
            handlers: RwLock::new(FxHashMap::default()),
            version: AtomicU64::new(0),
        })
    }

    /// The environment's name
    pub fn name(&self) -> &Symbol {
        &self.name
    }

    /// Install a handler for an operation, replacing any existing one
    pub fn define_handler(&self, op: ReflectiveOp, handler: Arc<Method>) {
        self.handlers.write().insert(op, handler);
        self.version.fetch_add(1, Ordering::SeqCst);
        log::trace!("environment {} handles {}", self.name, op.name());
    }

    /// Remove the handler for an operation. Returns true when one was present.
    pub fn remove_handler(&self, op: ReflectiveOp) -> bool {
        let removed = self.handlers.write().remove(&op).is_some();
        if removed {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    /// Remove every handler
    pub fn clear_handlers(&self) {
        let mut handlers = self.handlers.write();
        if !handlers.is_empty() {
            handlers.clear();
            self.version.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// The handler for an operation, if one is installed
    pub fn handler_for(&self, op: ReflectiveOp) -> Option<Arc<Method>> {
        self.handlers.read().get(&op).cloned()
    }

    /// Whether no handlers are installed
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Handler table version, bumped on every change
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.name)
            .field("handlers", &self.handlers.read().len())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;
    use crate::value::Value;

    fn stub_handler(name: &str) -> Arc<Method> {
        Method::primitive(name, |_, _| Ok(Value::Nil))
    }

    #[test]
    fn test_define_and_lookup() {
        let env = Environment::named("tracer");
        assert!(env.is_empty());
        assert!(env.handler_for(ReflectiveOp::MessageSend).is_none());

        let handler = stub_handler("trace");
        env.define_handler(ReflectiveOp::MessageSend, Arc::clone(&handler));
        let found = env.handler_for(ReflectiveOp::MessageSend).unwrap();
        assert!(Arc::ptr_eq(&found, &handler));
        assert!(env.handler_for(ReflectiveOp::FieldRead).is_none());
    }

    #[test]
    fn test_version_tracks_changes() {
        let env = Environment::named("v");
        let v0 = env.version();

        env.define_handler(ReflectiveOp::FieldRead, stub_handler("h"));
        let v1 = env.version();
        assert_ne!(v0, v1);

        assert!(env.remove_handler(ReflectiveOp::FieldRead));
        assert_ne!(v1, env.version());
    }

    #[test]
    fn test_remove_missing_handler_keeps_version() {
        let env = Environment::named("v");
        let v0 = env.version();
        assert!(!env.remove_handler(ReflectiveOp::LocalWrite));
        assert_eq!(v0, env.version());
    }

    #[test]
    fn test_clear_handlers() {
        let env = Environment::named("c");
        env.define_handler(ReflectiveOp::FieldRead, stub_handler("a"));
        env.define_handler(ReflectiveOp::FieldWrite, stub_handler("b"));

        let before = env.version();
        env.clear_handlers();
        assert!(env.is_empty());
        assert_ne!(before, env.version());

        // Clearing an already-empty table does not bump the version
        let after = env.version();
        env.clear_handlers();
        assert_eq!(after, env.version());
    }

    #[test]
    fn test_redefine_replaces_handler() {
        let env = Environment::named("r");
        env.define_handler(ReflectiveOp::MessageSend, stub_handler("first"));
        let second = stub_handler("second");
        env.define_handler(ReflectiveOp::MessageSend, Arc::clone(&second));

        let found = env.handler_for(ReflectiveOp::MessageSend).unwrap();
        assert!(Arc::ptr_eq(&found, &second));
    }
}
