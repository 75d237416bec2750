//! Per-site resolution of reflective overrides
//!
//! Every intercepted operation carries a `MopSite` that answers one question:
//! does an environment override this operation for this receiver, here, now?
//! Frame environments are consulted first and never cached, since they vary
//! per activation. Object environments are cached per shape root, with each
//! cached entry revalidated against the environment's identity and version so
//! handler table edits are observed immediately.

use crate::activation::Activation;
use crate::dispatch::INLINE_CACHE_SIZE;
use crate::environment::ReflectiveOp;
use crate::method::Method;
use crate::value::Value;
use marten_profiler::DispatchStats;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of consulting the meta layer for one operation
#[derive(Debug, Clone)]
pub enum Resolution {
    /// An environment overrides the operation with this handler
    Handler(Arc<Method>),
    /// No environment overrides the operation; proceed with base semantics
    NoOverride,
}

struct MopEntry {
    root_id: u64,
    env_identity: usize,
    env_version: u64,
    handler: Option<Arc<Method>>,
}

/// Cached override resolution for one operation at one program point
pub struct MopSite {
    op: ReflectiveOp,
    bound: usize,
    entries: RwLock<SmallVec<[MopEntry; 4]>>,
    megamorphic: AtomicBool,
}

impl MopSite {
    /// Create a site with the default entry bound
    pub fn new(op: ReflectiveOp) -> Self {
        Self::with_bound(op, INLINE_CACHE_SIZE)
    }

    /// Create a site with an explicit entry bound
    pub fn with_bound(op: ReflectiveOp, bound: usize) -> Self {
        Self {
            op,
            bound,
            entries: RwLock::new(SmallVec::new()),
            megamorphic: AtomicBool::new(false),
        }
    }

    /// The operation this site resolves
    pub fn op(&self) -> ReflectiveOp {
        self.op
    }

    /// Resolve the override for `receiver` in the frame `activation`.
    ///
    /// The caller is responsible for gating on the global reflection switch
    /// and the frame's execution level; this method assumes interception is
    /// in effect.
    pub fn resolve(
        &self,
        stats: &DispatchStats,
        activation: &Activation,
        receiver: &Value,
    ) -> Resolution {
        stats.record_mop_resolution();

        if let Some(env) = activation.environment()
            && let Some(handler) = env.handler_for(self.op)
        {
            stats.record_mop_override();
            return Resolution::Handler(handler);
        }

        let Some(object) = receiver.as_object() else {
            return Resolution::NoOverride;
        };
        let shape = object.shape();
        if !shape.is_reflective() {
            return Resolution::NoOverride;
        }
        let Some(env) = shape.environment() else {
            return Resolution::NoOverride;
        };

        let identity = Arc::as_ptr(&env) as usize;
        let version = env.version();

        if self.megamorphic.load(Ordering::Acquire) {
            return self.report(env.handler_for(self.op), stats);
        }

        let root_id = shape.root_id();
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.root_id == root_id) {
            if entry.env_identity != identity || entry.env_version != version {
                entry.env_identity = identity;
                entry.env_version = version;
                entry.handler = env.handler_for(self.op);
            }
            return self.report(entry.handler.clone(), stats);
        }

        if entries.len() >= self.bound {
            drop(entries);
            self.megamorphic.store(true, Ordering::Release);
            log::trace!("mop site for {} went megamorphic", self.op.name());
            return self.report(env.handler_for(self.op), stats);
        }

        let handler = env.handler_for(self.op);
        entries.push(MopEntry {
            root_id,
            env_identity: identity,
            env_version: version,
            handler: handler.clone(),
        });
        self.report(handler, stats)
    }

    fn report(&self, handler: Option<Arc<Method>>, stats: &DispatchStats) -> Resolution {
        match handler {
            Some(handler) => {
                stats.record_mop_override();
                Resolution::Handler(handler)
            }
            None => Resolution::NoOverride,
        }
    }

    /// Drop all cached entries and leave the megamorphic state
    pub fn clear(&self) {
        self.entries.write().clear();
        self.megamorphic.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for MopSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MopSite")
            .field("op", &self.op)
            .field("entries", &self.entries.read().len())
            .field("megamorphic", &self.megamorphic.load(Ordering::Acquire))
            .finish()
    }
}
