//! Invalidatable assumptions and the global reflection switch
//!
//! Specialized dispatch nodes embed the token that was valid when they
//! resolved. Flipping the switch invalidates that token and mints a fresh
//! one for the new state, so every dependent node lazily re-resolves from
//! `Uninitialized` the next time it executes. While reflection stays off,
//! the switch costs one sequentially-consistent load per dispatch decision.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// An invalidatable token.
///
/// Valid when minted (unless created invalid), invalidated exactly once,
/// never revalidated.
pub struct Assumption {
    label: &'static str,
    valid: AtomicBool,
}

impl Assumption {
    /// Mint a fresh, valid token
    pub fn fresh(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            valid: AtomicBool::new(true),
        })
    }

    /// Create an already-invalid token (the initial state of the side of the
    /// switch that is not current)
    pub fn invalid(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            valid: AtomicBool::new(false),
        })
    }

    /// Whether the token is still valid
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Invalidate the token. Returns true when this call performed the
    /// invalidation (idempotent: a second call is a no-op).
    pub fn invalidate(&self) -> bool {
        !self.valid.swap(false, Ordering::SeqCst)
    }

    /// The token's label, for diagnostics
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl std::fmt::Debug for Assumption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assumption")
            .field("label", &self.label)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// The process-wide reflection activation switch.
///
/// Exactly one of the two tokens is valid at any instant: the
/// reflection-inactive token while the switch is off, the reflection-active
/// token while it is on. Flips serialize on an internal lock and publish
/// with sequentially-consistent ordering, so no thread can keep
/// specializing under a stale token after a flip completes.
pub struct ReflectionSwitch {
    active: AtomicBool,
    activated: RwLock<Arc<Assumption>>,
    deactivated: RwLock<Arc<Assumption>>,
    flip_lock: Mutex<()>,
}

impl ReflectionSwitch {
    /// A switch in its startup state: deactivated, inactive token valid
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            activated: RwLock::new(Assumption::invalid("reflection-active")),
            deactivated: RwLock::new(Assumption::fresh("reflection-inactive")),
            flip_lock: Mutex::new(()),
        }
    }

    /// Whether reflection is currently active, read by value
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// The token valid for the current state. Nodes specialize under this
    /// token and must re-resolve once it is invalidated.
    pub fn current_token(&self) -> Arc<Assumption> {
        if self.is_active() {
            self.activated.read().clone()
        } else {
            self.deactivated.read().clone()
        }
    }

    /// Activate reflection. Returns true when the switch actually flipped;
    /// activating an already-active switch is a no-op.
    pub fn activate(&self) -> bool {
        let _guard = self.flip_lock.lock();
        if self.active.load(Ordering::SeqCst) {
            return false;
        }
        self.deactivated.read().invalidate();
        *self.activated.write() = Assumption::fresh("reflection-active");
        self.active.store(true, Ordering::SeqCst);
        log::debug!("reflection activated");
        true
    }

    /// Deactivate reflection. Returns true when the switch actually flipped;
    /// deactivating an already-inactive switch is a no-op.
    pub fn deactivate(&self) -> bool {
        let _guard = self.flip_lock.lock();
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        self.activated.read().invalidate();
        *self.deactivated.write() = Assumption::fresh("reflection-inactive");
        self.active.store(false, Ordering::SeqCst);
        log::debug!("reflection deactivated");
        true
    }
}

impl Default for ReflectionSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReflectionSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectionSwitch")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_deactivated_with_valid_token() {
        let switch = ReflectionSwitch::new();
        assert!(!switch.is_active());
        let token = switch.current_token();
        assert!(token.is_valid());
        assert_eq!(token.label(), "reflection-inactive");
    }

    #[test]
    fn test_activation_invalidates_previous_token() {
        let switch = ReflectionSwitch::new();
        let inactive_token = switch.current_token();

        assert!(switch.activate());
        assert!(switch.is_active());
        assert!(!inactive_token.is_valid());

        let active_token = switch.current_token();
        assert!(active_token.is_valid());
        assert_eq!(active_token.label(), "reflection-active");
    }

    #[test]
    fn test_exactly_one_token_valid_across_flips() {
        let switch = ReflectionSwitch::new();

        switch.activate();
        let active = switch.current_token();
        switch.deactivate();
        let inactive = switch.current_token();

        assert!(!active.is_valid());
        assert!(inactive.is_valid());
    }

    #[test]
    fn test_deactivate_is_idempotent() {
        let switch = ReflectionSwitch::new();
        let token = switch.current_token();

        assert!(!switch.deactivate());
        assert!(!switch.deactivate());
        // No new token was minted: observers depending on it are untouched
        assert!(Arc::ptr_eq(&token, &switch.current_token()));
        assert!(token.is_valid());
    }

    #[test]
    fn test_activate_is_idempotent() {
        let switch = ReflectionSwitch::new();
        assert!(switch.activate());
        let token = switch.current_token();
        assert!(!switch.activate());
        assert!(Arc::ptr_eq(&token, &switch.current_token()));
    }

    #[test]
    fn test_reactivation_mints_fresh_token() {
        let switch = ReflectionSwitch::new();
        let first_inactive = switch.current_token();

        switch.activate();
        switch.deactivate();
        let second_inactive = switch.current_token();

        assert!(!Arc::ptr_eq(&first_inactive, &second_inactive));
        assert!(!first_inactive.is_valid());
        assert!(second_inactive.is_valid());
    }

    #[test]
    fn test_assumption_invalidate_reports_first_call() {
        let token = Assumption::fresh("t");
        assert!(token.invalidate());
        assert!(!token.invalidate());
    }

    #[test]
    fn test_concurrent_flips_settle() {
        use std::thread;

        let switch = Arc::new(ReflectionSwitch::new());
        let mut handles = vec![];
        for i in 0..8 {
            let s = Arc::clone(&switch);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    if i % 2 == 0 {
                        s.activate();
                    } else {
                        s.deactivate();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Whatever the final state, its token is valid and the other is not
        let token = switch.current_token();
        assert!(token.is_valid());
    }
}
