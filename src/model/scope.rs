//! # Disposal scopes.
//!
//! A [`Scope`] collects cleanup actions and runs them once, in registration
//! order, when it is disposed. Every listener registration takes a scope
//! explicitly; there is no implicit owner lookup.
//!
//! ## Rules
//! - `dispose()` is idempotent; actions run exactly once.
//! - An action registered on an already disposed scope runs immediately.
//! - Actions run outside the internal lock, so an action may register on or
//!   dispose other scopes (including children) freely.
//! - A [`Registration`] withdraws its action without running it, so short-lived
//!   registrations do not pile up on long-lived scopes.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Action = Box<dyn FnOnce() + Send + 'static>;

/// Anything that can release its resources on request.
pub trait Disposable: Send + Sync {
    /// Releases resources. Must be idempotent.
    fn dispose(&self);
}

#[derive(Default)]
struct ScopeState {
    disposed: bool,
    next_key: u64,
    actions: Vec<(u64, Action)>,
}

/// One pending action of a scope.
#[derive(Clone, Default)]
pub(crate) struct Registration {
    state: Weak<Mutex<ScopeState>>,
    key: u64,
}

impl Registration {
    /// Removes the action without running it; no-op once the scope is disposed.
    pub(crate) fn withdraw(&self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let removed = {
            let mut st = state.lock();
            st.actions
                .iter()
                .position(|(key, _)| *key == self.key)
                .map(|at| st.actions.remove(at))
        };
        drop(removed);
    }
}

/// Ownership scope for listeners, models and background tasks.
#[derive(Clone, Default)]
pub struct Scope {
    state: Arc<Mutex<ScopeState>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Scope")
            .field("disposed", &st.disposed)
            .field("actions", &st.actions.len())
            .finish()
    }
}

impl Scope {
    /// Creates an empty, live scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `action` to run on dispose.
    pub fn on_dispose<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(action);
    }

    /// Same as [`on_dispose`](Self::on_dispose), returning a handle that can
    /// withdraw the action.
    pub(crate) fn register<F>(&self, action: F) -> Registration
    where
        F: FnOnce() + Send + 'static,
    {
        let mut st = self.state.lock();
        if st.disposed {
            drop(st);
            action();
            return Registration::default();
        }
        st.next_key += 1;
        let key = st.next_key;
        st.actions.push((key, Box::new(action)));
        Registration {
            state: Arc::downgrade(&self.state),
            key,
        }
    }

    /// Number of actions still waiting for dispose.
    pub fn pending_actions(&self) -> usize {
        self.state.lock().actions.len()
    }

    /// Ties a disposable to this scope.
    pub fn adopt<D>(&self, disposable: D)
    where
        D: Disposable + 'static,
    {
        self.on_dispose(move || disposable.dispose());
    }

    /// Creates a scope disposed together with this one (or earlier, on its own).
    #[must_use]
    pub fn child(&self) -> Scope {
        let child = Scope::new();
        let linked = child.clone();
        let registration = self.register(move || linked.dispose());
        child.on_dispose(move || registration.withdraw());
        child
    }

    /// True once `dispose()` ran.
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }
}

impl Disposable for Scope {
    fn dispose(&self) {
        let actions = {
            let mut st = self.state.lock();
            if st.disposed {
                return;
            }
            st.disposed = true;
            std::mem::take(&mut st.actions)
        };
        for (_, action) in actions {
            action();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_run_once_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let scope = Scope::new();
        for i in 0..3 {
            let log = Arc::clone(&log);
            scope.on_dispose(move || log.lock().push(i));
        }

        scope.dispose();
        scope.dispose();
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert!(scope.is_disposed());
    }

    #[test]
    fn test_late_registration_runs_immediately() {
        let scope = Scope::new();
        scope.dispose();

        let hit = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&hit);
        scope.on_dispose(move || *flag.lock() = true);
        assert!(*hit.lock());
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = Scope::new();
        let child = parent.child();
        assert!(!child.is_disposed());

        parent.dispose();
        assert!(child.is_disposed());
    }

    #[test]
    fn test_withdrawn_action_never_runs() {
        let scope = Scope::new();
        let hit = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&hit);
        let registration = scope.register(move || *flag.lock() = true);
        scope.on_dispose(|| {});
        assert_eq!(scope.pending_actions(), 2);

        registration.withdraw();
        registration.withdraw();
        assert_eq!(scope.pending_actions(), 1);
        scope.dispose();
        assert!(!*hit.lock());
    }

    #[test]
    fn test_child_can_go_first() {
        let parent = Scope::new();
        let child = parent.child();
        child.dispose();
        assert!(!parent.is_disposed());
        assert_eq!(parent.pending_actions(), 0);
        parent.dispose();
    }
}
