//! # Listenable: a named, disposable event source.
//!
//! [`Listenable<A>`] keeps an ordered list of listeners `Fn(&A)`. Each
//! registration is bound to an explicit [`Scope`]; disposing that scope (or the
//! returned [`ListenerHandle`], or the listenable itself) unregisters it.
//!
//! ## Rules
//! - `emit` calls listeners synchronously, in registration order, and returns
//!   whether at least one listener was registered.
//! - A panicking listener is logged and skipped; later listeners still run.
//! - After `dispose`, registrations are ignored and `emit` is a no-op.
//! - With call-on-subscribe enabled, a new listener is invoked once with the
//!   "current" argument before `add_listener` returns.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use leafvisor::{Disposable, Listenable, Scope};
//!
//! let scope = Scope::new();
//! let changed = Listenable::<()>::new("leaf-changed", &scope);
//! let hits = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&hits);
//! let owner = scope.child();
//! changed.add_listener(&owner, move |_| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! assert!(changed.emit(&()));
//! owner.dispose();
//! assert!(!changed.emit(&()));
//! assert_eq!(hits.load(Ordering::SeqCst), 1);
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error};

use super::scope::{Disposable, Registration, Scope};

/// Process-unique event tags.
static EVENT_TAG: AtomicU64 = AtomicU64::new(1);

type Listener<A> = Arc<dyn Fn(&A) + Send + Sync + 'static>;
type Initial<A> = Box<dyn Fn() -> A + Send + Sync + 'static>;

/// Removal side of a registration, type-erased over the event argument.
trait Registry: Send + Sync {
    fn remove(&self, id: u64) -> bool;
    fn contains(&self, id: u64) -> bool;
}

/// Handle to one registration.
///
/// Dropping the handle does **not** unregister; the owning scope does.
/// Disposing the handle unregisters and also withdraws it from that scope.
#[derive(Clone)]
pub struct ListenerHandle {
    id: u64,
    owner: Weak<dyn Registry>,
    registration: Registration,
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl ListenerHandle {
    fn inert() -> Self {
        let owner: Weak<Inner<()>> = Weak::new();
        Self {
            id: 0,
            owner,
            registration: Registration::default(),
        }
    }

    /// Registration id, unique within its listenable.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// True while the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.owner.upgrade().is_some_and(|r| r.contains(self.id))
    }
}

impl Disposable for ListenerHandle {
    fn dispose(&self) {
        if let Some(registry) = self.owner.upgrade() {
            registry.remove(self.id);
        }
        self.registration.withdraw();
    }
}

struct Inner<A> {
    name: String,
    tag: u64,
    next_id: AtomicU64,
    disposed: AtomicBool,
    listeners: Mutex<Vec<(u64, Listener<A>)>>,
    initial: Option<Initial<A>>,
}

impl<A: 'static> Registry for Inner<A> {
    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        before != listeners.len()
    }

    fn contains(&self, id: u64) -> bool {
        self.listeners.lock().iter().any(|(lid, _)| *lid == id)
    }
}

/// A named event source with scoped listeners.
pub struct Listenable<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for Listenable<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Listenable<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listenable")
            .field("name", &self.inner.name)
            .field("tag", &self.inner.tag)
            .field("listeners", &self.inner.listeners.lock().len())
            .finish()
    }
}

impl<A> Listenable<A>
where
    A: Send + Sync + 'static,
{
    /// Creates a listenable disposed together with `scope`.
    pub fn new(name: impl Into<String>, scope: &Scope) -> Self {
        Self::build(name.into(), None, scope)
    }

    /// Creates a call-on-subscribe listenable: every new listener is invoked
    /// once with `initial()` when it is added.
    pub fn with_initial<F>(name: impl Into<String>, scope: &Scope, initial: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::build(name.into(), Some(Box::new(initial)), scope)
    }

    fn build(name: String, initial: Option<Initial<A>>, scope: &Scope) -> Self {
        let inner = Arc::new(Inner {
            name,
            tag: EVENT_TAG.fetch_add(1, Ordering::Relaxed),
            next_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            initial,
        });
        let this = Self { inner };
        scope.adopt(this.downgrade());
        this
    }

    fn downgrade(&self) -> WeakListenable<A> {
        WeakListenable(Arc::downgrade(&self.inner))
    }

    /// Event name (logs).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Process-unique event tag.
    pub fn tag(&self) -> u64 {
        self.inner.tag
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// True once disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Registers `listener` until `scope` is disposed.
    pub fn add_listener<F>(&self, scope: &Scope, listener: F) -> ListenerHandle
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        if self.is_disposed() {
            debug!(event = %self.inner.name, "listener added to disposed listenable, ignored");
            return ListenerHandle::inert();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener<A> = Arc::new(listener);
        self.inner
            .listeners
            .lock()
            .push((id, Arc::clone(&listener)));

        let weak: Weak<Inner<A>> = Arc::downgrade(&self.inner);
        let owner: Weak<dyn Registry> = weak;
        let on_dispose = Weak::clone(&owner);
        let registration = scope.register(move || {
            if let Some(registry) = on_dispose.upgrade() {
                registry.remove(id);
            }
        });
        let handle = ListenerHandle {
            id,
            owner,
            registration,
        };

        if let Some(initial) = &self.inner.initial {
            let args = initial();
            invoke_isolated(&self.inner.name, || listener(&args));
        }
        handle
    }

    /// Calls every listener with `args`; true if at least one was registered.
    pub fn emit(&self, args: &A) -> bool {
        if self.is_disposed() {
            return false;
        }
        let snapshot: Vec<Listener<A>> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in &snapshot {
            invoke_isolated(&self.inner.name, || listener(args));
        }
        !snapshot.is_empty()
    }
}

impl<A: Send + Sync + 'static> Disposable for Listenable<A> {
    fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        let dropped = std::mem::take(&mut *self.inner.listeners.lock());
        drop(dropped);
    }
}

/// Scope registration that does not keep the listenable alive.
struct WeakListenable<A>(Weak<Inner<A>>);

impl<A: Send + Sync + 'static> Disposable for WeakListenable<A> {
    fn dispose(&self) {
        if let Some(inner) = self.0.upgrade() {
            Listenable { inner }.dispose();
        }
    }
}

/// Runs one listener call, logging instead of unwinding on panic.
pub(crate) fn invoke_isolated<F: FnOnce()>(event: &str, call: F) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(call)) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(event = %event, reason = %reason, "listener panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_emit_in_registration_order() {
        let scope = Scope::new();
        let ev = Listenable::<u32>::new("ordered", &scope);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            ev.add_listener(&scope, move |v| seen.lock().push(format!("{tag}{v}")));
        }

        assert!(ev.emit(&1));
        assert_eq!(*seen.lock(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_emit_without_listeners_returns_false() {
        let scope = Scope::new();
        let ev = Listenable::<()>::new("empty", &scope);
        assert!(!ev.emit(&()));
    }

    #[test]
    fn test_panicking_listener_does_not_stop_the_pass() {
        let scope = Scope::new();
        let ev = Listenable::<()>::new("panicky", &scope);
        let hits = Arc::new(AtomicUsize::new(0));

        ev.add_listener(&scope, |_| panic!("listener failure"));
        let counter = Arc::clone(&hits);
        ev.add_listener(&scope, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(ev.emit(&()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scope_disposal_removes_only_its_listeners() {
        let owner = Scope::new();
        let ev = Listenable::<()>::new("scoped", &owner);
        let a = owner.child();
        let b = owner.child();

        let ha = ev.add_listener(&a, |_| {});
        let hb = ev.add_listener(&b, |_| {});
        assert_eq!(ev.listener_count(), 2);

        a.dispose();
        assert!(!ha.is_active());
        assert!(hb.is_active());
        assert_eq!(ev.listener_count(), 1);
    }

    #[test]
    fn test_handle_disposal_releases_the_scope_entry() {
        let owner = Scope::new();
        let ev = Listenable::<()>::new("churn", &owner);
        let listeners = Scope::new();

        for _ in 0..100 {
            ev.add_listener(&listeners, |_| {}).dispose();
        }
        assert_eq!(ev.listener_count(), 0);
        assert_eq!(listeners.pending_actions(), 0);

        let kept = ev.add_listener(&listeners, |_| {});
        assert_eq!(listeners.pending_actions(), 1);
        listeners.dispose();
        assert!(!kept.is_active());
    }

    #[test]
    fn test_disposed_listenable_ignores_everything() {
        let scope = Scope::new();
        let ev = Listenable::<()>::new("gone", &scope);
        let other = Scope::new();
        ev.add_listener(&other, |_| {});

        scope.dispose();
        assert!(ev.is_disposed());
        assert!(!ev.emit(&()));

        let handle = ev.add_listener(&other, |_| {});
        assert!(!handle.is_active());
        assert_eq!(ev.listener_count(), 0);
    }

    #[test]
    fn test_call_on_subscribe() {
        let scope = Scope::new();
        let ev = Listenable::with_initial("notifying", &scope, || 9_u8);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        ev.add_listener(&scope, move |v| log.lock().push(*v));
        assert_eq!(*seen.lock(), vec![9]);

        ev.emit(&3);
        assert_eq!(*seen.lock(), vec![9, 3]);
    }

    #[test]
    fn test_tags_are_unique() {
        let scope = Scope::new();
        let a = Listenable::<()>::new("same", &scope);
        let b = Listenable::<()>::new("same", &scope);
        assert_ne!(a.tag(), b.tag());
    }
}
