//! # ModelElement: a reactive cell with an asynchronously resolved value.
//!
//! A [`ModelElement<V>`] holds one "current value" as a [`DelayedPromise<V>`]
//! and notifies listeners with `(new, old)` when a settled value differs from
//! the previously settled one.
//!
//! ## State machine
//! ```text
//! Uninitialized ──set──► Resolving ──settle──► Settled ──set──► Resolving ──► ...
//!   (get() pending)                             (value known)
//! ```
//! Disposal clears listeners, never the value.
//!
//! ## Generations
//! Every `set*` call takes the next generation number and becomes "current"
//! immediately. When its value settles:
//! - a failure is logged and reported as `false` (the graph keeps running);
//! - a generation older than the last settled one is stale and dropped;
//! - the first settled value initialises the element without an event;
//! - otherwise the value is compared (`PartialEq`) with the last settled value
//!   and `(new, old)` is emitted when they differ.
//!
//! ## Call-on-subscribe
//! A new listener receives `(current, current)` once: immediately when a value
//! is already settled, otherwise right after the first value settles.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use leafvisor::{ModelElement, Scope};
//!
//! let scope = Scope::new();
//! let profile = ModelElement::<String>::new("profile", &scope);
//! profile.set("dev".to_string());
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let log = Arc::clone(&seen);
//! profile.add_listener(&scope, move |new, old| log.lock().push((new.clone(), old.clone())));
//!
//! assert!(!profile.set("dev".to_string()));
//! assert!(profile.set("release".to_string()));
//! assert_eq!(
//!     *seen.lock(),
//!     vec![
//!         ("dev".to_string(), "dev".to_string()),
//!         ("release".to_string(), "dev".to_string()),
//!     ]
//! );
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::listenable::{ListenerHandle, Listenable, invoke_isolated};
use super::scope::{Disposable, Registration, Scope};
use crate::error::Error;
use crate::promise::DelayedPromise;

/// Bounds required of a model value.
pub trait ModelValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T> ModelValue for T where T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

type ModelListener<V> = Arc<dyn Fn(&V, &V) + Send + Sync + 'static>;

/// Listener waiting for the first value, withdrawn from its scope once served.
struct Awaiting<V> {
    handle: ListenerHandle,
    listener: ModelListener<V>,
    registration: Registration,
}

struct State<V> {
    current: DelayedPromise<V>,
    initial: DelayedPromise<V>,
    last: Option<V>,
    generation: u64,
    settled_generation: u64,
    awaiting_initial: Vec<Awaiting<V>>,
}

struct Inner<V> {
    name: String,
    changes: Listenable<(V, V)>,
    state: Mutex<State<V>>,
}

/// A named, listenable value.
pub struct ModelElement<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for ModelElement<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for ModelElement<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("ModelElement")
            .field("name", &self.inner.name)
            .field("generation", &st.generation)
            .field("value", &st.last)
            .finish()
    }
}

impl<V: ModelValue> ModelElement<V> {
    /// Creates an uninitialized element whose listeners die with `scope`.
    pub fn new(name: impl Into<String>, scope: &Scope) -> Self {
        let name = name.into();
        let initial = DelayedPromise::new();
        let inner = Arc::new(Inner {
            changes: Listenable::new(name.clone(), scope),
            name,
            state: Mutex::new(State {
                current: initial.clone(),
                initial,
                last: None,
                generation: 0,
                settled_generation: 0,
                awaiting_initial: Vec::new(),
            }),
        });
        let this = Self { inner };
        let weak = Arc::downgrade(&this.inner);
        scope.on_dispose(move || {
            if let Some(inner) = weak.upgrade() {
                let dropped = inner.take_awaiting(|_| true);
                drop(dropped);
            }
        });
        this
    }

    /// Element name (logs, errors).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current value promise; pending until the current `set*` settles.
    pub fn get(&self) -> DelayedPromise<V> {
        self.inner.state.lock().current.clone()
    }

    /// Last settled value, without waiting.
    pub fn value(&self) -> Option<V> {
        self.inner.state.lock().last.clone()
    }

    /// Generation of the most recent `set*` call (`0` before the first one).
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Sets an immediate value; returns true if a listener saw a change.
    pub fn set(&self, value: V) -> bool {
        self.set_result(Ok(value))
    }

    /// Sets an immediate outcome; a failure is logged and reported as `false`.
    pub fn set_result(&self, outcome: Result<V, Error>) -> bool {
        let generation = self.begin(settled_promise(outcome.clone()));
        self.inner.settle(generation, outcome)
    }

    /// Sets a value produced later by `producer`.
    ///
    /// The element is "current" on this call immediately; the returned promise
    /// resolves to true if a listener saw a change once the value settled.
    pub fn set_future<Fut>(&self, producer: Fut) -> DelayedPromise<bool>
    where
        Fut: Future<Output = Result<V, Error>> + Send + 'static,
    {
        let value = DelayedPromise::new();
        let generation = self.begin(value.clone());
        let done = DelayedPromise::new();

        let inner = Arc::clone(&self.inner);
        let notify = done.clone();
        tokio::spawn(async move {
            let outcome = producer.await;
            value.settle(outcome.clone());
            notify.resolve(inner.settle(generation, outcome));
        });
        done
    }

    fn begin(&self, current: DelayedPromise<V>) -> u64 {
        let mut st = self.inner.state.lock();
        st.generation += 1;
        st.current = current;
        st.generation
    }

    /// Registers `listener` until `scope` is disposed, with call-on-subscribe.
    pub fn add_listener<F>(&self, scope: &Scope, listener: F) -> ListenerHandle
    where
        F: Fn(&V, &V) + Send + Sync + 'static,
    {
        let listener: ModelListener<V> = Arc::new(listener);
        let on_change = Arc::clone(&listener);
        let handle = self
            .inner
            .changes
            .add_listener(scope, move |(new, old)| on_change(new, old));

        let current = self.inner.state.lock().last.clone();
        match current {
            Some(value) => invoke_isolated(&self.inner.name, || listener(&value, &value)),
            None => self.await_initial(scope, handle.clone(), listener),
        }
        handle
    }

    /// Parks `listener` until the first value; disposing `scope` unparks it.
    fn await_initial(&self, scope: &Scope, handle: ListenerHandle, listener: ModelListener<V>) {
        let id = handle.id();
        let weak = Arc::downgrade(&self.inner);
        let registration = scope.register(move || {
            if let Some(inner) = weak.upgrade() {
                let removed = inner.take_awaiting(|entry| entry.handle.id() == id);
                drop(removed);
            }
        });

        let mut st = self.inner.state.lock();
        if st.last.is_some() || scope.is_disposed() {
            // Initialised in between, or the scope is already gone.
            drop(st);
            registration.withdraw();
            if let Some(value) = self.value() {
                if handle.is_active() {
                    invoke_isolated(&self.inner.name, || listener(&value, &value));
                }
            }
            return;
        }
        st.awaiting_initial.push(Awaiting {
            handle,
            listener,
            registration,
        });
    }

    /// Derives a child element re-computed by `converter` on every change.
    ///
    /// Conversions run one at a time, in change order, on a background task
    /// that ends when `scope` is disposed.
    pub fn sub_model<D, F, Fut>(&self, name: impl Into<String>, scope: &Scope, converter: F) -> ModelElement<D>
    where
        D: ModelValue,
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<D, Error>> + Send + 'static,
    {
        let child = ModelElement::new(name, scope);
        let (tx, mut rx) = mpsc::unbounded_channel::<V>();
        self.add_listener(scope, move |new, _old| {
            let _ = tx.send(new.clone());
        });

        let target = child.clone();
        tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                let outcome = converter(value).await;
                target.set_result(outcome);
            }
            debug!(model = %target.name(), "derivation stopped");
        });
        child
    }

    /// Synchronous variant of [`sub_model`](Self::sub_model).
    pub fn derive<D, F>(&self, name: impl Into<String>, scope: &Scope, converter: F) -> ModelElement<D>
    where
        D: ModelValue,
        F: Fn(&V) -> D + Send + Sync + 'static,
    {
        let child = ModelElement::new(name, scope);
        let target = child.clone();
        self.add_listener(scope, move |new, _old| {
            target.set(converter(new));
        });
        child
    }

    /// Unregisters every listener; the value is kept.
    pub fn dispose(&self) {
        self.inner.changes.dispose();
        let dropped = self.inner.take_awaiting(|_| true);
        for entry in &dropped {
            entry.registration.withdraw();
        }
    }
}

impl<T: ModelValue> ModelElement<Option<T>> {
    /// Like [`get`](Self::get) but fails with [`Error::MissingValue`] on `None`.
    pub async fn get_mandatory(&self) -> Result<T, Error> {
        self.get().await?.ok_or_else(|| Error::MissingValue {
            model: self.inner.name.clone(),
        })
    }
}

impl<V: ModelValue> Inner<V> {
    /// Removes parked listeners matching `pred`; the caller drops them unlocked.
    fn take_awaiting<P>(&self, pred: P) -> Vec<Awaiting<V>>
    where
        P: Fn(&Awaiting<V>) -> bool,
    {
        let mut st = self.state.lock();
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut st.awaiting_initial)
            .into_iter()
            .partition(|entry| pred(entry));
        st.awaiting_initial = kept;
        taken
    }

    fn settle(&self, generation: u64, outcome: Result<V, Error>) -> bool {
        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                warn!(model = %self.name, generation, error = %e, "model value could not be resolved");
                // Older values landing after a newer failure stay dropped,
                // keeping `value()` in line with the rejected `get()`.
                let mut st = self.state.lock();
                st.settled_generation = st.settled_generation.max(generation);
                return false;
            }
        };

        let (previous, awaiting) = {
            let mut st = self.state.lock();
            if generation < st.settled_generation {
                debug!(model = %self.name, generation, "superseded value dropped");
                return false;
            }
            st.settled_generation = generation;
            st.initial.resolve(value.clone());
            let previous = st.last.replace(value.clone());
            let awaiting = if previous.is_none() {
                std::mem::take(&mut st.awaiting_initial)
            } else {
                Vec::new()
            };
            (previous, awaiting)
        };

        match previous {
            None => {
                info!(model = %self.name, value = ?value, "model initialised");
                for entry in awaiting {
                    entry.registration.withdraw();
                    if entry.handle.is_active() {
                        invoke_isolated(&self.name, || (entry.listener)(&value, &value));
                    }
                }
                false
            }
            Some(old) if old == value => false,
            Some(old) => {
                let fired = self.changes.emit(&(value.clone(), old.clone()));
                if fired {
                    debug!(model = %self.name, from = ?old, to = ?value, "model value changed");
                }
                fired
            }
        }
    }
}

impl<V: ModelValue> Disposable for ModelElement<V> {
    fn dispose(&self) {
        ModelElement::dispose(self);
    }
}

fn settled_promise<V: ModelValue>(outcome: Result<V, Error>) -> DelayedPromise<V> {
    let p = DelayedPromise::new();
    p.settle(outcome);
    p
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};

    use super::*;

    fn recorder<V: ModelValue>(model: &ModelElement<V>, scope: &Scope) -> Arc<Mutex<Vec<(V, V)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        model.add_listener(scope, move |new, old| log.lock().push((new.clone(), old.clone())));
        seen
    }

    #[test]
    fn test_first_set_initialises_without_event() {
        let scope = Scope::new();
        let m = ModelElement::<u32>::new("count", &scope);
        let seen = recorder(&m, &scope);

        assert!(!m.set(1));
        assert_eq!(*seen.lock(), vec![(1, 1)]);
        assert_eq!(m.value(), Some(1));
    }

    #[test]
    fn test_structurally_equal_values_do_not_notify() {
        let scope = Scope::new();
        let m = ModelElement::<Value>::new("packages", &scope);
        m.set(json!({"a": [1, 2], "b": {"c": true}}));
        let seen = recorder(&m, &scope);
        seen.lock().clear();

        assert!(!m.set(json!({"b": {"c": true}, "a": [1, 2]})));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_change_notifies_every_listener_once() {
        let scope = Scope::new();
        let m = ModelElement::<String>::new("profile", &scope);
        m.set("a".into());
        let first = recorder(&m, &scope);
        let second = recorder(&m, &scope);

        assert!(m.set("b".into()));
        let expected = vec![("a".to_string(), "a".to_string()), ("b".to_string(), "a".to_string())];
        assert_eq!(*first.lock(), expected);
        assert_eq!(*second.lock(), expected);
    }

    #[test]
    fn test_call_on_subscribe_uses_current_value() {
        let scope = Scope::new();
        let m = ModelElement::<u8>::new("ready", &scope);
        m.set(4);
        m.set(5);
        let seen = recorder(&m, &scope);
        assert_eq!(*seen.lock(), vec![(5, 5)]);
    }

    #[test]
    fn test_failed_producer_does_not_update() {
        let scope = Scope::new();
        let m = ModelElement::<u8>::new("env", &scope);
        m.set(1);
        let seen = recorder(&m, &scope);

        assert!(!m.set_result(Err(Error::failed("helper crashed"))));
        assert_eq!(m.value(), Some(1));
        assert_eq!(seen.lock().len(), 1);
        assert!(matches!(m.get().peek(), Some(Err(Error::Failed { .. }))));
    }

    #[test]
    fn test_disposed_scope_stops_notifications() {
        let owner = Scope::new();
        let m = ModelElement::<u8>::new("tags", &owner);
        m.set(0);
        let listener_scope = owner.child();
        let seen = recorder(&m, &listener_scope);

        listener_scope.dispose();
        assert!(!m.set(1));
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_get_waits_for_first_value() {
        let scope = Scope::new();
        let m = ModelElement::<u8>::new("late", &scope);
        let pending = m.get();
        assert!(!pending.is_settled());

        m.set(3);
        assert_eq!(pending.await, Ok(3));
    }

    #[tokio::test]
    async fn test_get_mandatory_rejects_none() {
        let scope = Scope::new();
        let m = ModelElement::<Option<u8>>::new("maybe", &scope);
        m.set(None);
        assert_eq!(
            m.get_mandatory().await,
            Err(Error::MissingValue {
                model: "maybe".into()
            })
        );

        m.set(Some(2));
        assert_eq!(m.get_mandatory().await, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_set_does_not_refire() {
        let scope = Scope::new();
        let m = ModelElement::<&'static str>::new("racing", &scope);
        m.set("initial");
        let seen = recorder(&m, &scope);

        let slow = m.set_future(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok("slow")
        });
        let fast = m.set_future(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok("fast")
        });

        assert_eq!(fast.await, Ok(true));
        assert_eq!(slow.await, Ok(false));
        assert_eq!(m.value(), Some("fast"));
        assert_eq!(m.get().await, Ok("fast"));
        assert_eq!(*seen.lock(), vec![("initial", "initial"), ("fast", "initial")]);
    }

    #[tokio::test]
    async fn test_listener_added_before_initialisation() {
        let scope = Scope::new();
        let m = ModelElement::<u8>::new("pending", &scope);
        let seen = recorder(&m, &scope);
        assert!(seen.lock().is_empty());

        assert_eq!(m.set_future(async { Ok(7) }).await, Ok(false));
        assert_eq!(*seen.lock(), vec![(7, 7)]);
    }

    #[tokio::test]
    async fn test_sub_model_follows_parent() {
        let scope = Scope::new();
        let parent = ModelElement::<u32>::new("parent", &scope);
        let child = parent.sub_model("double", &scope, |v| async move { Ok::<_, Error>(v * 2) });

        parent.set(2);
        assert_eq!(child.get().await, Ok(4));

        let next = child.clone();
        let changed = tokio::spawn(async move {
            loop {
                if next.value() == Some(10) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        });
        parent.set(5);
        changed.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_failure_drops_older_success() {
        let scope = Scope::new();
        let m = ModelElement::<&'static str>::new("racing", &scope);
        m.set("initial");

        let slow = m.set_future(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok("slow")
        });
        let failing = m.set_future(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(Error::failed("helper crashed"))
        });

        assert_eq!(failing.await, Ok(false));
        assert_eq!(slow.await, Ok(false));
        assert_eq!(m.value(), Some("initial"));
        assert!(m.get().await.is_err());
    }

    #[tokio::test]
    async fn test_sub_model_released_with_its_scope() {
        struct Tracked(Arc<Mutex<bool>>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                *self.0.lock() = true;
            }
        }

        let owner = Scope::new();
        let parent = ModelElement::<u8>::new("parent", &owner);
        let dropped = Arc::new(Mutex::new(false));
        let tracked = Tracked(Arc::clone(&dropped));

        let sub = owner.child();
        let _child = parent.sub_model("child", &sub, move |v| {
            let _keep = &tracked;
            async move { Ok::<_, Error>(v) }
        });
        sub.dispose();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(*dropped.lock());
        assert_eq!(owner.pending_actions(), 2);
    }

    #[test]
    fn test_derive_is_synchronous() {
        let scope = Scope::new();
        let parent = ModelElement::<Vec<u8>>::new("list", &scope);
        let len = parent.derive("len", &scope, |v| v.len());

        parent.set(vec![1, 2, 3]);
        assert_eq!(len.value(), Some(3));
        parent.set(vec![]);
        assert_eq!(len.value(), Some(0));
    }
}
