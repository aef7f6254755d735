use std::sync::Arc;
use std::time::Duration;

use crate::model::{Listenable, Scope};

use super::debounce::Debouncer;

/// Change notifications for toolchain files.
///
/// Both listenables call new listeners once on subscribe, so a freshly bound
/// consumer loads its state without waiting for a file change.
#[derive(Clone, Debug)]
pub struct Triggers {
    leaf_changed: Listenable<()>,
    packages_changed: Listenable<()>,
    leaf_debounce: Arc<Debouncer>,
    packages_debounce: Arc<Debouncer>,
}

impl Triggers {
    /// Creates triggers whose notifications are debounced by `delay`.
    pub fn new(delay: Duration, scope: &Scope) -> Self {
        Self {
            leaf_changed: Listenable::with_initial("leaf_changed", scope, || ()),
            packages_changed: Listenable::with_initial("packages_changed", scope, || ()),
            leaf_debounce: Arc::new(Debouncer::new(delay)),
            packages_debounce: Arc::new(Debouncer::new(delay)),
        }
    }

    /// Workspace, profile or configuration files changed.
    pub fn leaf_changed(&self) -> &Listenable<()> {
        &self.leaf_changed
    }

    /// Remote package cache changed.
    pub fn packages_changed(&self) -> &Listenable<()> {
        &self.packages_changed
    }

    /// Reports a change of workspace, profile or configuration files.
    pub fn notify_files_changed(&self) {
        let event = self.leaf_changed.clone();
        self.leaf_debounce.debounce(move || {
            event.emit(&());
        });
    }

    /// Reports a change of the remote package cache.
    pub fn notify_packages_changed(&self) {
        let event = self.packages_changed.clone();
        self.packages_debounce.debounce(move || {
            event.emit(&());
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::model::Disposable;

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_fires_once_then_debounced() {
        let scope = Scope::new();
        let triggers = Triggers::new(Duration::from_millis(100), &scope);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        triggers.leaf_changed().add_listener(&scope, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        triggers.notify_files_changed();
        triggers.notify_files_changed();
        triggers.notify_files_changed();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_are_independent() {
        let scope = Scope::new();
        let triggers = Triggers::new(Duration::from_millis(50), &scope);
        let leaf = Arc::new(AtomicUsize::new(0));
        let packages = Arc::new(AtomicUsize::new(0));
        let l = Arc::clone(&leaf);
        let p = Arc::clone(&packages);
        triggers.leaf_changed().add_listener(&scope, move |_| {
            l.fetch_add(1, Ordering::SeqCst);
        });
        triggers.packages_changed().add_listener(&scope, move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        });

        triggers.notify_packages_changed();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(leaf.load(Ordering::SeqCst), 1);
        assert_eq!(packages.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disposed_scope_silences_listeners() {
        let scope = Scope::new();
        let triggers = Triggers::new(Duration::from_millis(10), &scope);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        triggers.leaf_changed().add_listener(&scope, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        scope.dispose();
        triggers.notify_files_changed();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
