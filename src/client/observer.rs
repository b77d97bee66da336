use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::client::scheduler::{Subscription, SyncHandle, UnitState};

/// What a sync observer drives.
pub trait SyncView: Send + Sync {
    fn show_loading(&self);
    fn refresh(&self);
    fn show_sync_failed(&self);
}

struct Observation {
    handle: SyncHandle,
    task: JoinHandle<()>,
}

/// Translates a sync unit's states into view updates.
///
/// Observes one handle at a time. Attaching a different handle replaces the
/// previous observation; stopping or dropping the observer unsubscribes.
pub struct SyncResultObserver {
    view: Arc<dyn SyncView>,
    current: Mutex<Option<Observation>>,
}

impl SyncResultObserver {
    pub fn new(view: Arc<dyn SyncView>) -> Self {
        Self {
            view,
            current: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Observation>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Observe the unit behind `subscription`. Returns false if that unit was
    /// already being observed; the extra subscription is dropped.
    pub fn attach(&self, subscription: Subscription) -> bool {
        let handle = subscription.handle();
        let mut current = self.lock();
        if current.as_ref().is_some_and(|o| o.handle == handle) {
            return false;
        }
        if let Some(previous) = current.take() {
            previous.task.abort();
        }

        let task = tokio::spawn(observe(subscription, self.view.clone()));
        *current = Some(Observation { handle, task });
        true
    }

    pub fn observed(&self) -> Option<SyncHandle> {
        self.lock().as_ref().map(|o| o.handle)
    }

    pub fn stop(&self) {
        if let Some(observation) = self.lock().take() {
            observation.task.abort();
        }
    }
}

impl Drop for SyncResultObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn observe(mut subscription: Subscription, view: Arc<dyn SyncView>) {
    let handle = subscription.handle();
    let mut loading = false;

    while let Some(state) = subscription.next().await {
        tracing::debug!(handle = %handle, state = ?state, "Sync state observed");
        match state {
            UnitState::Enqueued | UnitState::Running => {
                if !loading {
                    view.show_loading();
                    loading = true;
                }
            }
            UnitState::Succeeded => {
                view.refresh();
                return;
            }
            UnitState::Failed | UnitState::Cancelled => {
                view.show_sync_failed();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::scheduler::{
        BackgroundScheduler, Constraints, NetworkMonitor, SyncWork, TokioScheduler, UnitRequest, WorkResult,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingView {
        loading: AtomicUsize,
        refreshed: AtomicUsize,
        failed: AtomicUsize,
        done: Notify,
    }

    impl SyncView for CountingView {
        fn show_loading(&self) {
            self.loading.fetch_add(1, Ordering::SeqCst);
        }
        fn refresh(&self) {
            self.refreshed.fetch_add(1, Ordering::SeqCst);
            self.done.notify_one();
        }
        fn show_sync_failed(&self) {
            self.failed.fetch_add(1, Ordering::SeqCst);
            self.done.notify_one();
        }
    }

    struct Released(Notify);

    #[async_trait]
    impl SyncWork for Released {
        async fn run(&self) -> WorkResult {
            self.0.notified().await;
            Ok(())
        }
    }

    fn request(work: Arc<Released>) -> UnitRequest {
        UnitRequest {
            class: "dashboard-sync".to_string(),
            constraints: Constraints::network(),
            work,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_repeated_attach_refreshes_once() {
        let network = NetworkMonitor::new(false);
        let scheduler = TokioScheduler::new(network.clone());
        let view = Arc::new(CountingView::default());
        let observer = SyncResultObserver::new(view.clone());
        let work = Arc::new(Released(Notify::new()));

        assert!(observer.attach(scheduler.enqueue_unique(request(work.clone()))));
        assert!(!observer.attach(scheduler.enqueue_unique(request(work.clone()))));
        while view.loading.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        network.set_connected(true);
        work.0.notify_one();
        tokio::time::timeout(Duration::from_secs(5), view.done.notified())
            .await
            .unwrap();

        assert_eq!(view.loading.load(Ordering::SeqCst), 1);
        assert_eq!(view.refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(view.failed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stopped_observer_ignores_completion() {
        let scheduler = TokioScheduler::new(NetworkMonitor::new(true));
        let view = Arc::new(CountingView::default());
        let observer = SyncResultObserver::new(view.clone());
        let work = Arc::new(Released(Notify::new()));

        let subscription = scheduler.enqueue_unique(request(work.clone()));
        let handle = subscription.handle();
        assert!(observer.attach(subscription));
        assert_eq!(observer.observed(), Some(handle));
        let mut sub = scheduler.subscribe(handle).unwrap();
        observer.stop();
        assert!(observer.observed().is_none());

        work.0.notify_one();
        while !sub.next().await.unwrap().is_finished() {}
        tokio::task::yield_now().await;

        assert_eq!(view.refreshed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_attach_after_unrelated_prune_still_refreshes() {
        let scheduler = TokioScheduler::new(NetworkMonitor::new(true));
        let view = Arc::new(CountingView::default());
        let observer = SyncResultObserver::new(view.clone());
        let work = Arc::new(Released(Notify::new()));
        work.0.notify_one();

        let subscription = scheduler.enqueue_unique(request(work));
        while !subscription.current().is_finished() {
            tokio::task::yield_now().await;
        }
        let mut upload = request(Arc::new(Released(Notify::new())));
        upload.class = "upload".to_string();
        let _upload = scheduler.enqueue_unique(upload);

        assert!(observer.attach(subscription));
        tokio::time::timeout(Duration::from_secs(5), view.done.notified())
            .await
            .unwrap();

        assert_eq!(view.refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(view.failed.load(Ordering::SeqCst), 0);
    }
}
