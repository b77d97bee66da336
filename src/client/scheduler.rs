//! Background scheduling of constraint-gated units of work.
//!
//! The scheduler is an injected service rather than a process-wide instance,
//! so tests can drive it with a fake network and fake work.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Lifecycle of a scheduled unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Enqueued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl UnitState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            UnitState::Succeeded | UnitState::Failed | UnitState::Cancelled
        )
    }
}

/// Conditions that must hold for a unit to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Constraints {
    pub network_connected: bool,
}

impl Constraints {
    pub fn network() -> Self {
        Self {
            network_connected: true,
        }
    }
}

/// Handle of one scheduled unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncHandle(Uuid);

impl SyncHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type WorkResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// The body of a unit.
#[async_trait]
pub trait SyncWork: Send + Sync {
    async fn run(&self) -> WorkResult;
}

/// A request to run `work` under `constraints`. Units of the same `class`
/// are coalesced while one is still pending.
#[derive(Clone)]
pub struct UnitRequest {
    pub class: String,
    pub constraints: Constraints,
    pub work: Arc<dyn SyncWork>,
    pub timeout: Duration,
}

pub trait BackgroundScheduler: Send + Sync {
    /// Submit a unit, or join the ENQUEUED/RUNNING unit of the same class.
    ///
    /// The returned subscription is registered before the scheduler lock is
    /// released, so the unit stays tracked until it is dropped.
    fn enqueue_unique(&self, request: UnitRequest) -> Subscription;

    /// Observe a unit's state. Dropping the subscription unsubscribes.
    fn subscribe(&self, handle: SyncHandle) -> Option<Subscription>;
}

/// A stream of state changes for one unit.
///
/// Intermediate states may be skipped; the latest state is always delivered.
pub struct Subscription {
    handle: SyncHandle,
    rx: watch::Receiver<UnitState>,
    primed: bool,
}

impl Subscription {
    fn new(handle: SyncHandle, rx: watch::Receiver<UnitState>) -> Self {
        Self {
            handle,
            rx,
            primed: false,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle
    }

    pub fn current(&self) -> UnitState {
        *self.rx.borrow()
    }

    /// The current state on first call, then each subsequent change.
    pub async fn next(&mut self) -> Option<UnitState> {
        if !self.primed {
            self.primed = true;
            return Some(*self.rx.borrow_and_update());
        }
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// Connectivity as seen by the scheduler.
#[derive(Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(connected: bool) -> Self {
        let (tx, _rx) = watch::channel(connected);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_connected(&self, connected: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    pub fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait_until(&self, connected: bool) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|current| *current == connected).await;
    }
}

#[derive(Default)]
struct Units {
    states: HashMap<SyncHandle, Arc<watch::Sender<UnitState>>>,
    active: HashMap<String, SyncHandle>,
}

impl Units {
    /// Drop finished units nobody is watching any more.
    fn prune(&mut self) {
        self.states
            .retain(|_, tx| !tx.borrow().is_finished() || tx.receiver_count() > 0);
    }

    fn pending_for(&self, class: &str) -> Option<Subscription> {
        let handle = self.active.get(class)?;
        let tx = self.states.get(handle)?;
        (!tx.borrow().is_finished()).then(|| Subscription::new(*handle, tx.subscribe()))
    }
}

/// Runs units as tokio tasks, gated on a [`NetworkMonitor`].
///
/// A unit requiring the network waits while disconnected and is CANCELLED
/// if connectivity drops while it runs. A unit that exceeds its timeout is
/// FAILED.
#[derive(Clone)]
pub struct TokioScheduler {
    units: Arc<Mutex<Units>>,
    network: NetworkMonitor,
}

impl TokioScheduler {
    pub fn new(network: NetworkMonitor) -> Self {
        Self {
            units: Arc::new(Mutex::new(Units::default())),
            network,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Units> {
        self.units.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_unit(
        self,
        handle: SyncHandle,
        request: UnitRequest,
        state: Arc<watch::Sender<UnitState>>,
    ) {
        let needs_network = request.constraints.network_connected;
        if needs_network && !self.network.is_connected() {
            tracing::debug!(handle = %handle, class = %request.class, "Waiting for network");
            self.network.wait_until(true).await;
        }

        state.send_replace(UnitState::Running);
        tracing::debug!(handle = %handle, class = %request.class, "Unit running");

        let work = tokio::time::timeout(request.timeout, request.work.run());
        let finished = if needs_network {
            tokio::select! {
                result = work => classify(handle, result),
                _ = self.network.wait_until(false) => {
                    tracing::warn!(handle = %handle, "Network lost, cancelling unit");
                    UnitState::Cancelled
                }
            }
        } else {
            classify(handle, work.await)
        };

        state.send_replace(finished);
        let mut units = self.lock();
        if units.active.get(&request.class) == Some(&handle) {
            units.active.remove(&request.class);
        }
        tracing::info!(handle = %handle, class = %request.class, state = ?finished, "Unit finished");
    }
}

fn classify(
    handle: SyncHandle,
    result: Result<WorkResult, tokio::time::error::Elapsed>,
) -> UnitState {
    match result {
        Ok(Ok(())) => UnitState::Succeeded,
        Ok(Err(e)) => {
            tracing::warn!(handle = %handle, error = %e, "Unit failed");
            UnitState::Failed
        }
        Err(_) => {
            tracing::warn!(handle = %handle, "Unit timed out");
            UnitState::Failed
        }
    }
}

impl BackgroundScheduler for TokioScheduler {
    /// Must be called from within a tokio runtime.
    fn enqueue_unique(&self, request: UnitRequest) -> Subscription {
        let mut units = self.lock();
        units.prune();

        if let Some(subscription) = units.pending_for(&request.class) {
            tracing::debug!(
                handle = %subscription.handle(),
                class = %request.class,
                "Coalesced with pending unit"
            );
            return subscription;
        }

        let handle = SyncHandle::new();
        let (tx, rx) = watch::channel(UnitState::Enqueued);
        let tx = Arc::new(tx);
        units.states.insert(handle, tx.clone());
        units.active.insert(request.class.clone(), handle);
        drop(units);

        tracing::info!(handle = %handle, class = %request.class, "Unit enqueued");
        tokio::spawn(self.clone().run_unit(handle, request, tx));
        Subscription::new(handle, rx)
    }

    fn subscribe(&self, handle: SyncHandle) -> Option<Subscription> {
        let units = self.lock();
        units
            .states
            .get(&handle)
            .map(|tx| Subscription::new(handle, tx.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Work that blocks until released, then succeeds or fails.
    struct GatedWork {
        gate: Notify,
        runs: AtomicUsize,
        fail: bool,
    }

    impl GatedWork {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                gate: Notify::new(),
                runs: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl SyncWork for GatedWork {
        async fn run(&self) -> WorkResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            if self.fail {
                Err("server said no".into())
            } else {
                Ok(())
            }
        }
    }

    fn request(work: Arc<GatedWork>) -> UnitRequest {
        UnitRequest {
            class: "dashboard-sync".to_string(),
            constraints: Constraints::network(),
            work,
            timeout: Duration::from_secs(5),
        }
    }

    async fn wait_finished(sub: &mut Subscription) -> UnitState {
        loop {
            let state = sub.next().await.expect("unit vanished");
            if state.is_finished() {
                return state;
            }
        }
    }

    #[tokio::test]
    async fn test_pending_units_are_coalesced() {
        let scheduler = TokioScheduler::new(NetworkMonitor::new(false));
        let work = GatedWork::new(false);

        let first = scheduler.enqueue_unique(request(work.clone()));
        let second = scheduler.enqueue_unique(request(work.clone()));
        assert_eq!(first.handle(), second.handle());

        assert_eq!(first.current(), UnitState::Enqueued);
        assert!(scheduler.subscribe(first.handle()).is_some());
        assert_eq!(work.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unit_waits_for_network_then_succeeds() {
        let network = NetworkMonitor::new(false);
        let scheduler = TokioScheduler::new(network.clone());
        let work = GatedWork::new(false);

        let mut sub = scheduler.enqueue_unique(request(work.clone()));
        let handle = sub.handle();
        assert_eq!(sub.next().await, Some(UnitState::Enqueued));

        network.set_connected(true);
        assert_eq!(sub.next().await, Some(UnitState::Running));
        work.gate.notify_one();
        assert_eq!(wait_finished(&mut sub).await, UnitState::Succeeded);

        // A finished unit no longer absorbs new requests.
        let next = scheduler.enqueue_unique(request(work.clone()));
        assert_ne!(next.handle(), handle);
    }

    #[tokio::test]
    async fn test_failing_work_reports_failed() {
        let scheduler = TokioScheduler::new(NetworkMonitor::new(true));
        let work = GatedWork::new(true);

        let mut sub = scheduler.enqueue_unique(request(work.clone()));
        work.gate.notify_one();
        assert_eq!(wait_finished(&mut sub).await, UnitState::Failed);
    }

    #[tokio::test]
    async fn test_network_loss_cancels_running_unit() {
        let network = NetworkMonitor::new(true);
        let scheduler = TokioScheduler::new(network.clone());
        let work = GatedWork::new(false);

        let mut sub = scheduler.enqueue_unique(request(work.clone()));
        loop {
            if sub.next().await == Some(UnitState::Running) {
                break;
            }
        }
        network.set_connected(false);
        assert_eq!(wait_finished(&mut sub).await, UnitState::Cancelled);
    }

    #[tokio::test]
    async fn test_timeout_reports_failed() {
        let scheduler = TokioScheduler::new(NetworkMonitor::new(true));
        let work = GatedWork::new(false);
        let mut req = request(work);
        req.timeout = Duration::from_millis(10);

        let mut sub = scheduler.enqueue_unique(req);
        assert_eq!(wait_finished(&mut sub).await, UnitState::Failed);
    }

    #[tokio::test]
    async fn test_finished_unit_survives_prune_while_subscribed() {
        let scheduler = TokioScheduler::new(NetworkMonitor::new(true));
        let work = GatedWork::new(false);

        let mut first = scheduler.enqueue_unique(request(work.clone()));
        let handle = first.handle();
        while first.current() != UnitState::Running {
            tokio::task::yield_now().await;
        }
        work.gate.notify_one();
        while !first.current().is_finished() {
            tokio::task::yield_now().await;
        }

        // Another class enqueued after completion prunes the unit table.
        let mut other = request(GatedWork::new(false));
        other.class = "upload".to_string();
        let _other = scheduler.enqueue_unique(other);

        assert_eq!(wait_finished(&mut first).await, UnitState::Succeeded);
        assert!(scheduler.subscribe(handle).is_some());

        drop(first);
        let mut third = request(GatedWork::new(false));
        third.class = "upload-2".to_string();
        let _third = scheduler.enqueue_unique(third);
        assert!(scheduler.subscribe(handle).is_none());
    }
}
