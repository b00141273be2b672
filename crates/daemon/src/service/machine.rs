//! Service state machine.
//!
//! Owns the [`ServiceState`] and the single active worker. Transitions follow
//! `Stopped -> Starting -> Running -> Stopped`, with `Starting -> Stopped`
//! for an aborted startup.
//!
//! Every mutating operation takes the `delivery` lock first and the `inner`
//! lock second. It updates the state under `inner`, releases it, and calls
//! observers, the presenter and the event channel under `delivery` only, so
//! deliveries happen in transition order. Read-only queries take `inner`
//! alone and may be called from an observer's `update`; mutating operations
//! called from `update` deadlock.
//!
//! Worker events carry the generation of the start that produced them.
//! Events from a replaced worker are dropped.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use meshtether_protocol::{ClientRecord, ErrorKind, ServiceState};
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::worker::{TaggedWorkerEvent, Worker, WorkerEvent, WorkerEventSender, WorkerFactory};
use crate::notify::NotificationPresenter;
use crate::prefs::{PreferenceStore, ROUTE_TABLE_PATH};
use crate::status::{ObserverRole, StatusFanout};

/// Capacity of the service event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

const PROGRESS_STARTING: &str = "Starting mesh tethering";
const PROGRESS_STOPPING: &str = "Stopping mesh tethering";

/// Events emitted by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    /// Human-readable progress text.
    Progress { message: String },
    /// The service state changed.
    StateChanged(ServiceState),
    /// A client joined the current session.
    ClientJoined(ClientRecord),
    /// A worker failure was surfaced.
    Error(ErrorKind),
}

struct Inner {
    state: ServiceState,
    worker: Option<Box<dyn Worker>>,
    /// Incremented on every start, so stale timeouts and events can be told
    /// apart.
    generation: u64,
    startup_deadline: Option<Instant>,
}

impl Inner {
    /// Whether an event tagged `generation` belongs to the current start.
    /// Untagged events always do.
    fn is_current(&self, generation: Option<u64>) -> bool {
        match generation {
            Some(generation) if generation != self.generation => {
                debug!(
                    generation,
                    current = self.generation,
                    "Dropping event from a replaced worker"
                );
                false
            }
            _ => true,
        }
    }
}

/// Tracks the service state and drives the worker.
pub struct ServiceStateMachine {
    inner: Mutex<Inner>,
    delivery: Mutex<()>,
    clients: RwLock<Vec<ClientRecord>>,
    state_tx: watch::Sender<ServiceState>,
    event_tx: broadcast::Sender<ServiceEvent>,
    worker_tx: mpsc::UnboundedSender<TaggedWorkerEvent>,
    factory: Arc<dyn WorkerFactory>,
    fanout: Arc<StatusFanout>,
    presenter: Arc<NotificationPresenter>,
    prefs: Arc<PreferenceStore>,
    startup_timeout: Option<Duration>,
    route_table: PathBuf,
    wake: Notify,
}

impl ServiceStateMachine {
    /// Creates a stopped machine.
    ///
    /// The returned receiver carries worker callbacks and must be drained by
    /// the supervisor (see [`spawn_supervisor`](super::spawn_supervisor)).
    pub fn new(
        factory: Arc<dyn WorkerFactory>,
        fanout: Arc<StatusFanout>,
        presenter: Arc<NotificationPresenter>,
        prefs: Arc<PreferenceStore>,
        startup_timeout: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<TaggedWorkerEvent>) {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ServiceState::Stopped);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let machine = Self {
            inner: Mutex::new(Inner {
                state: ServiceState::Stopped,
                worker: None,
                generation: 0,
                startup_deadline: None,
            }),
            delivery: Mutex::new(()),
            clients: RwLock::new(Vec::new()),
            state_tx,
            event_tx,
            worker_tx,
            factory,
            fanout,
            presenter,
            prefs,
            startup_timeout,
            route_table: PathBuf::from(ROUTE_TABLE_PATH),
            wake: Notify::new(),
        };
        (machine, worker_rx)
    }

    /// Overrides the routing table consulted for the WAN uplink on start.
    pub fn with_route_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.route_table = path.into();
        self
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, state: ServiceState) {
        debug_assert!(
            inner.state == state || inner.state.can_transition_to(state),
            "illegal transition {} -> {}",
            inner.state,
            state
        );
        debug!(from = %inner.state, to = %state, "Service state transition");
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ServiceEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    fn publish_state(&self, state: ServiceState) {
        self.fanout.notify_all(state);
        self.emit(ServiceEvent::StateChanged(state));
    }

    fn publish_progress(&self, message: &str) {
        self.presenter.on_progress(message);
        self.emit(ServiceEvent::Progress {
            message: message.to_string(),
        });
    }

    /// Current state. Never blocks.
    pub fn state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    /// Watches the state.
    pub fn subscribe_state(&self) -> watch::Receiver<ServiceState> {
        self.state_tx.subscribe()
    }

    /// Subscribes to service events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.event_tx.subscribe()
    }

    /// Clients of the current session.
    pub fn clients(&self) -> Vec<ClientRecord> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a worker is active.
    pub fn has_worker(&self) -> bool {
        self.lock_inner().worker.is_some()
    }

    /// Looks up the WAN uplink. The result is only logged.
    fn lookup_wan(&self) {
        match self.prefs.find_if_wan(&self.route_table) {
            Ok(true) => {}
            Ok(false) => warn!("No WAN uplink found, starting mesh without one"),
            Err(e) => warn!("Failed to look up WAN interface: {:#}", e),
        }
    }

    /// Starts the service. No-op unless stopped.
    ///
    /// Returns whether a worker was started.
    pub fn request_start(&self) -> bool {
        if !self.state().is_stopped() {
            debug!(state = %self.state(), "Start requested while not stopped, ignoring");
            return false;
        }
        // File I/O, kept outside the locks.
        self.lookup_wan();

        let _delivery = self.lock_delivery();
        let started = {
            let mut inner = self.lock_inner();
            if !inner.state.is_stopped() {
                debug!(state = %inner.state, "Start requested while not stopped, ignoring");
                return false;
            }

            self.set_state(&mut inner, ServiceState::Starting);
            inner.generation += 1;
            inner.startup_deadline = self.startup_timeout.map(|t| Instant::now() + t);

            let worker = self.factory.create();
            let events = WorkerEventSender::new(inner.generation, self.worker_tx.clone());
            match worker.start(events) {
                Ok(()) => {
                    inner.worker = Some(worker);
                    true
                }
                Err(e) => {
                    warn!("Worker failed to start: {}", e);
                    self.set_state(&mut inner, ServiceState::Stopped);
                    inner.startup_deadline = None;
                    false
                }
            }
        };

        self.publish_state(ServiceState::Starting);
        self.publish_progress(PROGRESS_STARTING);

        if started {
            info!("Service starting");
            self.wake.notify_one();
        } else {
            self.presenter.hide_progress();
            self.publish_state(ServiceState::Stopped);
            self.surface_error(ErrorKind::Other);
        }
        started
    }

    /// Asks the active worker to stop. Advisory; no-op without a worker.
    pub fn request_stop(&self) -> bool {
        let _delivery = self.lock_delivery();
        {
            let inner = self.lock_inner();
            let Some(worker) = inner.worker.as_ref() else {
                debug!("Stop requested without an active worker, ignoring");
                return false;
            };
            info!(state = %inner.state, "Service stopping");
            worker.stop();
        }

        self.publish_progress(PROGRESS_STOPPING);
        true
    }

    /// Starts the service when stopped, stops it otherwise.
    pub fn toggle(&self) -> bool {
        if self.state().is_stopped() {
            self.request_start()
        } else {
            self.request_stop()
        }
    }

    /// The worker finished starting: `Starting -> Running`.
    pub fn on_worker_started(&self) -> bool {
        self.worker_started(None)
    }

    fn worker_started(&self, generation: Option<u64>) -> bool {
        let _delivery = self.lock_delivery();
        {
            let mut inner = self.lock_inner();
            if !inner.is_current(generation) {
                return false;
            }
            if !inner.state.is_starting() {
                warn!(state = %inner.state, "Worker reported started in unexpected state, ignoring");
                return false;
            }
            self.set_state(&mut inner, ServiceState::Running);
            inner.startup_deadline = None;
        }

        info!("Service running");
        self.presenter.hide_progress();
        self.publish_state(ServiceState::Running);
        self.presenter.on_running();
        true
    }

    /// The worker stopped: any state goes to `Stopped`.
    ///
    /// Clears the worker, the client list and both alert classes. Returns the
    /// previous state.
    pub fn on_worker_stopped(&self) -> ServiceState {
        self.worker_stopped(None).unwrap_or(ServiceState::Stopped)
    }

    /// Returns `None` if the event came from a replaced worker.
    fn worker_stopped(&self, generation: Option<u64>) -> Option<ServiceState> {
        let _delivery = self.lock_delivery();
        let (previous, worker) = {
            let mut inner = self.lock_inner();
            if !inner.is_current(generation) {
                return None;
            }
            let previous = inner.state;
            self.set_state(&mut inner, ServiceState::Stopped);
            inner.startup_deadline = None;
            self.clients
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            (previous, inner.worker.take())
        };
        // Dropping the worker releases whatever it still holds.
        drop(worker);

        info!(from = %previous, "Service stopped");
        self.presenter.hide_progress();
        self.presenter.on_stopped();
        self.publish_state(ServiceState::Stopped);
        Some(previous)
    }

    /// A client joined. Ignored when the service is stopped.
    pub fn on_client_joined(&self, record: ClientRecord) -> bool {
        self.client_joined(None, record)
    }

    fn client_joined(&self, generation: Option<u64>, record: ClientRecord) -> bool {
        let _delivery = self.lock_delivery();
        let state = {
            let inner = self.lock_inner();
            if !inner.is_current(generation) {
                return false;
            }
            if inner.state.is_stopped() {
                warn!(client = %record.address, "Client reported while stopped, ignoring");
                return false;
            }
            self.clients
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record.clone());
            inner.state
        };

        info!(client = %record.nice_label(), "Client joined");
        self.fanout.notify_role(ObserverRole::Links, state);
        self.presenter.on_client_added(&record);
        self.emit(ServiceEvent::ClientJoined(record));
        true
    }

    /// The worker failed with `code`. Always surfaced.
    pub fn on_worker_error(&self, code: i32) -> ErrorKind {
        let kind = ErrorKind::from_code(code);
        warn!(code, %kind, "Worker reported an error");

        let _delivery = self.lock_delivery();
        self.surface_error(kind);
        kind
    }

    fn surface_error(&self, kind: ErrorKind) {
        self.presenter.on_error(kind);
        self.emit(ServiceEvent::Error(kind));
    }

    /// The worker picked a LAN interface.
    pub fn on_lan_interface(&self, iface: &str) {
        if let Err(e) = self.prefs.found_if_lan(iface) {
            warn!("Failed to store LAN interface {}: {:#}", iface, e);
        }
    }

    /// Dispatches a worker callback as coming from the current worker.
    pub fn handle_worker_event(&self, event: WorkerEvent) {
        self.dispatch(None, event);
    }

    /// Dispatches a worker callback, dropping it if its start generation has
    /// been replaced.
    pub fn handle_tagged_event(&self, (generation, event): TaggedWorkerEvent) {
        self.dispatch(Some(generation), event);
    }

    fn dispatch(&self, generation: Option<u64>, event: WorkerEvent) {
        match event {
            WorkerEvent::Started => {
                self.worker_started(generation);
            }
            WorkerEvent::Stopped => {
                self.worker_stopped(generation);
            }
            WorkerEvent::ClientJoined(record) => {
                self.client_joined(generation, record);
            }
            WorkerEvent::LanInterface(iface) => {
                if self.lock_inner().is_current(generation) {
                    self.on_lan_interface(&iface);
                }
            }
            WorkerEvent::Failed(code) => {
                if self.lock_inner().is_current(generation) {
                    self.on_worker_error(code);
                }
            }
        }
    }

    /// Pending startup deadline, tagged with the start generation.
    pub fn startup_deadline(&self) -> Option<(u64, Instant)> {
        let inner = self.lock_inner();
        inner
            .startup_deadline
            .map(|deadline| (inner.generation, deadline))
    }

    /// The startup deadline of `generation` elapsed.
    ///
    /// If that start is still pending, the failure is surfaced as
    /// [`ErrorKind::Other`] and the worker is asked to stop. The state moves
    /// to `Stopped` once the worker confirms.
    pub fn on_startup_timeout(&self, generation: u64) -> bool {
        let _delivery = self.lock_delivery();
        {
            let mut inner = self.lock_inner();
            if !inner.state.is_starting() || inner.generation != generation {
                return false;
            }
            inner.startup_deadline = None;
            warn!(generation, "Worker did not start in time, stopping it");
            if let Some(worker) = inner.worker.as_ref() {
                worker.stop();
            }
        }

        self.surface_error(ErrorKind::Other);
        true
    }

    /// Resolves when the startup deadline may have changed.
    pub(crate) async fn deadline_changed(&self) {
        self.wake.notified().await
    }

    /// Brings the machine in line with the worker.
    ///
    /// If the worker is gone or reports itself stopped while the machine does
    /// not, runs [`on_worker_stopped`](Self::on_worker_stopped).
    pub fn reconcile(&self) -> bool {
        let (stale, generation) = {
            let inner = self.lock_inner();
            if inner.state.is_stopped() {
                return false;
            }
            let stale = inner
                .worker
                .as_ref()
                .map_or(true, |worker| worker.current_state().is_stopped());
            (stale, inner.generation)
        };

        // A start in between makes the cleanup stale too.
        stale && {
            info!("Worker is no longer running, cleaning up");
            self.worker_stopped(Some(generation)).is_some()
        }
    }

    /// Stops an active worker because the host is going away.
    ///
    /// Returns whether a worker was active.
    pub fn terminate(&self) -> bool {
        let inner = self.lock_inner();
        match inner.worker.as_ref() {
            Some(worker) => {
                warn!(state = %inner.state, "Shutting down with an active worker, stopping it");
                worker.stop();
                true
            }
            None => false,
        }
    }

    /// Waits until the state equals `target`, up to `timeout`.
    pub async fn wait_for_state(&self, target: ServiceState, timeout: Duration) -> bool {
        let mut rx = self.subscribe_state();
        tokio::time::timeout(timeout, rx.wait_for(|state| *state == target))
            .await
            .is_ok_and(|result| result.is_ok())
    }
}
