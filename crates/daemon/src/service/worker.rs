//! Background worker seam.
//!
//! The worker performs the actual tethering. It is started and stopped by the
//! state machine and reports back asynchronously through a [`WorkerEvent`]
//! channel.

use meshtether_protocol::{ClientRecord, ServiceState};
use thiserror::Error;
use tokio::sync::mpsc;

/// Callbacks from the worker to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// The worker finished starting.
    Started,
    /// The worker stopped, for any reason.
    Stopped,
    /// A client joined the mesh.
    ClientJoined(ClientRecord),
    /// The worker picked a LAN interface.
    LanInterface(String),
    /// The worker failed with a numeric error code.
    Failed(i32),
}

/// A worker event tagged with the start generation that produced it.
pub type TaggedWorkerEvent = (u64, WorkerEvent);

/// Sender handed to a worker on start.
///
/// Every event is tagged with the generation of that start, so events from a
/// worker that has since been replaced can be told apart and dropped.
#[derive(Debug, Clone)]
pub struct WorkerEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedWorkerEvent>,
}

impl WorkerEventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedWorkerEvent>) -> Self {
        Self { generation, tx }
    }

    /// Start generation this sender belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Sends `event`. Fails only when the receiving side is gone.
    pub fn send(&self, event: WorkerEvent) -> Result<(), mpsc::error::SendError<WorkerEvent>> {
        self.tx
            .send((self.generation, event))
            .map_err(|mpsc::error::SendError((_, event))| mpsc::error::SendError(event))
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Errors a worker can report synchronously.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker could not be launched at all.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker is already running.
    #[error("worker already started")]
    AlreadyStarted,

    /// The worker refused to start.
    #[error("worker refused to start: {0}")]
    Refused(String),
}

/// A supervised background worker.
pub trait Worker: Send + Sync {
    /// Begins starting. Completion is reported through `events`.
    fn start(&self, events: WorkerEventSender) -> Result<(), WorkerError>;

    /// Asks the worker to stop. Advisory; `Stopped` arrives later.
    fn stop(&self);

    /// The worker's own view of its state.
    fn current_state(&self) -> ServiceState;
}

/// Creates a fresh worker for each start request.
pub trait WorkerFactory: Send + Sync {
    fn create(&self) -> Box<dyn Worker>;
}

impl<F> WorkerFactory for F
where
    F: Fn() -> Box<dyn Worker> + Send + Sync,
{
    fn create(&self) -> Box<dyn Worker> {
        self()
    }
}
