//! Supervisor pump.
//!
//! A single task owns the worker callback channel: it feeds worker events to
//! the state machine and fires the startup timeout.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::machine::ServiceStateMachine;
use super::worker::TaggedWorkerEvent;

/// Spawns the supervisor pump.
///
/// The pump runs until `shutdown` is cancelled or every worker event sender
/// has been dropped.
pub fn spawn_supervisor(
    machine: Arc<ServiceStateMachine>,
    events: mpsc::UnboundedReceiver<TaggedWorkerEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_supervisor(machine, events, shutdown))
}

async fn run_supervisor(
    machine: Arc<ServiceStateMachine>,
    mut events: mpsc::UnboundedReceiver<TaggedWorkerEvent>,
    shutdown: CancellationToken,
) {
    debug!("Supervisor started");

    loop {
        let deadline = machine.startup_deadline();
        let timeout = async {
            match deadline {
                Some((_, at)) => tokio::time::sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Supervisor received shutdown signal");
                break;
            }
            event = events.recv() => {
                match event {
                    Some((generation, event)) => {
                        debug!(generation, ?event, "Worker event");
                        machine.handle_tagged_event((generation, event));
                    }
                    None => {
                        debug!("Worker event channel closed");
                        break;
                    }
                }
            }
            // Re-arm the timer after a new start.
            _ = machine.deadline_changed() => {}
            _ = timeout => {
                if let Some((generation, _)) = deadline {
                    machine.on_startup_timeout(generation);
                }
            }
        }
    }

    debug!("Supervisor stopped");
}
