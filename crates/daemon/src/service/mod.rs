//! Service lifecycle module.
//!
//! This module provides the service state machine, the worker seam with a
//! command-backed implementation, and the supervisor pump that connects them.

pub mod machine;
pub mod script;
pub mod supervisor;
pub mod worker;

pub use machine::{ServiceEvent, ServiceStateMachine};
pub use script::{parse_line, ScriptWorker, ScriptWorkerFactory};
pub use supervisor::spawn_supervisor;
pub use worker::{
    TaggedWorkerEvent, Worker, WorkerError, WorkerEvent, WorkerEventSender, WorkerFactory,
};
