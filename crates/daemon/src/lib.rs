//! # MeshTether Daemon Library
//!
//! This crate provides the application-lifecycle core of MeshTether: it
//! supervises the background tethering worker, keeps views up to date and
//! tells the user what is happening.
//!
//! ## Overview
//!
//! - **Service state machine**: `Stopped -> Starting -> Running -> Stopped`,
//!   with at most one active worker
//! - **Status fanout**: one weak observer slot per view role, plus a state
//!   broadcast guarded by a capability token
//! - **Notification presenter**: running, client and error alerts; errors go
//!   to a dialog when the status view has focus
//! - **Preferences**: persistent key/value settings with defaults
//! - **Control IPC**: Unix socket for the CLI and state subscribers
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         AppContext                            │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  ┌──────────────┐   WorkerEvent   ┌────────────────────────┐  │
//! │  │    Worker    │ ──────────────▶ │   Supervisor pump      │  │
//! │  └──────────────┘                 └───────────┬────────────┘  │
//! │         ▲ start/stop                          ▼               │
//! │  ┌──────┴─────────────────────────────────────────────────┐   │
//! │  │                 ServiceStateMachine                    │   │
//! │  └──────┬──────────────────────────────────┬──────────────┘   │
//! │         ▼                                  ▼                  │
//! │  ┌──────────────┐                 ┌────────────────────────┐  │
//! │  │ StatusFanout │                 │ NotificationPresenter  │  │
//! │  └──────────────┘                 └────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshtether::{Config, ScriptWorkerFactory, TracingAlertSink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let factory = Arc::new(ScriptWorkerFactory::new(config.worker.clone()));
//!     let context = meshtether::initialize(config, factory, Arc::new(TracingAlertSink))?;
//!
//!     context.machine().request_start();
//!     // ...
//!
//!     meshtether::shutdown(context).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`context`]: Application context lifecycle
//! - [`ipc`]: Control socket, client and PID file
//! - [`logging`]: Tracing subscriber setup
//! - [`notify`]: Alerts and the notification presenter
//! - [`prefs`]: User preferences
//! - [`service`]: State machine, worker seam and supervisor
//! - [`status`]: Observer table and state broadcast

pub mod config;
pub mod context;
pub mod ipc;
pub mod logging;
pub mod notify;
pub mod prefs;
pub mod service;
pub mod status;

// Re-export protocol for convenience
pub use meshtether_protocol as protocol;

pub use config::Config;
pub use context::{initialize, shutdown, AppContext};
pub use notify::{
    Alert, AlertAction, AlertId, AlertSink, ErrorSurface, MemoryAlertSink, NotificationPresenter,
    TracingAlertSink,
};
pub use prefs::{PrefValue, PreferenceStore};
pub use service::{
    ScriptWorker, ScriptWorkerFactory, ServiceEvent, ServiceStateMachine, Worker, WorkerError,
    WorkerEvent, WorkerFactory,
};
pub use status::{
    Dialog, FanoutError, InteractiveView, ObserverRole, StatusFanout, StatusObserver, ViewTab,
};
