//! Application context.
//!
//! [`AppContext`] owns every long-lived component: preferences, the status
//! fanout, the presenter, the state machine and its supervisor pump. It is
//! created by [`initialize`] and released by [`shutdown`]. Dropping a context
//! without calling [`shutdown`] still asks an active worker to stop.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use meshtether_protocol::ServiceState;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::notify::{AlertSink, NotificationPresenter};
use crate::prefs::PreferenceStore;
use crate::service::{spawn_supervisor, ServiceStateMachine, WorkerFactory};
use crate::status::StatusFanout;

/// How long shutdown waits for an active worker to stop.
const SHUTDOWN_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// File holding a generated broadcast token.
const ACCESS_TOKEN_FILE: &str = "access_token";

/// Path of the generated broadcast token inside `data_dir`.
pub fn access_token_path(data_dir: &Path) -> PathBuf {
    data_dir.join(ACCESS_TOKEN_FILE)
}

/// Reads the broadcast token the daemon generated, if any.
pub fn read_access_token(data_dir: &Path) -> Option<String> {
    fs::read_to_string(access_token_path(data_dir))
        .ok()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn write_access_token(data_dir: &Path, token: &str) -> Result<()> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    let path = access_token_path(data_dir);
    fs::write(&path, token)
        .with_context(|| format!("Failed to write access token: {}", path.display()))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict access token: {}", path.display()))?;
    Ok(())
}

/// Owns the running application.
pub struct AppContext {
    config: Config,
    prefs: Arc<PreferenceStore>,
    fanout: Arc<StatusFanout>,
    presenter: Arc<NotificationPresenter>,
    machine: Arc<ServiceStateMachine>,
    shutdown_token: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl AppContext {
    /// Builds the context and starts the supervisor pump.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize(
        config: Config,
        factory: Arc<dyn WorkerFactory>,
        sink: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        let prefs_path = config.daemon.prefs_path();
        let prefs = Arc::new(
            PreferenceStore::open(&prefs_path)
                .with_context(|| format!("Failed to open preferences: {}", prefs_path.display()))?,
        );
        prefs.ensure_adhoc_ip(&mut rand::thread_rng());
        prefs.save().context("Failed to save preferences")?;

        let access_token = match &config.broadcast.access_token {
            Some(token) => token.clone(),
            None => {
                let token = Uuid::new_v4().to_string();
                write_access_token(&config.daemon.data_dir, &token)?;
                debug!("Generated state broadcast token");
                token
            }
        };

        let fanout = Arc::new(StatusFanout::new(
            access_token,
            config.broadcast.channel_capacity,
        ));
        let presenter = Arc::new(NotificationPresenter::new(
            sink,
            Arc::clone(&prefs),
            Arc::clone(&fanout),
        ));
        let (machine, worker_events) = ServiceStateMachine::new(
            factory,
            Arc::clone(&fanout),
            Arc::clone(&presenter),
            Arc::clone(&prefs),
            config.worker.startup_timeout(),
        );
        let machine = Arc::new(machine);

        let shutdown_token = CancellationToken::new();
        let supervisor = spawn_supervisor(
            Arc::clone(&machine),
            worker_events,
            shutdown_token.clone(),
        );

        info!("Application context initialized");
        Ok(Self {
            config,
            prefs,
            fanout,
            presenter,
            machine,
            shutdown_token,
            supervisor: Some(supervisor),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn prefs(&self) -> &Arc<PreferenceStore> {
        &self.prefs
    }

    pub fn fanout(&self) -> &Arc<StatusFanout> {
        &self.fanout
    }

    pub fn presenter(&self) -> &Arc<NotificationPresenter> {
        &self.presenter
    }

    pub fn machine(&self) -> &Arc<ServiceStateMachine> {
        &self.machine
    }

    /// Cancelled when the context shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Stops an active worker, the supervisor pump, and saves preferences.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down application context");

        if self.machine.terminate()
            && !self
                .machine
                .wait_for_state(ServiceState::Stopped, SHUTDOWN_STOP_TIMEOUT)
                .await
        {
            warn!(
                "Worker did not stop within {:?}, exiting anyway",
                SHUTDOWN_STOP_TIMEOUT
            );
        }

        self.shutdown_token.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.await {
                warn!("Supervisor task failed: {}", e);
            }
        }

        self.prefs.save().context("Failed to save preferences")?;
        info!("Application context shut down");
        Ok(())
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        if self.supervisor.is_none() {
            return;
        }
        // Not shut down through `shutdown`.
        self.machine.terminate();
        self.shutdown_token.cancel();
        if let Err(e) = self.prefs.save() {
            warn!("Failed to save preferences on drop: {:#}", e);
        }
    }
}

/// Creates the application context. See [`AppContext::initialize`].
pub fn initialize(
    config: Config,
    factory: Arc<dyn WorkerFactory>,
    sink: Arc<dyn AlertSink>,
) -> Result<AppContext> {
    AppContext::initialize(config, factory, sink)
}

/// Releases the application context. See [`AppContext::shutdown`].
pub async fn shutdown(context: AppContext) -> Result<()> {
    context.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryAlertSink;
    use crate::prefs::keys;
    use crate::service::{Worker, WorkerError, WorkerEventSender};
    use crate::service::WorkerEvent;
    use tempfile::TempDir;

    /// Reports start and stop immediately.
    struct EchoWorker {
        events: std::sync::Mutex<Option<WorkerEventSender>>,
    }

    impl Worker for EchoWorker {
        fn start(&self, events: WorkerEventSender) -> Result<(), WorkerError> {
            let _ = events.send(WorkerEvent::Started);
            *self.events.lock().unwrap() = Some(events);
            Ok(())
        }

        fn stop(&self) {
            if let Some(events) = self.events.lock().unwrap().as_ref() {
                let _ = events.send(WorkerEvent::Stopped);
            }
        }

        fn current_state(&self) -> ServiceState {
            ServiceState::Running
        }
    }

    fn echo_factory() -> Arc<dyn WorkerFactory> {
        Arc::new(|| -> Box<dyn Worker> {
            Box::new(EchoWorker {
                events: std::sync::Mutex::new(None),
            })
        })
    }

    fn test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.daemon.data_dir = temp_dir.path().to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_initialize_generates_ip_and_token() {
        let temp_dir = TempDir::new().unwrap();
        let context = initialize(
            test_config(&temp_dir),
            echo_factory(),
            Arc::new(MemoryAlertSink::new()),
        )
        .unwrap();

        let ip = context.prefs().get_string(keys::ADHOC_IP, "");
        assert!(ip.starts_with("10."));
        let token = read_access_token(temp_dir.path()).unwrap();
        assert!(context.fanout().subscribe(&token).is_ok());
        assert!(context.fanout().subscribe("wrong").is_err());

        shutdown(context).await.unwrap();
        assert!(temp_dir.path().join("prefs.json").exists());
    }

    #[tokio::test]
    async fn test_configured_token_is_used() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.broadcast.access_token = Some("configured".to_string());

        let context = initialize(config, echo_factory(), Arc::new(MemoryAlertSink::new())).unwrap();
        assert!(context.fanout().subscribe("configured").is_ok());
        assert!(read_access_token(temp_dir.path()).is_none());

        shutdown(context).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_active_worker() {
        let temp_dir = TempDir::new().unwrap();
        let context = initialize(
            test_config(&temp_dir),
            echo_factory(),
            Arc::new(MemoryAlertSink::new()),
        )
        .unwrap();
        let machine = Arc::clone(context.machine());

        assert!(machine.request_start());
        assert!(
            machine
                .wait_for_state(ServiceState::Running, Duration::from_secs(5))
                .await
        );

        shutdown(context).await.unwrap();
        assert_eq!(machine.state(), ServiceState::Stopped);
        assert!(!machine.has_worker());
    }

    #[tokio::test]
    async fn test_drop_without_shutdown_stops_worker() {
        let temp_dir = TempDir::new().unwrap();
        let context = initialize(
            test_config(&temp_dir),
            echo_factory(),
            Arc::new(MemoryAlertSink::new()),
        )
        .unwrap();
        let machine = Arc::clone(context.machine());
        let token = context.shutdown_token();
        machine.request_start();

        drop(context);
        assert!(token.is_cancelled());
        assert!(temp_dir.path().join("prefs.json").exists());
    }
}
