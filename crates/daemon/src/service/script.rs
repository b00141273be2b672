//! Worker backed by an external tethering command.
//!
//! The command reports progress on stdout, one event per line:
//!
//! ```text
//! started
//! stopped
//! client <ip> [mac] [hostname]
//! lan <ifname>
//! error <code>
//! ```
//!
//! Exit of the process implies `stopped`.

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use meshtether_protocol::{ClientRecord, ServiceState, ERROR_OTHER};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::worker::{Worker, WorkerError, WorkerEvent, WorkerEventSender, WorkerFactory};
use crate::config::WorkerConfig;

/// How long to wait for remaining stdout after the process exits.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Parses one stdout line of the worker command.
pub fn parse_line(line: &str) -> Option<WorkerEvent> {
    let mut tokens = line.split_whitespace();
    match tokens.next()? {
        "started" => Some(WorkerEvent::Started),
        "stopped" => Some(WorkerEvent::Stopped),
        "lan" => tokens
            .next()
            .map(|iface| WorkerEvent::LanInterface(iface.to_string())),
        "error" => {
            let code = tokens
                .next()
                .and_then(|code| code.parse().ok())
                .unwrap_or(ERROR_OTHER);
            Some(WorkerEvent::Failed(code))
        }
        "client" => {
            let address: IpAddr = tokens.next()?.parse().ok()?;
            let mut record = ClientRecord::new(address);
            let mut rest = tokens.peekable();
            if let Some(mac) = rest.next_if(|token| looks_like_mac(token)) {
                record = record.with_mac(mac);
            }
            if let Some(hostname) = rest.next() {
                record = record.with_hostname(hostname);
            }
            Some(WorkerEvent::ClientJoined(record))
        }
        _ => None,
    }
}

fn looks_like_mac(token: &str) -> bool {
    let parts: Vec<&str> = token.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Splits a command line on whitespace into program and arguments.
fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut tokens = command.split_whitespace().map(str::to_string);
    let program = tokens.next()?;
    Some((program, tokens.collect()))
}

/// Records `Stopped` and reports it, at most once per worker.
fn mark_stopped(state: &AtomicU8, events: &WorkerEventSender) {
    let previous = state.swap(ServiceState::Stopped.code(), Ordering::AcqRel);
    if previous != ServiceState::Stopped.code() {
        let _ = events.send(WorkerEvent::Stopped);
    }
}

/// Runs the configured command and translates its output into worker events.
pub struct ScriptWorker {
    command: String,
    args: Vec<String>,
    stop_command: Option<String>,
    state: Arc<AtomicU8>,
    kill: Mutex<Option<CancellationToken>>,
}

impl ScriptWorker {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            stop_command: None,
            state: Arc::new(AtomicU8::new(ServiceState::Stopped.code())),
            kill: Mutex::new(None),
        }
    }

    /// Runs `stop_command` on stop instead of killing the process.
    pub fn with_stop_command(mut self, stop_command: Option<String>) -> Self {
        self.stop_command = stop_command;
        self
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
            .with_stop_command(config.stop_command.clone())
    }

    fn kill_token(&self) -> Option<CancellationToken> {
        self.kill
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn stdout_reader(
        stdout: ChildStdout,
        state: Arc<AtomicU8>,
        events: WorkerEventSender,
    ) {
        let mut reader = BufReader::new(stdout).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("worker stdout: {}", line);
            match parse_line(&line) {
                Some(WorkerEvent::Stopped) => {
                    // Nothing after `stopped` belongs to this session.
                    mark_stopped(&state, &events);
                    break;
                }
                Some(event) => {
                    if event == WorkerEvent::Started {
                        let _ = state.compare_exchange(
                            ServiceState::Starting.code(),
                            ServiceState::Running.code(),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        );
                    }
                    if events.send(event).is_err() {
                        debug!("Worker event channel closed");
                        break;
                    }
                }
                None => debug!("Ignoring worker output: {}", line),
            }
        }

        debug!("Worker stdout reader finished");
    }

    async fn stderr_reader(stderr: ChildStderr) {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            debug!("worker stderr: {}", line);
        }
    }

    async fn wait_for_exit(
        mut child: Child,
        mut stdout_reader: JoinHandle<()>,
        stderr_reader: Option<JoinHandle<()>>,
        kill: CancellationToken,
        state: Arc<AtomicU8>,
        events: WorkerEventSender,
    ) {
        let killed = tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => info!("Worker exited with status: {}", status),
                    Err(e) => error!("Error waiting for worker: {}", e),
                }
                false
            }
            _ = kill.cancelled() => {
                info!("Killing worker process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill worker: {}", e);
                }
                true
            }
        };

        // Deliver buffered output before reporting the exit. Orphaned
        // grandchildren may hold the pipe open, so the drain is bounded.
        if killed
            || tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, &mut stdout_reader)
                .await
                .is_err()
        {
            stdout_reader.abort();
        }
        if let Some(stderr_reader) = stderr_reader {
            stderr_reader.abort();
        }

        mark_stopped(&state, &events);
    }
}

impl Worker for ScriptWorker {
    fn start(&self, events: WorkerEventSender) -> Result<(), WorkerError> {
        if self.current_state() != ServiceState::Stopped {
            return Err(WorkerError::AlreadyStarted);
        }
        let handle = Handle::try_current()
            .map_err(|_| WorkerError::Refused("no async runtime".to_string()))?;
        let _runtime = handle.enter();

        info!("Spawning worker: {} {}", self.command, self.args.join(" "));
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        debug!("Worker started with PID: {:?}", child.id());

        self.state
            .store(ServiceState::Starting.code(), Ordering::Release);

        let kill = CancellationToken::new();
        *self.kill.lock().unwrap_or_else(PoisonError::into_inner) = Some(kill.clone());

        let stdout_reader = match child.stdout.take() {
            Some(stdout) => handle.spawn(Self::stdout_reader(
                stdout,
                Arc::clone(&self.state),
                events.clone(),
            )),
            None => handle.spawn(async {}),
        };
        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| handle.spawn(Self::stderr_reader(stderr)));
        handle.spawn(Self::wait_for_exit(
            child,
            stdout_reader,
            stderr_reader,
            kill,
            Arc::clone(&self.state),
            events,
        ));
        Ok(())
    }

    fn stop(&self) {
        let Some(kill) = self.kill_token() else {
            return;
        };

        let stop_command = self.stop_command.as_deref().and_then(split_command);
        let (Some((program, args)), Ok(handle)) = (stop_command, Handle::try_current()) else {
            kill.cancel();
            return;
        };

        info!("Running worker stop command: {} {}", program, args.join(" "));
        handle.spawn(async move {
            match Command::new(&program).args(&args).status().await {
                Ok(status) if status.success() => debug!("Stop command finished"),
                Ok(status) => {
                    warn!("Stop command failed with {}, killing worker", status);
                    kill.cancel();
                }
                Err(e) => {
                    warn!("Failed to run stop command {}: {}, killing worker", program, e);
                    kill.cancel();
                }
            }
        });
    }

    fn current_state(&self) -> ServiceState {
        ServiceState::from_code(self.state.load(Ordering::Acquire)).unwrap_or_default()
    }
}

impl Drop for ScriptWorker {
    fn drop(&mut self) {
        // The child is owned by the wait task; only the token reaches it.
        if let Some(kill) = self.kill_token() {
            if self.current_state() != ServiceState::Stopped {
                debug!("Worker dropped while active, killing it");
            }
            kill.cancel();
        }
    }
}

/// Builds a [`ScriptWorker`] from the worker configuration for each start.
pub struct ScriptWorkerFactory {
    config: WorkerConfig,
}

impl ScriptWorkerFactory {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }
}

impl WorkerFactory for ScriptWorkerFactory {
    fn create(&self) -> Box<dyn Worker> {
        Box::new(ScriptWorker::from_config(&self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use crate::service::TaggedWorkerEvent;
    use tokio::sync::mpsc;

    fn shell(script: &str) -> ScriptWorker {
        ScriptWorker::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    fn channel() -> (WorkerEventSender, mpsc::UnboundedReceiver<TaggedWorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WorkerEventSender::new(1, tx), rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TaggedWorkerEvent>) -> WorkerEvent {
        let (generation, event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for worker event")
            .expect("worker event channel closed");
        assert_eq!(generation, 1);
        event
    }

    #[test]
    fn test_parse_simple_lines() {
        assert_eq!(parse_line("started"), Some(WorkerEvent::Started));
        assert_eq!(parse_line("  stopped  "), Some(WorkerEvent::Stopped));
        assert_eq!(
            parse_line("lan wlan0"),
            Some(WorkerEvent::LanInterface("wlan0".to_string()))
        );
        assert_eq!(parse_line("lan"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("olsrd: link up"), None);
    }

    #[test]
    fn test_parse_error_codes() {
        assert_eq!(parse_line("error 1"), Some(WorkerEvent::Failed(1)));
        assert_eq!(parse_line("error 3"), Some(WorkerEvent::Failed(3)));
        assert_eq!(parse_line("error root"), Some(WorkerEvent::Failed(ERROR_OTHER)));
        assert_eq!(parse_line("error"), Some(WorkerEvent::Failed(ERROR_OTHER)));
    }

    #[test]
    fn test_parse_client_lines() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));

        let Some(WorkerEvent::ClientJoined(record)) = parse_line("client 10.1.2.3") else {
            panic!("expected client event");
        };
        assert_eq!(record.address, ip);
        assert_eq!(record.mac, None);
        assert_eq!(record.hostname, None);

        let Some(WorkerEvent::ClientJoined(record)) =
            parse_line("client 10.1.2.3 aa:bb:cc:dd:ee:0f laptop")
        else {
            panic!("expected client event");
        };
        assert_eq!(record.mac.as_deref(), Some("aa:bb:cc:dd:ee:0f"));
        assert_eq!(record.hostname.as_deref(), Some("laptop"));

        let Some(WorkerEvent::ClientJoined(record)) = parse_line("client 10.1.2.3 laptop") else {
            panic!("expected client event");
        };
        assert_eq!(record.mac, None);
        assert_eq!(record.hostname.as_deref(), Some("laptop"));

        assert_eq!(parse_line("client not-an-ip"), None);
    }

    #[test]
    fn test_split_command() {
        assert_eq!(
            split_command("/usr/lib/meshtether/tether stop"),
            Some((
                "/usr/lib/meshtether/tether".to_string(),
                vec!["stop".to_string()]
            ))
        );
        assert_eq!(split_command("   "), None);
    }

    #[tokio::test]
    async fn test_script_reports_events_and_exit() {
        let worker = shell("echo started; echo lan wlan0; echo client 10.0.0.2 phone");
        let (tx, mut rx) = channel();
        worker.start(tx).unwrap();

        assert_eq!(next_event(&mut rx).await, WorkerEvent::Started);
        assert_eq!(
            next_event(&mut rx).await,
            WorkerEvent::LanInterface("wlan0".to_string())
        );
        assert!(matches!(
            next_event(&mut rx).await,
            WorkerEvent::ClientJoined(record) if record.hostname.as_deref() == Some("phone")
        ));
        assert_eq!(next_event(&mut rx).await, WorkerEvent::Stopped);
        assert_eq!(worker.current_state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_stopped_reported_once() {
        let worker = shell("echo started; echo stopped");
        let (tx, mut rx) = channel();
        worker.start(tx).unwrap();

        assert_eq!(next_event(&mut rx).await, WorkerEvent::Started);
        assert_eq!(next_event(&mut rx).await, WorkerEvent::Stopped);

        drop(worker);
        assert!(
            tokio::time::timeout(Duration::from_millis(500), rx.recv())
                .await
                .map_or(true, |event| event.is_none())
        );
    }

    #[tokio::test]
    async fn test_stop_kills_process() {
        let worker = shell("echo started; sleep 30");
        let (tx, mut rx) = channel();
        worker.start(tx.clone()).unwrap();
        assert_eq!(next_event(&mut rx).await, WorkerEvent::Started);
        assert_eq!(worker.current_state(), ServiceState::Running);

        assert!(matches!(
            worker.start(tx),
            Err(WorkerError::AlreadyStarted)
        ));

        worker.stop();
        assert_eq!(next_event(&mut rx).await, WorkerEvent::Stopped);
    }

    #[tokio::test]
    async fn test_missing_command_fails_to_spawn() {
        let worker = ScriptWorker::new("/nonexistent/meshtether-worker", Vec::new());
        let (tx, _rx) = channel();
        assert!(matches!(worker.start(tx), Err(WorkerError::Spawn(_))));
        assert_eq!(worker.current_state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_output_after_stopped_is_not_forwarded() {
        let worker = shell("echo started; echo stopped; echo client 10.0.0.99 ghost; sleep 30");
        let (tx, mut rx) = channel();
        worker.start(tx).unwrap();

        assert_eq!(next_event(&mut rx).await, WorkerEvent::Started);
        assert_eq!(next_event(&mut rx).await, WorkerEvent::Stopped);
        assert!(
            tokio::time::timeout(Duration::from_millis(500), rx.recv())
                .await
                .map_or(true, |event| event.is_none()),
            "no events expected after stopped"
        );
    }

    #[tokio::test]
    async fn test_drop_kills_process_that_outlives_stopped() {
        let worker = shell("echo started; echo stopped; sleep 30");
        let (tx, mut rx) = channel();
        worker.start(tx).unwrap();

        assert_eq!(next_event(&mut rx).await, WorkerEvent::Started);
        assert_eq!(next_event(&mut rx).await, WorkerEvent::Stopped);
        drop(worker);

        // The wait task kills the child and closes the last sender.
        assert!(
            tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("worker task did not finish")
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_drop_kills_running_process() {
        let worker = shell("echo started; sleep 30");
        let (tx, mut rx) = channel();
        worker.start(tx).unwrap();
        assert_eq!(next_event(&mut rx).await, WorkerEvent::Started);

        drop(worker);
        assert_eq!(next_event(&mut rx).await, WorkerEvent::Stopped);
    }

    #[tokio::test]
    async fn test_exit_aborts_stderr_reader() {
        let child = tokio::process::Command::new("true").spawn().unwrap();
        let stdout_reader = tokio::spawn(async {});
        // Stands in for a stderr pipe an orphaned grandchild keeps open.
        let stderr_reader = tokio::spawn(std::future::pending::<()>());
        let stderr_handle = stderr_reader.abort_handle();
        let state = Arc::new(AtomicU8::new(ServiceState::Running.code()));
        let (tx, mut rx) = channel();

        tokio::time::timeout(
            Duration::from_secs(5),
            ScriptWorker::wait_for_exit(
                child,
                stdout_reader,
                Some(stderr_reader),
                CancellationToken::new(),
                Arc::clone(&state),
                tx,
            ),
        )
        .await
        .unwrap();

        assert_eq!(next_event(&mut rx).await, WorkerEvent::Stopped);
        for _ in 0..10 {
            if stderr_handle.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(stderr_handle.is_finished());
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        shell("true").stop();
    }
}
