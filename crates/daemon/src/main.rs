//! MeshTether Daemon
//!
//! Supervises the mesh tethering worker and serves the control socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use meshtether::config::Config;
use meshtether::context::read_access_token;
use meshtether::ipc::{
    get_daemon_pid, get_pid_file_path, get_socket_path, is_daemon_running, run_control_server,
    ControlHandler, IpcClient, IpcResponse, IpcServer, PidFile,
};
use meshtether::prefs::{PrefValue, PreferenceStore};
use meshtether::protocol::ClientRecord;
use meshtether::service::{ScriptWorkerFactory, ServiceEvent};
use meshtether::TracingAlertSink;
use tokio_util::sync::CancellationToken;

/// Timeout for connecting to the control socket.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// MeshTether Daemon - mesh tethering lifecycle service.
#[derive(Parser, Debug)]
#[command(name = "meshtether")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the daemon in the foreground
    Run,

    /// Start tethering
    Start,

    /// Stop tethering
    Stop,

    /// Start tethering when stopped, stop it otherwise
    Toggle,

    /// Show the service state
    Status,

    /// List clients of the current session
    Clients {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print state changes as they happen
    Watch {
        /// Broadcast access token (defaults to the configured or generated one)
        #[arg(long)]
        token: Option<String>,
    },

    /// Stop tethering and exit the daemon
    Shutdown {
        /// Seconds to wait for the daemon to exit
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Read and change user preferences
    #[command(subcommand)]
    Prefs(PrefsCommands),
}

/// Subcommands for preference management.
#[derive(Subcommand, Debug, Clone)]
pub enum PrefsCommands {
    /// List all preferences
    List,

    /// Print one preference
    Get {
        /// Preference key
        key: String,
    },

    /// Change one preference; `true`/`false` are stored as booleans
    Set {
        /// Preference key
        key: String,
        /// New value
        value: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    config.validate()?;

    // Keep the guard alive so the log file is flushed on exit.
    let _log_guard = meshtether::logging::init(&config, cli.verbose)?;

    match cli.command {
        Commands::Run => {
            if is_daemon_running() {
                let pid = get_daemon_pid().unwrap_or(0);
                eprintln!("Error: Daemon already running (PID: {})", pid);
                eprintln!();
                eprintln!("To stop the existing daemon, run:");
                eprintln!("  meshtether-daemon shutdown");
                std::process::exit(1);
            }
            run_daemon(config).await?;
        }
        Commands::Start => print_state(connect().await?.start().await?)?,
        Commands::Stop => print_state(connect().await?.stop().await?)?,
        Commands::Toggle => print_state(connect().await?.toggle().await?)?,
        Commands::Status => print_state(connect().await?.status().await?)?,
        Commands::Clients { json } => {
            let clients = match connect().await?.list_clients().await? {
                IpcResponse::Clients { clients } => clients,
                other => return Err(unexpected(other)),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&clients)?);
            } else {
                print_clients(&clients);
            }
        }
        Commands::Watch { token } => {
            let token = token
                .or_else(|| config.broadcast.access_token.clone())
                .or_else(|| read_access_token(&config.daemon.data_dir))
                .context("No broadcast token configured or generated; pass --token")?;
            watch(&token).await?;
        }
        Commands::Shutdown { timeout } => shutdown_daemon(timeout).await?,
        Commands::Prefs(cmd) => run_prefs(&config, cmd)?,
    }

    Ok(())
}

/// Connect to the running daemon.
async fn connect() -> anyhow::Result<IpcClient> {
    IpcClient::connect_with_timeout(&get_socket_path(), CONNECT_TIMEOUT)
        .await
        .map_err(|_| anyhow::anyhow!("Daemon is not running (cannot connect to socket)"))
}

fn unexpected(response: IpcResponse) -> anyhow::Error {
    match response {
        IpcResponse::Error { message } => anyhow::anyhow!("Daemon returned error: {}", message),
        other => anyhow::anyhow!("Unexpected response from daemon: {:?}", other),
    }
}

fn print_state(response: IpcResponse) -> anyhow::Result<()> {
    match response {
        IpcResponse::State { state, clients } => {
            println!("Tethering: {}", state);
            println!("  Clients: {}", clients);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

/// Print clients in a formatted ASCII table.
fn print_clients(clients: &[ClientRecord]) {
    if clients.is_empty() {
        println!("No clients.");
        return;
    }

    let label_width = clients
        .iter()
        .map(|c| c.nice_label().len())
        .max()
        .unwrap_or(6)
        .max(6);

    println!("{:<label_width$}  {:<17}", "CLIENT", "MAC");
    println!("{}", "-".repeat(label_width + 19));
    for client in clients {
        println!(
            "{:<label_width$}  {:<17}",
            client.nice_label(),
            client.mac.as_deref().unwrap_or("-")
        );
    }

    println!();
    println!("Total: {} client(s)", clients.len());
}

async fn watch(token: &str) -> anyhow::Result<()> {
    let mut client = connect().await?;
    match client.subscribe(token).await? {
        IpcResponse::Subscribed => {}
        other => return Err(unexpected(other)),
    }

    while let Some(broadcast) = client.next_broadcast().await? {
        println!("{}", broadcast.state);
    }
    Ok(())
}

/// Ask the daemon to exit and wait until its socket goes away.
async fn shutdown_daemon(timeout_secs: u64) -> anyhow::Result<()> {
    let socket_path = get_socket_path();
    let mut client = connect().await?;

    println!("Sending shutdown request...");
    client.set_timeout(Duration::from_secs(timeout_secs));
    match client.shutdown().await? {
        IpcResponse::ShuttingDown => {
            println!("Shutdown acknowledged, waiting for daemon to exit...");
        }
        other => return Err(unexpected(other)),
    }

    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    while start.elapsed() < timeout {
        if !socket_path.exists()
            || IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(100))
                .await
                .is_err()
        {
            println!("Daemon stopped");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    anyhow::bail!("Timeout waiting for daemon to exit ({}s)", timeout_secs)
}

fn parse_pref_value(value: &str) -> PrefValue {
    match value {
        "true" => PrefValue::Bool(true),
        "false" => PrefValue::Bool(false),
        other => PrefValue::from(other),
    }
}

fn format_pref_value(value: &PrefValue) -> String {
    match value {
        PrefValue::Bool(b) => b.to_string(),
        PrefValue::Text(s) if s.is_empty() => "\"\"".to_string(),
        PrefValue::Text(s) => s.clone(),
    }
}

fn run_prefs(config: &Config, cmd: PrefsCommands) -> anyhow::Result<()> {
    let prefs = PreferenceStore::open(config.daemon.prefs_path())?;

    match cmd {
        PrefsCommands::List => {
            for (key, value) in prefs.entries() {
                println!("{} = {}", key, format_pref_value(&value));
            }
        }
        PrefsCommands::Get { key } => match prefs.get_opt(&key) {
            Some(value) => println!("{}", format_pref_value(&value)),
            None => anyhow::bail!("Preference not set: {}", key),
        },
        PrefsCommands::Set { key, value } => {
            prefs.set(&key, parse_pref_value(&value));
            prefs.save()?;
            if is_daemon_running() {
                println!("Saved; restart the daemon to apply it");
            }
        }
    }
    Ok(())
}

/// Run the daemon until a signal or a shutdown request arrives.
async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let _pid_file = PidFile::create(get_pid_file_path()).context("Failed to write PID file")?;

    let factory = Arc::new(ScriptWorkerFactory::new(config.worker.clone()));
    let context = meshtether::initialize(config, factory, Arc::new(TracingAlertSink))?;

    // Log service events.
    let mut events = context.machine().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ServiceEvent::StateChanged(state) => tracing::info!("Service state: {}", state),
                ServiceEvent::Progress { message } => tracing::info!("{}", message),
                ServiceEvent::ClientJoined(client) => {
                    tracing::debug!("Client event: {}", client.nice_label())
                }
                ServiceEvent::Error(kind) => tracing::error!("Service error: {}", kind),
            }
        }
    });

    let exit = CancellationToken::new();
    let server = IpcServer::bind(&get_socket_path())
        .await
        .context("Failed to bind control socket")?;
    let handler = Arc::new(ControlHandler::new(
        Arc::clone(context.machine()),
        Arc::clone(context.fanout()),
        exit.clone(),
    ));
    let server_task = tokio::spawn(run_control_server(server, handler, exit.clone()));

    tracing::info!("MeshTether daemon running");

    tokio::select! {
        result = wait_for_shutdown_signal() => result?,
        _ = exit.cancelled() => tracing::info!("Shutdown requested"),
    }

    exit.cancel();
    if let Err(e) = server_task.await {
        tracing::warn!("Control server task failed: {}", e);
    }

    meshtether::shutdown(context).await
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
    Ok(())
}
