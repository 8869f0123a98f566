// # devregd - Device Registry Daemon
//
// The devregd daemon is a thin integration layer around devreg-core. It is
// responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Building the device store through the store registry
// 4. Feeding home association messages into the AssociationListener
//
// Messages are read from stdin, one JSON body per line. Each line becomes a
// single-message batch whose message id is its line number. The daemon exits
// when stdin reaches EOF or on SIGINT/SIGTERM.
//
// ## Configuration
//
// - `DEVREG_STORE_TYPE`: Store type (file, memory). Default: file
// - `DEVREG_STORE_PATH`: Path to the table file (required for file)
// - `DEVREG_TABLE`: Table name. Default: devices
// - `DEVREG_STAGE`: Deployment stage label. Default: dev
// - `DEVREG_EVENT_CHANNEL_CAPACITY`: Listener event channel size. Default: 1000
// - `DEVREG_LOG_LEVEL`: trace, debug, info, warn, error. Default: info
//
// ## Example
//
// ```bash
// export DEVREG_STORE_PATH=/var/lib/devreg/devices.json
// echo '{"deviceId":"…","homeId":"home-2","action":"move"}' | devregd
// ```

use anyhow::Result;
use devreg_core::{
    AssociationListener, DeliveredMessage, ListenerConfig, ListenerEvent, MutationEngine,
    StoreConfig, StoreRegistry,
};
use std::env;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DevregExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DevregExitCode> for ExitCode {
    fn from(code: DevregExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    store_type: String,
    store_path: Option<String>,
    table: String,
    stage: String,
    event_channel_capacity: usize,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let event_channel_capacity = match env::var("DEVREG_EVENT_CHANNEL_CAPACITY") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                anyhow::anyhow!(
                    "DEVREG_EVENT_CHANNEL_CAPACITY must be a positive integer. Got: {}",
                    raw
                )
            })?,
            Err(_) => ListenerConfig::default().event_channel_capacity,
        };

        Ok(Self {
            store_type: env::var("DEVREG_STORE_TYPE").unwrap_or_else(|_| "file".to_string()),
            store_path: env::var("DEVREG_STORE_PATH").ok(),
            table: env::var("DEVREG_TABLE").unwrap_or_else(|_| "devices".to_string()),
            stage: env::var("DEVREG_STAGE").unwrap_or_else(|_| "dev".to_string()),
            event_channel_capacity,
            log_level: env::var("DEVREG_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.store_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "DEVREG_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.store_type
            ),
        }

        if self.store_type == "file" {
            let Some(ref path) = self.store_path else {
                anyhow::bail!(
                    "DEVREG_STORE_PATH is required when DEVREG_STORE_TYPE=file. \
                    Set it via: export DEVREG_STORE_PATH=/var/lib/devreg/devices.json"
                );
            };

            if path.is_empty() {
                anyhow::bail!("DEVREG_STORE_PATH cannot be empty when DEVREG_STORE_TYPE=file");
            }
        }

        if self.table.is_empty() {
            anyhow::bail!("DEVREG_TABLE cannot be empty");
        }

        if self.event_channel_capacity == 0 {
            anyhow::bail!("DEVREG_EVENT_CHANNEL_CAPACITY must be greater than 0");
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DEVREG_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn store_config(&self) -> StoreConfig {
        match (self.store_type.as_str(), &self.store_path) {
            ("file", Some(path)) => StoreConfig::File {
                path: path.clone(),
                table: self.table.clone(),
            },
            _ => StoreConfig::Memory,
        }
    }

    fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            event_channel_capacity: self.event_channel_capacity,
        }
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DevregExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DevregExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DevregExitCode::ConfigError.into();
    }

    info!(stage = %config.stage, table = %config.table, "Starting devregd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DevregExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => DevregExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                DevregExitCode::RuntimeError
            }
        }
    });

    // A blocking stdin read may still be pending after a signal
    rt.shutdown_timeout(Duration::from_secs(1));
    code.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let registry = StoreRegistry::with_builtin_stores();
    let store_config = config.store_config();
    info!("Store type: {}", store_config.type_name());

    let store = registry.create_store(&store_config).await?;
    let engine = MutationEngine::new(store);
    let (listener, event_rx) = AssociationListener::new(engine, config.listener_config())?;

    let log_task = tokio::spawn(log_events(event_rx));

    // One batch per stdin line; the channel closes at EOF
    let (batch_tx, batch_rx) = mpsc::channel(16);
    let reader_task = tokio::spawn(read_stdin(batch_tx));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let signal_task = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling error: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    info!("Ready to receive home association messages");
    let summary = listener
        .run(ReceiverStream::new(batch_rx), shutdown_rx)
        .await?;

    signal_task.abort();
    reader_task.abort();
    // Dropping the listener closes the event channel so the log task drains and exits
    drop(listener);
    let _ = log_task.await;

    info!(
        batches = summary.batches,
        processed = summary.processed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Shutting down daemon"
    );
    Ok(())
}

/// Forward stdin lines as single-message batches
async fn read_stdin(batch_tx: mpsc::Sender<Vec<DeliveredMessage>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number: u64 = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                line_number += 1;
                if line.trim().is_empty() {
                    continue;
                }
                let message = DeliveredMessage::new(line_number.to_string(), line);
                if batch_tx.send(vec![message]).await.is_err() {
                    debug!("Listener stopped, no longer reading stdin");
                    break;
                }
            }
            Ok(None) => {
                info!(lines = line_number, "Reached end of input");
                break;
            }
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
}

/// Log listener events until the channel closes
async fn log_events(mut event_rx: mpsc::Receiver<ListenerEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            ListenerEvent::MessageApplied {
                message_id,
                device_id,
                home_id,
            } => info!(%message_id, %device_id, %home_id, "Home association applied"),
            ListenerEvent::MessageFailed {
                message_id,
                error,
                retryable,
            } => warn!(%message_id, retryable, "Message failed: {}", error),
            other => debug!("Listener event: {:?}", other),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
