use clap::{Parser, ValueEnum};
use intake_core::{ConfirmationPolicy, ResubmitPolicy, SnapshotStorageConfig};
use intake_service::{
    build_router, spawn_event_logger, ConnectorProfile, ServiceConfig, ServiceState,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SnapshotStorageMode {
    Auto,
    Memory,
    File,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LedgerMode {
    Mock,
    RejectSignature,
    Stalled,
}

impl From<LedgerMode> for ConnectorProfile {
    fn from(mode: LedgerMode) -> Self {
        match mode {
            LedgerMode::Mock => ConnectorProfile::Mock,
            LedgerMode::RejectSignature => ConnectorProfile::RejectSignature,
            LedgerMode::Stalled => ConnectorProfile::Stalled,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "intaked", version, about = "Intake workflow REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8092
    #[arg(long, default_value = "127.0.0.1:8092", env = "INTAKE_LISTEN")]
    listen: SocketAddr,
    /// Workflow snapshot backend. `auto` picks file when a snapshot path is configured.
    #[arg(long, value_enum, default_value_t = SnapshotStorageMode::Auto, env = "INTAKE_SNAPSHOT_STORAGE")]
    snapshot_storage: SnapshotStorageMode,
    /// JSON file holding the persisted workflow snapshot.
    #[arg(long, env = "INTAKE_SNAPSHOT_PATH")]
    snapshot_path: Option<PathBuf>,
    /// Give up waiting for ledger confirmation after this many seconds.
    #[arg(long, default_value_t = 300, env = "INTAKE_CONFIRMATION_TIMEOUT_SECS")]
    confirmation_timeout_secs: u64,
    /// Interval between ledger confirmation polls.
    #[arg(long, default_value_t = 2000, env = "INTAKE_CONFIRMATION_POLL_MS")]
    confirmation_poll_ms: u64,
    /// Keep edits when an already completed section is submitted again.
    #[arg(long, default_value_t = false, env = "INTAKE_MERGE_ON_RESUBMIT")]
    merge_on_resubmit: bool,
    /// Signer and ledger pair used for the confirmation transaction.
    #[arg(long, value_enum, default_value_t = LedgerMode::Mock, env = "INTAKE_LEDGER")]
    ledger: LedgerMode,
}

fn resolve_snapshot_storage(cli: &Cli) -> anyhow::Result<SnapshotStorageConfig> {
    let storage = match cli.snapshot_storage {
        SnapshotStorageMode::Memory => SnapshotStorageConfig::memory(),
        SnapshotStorageMode::File => {
            let path = cli.snapshot_path.clone().ok_or_else(|| {
                anyhow::anyhow!(
                    "snapshot_storage=file requires --snapshot-path or INTAKE_SNAPSHOT_PATH"
                )
            })?;
            SnapshotStorageConfig::file(path)
        }
        SnapshotStorageMode::Auto => match &cli.snapshot_path {
            Some(path) => SnapshotStorageConfig::file(path.clone()),
            None => SnapshotStorageConfig::memory(),
        },
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("intake_service=info,intake_core=info,info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig {
        snapshot_storage: resolve_snapshot_storage(&cli)?,
        resubmit_policy: if cli.merge_on_resubmit {
            ResubmitPolicy::MergeAndSnapBack
        } else {
            ResubmitPolicy::SnapBack
        },
        confirmation: ConfirmationPolicy {
            poll_interval: Duration::from_millis(cli.confirmation_poll_ms),
            timeout: Duration::from_secs(cli.confirmation_timeout_secs),
        },
        connectors: cli.ledger.into(),
    };
    let state = ServiceState::bootstrap(config)?;
    let _event_logger = spawn_event_logger(&state.engine);
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(
        addr = %listener.local_addr()?,
        snapshot_backend = state.engine.snapshot_backend(),
        "intake-service REST listening"
    );

    axum::serve(listener, app).await?;
    state.engine.flush_snapshots().await;
    Ok(())
}
