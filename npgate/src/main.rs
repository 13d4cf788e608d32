//! npgate: admission webhook and controllers gating NetworkPolicy changes
//! behind CSR-based approval.
//!
//! Startup order: configuration, logging, metrics, store, admin server,
//! controllers, webhook listener. SIGINT/SIGTERM begin a graceful shutdown
//! that stops the listeners and controllers and drains in-flight reviews.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use npgate::admin::{AdminServer, AdminServerConfig};
use npgate::controller::{Context, run_request_controller, run_sweeper};
use npgate::error::ServerError;
use npgate::kube_store::KubeStore;
use npgate::ports::{admin_port, webhook_port};
use npgate::webhook::{WebhookState, webhook_router};
use npgate_core::config::{CONFIG_ENV_VAR, load_or_default};
use npgate_core::lifecycle::{DrainResult, LifecycleConfig, LifecycleManager};
use npgate_core::store::ApprovalStore;
use npgate_core::telemetry::GateMetrics;
use npgate_core::{AdmissionGate, BoundedStore, GrantMaterializer, MemoryStore, OrphanSweeper};

/// Time allowed for the controllers to stop after the listeners close.
const CONTROLLER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Command-line options.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    /// If not specified, searches: NPGATE_CONFIG env, /etc/npgate/config.yaml, ./config.yaml
    #[arg(long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Bind address for the webhook and admin listeners
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Keep approval state in memory instead of the Kubernetes API.
    /// Requests can only be granted through the store's own helpers, so this
    /// is for local smoke runs of the webhook path.
    #[arg(long)]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Configuration comes first so its log level can seed the filter.
    let (config, source, validation) = load_or_default(cli.config.as_deref())?;

    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .init();

    match &source {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => warn!("No configuration file found, using default values"),
    }
    for warning in &validation.warnings {
        warn!(warning = %warning, "Configuration warning");
    }

    let config = Arc::new(config);
    let lifecycle = Arc::new(LifecycleManager::new(LifecycleConfig::default()));
    lifecycle.mark_config_loaded();
    let shutdown = lifecycle.shutdown_token();
    setup_signal_handlers(lifecycle.clone());

    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = Arc::new(GateMetrics::new(&mut registry));
    let registry = Arc::new(registry);

    // Store
    let client = if cli.memory_store {
        None
    } else {
        Some(kube::Client::try_default().await.map_err(ServerError::Kube)?)
    };
    let backend: Arc<dyn ApprovalStore> = match &client {
        Some(client) => Arc::new(KubeStore::new(client.clone())),
        None => {
            warn!("Using in-memory approval store; state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    let store = BoundedStore::new(backend, config.store.timeout);

    let gate = AdmissionGate::new(store.clone(), config.clone()).with_metrics(metrics.clone());
    let sweeper = OrphanSweeper::new(store.clone()).with_metrics(metrics.clone());

    // Admin server
    let admin = AdminServer::new(
        lifecycle.clone(),
        registry,
        AdminServerConfig {
            port: admin_port(),
            bind_addr: cli.bind.clone(),
        },
    );
    let admin_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = admin.run(admin_shutdown).await {
            error!(error = %e, "Admin server error");
        }
    });

    lifecycle.check_store(&store).await;
    if let Some(err) = lifecycle.store_error() {
        warn!(store = store.name(), error = %err, "Approval store not reachable yet");
    }
    lifecycle.spawn_store_health_checker(store.clone());

    // Controllers
    let mut controllers = Vec::new();
    match client {
        Some(client) => {
            let ctx = Arc::new(Context {
                materializer: GrantMaterializer::new(store.clone(), config.clone())
                    .with_metrics(metrics.clone()),
                config: config.clone(),
                metrics: Some(metrics.clone()),
            });
            controllers.push(tokio::spawn(run_request_controller(
                client,
                ctx,
                shutdown.clone(),
            )));
        }
        None => info!("Request controller disabled with the in-memory store"),
    }
    controllers.push(tokio::spawn(run_sweeper(
        sweeper,
        config.reconcile.sweep_interval,
        shutdown.clone(),
        Some(metrics.clone()),
    )));
    lifecycle.mark_controllers_started();

    // Webhook listener
    let addr = format!("{}:{}", cli.bind, webhook_port());
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!(
        addr = %addr,
        admin_port = admin_port(),
        store = store.name(),
        prefix = %config.naming.prefix,
        excluded_namespaces = ?config.admission.excluded_namespaces,
        "npgate starting"
    );
    lifecycle.mark_ready();

    let router = webhook_router(WebhookState {
        gate,
        lifecycle: lifecycle.clone(),
    });
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .map_err(ServerError::Serve)?;

    info!(
        active_requests = lifecycle.active_request_count(),
        drain_timeout_secs = lifecycle.config().drain_timeout.as_secs(),
        "Waiting for active requests to drain"
    );
    let drain_result = lifecycle.drain_requests().await;

    for handle in controllers {
        if tokio::time::timeout(CONTROLLER_STOP_TIMEOUT, handle)
            .await
            .is_err()
        {
            warn!("Controller did not stop in time");
        }
    }

    lifecycle.mark_stopped();

    match drain_result {
        DrainResult::Complete => {
            info!("All requests drained, shutting down cleanly");
            Ok(())
        }
        DrainResult::Timeout { remaining } => {
            Err(format!("Drain timeout exceeded with {remaining} remaining requests").into())
        }
    }
}

/// SIGINT and SIGTERM both begin a graceful shutdown.
fn setup_signal_handlers(lifecycle: Arc<LifecycleManager>) {
    let lifecycle_sigint = lifecycle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT, initiating graceful shutdown");
                lifecycle_sigint.begin_shutdown();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
                lifecycle.begin_shutdown();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
        }
    });

    #[cfg(not(unix))]
    let _ = lifecycle;
}
