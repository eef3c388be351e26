//! kubeseek - cluster health monitor daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kubeseek::config::{
    DEFAULT_APPLICATION_LOG_PATH, DEFAULT_CONCURRENCY, DEFAULT_LISTEN_ADDR,
    DEFAULT_LOG_TAIL_LINES, DEFAULT_NAMESPACE_PREFIX, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_QUERY_TIMEOUT_SECS,
};
use kubeseek::{
    server, ClusterQuery, KubeCluster, KubectlCluster, MonitorConfig, Scheduler, ServerConfig,
    SnapshotStore, StatusFacade, TimeoutCluster,
};

/// How the monitor talks to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Kubernetes API via the ambient kubeconfig or service account.
    Kube,
    /// Shell out to `kubectl`.
    Kubectl,
}

/// Cluster health monitor: node readiness, namespace pod phases and pod log signatures.
#[derive(Parser)]
#[command(name = "kubeseek")]
#[command(version, about)]
struct Cli {
    /// Only namespaces starting with this prefix are monitored.
    #[arg(long, env = "KUBESEEK_NAMESPACE_PREFIX", default_value = DEFAULT_NAMESPACE_PREFIX)]
    namespace_prefix: String,

    /// Seconds to sleep between cycles.
    #[arg(long, env = "KUBESEEK_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    interval_secs: u64,

    /// Lines read from the end of each log.
    #[arg(long, env = "KUBESEEK_LOG_TAIL_LINES", default_value_t = DEFAULT_LOG_TAIL_LINES)]
    log_tail_lines: u32,

    /// Maximum probes or inspections in flight per stage.
    #[arg(long, env = "KUBESEEK_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Deadline for each cluster query, in seconds.
    #[arg(long, env = "KUBESEEK_QUERY_TIMEOUT_SECS", default_value_t = DEFAULT_QUERY_TIMEOUT_SECS)]
    query_timeout_secs: u64,

    /// Deadline for each probe or pod inspection, in seconds.
    #[arg(long, env = "KUBESEEK_TASK_TIMEOUT_SECS")]
    task_timeout_secs: Option<u64>,

    /// Deadline for a whole cycle, in seconds.
    #[arg(long, env = "KUBESEEK_CYCLE_TIMEOUT_SECS")]
    cycle_timeout_secs: Option<u64>,

    /// Application log file read inside each container.
    #[arg(long, env = "KUBESEEK_APPLICATION_LOG_PATH", default_value = DEFAULT_APPLICATION_LOG_PATH)]
    application_log_path: String,

    /// HTTP listen address.
    #[arg(long, env = "KUBESEEK_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
    listen: SocketAddr,

    /// Cluster backend.
    #[arg(long, env = "KUBESEEK_BACKEND", value_enum, default_value_t = Backend::Kube)]
    backend: Backend,

    /// kubeconfig context for the kubectl backend.
    #[arg(long, env = "KUBESEEK_KUBECTL_CONTEXT")]
    kubectl_context: Option<String>,

    /// kubectl binary for the kubectl backend.
    #[arg(long, env = "KUBESEEK_KUBECTL", default_value = kubeseek::cluster::kubectl::DEFAULT_KUBECTL)]
    kubectl: String,

    /// Enable debug logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, env = "KUBESEEK_LOG_JSON", default_value = "false")]
    log_json: bool,
}

impl Cli {
    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::default()
            .with_namespace_prefix(&self.namespace_prefix)
            .with_poll_interval(Duration::from_secs(self.interval_secs))
            .with_log_tail_lines(self.log_tail_lines)
            .with_concurrency(self.concurrency)
            .with_query_timeout(Duration::from_secs(self.query_timeout_secs))
            .with_task_timeout(self.task_timeout_secs.map(Duration::from_secs))
            .with_cycle_timeout(self.cycle_timeout_secs.map(Duration::from_secs))
            .with_application_log_path(&self.application_log_path)
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "kubeseek=debug,info" } else { "kubeseek=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_cluster(cli: &Cli, config: &MonitorConfig) -> Result<Arc<dyn ClusterQuery>> {
    let cluster: Arc<dyn ClusterQuery> = match cli.backend {
        Backend::Kube => {
            let kube = KubeCluster::try_default(&config.application_log_path)
                .await
                .context("Failed to create Kubernetes client")?;
            Arc::new(TimeoutCluster::new(kube, config.query_timeout))
        }
        Backend::Kubectl => {
            let kubectl = KubectlCluster::new(&config.application_log_path)
                .with_binary(&cli.kubectl)
                .with_context(cli.kubectl_context.clone());
            Arc::new(TimeoutCluster::new(kubectl, config.query_timeout))
        }
    };
    Ok(cluster)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = cli.monitor_config();
    config.validate().context("Invalid configuration")?;
    let server_config = ServerConfig {
        listen_addr: cli.listen,
    };

    let cluster = build_cluster(&cli, &config).await?;
    info!(
        backend = cluster.name(),
        prefix = %config.namespace_prefix,
        listen = %server_config.listen_addr,
        "Starting kubeseek"
    );

    let store = Arc::new(SnapshotStore::new());
    let facade = Arc::new(StatusFacade::new(Arc::clone(&store)));
    let scheduler = Scheduler::new(cluster, config, store);
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind(server_config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", server_config.listen_addr))?;

    let mut scheduler_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });

    let mut server_handle = tokio::spawn(server::serve(listener, facade, shutdown.clone()));

    tokio::select! {
        () = async { tokio::signal::ctrl_c().await.ok(); } => {
            info!("Received SIGINT, shutting down");
        }
        result = &mut scheduler_handle => {
            if let Err(e) = result {
                error!(error = %e, "Scheduler task panicked");
            }
            warn!("Scheduler exited");
        }
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
                Ok(Ok(())) => warn!("HTTP server exited"),
            }
        }
    }

    shutdown.cancel();
    if !scheduler_handle.is_finished() {
        scheduler_handle.await.ok();
    }
    if !server_handle.is_finished() {
        server_handle.await.ok();
    }

    info!("kubeseek stopped");
    Ok(())
}
