use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use frpo_kubehub::{spawn_watchers, KubeStore};
use frpo_queue::{spawn_trigger_pump, spawn_workers, WorkQueue};
use frpo_reconcile::{ArtifactPolicy, EngineSettings, Reconciler};
use frpo_reload::HttpReloader;
use frpo_render::DEFAULT_IMAGE;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod offline;

#[derive(Parser, Debug)]
#[command(name = "frpo", version, about = "Operator for frpc tunnel clients")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch Clients and Upstreams and reconcile their frpc workers
    Run(RunArgs),
    /// Render the frpc.ini for a Client manifest without a cluster
    Render {
        /// Client manifest (YAML)
        #[arg(long = "client")]
        client: PathBuf,
        /// Upstream manifests (YAML, multi-document allowed)
        #[arg(long = "upstreams", num_args = 1..)]
        upstreams: Vec<PathBuf>,
        /// Secret value as ns/name/key=value
        #[arg(long = "secret")]
        secrets: Vec<String>,
    },
    /// Print the Client and Upstream CRDs as YAML
    Crds,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Concurrent reconcile workers
    #[arg(long, env = "FRPO_WORKERS", default_value_t = 2)]
    workers: usize,
    /// Restrict watches and listings to one namespace (default: all)
    #[arg(long, env = "FRPO_NAMESPACE")]
    namespace: Option<String>,
    /// frpc container image for worker pods
    #[arg(long, env = "FRPO_IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,
    #[arg(long, env = "FRPO_STEADY_REQUEUE_SECS", default_value_t = 30)]
    steady_requeue_secs: u64,
    #[arg(long, env = "FRPO_NOT_READY_REQUEUE_SECS", default_value_t = 10)]
    not_ready_requeue_secs: u64,
    /// Wait after creating a worker pod before observing it again
    #[arg(long, env = "FRPO_SETTLE_SECS", default_value_t = 10)]
    settle_secs: u64,
    /// Timeout per admin API call
    #[arg(long, env = "FRPO_RELOAD_TIMEOUT_SECS", default_value_t = 10)]
    reload_timeout_secs: u64,
    /// Replace the stored ConfigMap after a successful reload
    #[arg(long, env = "FRPO_WRITE_BACK", action = ArgAction::SetTrue)]
    write_back: bool,
    /// Work queue capacity; beyond it the oldest pending key is evicted and retried a second later
    #[arg(long, env = "FRPO_QUEUE_CAP", default_value_t = 2048)]
    queue_cap: usize,
}

impl RunArgs {
    fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            image: self.image.clone(),
            steady_requeue: Duration::from_secs(self.steady_requeue_secs),
            not_ready_requeue: Duration::from_secs(self.not_ready_requeue_secs),
            settle_delay: Duration::from_secs(self.settle_secs),
            artifact_policy: if self.write_back { ArtifactPolicy::WriteBack } else { ArtifactPolicy::CompareOnly },
        }
    }
}

fn init_tracing() {
    let env = std::env::var("FRPO_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FRPO_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid FRPO_METRICS_ADDR; expected host:port");
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let settings = args.engine_settings();
    info!(workers = args.workers, ns = ?args.namespace, image = %settings.image, policy = ?settings.artifact_policy, "starting operator");

    let client = frpo_kubehub::get_kube_client().await?;
    let store = Arc::new(KubeStore::new(client.clone(), args.namespace.clone()));
    let reloader = Arc::new(
        HttpReloader::new(Duration::from_secs(args.reload_timeout_secs)).context("building admin api client")?,
    );
    let engine = Arc::new(Reconciler::new(store, reloader, settings));

    let queue = Arc::new(WorkQueue::with_capacity(args.queue_cap));
    let (tx, rx) = mpsc::channel(args.queue_cap.max(1));
    let watchers = spawn_watchers(client, args.namespace.as_deref(), tx);
    let pump = spawn_trigger_pump(rx, Arc::clone(&queue));

    let cancel = CancellationToken::new();
    let workers = spawn_workers(Arc::clone(&queue), args.workers, engine, cancel.clone());

    signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    cancel.cancel();
    queue.shutdown();
    for w in watchers {
        w.abort();
    }
    pump.abort();
    for w in workers {
        if let Err(e) = w.await {
            warn!(error = %e, "worker task failed");
        }
    }
    info!(dropped = queue.dropped(), "operator stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_metrics();
            run(args).await?;
        }
        Commands::Render { client, upstreams, secrets } => {
            let ini = offline::render_files(&client, &upstreams, &secrets)?;
            print!("{ini}");
        }
        Commands::Crds => print!("{}", offline::crds_yaml()?),
    }
    Ok(())
}
