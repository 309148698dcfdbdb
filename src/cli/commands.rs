//! CLI command definitions for genfleet.
//!
//! `run` is the worker process deployed to every pod; `stats` and `remove`
//! are operator tools that talk to the same store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::autoscaler::{namespace_load, FleetAutoscaler, FleetLoad};
use crate::clock::{epoch_seconds, Clock, SystemClock};
use crate::config::{AppConfig, StoreBackend};
use crate::metrics::init_metrics;
use crate::orchestrator::{KubernetesProbe, LocalProbe, PodLivenessProbe};
use crate::scheduler::job_id::known_namespaces;
use crate::scheduler::{
    install_shutdown_handler, request_removal, HttpJobHandler, JobExecutor, JobScheduler,
    StoreBackedExecutor,
};
use crate::store::{JobStore, MemoryJobStore, RedisJobStore};

/// Delay before a failed loop is started again.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Distributed job scheduler and fleet autoscaler for generator workers.
#[derive(Parser)]
#[command(name = "genfleet")]
#[command(about = "Run generator workers that share a job queue and scale their own deployment")]
#[command(version)]
#[command(
    long_about = "genfleet runs inside every worker pod. Each pod claims jobs from a shared store, heartbeats them while they run and recovers jobs abandoned by dead pods. The oldest pod also resizes the deployment to match the queue.\n\nConfiguration is read from the environment (JOB_NAMESPACES, REDIS_URL, AUTO_SCALE_*...).\n\nExample usage:\n  genfleet run --namespace summarizer --namespace bounded_context\n  genfleet stats --all\n  genfleet remove summ-1700000000000-k3j9"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error). Overrides LOG_LEVEL.
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the worker: job scheduler plus, when enabled, the autoscaler.
    Run(RunArgs),

    /// Show queue load per namespace and the replica count it calls for.
    Stats(StatsArgs),

    /// Request removal of a job.
    #[command(alias = "rm")]
    Remove(RemoveArgs),
}

/// Arguments for `genfleet run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Namespace to serve; repeatable. Overrides JOB_NAMESPACES.
    #[arg(short = 'n', long = "namespace")]
    pub namespaces: Vec<String>,

    /// Disable the autoscaler regardless of environment.
    #[arg(long)]
    pub no_autoscale: bool,
}

/// Arguments for `genfleet stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Namespace to inspect; repeatable. Overrides JOB_NAMESPACES.
    #[arg(short = 'n', long = "namespace")]
    pub namespaces: Vec<String>,

    /// Inspect every known namespace.
    #[arg(long, conflicts_with = "namespaces")]
    pub all: bool,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `genfleet remove`.
#[derive(Parser, Debug)]
pub struct RemoveArgs {
    /// Id of the job to remove.
    pub job_id: String,
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Run(args) => run_worker_command(config, args).await,
        Commands::Stats(args) => run_stats_command(config, args).await,
        Commands::Remove(args) => run_remove_command(config, args).await,
    }
}

fn apply_namespaces(config: AppConfig, namespaces: Vec<String>) -> anyhow::Result<AppConfig> {
    if namespaces.is_empty() {
        return Ok(config);
    }
    let config = config.with_namespaces(namespaces);
    config.validate()?;
    Ok(config)
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    let store: Arc<dyn JobStore> = match config.store_backend {
        StoreBackend::Redis => Arc::new(
            RedisJobStore::connect(&config.redis_url, &config.store_key_prefix)
                .await
                .with_context(|| format!("Failed to connect to {}", config.redis_url))?,
        ),
        StoreBackend::Memory => {
            warn!("Using in-memory store; jobs are not shared with other pods");
            Arc::new(MemoryJobStore::new())
        }
    };
    Ok(store)
}

fn build_probe(config: &AppConfig) -> anyhow::Result<Arc<dyn PodLivenessProbe>> {
    if config.is_local_run {
        return Ok(Arc::new(LocalProbe::new(config.pod_id.clone())));
    }
    let probe = KubernetesProbe::in_cluster(config.k8s_namespace.clone())
        .context("Failed to set up Kubernetes access (set IS_LOCAL_RUN=true outside the cluster)")?;
    Ok(Arc::new(probe))
}

// ============================================================================
// Run Command Implementation
// ============================================================================

async fn run_worker_command(config: AppConfig, args: RunArgs) -> anyhow::Result<()> {
    let config = apply_namespaces(config, args.namespaces)?;
    let autoscale = config.autoscaler_enabled() && !args.no_autoscale;

    init_metrics().context("Failed to initialize metrics")?;

    let endpoint = config
        .workflow_endpoint
        .clone()
        .context("WORKFLOW_ENDPOINT must be set to run jobs")?;

    // One store and one probe per process, shared by every loop and restart.
    let store = build_store(&config).await?;
    let probe = build_probe(&config)?;
    let executor: Arc<dyn JobExecutor> = Arc::new(StoreBackedExecutor::new(
        Arc::clone(&store),
        HttpJobHandler::new(endpoint)?,
    ));

    let shutdown = CancellationToken::new();
    install_shutdown_handler(shutdown.clone());

    info!(
        pod_id = %config.pod_id,
        namespaces = ?config.namespaces,
        store = %config.store_backend,
        autoscale,
        "Starting worker"
    );

    let autoscaler = if autoscale {
        let (config, store, probe, stop) = (
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&probe),
            shutdown.clone(),
        );
        Some(tokio::spawn(async move {
            supervise_autoscaler(config, store, probe, stop).await
        }))
    } else {
        info!(
            is_local_run = config.is_local_run,
            environment = ?config.environment,
            "Autoscaler disabled"
        );
        None
    };

    let result = supervise_scheduler(&config, store, probe, executor, shutdown.clone()).await;

    shutdown.cancel();
    if let Some(task) = autoscaler {
        if let Err(e) = task.await {
            warn!(error = %e, "Autoscaler task ended abnormally");
        }
    }

    result
}

/// Runs the scheduler until it drains, starting a fresh one after a failure.
async fn supervise_scheduler(
    config: &AppConfig,
    store: Arc<dyn JobStore>,
    probe: Arc<dyn PodLivenessProbe>,
    executor: Arc<dyn JobExecutor>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut restarts = 0u32;

    loop {
        let mut scheduler = JobScheduler::new(
            config.scheduler_config(),
            Arc::clone(&store),
            Arc::clone(&probe),
            Arc::clone(&executor),
        )?
        .with_shutdown_token(shutdown.clone());

        let outcome = tokio::spawn(async move { scheduler.run().await }).await;

        match outcome {
            Ok(Ok(())) => {
                info!(restart_count = restarts, "Worker drained, exiting");
                return Ok(());
            }
            Ok(Err(e)) => error!(restart_count = restarts, error = %e, "Scheduler failed"),
            Err(e) => error!(restart_count = restarts, error = %e, "Scheduler task panicked"),
        }

        if shutdown.is_cancelled() {
            return Err(anyhow::anyhow!("Scheduler failed during shutdown"));
        }

        restarts += 1;
        warn!(restart_count = restarts, "Restarting scheduler");
        tokio::time::sleep(RESTART_DELAY).await;
    }
}

/// Runs the autoscaler until `stop` fires, restarting it after a failure.
async fn supervise_autoscaler(
    config: AppConfig,
    store: Arc<dyn JobStore>,
    probe: Arc<dyn PodLivenessProbe>,
    stop: CancellationToken,
) {
    let mut restarts = 0u32;

    loop {
        let mut autoscaler = match FleetAutoscaler::new(
            config.autoscaler_config(),
            Arc::clone(&store),
            Arc::clone(&probe),
        ) {
            Ok(autoscaler) => autoscaler,
            Err(e) => {
                error!(error = %e, "Invalid autoscaler configuration, autoscaling disabled");
                return;
            }
        };

        let token = stop.clone();
        match tokio::spawn(async move { autoscaler.run(token).await }).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => error!(restart_count = restarts, error = %e, "Autoscaler failed"),
            Err(e) => error!(restart_count = restarts, error = %e, "Autoscaler task panicked"),
        }

        restarts += 1;
        warn!(restart_count = restarts, "Restarting autoscaler");
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(RESTART_DELAY) => {}
        }
    }
}

// ============================================================================
// Stats Command Implementation
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct NamespaceStats {
    namespace: String,
    #[serde(flatten)]
    load: FleetLoad,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsOutput {
    namespaces: Vec<NamespaceStats>,
    total: FleetLoad,
    desired_replicas: u32,
    min_replicas: u32,
    max_replicas: u32,
}

async fn run_stats_command(config: AppConfig, args: StatsArgs) -> anyhow::Result<()> {
    let namespaces: Vec<String> = if args.all {
        known_namespaces().map(str::to_string).collect()
    } else if args.namespaces.is_empty() {
        config.namespaces.clone()
    } else {
        args.namespaces.clone()
    };
    let config = apply_namespaces(config, namespaces.clone())?;

    let store = build_store(&config).await?;
    let now = epoch_seconds(SystemClock.now());

    let mut rows = Vec::with_capacity(namespaces.len());
    let mut total = FleetLoad::default();
    for namespace in namespaces {
        let load = namespace_load(store.as_ref(), &namespace, config.heartbeat_timeout, now)
            .await
            .with_context(|| format!("Failed to read queue of {}", namespace))?;
        total = total.merge(load);
        rows.push(NamespaceStats { namespace, load });
    }

    let output = StatsOutput {
        desired_replicas: config
            .scaling
            .desired_replicas(total.waiting, total.processing),
        min_replicas: config.scaling.min_replicas,
        max_replicas: config.scaling.max_replicas,
        namespaces: rows,
        total,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "{:<32} {:>8} {:>11} {:>7}",
        "NAMESPACE", "WAITING", "PROCESSING", "FAILED"
    );
    for row in &output.namespaces {
        println!(
            "{:<32} {:>8} {:>11} {:>7}",
            row.namespace, row.load.waiting, row.load.processing, row.load.failed
        );
    }
    println!(
        "{:<32} {:>8} {:>11} {:>7}",
        "TOTAL", output.total.waiting, output.total.processing, output.total.failed
    );
    println!(
        "\nDesired replicas: {} (bounds {}..={})",
        output.desired_replicas, output.min_replicas, output.max_replicas
    );

    Ok(())
}

// ============================================================================
// Remove Command Implementation
// ============================================================================

async fn run_remove_command(config: AppConfig, args: RemoveArgs) -> anyhow::Result<()> {
    let store = build_store(&config).await?;
    let namespace = request_removal(store.as_ref(), &args.job_id).await?;

    info!(job_id = %args.job_id, namespace = %namespace, "Removal requested");
    println!("Removal requested for {} ({})", args.job_id, namespace);
    Ok(())
}
