//! Shardlord demo driver
//!
//! Brings up a coordinator and its workers on sequential ports, partitions
//! a demo table across them and keeps the cluster running until SIGINT or
//! SIGTERM, then tears everything down.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Parser;
use futures::FutureExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shardlord_core::cluster::{ClusterOrchestrator, NodeSummary};
use shardlord_core::engine::{Engine, PostgresConfig, PostgresEngine, SimulatedEngine};
use shardlord_core::error::{Result, ShardlordError};
use shardlord_core::{ClusterConfig, HashPartitioning, ScopeExit, ShutdownSignal};

const COORDINATOR_NAME: &str = "shardlord";
const DEMO_TABLE: &str = "pt";
const DEMO_KEY: &str = "id";

/// Local sharded Postgres cluster
#[derive(Parser, Debug)]
#[command(name = "shardlord")]
#[command(about = "Run a local sharded Postgres cluster until interrupted")]
struct Args {
    /// Coordinator port; workers take the ports after it
    #[arg(long, default_value_t = 5432)]
    base_port: u16,

    /// Number of workers
    #[arg(long, default_value_t = 3)]
    workers: usize,

    /// Parent directory of the node data directories
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Directory holding the Postgres binaries
    #[arg(long)]
    pg_bin: Option<PathBuf>,

    /// Database every node serves
    #[arg(long)]
    dbname: Option<String>,

    /// Log file, truncated at start
    #[arg(long, default_value = "/tmp/shmn.log")]
    log_file: PathBuf,

    /// Replication factor of the demo table
    #[arg(long, default_value_t = 2)]
    replicas: u32,

    /// Partitions of the demo table
    #[arg(long, default_value_t = 4)]
    partitions: u32,

    /// Use the in-process engine instead of real Postgres
    #[arg(long)]
    dry_run: bool,

    /// Print the node list as JSON
    #[arg(long)]
    json: bool,
}

/// What the driver brings up inside the scoped run
struct Plan {
    base_port: u16,
    workers: Vec<(String, u16)>,
    partitioning: HashPartitioning,
    json: bool,
}

impl Plan {
    fn from_args(args: &Args) -> Result<Self> {
        let last = u16::try_from(args.workers)
            .ok()
            .and_then(|w| args.base_port.checked_add(w))
            .ok_or_else(|| ShardlordError::InvalidConfig {
                reason: format!(
                    "{} workers after port {} exceed the port range",
                    args.workers, args.base_port
                ),
            })?;

        let workers = (1..=last - args.base_port)
            .map(|i| (format!("worker{}", i), args.base_port + i))
            .collect();

        Ok(Self {
            base_port: args.base_port,
            workers,
            partitioning: HashPartitioning::new(DEMO_TABLE, DEMO_KEY, args.partitions)
                .with_replication_factor(args.replicas),
            json: args.json,
        })
    }
}

fn init_logging(path: &Path) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match std::fs::File::create(path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(std::io::stderr)
                .init();
            warn!(path = %path.display(), error = %e, "Cannot open log file; logging to stderr");
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_file);

    info!(
        workers = args.workers,
        base_port = args.base_port,
        dry_run = args.dry_run,
        "Starting shardlord"
    );

    let mut config = ClusterConfig::from_env();
    config.planned_workers = args.workers;
    if let Some(dir) = &args.base_dir {
        config.base_dir = dir.clone();
    }
    if let Some(dbname) = &args.dbname {
        config.dbname = dbname.clone();
    }

    let plan = Plan::from_args(&args)?;

    let shutdown = ShutdownSignal::new();
    let _listener = shutdown.trigger_on_interrupt();

    let outcome = if args.dry_run {
        run(Arc::new(SimulatedEngine::new()), config, plan, &shutdown).await
    } else {
        let mut pg = PostgresConfig::from_env();
        if let Some(bin) = &args.pg_bin {
            pg.bin_dir = Some(bin.clone());
        }
        run(Arc::new(PostgresEngine::new(pg)), config, plan, &shutdown).await
    };

    match outcome {
        Ok(ScopeExit::Interrupted) | Ok(ScopeExit::Completed(())) => {
            info!("Cluster torn down");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Cluster run failed");
            eprintln!("shardlord: {}", e);
            Err(e.into())
        }
    }
}

async fn run<E: Engine>(
    engine: Arc<E>,
    config: ClusterConfig,
    plan: Plan,
    shutdown: &ShutdownSignal,
) -> Result<ScopeExit<()>> {
    let orchestrator = ClusterOrchestrator::new(engine, config)?;

    orchestrator
        .scoped(shutdown, move |cluster| {
            async move {
                bring_up(cluster, &plan).await?;
                report(&cluster.nodes(), plan.json)?;

                info!("Cluster up; waiting for interrupt");
                futures::future::pending::<()>().await;
                Ok::<_, ShardlordError>(())
            }
            .boxed()
        })
        .await
}

async fn bring_up<E: Engine>(cluster: &mut ClusterOrchestrator<E>, plan: &Plan) -> Result<()> {
    cluster
        .bootstrap_coordinator(COORDINATOR_NAME, plan.base_port)
        .await?;

    for (name, port) in &plan.workers {
        cluster.add_worker(name, *port).await?;
    }

    if let Some((first, _)) = plan.workers.first() {
        cluster
            .run_on_node(
                first,
                &format!(
                    "create table {} ({} int4 not null, payload float4)",
                    DEMO_TABLE, DEMO_KEY
                ),
            )
            .await?;
        cluster
            .run_on_node(
                first,
                &format!(
                    "insert into {} select i, i / 3.0 from generate_series(1, 10) i",
                    DEMO_TABLE
                ),
            )
            .await?;

        let result = cluster.partition_table(&plan.partitioning).await?;
        info!(table = DEMO_TABLE, result = %result.trim(), "Demo table partitioned");
    }

    Ok(())
}

fn report(nodes: &[NodeSummary], json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(nodes).map_err(|e| ShardlordError::Internal {
            message: format!("cannot serialize node list: {}", e),
        })?;
        println!("{}", text);
        return Ok(());
    }

    for node in nodes {
        println!(
            "{:<12} {:<11} localhost:{:<5} data: {}  log: {}",
            node.name,
            node.role.to_string(),
            node.port,
            node.data_directory.display(),
            node.log_file.display()
        );
    }
    Ok(())
}
