//! chainspawn - spawn ephemeral blockchain test clusters on Kubernetes

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chainspawn::cluster::KubeCluster;
use chainspawn::deploy::DeploymentEngine;
use chainspawn::probe::{LivenessProbe, Target};
use chainspawn::topology::TopologyStore;
use chainspawn::{Result, DEFAULT_HEIGHT_TIMEOUT, DEFAULT_IMAGE, DEFAULT_NAMESPACE, DEFAULT_RPC_PORT};

/// Spawn ephemeral blockchain test clusters on Kubernetes and probe them
#[derive(Parser, Debug)]
#[command(name = "chainspawn", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Spawn a test cluster: a single dev node, or an alice/bob validator
    /// pair with `--validator`
    Spawn(SpawnArgs),

    /// Delete a cluster's namespace and forget its topology
    Clean(CleanArgs),

    /// Wait for a node's chain height to pass a target
    Singlenodeheight(HeightArgs),
}

#[derive(Parser, Debug)]
struct SpawnArgs {
    /// Chain name; doubles as the dev node's pod name
    chain: Option<String>,

    /// Node container image
    #[arg(long, default_value = DEFAULT_IMAGE)]
    image: String,

    /// RPC port the nodes expose
    #[arg(long, default_value_t = DEFAULT_RPC_PORT)]
    port: u16,

    /// Namespace to spawn into
    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Spawn the alice/bob validator pair instead of a single dev node
    #[arg(long)]
    validator: bool,

    /// Pod name for the single dev node (defaults to the chain name)
    #[arg(long)]
    node: Option<String>,
}

#[derive(Parser, Debug)]
struct CleanArgs {
    /// Namespace to delete (defaults to the tracked one)
    #[arg(long)]
    namespace: Option<String>,
}

#[derive(Parser, Debug)]
struct HeightArgs {
    /// Height the chain must strictly exceed
    #[arg(long)]
    height: u64,

    /// RPC port
    #[arg(long, default_value_t = DEFAULT_RPC_PORT)]
    port: u16,

    /// Probe this host directly instead of tunnelling to a pod
    #[arg(long)]
    url: Option<String>,

    /// Pod to probe (defaults to the first tracked node)
    #[arg(long)]
    pod: Option<String>,

    /// Namespace the pod lives in (defaults to the tracked one)
    #[arg(long)]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Spawn(args) => spawn(args).await,
        Commands::Clean(args) => clean(args).await,
        Commands::Singlenodeheight(args) => singlenodeheight(args).await,
    }
}

async fn spawn(args: SpawnArgs) -> Result<()> {
    let mut store = TopologyStore::open_default()?;
    let cluster = Arc::new(KubeCluster::connect().await?);
    let mut engine = DeploymentEngine::new(cluster, &mut store);

    if args.validator {
        let (alice, bob) = engine
            .create_alice_bob_nodes(&args.image, args.port, &args.namespace)
            .await?;
        for node in [&alice, &bob] {
            println!("{} ready at {}:{}", node.node_id, node.ip, node.port);
        }
    } else {
        let chain = args.chain.as_deref().unwrap_or("dev");
        let node_id = args.node.as_deref().unwrap_or(chain);
        let node = engine
            .spawn_dev(node_id, &args.image, args.port, &args.namespace)
            .await?;
        println!("{} ready at {}:{}", node.node_id, node.ip, node.port);
    }
    Ok(())
}

async fn clean(args: CleanArgs) -> Result<()> {
    let mut store = TopologyStore::open_default()?;
    let cluster = Arc::new(KubeCluster::connect().await?);
    let mut engine = DeploymentEngine::new(cluster, &mut store);
    engine.cleanup(args.namespace.as_deref()).await
}

async fn singlenodeheight(args: HeightArgs) -> Result<()> {
    let store = TopologyStore::open_default()?;

    let (probe, target) = match args.url {
        Some(url) => (
            LivenessProbe::direct(),
            Target::Url {
                url,
                port: args.port,
            },
        ),
        None => (
            LivenessProbe::with_cluster(Arc::new(KubeCluster::connect().await?)),
            Target::Pod {
                namespace: args.namespace,
                pod: args.pod,
                port: args.port,
            },
        ),
    };

    let height = probe
        .check_height(store.topology(), target, args.height, DEFAULT_HEIGHT_TIMEOUT)
        .await?;
    println!("chain height {} exceeds {}", height, args.height);
    Ok(())
}
