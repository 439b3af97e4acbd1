use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use rand::Rng;
use tracing_subscriber::EnvFilter;

use vgrid::config::{DiscoveryConfig, GsConfig, RmConfig};
use vgrid::discovery;
use vgrid::grpc::client;
use vgrid::gs::GridScheduler;
use vgrid::jobs::Job;
use vgrid::jobs::job::batch_to_proto;
use vgrid::rm::ResourceManager;
use vgrid::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "vgrid")]
#[command(about = "A distributed grid job scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a grid scheduler node
    Gs {
        /// Node id, used for election and mutex tie-breaking
        #[arg(long)]
        id: u64,

        /// Address to listen on for gRPC
        #[arg(long, default_value = "127.0.0.1:7101")]
        listen: SocketAddr,

        /// Address of the discovery service
        #[arg(long, default_value = "127.0.0.1:7000")]
        discovery: String,
    },
    /// Run a resource manager node
    Rm {
        /// Node id
        #[arg(long)]
        id: u64,

        /// Address to listen on for gRPC
        #[arg(long, default_value = "127.0.0.1:7201")]
        listen: SocketAddr,

        /// Address of the discovery service
        #[arg(long, default_value = "127.0.0.1:7000")]
        discovery: String,

        /// Size of the worker pool
        #[arg(long, default_value = "4")]
        workers: usize,
    },
    /// Run the discovery service
    Discovery {
        /// Address to listen on for gRPC
        #[arg(long, default_value = "127.0.0.1:7000")]
        listen: SocketAddr,
    },
    /// Submit jobs to a running node
    Submit {
        /// Target node address
        #[arg(long)]
        addr: String,

        /// Number of jobs to submit
        #[arg(long, default_value = "1")]
        count: usize,

        /// Job duration in seconds (0 picks a random 1-10s per job)
        #[arg(long, default_value = "0")]
        duration: u64,

        /// Whether the target is a grid scheduler or a resource manager
        #[arg(long = "type", value_enum, default_value = "gs")]
        target: SubmitTarget,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SubmitTarget {
    Gs,
    Rm,
}

const SUBMIT_RPC_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Gs {
            id,
            listen,
            discovery,
        } => {
            let config = GsConfig::new(id, listen, discovery);
            tracing::info!(
                node_id = config.node_id,
                listen_addr = %config.listen_addr,
                discovery = %config.discovery_addr,
                "Starting vgrid scheduler node"
            );
            let cancel = install_shutdown_handler();
            let (node, runner) = GridScheduler::new(config);
            node.run(runner, cancel).await?;
        }
        Commands::Rm {
            id,
            listen,
            discovery,
            workers,
        } => {
            let config = RmConfig::new(id, listen, discovery, workers);
            tracing::info!(
                node_id = config.node_id,
                listen_addr = %config.listen_addr,
                workers = config.workers,
                "Starting vgrid resource manager node"
            );
            let cancel = install_shutdown_handler();
            let (node, completed_rx) = ResourceManager::new(config);
            node.run(completed_rx, cancel).await?;
        }
        Commands::Discovery { listen } => {
            let config = DiscoveryConfig {
                listen_addr: listen,
                ..Default::default()
            };
            let cancel = install_shutdown_handler();
            discovery::serve(config, cancel).await?;
        }
        Commands::Submit {
            addr,
            count,
            duration,
            target,
        } => {
            let mut rng = rand::thread_rng();
            let jobs: Vec<Job> = (0..count)
                .map(|_| {
                    let secs = if duration == 0 {
                        rng.gen_range(1..=10)
                    } else {
                        duration
                    };
                    Job::new(rng.gen::<i64>(), secs)
                })
                .collect();
            let batch = batch_to_proto(&jobs);

            match target {
                SubmitTarget::Gs => {
                    client::add_jobs(&addr, batch, SUBMIT_RPC_TIMEOUT).await?;
                }
                SubmitTarget::Rm => {
                    client::add_job_rm(&addr, batch, SUBMIT_RPC_TIMEOUT).await?;
                }
            }
            println!("Submitted {} job(s) to {}", jobs.len(), addr);
            for job in &jobs {
                println!("  job {} ({}s)", job.id, job.duration_secs);
            }
        }
    }

    Ok(())
}
