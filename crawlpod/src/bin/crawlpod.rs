use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crawlpod::config::Config;
use crawlpod::orchestrator::{self, Role};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the orchestrator: clears zombie locks, seeds the frontier,
    /// spawns fetcher/parser processes and pins them to cores, and watches
    /// for a stopping condition.
    Orchestrate {
        #[clap(long)]
        config: PathBuf,
    },

    /// Run a single fetcher process. Spawned internally by the
    /// orchestrator; not normally invoked directly.
    Fetcher {
        #[clap(long)]
        config: PathBuf,
        #[clap(long = "pod-id")]
        pod_id: usize,
        #[clap(long)]
        index: usize,
    },

    /// Run a single parser process. Spawned internally by the
    /// orchestrator; not normally invoked directly.
    Parser {
        #[clap(long)]
        config: PathBuf,
        #[clap(long = "pod-id")]
        pod_id: usize,
        #[clap(long)]
        index: usize,
    },
}

/// Rotating file appender under `log_dir/pod_{k}/{role}.log`, capped near
/// 100 MiB x 5 per §6, in addition to the usual stderr stream.
fn init_logging(log_dir: &std::path::Path, pod_id: usize, role: &str) -> tracing_appender::non_blocking::WorkerGuard {
    let dir = log_dir.join(format!("pod_{pod_id}"));
    let _ = std::fs::create_dir_all(&dir);
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(role)
        .filename_suffix("log")
        .max_log_files(5)
        .build(&dir)
        .expect("failed to build rotating log file appender");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    guard
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match args.command {
        Commands::Orchestrate { config } => {
            let config = Config::load(&config)?;
            let _guard = init_logging(&config.log_dir, 0, "orchestrator");
            runtime.block_on(orchestrator::run(config))
        }
        Commands::Fetcher { config, pod_id, index } => {
            let config = Config::load(&config)?;
            let _guard = init_logging(&config.log_dir, pod_id, &format!("fetcher_{index}"));
            runtime.block_on(orchestrator::run_child(config, Role::Fetcher, pod_id, index))
        }
        Commands::Parser { config, pod_id, index } => {
            let config = Config::load(&config)?;
            let _guard = init_logging(&config.log_dir, pod_id, &format!("parser_{index}"));
            runtime.block_on(orchestrator::run_child(config, Role::Parser, pod_id, index))
        }
    }
}
