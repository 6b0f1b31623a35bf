//! Pipeline CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Declarative pipeline runner", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline locally
    Run {
        /// Pipeline config: a file path or an http(s) URL
        #[arg(short, long, env = "PIPELINE_CONFIG")]
        config: Option<String>,
        /// Override the pipeline workdir
        #[arg(short, long, env = "PIPELINE_WORKDIR")]
        workdir: Option<String>,
        /// Environment variables forwarded into the run
        #[arg(long = "allow-env", env = "ALLOW_ENV", value_delimiter = ',')]
        allow_env: Vec<String>,
        /// Forward the entire environment into the run
        #[arg(long, env = "ALLOW_ALL_ENV", default_value_t = false)]
        allow_all_env: bool,
    },
    /// Submit a pipeline to a server and stream its output
    Client {
        /// Server address, e.g. ws://user:pass@ci.example.com:8080/
        #[arg(short, long, env = "PIPELINE_SERVER")]
        server: String,
        /// Pipeline config: a file path or an http(s) URL
        #[arg(short, long, env = "PIPELINE_CONFIG")]
        config: Option<String>,
    },
    /// Validate a pipeline configuration without running it
    Validate {
        /// Pipeline config file
        #[arg(default_value = ".pipeline.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            workdir,
            allow_env,
            allow_all_env,
        } => commands::run(config, workdir, &allow_env, allow_all_env).await,
        Commands::Client { server, config } => commands::client(&server, config).await,
        Commands::Validate { config } => commands::validate(&config),
    }
}
