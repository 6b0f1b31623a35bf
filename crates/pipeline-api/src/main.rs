//! Pipeline API server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pipeline_api::{AppState, ServerConfig, routes};
use pipeline_scheduler::Worker;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipeline-server")]
#[command(about = "Pipeline runner as a service", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Base path the service is mounted under
    #[arg(long, env = "SERVER_PATH", default_value = "/")]
    path: String,

    /// Base workdir; each run executes in <workdir>/<run id>
    #[arg(short, long, env = "WORKDIR", default_value = "/tmp/pipeline")]
    workdir: PathBuf,

    /// Basic auth username (empty disables auth)
    #[arg(short, long, env = "USERNAME", default_value = "")]
    username: String,

    /// Basic auth password
    #[arg(long, env = "PASSWORD", default_value = "")]
    password: String,

    /// Maximum number of pipelines running at once
    #[arg(long, env = "MAX_CONCURRENT", default_value_t = 2)]
    max_concurrent: usize,

    /// Environment variables forwarded into every run
    #[arg(long = "allow-env", env = "ALLOW_ENV", value_delimiter = ',')]
    allow_env: Vec<String>,

    /// Forward the entire server environment into every run
    #[arg(long, env = "ALLOW_ALL_ENV", default_value_t = false)]
    allow_all_env: bool,
}

fn forwarded_environment(args: &Args) -> HashMap<String, String> {
    let mut environment = HashMap::new();
    for key in &args.allow_env {
        if let Ok(value) = std::env::var(key) {
            environment.entry(key.clone()).or_insert(value);
        }
    }
    if args.allow_all_env {
        for (key, value) in std::env::vars() {
            environment.entry(key).or_insert(value);
        }
    }
    environment
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if !args.workdir.exists() {
        std::fs::create_dir_all(&args.workdir)?;
    }

    let config = ServerConfig {
        port: args.port,
        path: args.path.clone(),
        workdir: args.workdir.clone(),
        environment: forwarded_environment(&args),
        username: args.username.clone(),
        password: args.password.clone(),
        max_concurrent: args.max_concurrent,
    };

    let executors = Arc::new(pipeline_executor::default_registry());
    let state = AppState::new(config, executors.clone());

    if let Some(queue) = &state.queue {
        let worker = Worker::new(queue.clone(), state.store.clone(), executors);
        tokio::spawn(worker.run());
    }

    let app = routes::router(state.clone());
    let app = if args.path != "/" && !args.path.is_empty() {
        axum::Router::new().nest(&args.path, app)
    } else {
        app
    };
    let app = app.layer(TraceLayer::new_for_http()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(addr = %addr, path = %args.path, "starting server");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
