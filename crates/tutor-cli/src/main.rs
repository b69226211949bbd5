//! Crawl-Walk-Run Tutor
//!
//! Main entry point for the tutoring HTTP server.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tutor_generator::{GeminiGenerator, TextGenerator};
use tutor_orchestrator::{create_router, AppState, Config, SessionRegistry, Tutor, TutorSettings};
use tutor_store::{Curriculum, MemorySkillStore, MySqlSkillStore, SkillStore};

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 8000;

/// Default bind address.
const DEFAULT_HOST: &str = "0.0.0.0";

/// Crawl-Walk-Run Tutor - AI tutoring server
///
/// Teaches each student the next skill they have not mastered on the way to
/// a goal skill: explain it, practice it, then assess it.
#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutor.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Port for the HTTP API server
    #[arg(short, long, env = "TUTOR_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind the HTTP API server to
    #[arg(long, env = "TUTOR_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,

    /// Use a built-in algebra curriculum held in memory instead of MySQL
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    dotenv().ok();

    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Tutor starting");
    tracing::debug!(config = ?args.config, demo = args.demo, "Arguments");

    match run_server(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration, wires the collaborators, and serves until Ctrl+C.
async fn run_server(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    config
        .validate(!args.demo)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    print_config(&config, args.demo);

    let store = build_store(&config, args.demo);
    let generator = build_generator(&config);
    let tutor = Tutor::new(
        store,
        generator,
        Arc::new(SessionRegistry::new()),
        TutorSettings::from(&config),
    );
    let router = create_router(AppState::new(tutor));

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to bind to {}:{}: {e}\n\nSuggestion: Try a different port with --port",
                args.host,
                args.port
            )
        })?;
    let addr = listener.local_addr()?;

    println!();
    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Loads configuration from file (if given) and applies environment overrides.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            let mut config = Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))?;
            config
                .apply_env(|key| std::env::var(key).ok())
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            Ok(config)
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn build_store(config: &Config, demo: bool) -> Arc<dyn SkillStore> {
    if demo {
        tracing::info!("Using in-memory algebra curriculum");
        return Arc::new(MemorySkillStore::new(Curriculum::algebra()));
    }

    // Connections are opened on first use, so a database that is down at
    // startup surfaces as a per-request error instead of a crash.
    Arc::new(MySqlSkillStore::connect_lazy(&config.database.to_settings()))
}

fn build_generator(config: &Config) -> Arc<dyn TextGenerator> {
    let mut generator = GeminiGenerator::new(
        config.generator.api_key.clone(),
        config.generator.model.clone(),
    );
    if let Some(base_url) = &config.generator.base_url {
        generator = generator.with_base_url(base_url.clone());
    }
    tracing::info!(model = generator.model(), "Using Gemini text generator");
    Arc::new(generator)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Prints configuration summary.
fn print_config(config: &Config, demo: bool) {
    println!("Configuration loaded:");
    println!("  Learning path: {}", config.path_name);
    println!("  Goal skill: {}", config.goal_skill_id);
    println!("  Model: {}", config.generator.model);
    println!("  Generator timeout: {}s", config.generator.timeout_seconds);
    if demo {
        println!("  Store: in-memory demo curriculum");
    } else {
        println!(
            "  Store: mysql://{}@{}:{}/{}",
            config.database.user, config.database.host, config.database.port, config.database.name
        );
    }
}
