mod admin;
mod auth;
mod config;
mod email;
mod error;
mod live;
mod movies;
mod picks;
mod routes;
mod state;
mod store;
mod style;
mod users;

use crate::config::Config;
use crate::state::AppState;
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Serve,
    Cleanup { preserved: Vec<String> },
    Help,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}\n\n{}", usage_text());
            std::process::exit(2);
        }
    };

    match command {
        Command::Help => println!("{}", usage_text()),
        Command::Version => println!("pickem {}", env!("CARGO_PKG_VERSION")),
        Command::Serve => {
            init_logging();
            serve(Config::load()).await?;
        }
        Command::Cleanup { preserved } => {
            init_logging();
            cleanup(Config::load(), &preserved).await?;
        }
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command, String> {
    let Some(arg) = args.next() else {
        return Ok(Command::Serve);
    };

    match arg.as_str() {
        "-h" | "--help" => Ok(Command::Help),
        "-V" | "--version" => Ok(Command::Version),
        "serve" => Ok(Command::Serve),
        "cleanup" => {
            let mut preserved: Vec<String> =
                admin::DEFAULT_PRESERVED_FIELDS.iter().map(|f| f.to_string()).collect();
            while let Some(flag) = args.next() {
                match flag.as_str() {
                    "--preserve" => {
                        let list = args.next().ok_or("--preserve needs a comma-separated field list")?;
                        preserved = list
                            .split(',')
                            .map(str::trim)
                            .filter(|f| !f.is_empty())
                            .map(str::to_owned)
                            .collect();
                    }
                    other => return Err(format!("Unknown cleanup option: {other}")),
                }
            }
            Ok(Command::Cleanup { preserved })
        }
        other => Err(format!("Unknown argument: {other}")),
    }
}

fn usage_text() -> &'static str {
    "pickem - NFL pick'em backend

Usage:
  pickem [serve]
  pickem cleanup [--preserve field,field,...]
  pickem --help
  pickem --version

Environment:
  PICKEM_PORT            HTTP port (default 8080)
  FIRESTORE_PROJECT_ID   Firestore project; unset runs against an in-memory store
  FIRESTORE_TOKEN        OAuth bearer token for Firestore
  CRON_SECRET            Bearer token required by /api/cron/* and admin routes
  RESEND_API_KEY         Email provider key; RESEND_AUDIENCE_ID for the mailing list
  TMDB_API_KEY           Movie database key
  MAGIC_LINK_SECRET      Signing key for sign-in links; APP_URL for the link host
  POLL_SITUATION_SECS    Live situation refresh interval (default 10)
  POLL_FULL_SECS         Live full refresh interval (default 30)
  RUST_LOG               Log filter (default info)"
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!("Initializing state...");
    let address = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(config);
    let app = routes::router(state.clone());

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.styles.dispose();
    info!("Server shut down");
    Ok(())
}

async fn cleanup(config: Config, preserved: &[String]) -> anyhow::Result<()> {
    if config.firestore_project_id.is_none() {
        warn!("No FIRESTORE_PROJECT_ID; cleaning the empty in-memory store");
    }
    let state = AppState::new(config);
    let preserved: Vec<&str> = preserved.iter().map(String::as_str).collect();
    let report = admin::run_season_cleanup(state.store.as_ref(), &preserved).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
