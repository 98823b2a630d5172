use rhobot::api::build_router;
use rhobot::drone::DroneCli;
use rhobot::error::RhobotError;
use rhobot::github::GitHubClient;
use rhobot::logging::{FileLogger, setup_logging};
use rhobot::{AppState, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    if let Err(e) = run().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), RhobotError> {
    // Fail fast: nothing is bound until the configuration is complete
    let config = Config::from_env()?;

    let file_logger = std::env::var("LOG_DIR")
        .ok()
        .map(|dir| FileLogger::new(PathBuf::from(dir)));
    let _log_guard = setup_logging(file_logger.as_ref())?;

    let settings = &config.settings;
    let github = GitHubClient::new(
        &settings.github_api_url,
        &config.github_token,
        settings.github_timeout(),
        settings.cache_capacity,
    )?;
    let builds = DroneCli::new(config.drone_cmd.clone(), settings.drone_timeout());

    info!("Using config {:?}", config);
    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        config,
        github: Arc::new(github),
        builds: Arc::new(builds),
    });
    let app = build_router(state);

    info!("Listening on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
