pub mod api;
pub mod cache;
pub mod command;
pub mod drone;
pub mod error;
pub mod github;
pub mod logging;
pub mod report;
pub mod utils;
pub mod webhook;

use drone::{BuildSystem, DroneServer, Pipeline};
use error::RhobotError;
use github::GitHubApi;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:9090";
pub const DEFAULT_SETTINGS_PATH: &str = "rhobot.toml";

/// Non-secret settings, read from an optional TOML file.
///
/// Every field has a default so the file can be omitted entirely.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Pipelines whose latest build is restarted on a push to `trigger_ref`, in order.
    pub push_pipelines: Vec<String>,
    /// Pipeline promoted by `rhobot try` comments.
    pub try_pipeline: String,
    /// Build event used to pick the build to promote.
    pub try_event: Option<String>,
    pub promote_target: String,
    pub trigger_ref: String,
    pub github_api_url: String,
    pub cache_capacity: usize,
    pub github_timeout_secs: u64,
    pub drone_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            push_pipelines: vec![
                "rchain/slow-cooking".to_string(),
                "rchain/perf-harness".to_string(),
            ],
            try_pipeline: "rchain/perf-harness".to_string(),
            try_event: Some("deployment".to_string()),
            promote_target: "custom_commit".to_string(),
            trigger_ref: "refs/heads/dev".to_string(),
            github_api_url: "https://api.github.com".to_string(),
            cache_capacity: 500,
            github_timeout_secs: 10,
            drone_timeout_secs: 120,
        }
    }
}

impl Settings {
    pub fn github_timeout(&self) -> Duration {
        Duration::from_secs(self.github_timeout_secs)
    }

    pub fn drone_timeout(&self) -> Duration {
        Duration::from_secs(self.drone_timeout_secs)
    }
}

/// Process-wide configuration, built once at startup and never mutated.
#[derive(Clone)]
pub struct Config {
    pub webhook_secret: String,
    pub github_token: String,
    pub drone_cmd: PathBuf,
    pub bind_address: String,
    pub push_pipelines: Vec<Pipeline>,
    pub try_pipeline: Pipeline,
    pub settings: Settings,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("drone_cmd", &self.drone_cmd)
            .field("bind_address", &self.bind_address)
            .field("push_pipelines", &self.push_pipelines)
            .field("try_pipeline", &self.try_pipeline)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, RhobotError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// Required variables are checked up front so a misconfigured process
    /// stops before it binds a socket.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RhobotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| RhobotError::ConfigError(format!("{} is not set", key)))
        };

        let webhook_secret = required("GITHUB_WEBHOOK_SECRET")?;
        let github_token = required("GITHUB_PERSONAL_TOKEN")?;
        let drone_cmd = PathBuf::from(required("DRONE_CMD")?);
        let push_server = DroneServer {
            url: required("DRONE_SERVER")?,
            token: required("DRONE_TOKEN")?,
        };

        let try_server = match (lookup("DRONE_TRY_SERVER"), lookup("DRONE_TRY_TOKEN")) {
            (Some(url), Some(token)) => DroneServer { url, token },
            (None, None) => push_server.clone(),
            _ => {
                return Err(RhobotError::ConfigError(
                    "DRONE_TRY_SERVER and DRONE_TRY_TOKEN must be set together".to_string(),
                ));
            }
        };

        let bind_address =
            lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());
        let settings_path =
            lookup("RHOBOT_CONFIG").unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string());
        let settings = load_settings(Path::new(&settings_path))?;

        Self::assemble(
            webhook_secret,
            github_token,
            drone_cmd,
            bind_address,
            push_server,
            try_server,
            settings,
        )
    }

    fn assemble(
        webhook_secret: String,
        github_token: String,
        drone_cmd: PathBuf,
        bind_address: String,
        push_server: DroneServer,
        try_server: DroneServer,
        settings: Settings,
    ) -> Result<Self, RhobotError> {
        if settings.push_pipelines.is_empty() {
            return Err(RhobotError::ConfigError(
                "push_pipelines must name at least one pipeline".to_string(),
            ));
        }
        if settings.cache_capacity == 0 {
            return Err(RhobotError::ConfigError(
                "cache_capacity must be greater than zero".to_string(),
            ));
        }

        let push_pipelines = settings
            .push_pipelines
            .iter()
            .map(|repository| Pipeline::new(repository, push_server.clone()))
            .collect();
        let try_pipeline = Pipeline::new(&settings.try_pipeline, try_server);

        Ok(Self {
            webhook_secret,
            github_token,
            drone_cmd,
            bind_address,
            push_pipelines,
            try_pipeline,
            settings,
        })
    }
}

/// Read the settings file, falling back to defaults when it does not exist.
pub fn load_settings(path: &Path) -> Result<Settings, RhobotError> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        RhobotError::ConfigError(format!(
            "Failed to read settings file '{}': {}",
            path.display(),
            e
        ))
    })?;
    let settings = toml::from_str(&content)?;
    Ok(settings)
}

pub struct AppState {
    pub config: Config,
    pub github: Arc<dyn GitHubApi>,
    pub builds: Arc<dyn BuildSystem>,
}

pub type SharedState = Arc<AppState>;
