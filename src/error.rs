use axum::http::StatusCode;
use std::io;

/// Errors raised while handling a webhook delivery or loading configuration
#[derive(Debug, thiserror::Error)]
pub enum RhobotError {
    #[error("Webhook authentication failed: {0}")]
    Authentication(String),

    #[error("Malformed {event} event: {message}")]
    MalformedEvent { event: String, message: String },

    #[error("Could not determine collaborator status of '{user}': {message}")]
    AuthorizationCheck { user: String, message: String },

    #[error("No previous build exists for {repository}")]
    NoPreviousBuild { repository: String },

    #[error("Build dispatch failed for {repository}:\n{message}")]
    BuildDispatch { repository: String, message: String },

    #[error("Unexpected drone output: {0:?}")]
    MalformedUpstreamOutput(String),

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl RhobotError {
    pub fn malformed_event(event: &str, message: impl Into<String>) -> Self {
        Self::MalformedEvent {
            event: event.to_string(),
            message: message.into(),
        }
    }

    /// Status code returned to the webhook sender for this error.
    ///
    /// A missing previous build is not something a sender can provoke, so the
    /// delivery is still acknowledged.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::NoPreviousBuild { .. } => StatusCode::OK,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Helper type for Results that use RhobotError
pub type Result<T> = std::result::Result<T, RhobotError>;
