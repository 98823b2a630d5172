//! Webhook handler for GitHub push and issue comment events

use axum::{
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
};
use tracing::{error, info, warn};

use crate::command::parse_command;
use crate::drone::{BuildParams, promote_latest, restart_all};
use crate::error::{Result, RhobotError};
use crate::report::report_build;
use crate::webhook::{EventKind, WebhookEvent, delivery_id, verify_delivery};
use crate::{AppState, SharedState};

/// Build parameters handed to the promoted pipeline
pub const PARAM_COMMIT_SHA: &str = "COMMIT_SHA";
pub const PARAM_REPO_URL: &str = "REPO_URL";
pub const PARAM_CONTRACT: &str = "CONTRACT";

/// What a successfully handled delivery amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pong,
    Ignored { kind: String },
    PushIgnored { git_ref: String },
    PipelinesRestarted { attempted: usize },
    CommentIgnored,
    NoCommand,
    NotPullRequest,
    NotCollaborator { login: String },
    BuildReported { url: String },
}

/// Handles the GitHub webhook POST request.
///
/// The response body is always empty; diagnostics only go to the log.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let delivery_id = delivery_id(&headers);

    match process_delivery(&state, delivery_id.clone(), headers, body).await {
        Ok(outcome) => {
            info!(delivery_id = %delivery_id, ?outcome, "Delivery handled");
            StatusCode::OK
        }
        Err(e) => {
            let status = e.status_code();
            if status.is_success() {
                warn!(delivery_id = %delivery_id, error = %e, "Delivery handled with warning");
            } else {
                error!(delivery_id = %delivery_id, error = %e, "Delivery failed");
            }
            status
        }
    }
}

/// Verifies, classifies and acts on one delivery.
pub async fn process_delivery(
    state: &AppState,
    delivery_id: String,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Outcome> {
    // Nothing in the body is trusted before this point
    verify_delivery(&headers, &body, &state.config.webhook_secret)?;

    let event = WebhookEvent::classify(delivery_id, headers, body)?;
    info!(
        delivery_id = %event.delivery_id,
        event = %event.kind,
        git_ref = ?event.git_ref,
        "Got event"
    );

    match &event.kind {
        EventKind::Ping => Ok(Outcome::Pong),
        EventKind::Push => handle_push(state, &event).await,
        EventKind::IssueComment => handle_issue_comment(state, &event).await,
        EventKind::Other(kind) => Ok(Outcome::Ignored { kind: kind.clone() }),
    }
}

async fn handle_push(state: &AppState, event: &WebhookEvent) -> Result<Outcome> {
    let git_ref = event.git_ref.as_deref().unwrap_or_default();
    if git_ref != state.config.settings.trigger_ref {
        return Ok(Outcome::PushIgnored {
            git_ref: git_ref.to_string(),
        });
    }

    let pipelines = &state.config.push_pipelines;
    let outcomes = restart_all(state.builds.as_ref(), pipelines).await;

    // Every pipeline has been attempted; report the first real failure
    let failure = outcomes
        .into_iter()
        .filter_map(|(_, outcome)| outcome.err())
        .find(|e| !matches!(e, RhobotError::NoPreviousBuild { .. }));
    match failure {
        Some(e) => Err(e),
        None => Ok(Outcome::PipelinesRestarted {
            attempted: pipelines.len(),
        }),
    }
}

async fn handle_issue_comment(state: &AppState, event: &WebhookEvent) -> Result<Outcome> {
    let comment = event
        .comment
        .as_ref()
        .ok_or_else(|| RhobotError::malformed_event("issue_comment", "missing comment"))?;

    if !comment.action.may_carry_command() {
        return Ok(Outcome::CommentIgnored);
    }
    let Some(command) = parse_command(&comment.body) else {
        return Ok(Outcome::NoCommand);
    };
    let Some(pull_request_url) = comment.pull_request_url.as_deref() else {
        info!(
            delivery_id = %event.delivery_id,
            "'{} {}' on plain issue {}#{}, ignoring",
            command.subject, command.verb, comment.repository, comment.issue_number
        );
        return Ok(Outcome::NotPullRequest);
    };

    let allowed = state
        .github
        .is_collaborator(&comment.repository, &comment.commenter_login)
        .await?;
    if !allowed {
        warn!(
            delivery_id = %event.delivery_id,
            "'{}' is not a collaborator on {}, ignoring command",
            comment.commenter_login, comment.repository
        );
        return Ok(Outcome::NotCollaborator {
            login: comment.commenter_login.clone(),
        });
    }

    let pull_request = state.github.pull_request(pull_request_url).await?;
    let params: BuildParams = vec![
        (PARAM_COMMIT_SHA.to_string(), pull_request.head_sha),
        (PARAM_REPO_URL.to_string(), pull_request.head_clone_url),
        (PARAM_CONTRACT.to_string(), command.argument),
    ];

    let settings = &state.config.settings;
    let pipeline = &state.config.try_pipeline;
    let build = promote_latest(
        state.builds.as_ref(),
        pipeline,
        settings.try_event.as_deref(),
        &settings.promote_target,
        &params,
    )
    .await?;
    info!(delivery_id = %event.delivery_id, "Started {}", build);

    let url = report_build(
        state.github.as_ref(),
        &comment.repository,
        comment.issue_number,
        &pipeline.server.url,
        &build,
    )
    .await?;
    Ok(Outcome::BuildReported { url })
}
