//! Webhook endpoint handlers.
//!
//! Both providers go through the same steps: authenticate the raw body,
//! parse it into a [`ProviderEvent`], normalize and filter it, validate it
//! into the event log, and hand it to the processor in the background.
//! The response is sent once the event is in the log.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::dispatch::WorkflowSink;
use crate::types::{DeliveryId, EventId, Provider, ValidationError};
use crate::webhooks::{
    IgnoreReason, NormalizeError, Normalized, ParseError, ProviderEvent, parse_github,
    parse_gitlab, verify_signature, verify_token,
};

const HEADER_GITHUB_EVENT: &str = "x-github-event";
const HEADER_GITHUB_DELIVERY: &str = "x-github-delivery";
const HEADER_GITHUB_SIGNATURE: &str = "x-hub-signature-256";
const HEADER_GITLAB_EVENT: &str = "x-gitlab-event";
const HEADER_GITLAB_TOKEN: &str = "x-gitlab-token";
/// Optional; only used for log correlation.
const HEADER_GITLAB_DELIVERY: &str = "x-gitlab-event-uuid";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid token")]
    InvalidToken,

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("invalid merge event: {0}")]
    Validation(#[from] ValidationError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidSignature | WebhookError::InvalidToken => StatusCode::UNAUTHORIZED,
            WebhookError::MissingHeader(_)
            | WebhookError::Parse(_)
            | WebhookError::Normalize(_) => StatusCode::BAD_REQUEST,
            WebhookError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };

        (status, self.to_string()).into_response()
    }
}

/// Body of a successful webhook response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebhookAck {
    Accepted { event_id: EventId },
    Ignored { reason: String },
}

type WebhookResponse = Result<(StatusCode, Json<WebhookAck>), WebhookError>;

/// `POST /webhooks/github`
///
/// Requires `X-GitHub-Event` and `X-GitHub-Delivery`. When a secret is
/// configured, `X-Hub-Signature-256` must match the raw body.
pub async fn github_webhook_handler<S: WorkflowSink>(
    State(app_state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResponse {
    let event_type = get_header(&headers, HEADER_GITHUB_EVENT)?;
    let delivery_id = DeliveryId::new(get_header(&headers, HEADER_GITHUB_DELIVERY)?);

    debug!(%delivery_id, %event_type, "received GitHub webhook");

    // Verify before any parsing.
    if let Some(secret) = &app_state.secrets().github {
        let signature = headers
            .get(HEADER_GITHUB_SIGNATURE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(&body, signature, secret) {
            warn!(%delivery_id, "invalid webhook signature");
            return Err(WebhookError::InvalidSignature);
        }
    }

    let event = parse_github(&event_type, &body)?;
    ingest(&app_state, Provider::GitHub, &event_type, &delivery_id, event).await
}

/// `POST /webhooks/gitlab`
///
/// Requires `X-Gitlab-Event`. When a secret is configured, `X-Gitlab-Token`
/// must equal it.
pub async fn gitlab_webhook_handler<S: WorkflowSink>(
    State(app_state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResponse {
    let event_type = get_header(&headers, HEADER_GITLAB_EVENT)?;
    let delivery_id =
        DeliveryId::new(get_header(&headers, HEADER_GITLAB_DELIVERY).unwrap_or_default());

    debug!(%delivery_id, %event_type, "received GitLab webhook");

    if let Some(secret) = &app_state.secrets().gitlab {
        let token = headers
            .get(HEADER_GITLAB_TOKEN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_token(token, secret) {
            warn!(%delivery_id, "invalid webhook token");
            return Err(WebhookError::InvalidToken);
        }
    }

    let event = parse_gitlab(&event_type, &body)?;
    ingest(&app_state, Provider::GitLab, &event_type, &delivery_id, event).await
}

/// Normalizes, validates, and records a parsed event, then spawns its
/// dispatch and materialization.
async fn ingest<S: WorkflowSink>(
    app_state: &AppState<S>,
    provider: Provider,
    event_type: &str,
    delivery_id: &DeliveryId,
    event: Option<ProviderEvent>,
) -> WebhookResponse {
    let repository = event
        .as_ref()
        .and_then(ProviderEvent::repository)
        .unwrap_or_default()
        .to_string();
    debug!(%delivery_id, %provider, %repository, "normalizing webhook");

    let normalized = match event {
        Some(event) => app_state.normalizer().normalize(event)?,
        None => Normalized::Ignored(IgnoreReason::UnsupportedEvent {
            event_type: event_type.to_string(),
        }),
    };

    let draft = match normalized {
        Normalized::Accepted(draft) => draft,
        Normalized::Ignored(reason) => {
            info!(%delivery_id, %provider, %repository, %reason, "webhook ignored");
            return Ok((
                StatusCode::OK,
                Json(WebhookAck::Ignored {
                    reason: reason.to_string(),
                }),
            ));
        }
    };

    let event = app_state.processor().accept(draft).await?;
    let event_id = event.event_id.clone();
    info!(%delivery_id, %provider, %event_id, "webhook accepted");

    let background = app_state.clone();
    app_state.tasks().spawn(async move {
        let outcome = background.processor().handle(&event).await;
        debug!(
            event_id = %outcome.event_id,
            dispatched = outcome.is_success(),
            materialization = ?outcome.materialization,
            "event handled"
        );
    });

    Ok((StatusCode::ACCEPTED, Json(WebhookAck::Accepted { event_id })))
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}
