//! HTTP server for merge-relay.
//!
//! # Endpoints
//!
//! - `POST /webhooks/github` - GitHub deliveries (HMAC-SHA256 signed)
//! - `POST /webhooks/gitlab` - GitLab deliveries (shared token)
//! - `GET /events?limit=N` - Most recent accepted events
//! - `GET /events/stats` - Aggregate counts over accepted events
//! - `GET /health` - Liveness check

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod events;
pub mod health;
pub mod webhook;

pub use events::{EventsQuery, event_stats_handler, events_handler};
pub use health::health_handler;
pub use webhook::{WebhookAck, WebhookError, github_webhook_handler, gitlab_webhook_handler};

use crate::config::Config;
use crate::dispatch::{WorkflowDispatcher, WorkflowSink};
use crate::processor::EventProcessor;
use crate::webhooks::Normalizer;

/// Webhook authentication secrets. A provider with no secret is not verified.
#[derive(Clone, Default)]
pub struct WebhookSecrets {
    pub github: Option<Vec<u8>>,
    pub gitlab: Option<String>,
}

/// Shared application state, passed to handlers via axum's `State` extractor.
pub struct AppState<S> {
    inner: Arc<AppStateInner<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct AppStateInner<S> {
    processor: EventProcessor<S>,
    normalizer: Normalizer,
    secrets: WebhookSecrets,
    /// Background handling of accepted events.
    tasks: TaskTracker,
}

impl<S: WorkflowSink> AppState<S> {
    /// The normalizer filters on the same branch sets the processor classifies with.
    pub fn new(processor: EventProcessor<S>, secrets: WebhookSecrets) -> Self {
        let normalizer = Normalizer::new(processor.branches().clone());
        AppState {
            inner: Arc::new(AppStateInner {
                processor,
                normalizer,
                secrets,
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn processor(&self) -> &EventProcessor<S> {
        &self.inner.processor
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.inner.normalizer
    }

    pub fn secrets(&self) -> &WebhookSecrets {
        &self.inner.secrets
    }

    pub fn tasks(&self) -> &TaskTracker {
        &self.inner.tasks
    }

    /// Stops accepting background work and waits for every accepted event
    /// to finish dispatch and materialization.
    pub async fn drain(&self) {
        let tasks = self.tasks();
        tasks.close();
        if !tasks.is_empty() {
            info!(pending = tasks.len(), "waiting for accepted events to finish");
        }
        tasks.wait().await;
    }
}

impl AppState<WorkflowDispatcher> {
    /// Wires the HTTP dispatcher, processor, and secrets from configuration.
    pub fn from_config(config: Config) -> Self {
        let dispatcher = WorkflowDispatcher::new(config.workflow_targets);
        let mut processor = EventProcessor::new(dispatcher, config.branches);
        if let Some(settings) = config.materialize {
            processor = processor.with_materialization(settings);
        }
        let secrets = WebhookSecrets {
            github: config.github_secret.map(String::into_bytes),
            gitlab: config.gitlab_secret,
        };
        AppState::new(processor, secrets)
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<S: WorkflowSink>(app_state: AppState<S>) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhooks/github", post(github_webhook_handler::<S>))
        .route("/webhooks/gitlab", post(gitlab_webhook_handler::<S>))
        .route("/events", get(events_handler::<S>))
        .route("/events/stats", get(event_stats_handler::<S>))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
