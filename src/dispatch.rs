//! Forwarding enriched events to workflow endpoints.
//!
//! Each configured target gets one HTTP request with the enriched event as
//! its JSON body. There is no retry: a timeout, transport error, or error
//! status is recorded for that target and the others proceed unaffected.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::{info, warn};

use crate::types::EnrichedEvent;

/// Default per-request timeout for workflow targets.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A workflow endpoint.
#[derive(Debug, Clone)]
pub struct WorkflowTarget {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub timeout: Duration,
}

impl WorkflowTarget {
    /// A POST target with a JSON content type and the default timeout.
    pub fn new(url: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        WorkflowTarget {
            url: url.into(),
            method: Method::POST,
            headers,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Why a single target failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The target answered with a 4xx or 5xx status.
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Result of sending the event to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub url: String,
    /// The response status on success.
    pub result: Result<u16, DispatchFailure>,
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-target results of one dispatch, in target order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReport {
    /// No targets are configured; nothing was sent.
    NoTargets,
    Dispatched(Vec<TargetOutcome>),
}

impl DispatchReport {
    pub fn outcomes(&self) -> &[TargetOutcome] {
        match self {
            DispatchReport::NoTargets => &[],
            DispatchReport::Dispatched(outcomes) => outcomes,
        }
    }

    /// True if at least one target accepted the event.
    pub fn any_succeeded(&self) -> bool {
        self.outcomes().iter().any(TargetOutcome::is_success)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes().iter().filter(|o| o.is_success()).count()
    }

    pub fn attempted(&self) -> usize {
        self.outcomes().len()
    }
}

/// Delivers enriched events to downstream workflows.
///
/// The processor is generic over this so tests can count or script
/// deliveries without a network.
pub trait WorkflowSink: Send + Sync + 'static {
    fn dispatch(&self, event: &EnrichedEvent) -> impl Future<Output = DispatchReport> + Send;
}

/// HTTP implementation of [`WorkflowSink`].
#[derive(Debug, Clone)]
pub struct WorkflowDispatcher {
    client: reqwest::Client,
    targets: Vec<WorkflowTarget>,
}

impl WorkflowDispatcher {
    pub fn new(targets: Vec<WorkflowTarget>) -> Self {
        Self::with_client(reqwest::Client::new(), targets)
    }

    pub fn with_client(client: reqwest::Client, targets: Vec<WorkflowTarget>) -> Self {
        WorkflowDispatcher { client, targets }
    }

    pub fn targets(&self) -> &[WorkflowTarget] {
        &self.targets
    }

    async fn send(&self, target: &WorkflowTarget, event: &EnrichedEvent) -> TargetOutcome {
        let response = self
            .client
            .request(target.method.clone(), &target.url)
            .headers(target.headers.clone())
            .timeout(target.timeout)
            .json(event)
            .send()
            .await;

        let result = match response {
            Ok(response) => {
                let status = response.status();
                if status.is_client_error() || status.is_server_error() {
                    Err(DispatchFailure::Status(status.as_u16()))
                } else {
                    Ok(status.as_u16())
                }
            }
            Err(e) if e.is_timeout() => Err(DispatchFailure::Timeout(target.timeout)),
            Err(e) => Err(DispatchFailure::Transport(e.to_string())),
        };

        match &result {
            Ok(status) => info!(url = %target.url, status, "workflow triggered"),
            Err(failure) => warn!(url = %target.url, %failure, "workflow trigger failed"),
        }

        TargetOutcome {
            url: target.url.clone(),
            result,
        }
    }
}

impl WorkflowSink for WorkflowDispatcher {
    async fn dispatch(&self, event: &EnrichedEvent) -> DispatchReport {
        if self.targets.is_empty() {
            let payload = serde_json::to_string(event).unwrap_or_default();
            info!(
                event_id = %event.event_id,
                %payload,
                "no workflow targets configured, logging event only"
            );
            return DispatchReport::NoTargets;
        }

        let outcomes = join_all(self.targets.iter().map(|t| self.send(t, event))).await;
        let report = DispatchReport::Dispatched(outcomes);
        info!(
            event_id = %event.event_id,
            succeeded = report.succeeded(),
            attempted = report.attempted(),
            "workflow dispatch finished"
        );
        report
    }
}
