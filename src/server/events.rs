//! Read-only views of the processor's event log.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use super::AppState;
use crate::dispatch::WorkflowSink;
use crate::processor::EventStats;
use crate::types::EnrichedEvent;

/// Number of events returned when no limit is given.
pub const DEFAULT_EVENT_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// `GET /events?limit=N`: the most recent N accepted events, oldest first.
pub async fn events_handler<S: WorkflowSink>(
    State(app_state): State<AppState<S>>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<EnrichedEvent>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    Json(app_state.processor().recent_events(limit).await)
}

/// `GET /events/stats`
pub async fn event_stats_handler<S: WorkflowSink>(
    State(app_state): State<AppState<S>>,
) -> Json<EventStats> {
    Json(app_state.processor().stats().await)
}
