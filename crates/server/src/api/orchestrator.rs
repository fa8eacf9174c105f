//! Orchestrator API handlers.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use opensite_core::orchestrator::BlockedNode;
use opensite_core::{NodeAction, RunOutcome};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Orchestrator status response
#[derive(Debug, Serialize)]
pub struct OrchestratorStatusResponse {
    /// Whether a run is in progress
    pub running: bool,
    /// Id of the current or last run, if one started
    pub run_id: Option<Uuid>,
    /// Tasks dispatched and not yet completed
    pub in_flight: usize,
    /// Node count per lifecycle action
    pub counts: BTreeMap<NodeAction, usize>,
    /// How the run ended, once it has
    pub outcome: Option<RunOutcome>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Nodes left behind by a stalled run
#[derive(Debug, Serialize)]
pub struct BlockedResponse {
    pub stalled: bool,
    pub nodes: Vec<BlockedNode>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get orchestrator status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatusResponse> {
    let snapshot = state.snapshot();
    Json(OrchestratorStatusResponse {
        running: snapshot.running,
        run_id: snapshot.run_id,
        in_flight: snapshot.in_flight,
        counts: snapshot.counts,
        outcome: snapshot.outcome,
        updated_at: snapshot.updated_at,
    })
}

/// List the unfinished nodes of a stalled run and what blocks them.
pub async fn get_blocked(State(state): State<Arc<AppState>>) -> Json<BlockedResponse> {
    match state.snapshot().outcome {
        Some(RunOutcome::Stalled { unfinished }) => Json(BlockedResponse {
            stalled: true,
            nodes: unfinished,
        }),
        _ => Json(BlockedResponse {
            stalled: false,
            nodes: Vec::new(),
        }),
    }
}
