//! Tree listing handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use opensite_core::model::NodeSummary;
use opensite_core::{NodeAction, Urn};

use crate::state::AppState;

/// Query parameters for the tree listing.
#[derive(Debug, Default, Deserialize)]
pub struct TreeQuery {
    /// Only list nodes currently at this action.
    pub action: Option<NodeAction>,
    /// Only list nodes at most this deep (root = 0).
    pub max_depth: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TreeResponse {
    pub nodes: Vec<NodeSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct TreeErrorResponse {
    pub error: String,
}

/// Flattened pre-order listing of the tree as of the last published pass.
pub async fn list_nodes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TreeQuery>,
) -> Json<TreeResponse> {
    let snapshot = state.snapshot();
    let total = snapshot.nodes.len();
    let nodes = snapshot
        .nodes
        .into_iter()
        .filter(|n| query.action.is_none_or(|a| n.action == a))
        .filter(|n| query.max_depth.is_none_or(|d| n.depth <= d))
        .collect();

    Json(TreeResponse { nodes, total })
}

pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(urn): Path<Urn>,
) -> Result<Json<NodeSummary>, (StatusCode, Json<TreeErrorResponse>)> {
    state
        .snapshot()
        .nodes
        .into_iter()
        .find(|n| n.urn == urn)
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(TreeErrorResponse {
                    error: format!("node {} not found", urn),
                }),
            )
        })
}
