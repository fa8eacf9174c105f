//! Status API tests against an in-process router.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::StatusCode;

use common::{fixtures, TestFixture};
use opensite_core::catalog::CatalogConfig;
use opensite_core::orchestrator::BlockedNode;
use opensite_core::testing::MockDownloader;
use opensite_core::{Config, NodeAction, RunOutcome, RunSnapshot, Tree};

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert!(response.body["version"].is_string());
}

#[tokio::test]
async fn test_config_hides_catalog_api_key() {
    let config = Config {
        catalog: Some(CatalogConfig {
            url: "https://data.example".to_string(),
            api_key: Some("top-secret".to_string()),
            timeout_secs: 30,
            formats: vec!["GPKG".to_string()],
            page_size: 100,
        }),
        ..Default::default()
    };
    let fixture = TestFixture::with_snapshot(config, RunSnapshot::default());

    let response = fixture.get("/api/v1/config").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["catalog"]["api_key_configured"], true);
    assert!(!response.body.to_string().contains("top-secret"));
    assert_eq!(response.body["server"]["port"], 8080);
}

#[tokio::test]
async fn test_status_before_any_run() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/orchestrator/status").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["running"], false);
    assert!(response.body["run_id"].is_null());
    assert!(response.body["outcome"].is_null());

    let tree = fixture.get("/api/v1/tree").await;
    assert_eq!(tree.body["total"], 0);
}

#[tokio::test]
async fn test_completed_run_is_reported() {
    let mut tree = Tree::new();
    let (a, b) = fixtures::dependency_pair(&mut tree);

    let (fixture, outcome) = TestFixture::after_run(&mut tree, Arc::new(MockDownloader::new())).await;
    assert!(!outcome.is_stalled());

    let status = fixture.get("/api/v1/orchestrator/status").await;
    assert_eq!(status.body["running"], false);
    assert_eq!(status.body["in_flight"], 0);
    assert_eq!(status.body["outcome"]["outcome"], "completed");
    assert_eq!(status.body["counts"]["processed"], 3);
    assert!(status.body["run_id"].is_string());

    let listing = fixture.get("/api/v1/tree").await;
    let nodes = listing.body["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 3);
    // Pre-order: root, b, a.
    assert_eq!(nodes[0]["depth"], 0);
    assert_eq!(nodes[1]["urn"], b);
    assert_eq!(nodes[2]["urn"], a);
    assert_eq!(nodes[2]["depth"], 2);

    let node = fixture.get(&format!("/api/v1/tree/{}", a)).await;
    assert_eq!(node.status, StatusCode::OK);
    assert_eq!(node.body["name"], "a");
    assert_eq!(node.body["action"], "processed");

    let blocked = fixture.get("/api/v1/orchestrator/blocked").await;
    assert_eq!(blocked.body["stalled"], false);
}

#[tokio::test]
async fn test_stalled_run_lists_blocked_nodes() {
    let mut tree = Tree::new();
    let (a, b) = fixtures::dependency_pair(&mut tree);
    let downloader = Arc::new(MockDownloader::new());
    downloader.fail_on("a").await;

    let (fixture, outcome) = TestFixture::after_run(&mut tree, downloader).await;
    assert!(outcome.is_stalled());

    let blocked = fixture.get("/api/v1/orchestrator/blocked").await;
    assert_eq!(blocked.body["stalled"], true);
    let nodes = blocked.body["nodes"].as_array().unwrap();
    let entry = nodes
        .iter()
        .find(|n| n["urn"] == b)
        .expect("dependent listed as blocked");
    assert_eq!(entry["action"], "buffer");
    assert_eq!(entry["blocked_by"][0], a);

    let failed = fixture.get("/api/v1/tree?action=failed").await;
    let failed_nodes = failed.body["nodes"].as_array().unwrap();
    assert_eq!(failed_nodes.len(), 1);
    assert_eq!(failed_nodes[0]["name"], "a");
}

#[tokio::test]
async fn test_tree_filters() {
    let mut tree = Tree::new();
    fixtures::clone_pair(&mut tree);
    tree.plan_actions();

    let snapshot = RunSnapshot {
        nodes: tree.to_list(),
        ..Default::default()
    };
    let fixture = TestFixture::with_snapshot(Config::default(), snapshot);

    let shallow = fixture.get("/api/v1/tree?max_depth=1").await;
    assert_eq!(shallow.body["total"], 5);
    assert_eq!(shallow.body["nodes"].as_array().unwrap().len(), 3);

    let downloads = fixture.get("/api/v1/tree?action=download").await;
    assert_eq!(downloads.body["nodes"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_node_is_not_found() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/tree/999").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"], "node 999 not found");
}

#[tokio::test]
async fn test_stalled_snapshot_serializes_outcome() {
    let snapshot = RunSnapshot {
        outcome: Some(RunOutcome::Stalled {
            unfinished: vec![BlockedNode {
                urn: 4,
                name: "c".to_string(),
                action: NodeAction::Buffer,
                blocked_by: vec![5],
            }],
        }),
        counts: BTreeMap::from([(NodeAction::Buffer, 1), (NodeAction::Failed, 1)]),
        ..Default::default()
    };
    let fixture = TestFixture::with_snapshot(Config::default(), snapshot);

    let status = fixture.get("/api/v1/orchestrator/status").await;
    assert_eq!(status.body["outcome"]["outcome"], "stalled");
    assert_eq!(status.body["counts"]["failed"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new();
    // Hit an API route first so request metrics have a sample.
    fixture.get("/api/v1/health").await;

    let response = fixture.get("/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    let text = response.body.as_str().unwrap();
    assert!(text.contains("opensite_http_requests_total"));
    assert!(text.contains("opensite_nodes"));
}
