//! Building the work tree and the orchestrator from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use opensite_core::branch::BranchLoader;
use opensite_core::catalog::{apply_catalog, CatalogClient, CkanClient};
use opensite_core::downloader::HttpDownloader;
use opensite_core::grid::{DryRunExecutor, SpatialExecutor, SpatialTaskHandler};
use opensite_core::registry::{register_tree, SpatialRegistry, SqliteRegistry};
use opensite_core::unzip::ZipUnzipper;
use opensite_core::{Config, Orchestrator, Tree};

/// Load every configured site file as a branch of a fresh tree.
pub fn load_sites(config: &Config) -> Result<Tree> {
    let mut tree = Tree::new();
    let loader = BranchLoader::new(config.overrides.clone());
    let branches = loader
        .add_yaml_files(&mut tree, &config.sites)
        .context("Failed to load site files")?;
    info!(
        "Built tree with {} branch(es), {} node(s)",
        branches.len(),
        tree.len()
    );
    Ok(tree)
}

/// Fill titles and download locations from the catalog, if one is configured.
///
/// A failed query is logged and the run continues; nodes left without a
/// location are skipped by action planning.
pub async fn apply_catalog_metadata(config: &Config, tree: &mut Tree) -> Result<usize> {
    let Some(catalog_config) = &config.catalog else {
        info!("No catalog configured");
        return Ok(0);
    };

    let client = CkanClient::new(catalog_config).context("Failed to create catalog client")?;
    info!("Querying catalog at {}", client.base_url());

    match client.query(&catalog_config.formats).await {
        Ok(model) => {
            let matched = apply_catalog(tree, &model, &config.orchestrator.format_priority);
            info!("Catalog matched {} node(s)", matched);
            Ok(matched)
        }
        Err(e) => {
            warn!("Catalog query failed, continuing without metadata: {}", e);
            Ok(0)
        }
    }
}

/// Share global urns between clones and give every node its first action.
pub fn plan(tree: &mut Tree) {
    let shared = tree.assign_global_urns();
    info!("Assigned {} shared global urn(s)", shared);
    tree.plan_actions();
}

/// Open the registry, reconcile it with the database and record the tree.
///
/// Reconciliation runs first: it removes incomplete rows, and every row
/// written for this tree starts incomplete.
pub fn open_registry(config: &Config, tree: &Tree) -> Result<Arc<SqliteRegistry>> {
    let registry = SqliteRegistry::new(&config.database.path).with_context(|| {
        format!(
            "Failed to open registry at {}",
            config.database.path.display()
        )
    })?;

    let report = registry
        .sync_registry()
        .context("Registry synchronization failed")?;
    info!(
        incomplete = report.removed_incomplete.len(),
        orphaned = report.removed_orphaned.len(),
        dropped = report.dropped_tables.len(),
        branches = report.removed_branches.len(),
        "Registry synchronized"
    );

    register_tree(tree, &registry).context("Failed to register tree")?;
    Ok(Arc::new(registry))
}

/// Spatial executor for CPU tasks.
///
/// Only the dry-run executor is linked into this binary, so statements are
/// logged rather than executed.
pub fn spatial_executor(config: &Config) -> Arc<dyn SpatialExecutor> {
    if !config.spatial.dry_run {
        warn!("No spatial database engine is linked, running spatial steps as a dry run");
    }
    Arc::new(DryRunExecutor::new())
}

/// Wire the orchestrator with its collaborators.
pub fn build_orchestrator(
    config: &Config,
    registry: Option<Arc<dyn SpatialRegistry>>,
) -> Result<Orchestrator> {
    let downloader = HttpDownloader::new(config.downloads.clone())
        .context("Failed to create downloader")?;
    info!("Downloads go to {}", config.downloads.dir.display());

    let handler = SpatialTaskHandler::new(spatial_executor(config), config.spatial.clone());

    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        Arc::new(downloader),
        Arc::new(ZipUnzipper::new()),
        Arc::new(handler),
    );

    Ok(match registry {
        Some(registry) => orchestrator.with_registry(registry),
        None => orchestrator,
    })
}
