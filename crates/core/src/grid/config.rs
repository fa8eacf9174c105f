//! Spatial processing configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the grid processing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialConfig {
    /// Table holding the usable-area mask used for clipping.
    #[serde(default = "default_clipping_table")]
    pub clipping_table: String,

    /// Table holding the processing grid cells.
    #[serde(default = "default_grid_table")]
    pub grid_table: String,

    /// Rebuild processed tables even when they already exist.
    #[serde(default)]
    pub regenerate: bool,

    /// Log statements instead of executing them.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_clipping_table() -> String {
    "opensite_clipping".to_string()
}

fn default_grid_table() -> String {
    "opensite_grid".to_string()
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            clipping_table: default_clipping_table(),
            grid_table: default_grid_table(),
            regenerate: false,
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SpatialConfig::default();
        assert_eq!(config.clipping_table, "opensite_clipping");
        assert_eq!(config.grid_table, "opensite_grid");
        assert!(!config.regenerate);
        assert!(!config.dry_run);
    }
}
