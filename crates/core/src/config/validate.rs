use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0 when the status API is enabled
/// - Worker pools and the size probe bound are non-empty
/// - Action groups are disjoint and cover every lifecycle action
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.enabled && config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Orchestrator validation
    let orchestrator = &config.orchestrator;
    if orchestrator.cpu_workers == Some(0) {
        return Err(ConfigError::ValidationError(
            "orchestrator.cpu_workers must be at least 1".to_string(),
        ));
    }
    if orchestrator.io_worker_multiplier == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.io_worker_multiplier must be at least 1".to_string(),
        ));
    }
    if orchestrator.size_probe_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.size_probe_concurrency must be at least 1".to_string(),
        ));
    }
    orchestrator
        .action_groups
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("orchestrator.action_groups: {}", e)))?;

    // Catalog validation
    if let Some(catalog) = &config.catalog {
        if catalog.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "catalog.url cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::model::NodeAction;
    use std::net::IpAddr;

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails_when_enabled() {
        let mut config = Config {
            server: ServerConfig {
                enabled: false,
                host: "0.0.0.0".parse::<IpAddr>().unwrap(),
                port: 0,
            },
            ..Config::default()
        };
        assert!(validate_config(&config).is_ok());

        config.server.enabled = true;
        let result = validate_config(&config);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let mut config = Config::default();
        config.orchestrator.cpu_workers = Some(0);
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.orchestrator.size_probe_concurrency = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_overlapping_groups_fails() {
        let mut config = Config::default();
        config
            .orchestrator
            .action_groups
            .io_bound
            .push(NodeAction::Import);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("import"));
    }
}
