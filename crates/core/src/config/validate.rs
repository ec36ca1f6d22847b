use super::{
    types::{Config, NotifierBackend},
    ConfigError,
};
use crate::job::QueueName;

/// Validate configuration
/// Currently validates:
/// - Ledger section exists (enforced by serde)
/// - Server port is not 0
/// - Every queue has concurrency >= 1, max_attempts >= 1 and a sane backoff
/// - Heartbeats are more frequent than the liveness timeout
/// - Mint cannot run two jobs of the same signer at once
/// - Webhook backend has a URL
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    for queue in QueueName::ALL {
        let q = config.queues.get(queue);
        if q.concurrency == 0 {
            return Err(ConfigError::ValidationError(format!(
                "queues.{}.concurrency must be at least 1",
                queue
            )));
        }
        if q.max_attempts == 0 {
            return Err(ConfigError::ValidationError(format!(
                "queues.{}.max_attempts must be at least 1",
                queue
            )));
        }
        if q.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "queues.{}.backoff_multiplier must be >= 1.0",
                queue
            )));
        }
        if q.initial_backoff_ms > q.max_backoff_ms {
            return Err(ConfigError::ValidationError(format!(
                "queues.{}.initial_backoff_ms cannot exceed max_backoff_ms",
                queue
            )));
        }
    }

    if !config.queues.mint.serialize_lanes && config.queues.mint.concurrency > 1 {
        return Err(ConfigError::ValidationError(
            "queues.mint must set serialize_lanes = true or concurrency = 1".to_string(),
        ));
    }

    let pipeline = &config.pipeline;
    if pipeline.poll_interval_ms == 0 || pipeline.reaper_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline poll and reaper intervals must be greater than 0".to_string(),
        ));
    }
    if pipeline.heartbeat_interval_ms >= pipeline.liveness_timeout_secs * 1000 {
        return Err(ConfigError::ValidationError(
            "pipeline.heartbeat_interval_ms must be shorter than liveness_timeout_secs".to_string(),
        ));
    }
    if pipeline.signing_identity.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "pipeline.signing_identity cannot be empty".to_string(),
        ));
    }
    if pipeline.target_formats.is_empty() {
        return Err(ConfigError::ValidationError(
            "pipeline.target_formats cannot be empty".to_string(),
        ));
    }

    if config.ledger.url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "ledger.url cannot be empty".to_string(),
        ));
    }

    if config.notifier.backend == NotifierBackend::Webhook
        && config.notifier.webhook_url.as_deref().unwrap_or("").is_empty()
    {
        return Err(ConfigError::ValidationError(
            "notifier.webhook_url is required when backend = \"webhook\"".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn base_config() -> Config {
        load_config_from_str(
            r#"
[ledger]
url = "http://localhost:8545"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = base_config();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let mut config = base_config();
        config.queues.pin.concurrency = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("queues.pin.concurrency"));
    }

    #[test]
    fn test_validate_zero_attempts_fails() {
        let mut config = base_config();
        config.queues.notify.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_shrinking_backoff_fails() {
        let mut config = base_config();
        config.queues.transcode.backoff_multiplier = 0.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_unserialized_parallel_mint_fails() {
        let mut config = base_config();
        config.queues.mint.serialize_lanes = false;
        config.queues.mint.concurrency = 2;
        assert!(validate_config(&config).is_err());

        config.queues.mint.concurrency = 1;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_heartbeat_must_beat_liveness() {
        let mut config = base_config();
        config.pipeline.liveness_timeout_secs = 5;
        config.pipeline.heartbeat_interval_ms = 5000;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_webhook_requires_url() {
        let mut config = base_config();
        config.notifier.backend = NotifierBackend::Webhook;
        assert!(validate_config(&config).is_err());

        config.notifier.webhook_url = Some("https://hooks.example.com".to_string());
        assert!(validate_config(&config).is_ok());
    }
}
