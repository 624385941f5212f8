use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - At least one item may run at a time
/// - Every step gets at least one attempt
/// - Backoff never shrinks and starts below its cap
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Pipeline validation
    let pipeline = &config.pipeline;
    if pipeline.max_parallel_items == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.max_parallel_items must be at least 1".to_string(),
        ));
    }

    let retry = &pipeline.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.retry.max_attempts must be at least 1".to_string(),
        ));
    }
    if retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(format!(
            "pipeline.retry.backoff_multiplier must be >= 1.0, got {}",
            retry.backoff_multiplier
        )));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        return Err(ConfigError::ValidationError(format!(
            "pipeline.retry.initial_delay_ms ({}) exceeds max_delay_ms ({})",
            retry.initial_delay_ms, retry.max_delay_ms
        )));
    }

    if config.audit.buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "audit.buffer_size must be at least 1".to_string(),
        ));
    }

    Ok(())
}
