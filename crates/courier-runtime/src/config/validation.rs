//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, CourierConfig};
use courier_framework::{SchedulerConfig, WorkerPoolConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &CourierConfig) -> ConfigResult<()> {
    validate_worker_pool(&config.worker_pool)?;
    validate_rate_limiter(&config.rate_limiter)?;
    validate_bot(&config.bot)?;
    Ok(())
}

fn validate_worker_pool(pool: &WorkerPoolConfig) -> ConfigResult<()> {
    if pool.core_workers == 0 {
        return Err(ConfigError::validation(
            "worker_pool.core_workers must be greater than 0",
        ));
    }

    if pool.max_workers < pool.core_workers {
        return Err(ConfigError::validation(format!(
            "worker_pool.max_workers ({}) must be at least core_workers ({})",
            pool.max_workers, pool.core_workers
        )));
    }

    if pool.queue_capacity == 0 {
        return Err(ConfigError::validation(
            "worker_pool.queue_capacity must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_rate_limiter(limiter: &SchedulerConfig) -> ConfigResult<()> {
    if limiter.drain_interval.is_zero() {
        return Err(ConfigError::validation(
            "rate_limiter.drain_interval_ms must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_bot(bot: &BotConfig) -> ConfigResult<()> {
    if bot.command_prefix.is_empty() {
        return Err(ConfigError::validation("bot.command_prefix cannot be empty"));
    }

    if bot.command_prefix.chars().any(char::is_whitespace) {
        return Err(ConfigError::validation(
            "bot.command_prefix cannot contain whitespace",
        ));
    }

    Ok(())
}
