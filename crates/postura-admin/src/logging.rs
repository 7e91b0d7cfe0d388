//! 日志初始化

use anyhow::{Context, Result};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// 构造过滤器：`RUST_LOG` 优先，否则使用配置中的级别
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("failed to parse logging.level '{}'", config.level)),
    }
}

/// 安装全局tracing订阅者
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().with_target(false).compact())
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init(),
    }
    .context("failed to initialize tracing subscriber")?;

    tracing::debug!("Logging initialized with format {:?}", config.format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "postura=loudest".to_string(),
            format: LogFormat::Compact,
        };
        assert!(build_env_filter(&config).is_err());
    }

    #[test]
    fn test_directive_level_is_accepted() {
        let config = LoggingConfig {
            level: "postura_workflow=debug,info".to_string(),
            format: LogFormat::Json,
        };
        assert!(build_env_filter(&config).is_ok());
    }
}
