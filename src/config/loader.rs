//! Configuration Loader
//!
//! Layers built-in defaults, an optional file and `WORKER_HOST__*` environment
//! overrides with the `config` crate, then validates the result.

use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::WorkerHostConfig;
use crate::constants::env;

/// Builds a validated [`WorkerHostConfig`]
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: Some(env::CONFIG_PREFIX.to_string()),
        }
    }

    /// Read the given file; it must exist
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Override the environment variable prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Ignore environment variables entirely
    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// Loader for the file named by `WORKER_HOST_CONFIG_PATH`, if set
    pub fn from_env() -> Self {
        let loader = Self::new();
        match std::env::var(env::CONFIG_PATH) {
            Ok(path) if !path.trim().is_empty() => loader.with_file(path),
            _ => loader,
        }
    }

    pub fn load(&self) -> ConfigResult<WorkerHostConfig> {
        let defaults = Config::try_from(&WorkerHostConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = &self.file {
            Self::ensure_exists(path)?;
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }

        if let Some(prefix) = &self.env_prefix {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator(env::CONFIG_SEPARATOR)
                    .separator(env::CONFIG_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let config: WorkerHostConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            max_workers = config.max_workers,
            execution_mode = %config.execution.mode,
            logic = %config.execution.logic,
            exchange_kind = %config.channel.exchange_kind,
            prefetch_count = config.channel.qos.prefetch_count,
            auto_ack = config.queue.auto_ack,
            broker = %config.broker.url_redacted(),
            "Configuration loaded"
        );

        Ok(config)
    }

    fn ensure_exists(path: &Path) -> ConfigResult<()> {
        if path.is_file() {
            Ok(())
        } else {
            Err(ConfigurationError::FileNotFound {
                path: path.display().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArgumentValue, ExecutionMode};
    use std::io::Write;

    fn write_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = ConfigLoader::new().without_env().load().unwrap();
        assert_eq!(config, WorkerHostConfig::default());
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let file = write_file(
            ".toml",
            r#"
max_workers = 2

[execution]
mode = "pooled"

[channel]
exchange_kind = "topic"

[channel.qos]
prefetch_count = 25
global = true

[queue]
durable = true
auto_ack = true

[queue.arguments]
x-max-length = 500
x-queue-type = "classic"
x-single-active-consumer = true
"#,
        );

        let config = ConfigLoader::new()
            .without_env()
            .with_file(file.path())
            .load()
            .unwrap();

        assert_eq!(config.max_workers, 2);
        assert_eq!(config.execution.mode, ExecutionMode::Pooled);
        assert_eq!(config.channel.exchange_kind, "topic");
        assert_eq!(config.channel.qos.prefetch_count, 25);
        assert!(config.channel.qos.global);
        assert!(config.queue.durable);
        assert!(config.queue.auto_ack);

        let args = config.queue.declare_arguments();
        assert_eq!(args.get("x-max-length"), Some(&ArgumentValue::Int(500)));
        assert_eq!(
            args.get("x-queue-type"),
            Some(&ArgumentValue::String("classic".to_string()))
        );
        assert_eq!(
            args.get("x-single-active-consumer"),
            Some(&ArgumentValue::Bool(true))
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ConfigLoader::new()
            .without_env()
            .with_file("/definitely/not/here.toml")
            .load();
        assert!(matches!(result, Err(ConfigurationError::FileNotFound { .. })));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let file = write_file(".toml", "max_workers = 0\n");
        let result = ConfigLoader::new()
            .without_env()
            .with_file(file.path())
            .load();
        assert!(matches!(result, Err(ConfigurationError::Validation { .. })));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_file(".toml", "max_workers = 5\n");
        std::env::set_var("WHTEST_LOADER__MAX_WORKERS", "9");
        std::env::set_var("WHTEST_LOADER__EXECUTION__MODE", "pooled");

        let config = ConfigLoader::new()
            .with_env_prefix("WHTEST_LOADER")
            .with_file(file.path())
            .load()
            .unwrap();

        std::env::remove_var("WHTEST_LOADER__MAX_WORKERS");
        std::env::remove_var("WHTEST_LOADER__EXECUTION__MODE");

        assert_eq!(config.max_workers, 9);
        assert_eq!(config.execution.mode, ExecutionMode::Pooled);
    }
}
