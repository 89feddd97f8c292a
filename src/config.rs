use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::service::DEFAULT_THREAD_PREFIX;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    handshake_timeout: Option<Duration>,
    thread_name_prefix: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: None,
            thread_name_prefix: DEFAULT_THREAD_PREFIX.to_string(),
        }
    }
}

impl SupervisorConfig {
    /// Create a new builder for SupervisorConfig
    pub fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder::default()
    }

    /// Parse a configuration from TOML
    ///
    /// ```toml
    /// [session]
    /// handshake_timeout_ms = 5000
    ///
    /// [dispatch]
    /// thread_name_prefix = "ams"
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: FileConfig =
            toml::from_str(source).map_err(|e| Error::ConfigError(e.to_string()))?;
        file.into_config()
    }

    /// Load a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "loaded supervisor config");
        Self::from_toml_str(&source)
    }

    /// Bound on every blocking step inside a session; `None` waits forever
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    pub fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }
}

/// Builder for SupervisorConfig
#[derive(Debug, Default)]
pub struct SupervisorConfigBuilder {
    inner: SupervisorConfig,
}

impl SupervisorConfigBuilder {
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.inner.handshake_timeout = Some(timeout);
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.inner.thread_name_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<SupervisorConfig> {
        if self.inner.thread_name_prefix.is_empty() {
            return Err(Error::ConfigError(
                "thread name prefix must not be empty".to_string(),
            ));
        }
        if self.inner.handshake_timeout == Some(Duration::ZERO) {
            return Err(Error::ConfigError(
                "handshake timeout must be greater than zero".to_string(),
            ));
        }
        Ok(self.inner)
    }
}

/// TOML config file structure
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    session: SessionSection,
    dispatch: DispatchSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SessionSection {
    handshake_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DispatchSection {
    thread_name_prefix: Option<String>,
}

impl FileConfig {
    fn into_config(self) -> Result<SupervisorConfig> {
        let mut builder = SupervisorConfig::builder();
        if let Some(ms) = self.session.handshake_timeout_ms {
            builder = builder.handshake_timeout(Duration::from_millis(ms));
        }
        if let Some(prefix) = self.dispatch.thread_name_prefix {
            builder = builder.thread_name_prefix(prefix);
        }
        builder.build()
    }
}
