use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

use crate::{error::Error, executor::SandboxSettings, sandbox::IsolationBackend};

/// Node-level configuration. Every field has a default, so a TOML file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Parallel sandbox runs on this node
    pub max_concurrent: usize,
    /// Requests allowed to wait for a slot before load shedding
    pub queue_capacity: usize,

    pub default_time_limit_ms: u64,
    pub min_time_limit_ms: u64,
    pub max_time_limit_ms: u64,

    pub default_memory_limit_bytes: u64,
    pub min_memory_limit_bytes: u64,
    pub max_memory_limit_bytes: u64,

    pub max_source_bytes: usize,
    pub max_stdin_bytes: usize,
    /// Captured bytes kept per output stream
    pub output_limit_bytes: usize,
    pub file_size_limit_bytes: u64,

    pub sample_interval_ms: u64,
    pub compile_timeout_ms: u64,
    pub compile_memory_limit_bytes: u64,

    /// Cached verdicts kept in memory; 0 means unbounded
    pub cache_capacity: usize,
    pub workspace_root: PathBuf,
    pub backend: IsolationBackend,
    /// JSON-lines usage log; usage is kept in memory when unset
    pub usage_log: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            queue_capacity: 64,
            default_time_limit_ms: 5_000,
            min_time_limit_ms: 100,
            max_time_limit_ms: 30_000,
            default_memory_limit_bytes: 256 * 1024 * 1024, // 256MB
            min_memory_limit_bytes: 8 * 1024 * 1024,       // 8MB
            max_memory_limit_bytes: 1024 * 1024 * 1024,    // 1GB
            max_source_bytes: 64 * 1024,
            max_stdin_bytes: 1024 * 1024,
            output_limit_bytes: 64 * 1024,
            file_size_limit_bytes: 10 * 1024 * 1024, // 10MB
            sample_interval_ms: 20,
            compile_timeout_ms: 30_000,
            compile_memory_limit_bytes: 1024 * 1024 * 1024,
            cache_capacity: 10_000,
            workspace_root: std::env::temp_dir(),
            backend: IsolationBackend::default(),
            usage_log: None,
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, Error> {
        let config: ServiceConfig =
            toml::from_str(contents).map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_concurrent == 0 {
            return Err(Error::Config("max_concurrent must be at least 1".to_string()));
        }
        if self.sample_interval_ms == 0 {
            return Err(Error::Config("sample_interval_ms must be positive".to_string()));
        }
        if self.output_limit_bytes == 0 {
            return Err(Error::Config("output_limit_bytes must be positive".to_string()));
        }
        check_range(
            "time limit",
            self.min_time_limit_ms,
            self.default_time_limit_ms,
            self.max_time_limit_ms,
        )?;
        check_range(
            "memory limit",
            self.min_memory_limit_bytes,
            self.default_memory_limit_bytes,
            self.max_memory_limit_bytes,
        )?;
        Ok(())
    }

    pub fn sandbox_settings(&self) -> SandboxSettings {
        SandboxSettings {
            workspace_root: self.workspace_root.clone(),
            backend: self.backend,
            output_limit_bytes: self.output_limit_bytes,
            file_size_limit_bytes: self.file_size_limit_bytes,
            sample_interval: Duration::from_millis(self.sample_interval_ms),
            compile_timeout: Duration::from_millis(self.compile_timeout_ms),
            compile_memory_limit_bytes: self.compile_memory_limit_bytes,
        }
    }
}

fn check_range(what: &str, min: u64, default: u64, max: u64) -> Result<(), Error> {
    if min == 0 || min > max {
        return Err(Error::Config(format!(
            "{} range [{}, {}] is invalid",
            what, min, max
        )));
    }
    if default < min || default > max {
        return Err(Error::Config(format!(
            "default {} {} is outside [{}, {}]",
            what, default, min, max
        )));
    }
    Ok(())
}
