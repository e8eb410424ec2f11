//! Tool configuration.
//!
//! Settings come from an optional TOML file passed with `--config`. Every
//! key is optional; anything left out keeps its default. Unknown keys are
//! rejected to catch typos early.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [cache]
//! max_memory_mb = 2048      # Decode cache budget
//!
//! [processing]
//! max_threads = 8           # Cap on worker threads (omit for no cap)
//!
//! [locks]
//! stale_after_secs = 300    # Lock markers older than this are reclaimed
//!
//! [sequence]
//! naming = "positional"     # or "frame-number"
//! ```

use crate::cache::DEFAULT_MAX_MEMORY_MB;
use crate::locks::DEFAULT_STALE_AFTER;
use crate::sequence::OutputNaming;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Settings for one run of the tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub cache: CacheConfig,
    pub processing: ProcessingConfig,
    pub locks: LocksConfig,
    pub sequence: SequenceConfig,
}

impl ToolConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_memory_mb == 0 {
            return Err(ConfigError::Validation(
                "cache.max_memory_mb must be non-zero".into(),
            ));
        }
        if self.processing.max_threads == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_threads must be non-zero (omit it for no cap)".into(),
            ));
        }
        if self.locks.stale_after_secs == 0 {
            return Err(ConfigError::Validation(
                "locks.stale_after_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Byte budget of the decode cache, in MiB.
    pub max_memory_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Upper bound on worker threads, whatever the command line asks for.
    pub max_threads: Option<usize>,
}

/// Resolve the thread count for a request.
///
/// - `hint == 0` → all available cores
/// - otherwise `hint`
///
/// then clamped down to `max_threads` when set.
pub fn effective_threads(hint: usize, config: &ProcessingConfig) -> usize {
    let wanted = if hint == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        hint
    };
    config
        .max_threads
        .map(|cap| wanted.min(cap))
        .unwrap_or(wanted)
        .max(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocksConfig {
    pub stale_after_secs: u64,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER.as_secs(),
        }
    }
}

impl LocksConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequenceConfig {
    pub naming: OutputNaming,
}

/// Parse and validate a config file's contents.
pub fn parse_config(content: &str) -> Result<ToolConfig, ConfigError> {
    let config: ToolConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, or defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<ToolConfig, ConfigError> {
    match path {
        Some(path) => parse_config(&fs::read_to_string(path)?),
        None => Ok(ToolConfig::default()),
    }
}

/// Returns a fully-commented stock config file with all keys and defaults.
///
/// Printed by `--gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# bookmarks-imageutil configuration
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Decode cache
# ---------------------------------------------------------------------------
[cache]
# Memory budget for decoded images, in MiB. Oldest entries are evicted first.
max_memory_mb = 2048

# ---------------------------------------------------------------------------
# Parallelism
# ---------------------------------------------------------------------------
[processing]
# Cap on worker threads. Omit for no cap (one per core when --threads is 0).
# max_threads = 8

# ---------------------------------------------------------------------------
# Lock markers
# ---------------------------------------------------------------------------
[locks]
# A `<file>.lock` marker older than this many seconds is considered
# abandoned and is removed.
stale_after_secs = 300

# ---------------------------------------------------------------------------
# Sequences
# ---------------------------------------------------------------------------
[sequence]
# "positional": outputs are numbered 0, 1, 2, ... in directory order.
# "frame-number": outputs keep the source frame number, zero-padded.
naming = "positional"
"##
}
