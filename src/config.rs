//! Runtime configuration for the reference scheduler.
//!
//! Defines the size of the worker pool and an optional bound on the number of
//! node invocations a single run may perform.

use crate::error::RuntimeError;
use serde::{Deserialize, Serialize};

/// Configuration for a [`Scheduler`](crate::scheduler::Scheduler).
///
/// Deserializes from JSON with every field optional:
///
/// ```rust
/// use tagweave::config::RuntimeConfig;
///
/// let config = RuntimeConfig::from_json_str(r#"{ "workers": 2 }"#).unwrap();
/// assert_eq!(config.workers, 2);
/// assert_eq!(config.max_invocations, None);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
  /// Number of workers (at least 1).
  pub workers: usize,
  /// Abort the run once this many invocations have been dispatched.
  pub max_invocations: Option<u64>,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      workers: 4,
      max_invocations: None,
    }
  }
}

impl RuntimeConfig {
  /// Creates a config with `workers` workers and no invocation bound.
  pub fn new(workers: usize) -> Self {
    Self {
      workers,
      ..Default::default()
    }
  }

  /// Bounds the number of invocations per run.
  pub fn with_max_invocations(mut self, limit: u64) -> Self {
    self.max_invocations = Some(limit);
    self
  }

  /// Parses a config from JSON and validates it.
  ///
  /// # Errors
  ///
  /// Returns [`RuntimeError::Config`] if the JSON is malformed or the values
  /// are out of range.
  pub fn from_json_str(json: &str) -> Result<Self, RuntimeError> {
    let config: Self =
      serde_json::from_str(json).map_err(|e| RuntimeError::Config(e.to_string()))?;
    config.validate().map_err(RuntimeError::Config)?;
    Ok(config)
  }

  /// Validates the config: at least one worker, non-zero invocation bound.
  pub fn validate(&self) -> Result<(), String> {
    if self.workers == 0 {
      return Err("workers must be > 0".to_string());
    }
    if self.max_invocations == Some(0) {
      return Err("max_invocations must be > 0 when set".to_string());
    }
    Ok(())
  }
}
