use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use thiserror::Error;

use crate::engine::{DEFAULT_CAPACITY, MAX_ADDRESSABLE};
use crate::dispatcher::MAX_CHUNK;

/// Runtime settings for the engine, the dispatcher and its channels.
///
/// Every field has a default, so a JSON file only needs to name the values
/// it changes. Command-line flags are applied on top of the file in
/// `main.rs`.
///
/// ## File Format
/// ```json
/// {
///   "capacity": 100000,
///   "workers": 8,
///   "intake_capacity": 10,
///   "outbound_capacity": 10,
///   "max_chunk": 1024,
///   "lock_timeout_ms": null
/// }
/// ```
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of record slots; valid ids are `0..capacity`
    pub capacity: usize,
    /// Size of the worker pool executing queries
    pub workers: usize,
    /// Bound of the shared intake queue; submitters wait when it is full
    pub intake_capacity: usize,
    /// Bound of each requester's outbound queue, in messages
    pub outbound_capacity: usize,
    /// Largest data chunk of a response, in bytes
    pub max_chunk: usize,
    /// Give up on a slot lock after this many milliseconds (`None` waits forever)
    pub lock_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            intake_capacity: 10,
            outbound_capacity: 10,
            max_chunk: MAX_CHUNK,
            lock_timeout_ms: None,
        }
    }
}

/// A configuration value the engine cannot run with.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("capacity {0} exceeds the largest record id")]
    CapacityTooLarge(usize),
}

impl EngineConfig {
    /// Reads a JSON configuration file and validates it.
    ///
    /// Missing fields fall back to [`EngineConfig::default`].
    ///
    /// ## Returns
    /// * `Ok(config)` - Parsed and validated settings
    /// * `Err(_)` - File I/O, JSON syntax or validation errors
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        let config: EngineConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every bound is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("capacity", self.capacity),
            ("workers", self.workers),
            ("intake_capacity", self.intake_capacity),
            ("outbound_capacity", self.outbound_capacity),
            ("max_chunk", self.max_chunk),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.capacity > MAX_ADDRESSABLE {
            return Err(ConfigError::CapacityTooLarge(self.capacity));
        }
        Ok(())
    }
}
