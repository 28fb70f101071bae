use cond_error::{CondError, Result};
use serde::{Deserialize, Serialize};

/// Store-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CondConfig {
    /// Worker slots tracked by the RCU domain.
    pub slots: usize,
    /// Initial array capacity of each range map.
    pub capacity: usize,
    /// Retirement-queue length at which a backlog warning is logged (and
    /// again at every multiple).
    pub backlog_warn: usize,
    pub cleaner: CleanerConfig,
}

impl Default for CondConfig {
    fn default() -> Self {
        Self {
            slots: 4,
            capacity: cond_rangemap::DEFAULT_CAPACITY,
            backlog_warn: 1024,
            cleaner: CleanerConfig::default(),
        }
    }
}

/// Settings of the delayed conditions cleaner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Number of recent event times kept as live keys.
    pub ring_size: usize,
    /// Events to wait after an insert before trimming the container.
    pub clean_delay: u64,
    /// Also trim dependents of a cleaned container.
    pub cascade: bool,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            ring_size: 100,
            clean_delay: 100,
            cascade: true,
        }
    }
}

impl CondConfig {
    /// Parse from JSON; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CondError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.slots == 0 {
            return Err(CondError::Config("slots must be at least 1".to_owned()));
        }
        if self.capacity == 0 {
            return Err(CondError::Config("capacity must be at least 1".to_owned()));
        }
        if self.backlog_warn == 0 {
            return Err(CondError::Config("backlog_warn must be at least 1".to_owned()));
        }
        if self.cleaner.ring_size == 0 {
            return Err(CondError::Config("cleaner.ring_size must be at least 1".to_owned()));
        }
        Ok(())
    }
}
