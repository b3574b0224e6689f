//! Memory limits for holder caches

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::StorageError;

/// Reference budget that `max_memory_occupation` is a fraction of (1 GiB)
pub const DEFAULT_MEMORY_BUDGET_BYTES: usize = 1 << 30;

/// Controls when computed arrays spill to disk or are not kept at all
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Fraction of the memory budget that in-memory caches may occupy, at most 1
    pub max_memory_occupation: f64,

    /// Budget in bytes that the occupation fraction applies to
    #[serde(default = "default_budget")]
    pub memory_budget_bytes: usize,

    /// Variables always kept in memory
    #[serde(default)]
    pub priority_variables: BTreeSet<String>,

    /// Variables whose computed values are never cached
    #[serde(default)]
    pub variables_to_drop: BTreeSet<String>,
}

fn default_budget() -> usize {
    DEFAULT_MEMORY_BUDGET_BYTES
}

impl MemoryConfig {
    pub fn new(
        max_memory_occupation: f64,
        priority_variables: impl IntoIterator<Item = String>,
        variables_to_drop: impl IntoIterator<Item = String>,
    ) -> Result<Self, StorageError> {
        let config = Self {
            max_memory_occupation,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            priority_variables: priority_variables.into_iter().collect(),
            variables_to_drop: variables_to_drop.into_iter().collect(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_budget(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if !(0.0..=1.0).contains(&self.max_memory_occupation) {
            return Err(StorageError::Config(format!(
                "max_memory_occupation must be <= 1, got {}",
                self.max_memory_occupation
            )));
        }
        Ok(())
    }

    pub fn max_memory_bytes(&self) -> usize {
        (self.memory_budget_bytes as f64 * self.max_memory_occupation) as usize
    }

    pub fn should_drop(&self, variable: &str) -> bool {
        self.variables_to_drop.contains(variable)
    }

    pub fn is_priority(&self, variable: &str) -> bool {
        self.priority_variables.contains(variable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_occupation_above_one() {
        assert!(MemoryConfig::new(1.5, Vec::new(), Vec::new()).is_err());
        assert!(MemoryConfig::new(1.0, Vec::new(), Vec::new()).is_ok());
    }

    #[test]
    fn test_limits() {
        let config = MemoryConfig::new(0.5, vec!["salary".to_string()], vec!["age".to_string()])
            .unwrap()
            .with_budget(1000);
        assert_eq!(config.max_memory_bytes(), 500);
        assert!(config.is_priority("salary"));
        assert!(config.should_drop("age"));
        assert!(!config.should_drop("salary"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: MemoryConfig = serde_json::from_str(r#"{"max_memory_occupation": 0.2}"#).unwrap();
        assert_eq!(config.memory_budget_bytes, DEFAULT_MEMORY_BUDGET_BYTES);
        assert!(config.priority_variables.is_empty());
    }
}
