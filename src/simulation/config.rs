//! Simulation settings

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::periods::Period;
use crate::storage::MemoryConfig;

/// Settings for one simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Build a full computation tree instead of keeping only the stack
    pub trace: bool,

    /// Previous frames of a variable tolerated before a spiral is cut
    pub max_spiral_loops: usize,

    /// Frames allowed on the calculation stack
    ///
    /// Nested requests are native calls, so this must fit the calling
    /// thread's stack.
    pub max_stack_depth: usize,

    /// Spill and drop rules for cached arrays
    pub memory_config: Option<MemoryConfig>,

    /// Root of spill files; a fresh temporary directory when unset
    pub data_storage_dir: Option<PathBuf>,

    /// Period used by `calculate_default`
    pub default_calculation_period: Option<Period>,

    /// Directory of the cross-run cache of computed arrays
    pub macro_cache_dir: Option<PathBuf>,

    /// Subdirectory of `macro_cache_dir` for this population, such as a
    /// dataset name; derived from the population ids when unset
    pub macro_cache_scope: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trace: false,
            max_spiral_loops: 1,
            max_stack_depth: 1_000,
            memory_config: None,
            data_storage_dir: None,
            default_calculation_period: None,
            macro_cache_dir: None,
            macro_cache_scope: None,
        }
    }
}

impl SimulationConfig {
    /// Default settings with full tracing
    pub fn traced() -> Self {
        Self {
            trace: true,
            ..Self::default()
        }
    }

    pub fn with_max_spiral_loops(mut self, loops: usize) -> Self {
        self.max_spiral_loops = loops;
        self
    }

    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    pub fn with_memory_config(mut self, config: MemoryConfig) -> Self {
        self.memory_config = Some(config);
        self
    }

    pub fn with_data_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_storage_dir = Some(dir.into());
        self
    }

    pub fn with_default_calculation_period(mut self, period: Period) -> Self {
        self.default_calculation_period = Some(period);
        self
    }

    pub fn with_macro_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.macro_cache_dir = Some(dir.into());
        self
    }

    pub fn with_macro_cache_scope(mut self, scope: impl Into<String>) -> Self {
        self.macro_cache_scope = Some(scope.into());
        self
    }
}
