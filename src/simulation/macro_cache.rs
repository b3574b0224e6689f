//! Cross-run cache of computed arrays
//!
//! One JSON file per `(variable, period, branch)` under a directory, plus a
//! `versions.json` recording the engine and country package versions that
//! produced them. Opening the cache with different versions wipes it.
//! Simulations open one directory per population, and an array whose length
//! does not match the population is never served.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::arrays::Array;
use crate::errors::StorageError;
use crate::periods::Period;
use crate::storage::{read_json, write_json, StoredArray};
use crate::variables::Variable;

const VERSIONS_FILE: &str = "versions.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Versions {
    core_version: String,
    country_version: String,
}

#[derive(Debug)]
pub struct MacroCache {
    dir: PathBuf,
    versions: Versions,
}

impl MacroCache {
    /// Open `dir`, clearing it if it was written by other versions
    pub fn open(
        dir: impl Into<PathBuf>,
        core_version: &str,
        country_version: &str,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        let cache = Self {
            dir,
            versions: Versions {
                core_version: core_version.to_string(),
                country_version: country_version.to_string(),
            },
        };
        let versions_path = cache.dir.join(VERSIONS_FILE);
        let stored: Option<Versions> = if versions_path.exists() {
            read_json(&versions_path).ok()
        } else {
            None
        };
        match stored {
            Some(stored) if stored == cache.versions => {}
            Some(stored) => {
                log::warn!(
                    "macro cache at {} was built by {}/{}, resetting for {}/{}",
                    cache.dir.display(),
                    stored.core_version,
                    stored.country_version,
                    core_version,
                    country_version
                );
                cache.clear()?;
            }
            None => cache.clear()?,
        }
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, variable: &str, period: Period, branch: &str) -> PathBuf {
        self.dir.join(format!("{}_{}_{}.json", variable, period, branch))
    }

    /// Cached value of `variable`, if one of `count` members is stored
    pub fn get(
        &self,
        variable: &Variable,
        period: Period,
        branch: &str,
        count: usize,
    ) -> Result<Option<Array>, StorageError> {
        let path = self.file(&variable.name, period, branch);
        if !path.exists() {
            return Ok(None);
        }
        let stored: StoredArray = read_json(&path)?;
        let array = stored.into_array(variable.possible_values.as_ref());
        if array.len() != count {
            log::debug!(
                "ignoring cached {}@{}: {} values for {} members",
                variable.name,
                period,
                array.len(),
                count
            );
            return Ok(None);
        }
        Ok(Some(array))
    }

    pub fn set(&self, variable: &str, period: Period, branch: &str, value: &Array) -> Result<(), StorageError> {
        write_json(&self.file(variable, period, branch), &StoredArray::from_array(value))
    }

    /// Remove every cached array and stamp the current versions
    pub fn clear(&self) -> Result<(), StorageError> {
        let io = |source| StorageError::Io {
            path: self.dir.clone(),
            source,
        };
        for entry in fs::read_dir(&self.dir).map_err(io)? {
            let path = entry.map_err(io)?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path).map_err(|source| StorageError::Io { path, source })?;
            }
        }
        write_json(&self.dir.join(VERSIONS_FILE), &self.versions)
    }
}
