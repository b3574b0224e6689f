//! Spill-to-disk array storage
//!
//! Each array lives in `{dir}/{branch}_{period}.json`. Enum item names are not
//! written to the files; the storage keeps the enumeration and re-attaches it
//! on load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::arrays::{Array, EnumArray, PossibleValues};
use crate::errors::StorageError;
use crate::periods::{period, Period};

/// Serialized form of an [`Array`], without enum item names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub(crate) enum StoredArray {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
    Enum(Vec<i16>),
}

impl StoredArray {
    pub(crate) fn from_array(array: &Array) -> Self {
        match array {
            Array::Float(v) => StoredArray::Float(v.clone()),
            Array::Int(v) => StoredArray::Int(v.clone()),
            Array::Bool(v) => StoredArray::Bool(v.clone()),
            Array::Str(v) => StoredArray::Str(v.clone()),
            Array::Enum(e) => StoredArray::Enum(e.indices.clone()),
        }
    }

    /// Enum indices without known possible values decode as integers
    pub(crate) fn into_array(self, possible_values: Option<&Arc<PossibleValues>>) -> Array {
        match self {
            StoredArray::Float(v) => Array::Float(v),
            StoredArray::Int(v) => Array::Int(v),
            StoredArray::Bool(v) => Array::Bool(v),
            StoredArray::Str(v) => Array::Str(v),
            StoredArray::Enum(indices) => match possible_values {
                Some(pv) => Array::Enum(EnumArray {
                    indices,
                    possible_values: Arc::clone(pv),
                }),
                None => Array::Int(indices.into_iter().map(i64::from).collect()),
            },
        }
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let text = serde_json::to_string(value).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StorageError> {
    let text = fs::read_to_string(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug)]
pub struct OnDiskStorage {
    storage_dir: PathBuf,
    is_eternal: bool,
    preserve_storage_dir: bool,
    possible_values: Option<Arc<PossibleValues>>,
    /// `{branch}_{period}` -> file path
    files: BTreeMap<String, PathBuf>,
}

impl OnDiskStorage {
    /// Create the storage, creating `storage_dir` if needed
    pub fn new(
        storage_dir: impl Into<PathBuf>,
        is_eternal: bool,
        preserve_storage_dir: bool,
        possible_values: Option<Arc<PossibleValues>>,
    ) -> Result<Self, StorageError> {
        let storage_dir = storage_dir.into();
        fs::create_dir_all(&storage_dir).map_err(|source| StorageError::Io {
            path: storage_dir.clone(),
            source,
        })?;
        Ok(Self {
            storage_dir,
            is_eternal,
            preserve_storage_dir,
            possible_values,
            files: BTreeMap::new(),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn key_period(&self, period: Period) -> Period {
        if self.is_eternal {
            Period::eternity()
        } else {
            period
        }
    }

    fn file_key(branch: &str, period: Period) -> String {
        format!("{}_{}", branch, period)
    }

    pub fn get(&self, period: Period, branch: &str) -> Result<Option<Array>, StorageError> {
        let key = Self::file_key(branch, self.key_period(period));
        match self.files.get(&key) {
            None => Ok(None),
            Some(path) => {
                let stored: StoredArray = read_json(path)?;
                Ok(Some(stored.into_array(self.possible_values.as_ref())))
            }
        }
    }

    pub fn put(&mut self, array: &Array, period: Period, branch: &str) -> Result<(), StorageError> {
        let key = Self::file_key(branch, self.key_period(period));
        let path = self.storage_dir.join(format!("{}.json", key));
        if let Array::Enum(e) = array {
            self.possible_values.get_or_insert_with(|| Arc::clone(&e.possible_values));
        }
        write_json(&path, &StoredArray::from_array(array))?;
        self.files.insert(key, path);
        Ok(())
    }

    /// Forget the exact `(branch, period)` entry, or every entry with no period
    pub fn delete(&mut self, period: Option<Period>, branch: &str) {
        match period {
            None => self.files.clear(),
            Some(period) => {
                let key = Self::file_key(branch, self.key_period(period));
                self.files.remove(&key);
            }
        }
    }

    pub fn get_known_periods(&self) -> Vec<Period> {
        let mut periods: Vec<Period> = self
            .get_known_branch_periods()
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        periods.sort();
        periods.dedup();
        periods
    }

    pub fn get_known_branch_periods(&self) -> Vec<(String, Period)> {
        self.files
            .keys()
            .filter_map(|key| {
                let (branch, raw) = key.rsplit_once('_')?;
                period(raw).ok().map(|p| (branch.to_string(), p))
            })
            .collect()
    }

    /// Rebuild the file index from the contents of the storage directory
    pub fn restore(&mut self) -> Result<(), StorageError> {
        let entries = fs::read_dir(&self.storage_dir).map_err(|source| StorageError::Io {
            path: self.storage_dir.clone(),
            source,
        })?;
        self.files.clear();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                path: self.storage_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                self.files.insert(stem.to_string(), path.clone());
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Drop for OnDiskStorage {
    fn drop(&mut self) {
        if self.preserve_storage_dir {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.storage_dir) {
            log::debug!("could not remove {}: {}", self.storage_dir.display(), e);
            return;
        }
        if let Some(parent) = self.storage_dir.parent() {
            let is_empty = fs::read_dir(parent)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if is_empty {
                let _ = fs::remove_dir(parent);
            }
        }
    }
}
