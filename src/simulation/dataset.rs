//! Microdata sources for `SimulationBuilder::build_from_dataset`
//!
//! A dataset is a flat set of named columns, each as long as the entity it
//! describes. Identifier columns follow the `{entity}_id` and
//! `{person}_{group}_id` conventions; a column named `var__PERIOD` holds the
//! values of `var` for `PERIOD`, any other column the values for the dataset
//! year.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::StorageError;

/// Raw column values keyed by column name
pub type DatasetColumns = BTreeMap<String, Vec<String>>;

/// Separator between a variable name and a period in a column name
pub const PERIOD_SEPARATOR: &str = "__";

pub trait Dataset {
    fn name(&self) -> &str;

    fn load(&self) -> Result<DatasetColumns, StorageError>;
}

impl Dataset for DatasetColumns {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn load(&self) -> Result<DatasetColumns, StorageError> {
        Ok(self.clone())
    }
}

/// A directory holding one CSV file per entity, e.g. `person.csv`
#[derive(Debug, Clone)]
pub struct CsvDataset {
    name: String,
    dir: PathBuf,
}

impl CsvDataset {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        Self { name, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_file(path: &Path, columns: &mut DatasetColumns) -> Result<(), StorageError> {
        let csv_error = |source| StorageError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut values: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            for (column, field) in values.iter_mut().zip(record.iter()) {
                column.push(field.trim().to_string());
            }
        }
        for (header, column) in headers.into_iter().zip(values) {
            if columns.insert(header.clone(), column).is_some() {
                log::debug!("column '{}' of {} replaces an earlier one", header, path.display());
            }
        }
        Ok(())
    }
}

impl Dataset for CsvDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<DatasetColumns, StorageError> {
        let io_error = |source| StorageError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)
            .map_err(io_error)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()
            .map_err(io_error)?;
        files.retain(|p| p.extension().is_some_and(|ext| ext == "csv"));
        files.sort();
        let mut columns = DatasetColumns::new();
        for file in &files {
            Self::read_file(file, &mut columns)?;
        }
        Ok(columns)
    }
}

/// Split `salary__2020-01` into the variable and its period string
pub fn split_column_name(column: &str) -> (&str, Option<&str>) {
    match column.rsplit_once(PERIOD_SEPARATOR) {
        Some((variable, period)) if !variable.is_empty() && !period.is_empty() => (variable, Some(period)),
        _ => (column, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_split_column_name() {
        assert_eq!(split_column_name("salary"), ("salary", None));
        assert_eq!(split_column_name("salary__2020-01"), ("salary", Some("2020-01")));
        assert_eq!(split_column_name("__2020"), ("__2020", None));
    }

    #[test]
    fn test_csv_dataset_merges_entity_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut person = fs::File::create(dir.path().join("person.csv")).unwrap();
        writeln!(person, "person_id,person_household_id,salary__2020-01").unwrap();
        writeln!(person, "a,h1,1000").unwrap();
        writeln!(person, "b,h1, 2000").unwrap();
        let mut household = fs::File::create(dir.path().join("household.csv")).unwrap();
        writeln!(household, "household_id,rent").unwrap();
        writeln!(household, "h1,500").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let columns = CsvDataset::new(dir.path()).load().unwrap();
        assert_eq!(columns["person_id"], vec!["a", "b"]);
        assert_eq!(columns["salary__2020-01"], vec!["1000", "2000"]);
        assert_eq!(columns["household_id"], vec!["h1"]);
        assert_eq!(columns.len(), 5);
    }

    #[test]
    fn test_missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = CsvDataset::new(dir.path().join("absent"));
        assert!(matches!(dataset.load(), Err(StorageError::Io { .. })));
    }
}
