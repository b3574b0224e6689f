//! Column table returned by `Simulation::calculate_dataframe`

use std::io;
use std::path::Path;

use serde::Serialize;

use crate::errors::{CalculationError, StorageError};

/// Named f64 columns over the members of one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataFrame {
    entity: String,
    index: Vec<String>,
    columns: Vec<(String, Vec<f64>)>,
}

impl DataFrame {
    pub fn new(entity: impl Into<String>, index: Vec<String>) -> Self {
        Self {
            entity: entity.into(),
            index,
            columns: Vec::new(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Member ids, one per row
    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Append a column, replacing any column of the same name
    pub fn push_column(&mut self, name: &str, values: Vec<f64>) -> Result<(), CalculationError> {
        if values.len() != self.index.len() {
            return Err(CalculationError::InvalidArraySize {
                variable: name.to_string(),
                expected: self.index.len(),
                actual: values.len(),
            });
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((name.to_string(), values)),
        }
        Ok(())
    }

    /// Write as CSV with the entity's id column first
    pub fn to_csv<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(writer);
        let mut header = vec![format!("{}_id", self.entity)];
        header.extend(self.column_names().map(str::to_string));
        writer.write_record(&header)?;
        for (row, id) in self.index.iter().enumerate() {
            let mut record = vec![id.clone()];
            record.extend(self.columns.iter().map(|(_, values)| values[row].to_string()));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), StorageError> {
        let file = std::fs::File::create(path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.to_csv(file).map_err(|source| StorageError::Csv {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_and_csv() {
        let mut frame = DataFrame::new("person", vec!["a".into(), "b".into()]);
        frame.push_column("salary", vec![1000.0, 2000.5]).unwrap();
        frame.push_column("tax", vec![150.0, 300.0]).unwrap();
        assert!(frame.push_column("bad", vec![1.0]).is_err());
        frame.push_column("tax", vec![0.0, 0.0]).unwrap();
        assert_eq!(frame.column_names().collect::<Vec<_>>(), vec!["salary", "tax"]);
        assert_eq!(frame.column("tax"), Some(&[0.0, 0.0][..]));

        let mut out = Vec::new();
        frame.to_csv(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "person_id,salary,tax\na,1000,0\nb,2000.5,0\n"
        );
    }
}
