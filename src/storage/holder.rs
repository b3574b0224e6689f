//! Per-variable value cache
//!
//! A `Holder` keeps the arrays of one variable for one population, across
//! branches and periods. Arrays live in memory until the simulation's memory
//! budget is exhausted, then non-priority variables spill to disk.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::in_memory::{InMemoryStorage, MemoryUsage};
use super::memory_config::MemoryConfig;
use super::on_disk::OnDiskStorage;
use crate::arrays::Array;
use crate::errors::{CalculationError, Result, StorageError};
use crate::periods::{DateUnit, Period};
use crate::variables::{InputSplit, Variable};

/// Bytes held in memory by all holders of one simulation
pub type MemoryMeter = Arc<AtomicUsize>;

/// Memory and disk footprint of a holder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HolderMemoryUsage {
    #[serde(flatten)]
    pub memory: MemoryUsage,
    pub nb_cells_by_array: usize,
    pub dtype: String,
    pub nb_arrays_on_disk: usize,
}

/// Spill settings shared by the holders of one simulation
#[derive(Debug, Clone)]
pub struct SpillSettings {
    pub config: Arc<MemoryConfig>,
    pub storage_dir: PathBuf,
    pub meter: MemoryMeter,
}

#[derive(Debug)]
pub struct Holder {
    variable: Arc<Variable>,
    count: usize,
    memory_storage: InMemoryStorage,
    disk_storage: Option<OnDiskStorage>,
    spill: Option<SpillSettings>,
}

impl Holder {
    pub fn new(variable: Arc<Variable>, count: usize) -> Self {
        let is_eternal = variable.is_eternal();
        Self {
            variable,
            count,
            memory_storage: InMemoryStorage::new(is_eternal),
            disk_storage: None,
            spill: None,
        }
    }

    pub fn with_spill(mut self, spill: Option<SpillSettings>) -> Self {
        self.spill = spill;
        self
    }

    pub fn variable(&self) -> &Arc<Variable> {
        &self.variable
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Population-length array of the variable's default value
    pub fn default_array(&self) -> Array {
        Array::filled(
            self.variable.value_type,
            &self.variable.default_value,
            self.count,
            self.variable.possible_values.as_ref(),
        )
    }

    /// Stored array for the exact `(period, branch)` key, from memory then disk
    pub fn get_array(&self, period: Period, branch: &str) -> Result<Option<Array>, StorageError> {
        if let Some(array) = self.memory_storage.get(period, branch) {
            return Ok(Some(array.clone()));
        }
        match &self.disk_storage {
            Some(disk) => disk.get(period, branch),
            None => Ok(None),
        }
    }

    /// Validate and store an input value
    pub fn set_input(&mut self, period: Period, array: Array, branch: &str) -> Result<()> {
        let name = &self.variable.name;
        if array.len() != self.count {
            return Err(CalculationError::InvalidArraySize {
                variable: name.clone(),
                expected: self.count,
                actual: array.len(),
            });
        }
        let array = array
            .cast(self.variable.value_type, self.variable.possible_values.as_ref())
            .map_err(|message| CalculationError::formula(name.clone(), message))?;

        let definition = self.variable.definition_period;
        if definition == DateUnit::Eternity
            || (period.unit() == definition && period.size() == 1)
        {
            return self.put_in_cache(array, period, branch);
        }
        if period.is_eternity() || period.unit().weight() < definition.weight() {
            return Err(self.input_period_error(period));
        }
        match self.variable.input_split {
            None => Err(self.input_period_error(period)),
            Some(split) => {
                let subperiods: Vec<Period> = period.get_subperiods(definition)?.collect();
                let share = match split {
                    InputSplit::Dispatch => array,
                    InputSplit::Divide => {
                        let n = subperiods.len() as f64;
                        Array::Float(array.to_f64().into_iter().map(|v| v / n).collect())
                            .cast(self.variable.value_type, self.variable.possible_values.as_ref())
                            .map_err(|message| CalculationError::formula(name.clone(), message))?
                    }
                };
                for sub in subperiods {
                    self.put_in_cache(share.clone(), sub, branch)?;
                }
                Ok(())
            }
        }
    }

    fn input_period_error(&self, period: Period) -> CalculationError {
        let unit = self.variable.definition_period;
        CalculationError::PeriodMismatch(format!(
            "Unable to set a value for variable '{0}' for {1}-long period '{2}'. '{0}' can only be set for one {3} at a time. \
             Declare an input split (dispatch or divide) on '{0}', or set the value for each {3} and use ADD/DIVIDE when calculating.",
            self.variable.name,
            period.unit(),
            period,
            unit
        ))
    }

    /// Store a computed or input array, honouring the memory configuration
    pub fn put_in_cache(&mut self, array: Array, period: Period, branch: &str) -> Result<()> {
        let Some(spill) = self.spill.clone() else {
            self.memory_storage.put(array, period, branch);
            return Ok(());
        };
        let name = &self.variable.name;
        if spill.config.should_drop(name) {
            return Ok(());
        }
        let used = spill.meter.load(Ordering::Relaxed);
        if !spill.config.is_priority(name) && used + array.nbytes() > spill.config.max_memory_bytes() {
            if self.disk_storage.is_none() {
                log::debug!("spilling '{}' to {}", name, spill.storage_dir.display());
                self.disk_storage = Some(OnDiskStorage::new(
                    spill.storage_dir.join(name),
                    self.variable.is_eternal(),
                    false,
                    self.variable.possible_values.clone(),
                )?);
            }
            if let Some(disk) = self.disk_storage.as_mut() {
                disk.put(&array, period, branch)?;
            }
            return Ok(());
        }
        self.track_memory(|storage| storage.put(array, period, branch));
        Ok(())
    }

    fn track_memory(&mut self, op: impl FnOnce(&mut InMemoryStorage)) {
        let before = self.memory_storage.get_memory_usage().total_nb_bytes;
        op(&mut self.memory_storage);
        let after = self.memory_storage.get_memory_usage().total_nb_bytes;
        if let Some(spill) = &self.spill {
            if after >= before {
                spill.meter.fetch_add(after - before, Ordering::Relaxed);
            } else {
                spill.meter.fetch_sub(before - after, Ordering::Relaxed);
            }
        }
    }

    /// Delete values for periods within `period` (all periods if `None`)
    ///
    /// Memory deletes by containment in every branch; disk deletes the exact
    /// key of `branch`.
    pub fn delete_arrays(&mut self, period: Option<Period>, branch: &str) {
        self.track_memory(|storage| storage.delete(period));
        if let Some(disk) = self.disk_storage.as_mut() {
            disk.delete(period, branch);
        }
    }

    /// Periods with a stored value, in any branch
    pub fn get_known_periods(&self) -> Vec<Period> {
        let mut periods = self.memory_storage.get_known_periods();
        if let Some(disk) = &self.disk_storage {
            periods.extend(disk.get_known_periods());
        }
        periods.sort();
        periods.dedup();
        periods
    }

    /// Periods with a stored value in `branch`, in chronological order
    pub fn get_known_periods_in(&self, branch: &str) -> Vec<Period> {
        let mut periods: Vec<Period> = self
            .memory_storage
            .get_known_branch_periods()
            .into_iter()
            .chain(
                self.disk_storage
                    .iter()
                    .flat_map(OnDiskStorage::get_known_branch_periods),
            )
            .filter(|(b, _)| b == branch)
            .map(|(_, period)| period)
            .collect();
        periods.sort_by_key(|p| (p.start(), p.unit().weight(), p.size()));
        periods.dedup();
        periods
    }

    pub fn get_memory_usage(&self) -> HolderMemoryUsage {
        HolderMemoryUsage {
            memory: self.memory_storage.get_memory_usage(),
            nb_cells_by_array: self.count,
            dtype: self.variable.value_type.to_string(),
            nb_arrays_on_disk: self.disk_storage.as_ref().map_or(0, OnDiskStorage::len),
        }
    }

    /// Independent copy for another simulation
    ///
    /// Spilled arrays are read back into memory so the copy never shares a
    /// storage directory with the original.
    pub fn duplicate(&self, spill: Option<SpillSettings>) -> Result<Holder> {
        let mut copy = Holder::new(Arc::clone(&self.variable), self.count).with_spill(spill);
        copy.memory_storage = self.memory_storage.clone();
        if let Some(meter) = copy.spill.as_ref().map(|s| &s.meter) {
            meter.fetch_add(copy.memory_storage.get_memory_usage().total_nb_bytes, Ordering::Relaxed);
        }
        if let Some(disk) = &self.disk_storage {
            for (branch, period) in disk.get_known_branch_periods() {
                if let Some(array) = disk.get(period, &branch)? {
                    copy.track_memory(|storage| storage.put(array, period, &branch));
                }
            }
        }
        Ok(copy)
    }
}

impl Drop for Holder {
    fn drop(&mut self) {
        let bytes = self.memory_storage.get_memory_usage().total_nb_bytes;
        if let Some(spill) = &self.spill {
            spill.meter.fetch_sub(bytes.min(spill.meter.load(Ordering::Relaxed)), Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::ValueType;
    use crate::periods::period;

    fn p(s: &str) -> Period {
        period(s).unwrap()
    }

    fn salary_holder() -> Holder {
        let variable = Variable::new("salary", "person", ValueType::Float, DateUnit::Month);
        Holder::new(Arc::new(variable), 2)
    }

    #[test]
    fn test_set_input_and_delete() {
        let mut holder = salary_holder();
        holder.set_input(p("2018-04"), Array::Float(vec![12.0, 14.0]), "default").unwrap();
        holder.set_input(p("2018-05"), Array::Int(vec![13, 15]), "default").unwrap();
        assert_eq!(
            holder.get_array(p("2018-05"), "default").unwrap(),
            Some(Array::Float(vec![13.0, 15.0]))
        );
        holder.delete_arrays(Some(p("2018-05")), "default");
        assert!(holder.get_array(p("2018-05"), "default").unwrap().is_none());
        assert!(holder.get_array(p("2018-04"), "default").unwrap().is_some());
    }

    #[test]
    fn test_set_input_rejects_wrong_length() {
        let mut holder = salary_holder();
        match holder.set_input(p("2018-04"), Array::Float(vec![1.0]), "default") {
            Err(CalculationError::InvalidArraySize { expected, actual, .. }) => {
                assert_eq!((expected, actual), (2, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_set_input_rejects_mismatched_period() {
        let mut holder = salary_holder();
        let err = holder
            .set_input(p("2018"), Array::Float(vec![1.0, 2.0]), "default")
            .unwrap_err();
        assert!(err.to_string().contains("ADD/DIVIDE"));
    }

    #[test]
    fn test_set_input_divides_over_months() {
        let variable = Variable::new("salary", "person", ValueType::Float, DateUnit::Month)
            .with_input_split(InputSplit::Divide);
        let mut holder = Holder::new(Arc::new(variable), 1);
        holder.set_input(p("2018"), Array::Float(vec![120.0]), "default").unwrap();
        assert_eq!(holder.get_known_periods().len(), 12);
        assert_eq!(
            holder.get_array(p("2018-07"), "default").unwrap(),
            Some(Array::Float(vec![10.0]))
        );
    }

    #[test]
    fn test_eternal_variable_accepts_any_period() {
        let variable = Variable::new("birth_year", "person", ValueType::Int, DateUnit::Eternity);
        let mut holder = Holder::new(Arc::new(variable), 1);
        holder.set_input(p("2018-04"), Array::Int(vec![1980]), "default").unwrap();
        assert_eq!(holder.get_array(p("2050"), "default").unwrap(), Some(Array::Int(vec![1980])));
    }

    #[test]
    fn test_spills_non_priority_variables() {
        let root = tempfile::tempdir().unwrap();
        let config = MemoryConfig::new(1.0, vec![], vec!["dropped".to_string()])
            .unwrap()
            .with_budget(16);
        let spill = SpillSettings {
            config: Arc::new(config),
            storage_dir: root.path().join("sim"),
            meter: Arc::new(AtomicUsize::new(0)),
        };
        let mut holder = salary_holder().with_spill(Some(spill.clone()));
        holder.put_in_cache(Array::Float(vec![1.0, 2.0]), p("2018-01"), "default").unwrap();
        holder.put_in_cache(Array::Float(vec![3.0, 4.0]), p("2018-02"), "default").unwrap();
        let usage = holder.get_memory_usage();
        assert_eq!(usage.memory.nb_arrays, 1);
        assert_eq!(usage.nb_arrays_on_disk, 1);
        assert_eq!(
            holder.get_array(p("2018-02"), "default").unwrap(),
            Some(Array::Float(vec![3.0, 4.0]))
        );

        let dropped = Variable::new("dropped", "person", ValueType::Float, DateUnit::Month);
        let mut dropped = Holder::new(Arc::new(dropped), 2).with_spill(Some(spill));
        dropped.put_in_cache(Array::Float(vec![1.0, 2.0]), p("2018-01"), "default").unwrap();
        assert!(dropped.get_known_periods().is_empty());
    }

    #[test]
    fn test_duplicate_is_independent() {
        let mut holder = salary_holder();
        holder.set_input(p("2018-04"), Array::Float(vec![1.0, 2.0]), "default").unwrap();
        let mut copy = holder.duplicate(None).unwrap();
        copy.delete_arrays(None, "default");
        assert!(copy.get_known_periods().is_empty());
        assert_eq!(holder.get_known_periods(), vec![p("2018-04")]);
    }

    #[test]
    fn test_known_periods_by_branch() {
        let mut holder = salary_holder();
        holder.put_in_cache(Array::Float(vec![1.0, 2.0]), p("2018-03"), "default").unwrap();
        holder.put_in_cache(Array::Float(vec![1.0, 2.0]), p("2018-01"), "default").unwrap();
        holder.put_in_cache(Array::Float(vec![5.0, 6.0]), p("2018-02"), "reform").unwrap();
        assert_eq!(holder.get_known_periods_in("default"), vec![p("2018-01"), p("2018-03")]);
        assert_eq!(holder.get_known_periods_in("reform"), vec![p("2018-02")]);
        assert!(holder.get_known_periods_in("other").is_empty());
    }
}
