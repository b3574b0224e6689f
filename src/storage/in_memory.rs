//! In-memory array storage keyed by branch and period

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::arrays::Array;
use crate::periods::Period;

/// Memory footprint of a storage or holder
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub nb_arrays: usize,
    pub total_nb_bytes: usize,
    /// Bytes per cell of the first stored array, 0 when empty
    pub cell_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    is_eternal: bool,
    arrays: BTreeMap<(String, Period), Array>,
}

impl InMemoryStorage {
    pub fn new(is_eternal: bool) -> Self {
        Self {
            is_eternal,
            arrays: BTreeMap::new(),
        }
    }

    fn key_period(&self, period: Period) -> Period {
        if self.is_eternal {
            Period::eternity()
        } else {
            period
        }
    }

    pub fn get(&self, period: Period, branch: &str) -> Option<&Array> {
        let period = self.key_period(period);
        self.arrays.get(&(branch.to_string(), period))
    }

    pub fn put(&mut self, array: Array, period: Period, branch: &str) {
        let period = self.key_period(period);
        self.arrays.insert((branch.to_string(), period), array);
    }

    /// Remove every entry whose period lies within `period`, in all branches
    ///
    /// With no period, the storage is cleared.
    pub fn delete(&mut self, period: Option<Period>) {
        match period {
            None => self.arrays.clear(),
            Some(period) => {
                let period = self.key_period(period);
                self.arrays.retain(|(_, stored), _| !period.contains(stored));
            }
        }
    }

    pub fn get_known_periods(&self) -> Vec<Period> {
        let periods: BTreeSet<Period> = self.arrays.keys().map(|(_, p)| *p).collect();
        periods.into_iter().collect()
    }

    pub fn get_known_branch_periods(&self) -> Vec<(String, Period)> {
        self.arrays.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn get_memory_usage(&self) -> MemoryUsage {
        let Some(first) = self.arrays.values().next() else {
            return MemoryUsage::default();
        };
        MemoryUsage {
            nb_arrays: self.arrays.len(),
            total_nb_bytes: self.arrays.values().map(Array::nbytes).sum(),
            cell_size: if first.is_empty() { 0 } else { first.nbytes() / first.len() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periods::period;

    fn p(s: &str) -> Period {
        period(s).unwrap()
    }

    #[test]
    fn test_exact_key_lookup() {
        let mut storage = InMemoryStorage::new(false);
        storage.put(Array::Float(vec![1.0]), p("2018-04"), "default");
        assert_eq!(storage.get(p("2018-04"), "default"), Some(&Array::Float(vec![1.0])));
        assert!(storage.get(p("2018"), "default").is_none());
        assert!(storage.get(p("2018-04"), "reform").is_none());
    }

    #[test]
    fn test_delete_by_containment_across_branches() {
        let mut storage = InMemoryStorage::new(false);
        storage.put(Array::Float(vec![1.0]), p("2018-04"), "default");
        storage.put(Array::Float(vec![2.0]), p("2018-05"), "reform");
        storage.put(Array::Float(vec![3.0]), p("2019-01"), "default");
        storage.delete(Some(p("2018")));
        assert_eq!(storage.get_known_periods(), vec![p("2019-01")]);
        storage.delete(None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_eternal_storage_collapses_periods() {
        let mut storage = InMemoryStorage::new(true);
        storage.put(Array::Int(vec![42]), p("2018-04"), "default");
        assert_eq!(storage.get(p("2030"), "default"), Some(&Array::Int(vec![42])));
        assert_eq!(storage.get_known_periods(), vec![Period::eternity()]);
    }

    #[test]
    fn test_memory_usage() {
        let mut storage = InMemoryStorage::new(false);
        assert_eq!(storage.get_memory_usage().nb_arrays, 0);
        storage.put(Array::Float(vec![1.0, 2.0]), p("2018"), "default");
        storage.put(Array::Float(vec![1.0, 2.0]), p("2019"), "default");
        let usage = storage.get_memory_usage();
        assert_eq!(usage.nb_arrays, 2);
        assert_eq!(usage.total_nb_bytes, 32);
        assert_eq!(usage.cell_size, 8);
    }
}
