//! Populations: the members of one entity in a simulation, with their holders

use std::collections::BTreeMap;
use std::sync::Arc;

use super::entity::Entity;
use crate::errors::{CalculationError, Result};
use crate::storage::{Holder, HolderMemoryUsage, SpillSettings};

/// Group membership of every person
///
/// Indexed by person. `group` is the index of the person's group, `role` the
/// index into the group entity's roles, and `position` the person's rank
/// within the group in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Members {
    pub group: Vec<usize>,
    pub role: Vec<Option<usize>>,
    pub position: Vec<usize>,
    group_count: usize,
}

impl Members {
    pub fn new(group: Vec<usize>, role: Vec<Option<usize>>, group_count: usize) -> Result<Self> {
        if group.len() != role.len() {
            return Err(CalculationError::formula(
                "members",
                format!("{} group ids but {} roles", group.len(), role.len()),
            ));
        }
        if let Some(bad) = group.iter().find(|&&g| g >= group_count) {
            return Err(CalculationError::formula(
                "members",
                format!("group index {} out of range for {} groups", bad, group_count),
            ));
        }
        let mut next_position = vec![0usize; group_count];
        let position = group
            .iter()
            .map(|&g| {
                let p = next_position[g];
                next_position[g] += 1;
                p
            })
            .collect();
        Ok(Self {
            group,
            role,
            position,
            group_count,
        })
    }

    pub fn persons_count(&self) -> usize {
        self.group.len()
    }

    pub fn group_count(&self) -> usize {
        self.group_count
    }
}

/// The members of one entity and the holders of its variables
#[derive(Debug)]
pub struct Population {
    entity: Arc<Entity>,
    ids: Vec<String>,
    members: Option<Members>,
    holders: BTreeMap<String, Holder>,
}

impl Population {
    pub fn person(entity: Arc<Entity>, ids: Vec<String>) -> Self {
        Self {
            entity,
            ids,
            members: None,
            holders: BTreeMap::new(),
        }
    }

    pub fn group(entity: Arc<Entity>, ids: Vec<String>, members: Members) -> Result<Self> {
        if members.group_count() != ids.len() {
            return Err(CalculationError::formula(
                entity.key.clone(),
                format!("membership declares {} groups for {} ids", members.group_count(), ids.len()),
            ));
        }
        Ok(Self {
            entity,
            ids,
            members: Some(members),
            holders: BTreeMap::new(),
        })
    }

    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    pub fn key(&self) -> &str {
        &self.entity.key
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn get_index(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|i| i == id)
    }

    pub fn members(&self) -> Option<&Members> {
        self.members.as_ref()
    }

    fn require_members(&self) -> Result<&Members> {
        self.members.as_ref().ok_or_else(|| {
            CalculationError::formula(
                self.entity.key.clone(),
                "aggregation and projection are only available on group entities",
            )
        })
    }

    fn check_person_array(&self, len: usize) -> Result<&Members> {
        let members = self.require_members()?;
        if len != members.persons_count() {
            return Err(CalculationError::InvalidArraySize {
                variable: format!("{} members", self.entity.key),
                expected: members.persons_count(),
                actual: len,
            });
        }
        Ok(members)
    }

    fn role_filter(&self, role: Option<&str>) -> Result<Option<usize>> {
        match role {
            None => Ok(None),
            Some(key) => self.entity.role_index(key).map(Some).ok_or_else(|| CalculationError::RoleNotFound {
                entity: self.entity.key.clone(),
                role: key.to_string(),
            }),
        }
    }

    fn fold<T: Copy>(
        &self,
        values: &[T],
        role: Option<&str>,
        init: T,
        f: impl Fn(T, T) -> T,
    ) -> Result<Vec<T>> {
        let members = self.check_person_array(values.len())?;
        let role = self.role_filter(role)?;
        let mut result = vec![init; self.count()];
        for (i, &value) in values.iter().enumerate() {
            if role.is_none() || members.role[i] == role {
                let g = members.group[i];
                result[g] = f(result[g], value);
            }
        }
        Ok(result)
    }

    /// Sum of members' values per group, optionally restricted to a role
    pub fn sum(&self, values: &[f64], role: Option<&str>) -> Result<Vec<f64>> {
        self.fold(values, role, 0.0, |a, b| a + b)
    }

    pub fn any(&self, values: &[bool], role: Option<&str>) -> Result<Vec<bool>> {
        self.fold(values, role, false, |a, b| a || b)
    }

    pub fn all(&self, values: &[bool], role: Option<&str>) -> Result<Vec<bool>> {
        self.fold(values, role, true, |a, b| a && b)
    }

    /// Smallest member value; groups without matching members get `f64::INFINITY`
    pub fn min(&self, values: &[f64], role: Option<&str>) -> Result<Vec<f64>> {
        self.fold(values, role, f64::INFINITY, f64::min)
    }

    /// Largest member value; groups without matching members get `f64::NEG_INFINITY`
    pub fn max(&self, values: &[f64], role: Option<&str>) -> Result<Vec<f64>> {
        self.fold(values, role, f64::NEG_INFINITY, f64::max)
    }

    /// Number of members per group, optionally with a given role
    pub fn nb_persons(&self, role: Option<&str>) -> Result<Vec<f64>> {
        let members = self.require_members()?;
        self.sum(&vec![1.0; members.persons_count()], role)
    }

    /// Value of the `n`-th member of each group, `default` where there is none
    pub fn value_nth_person(&self, n: usize, values: &[f64], default: f64) -> Result<Vec<f64>> {
        let members = self.check_person_array(values.len())?;
        let mut result = vec![default; self.count()];
        for (i, &value) in values.iter().enumerate() {
            if members.position[i] == n {
                result[members.group[i]] = value;
            }
        }
        Ok(result)
    }

    pub fn value_from_first_person(&self, values: &[f64]) -> Result<Vec<f64>> {
        self.value_nth_person(0, values, 0.0)
    }

    /// Broadcast group values to their members
    pub fn project<T: Clone>(&self, values: &[T]) -> Result<Vec<T>> {
        let members = self.require_members()?;
        if values.len() != self.count() {
            return Err(CalculationError::InvalidArraySize {
                variable: format!("{} values", self.entity.key),
                expected: self.count(),
                actual: values.len(),
            });
        }
        Ok(members.group.iter().map(|&g| values[g].clone()).collect())
    }

    /// Per person: whether they hold `role` in this group entity
    pub fn members_have_role(&self, role: &str) -> Result<Vec<bool>> {
        let members = self.require_members()?;
        let role = self.role_filter(Some(role))?;
        Ok(members.role.iter().map(|r| *r == role).collect())
    }

    pub fn holder(&self, variable: &str) -> Option<&Holder> {
        self.holders.get(variable)
    }

    pub fn holder_mut(&mut self, variable: &str) -> Option<&mut Holder> {
        self.holders.get_mut(variable)
    }

    pub fn insert_holder(&mut self, variable: &str, holder: Holder) -> &mut Holder {
        self.holders.entry(variable.to_string()).or_insert(holder)
    }

    pub fn holders(&self) -> impl Iterator<Item = (&String, &Holder)> {
        self.holders.iter()
    }

    pub fn holders_mut(&mut self) -> impl Iterator<Item = (&String, &mut Holder)> {
        self.holders.iter_mut()
    }

    pub fn get_memory_usage(&self, variables: Option<&[String]>) -> BTreeMap<String, HolderMemoryUsage> {
        self.holders
            .iter()
            .filter(|(name, _)| variables.map_or(true, |v| v.contains(name)))
            .map(|(name, holder)| (name.clone(), holder.get_memory_usage()))
            .collect()
    }

    /// Copy with independent holders
    pub fn duplicate(&self, spill: Option<SpillSettings>) -> Result<Population> {
        let mut holders = BTreeMap::new();
        for (name, holder) in &self.holders {
            holders.insert(name.clone(), holder.duplicate(spill.clone())?);
        }
        Ok(Population {
            entity: Arc::clone(&self.entity),
            ids: self.ids.clone(),
            members: self.members.clone(),
            holders,
        })
    }
}
