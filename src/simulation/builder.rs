//! Building simulations from populations, situations and datasets

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::dataset::{split_column_name, Dataset, DatasetColumns};
use super::{Simulation, SimulationConfig};
use crate::arrays::{Array, Scalar, ValueType};
use crate::entities::{Entity, Members, Population};
use crate::errors::{CalculationError, Result, SituationParsingError};
use crate::periods::{period, Period};
use crate::system::TaxBenefitSystem;
use crate::variables::Variable;

/// Inputs gathered before the simulation exists: per variable and period,
/// one scalar per member
type PendingInputs = BTreeMap<(String, Period), Vec<Scalar>>;

/// Builds [`Simulation`]s for one tax-benefit system
#[derive(Debug, Clone)]
pub struct SimulationBuilder {
    tax_benefit_system: Arc<TaxBenefitSystem>,
    config: SimulationConfig,
}

impl SimulationBuilder {
    pub fn new(tax_benefit_system: Arc<TaxBenefitSystem>) -> Self {
        Self {
            tax_benefit_system,
            config: SimulationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SimulationConfig) -> Self {
        self.config = config;
        self
    }

    /// Simulation over ready-made populations
    pub fn build_from_populations(&self, populations: Vec<Population>) -> Result<Simulation> {
        Simulation::new(Arc::clone(&self.tax_benefit_system), populations, self.config.clone())
    }

    /// Simulation described by a situation
    ///
    /// ```json
    /// {
    ///   "persons": {"ann": {"salary": {"2024-01": 3000}}, "bob": {}},
    ///   "households": {"h1": {"parents": ["ann", "bob"], "rent": {"2024-01": 700}}}
    /// }
    /// ```
    ///
    /// Persons are keyed by the person entity's plural. Groups list their
    /// members by role (singular or plural key) or under `members`. A group
    /// entity left out gets one group holding everybody, and persons left out
    /// of a declared group entity get a group of their own.
    pub fn build_from_entities(&self, situation: &Value) -> Result<Simulation> {
        let system = &self.tax_benefit_system;
        let root = situation
            .as_object()
            .ok_or_else(|| SituationParsingError::new("", "a situation must be a JSON object"))?;
        for key in root.keys() {
            if !system.entities().iter().any(|e| &e.plural == key) {
                return Err(SituationParsingError::new(
                    key.clone(),
                    format!(
                        "unknown entity plural '{}'. Expected one of: {}",
                        key,
                        system.entities().iter().map(|e| e.plural.as_str()).collect::<Vec<_>>().join(", ")
                    ),
                )
                .into());
            }
        }

        let person_entity = Arc::clone(system.person_entity());
        let persons = match root.get(&person_entity.plural) {
            Some(Value::Object(persons)) => persons,
            Some(_) => {
                return Err(SituationParsingError::new(
                    person_entity.plural.clone(),
                    "persons must be given as an object keyed by person id",
                )
                .into())
            }
            None => {
                return Err(SituationParsingError::new(
                    person_entity.plural.clone(),
                    format!("no {} declared", person_entity.plural),
                )
                .into())
            }
        };
        let person_ids: Vec<String> = persons.keys().cloned().collect();
        let mut inputs = PendingInputs::new();
        for (index, (id, data)) in persons.iter().enumerate() {
            let path = format!("{}/{}", person_entity.plural, id);
            self.read_instance_inputs(&person_entity, &path, data, index, person_ids.len(), &[], &mut inputs)?;
        }

        let mut populations = vec![Population::person(Arc::clone(&person_entity), person_ids.clone())];
        for entity in system.entities().iter().filter(|e| !e.is_person) {
            let (population, group_inputs) = match root.get(&entity.plural) {
                Some(groups) => self.read_groups(entity, groups, &person_ids)?,
                None => (default_group(entity, person_ids.len())?, PendingInputs::new()),
            };
            inputs.extend(group_inputs);
            populations.push(population);
        }

        let mut simulation = self.build_from_populations(populations)?;
        for ((name, period), values) in inputs {
            let variable = Arc::clone(system.get_variable(&name)?);
            let array = Array::from_scalars(variable.value_type, &values, variable.possible_values.as_ref())
                .map_err(|message| SituationParsingError::new(name.clone(), message))?;
            simulation.set_input(&name, period, array)?;
        }
        Ok(simulation)
    }

    fn read_groups(
        &self,
        entity: &Arc<Entity>,
        groups: &Value,
        person_ids: &[String],
    ) -> Result<(Population, PendingInputs)> {
        let groups = groups.as_object().ok_or_else(|| {
            SituationParsingError::new(entity.plural.clone(), "groups must be given as an object keyed by id")
        })?;
        let mut group_ids: Vec<String> = groups.keys().cloned().collect();
        let mut group_of: Vec<Option<usize>> = vec![None; person_ids.len()];
        let mut role_of: Vec<Option<usize>> = vec![None; person_ids.len()];
        let role_keys: Vec<&str> = entity
            .roles
            .iter()
            .flat_map(|r| std::iter::once(r.key.as_str()).chain(r.plural.as_deref()))
            .chain(std::iter::once("members"))
            .collect();

        for (group_index, (group_id, data)) in groups.iter().enumerate() {
            let path = format!("{}/{}", entity.plural, group_id);
            let data = data
                .as_object()
                .ok_or_else(|| SituationParsingError::new(path.clone(), "a group must be a JSON object"))?;
            for (key, value) in data.iter().filter(|(k, _)| role_keys.contains(&k.as_str())) {
                let role = entity.role_index(key);
                let members: Vec<&str> = match value {
                    Value::String(id) => vec![id.as_str()],
                    Value::Array(ids) => ids
                        .iter()
                        .map(|id| {
                            id.as_str().ok_or_else(|| {
                                SituationParsingError::new(format!("{}/{}", path, key), "member ids must be strings")
                            })
                        })
                        .collect::<std::result::Result<_, _>>()?,
                    _ => {
                        return Err(SituationParsingError::new(
                            format!("{}/{}", path, key),
                            "members must be a person id or a list of person ids",
                        )
                        .into())
                    }
                };
                for member in members {
                    let person = person_ids.iter().position(|p| p == member).ok_or_else(|| {
                        SituationParsingError::new(
                            format!("{}/{}", path, key),
                            format!("'{}' is not a declared person", member),
                        )
                    })?;
                    if group_of[person].is_some() {
                        return Err(SituationParsingError::new(
                            format!("{}/{}", path, key),
                            format!("'{}' already belongs to another {}", member, entity.key),
                        )
                        .into());
                    }
                    group_of[person] = Some(group_index);
                    role_of[person] = role.or(if entity.roles.is_empty() { None } else { Some(0) });
                }
            }
        }

        let mut group_index: Vec<usize> = Vec::with_capacity(person_ids.len());
        for (person, group) in group_of.into_iter().enumerate() {
            match group {
                Some(g) => group_index.push(g),
                None => {
                    group_ids.push(person_ids[person].clone());
                    group_index.push(group_ids.len() - 1);
                    if !entity.roles.is_empty() {
                        role_of[person] = Some(0);
                    }
                }
            }
        }

        let mut inputs = PendingInputs::new();
        for (index, (group_id, data)) in groups.iter().enumerate() {
            let path = format!("{}/{}", entity.plural, group_id);
            self.read_instance_inputs(entity, &path, data, index, group_ids.len(), &role_keys, &mut inputs)?;
        }

        let members = Members::new(group_index, role_of, group_ids.len())?;
        Ok((Population::group(Arc::clone(entity), group_ids, members)?, inputs))
    }

    /// Collect `{variable: {period: value}}` entries of one entity member
    #[allow(clippy::too_many_arguments)]
    fn read_instance_inputs(
        &self,
        entity: &Entity,
        path: &str,
        data: &Value,
        index: usize,
        count: usize,
        skip: &[&str],
        inputs: &mut PendingInputs,
    ) -> Result<()> {
        let data = data
            .as_object()
            .ok_or_else(|| SituationParsingError::new(path, "expected a JSON object"))?;
        for (name, values) in data.iter().filter(|(k, _)| !skip.contains(&k.as_str())) {
            let path = format!("{}/{}", path, name);
            let variable = self
                .tax_benefit_system
                .get_variable(name)
                .map_err(|err| SituationParsingError::new(path.clone(), err.to_string()))?;
            if variable.entity != entity.key {
                return Err(SituationParsingError::new(
                    path,
                    format!(
                        "variable '{}' is defined for {}, not for {}",
                        name, variable.entity, entity.plural
                    ),
                )
                .into());
            }
            let by_period: Vec<(Period, &Value)> = match values {
                Value::Object(entries) => entries
                    .iter()
                    .map(|(p, v)| {
                        period(p.as_str())
                            .map(|p| (p, v))
                            .map_err(|err| SituationParsingError::new(format!("{}/{}", path, p), err.to_string()))
                    })
                    .collect::<std::result::Result<_, _>>()?,
                scalar => {
                    let default = self.config.default_calculation_period.ok_or_else(|| {
                        SituationParsingError::new(
                            path.clone(),
                            "values must be keyed by period when the simulation has no default calculation period",
                        )
                    })?;
                    vec![(default, scalar)]
                }
            };
            for (at, value) in by_period {
                if value.is_null() {
                    continue;
                }
                let scalar = scalar_from_json(value)
                    .map_err(|message| SituationParsingError::new(format!("{}/{}", path, at), message))?;
                let column = inputs
                    .entry((name.clone(), at))
                    .or_insert_with(|| vec![variable.default_value.clone(); count]);
                column[index] = scalar;
            }
        }
        Ok(())
    }

    /// Simulation over a microdata dataset for `year`
    ///
    /// The person entity needs a `{person}_id` column. Each group entity
    /// needs `{group}_id` and `{person}_{group}_id` columns, and may give
    /// roles in `{person}_{group}_role`. Columns naming no variable are
    /// skipped.
    pub fn build_from_dataset(&self, dataset: &dyn Dataset, year: i32) -> Result<Simulation> {
        let system = &self.tax_benefit_system;
        let columns = dataset.load()?;
        let person_entity = Arc::clone(system.person_entity());
        let person_ids = required_column(&columns, &format!("{}_id", person_entity.key), dataset)?.to_vec();

        let mut populations = vec![Population::person(Arc::clone(&person_entity), person_ids.clone())];
        for entity in system.entities().iter().filter(|e| !e.is_person) {
            let group_ids = required_column(&columns, &format!("{}_id", entity.key), dataset)?.to_vec();
            let membership_field = format!("{}_{}_id", person_entity.key, entity.key);
            let membership = required_column(&columns, &membership_field, dataset)?;
            let role_field = format!("{}_{}_role", person_entity.key, entity.key);
            let roles = columns.get(&role_field);

            let mut group_index = Vec::with_capacity(membership.len());
            let mut role_index = Vec::with_capacity(membership.len());
            for (person, group_id) in membership.iter().enumerate() {
                let group = group_ids.iter().position(|g| g == group_id).ok_or_else(|| {
                    SituationParsingError::new(
                        membership_field.clone(),
                        format!("row {} refers to unknown {} '{}'", person, entity.key, group_id),
                    )
                })?;
                group_index.push(group);
                let role = match roles.and_then(|r| r.get(person)).filter(|r| !r.is_empty()) {
                    Some(role) => Some(entity.role_index(role).ok_or_else(|| {
                        CalculationError::RoleNotFound {
                            entity: entity.key.clone(),
                            role: role.clone(),
                        }
                    })?),
                    None => None,
                };
                role_index.push(role);
            }
            let members = Members::new(group_index, role_index, group_ids.len())?;
            populations.push(Population::group(Arc::clone(entity), group_ids, members)?);
        }

        let mut simulation = self.build_from_populations(populations)?;
        let year_period = period(year)?;
        for (column, raw) in &columns {
            let (name, period_str) = split_column_name(column);
            let Some(variable) = system.variable(name).cloned() else {
                log::debug!("skipping dataset column '{}': no such variable", column);
                continue;
            };
            let at = match period_str {
                Some(p) => period(p).map_err(|err| SituationParsingError::new(column.clone(), err.to_string()))?,
                None => year_period,
            };
            let values = raw
                .iter()
                .map(|cell| scalar_from_cell(&variable, cell))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|message| SituationParsingError::new(column.clone(), message))?;
            let array = Array::from_scalars(variable.value_type, &values, variable.possible_values.as_ref())
                .map_err(|message| SituationParsingError::new(column.clone(), message))?;
            simulation.set_input(name, at, array)?;
        }
        log::debug!(
            "built simulation from dataset '{}' for {} with {} persons",
            dataset.name(),
            year,
            person_ids.len()
        );
        Ok(simulation)
    }
}

fn required_column<'a>(columns: &'a DatasetColumns, name: &str, dataset: &dyn Dataset) -> Result<&'a [String]> {
    columns.get(name).map(Vec::as_slice).ok_or_else(|| {
        SituationParsingError::new(
            name,
            format!("missing {} column in the dataset '{}'", name, dataset.name()),
        )
        .into()
    })
}

/// One group holding every person, with the entity's first role
fn default_group(entity: &Arc<Entity>, persons: usize) -> Result<Population> {
    let role = if entity.roles.is_empty() { None } else { Some(0) };
    let members = Members::new(vec![0; persons], vec![role; persons], 1)?;
    Population::group(Arc::clone(entity), vec![format!("{}_0", entity.key)], members)
}

fn scalar_from_json(value: &Value) -> std::result::Result<Scalar, String> {
    match value {
        Value::Bool(b) => Ok(Scalar::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Scalar::Int(i)),
            None => n.as_f64().map(Scalar::Float).ok_or_else(|| format!("'{}' is not a usable number", n)),
        },
        Value::String(s) => Ok(Scalar::Str(s.clone())),
        other => Err(format!("expected a number, a boolean or a string, got {}", other)),
    }
}

fn scalar_from_cell(variable: &Variable, cell: &str) -> std::result::Result<Scalar, String> {
    let number = || {
        cell.parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", cell))
    };
    match variable.value_type {
        ValueType::Float => number().map(Scalar::Float),
        ValueType::Int => number().map(|v| Scalar::Int(v.round() as i64)),
        ValueType::Bool => match cell.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Scalar::Bool(true)),
            "false" | "0" | "no" | "" => Ok(Scalar::Bool(false)),
            _ => Err(format!("'{}' is not a boolean", cell)),
        },
        ValueType::Str | ValueType::Enum => Ok(Scalar::Str(cell.to_string())),
    }
}
