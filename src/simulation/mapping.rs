//! Moving values between entities

use std::str::FromStr;

use super::Simulation;
use crate::arrays::{Array, EnumArray};
use crate::errors::{CalculationError, Result};

/// How values cross entity boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapHow {
    Sum,
    Any,
    All,
    Min,
    Max,
    ValueFromFirstPerson,
    Project,
    Mean,
}

impl FromStr for MapHow {
    type Err = CalculationError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "sum" => MapHow::Sum,
            "any" => MapHow::Any,
            "all" => MapHow::All,
            "min" => MapHow::Min,
            "max" => MapHow::Max,
            "value_from_first_person" => MapHow::ValueFromFirstPerson,
            "project" => MapHow::Project,
            "mean" => MapHow::Mean,
            other => {
                return Err(CalculationError::formula(
                    "map_result",
                    format!("unknown mapping '{}'", other),
                ))
            }
        })
    }
}

impl Simulation {
    /// Map `values` from the `source` entity onto the `target` entity
    ///
    /// Person to group aggregates (`sum` by default), group to person
    /// projects (or splits evenly with `mean`), and group to group goes
    /// through persons.
    pub fn map_result(&self, values: &Array, source: &str, target: &str, how: Option<MapHow>) -> Result<Array> {
        if source == target {
            return Ok(values.clone());
        }
        let person = self.tax_benefit_system.person_entity().key.clone();
        if source == person {
            let group = self.population(target)?;
            let how = how.unwrap_or(MapHow::Sum);
            return Ok(match how {
                MapHow::Sum => Array::Float(group.sum(&values.to_f64(), None)?),
                MapHow::Any => Array::Bool(group.any(&values.to_mask(), None)?),
                MapHow::All => Array::Bool(group.all(&values.to_mask(), None)?),
                MapHow::Min => Array::Float(group.min(&values.to_f64(), None)?),
                MapHow::Max => Array::Float(group.max(&values.to_f64(), None)?),
                MapHow::ValueFromFirstPerson => Array::Float(group.value_from_first_person(&values.to_f64())?),
                MapHow::Project | MapHow::Mean => {
                    return Err(CalculationError::formula(
                        "map_result",
                        format!("'{:?}' cannot aggregate {} values into {}", how, source, target),
                    ))
                }
            });
        }
        if target == person {
            let group = self.population(source)?;
            return match how.unwrap_or(MapHow::Project) {
                MapHow::Mean => {
                    let sizes = group.nb_persons(None)?;
                    let shares: Vec<f64> = values
                        .to_f64()
                        .iter()
                        .zip(&sizes)
                        .map(|(v, n)| if *n > 0.0 { v / n } else { 0.0 })
                        .collect();
                    Ok(Array::Float(group.project(&shares)?))
                }
                _ => project(group, values),
            };
        }
        let per_person = self.map_result(values, source, &person, Some(MapHow::Mean))?;
        self.map_result(&per_person, &person, target, Some(MapHow::Sum))
    }
}

fn project(group: &crate::entities::Population, values: &Array) -> Result<Array> {
    Ok(match values {
        Array::Float(v) => Array::Float(group.project(v)?),
        Array::Int(v) => Array::Int(group.project(v)?),
        Array::Bool(v) => Array::Bool(group.project(v)?),
        Array::Str(v) => Array::Str(group.project(v)?),
        Array::Enum(e) => Array::Enum(EnumArray {
            indices: group.project(&e.indices)?,
            possible_values: e.possible_values.clone(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Entity, Members, Population, Role};
    use crate::parameters::ParameterNode;
    use crate::simulation::SimulationConfig;
    use crate::system::TaxBenefitSystem;
    use std::sync::Arc;

    // Persons 0..4; households {0, 1} and {2, 3}; tax units {0}, {1, 2} and {3}
    fn simulation() -> Simulation {
        let entities = vec![
            Entity::person("person", "persons"),
            Entity::group("household", "households", vec![Role::new("member", Some("members"))]),
            Entity::group("tax_unit", "tax_units", vec![Role::new("filer", Some("filers"))]),
        ];
        let system = Arc::new(TaxBenefitSystem::new(entities, ParameterNode::new(""), vec![]).unwrap());
        let entity = |key: &str| Arc::clone(system.entity(key).unwrap());
        let ids = |n: usize| (0..n).map(|i| i.to_string()).collect::<Vec<_>>();
        let populations = vec![
            Population::person(entity("person"), ids(4)),
            Population::group(
                entity("household"),
                ids(2),
                Members::new(vec![0, 0, 1, 1], vec![Some(0); 4], 2).unwrap(),
            )
            .unwrap(),
            Population::group(
                entity("tax_unit"),
                ids(3),
                Members::new(vec![0, 1, 1, 2], vec![Some(0); 4], 3).unwrap(),
            )
            .unwrap(),
        ];
        Simulation::new(system, populations, SimulationConfig::default()).unwrap()
    }

    #[test]
    fn test_person_to_group() {
        let sim = simulation();
        let salaries = Array::Float(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            sim.map_result(&salaries, "person", "household", None).unwrap(),
            Array::Float(vec![3.0, 7.0])
        );
        assert_eq!(
            sim.map_result(&salaries, "person", "household", Some(MapHow::Max)).unwrap(),
            Array::Float(vec![2.0, 4.0])
        );
        let flags = Array::Bool(vec![false, true, false, false]);
        assert_eq!(
            sim.map_result(&flags, "person", "household", Some(MapHow::Any)).unwrap(),
            Array::Bool(vec![true, false])
        );
        assert!(sim.map_result(&salaries, "person", "household", Some(MapHow::Project)).is_err());
    }

    #[test]
    fn test_group_to_person() {
        let sim = simulation();
        let rents = Array::Float(vec![100.0, 50.0]);
        assert_eq!(
            sim.map_result(&rents, "household", "person", None).unwrap(),
            Array::Float(vec![100.0, 100.0, 50.0, 50.0])
        );
        assert_eq!(
            sim.map_result(&rents, "household", "person", Some(MapHow::Mean)).unwrap(),
            Array::Float(vec![50.0, 50.0, 25.0, 25.0])
        );
    }

    #[test]
    fn test_group_to_group_splits_through_persons() {
        let sim = simulation();
        let rents = Array::Float(vec![100.0, 50.0]);
        assert_eq!(
            sim.map_result(&rents, "household", "tax_unit", None).unwrap(),
            Array::Float(vec![50.0, 75.0, 25.0])
        );
    }

    #[test]
    fn test_parse_how() {
        assert_eq!("value_from_first_person".parse::<MapHow>().unwrap(), MapHow::ValueFromFirstPerson);
        assert!("median".parse::<MapHow>().is_err());
    }
}
