//! Registry of entities, variables and parameters

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::entities::Entity;
use crate::errors::{CalculationError, ParameterError, Result};
use crate::parameters::{uprate_parameters, Parameter, ParameterNode, ParameterNodeAtInstant, ParameterValue};
use crate::periods::Instant;
use crate::variables::Variable;

const ABOLITIONS: &str = "abolitions";

/// A complete rule set: entities, variables and the legislation they read
#[derive(Debug)]
pub struct TaxBenefitSystem {
    entities: Vec<Arc<Entity>>,
    variables: BTreeMap<String, Arc<Variable>>,
    parameters: Arc<ParameterNode>,
    /// Reuse the latest earlier input when an input variable has no value
    pub auto_carry_over_input_variables: bool,
    pub country_version: String,
    at_instant_cache: Mutex<HashMap<Instant, Arc<ParameterNodeAtInstant>>>,
}

impl Clone for TaxBenefitSystem {
    fn clone(&self) -> Self {
        Self {
            entities: self.entities.clone(),
            variables: self.variables.clone(),
            parameters: Arc::clone(&self.parameters),
            auto_carry_over_input_variables: self.auto_carry_over_input_variables,
            country_version: self.country_version.clone(),
            at_instant_cache: Mutex::new(HashMap::new()),
        }
    }
}

impl TaxBenefitSystem {
    /// Build a system, uprating the parameters and registering every variable
    ///
    /// Exactly one entity must be the person entity. When the tree has a
    /// `gov` node, a `gov.abolitions.<variable>` switch is added for every
    /// computed numeric or boolean variable.
    pub fn new(
        entities: Vec<Entity>,
        mut parameters: ParameterNode,
        variables: Vec<Variable>,
    ) -> Result<Self> {
        let persons = entities.iter().filter(|e| e.is_person).count();
        if persons != 1 {
            return Err(CalculationError::EntityNotFound(format!(
                "a tax-benefit system needs exactly one person entity, got {}",
                persons
            )));
        }
        uprate_parameters(&mut parameters)?;

        let mut system = Self {
            entities: entities.into_iter().map(Arc::new).collect(),
            variables: BTreeMap::new(),
            parameters: Arc::new(parameters),
            auto_carry_over_input_variables: false,
            country_version: "0.0.0".to_string(),
            at_instant_cache: Mutex::new(HashMap::new()),
        };
        for variable in variables {
            system.add_variable(variable)?;
        }
        system.add_abolition_parameters()?;
        Ok(system)
    }

    pub fn with_country_version(mut self, version: impl Into<String>) -> Self {
        self.country_version = version.into();
        self
    }

    pub fn with_auto_carry_over(mut self, enabled: bool) -> Self {
        self.auto_carry_over_input_variables = enabled;
        self
    }

    fn add_abolition_parameters(&mut self) -> Result<()> {
        if self.parameters.child("gov").is_none() {
            return Ok(());
        }
        let since = Instant::new(0, 1, 1)?;
        let abolishable: Vec<Arc<Variable>> = self
            .variables
            .values()
            .filter(|v| !v.is_input_variable() && v.value_type.is_numeric())
            .cloned()
            .collect();
        self.modify_parameters(|root| {
            let folder = root.child_node_mut("gov")?.child_node_mut(ABOLITIONS)?;
            for variable in &abolishable {
                if folder.child(&variable.name).is_some() {
                    continue;
                }
                let mut parameter = Parameter::new(
                    format!("gov.{}.{}", ABOLITIONS, variable.name),
                    [(since, Some(ParameterValue::Bool(false)))],
                );
                parameter.description = Some(format!(
                    "Set all values of {} to zero.",
                    variable.label.as_deref().unwrap_or(&variable.name)
                ));
                folder.add_parameter(variable.name.clone(), parameter);
            }
            Ok(())
        })
    }

    pub fn entities(&self) -> &[Arc<Entity>] {
        &self.entities
    }

    pub fn entity(&self, key: &str) -> Result<&Arc<Entity>> {
        self.entities
            .iter()
            .find(|e| e.key == key)
            .ok_or_else(|| CalculationError::EntityNotFound(key.to_string()))
    }

    pub fn person_entity(&self) -> &Arc<Entity> {
        // `new` guarantees a person entity
        self.entities
            .iter()
            .find(|e| e.is_person)
            .unwrap_or(&self.entities[0])
    }

    pub fn group_entity_keys(&self) -> Vec<String> {
        self.entities
            .iter()
            .filter(|e| !e.is_person)
            .map(|e| e.key.clone())
            .collect()
    }

    pub fn parameters(&self) -> &Arc<ParameterNode> {
        &self.parameters
    }

    pub fn variables(&self) -> &BTreeMap<String, Arc<Variable>> {
        &self.variables
    }

    /// Lookup without an existence check
    pub fn variable(&self, name: &str) -> Option<&Arc<Variable>> {
        self.variables.get(name)
    }

    /// Lookup failing with close-name suggestions
    pub fn get_variable(&self, name: &str) -> Result<&Arc<Variable>> {
        self.variables
            .get(name)
            .ok_or_else(|| CalculationError::VariableNotFound {
                name: name.to_string(),
                suggestions: close_names(name, self.variables.keys()),
            })
    }

    pub fn add_variable(&mut self, variable: Variable) -> Result<&Arc<Variable>> {
        if self.variables.contains_key(&variable.name) {
            return Err(CalculationError::VariableNameConflict(variable.name));
        }
        self.entity(&variable.entity)?;
        let name = variable.name.clone();
        Ok(self.variables.entry(name).or_insert_with(|| Arc::new(variable)))
    }

    /// Replace a variable, adding it if absent
    pub fn replace_variable(&mut self, variable: Variable) -> Result<&Arc<Variable>> {
        self.entity(&variable.entity)?;
        let name = variable.name.clone();
        self.variables.insert(name.clone(), Arc::new(variable));
        self.get_variable(&name)
    }

    /// Replace a variable, keeping the formulas of the existing definition
    /// that start before the new definition's first formula
    pub fn update_variable(&mut self, mut variable: Variable) -> Result<&Arc<Variable>> {
        if let Some(existing) = self.variables.get(&variable.name) {
            let first_new = variable.formulas.keys().next().copied().unwrap_or(Instant::MAX);
            for (start, formula) in existing.formulas.range(..first_new) {
                variable.formulas.entry(*start).or_insert_with(|| formula.clone());
            }
        }
        self.replace_variable(variable)
    }

    pub fn neutralize_variable(&mut self, name: &str) -> Result<()> {
        let neutralized = self.get_variable(name)?.neutralized();
        self.variables.insert(name.to_string(), Arc::new(neutralized));
        Ok(())
    }

    /// Mutable access to a registered variable, copying it if shared
    pub(crate) fn variable_mut(&mut self, name: &str) -> Result<&mut Variable> {
        let suggestions = close_names(name, self.variables.keys());
        self.variables
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| CalculationError::VariableNotFound {
                name: name.to_string(),
                suggestions,
            })
    }

    /// Parameter tree resolved at `instant`, memoized
    pub fn get_parameters_at_instant(&self, instant: Instant) -> Arc<ParameterNodeAtInstant> {
        let mut cache = self
            .at_instant_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            cache
                .entry(instant)
                .or_insert_with(|| Arc::new(self.parameters.get_at_instant(instant))),
        )
    }

    /// Apply `f` to a copy-on-write parameter root
    ///
    /// Subtrees `f` does not touch stay shared with other systems.
    pub fn modify_parameters<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut ParameterNode) -> Result<(), ParameterError>,
    {
        f(Arc::make_mut(&mut self.parameters))?;
        self.at_instant_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        Ok(())
    }

    /// Copy of the system with `reform` applied
    pub fn apply_reform(&self, reform: &dyn super::Reform) -> Result<TaxBenefitSystem> {
        let mut reformed = self.clone();
        reform.apply(&mut reformed)?;
        log::debug!("applied reform '{}'", reform.name());
        Ok(reformed)
    }
}

/// Registered names resembling `name`, at most five
fn close_names<'a>(name: &str, candidates: impl Iterator<Item = &'a String>) -> Vec<String> {
    let lowered = name.to_lowercase();
    let mut scored: Vec<(usize, &String)> = candidates
        .filter_map(|candidate| {
            let other = candidate.to_lowercase();
            if other.contains(&lowered) || lowered.contains(&other) {
                return Some((0, candidate));
            }
            let distance = edit_distance(&lowered, &other);
            (distance <= 2.max(lowered.len() / 4)).then_some((distance, candidate))
        })
        .collect();
    scored.sort();
    scored.into_iter().take(5).map(|(_, c)| c.clone()).collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut previous = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous + usize::from(ca != *cb);
            previous = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(previous + 1);
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::{Array, ValueType};
    use crate::entities::Role;
    use crate::periods::{instant, DateUnit};
    use crate::variables::Formula;
    use serde_json::json;

    fn entities() -> Vec<Entity> {
        vec![
            Entity::person("person", "persons"),
            Entity::group("household", "households", vec![Role::new("member", Some("members"))]),
        ]
    }

    fn tax() -> Variable {
        Variable::new("income_tax", "person", ValueType::Float, DateUnit::Month)
            .with_formula(Formula::simple(|ctx, _| Ok(Array::Float(vec![1.0; ctx.count()]))))
    }

    fn system() -> TaxBenefitSystem {
        let parameters = ParameterNode::from_json(
            "",
            &json!({"gov": {"tax": {"rate": {"values": {"2015-01-01": 0.1}}}}}),
        )
        .unwrap();
        let salary = Variable::new("salary", "person", ValueType::Float, DateUnit::Month);
        TaxBenefitSystem::new(entities(), parameters, vec![salary, tax()]).unwrap()
    }

    #[test]
    fn test_abolition_parameters_for_computed_variables() {
        let tbs = system();
        let at = tbs.get_parameters_at_instant(instant("2020-01-01").unwrap());
        assert!(!at.flag("gov.abolitions.income_tax").unwrap());
        assert!(at.get("gov.abolitions.salary").is_err());
    }

    #[test]
    fn test_name_conflict_and_suggestions() {
        let mut tbs = system();
        assert!(matches!(
            tbs.add_variable(tax()),
            Err(CalculationError::VariableNameConflict(name)) if name == "income_tax"
        ));
        match tbs.get_variable("incom_tax") {
            Err(CalculationError::VariableNotFound { suggestions, .. }) => {
                assert_eq!(suggestions, vec!["income_tax".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_entity_is_rejected() {
        let mut tbs = system();
        let stray = Variable::new("rent", "flat", ValueType::Float, DateUnit::Month);
        assert!(matches!(tbs.add_variable(stray), Err(CalculationError::EntityNotFound(_))));
    }

    #[test]
    fn test_needs_a_single_person_entity() {
        let groups = vec![Entity::group("household", "households", vec![])];
        assert!(TaxBenefitSystem::new(groups, ParameterNode::new(""), vec![]).is_err());
    }

    #[test]
    fn test_modify_parameters_resets_snapshots_and_shares_subtrees() {
        let baseline = system();
        let january = instant("2020-01-01").unwrap();
        assert_eq!(baseline.get_parameters_at_instant(january).value("gov.tax.rate").unwrap(), 0.1);

        let mut reformed = baseline.clone();
        reformed
            .modify_parameters(|root| {
                crate::parameters::get_parameter_mut(root, "gov.tax.rate")?
                    .update(january, None, Some(ParameterValue::Number(0.2)));
                Ok(())
            })
            .unwrap();
        assert_eq!(reformed.get_parameters_at_instant(january).value("gov.tax.rate").unwrap(), 0.2);
        assert_eq!(baseline.get_parameters_at_instant(january).value("gov.tax.rate").unwrap(), 0.1);
    }

    #[test]
    fn test_neutralize_variable() {
        let mut tbs = system();
        tbs.neutralize_variable("income_tax").unwrap();
        assert!(tbs.get_variable("income_tax").unwrap().is_neutralized);
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
    }
}
