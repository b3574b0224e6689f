//! Variable definitions

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::formula::Formula;
use crate::arrays::{PossibleValues, Scalar, ValueType};
use crate::errors::PeriodError;
use crate::periods::{instant, DateUnit, Instant, Period};

/// How a value relates to time when converting between period units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityType {
    /// A level at a point in time, e.g. a balance
    Stock,
    /// An amount accumulated over the period, e.g. earnings
    #[default]
    Flow,
}

/// Conversion used by `calculate_output`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Add,
    Divide,
}

/// How `set_input` spreads a value given for a coarser period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSplit {
    /// Every sub-period gets the full value
    Dispatch,
    /// The value is split evenly across sub-periods
    Divide,
}

/// A quantity computed per entity member and period
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,

    /// Key of the entity the variable is defined on
    pub entity: String,

    pub value_type: ValueType,
    pub definition_period: DateUnit,
    pub label: Option<String>,
    pub unit: Option<String>,
    pub documentation: Option<String>,
    pub default_value: Scalar,
    pub possible_values: Option<Arc<PossibleValues>>,

    /// Formulas keyed by the instant they take effect
    pub formulas: BTreeMap<Instant, Formula>,

    /// Last day on which the variable applies
    pub end: Option<Instant>,

    /// Variables (or parameter paths) summed when no formula applies
    pub adds: Option<Vec<String>>,
    pub subtracts: Option<Vec<String>>,

    /// Boolean-like variable restricting where the variable is computed
    pub defined_for: Option<String>,

    /// Parameter path used to uprate the latest known value
    pub uprating: Option<String>,

    pub quantity_type: QuantityType,
    pub output_mode: Option<OutputMode>,
    pub input_split: Option<InputSplit>,
    pub is_neutralized: bool,
}

fn type_default(value_type: ValueType) -> Scalar {
    match value_type {
        ValueType::Bool => Scalar::Bool(false),
        ValueType::Int => Scalar::Int(0),
        ValueType::Float => Scalar::Float(0.0),
        ValueType::Str | ValueType::Enum => Scalar::Str(String::new()),
    }
}

impl Variable {
    pub fn new(
        name: impl Into<String>,
        entity: impl Into<String>,
        value_type: ValueType,
        definition_period: DateUnit,
    ) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            value_type,
            definition_period,
            label: None,
            unit: None,
            documentation: None,
            default_value: type_default(value_type),
            possible_values: None,
            formulas: BTreeMap::new(),
            end: None,
            adds: None,
            subtracts: None,
            defined_for: None,
            uprating: None,
            quantity_type: QuantityType::Flow,
            output_mode: None,
            input_split: None,
            is_neutralized: false,
        }
    }

    /// Enum-typed variable; the default is the first item unless overridden
    pub fn new_enum(
        name: impl Into<String>,
        entity: impl Into<String>,
        possible_values: Arc<PossibleValues>,
        definition_period: DateUnit,
    ) -> Self {
        let mut variable = Self::new(name, entity, ValueType::Enum, definition_period);
        variable.default_value = Scalar::Str(possible_values.items.first().cloned().unwrap_or_default());
        variable.possible_values = Some(possible_values);
        variable
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_default(mut self, value: impl Into<Scalar>) -> Self {
        self.default_value = value.into();
        self
    }

    /// Formula applying from the beginning of time
    pub fn with_formula(mut self, formula: Formula) -> Self {
        self.formulas.insert(Instant::MIN, formula);
        self
    }

    /// Formula applying from `start` until the next formula or the variable's end
    pub fn with_formula_from(mut self, start: &str, formula: Formula) -> Result<Self, PeriodError> {
        self.formulas.insert(instant(start)?, formula);
        Ok(self)
    }

    pub fn with_end(mut self, end: &str) -> Result<Self, PeriodError> {
        self.end = Some(instant(end)?);
        Ok(self)
    }

    pub fn with_adds<S: Into<String>>(mut self, components: impl IntoIterator<Item = S>) -> Self {
        self.adds = Some(components.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_subtracts<S: Into<String>>(mut self, components: impl IntoIterator<Item = S>) -> Self {
        self.subtracts = Some(components.into_iter().map(Into::into).collect());
        self
    }

    pub fn defined_for(mut self, variable: impl Into<String>) -> Self {
        self.defined_for = Some(variable.into());
        self
    }

    pub fn with_uprating(mut self, parameter: impl Into<String>) -> Self {
        self.uprating = Some(parameter.into());
        self
    }

    pub fn stock(mut self) -> Self {
        self.quantity_type = QuantityType::Stock;
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = Some(mode);
        self
    }

    pub fn with_input_split(mut self, split: InputSplit) -> Self {
        self.input_split = Some(split);
        self
    }

    /// The formula in force at the start of `period`, if any
    pub fn get_formula(&self, period: &Period) -> Option<&Formula> {
        let start = if period.is_eternity() {
            Instant::MAX
        } else {
            period.start()
        };
        if let Some(end) = self.end {
            if start > end {
                return None;
            }
        }
        self.formulas.range(..=start).next_back().map(|(_, f)| f)
    }

    /// No formula and no components: values only come from inputs
    pub fn is_input_variable(&self) -> bool {
        self.formulas.is_empty() && self.adds.is_none() && self.subtracts.is_none()
    }

    pub fn is_eternal(&self) -> bool {
        self.definition_period == DateUnit::Eternity
    }

    /// Copy with all formulas removed, returning the default value everywhere
    pub fn neutralized(&self) -> Self {
        let mut variable = self.clone();
        variable.formulas.clear();
        variable.adds = None;
        variable.subtracts = None;
        variable.is_neutralized = true;
        variable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::Array;
    use crate::periods::period;

    fn constant(value: f64) -> Formula {
        Formula::simple(move |ctx, _| Ok(Array::Float(vec![value; ctx.count()])))
    }

    #[test]
    fn test_formula_windows() {
        let variable = Variable::new("benefit", "person", ValueType::Float, DateUnit::Year)
            .with_formula(constant(1.0))
            .with_formula_from("2016-01-01", constant(2.0))
            .unwrap()
            .with_end("2018-12-31")
            .unwrap();
        let arity_at = |p: &str| variable.get_formula(&period(p).unwrap()).is_some();
        assert!(arity_at("2015"));
        assert!(arity_at("2016"));
        assert!(arity_at("2018"));
        assert!(!arity_at("2019"));
        assert_eq!(variable.formulas.len(), 2);
    }

    #[test]
    fn test_formula_before_first_start() {
        let variable = Variable::new("benefit", "person", ValueType::Float, DateUnit::Year)
            .with_formula_from("2016-01-01", constant(2.0))
            .unwrap();
        assert!(variable.get_formula(&period("2015").unwrap()).is_none());
        assert!(variable.get_formula(&period("2016").unwrap()).is_some());
    }

    #[test]
    fn test_defaults_by_type() {
        let v = Variable::new("flag", "person", ValueType::Bool, DateUnit::Month);
        assert_eq!(v.default_value, Scalar::Bool(false));
        let tenure = PossibleValues::new("Tenure", &["tenant", "owner"]);
        let e = Variable::new_enum("tenure", "household", tenure, DateUnit::Month);
        assert_eq!(e.default_value, Scalar::from("tenant"));
        assert!(e.is_input_variable());
    }

    #[test]
    fn test_neutralized_drops_formulas() {
        let v = Variable::new("tax", "person", ValueType::Float, DateUnit::Year)
            .with_formula(constant(1.0))
            .with_adds(["a"]);
        let n = v.neutralized();
        assert!(n.is_neutralized);
        assert!(n.formulas.is_empty());
        assert!(n.adds.is_none());
    }
}
