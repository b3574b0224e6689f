//! Reforms: parameter changes and structural variable changes

use chrono::Datelike;
use serde_json::Value;

use super::TaxBenefitSystem;
use crate::errors::{CalculationError, ParameterError, PeriodError, Result};
use crate::parameters::{get_parameter_mut, ParameterValue};
use crate::periods::{instant, parse_instant, period, DateUnit, Instant, Period};
use crate::variables::{Formula, Variable};

/// Period used when a parameter change names none
pub const DEFAULT_REFORM_PERIOD: &str = "year:2015:10";

/// A transformation of a tax-benefit system
pub trait Reform: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, system: &mut TaxBenefitSystem) -> Result<()>;
}

/// One dated parameter change
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterChange {
    pub path: String,
    pub start: Instant,
    /// Inclusive; `None` is open-ended
    pub stop: Option<Instant>,
    pub value: Option<ParameterValue>,
}

/// A reform made only of parameter changes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterReform {
    pub name: String,
    pub changes: Vec<ParameterChange>,
}

impl ParameterReform {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            changes: Vec::new(),
        }
    }

    /// Set `path` to `value` over `when` (a period string, or `start.stop` instants)
    pub fn set(mut self, path: &str, when: &str, value: impl Into<ParameterValue>) -> Result<Self> {
        let (start, stop) = parse_window(when)?;
        self.changes.push(ParameterChange {
            path: path.to_string(),
            start,
            stop,
            value: Some(value.into()),
        });
        Ok(self)
    }

    /// Build from `{path: {period: value}}`
    ///
    /// Period keys are period strings such as `year:2015:10` or `2020-01`, or
    /// `start.stop` instant pairs. A `null` value makes the parameter
    /// undefined over the period.
    pub fn from_dict(name: impl Into<String>, values: &Value) -> Result<Self> {
        let invalid = |path: &str, message: String| ParameterError::Parsing {
            name: path.to_string(),
            message,
        };
        let object = values
            .as_object()
            .ok_or_else(|| invalid("reform", "expected an object of parameter paths".to_string()))?;
        let mut reform = ParameterReform::new(name);
        for (path, by_period) in object {
            let by_period = by_period
                .as_object()
                .ok_or_else(|| invalid(path, "expected an object of period: value pairs".to_string()))?;
            for (when, value) in by_period {
                let (start, stop) = parse_window(when)?;
                let value = match value {
                    Value::Null => None,
                    other => Some(
                        serde_json::from_value::<ParameterValue>(other.clone())
                            .map_err(|e| invalid(path, e.to_string()))?,
                    ),
                };
                reform.changes.push(ParameterChange {
                    path: path.clone(),
                    start,
                    stop,
                    value,
                });
            }
        }
        Ok(reform)
    }
}

fn parse_window(when: &str) -> Result<(Instant, Option<Instant>), PeriodError> {
    if let Some((start, stop)) = when.split_once('.') {
        return Ok((parse_instant(start)?, Some(parse_instant(stop)?)));
    }
    let parsed: Period = period(when)?;
    if parsed.is_eternity() {
        return Ok((Instant::new(0, 1, 1)?, None));
    }
    Ok((parsed.start(), Some(parsed.stop())))
}

impl Reform for ParameterReform {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, system: &mut TaxBenefitSystem) -> Result<()> {
        system.modify_parameters(|root| {
            for change in &self.changes {
                get_parameter_mut(root, &change.path)?.update(change.start, change.stop, change.value.clone());
            }
            Ok(())
        })
    }
}

/// Step of a structural reform
#[derive(Debug, Clone)]
pub enum StructuralStep {
    Neutralize(String),
    Add(Variable),
    Update(Variable),
}

/// Variable-level changes effective over a window of time
///
/// Formulas are spliced in from `start`, and the formula that was in force
/// before resumes the day after `end`.
#[derive(Debug, Clone)]
pub struct StructuralReform {
    pub name: String,
    pub start: Instant,
    pub end: Option<Instant>,
    pub steps: Vec<StructuralStep>,
}

impl StructuralReform {
    /// Window starting on the first of January of the current year
    pub fn new(name: impl Into<String>) -> Self {
        let today = chrono::Local::now().date_naive();
        Self {
            name: name.into(),
            start: Instant::from_date(today.with_ordinal(1).unwrap_or(today)),
            end: None,
            steps: Vec::new(),
        }
    }

    pub fn starting(mut self, start: &str) -> Result<Self, PeriodError> {
        self.start = instant(start)?;
        Ok(self)
    }

    pub fn ending(mut self, end: &str) -> Result<Self, PeriodError> {
        self.end = Some(instant(end)?);
        Ok(self)
    }

    pub fn neutralize_variable(mut self, name: impl Into<String>) -> Self {
        self.steps.push(StructuralStep::Neutralize(name.into()));
        self
    }

    pub fn add_variable(mut self, variable: Variable) -> Self {
        self.steps.push(StructuralStep::Add(variable));
        self
    }

    pub fn update_variable(mut self, variable: Variable) -> Self {
        self.steps.push(StructuralStep::Update(variable));
        self
    }

    /// Formula of `variable` over the window
    fn formula_of(variable: &Variable) -> Formula {
        match variable.formulas.values().next_back() {
            Some(formula) => formula.clone(),
            None => default_formula(),
        }
    }

    fn apply_step(&self, system: &mut TaxBenefitSystem, step: &StructuralStep) -> Result<()> {
        match step {
            StructuralStep::Neutralize(name) => {
                let variable = system.variable_mut(name)?;
                splice_formula(variable, default_formula(), self.start, self.end);
            }
            StructuralStep::Add(variable) => {
                if system.variable(&variable.name).is_some() {
                    return Err(CalculationError::VariableNameConflict(variable.name.clone()));
                }
                let mut added = variable.clone();
                added.formulas.clear();
                added.formulas.insert(Instant::MIN, default_formula());
                splice_formula(&mut added, Self::formula_of(variable), self.start, self.end);
                system.add_variable(added)?;
            }
            StructuralStep::Update(variable) => {
                if system.variable(&variable.name).is_none() {
                    return self.apply_step(system, &StructuralStep::Add(variable.clone()));
                }
                let formula = Self::formula_of(variable);
                let existing = system.variable_mut(&variable.name)?;
                splice_formula(existing, formula, self.start, self.end);
            }
        }
        Ok(())
    }
}

impl Reform for StructuralReform {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, system: &mut TaxBenefitSystem) -> Result<()> {
        for step in &self.steps {
            self.apply_step(system, step)?;
        }
        Ok(())
    }
}

/// Formula returning the variable's default everywhere
pub fn default_formula() -> Formula {
    Formula::simple(|ctx, _| Ok(ctx.default_array()))
}

/// Put `formula` in force from `start` through `end`
///
/// Without an end every later formula is dropped. With one, formulas starting
/// inside the window are dropped and the formula previously in force on the
/// day after `end` resumes there.
pub fn splice_formula(variable: &mut Variable, formula: Formula, start: Instant, end: Option<Instant>) {
    let resume = end.map(|end| end.offset(1, DateUnit::Day));
    let resumed = resume.and_then(|day| {
        variable
            .formulas
            .range(..=day)
            .next_back()
            .map(|(_, f)| f.clone())
    });

    variable.formulas.insert(start, formula);
    match end {
        None => {
            variable.formulas.retain(|date, _| *date <= start);
        }
        Some(end) => {
            variable.formulas.retain(|date, _| *date <= start || *date > end);
            if let (Some(day), Some(previous)) = (resume, resumed) {
                variable.formulas.entry(day).or_insert(previous);
            }
        }
    }
    variable.is_neutralized = false;
}
