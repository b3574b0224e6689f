//! What a formula sees of the simulation

use std::cell::RefCell;
use std::sync::Arc;

use super::engine::{plan_request, CalculationStack, RequestMode};
use super::mapping::MapHow;
use super::Simulation;
use crate::arrays::{Array, Scalar};
use crate::entities::Population;
use crate::errors::Result;
use crate::parameters::{ParameterNodeAtInstant, ScaleAtInstant, VectorialValue};
use crate::periods::{instant, AsInstant, AsPeriod, DateUnit, Instant, Period};
use crate::system::TaxBenefitSystem;
use crate::tracers::ParameterAccess;
use crate::variables::Variable;

/// Handle passed to formulas
///
/// Dependency values come from the caches or are evaluated on the spot, on the
/// calculation stack of the request being computed.
pub struct FormulaContext<'a> {
    simulation: &'a mut Simulation,
    stack: &'a mut CalculationStack,
    system: Arc<TaxBenefitSystem>,
    variable: &'a Variable,
    period: Period,
    parameter_log: &'a RefCell<Vec<ParameterAccess>>,
}

impl<'a> FormulaContext<'a> {
    pub(crate) fn new(
        simulation: &'a mut Simulation,
        stack: &'a mut CalculationStack,
        variable: &'a Variable,
        period: Period,
        parameter_log: &'a RefCell<Vec<ParameterAccess>>,
    ) -> Self {
        let system = Arc::clone(&simulation.tax_benefit_system);
        Self {
            simulation,
            stack,
            system,
            variable,
            period,
            parameter_log,
        }
    }

    /// The variable being computed
    pub fn variable(&self) -> &Variable {
        self.variable
    }

    pub fn period(&self) -> Period {
        self.period
    }

    /// Number of members of the variable's entity
    pub fn count(&self) -> usize {
        self.simulation.entity_count(&self.variable.entity)
    }

    pub fn default_array(&self) -> Array {
        self.simulation.default_array_for(self.variable)
    }

    /// Population-length array of `value`, typed like the variable
    pub fn filled(&self, value: impl Into<Scalar>) -> Array {
        Array::filled(
            self.variable.value_type,
            &value.into(),
            self.count(),
            self.variable.possible_values.as_ref(),
        )
    }

    pub fn tax_benefit_system(&self) -> &TaxBenefitSystem {
        &self.system
    }

    pub fn population(&self, entity: &str) -> Result<&Population> {
        self.simulation.population(entity)
    }

    /// The population of the variable's entity
    pub fn own_population(&self) -> Result<&Population> {
        self.simulation.population(&self.variable.entity)
    }

    /// Value of `name` over `period`, on `name`'s own entity
    pub fn calculate(&mut self, name: &str, period: impl AsPeriod) -> Result<Array> {
        self.request(name, period.as_period()?, RequestMode::Plain)
    }

    /// Value of `name` mapped onto `entity` (sum into groups, projection onto persons)
    pub fn calculate_for(&mut self, name: &str, period: impl AsPeriod, entity: &str) -> Result<Array> {
        let value = self.calculate(name, period)?;
        let source = self.system.get_variable(name)?.entity.clone();
        self.simulation.map_result(&value, &source, entity, None)
    }

    /// Sum of `name` over the sub-periods of `period`
    pub fn calculate_add(&mut self, name: &str, period: impl AsPeriod) -> Result<Array> {
        self.request(name, period.as_period()?, RequestMode::Add)
    }

    /// Share of a yearly `name` falling in `period`
    pub fn calculate_divide(&mut self, name: &str, period: impl AsPeriod) -> Result<Array> {
        self.request(name, period.as_period()?, RequestMode::Divide)
    }

    /// Move values between entities
    pub fn map_result(&self, values: &Array, source: &str, target: &str, how: Option<MapHow>) -> Result<Array> {
        self.simulation.map_result(values, source, target, how)
    }

    fn request(&mut self, name: &str, period: Period, mode: RequestMode) -> Result<Array> {
        let variable = Arc::clone(self.system.get_variable(name)?);
        let plan = plan_request(&variable, period, mode)?;
        let mut values = Vec::with_capacity(plan.periods.len());
        for &sub in &plan.periods {
            let value = match self.simulation.cached_value(&variable, sub)? {
                Some(value) => {
                    self.simulation.trace_cached(&variable.name, sub, &value);
                    value
                }
                None => self
                    .simulation
                    .evaluate_in(self.stack, Arc::clone(&variable), sub)?
                    .into_array(),
            };
            values.push(value);
        }
        plan.combine(&variable, values)
    }

    /// Numeric parameter at `when`, recorded for tracing
    pub fn parameter(&self, path: &str, when: impl AsInstant) -> Result<f64> {
        self.parameters().at(when)?.value(path)
    }

    /// Parameter accessor, as given to three-argument formulas
    pub fn parameters(&self) -> ParametersAt<'a> {
        ParametersAt {
            system: Arc::clone(&self.system),
            log: self.parameter_log,
        }
    }
}

/// Parameter accessor handed to formulas
///
/// Every value read through it is recorded against the request being computed.
#[derive(Clone)]
pub struct ParametersAt<'a> {
    system: Arc<TaxBenefitSystem>,
    log: &'a RefCell<Vec<ParameterAccess>>,
}

impl<'a> ParametersAt<'a> {
    /// The parameter tree at the start of `when`
    pub fn at(&self, when: impl AsInstant) -> Result<ParameterView<'a>> {
        let at = instant(when)?;
        Ok(ParameterView {
            node: self.system.get_parameters_at_instant(at),
            instant: at,
            log: self.log,
        })
    }
}

/// Snapshot of the parameter tree at one instant
pub struct ParameterView<'a> {
    node: Arc<ParameterNodeAtInstant>,
    instant: Instant,
    log: &'a RefCell<Vec<ParameterAccess>>,
}

impl ParameterView<'_> {
    fn record(&self, path: &str, value: serde_json::Value) {
        self.log.borrow_mut().push(ParameterAccess {
            name: path.to_string(),
            period: self.instant.period(DateUnit::Day),
            value,
        });
    }

    pub fn value(&self, path: &str) -> Result<f64> {
        let value = self.node.value(path)?;
        self.record(path, serde_json::json!(value));
        Ok(value)
    }

    pub fn flag(&self, path: &str) -> Result<bool> {
        let value = self.node.flag(path)?;
        self.record(path, serde_json::json!(value));
        Ok(value)
    }

    pub fn scale(&self, path: &str) -> Result<ScaleAtInstant> {
        let scale = self.node.scale(path)?.clone();
        let thresholds: Vec<Option<f64>> = scale.brackets.iter().map(|b| b.threshold).collect();
        self.record(path, serde_json::json!({ "thresholds": thresholds }));
        Ok(scale)
    }

    /// Children of the node at `path` picked per member by `keys`
    pub fn index_by<S: AsRef<str>>(&self, path: &str, keys: &[S]) -> Result<VectorialValue> {
        let picked = self.node.node(path)?.index_by(keys)?;
        if let VectorialValue::Numbers(values) = &picked {
            self.record(path, serde_json::json!(values));
        }
        Ok(picked)
    }

    /// Untraced access to the whole snapshot
    pub fn node(&self) -> &ParameterNodeAtInstant {
        &self.node
    }
}
