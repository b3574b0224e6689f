//! Request evaluation
//!
//! Every in-flight request sits on a [`CalculationStack`] shared by the whole
//! evaluation. A formula asking for a value nobody has stored yet evaluates it
//! on the same stack before carrying on, so each formula body runs once per
//! key. Cycle and spiral detection are lookups in the counters kept next to
//! the frames, and the stack depth is capped by `max_stack_depth`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use super::context::FormulaContext;
use super::Simulation;
use crate::arrays::{Array, ValueType};
use crate::errors::{CalculationError, Result, UpratingError};
use crate::parameters::get_leaf;
use crate::periods::{DateUnit, Period};
use crate::tracers::{self, StackFrame};
use crate::variables::{Formula, QuantityType, Variable};

/// A value request: variable name and period
pub(crate) type Key = (String, Period);

/// How a caller wants a variable's value fitted to the requested period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestMode {
    Plain,
    Add,
    Divide,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combine {
    Single,
    Sum,
    Divide(f64),
}

/// The periods a request is evaluated on and how their values are combined
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Plan {
    pub periods: Vec<Period>,
    combine: Combine,
}

impl Plan {
    fn single(period: Period) -> Self {
        Self {
            periods: vec![period],
            combine: Combine::Single,
        }
    }

    /// The only period, when the request maps to one evaluation as is
    pub(crate) fn single_period(&self) -> Option<Period> {
        match (self.combine, self.periods.as_slice()) {
            (Combine::Single, [only]) => Some(*only),
            _ => None,
        }
    }

    pub(crate) fn combine(&self, variable: &Variable, values: Vec<Array>) -> Result<Array> {
        match self.combine {
            Combine::Single => values.into_iter().next().ok_or_else(|| {
                CalculationError::formula(variable.name.clone(), "no value to combine")
            }),
            Combine::Sum => {
                if !variable.value_type.is_numeric() {
                    return Err(CalculationError::PeriodMismatch(format!(
                        "Unable to sum {} variable '{}' over time",
                        variable.value_type, variable.name
                    )));
                }
                let len = values.first().map_or(0, Array::len);
                let total = crate::arrays::sum_arrays(&values, len);
                Ok(match variable.value_type {
                    ValueType::Float => Array::Float(total),
                    _ => Array::Int(total.into_iter().map(|v| v.round() as i64).collect()),
                })
            }
            Combine::Divide(n) => {
                let value = values.into_iter().next().ok_or_else(|| {
                    CalculationError::formula(variable.name.clone(), "no value to divide")
                })?;
                Ok(Array::Float(value.to_f64().into_iter().map(|v| v / n).collect()))
            }
        }
    }
}

/// Work out which evaluations answer a request for `variable` over `period`
pub(crate) fn plan_request(variable: &Variable, period: Period, mode: RequestMode) -> Result<Plan> {
    match mode {
        RequestMode::Plain => plan_plain(variable, period),
        RequestMode::Add => plan_add(variable, period),
        RequestMode::Divide => plan_divide(variable, period),
    }
}

fn plan_plain(variable: &Variable, period: Period) -> Result<Plan> {
    let definition = variable.definition_period;
    if definition == DateUnit::Eternity {
        return Ok(Plan::single(Period::eternity()));
    }
    if period.unit() == definition && period.size() == 1 {
        return Ok(Plan::single(period));
    }
    let stock = variable.quantity_type == QuantityType::Stock;
    match (definition, period.unit()) {
        (DateUnit::Month, DateUnit::Year) if stock => Ok(Plan::single(Period::new(
            DateUnit::Month,
            period.stop().first_of(DateUnit::Month),
            1,
        ))),
        (DateUnit::Month, DateUnit::Year) => Ok(Plan {
            periods: period.get_subperiods(DateUnit::Month)?.collect(),
            combine: Combine::Sum,
        }),
        (DateUnit::Year, DateUnit::Month) if period.size() == 1 && stock => {
            Ok(Plan::single(period.this_year()))
        }
        (DateUnit::Year, DateUnit::Month) if period.size() == 1 => Ok(Plan {
            periods: vec![period.this_year()],
            combine: Combine::Divide(12.0),
        }),
        _ => Err(period_mismatch(variable, period)),
    }
}

fn period_mismatch(variable: &Variable, period: Period) -> CalculationError {
    let name = &variable.name;
    let message = match variable.definition_period {
        DateUnit::Month if period.unit() != DateUnit::Month => format!(
            "Unable to compute variable '{0}' for period {1}: '{0}' must be computed for a whole month. \
             You can use the ADD option to sum '{0}' over the requested period, or change the requested period to 'period.first_month'.",
            name, period
        ),
        DateUnit::Year if period.unit() != DateUnit::Year => format!(
            "Unable to compute variable '{0}' for period {1}: '{0}' must be computed for a whole year. \
             You can use the DIVIDE option to get an estimate of {0} by dividing the yearly value by 12, or change the requested period to 'period.this_year'.",
            name, period
        ),
        unit => format!(
            "Unable to compute variable '{0}' for period {1}: '{0}' must be computed for a whole {2}. \
             You can use the ADD option to sum '{0}' over the requested period.",
            name, period, unit
        ),
    };
    CalculationError::PeriodMismatch(message)
}

fn plan_add(variable: &Variable, period: Period) -> Result<Plan> {
    let definition = variable.definition_period;
    if definition == DateUnit::Eternity {
        return Err(CalculationError::PeriodMismatch(format!(
            "Unable to sum constant variable '{}' over period {}: only variables defined daily, monthly, or yearly can be summed over time.",
            variable.name, period
        )));
    }
    if definition.weight() > period.unit().weight() || period.is_eternity() {
        return Err(CalculationError::PeriodMismatch(format!(
            "Unable to compute variable '{0}' for period {1}: '{0}' can only be computed for {2}-long periods. \
             You can use the DIVIDE option to get an estimate of {0} by dividing the yearly value by 12, or change the requested period to 'period.this_year'.",
            variable.name, period, definition
        )));
    }
    Ok(Plan {
        periods: period.get_subperiods(definition)?.collect(),
        combine: Combine::Sum,
    })
}

fn plan_divide(variable: &Variable, period: Period) -> Result<Plan> {
    if variable.definition_period != DateUnit::Year {
        return Err(CalculationError::PeriodMismatch(format!(
            "Unable to divide the value of '{}' over time on period {}: only variables defined yearly can be divided over time.",
            variable.name, period
        )));
    }
    if period.size() != 1 {
        return Err(CalculationError::PeriodMismatch(
            "DIVIDE option can only be used for a one-year or a one-month requested period".to_string(),
        ));
    }
    match period.unit() {
        DateUnit::Month => Ok(Plan {
            periods: vec![period.this_year()],
            combine: Combine::Divide(12.0),
        }),
        DateUnit::Year => Ok(Plan::single(period)),
        _ => Err(CalculationError::PeriodMismatch(format!(
            "Unable to divide the value of '{}' to match period {}.",
            variable.name, period
        ))),
    }
}

/// Result of one evaluation
///
/// Spiral and neutralized outcomes carry a default-filled array and are never
/// cached.
#[derive(Debug, Clone, PartialEq)]
pub enum CalculationOutcome {
    Success(Array),
    /// The request was part of a spiral and was cut short
    DefaultedDueToSpiral(Array),
    Neutralized(Array),
}

impl CalculationOutcome {
    pub fn array(&self) -> &Array {
        match self {
            CalculationOutcome::Success(a)
            | CalculationOutcome::DefaultedDueToSpiral(a)
            | CalculationOutcome::Neutralized(a) => a,
        }
    }

    pub fn into_array(self) -> Array {
        match self {
            CalculationOutcome::Success(a)
            | CalculationOutcome::DefaultedDueToSpiral(a)
            | CalculationOutcome::Neutralized(a) => a,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CalculationOutcome::Success(_))
    }
}

/// Where a finished request's value is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persist {
    Nothing,
    Holder,
    /// Holder and macro cache
    Everywhere,
}

/// One in-flight request
struct Frame {
    variable: Arc<Variable>,
    period: Period,
}

impl Frame {
    fn key(&self) -> Key {
        (self.variable.name.clone(), self.period)
    }
}

/// Requests currently being evaluated, outermost first
///
/// Counters per exact key and per variable name make cycle and spiral checks
/// lookups instead of scans.
#[derive(Default)]
pub(crate) struct CalculationStack {
    frames: Vec<Frame>,
    exact: HashMap<Key, usize>,
    by_name: HashMap<String, usize>,
}

impl CalculationStack {
    fn push(&mut self, frame: Frame) {
        *self.exact.entry(frame.key()).or_default() += 1;
        *self.by_name.entry(frame.variable.name.clone()).or_default() += 1;
        self.frames.push(frame);
    }

    fn pop(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        let key = frame.key();
        if let Some(count) = self.exact.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.exact.remove(&key);
            }
        }
        if let Some(count) = self.by_name.get_mut(&key.0) {
            *count -= 1;
            if *count == 0 {
                self.by_name.remove(&key.0);
            }
        }
        Some(frame)
    }

    fn stack_frames(&self, branch: &str) -> Vec<StackFrame> {
        self.frames
            .iter()
            .map(|f| StackFrame {
                name: f.variable.name.clone(),
                period: f.period,
                branch: branch.to_string(),
            })
            .collect()
    }

    fn cycle_message(&self, branch: &str) -> String {
        let frames = self.stack_frames(branch);
        let Some(current) = frames.last() else {
            return String::new();
        };
        let top = frames.len() - 1;
        let start = frames[..top]
            .iter()
            .rposition(|f| f.name == current.name && f.period == current.period)
            .unwrap_or(top);
        let normal: Vec<String> = frames[..start].iter().map(|f| format!("  {}", f)).collect();
        let cycle: Vec<String> = frames[start..].iter().map(|f| format!("  >> {}", f)).collect();
        format!(
            "Circular definition detected on formula {}@{}. The circle is:\n\nNormal computation tree:\n{}\n\nCycle start:\n{}",
            current.name,
            current.period,
            normal.join("\n"),
            cycle.join("\n")
        )
    }
}

impl Simulation {
    /// Evaluate `variable` over exactly `period`, on this simulation's branch
    pub(crate) fn evaluate(&mut self, variable: Arc<Variable>, period: Period) -> Result<CalculationOutcome> {
        let mut stack = CalculationStack::default();
        let result = self.evaluate_in(&mut stack, variable, period);
        self.purge_invalidated();
        result
    }

    /// Evaluate a request on top of the requests already in `stack`
    ///
    /// Formulas reach this through their context when they read a value that
    /// is not stored yet, so each formula body runs against real dependency
    /// values.
    pub(crate) fn evaluate_in(
        &mut self,
        stack: &mut CalculationStack,
        variable: Arc<Variable>,
        period: Period,
    ) -> Result<CalculationOutcome> {
        self.push_frame(stack, Arc::clone(&variable), period)?;
        let result = self.resolve(stack, &variable, period);
        stack.pop();
        {
            let mut tracer = tracers::lock(&self.tracer);
            if let Ok((outcome, _)) = &result {
                tracer.record_calculation_result(outcome.array());
            }
            tracer.record_calculation_end();
        }
        let (outcome, persist) = result?;
        self.persist(&variable, period, &outcome, persist)?;
        Ok(outcome)
    }

    fn push_frame(&mut self, stack: &mut CalculationStack, variable: Arc<Variable>, period: Period) -> Result<()> {
        if stack.frames.len() >= self.config.max_stack_depth {
            let stack_dump: Vec<String> = stack
                .stack_frames(&self.branch_name)
                .iter()
                .map(|f| format!("  {}", f))
                .collect();
            return Err(CalculationError::StackOverflow {
                depth: self.config.max_stack_depth,
                stack: stack_dump.join("\n"),
            });
        }
        tracers::lock(&self.tracer).record_calculation_start(&variable.name, period, &self.branch_name);
        stack.push(Frame { variable, period });
        Ok(())
    }

    fn resolve(
        &mut self,
        stack: &mut CalculationStack,
        variable: &Arc<Variable>,
        period: Period,
    ) -> Result<(CalculationOutcome, Persist)> {
        if self.is_neutralized(variable, period) {
            let default = self.default_array_for(variable);
            return Ok((CalculationOutcome::Neutralized(default), Persist::Nothing));
        }
        if let Some(value) = self.stored_value(variable, period)? {
            return Ok((CalculationOutcome::Success(value), Persist::Nothing));
        }
        if !variable.is_input_variable() {
            if let Some(cache) = &self.macro_cache {
                let count = self.entity_count(&variable.entity);
                if let Some(value) = cache.get(variable, period, &self.branch_name, count)? {
                    return Ok((CalculationOutcome::Success(value), Persist::Holder));
                }
            }
        }
        let mask = match &variable.defined_for {
            Some(condition) => {
                let entity = variable.entity.clone();
                let mask = self
                    .run_formula(stack, variable, period, |ctx| ctx.calculate_for(condition, period, &entity))?
                    .to_mask();
                if mask.iter().all(|inside| !inside) {
                    let default = self.finalize(variable, self.default_array_for(variable), None)?;
                    return Ok((CalculationOutcome::Success(default), Persist::Everywhere));
                }
                Some(mask)
            }
            None => None,
        };
        if let Some(outcome) = self.check_recursion(stack)? {
            return Ok((outcome, Persist::Nothing));
        }
        self.compute(stack, variable, period, mask.as_deref())
    }

    fn check_recursion(&mut self, stack: &CalculationStack) -> Result<Option<CalculationOutcome>> {
        let Some(top) = stack.frames.last() else {
            return Ok(None);
        };
        let key = top.key();
        if stack.exact.get(&key).copied().unwrap_or(0) > 1 {
            return Err(CalculationError::Cycle(stack.cycle_message(&self.branch_name)));
        }
        let earlier = stack.by_name.get(&key.0).copied().unwrap_or(1).saturating_sub(1);
        if earlier >= self.config.max_spiral_loops {
            let cut = self.cut_spiral(stack, &key.0);
            log::debug!(
                "{}; defaulting {}@{} and invalidating {} frames",
                CalculationError::Spiral(format!("{}@{}", key.0, key.1)),
                key.0,
                key.1,
                cut
            );
            let default = self.default_array_for(&top.variable);
            return Ok(Some(CalculationOutcome::DefaultedDueToSpiral(default)));
        }
        Ok(None)
    }

    /// Mark frames from the top of the stack down to the oldest occurrence of
    /// `name` involved in the spiral; their values are purged once the
    /// request completes
    fn cut_spiral(&mut self, stack: &CalculationStack, name: &str) -> usize {
        let mut seen = 0;
        let mut cut = 0;
        for frame in stack.frames.iter().rev() {
            self.invalidated.insert(frame.key());
            cut += 1;
            if frame.variable.name == name {
                seen += 1;
                if seen > self.config.max_spiral_loops {
                    break;
                }
            }
        }
        cut
    }

    fn compute(
        &mut self,
        stack: &mut CalculationStack,
        variable: &Arc<Variable>,
        period: Period,
        mask: Option<&[bool]>,
    ) -> Result<(CalculationOutcome, Persist)> {
        let formula = variable.get_formula(&period).cloned();
        let computed = self.run_formula(stack, variable, period, |ctx| match &formula {
            Some(Formula::Simple(f)) => f(ctx, period).map(Some),
            Some(Formula::WithParameters(f)) => {
                let parameters = ctx.parameters();
                f(ctx, period, &parameters).map(Some)
            }
            None if variable.adds.is_some() || variable.subtracts.is_some() => {
                sum_components(ctx, variable, period).map(Some)
            }
            None => Ok(None),
        })?;
        match computed {
            Some(array) => {
                let expected = self.entity_count(&variable.entity);
                if array.len() != expected {
                    return Err(CalculationError::InvalidArraySize {
                        variable: variable.name.clone(),
                        expected,
                        actual: array.len(),
                    });
                }
                let array = self.finalize(variable, array, mask)?;
                Ok((CalculationOutcome::Success(array), Persist::Everywhere))
            }
            None => self.fall_back(variable, period, mask),
        }
    }

    /// Uprating, carry-over or the default, for variables without a formula
    fn fall_back(
        &self,
        variable: &Variable,
        period: Period,
        mask: Option<&[bool]>,
    ) -> Result<(CalculationOutcome, Persist)> {
        let known = self.stored_periods(variable);
        if let Some(path) = &variable.uprating {
            if let Some(latest) = known.iter().max_by_key(|p| p.start()).copied() {
                if latest.start() < period.start() {
                    let value = self.uprate(variable, path, latest, period)?;
                    return Ok((CalculationOutcome::Success(value), Persist::Nothing));
                }
            }
        }
        if self.tax_benefit_system.auto_carry_over_input_variables && variable.output_mode.is_none() {
            let previous = known
                .iter()
                .filter(|p| p.start() < period.start())
                .max_by_key(|p| p.start())
                .copied();
            if let Some(previous) = previous {
                if let Some(value) = self.stored_value(variable, previous)? {
                    log::warn!(
                        "no value for '{}' at {}, carrying over the value of {}",
                        variable.name,
                        period,
                        previous
                    );
                    let value = self.finalize(variable, value, mask)?;
                    return Ok((CalculationOutcome::Success(value), Persist::Everywhere));
                }
            }
        }
        let default = self.finalize(variable, self.default_array_for(variable), mask)?;
        Ok((CalculationOutcome::Success(default), Persist::Everywhere))
    }

    fn uprate(&self, variable: &Variable, path: &str, latest: Period, period: Period) -> Result<Array> {
        let parameter = get_leaf(self.tax_benefit_system.parameters(), path)?;
        let index = |at: Period| {
            parameter.number_at(at.start()).ok_or_else(|| UpratingError::Value {
                parameter: path.to_string(),
                message: format!("no value at {} to uprate '{}' with", at.start(), variable.name),
            })
        };
        let before = index(latest)?;
        let now = index(period)?;
        if before == 0.0 {
            return Err(UpratingError::Value {
                parameter: path.to_string(),
                message: format!("cannot uprate '{}' from a zero index at {}", variable.name, latest.start()),
            }
            .into());
        }
        let factor = now / before;
        let base = self
            .stored_value(variable, latest)?
            .unwrap_or_else(|| self.default_array_for(variable));
        let uprated = Array::Float(base.to_f64().into_iter().map(|v| v * factor).collect());
        uprated
            .cast(variable.value_type, variable.possible_values.as_ref())
            .map_err(|message| CalculationError::formula(variable.name.clone(), message))
    }

    /// Apply the `defined_for` mask and cast to the variable's type
    fn finalize(&self, variable: &Variable, array: Array, mask: Option<&[bool]>) -> Result<Array> {
        let cast = |array: Array| {
            array
                .cast(variable.value_type, variable.possible_values.as_ref())
                .map_err(|message| CalculationError::formula(variable.name.clone(), message))
        };
        let array = cast(array)?;
        match mask {
            Some(mask) => {
                let default = cast(self.default_array_for(variable))?;
                array
                    .select(mask, &default)
                    .map_err(|message| CalculationError::formula(variable.name.clone(), message))
            }
            None => Ok(array),
        }
    }

    /// Run `body` with a formula context for the request on top of `stack`
    ///
    /// Parameters read by the body are added to the request's trace node.
    fn run_formula<T>(
        &mut self,
        stack: &mut CalculationStack,
        variable: &Variable,
        period: Period,
        body: impl FnOnce(&mut FormulaContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let log = RefCell::new(Vec::new());
        let value = {
            let mut ctx = FormulaContext::new(self, stack, variable, period, &log);
            body(&mut ctx)?
        };
        if self.config.trace {
            let mut tracer = tracers::lock(&self.tracer);
            for access in log.into_inner() {
                tracer.record_parameter_access(&access.name, access.period, access.value);
            }
        }
        Ok(value)
    }

    /// Add a value read from the caches as a leaf of the current trace node
    pub(crate) fn trace_cached(&self, name: &str, period: Period, value: &Array) {
        if self.config.trace {
            tracers::lock(&self.tracer).record_cached(name, period, &self.branch_name, value);
        }
    }

    fn persist(
        &mut self,
        variable: &Arc<Variable>,
        period: Period,
        outcome: &CalculationOutcome,
        persist: Persist,
    ) -> Result<()> {
        if persist == Persist::Nothing {
            return Ok(());
        }
        let branch = self.branch_name.clone();
        self.holder_mut(variable)?
            .put_in_cache(outcome.array().clone(), period, &branch)?;
        let key = (variable.name.clone(), period);
        if persist == Persist::Everywhere && !variable.is_input_variable() && !self.invalidated.contains(&key) {
            if let Some(cache) = &self.macro_cache {
                cache.set(&key.0, key.1, &self.branch_name, outcome.array())?;
            }
        }
        Ok(())
    }

    /// Drop the values computed inside spirals
    fn purge_invalidated(&mut self) {
        let invalidated = std::mem::take(&mut self.invalidated);
        let branch = self.branch_name.clone();
        for (name, period) in invalidated {
            let Some(entity) = self.tax_benefit_system.variable(&name).map(|v| v.entity.clone()) else {
                continue;
            };
            if let Some(holder) = self.populations.get_mut(&entity).and_then(|p| p.holder_mut(&name)) {
                holder.delete_arrays(Some(period), &branch);
            }
        }
    }
}

/// Sum of the `adds` components minus the `subtracts` ones
///
/// A component is a variable name, or else a parameter path read at the
/// start of the period.
fn sum_components(ctx: &mut FormulaContext<'_>, variable: &Variable, period: Period) -> Result<Array> {
    let count = ctx.count();
    let mut total = vec![0.0; count];
    let signed = variable
        .adds
        .iter()
        .flatten()
        .map(|c| (c, 1.0))
        .chain(variable.subtracts.iter().flatten().map(|c| (c, -1.0)));
    for (component, sign) in signed {
        let values = if ctx.tax_benefit_system().variable(component).is_some() {
            ctx.calculate_for(component, period, &variable.entity)?.to_f64()
        } else {
            let value = ctx
                .parameter(component, period)
                .map_err(|err| CalculationError::InvalidAdds {
                    variable: variable.name.clone(),
                    message: format!("'{}' is neither a variable nor a numeric parameter: {}", component, err),
                })?;
            vec![value; count]
        };
        for (t, v) in total.iter_mut().zip(values) {
            *t += sign * v;
        }
    }
    Ok(Array::Float(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periods::period;

    fn monthly(name: &str) -> Variable {
        Variable::new(name, "person", ValueType::Float, DateUnit::Month)
    }

    fn yearly(name: &str) -> Variable {
        Variable::new(name, "person", ValueType::Float, DateUnit::Year)
    }

    #[test]
    fn test_plain_request_on_own_period() {
        let plan = plan_request(&yearly("tax"), period("2020").unwrap(), RequestMode::Plain).unwrap();
        assert_eq!(plan.single_period(), Some(period("2020").unwrap()));
    }

    #[test]
    fn test_monthly_flow_at_year_sums_months() {
        let plan = plan_request(&monthly("salary"), period("2020").unwrap(), RequestMode::Plain).unwrap();
        assert_eq!(plan.periods.len(), 12);
        assert_eq!(plan.periods[0], period("2020-01").unwrap());
        assert_eq!(plan.single_period(), None);
        let values = vec![Array::Float(vec![10.0, 1.0]); 12];
        assert_eq!(plan.combine(&monthly("salary"), values).unwrap(), Array::Float(vec![120.0, 12.0]));
    }

    #[test]
    fn test_monthly_stock_at_year_takes_last_month() {
        let plan = plan_request(&monthly("savings").stock(), period("2020").unwrap(), RequestMode::Plain).unwrap();
        assert_eq!(plan.single_period(), Some(period("2020-12").unwrap()));
    }

    #[test]
    fn test_yearly_at_month() {
        let flow = plan_request(&yearly("tax"), period("2020-03").unwrap(), RequestMode::Plain).unwrap();
        assert_eq!(flow.periods, vec![period("2020").unwrap()]);
        assert_eq!(
            flow.combine(&yearly("tax"), vec![Array::Float(vec![120.0])]).unwrap(),
            Array::Float(vec![10.0])
        );
        let stock = plan_request(&yearly("age").stock(), period("2020-03").unwrap(), RequestMode::Plain).unwrap();
        assert_eq!(stock.single_period(), Some(period("2020").unwrap()));
    }

    #[test]
    fn test_mismatch_messages() {
        let err = plan_request(&monthly("salary"), period("2020-01-05").unwrap(), RequestMode::Plain).unwrap_err();
        assert!(err.to_string().contains("must be computed for a whole month"));
        let err = plan_request(&yearly("tax"), period("year:2020:2").unwrap(), RequestMode::Plain).unwrap_err();
        assert!(err.to_string().contains("must be computed for a whole year. You can use the ADD option"));
    }

    #[test]
    fn test_eternal_variable_accepts_any_period() {
        let birth = Variable::new("birth_year", "person", ValueType::Int, DateUnit::Eternity);
        let plan = plan_request(&birth, period("2020-05").unwrap(), RequestMode::Plain).unwrap();
        assert_eq!(plan.single_period(), Some(Period::eternity()));
    }

    #[test]
    fn test_add_rules() {
        let plan = plan_request(&monthly("salary"), period("year:2020:2").unwrap(), RequestMode::Add).unwrap();
        assert_eq!(plan.periods.len(), 24);

        let err = plan_request(&yearly("tax"), period("2020-01").unwrap(), RequestMode::Add).unwrap_err();
        assert!(err.to_string().contains("can only be computed for year-long periods"));

        let birth = Variable::new("birth_year", "person", ValueType::Int, DateUnit::Eternity);
        let err = plan_request(&birth, period("2020").unwrap(), RequestMode::Add).unwrap_err();
        assert!(err.to_string().starts_with("Unable to sum constant variable"));
    }

    #[test]
    fn test_add_of_int_stays_int() {
        let count = Variable::new("visits", "person", ValueType::Int, DateUnit::Month);
        let plan = plan_request(&count, period("2020").unwrap(), RequestMode::Add).unwrap();
        let values = vec![Array::Int(vec![1]); 12];
        assert_eq!(plan.combine(&count, values).unwrap(), Array::Int(vec![12]));

        let status = Variable::new("status", "person", ValueType::Str, DateUnit::Month);
        let plan = plan_request(&status, period("2020").unwrap(), RequestMode::Add).unwrap();
        assert!(plan.combine(&status, vec![Array::Str(vec![String::new()]); 12]).is_err());
    }

    #[test]
    fn test_divide_rules() {
        let plan = plan_request(&yearly("tax"), period("2020-06").unwrap(), RequestMode::Divide).unwrap();
        assert_eq!(plan.periods, vec![period("2020").unwrap()]);
        let plan = plan_request(&yearly("tax"), period("2020").unwrap(), RequestMode::Divide).unwrap();
        assert_eq!(plan.single_period(), Some(period("2020").unwrap()));

        let err = plan_request(&monthly("salary"), period("2020").unwrap(), RequestMode::Divide).unwrap_err();
        assert!(err.to_string().contains("only variables defined yearly can be divided"));
        let err = plan_request(&yearly("tax"), period("month:2020-01:3").unwrap(), RequestMode::Divide).unwrap_err();
        assert_eq!(
            err.to_string(),
            "DIVIDE option can only be used for a one-year or a one-month requested period"
        );
    }

    #[test]
    fn test_stack_counters() {
        let mut stack = CalculationStack::default();
        let a = Arc::new(yearly("a"));
        let frame = |p: &str| Frame {
            variable: Arc::clone(&a),
            period: period(p).unwrap(),
        };
        stack.push(frame("2020"));
        stack.push(frame("2019"));
        assert_eq!(stack.by_name["a"], 2);
        stack.push(frame("2020"));
        assert_eq!(stack.exact[&("a".to_string(), period("2020").unwrap())], 2);
        let message = stack.cycle_message("default");
        assert!(message.starts_with("Circular definition detected on formula a@2020."));
        assert!(message.contains("Cycle start:\n  >> a@2020 (branch default)\n  >> a@2019 (branch default)"));
        stack.pop();
        stack.pop();
        stack.pop();
        assert!(stack.exact.is_empty());
        assert!(stack.by_name.is_empty());
    }
}
