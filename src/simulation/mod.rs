//! Simulations: populations, cached values and the calculation engine
//!
//! A [`Simulation`] binds a [`TaxBenefitSystem`] to concrete populations and
//! answers `calculate` requests, caching every computed array in the holder
//! of its variable. Branches are named what-if copies that read the inputs of
//! the simulation they were taken from but keep their own computed values.
//!
//! # Example
//!
//! ```rust,ignore
//! use microsim_engine::simulation::{SimulationBuilder, SimulationConfig};
//!
//! let mut simulation = SimulationBuilder::new(system)
//!     .with_config(SimulationConfig::traced())
//!     .build_from_entities(&situation)?;
//! let tax = simulation.calculate("income_tax", "2024")?;
//! ```

mod builder;
mod config;
mod context;
mod dataframe;
mod dataset;
mod engine;
mod macro_cache;
mod mapping;

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::hash::{Hash, Hasher};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use serde::Serialize;

pub use builder::SimulationBuilder;
pub use config::SimulationConfig;
pub use context::{FormulaContext, ParameterView, ParametersAt};
pub use dataframe::DataFrame;
pub use dataset::{split_column_name, CsvDataset, Dataset, DatasetColumns};
pub use engine::CalculationOutcome;
pub use macro_cache::MacroCache;
pub use mapping::MapHow;

use crate::arrays::Array;
use crate::entities::Population;
use crate::errors::{CalculationError, Result, StorageError};
use crate::periods::{AsPeriod, Period};
use crate::storage::{Holder, HolderMemoryUsage, SpillSettings};
use crate::system::TaxBenefitSystem;
use crate::tracers::{self, FullTracer, SharedTracer, SimpleTracer};
use crate::variables::{OutputMode, Variable};
use engine::{plan_request, Key, RequestMode};

pub const DEFAULT_BRANCH: &str = "default";

/// Memory footprint of a simulation's holders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsageReport {
    pub total_nb_bytes: usize,
    pub by_variable: BTreeMap<String, HolderMemoryUsage>,
}

#[derive(Debug)]
pub struct Simulation {
    tax_benefit_system: Arc<TaxBenefitSystem>,
    populations: BTreeMap<String, Population>,
    branch_name: String,
    /// Branches this one was taken from, nearest first
    ancestors: Vec<String>,
    branches: BTreeMap<String, Simulation>,
    config: SimulationConfig,
    tracer: SharedTracer,
    invalidated: BTreeSet<Key>,
    /// Variables given values through `set_input`
    input_variables: BTreeSet<String>,
    spill: Option<SpillSettings>,
    macro_cache: Option<MacroCache>,
}

impl Simulation {
    /// Bind `tax_benefit_system` to one population per entity
    ///
    /// Every group population must cover exactly the persons of the person
    /// population.
    pub fn new(
        tax_benefit_system: Arc<TaxBenefitSystem>,
        populations: Vec<Population>,
        config: SimulationConfig,
    ) -> Result<Self> {
        let populations: BTreeMap<String, Population> = populations
            .into_iter()
            .map(|p| (p.key().to_string(), p))
            .collect();
        let person_key = &tax_benefit_system.person_entity().key;
        let person_count = populations
            .get(person_key)
            .map(Population::count)
            .ok_or_else(|| CalculationError::EntityNotFound(person_key.clone()))?;
        for entity in tax_benefit_system.entities() {
            let population = populations
                .get(&entity.key)
                .ok_or_else(|| CalculationError::EntityNotFound(entity.key.clone()))?;
            if let Some(members) = population.members() {
                if members.persons_count() != person_count {
                    return Err(CalculationError::formula(
                        entity.key.clone(),
                        format!(
                            "membership covers {} persons but the simulation has {}",
                            members.persons_count(),
                            person_count
                        ),
                    ));
                }
            }
        }
        let spill = spill_settings(&config)?;
        let macro_cache = open_macro_cache(&config, &tax_benefit_system, &populations)?;
        Ok(Self {
            tracer: new_tracer(config.trace),
            tax_benefit_system,
            populations,
            branch_name: DEFAULT_BRANCH.to_string(),
            ancestors: Vec::new(),
            branches: BTreeMap::new(),
            config,
            invalidated: BTreeSet::new(),
            input_variables: BTreeSet::new(),
            spill,
            macro_cache,
        })
    }

    pub fn tax_benefit_system(&self) -> &Arc<TaxBenefitSystem> {
        &self.tax_benefit_system
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn parent_branch(&self) -> Option<&str> {
        self.ancestors.first().map(String::as_str)
    }

    pub fn tracer(&self) -> &SharedTracer {
        &self.tracer
    }

    pub fn population(&self, entity: &str) -> Result<&Population> {
        self.populations
            .get(entity)
            .ok_or_else(|| CalculationError::EntityNotFound(entity.to_string()))
    }

    /// The person population
    pub fn person(&self) -> Result<&Population> {
        self.population(&self.tax_benefit_system.person_entity().key)
    }

    pub fn populations(&self) -> impl Iterator<Item = &Population> {
        self.populations.values()
    }

    /// Number of members of `entity`, zero if unknown
    pub fn entity_count(&self, entity: &str) -> usize {
        self.populations.get(entity).map_or(0, Population::count)
    }

    pub fn default_array_for(&self, variable: &Variable) -> Array {
        Array::filled(
            variable.value_type,
            &variable.default_value,
            self.entity_count(&variable.entity),
            variable.possible_values.as_ref(),
        )
    }

    pub fn calculate(&mut self, name: &str, period: impl AsPeriod) -> Result<Array> {
        self.calculate_outcome(name, period).map(CalculationOutcome::into_array)
    }

    /// Like `calculate`, telling computed values from neutralized defaults
    pub fn calculate_outcome(&mut self, name: &str, period: impl AsPeriod) -> Result<CalculationOutcome> {
        self.request(name, period.as_period()?, RequestMode::Plain)
    }

    /// Sum of `name` over the sub-periods of `period`
    pub fn calculate_add(&mut self, name: &str, period: impl AsPeriod) -> Result<Array> {
        self.request(name, period.as_period()?, RequestMode::Add)
            .map(CalculationOutcome::into_array)
    }

    /// Yearly `name` brought down to a month, or the year itself
    pub fn calculate_divide(&mut self, name: &str, period: impl AsPeriod) -> Result<Array> {
        self.request(name, period.as_period()?, RequestMode::Divide)
            .map(CalculationOutcome::into_array)
    }

    /// Calculate with the conversion declared by the variable's output mode
    pub fn calculate_output(&mut self, name: &str, period: impl AsPeriod) -> Result<Array> {
        match self.tax_benefit_system.get_variable(name)?.output_mode {
            Some(OutputMode::Add) => self.calculate_add(name, period),
            Some(OutputMode::Divide) => self.calculate_divide(name, period),
            None => self.calculate(name, period),
        }
    }

    /// Calculate `name` and map the result onto `entity`
    pub fn calculate_for(&mut self, name: &str, period: impl AsPeriod, entity: &str) -> Result<Array> {
        let source = self.tax_benefit_system.get_variable(name)?.entity.clone();
        let value = self.calculate(name, period)?;
        self.map_result(&value, &source, entity, None)
    }

    /// Calculate `name` for the configured default calculation period
    pub fn calculate_default(&mut self, name: &str) -> Result<Array> {
        let period = self.config.default_calculation_period.ok_or_else(|| {
            CalculationError::PeriodMismatch(format!(
                "No period was given for '{}' and the simulation has no default calculation period",
                name
            ))
        })?;
        self.calculate(name, period)
    }

    /// Calculate several variables at once, as columns on the first one's entity
    pub fn calculate_dataframe<S: AsRef<str>>(&mut self, names: &[S], period: impl AsPeriod) -> Result<DataFrame> {
        let period = period.as_period()?;
        let Some(first) = names.first() else {
            return Ok(DataFrame::default());
        };
        let entity = self.tax_benefit_system.get_variable(first.as_ref())?.entity.clone();
        let mut frame = DataFrame::new(entity.clone(), self.population(&entity)?.ids().to_vec());
        for name in names {
            let values = self.calculate_for(name.as_ref(), period, &entity)?;
            frame.push_column(name.as_ref(), values.to_f64())?;
        }
        Ok(frame)
    }

    fn request(&mut self, name: &str, period: Period, mode: RequestMode) -> Result<CalculationOutcome> {
        let variable = Arc::clone(self.tax_benefit_system.get_variable(name)?);
        let plan = plan_request(&variable, period, mode)?;
        if let Some(only) = plan.single_period() {
            return self.evaluate(variable, only);
        }
        let mut values = Vec::with_capacity(plan.periods.len());
        let mut neutralized = true;
        for &sub in &plan.periods {
            let outcome = self.evaluate(Arc::clone(&variable), sub)?;
            neutralized &= matches!(outcome, CalculationOutcome::Neutralized(_));
            values.push(outcome.into_array());
        }
        let combined = plan.combine(&variable, values)?;
        Ok(if neutralized {
            CalculationOutcome::Neutralized(combined)
        } else {
            CalculationOutcome::Success(combined)
        })
    }

    /// Store an input value for `name` over `period`
    ///
    /// Inputs starting after the variable's end and inputs for neutralized
    /// variables are ignored.
    pub fn set_input(&mut self, name: &str, period: impl AsPeriod, array: impl Into<Array>) -> Result<()> {
        let variable = Arc::clone(self.tax_benefit_system.get_variable(name)?);
        let period = period.as_period()?;
        if let Some(end) = variable.end {
            if period.start() > end {
                log::debug!("ignoring input for '{}' at {}: the variable ends on {}", name, period, end);
                return Ok(());
            }
        }
        if variable.is_neutralized {
            log::warn!(
                "You cannot set a value for the variable {}, as it has been neutralized. The value you provided ({}) will be ignored.",
                name,
                period
            );
            return Ok(());
        }
        let branch = self.branch_name.clone();
        self.holder_mut(&variable)?.set_input(period, array.into(), &branch)?;
        self.input_variables.insert(name.to_string());
        Ok(())
    }

    /// Stored value of `name` for exactly `period`, without calculating
    pub fn get_array(&self, name: &str, period: impl AsPeriod) -> Result<Option<Array>> {
        let variable = self.tax_benefit_system.get_variable(name)?;
        self.stored_value(variable, period.as_period()?)
    }

    /// The holder of `name`, created empty if needed
    pub fn get_holder(&mut self, name: &str) -> Result<&mut Holder> {
        let variable = Arc::clone(self.tax_benefit_system.get_variable(name)?);
        self.holder_mut(&variable)
    }

    /// Remove stored values of `name` within `period`, or all of them
    pub fn delete_arrays(&mut self, name: &str, period: Option<Period>) -> Result<()> {
        let variable = self.tax_benefit_system.get_variable(name)?;
        let branch = self.branch_name.clone();
        if let Some(holder) = self
            .populations
            .get_mut(&variable.entity)
            .and_then(|p| p.holder_mut(name))
        {
            holder.delete_arrays(period, &branch);
        }
        Ok(())
    }

    /// Periods with a stored value for `name`, in any branch
    pub fn get_known_periods(&self, name: &str) -> Result<Vec<Period>> {
        let variable = self.tax_benefit_system.get_variable(name)?;
        Ok(self.find_holder(variable).map(Holder::get_known_periods).unwrap_or_default())
    }

    pub fn get_memory_usage(&self, variables: Option<&[String]>) -> MemoryUsageReport {
        let by_variable: BTreeMap<String, HolderMemoryUsage> = self
            .populations
            .values()
            .flat_map(|p| p.get_memory_usage(variables))
            .collect();
        MemoryUsageReport {
            total_nb_bytes: by_variable.values().map(|u| u.memory.total_nb_bytes).sum(),
            by_variable,
        }
    }

    /// Independent copy with the same values, a fresh tracer and no branches
    pub fn duplicate(&self) -> Result<Simulation> {
        let spill = spill_settings(&self.config)?;
        let mut populations = BTreeMap::new();
        for (key, population) in &self.populations {
            populations.insert(key.clone(), population.duplicate(spill.clone())?);
        }
        let macro_cache = open_macro_cache(&self.config, &self.tax_benefit_system, &populations)?;
        Ok(Simulation {
            tax_benefit_system: Arc::clone(&self.tax_benefit_system),
            populations,
            branch_name: self.branch_name.clone(),
            ancestors: self.ancestors.clone(),
            branches: BTreeMap::new(),
            config: self.config.clone(),
            tracer: new_tracer(self.config.trace),
            invalidated: BTreeSet::new(),
            input_variables: self.input_variables.clone(),
            spill,
            macro_cache,
        })
    }

    /// The branch called `name`, created from this simulation if needed
    ///
    /// A new branch sees the inputs stored here, computes its own values, and
    /// shares this simulation's tracer when tracing.
    pub fn get_branch(&mut self, name: &str) -> Result<&mut Simulation> {
        if name == self.branch_name {
            return Ok(self);
        }
        if !self.branches.contains_key(name) {
            let mut branch = self.duplicate()?;
            branch.ancestors.insert(0, self.branch_name.clone());
            branch.branch_name = name.to_string();
            if self.config.trace {
                branch.tracer = Arc::clone(&self.tracer);
            }
            self.branches.insert(name.to_string(), branch);
        }
        self.branches
            .get_mut(name)
            .ok_or_else(|| CalculationError::formula(name.to_string(), "branch could not be created"))
    }

    /// Rate of change of `target` when `wrt` moves by `delta`, per member of
    /// `target`'s entity
    pub fn derivative(&mut self, target: &str, wrt: &str, period: impl AsPeriod, delta: f64) -> Result<Vec<f64>> {
        if delta == 0.0 {
            return Err(CalculationError::formula(target.to_string(), "derivative step must be non-zero"));
        }
        let period = period.as_period()?;
        let mut shifted = self.duplicate()?;
        let computed: Vec<String> = self
            .tax_benefit_system
            .variables()
            .keys()
            .filter(|name| !self.input_variables.contains(*name))
            .cloned()
            .collect();
        for name in &computed {
            shifted.delete_arrays(name, None)?;
        }
        let bumped: Vec<f64> = self
            .calculate(wrt, period)?
            .to_f64()
            .into_iter()
            .map(|v| v + delta)
            .collect();
        shifted.set_input(wrt, period, Array::Float(bumped))?;
        let base = self.calculate(target, period)?.to_f64();
        let moved = shifted.calculate(target, period)?.to_f64();
        Ok(moved.iter().zip(&base).map(|(m, b)| (m - b) / delta).collect())
    }

    fn find_holder(&self, variable: &Variable) -> Option<&Holder> {
        self.populations
            .get(&variable.entity)
            .and_then(|p| p.holder(&variable.name))
    }

    fn holder_mut(&mut self, variable: &Arc<Variable>) -> Result<&mut Holder> {
        let spill = self.spill.clone();
        let population = self
            .populations
            .get_mut(&variable.entity)
            .ok_or_else(|| CalculationError::EntityNotFound(variable.entity.clone()))?;
        if population.holder(&variable.name).is_none() {
            let holder = Holder::new(Arc::clone(variable), population.count()).with_spill(spill);
            return Ok(population.insert_holder(&variable.name, holder));
        }
        population
            .holder_mut(&variable.name)
            .ok_or_else(|| CalculationError::formula(variable.name.clone(), "holder vanished"))
    }

    /// Branches whose stored values this simulation reads for `variable`
    ///
    /// Input variables fall back on the branches this one was taken from;
    /// computed variables only ever read their own branch.
    fn visible_branches(&self, variable: &Variable) -> Vec<&str> {
        let mut branches = vec![self.branch_name.as_str()];
        if variable.is_input_variable() {
            branches.extend(self.ancestors.iter().map(String::as_str));
        }
        branches
    }

    pub(crate) fn stored_value(&self, variable: &Variable, period: Period) -> Result<Option<Array>> {
        let Some(holder) = self.find_holder(variable) else {
            return Ok(None);
        };
        for branch in self.visible_branches(variable) {
            if let Some(array) = holder.get_array(period, branch)? {
                return Ok(Some(array));
            }
        }
        Ok(None)
    }

    pub(crate) fn stored_periods(&self, variable: &Variable) -> Vec<Period> {
        let Some(holder) = self.find_holder(variable) else {
            return Vec::new();
        };
        let mut periods: Vec<Period> = self
            .visible_branches(variable)
            .into_iter()
            .flat_map(|branch| holder.get_known_periods_in(branch))
            .collect();
        periods.sort_by_key(|p| (p.start(), p.unit().weight(), p.size()));
        periods.dedup();
        periods
    }

    /// Whether `variable` is switched off at `period`, by neutralization or by
    /// its `gov.abolitions` parameter
    pub(crate) fn is_neutralized(&self, variable: &Variable, period: Period) -> bool {
        if variable.is_neutralized {
            return true;
        }
        if variable.is_input_variable()
            || !variable.value_type.is_numeric()
            || self.tax_benefit_system.parameters().child("gov").is_none()
        {
            return false;
        }
        self.tax_benefit_system
            .get_parameters_at_instant(period.start())
            .flag(&format!("gov.abolitions.{}", variable.name))
            .unwrap_or(false)
    }

    /// Value a formula can read without calculating: neutralized defaults
    /// excepted, the stored value for `period`
    pub(crate) fn cached_value(&self, variable: &Variable, period: Period) -> Result<Option<Array>> {
        if self.is_neutralized(variable, period) {
            return Ok(None);
        }
        self.stored_value(variable, period)
    }
}

fn new_tracer(trace: bool) -> SharedTracer {
    if trace {
        tracers::shared(FullTracer::new())
    } else {
        tracers::shared(SimpleTracer::new())
    }
}

/// The macro cache directory of these populations, when one is configured
fn open_macro_cache(
    config: &SimulationConfig,
    system: &TaxBenefitSystem,
    populations: &BTreeMap<String, Population>,
) -> Result<Option<MacroCache>, StorageError> {
    let Some(dir) = &config.macro_cache_dir else {
        return Ok(None);
    };
    let scope = match &config.macro_cache_scope {
        Some(scope) => scope.clone(),
        None => population_scope(populations),
    };
    MacroCache::open(dir.join(scope), env!("CARGO_PKG_VERSION"), &system.country_version).map(Some)
}

/// Entity sizes and a hash of the member ids, like `2person_1household_<hash>`
fn population_scope(populations: &BTreeMap<String, Population>) -> String {
    let mut hasher = DefaultHasher::new();
    let mut sizes = Vec::with_capacity(populations.len());
    for (key, population) in populations {
        key.hash(&mut hasher);
        population.ids().hash(&mut hasher);
        sizes.push(format!("{}{}", population.count(), key));
    }
    format!("{}_{:016x}", sizes.join("_"), hasher.finish())
}

/// Spill settings with a storage directory of their own
fn spill_settings(config: &SimulationConfig) -> Result<Option<SpillSettings>, StorageError> {
    let Some(memory) = &config.memory_config else {
        return Ok(None);
    };
    memory.validate()?;
    let mut builder = tempfile::Builder::new();
    builder.prefix("microsim_");
    let dir = match &config.data_storage_dir {
        Some(base) => {
            fs::create_dir_all(base).map_err(|source| StorageError::Io {
                path: base.clone(),
                source,
            })?;
            builder.tempdir_in(base).map_err(|source| StorageError::Io {
                path: base.clone(),
                source,
            })?
        }
        None => builder.tempdir().map_err(|source| StorageError::Io {
            path: std::env::temp_dir(),
            source,
        })?,
    };
    Ok(Some(SpillSettings {
        config: Arc::new(memory.clone()),
        storage_dir: dir.keep(),
        meter: Arc::new(AtomicUsize::new(0)),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::ValueType;
    use crate::entities::{Entity, Role};
    use crate::parameters::ParameterNode;
    use crate::periods::{period, DateUnit};
    use crate::storage::MemoryConfig;
    use crate::system::ParameterReform;
    use crate::variables::{Formula, InputSplit};
    use approx::assert_relative_eq;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn variables() -> Vec<Variable> {
        let person = |name: &str, value_type, unit| Variable::new(name, "person", value_type, unit);
        vec![
            person("salary", ValueType::Float, DateUnit::Month).with_input_split(InputSplit::Divide),
            person("income", ValueType::Float, DateUnit::Year),
            person("savings", ValueType::Float, DateUnit::Month).stock(),
            person("is_adult", ValueType::Bool, DateUnit::Month),
            person("status_code", ValueType::Int, DateUnit::Month),
            person("old_allowance", ValueType::Float, DateUnit::Month)
                .with_end("2015-12-31")
                .unwrap(),
            Variable::new("rent", "household", ValueType::Float, DateUnit::Year).with_uprating("gov.index"),
            person("tax", ValueType::Float, DateUnit::Month).with_formula(Formula::simple(|ctx, period| {
                let salary = ctx.calculate("salary", period)?.to_f64();
                let rate = ctx.parameter("gov.rate", period.start())?;
                Ok(Array::Float(salary.iter().map(|s| s * rate).collect()))
            })),
            person("benefit", ValueType::Float, DateUnit::Month)
                .defined_for("is_adult")
                .with_formula(Formula::simple(|ctx, _| Ok(ctx.filled(100.0)))),
            person("net", ValueType::Float, DateUnit::Month)
                .with_adds(["salary"])
                .with_subtracts(["tax"]),
            person("balance", ValueType::Float, DateUnit::Year).with_formula(Formula::simple(|ctx, period| {
                let previous = ctx.calculate("balance", period.last_year())?.to_f64();
                Ok(Array::Float(previous.iter().map(|v| v + 1.0).collect()))
            })),
            person("cycle_a", ValueType::Float, DateUnit::Month)
                .with_formula(Formula::simple(|ctx, period| ctx.calculate("cycle_b", period))),
            person("cycle_b", ValueType::Float, DateUnit::Month)
                .with_formula(Formula::simple(|ctx, period| ctx.calculate("cycle_a", period))),
            person("level_1", ValueType::Float, DateUnit::Month)
                .with_formula(Formula::simple(|ctx, period| ctx.calculate("level_2", period))),
            person("level_2", ValueType::Float, DateUnit::Month)
                .with_formula(Formula::simple(|ctx, period| ctx.calculate("level_3", period))),
            person("level_3", ValueType::Float, DateUnit::Month),
        ]
    }

    fn system_with(extra: Vec<Variable>) -> TaxBenefitSystem {
        let entities = vec![
            Entity::person("person", "persons"),
            Entity::group(
                "household",
                "households",
                vec![Role::new("parent", Some("parents")), Role::new("child", Some("children"))],
            ),
        ];
        let parameters = ParameterNode::from_json(
            "",
            &json!({
                "gov": {
                    "rate": {"2015-01-01": 0.1},
                    "index": {"2019-01-01": 100.0, "2020-01-01": 110.0}
                }
            }),
        )
        .unwrap();
        let mut all = variables();
        all.extend(extra);
        TaxBenefitSystem::new(entities, parameters, all).unwrap()
    }

    fn simulation_of(system: TaxBenefitSystem, config: SimulationConfig) -> Simulation {
        SimulationBuilder::new(Arc::new(system))
            .with_config(config)
            .build_from_entities(&json!({"persons": {"ann": {}, "bob": {}}}))
            .unwrap()
    }

    fn simulation() -> Simulation {
        simulation_of(system_with(vec![]), SimulationConfig::default())
    }

    fn p(s: &str) -> Period {
        period(s).unwrap()
    }

    #[test]
    fn test_formula_runs_once_per_key() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let counted = Variable::new("counted", "person", ValueType::Float, DateUnit::Month).with_formula(
            Formula::simple(move |ctx, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ctx.filled(1.0))
            }),
        );
        let mut sim = simulation_of(system_with(vec![counted]), SimulationConfig::default());
        assert_eq!(sim.calculate("counted", "2020-01").unwrap(), Array::Float(vec![1.0, 1.0]));
        assert_eq!(sim.calculate("counted", "2020-01").unwrap(), Array::Float(vec![1.0, 1.0]));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        sim.calculate("counted", "2020-02").unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_formula_with_dependencies_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let summary = Variable::new("summary", "person", ValueType::Float, DateUnit::Month).with_formula(
            Formula::simple(move |ctx, period| {
                counter.fetch_add(1, Ordering::SeqCst);
                let tax = ctx.calculate("tax", period)?.to_f64();
                let net = ctx.calculate("net", period)?.to_f64();
                Ok(Array::Float(tax.iter().zip(&net).map(|(t, n)| t + n).collect()))
            }),
        );
        let mut sim = simulation_of(system_with(vec![summary]), SimulationConfig::default());
        sim.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        assert_eq!(sim.calculate("summary", "2020-01").unwrap(), Array::Float(vec![1000.0, 2000.0]));
        assert_eq!(sim.calculate("summary", "2020-01").unwrap(), Array::Float(vec![1000.0, 2000.0]));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_formulas_only_see_computed_dependencies() {
        let divisor = Variable::new("divisor", "person", ValueType::Int, DateUnit::Month)
            .with_formula(Formula::simple(|ctx, _| Ok(ctx.filled(2_i64))));
        let share = Variable::new("share", "person", ValueType::Int, DateUnit::Month).with_formula(Formula::simple(
            |ctx, period| match ctx.calculate("divisor", period)? {
                Array::Int(divisor) => Ok(Array::Int(divisor.iter().map(|d| 10 / d).collect())),
                other => Err(CalculationError::formula("share", format!("{:?}", other.value_type()))),
            },
        ));
        let mut sim = simulation_of(system_with(vec![divisor, share]), SimulationConfig::default());
        assert_eq!(sim.calculate("share", "2020-01").unwrap(), Array::Int(vec![5, 5]));
    }

    #[test]
    fn test_formula_reads_inputs_and_parameters() {
        let mut sim = simulation();
        sim.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        assert_eq!(sim.calculate("tax", "2020-01").unwrap(), Array::Float(vec![100.0, 200.0]));
        assert_eq!(sim.calculate("net", "2020-01").unwrap(), Array::Float(vec![900.0, 1800.0]));
        assert_eq!(
            sim.get_array("tax", "2020-01").unwrap(),
            Some(Array::Float(vec![100.0, 200.0]))
        );
    }

    #[test]
    fn test_cycle_is_an_error() {
        let mut sim = simulation();
        match sim.calculate("cycle_a", "2020-01") {
            Err(CalculationError::Cycle(message)) => {
                assert!(message.starts_with("Circular definition detected on formula cycle_a@2020-01"));
                assert!(message.contains(">> cycle_b@2020-01 (branch default)"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(sim.get_known_periods("cycle_b").unwrap().is_empty());
    }

    #[test]
    fn test_spiral_defaults_and_is_not_cached() {
        let mut sim = simulation();
        let outcome = sim.calculate_outcome("balance", 2020).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.into_array(), Array::Float(vec![1.0, 1.0]));
        assert!(sim.get_array("balance", 2020).unwrap().is_none());
        assert!(sim.get_array("balance", 2019).unwrap().is_none());
    }

    #[test]
    fn test_spiral_tolerates_loops_up_to_the_bound() {
        let config = SimulationConfig::default().with_max_spiral_loops(3);
        let mut sim = simulation_of(system_with(vec![]), config);
        // 2017 is the fourth balance on the stack and defaults to zero
        assert_eq!(sim.calculate("balance", 2020).unwrap(), Array::Float(vec![3.0, 3.0]));
        assert!(sim.get_known_periods("balance").unwrap().is_empty());
    }

    #[test]
    fn test_stack_depth_limit() {
        let config = SimulationConfig::default().with_max_stack_depth(2);
        let mut sim = simulation_of(system_with(vec![]), config);
        match sim.calculate("level_1", "2020-01") {
            Err(CalculationError::StackOverflow { depth, stack }) => {
                assert_eq!(depth, 2);
                assert!(stack.contains("level_2@2020-01"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let mut deep = simulation();
        assert_eq!(deep.calculate("level_1", "2020-01").unwrap(), Array::Float(vec![0.0, 0.0]));
    }

    #[test]
    fn test_add_and_divide() {
        let mut sim = simulation();
        sim.set_input("salary", 2020, vec![120.0, 240.0]).unwrap();
        assert_eq!(sim.calculate("salary", "2020-04").unwrap(), Array::Float(vec![10.0, 20.0]));
        assert_eq!(sim.calculate_add("salary", 2020).unwrap(), Array::Float(vec![120.0, 240.0]));
        assert_eq!(sim.calculate("salary", 2020).unwrap(), Array::Float(vec![120.0, 240.0]));

        sim.set_input("income", 2020, vec![120.0, 0.0]).unwrap();
        assert_eq!(sim.calculate_divide("income", "2020-03").unwrap(), Array::Float(vec![10.0, 0.0]));
        assert!(sim.calculate_divide("salary", 2020).is_err());
    }

    #[test]
    fn test_stock_at_year_reads_december() {
        let mut sim = simulation();
        sim.set_input("savings", "2020-12", vec![500.0, 50.0]).unwrap();
        assert_eq!(sim.calculate("savings", 2020).unwrap(), Array::Float(vec![500.0, 50.0]));
    }

    #[test]
    fn test_delete_arrays_is_idempotent() {
        let mut sim = simulation();
        sim.set_input("salary", "2020-01", vec![1.0, 2.0]).unwrap();
        sim.set_input("salary", "2020-02", vec![1.0, 2.0]).unwrap();
        sim.delete_arrays("salary", Some(p("2020-01"))).unwrap();
        sim.delete_arrays("salary", Some(p("2020-01"))).unwrap();
        assert_eq!(sim.get_known_periods("salary").unwrap(), vec![p("2020-02")]);
        sim.delete_arrays("salary", None).unwrap();
        sim.delete_arrays("salary", None).unwrap();
        assert!(sim.get_known_periods("salary").unwrap().is_empty());
    }

    #[test]
    fn test_set_input_after_end_is_ignored() {
        let mut sim = simulation();
        sim.set_input("old_allowance", "2016-01", vec![1.0, 1.0]).unwrap();
        assert!(sim.get_known_periods("old_allowance").unwrap().is_empty());
        sim.set_input("old_allowance", "2015-06", vec![1.0, 1.0]).unwrap();
        assert_eq!(sim.get_known_periods("old_allowance").unwrap(), vec![p("2015-06")]);
    }

    #[test]
    fn test_neutralized_variable() {
        let mut system = system_with(vec![]);
        system.neutralize_variable("tax").unwrap();
        let mut sim = simulation_of(system, SimulationConfig::default());
        sim.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        sim.set_input("tax", "2020-01", vec![5.0, 5.0]).unwrap();
        let outcome = sim.calculate_outcome("tax", "2020-01").unwrap();
        assert!(matches!(outcome, CalculationOutcome::Neutralized(_)));
        assert_eq!(outcome.into_array(), Array::Float(vec![0.0, 0.0]));
        assert!(sim.get_known_periods("tax").unwrap().is_empty());
    }

    #[test]
    fn test_abolition_switch() {
        let reform = ParameterReform::new("abolish_tax")
            .set("gov.abolitions.tax", "2020", true)
            .unwrap();
        let system = system_with(vec![]).apply_reform(&reform).unwrap();
        let mut sim = simulation_of(system, SimulationConfig::default());
        sim.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        sim.set_input("salary", "2019-12", vec![1000.0, 2000.0]).unwrap();
        assert!(matches!(
            sim.calculate_outcome("tax", "2020-01").unwrap(),
            CalculationOutcome::Neutralized(_)
        ));
        assert_eq!(sim.calculate("tax", "2019-12").unwrap(), Array::Float(vec![100.0, 200.0]));
    }

    #[test]
    fn test_defined_for_masks_members() {
        let mut sim = simulation();
        assert_eq!(sim.calculate("benefit", "2020-01").unwrap(), Array::Float(vec![0.0, 0.0]));
        sim.set_input("is_adult", "2020-02", vec![true, false]).unwrap();
        assert_eq!(sim.calculate("benefit", "2020-02").unwrap(), Array::Float(vec![100.0, 0.0]));
    }

    #[test]
    fn test_carry_over_never_goes_backward() {
        let system = system_with(vec![]).with_auto_carry_over(true);
        let mut sim = simulation_of(system, SimulationConfig::default());
        sim.set_input("status_code", "2020-03", vec![5_i64, 7]).unwrap();
        assert_eq!(sim.calculate("status_code", "2020-06").unwrap(), Array::Int(vec![5, 7]));
        assert_eq!(sim.calculate("status_code", "2020-01").unwrap(), Array::Int(vec![0, 0]));
    }

    #[test]
    fn test_uprating_from_latest_known_value() {
        let mut sim = simulation();
        sim.set_input("rent", 2019, vec![1000.0]).unwrap();
        let rent = sim.calculate("rent", 2020).unwrap().to_f64();
        assert_relative_eq!(rent[0], 1100.0, epsilon = 1e-9);
        assert_eq!(sim.calculate("rent", 2018).unwrap(), Array::Float(vec![0.0]));
        assert!(sim.get_array("rent", 2020).unwrap().is_none());
    }

    #[test]
    fn test_branches_keep_their_own_values() {
        let mut sim = simulation();
        sim.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        assert_eq!(sim.calculate("tax", "2020-01").unwrap(), Array::Float(vec![100.0, 200.0]));

        let reform = sim.get_branch("reform").unwrap();
        assert_eq!(reform.parent_branch(), Some(DEFAULT_BRANCH));
        reform.set_input("salary", "2020-01", vec![0.0, 0.0]).unwrap();
        assert_eq!(reform.calculate("tax", "2020-01").unwrap(), Array::Float(vec![0.0, 0.0]));

        let copy = sim.get_branch("copy").unwrap();
        assert_eq!(copy.calculate("tax", "2020-01").unwrap(), Array::Float(vec![100.0, 200.0]));

        assert_eq!(sim.calculate("tax", "2020-01").unwrap(), Array::Float(vec![100.0, 200.0]));
        assert_eq!(sim.get_branch(DEFAULT_BRANCH).unwrap().branch_name(), DEFAULT_BRANCH);
    }

    #[test]
    fn test_derivative() {
        let mut sim = simulation();
        sim.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        let slope = sim.derivative("tax", "salary", "2020-01", 1.0).unwrap();
        assert_relative_eq!(slope[0], 0.1, epsilon = 1e-9);
        assert_relative_eq!(slope[1], 0.1, epsilon = 1e-9);
        assert_eq!(sim.calculate("salary", "2020-01").unwrap(), Array::Float(vec![1000.0, 2000.0]));
        assert!(sim.derivative("tax", "salary", "2020-01", 0.0).is_err());
    }

    #[test]
    fn test_trace_records_dependencies() {
        let mut sim = simulation_of(system_with(vec![]), SimulationConfig::traced());
        sim.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        sim.calculate("tax", "2020-01").unwrap();
        {
            let tracer = tracers::lock(sim.tracer());
            let full = tracer.as_full().unwrap();
            let trace = full.get_flat_trace();
            let tax = &trace["tax<2020-01, (default)>"];
            assert_eq!(tax.dependencies, vec!["salary<2020-01, (default)>".to_string()]);
            assert_eq!(tax.parameters["gov.rate<2020-01-01>"], json!(0.1));
            assert_eq!(tax.value, Some(json!([100.0, 200.0])));
        }

        sim.calculate("tax", "2020-01").unwrap();
        let tracer = tracers::lock(sim.tracer());
        let full = tracer.as_full().unwrap();
        assert_eq!(full.trees().len(), 2);
        assert_eq!(full.get_nb_requests("tax"), 2);
        assert_eq!(full.get_nb_requests("salary"), 1);
    }

    #[test]
    fn test_macro_cache_serves_other_simulations() {
        let dir = tempfile::tempdir().unwrap();
        let config = SimulationConfig::default().with_macro_cache_dir(dir.path());
        let mut first = simulation_of(system_with(vec![]), config.clone());
        first.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        first.calculate("tax", "2020-01").unwrap();

        let mut second = simulation_of(system_with(vec![]), config);
        second.set_input("salary", "2020-01", vec![0.0, 0.0]).unwrap();
        assert_eq!(second.calculate("tax", "2020-01").unwrap(), Array::Float(vec![100.0, 200.0]));
        assert_eq!(second.calculate("salary", "2020-01").unwrap(), Array::Float(vec![0.0, 0.0]));
    }

    fn trio(config: SimulationConfig) -> Simulation {
        SimulationBuilder::new(Arc::new(system_with(vec![])))
            .with_config(config)
            .build_from_entities(&json!({"persons": {"ann": {}, "bob": {}, "cid": {}}}))
            .unwrap()
    }

    #[test]
    fn test_macro_cache_is_kept_per_population() {
        let dir = tempfile::tempdir().unwrap();
        let config = SimulationConfig::default().with_macro_cache_dir(dir.path());
        let mut pair = simulation_of(system_with(vec![]), config.clone());
        pair.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        pair.calculate("tax", "2020-01").unwrap();

        let mut three = trio(config.clone());
        three.set_input("salary", "2020-01", vec![10.0, 20.0, 30.0]).unwrap();
        let tax = three.calculate("tax", "2020-01").unwrap().to_f64();
        assert_eq!(tax.len(), 3);
        assert_relative_eq!(tax[2], 3.0, epsilon = 1e-9);

        // one scope for both populations: lengths still have to match
        let shared = config.with_macro_cache_scope("survey");
        let mut pair = simulation_of(system_with(vec![]), shared.clone());
        pair.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        pair.calculate("tax", "2020-01").unwrap();
        assert!(dir.path().join("survey").join("tax_2020-01_default.json").exists());

        let mut three = trio(shared);
        three.set_input("salary", "2020-01", vec![10.0, 20.0, 30.0]).unwrap();
        let tax = three.calculate("tax", "2020-01").unwrap().to_f64();
        assert_eq!(tax.len(), 3);
        assert_relative_eq!(tax[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_spilled_values_stay_readable() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryConfig::new(1.0, vec![], vec![]).unwrap().with_budget(8);
        let config = SimulationConfig::default()
            .with_memory_config(memory)
            .with_data_storage_dir(dir.path());
        let mut sim = simulation_of(system_with(vec![]), config);
        sim.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        assert_eq!(sim.calculate("tax", "2020-01").unwrap(), Array::Float(vec![100.0, 200.0]));
        let usage = sim.get_memory_usage(None);
        assert_eq!(usage.by_variable["salary"].nb_arrays_on_disk, 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_dataframe_and_default_period() {
        let config = SimulationConfig::default().with_default_calculation_period(p("2020-01"));
        let mut sim = simulation_of(system_with(vec![]), config);
        sim.set_input("salary", "2020-01", vec![1000.0, 2000.0]).unwrap();
        assert_eq!(sim.calculate_default("tax").unwrap(), Array::Float(vec![100.0, 200.0]));
        let frame = sim.calculate_dataframe(&["salary", "tax"], "2020-01").unwrap();
        assert_eq!(frame.index(), &["ann", "bob"]);
        assert_eq!(frame.column("tax"), Some(&[100.0, 200.0][..]));
        let households = sim.calculate_for("tax", "2020-01", "household").unwrap();
        assert_eq!(households, Array::Float(vec![300.0]));
    }

    #[test]
    fn test_unknown_variable_suggests_names() {
        let mut sim = simulation();
        let err = sim.calculate("taxx", "2020-01").unwrap_err();
        assert!(matches!(err, CalculationError::VariableNotFound { .. }));
        assert!(err.to_string().contains("Did you mean"));
    }
}
