//! Tax-benefit systems and reforms
//!
//! A [`TaxBenefitSystem`] is the registry a simulation calculates against.
//! Reforms never mutate a system in place: [`TaxBenefitSystem::apply_reform`]
//! returns a new system whose parameter tree shares every untouched subtree
//! with the baseline.

mod reform;
mod tax_benefit_system;

pub use reform::{
    default_formula, splice_formula, ParameterChange, ParameterReform, Reform, StructuralReform, StructuralStep,
    DEFAULT_REFORM_PERIOD,
};
pub use tax_benefit_system::TaxBenefitSystem;
