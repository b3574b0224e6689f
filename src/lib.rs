//! Microsim Engine - Calculation engine for tax and benefit micro-simulation
//!
//! This library provides:
//! - Calendar periods and instants with ADD/DIVIDE conversions
//! - Time-varying legislative parameters, scales and uprating
//! - Variables with dated formulas, component sums and defaults
//! - Simulations over person and group populations with memoized values
//! - Reforms, branches, tracing and spill-to-disk storage
//! - A small country template used by the binaries

pub mod arrays;
pub mod country_template;
pub mod entities;
pub mod errors;
pub mod parameters;
pub mod periods;
pub mod simulation;
pub mod storage;
pub mod system;
pub mod tracers;
pub mod variables;

// Re-export commonly used types
pub use arrays::{Array, Scalar, ValueType};
pub use errors::{CalculationError, Result};
pub use periods::{instant, period, DateUnit, Instant, Period};
pub use simulation::{Simulation, SimulationBuilder, SimulationConfig};
pub use system::{Reform, TaxBenefitSystem};
pub use variables::{Formula, Variable};
