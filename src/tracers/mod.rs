//! Calculation tracers
//!
//! The engine reports every request to a [`Tracer`]. [`SimpleTracer`] only
//! keeps the stack of in-flight requests; [`FullTracer`] also builds the
//! computation tree with values, parameter accesses and timings.

mod full;
mod simple;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::arrays::Array;
use crate::periods::Period;

pub use full::{FlatTraceEntry, FullTracer, ParameterAccess, PerformanceStats, TraceNode};
pub use simple::SimpleTracer;

/// One in-flight request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StackFrame {
    pub name: String,
    pub period: Period,
    pub branch: String,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} (branch {})", self.name, self.period, self.branch)
    }
}

/// Receiver of calculation events
pub trait Tracer: Send + fmt::Debug {
    fn record_calculation_start(&mut self, variable: &str, period: Period, branch: &str);

    fn record_calculation_result(&mut self, value: &Array);

    fn record_parameter_access(&mut self, parameter: &str, period: Period, value: serde_json::Value);

    fn record_calculation_end(&mut self);

    fn stack(&self) -> &[StackFrame];

    /// Downcast used to reach the computation tree
    fn as_full(&self) -> Option<&FullTracer> {
        None
    }

    /// Start, result and end in one go, for values served from a cache
    fn record_cached(&mut self, variable: &str, period: Period, branch: &str, value: &Array) {
        self.record_calculation_start(variable, period, branch);
        self.record_calculation_result(value);
        self.record_calculation_end();
    }
}

/// Tracer shared between a simulation and its branches
pub type SharedTracer = Arc<Mutex<dyn Tracer>>;

pub fn shared(tracer: impl Tracer + 'static) -> SharedTracer {
    Arc::new(Mutex::new(tracer))
}

/// Lock a shared tracer, recovering from a poisoned lock
pub fn lock(tracer: &SharedTracer) -> MutexGuard<'_, dyn Tracer + 'static> {
    tracer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
