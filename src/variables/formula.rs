//! Formula callables

use std::fmt;
use std::sync::Arc;

use crate::arrays::Array;
use crate::errors::Result;
use crate::periods::Period;
use crate::simulation::{FormulaContext, ParametersAt};

type SimpleFn = dyn Fn(&mut FormulaContext<'_>, Period) -> Result<Array> + Send + Sync;
type WithParametersFn =
    dyn Fn(&mut FormulaContext<'_>, Period, &ParametersAt<'_>) -> Result<Array> + Send + Sync;

/// A variable formula, taking either `(ctx, period)` or `(ctx, period, parameters)`
#[derive(Clone)]
pub enum Formula {
    Simple(Arc<SimpleFn>),
    WithParameters(Arc<WithParametersFn>),
}

impl Formula {
    pub fn simple<F>(f: F) -> Self
    where
        F: Fn(&mut FormulaContext<'_>, Period) -> Result<Array> + Send + Sync + 'static,
    {
        Formula::Simple(Arc::new(f))
    }

    pub fn with_parameters<F>(f: F) -> Self
    where
        F: Fn(&mut FormulaContext<'_>, Period, &ParametersAt<'_>) -> Result<Array> + Send + Sync + 'static,
    {
        Formula::WithParameters(Arc::new(f))
    }

    pub fn arity(&self) -> usize {
        match self {
            Formula::Simple(_) => 2,
            Formula::WithParameters(_) => 3,
        }
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Formula(arity {})", self.arity())
    }
}
