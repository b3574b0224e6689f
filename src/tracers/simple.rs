use super::{StackFrame, Tracer};
use crate::arrays::Array;
use crate::periods::Period;

/// Keeps the stack of in-flight requests and nothing else
#[derive(Debug, Default)]
pub struct SimpleTracer {
    stack: Vec<StackFrame>,
}

impl SimpleTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracer for SimpleTracer {
    fn record_calculation_start(&mut self, variable: &str, period: Period, branch: &str) {
        self.stack.push(StackFrame {
            name: variable.to_string(),
            period,
            branch: branch.to_string(),
        });
    }

    fn record_calculation_result(&mut self, _value: &Array) {}

    fn record_parameter_access(&mut self, _parameter: &str, _period: Period, _value: serde_json::Value) {}

    fn record_calculation_end(&mut self) {
        self.stack.pop();
    }

    fn stack(&self) -> &[StackFrame] {
        &self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periods::period;

    #[test]
    fn test_stack_push_pop() {
        let mut tracer = SimpleTracer::new();
        let p = period("2018").unwrap();
        tracer.record_calculation_start("a", p, "default");
        tracer.record_calculation_start("b", p, "default");
        assert_eq!(tracer.stack().len(), 2);
        assert_eq!(tracer.stack()[1].to_string(), "b@2018 (branch default)");
        tracer.record_calculation_end();
        tracer.record_calculation_end();
        assert!(tracer.stack().is_empty());
        assert!(tracer.as_full().is_none());
    }
}
