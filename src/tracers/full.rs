//! Full computation tree with values, parameter accesses and timings

use std::collections::BTreeMap;
use std::time::{Duration, Instant as Clock};

use serde::Serialize;

use super::{StackFrame, Tracer};
use crate::arrays::Array;
use crate::periods::Period;

/// A parameter read made by a formula
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterAccess {
    pub name: String,
    pub period: Period,
    pub value: serde_json::Value,
}

/// One request in the computation tree
#[derive(Debug, Clone)]
pub struct TraceNode {
    pub name: String,
    pub period: Period,
    pub branch: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub parameters: Vec<ParameterAccess>,
    pub value: Option<Array>,
    pub start: Clock,
    pub end: Option<Clock>,
}

impl TraceNode {
    pub fn key(&self) -> String {
        format!("{}<{}, ({})>", self.name, self.period, self.branch)
    }

    pub fn calculation_time(&self) -> Duration {
        self.end.map_or(Duration::ZERO, |end| end.duration_since(self.start))
    }
}

/// Entry of the flat trace, keyed by `name<period, (branch)>`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatTraceEntry {
    pub dependencies: Vec<String>,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub value: Option<serde_json::Value>,
    /// Seconds spent on the request, children included
    pub calculation_time: f64,
    /// Seconds spent in the request itself
    pub formula_time: f64,
}

/// Per-variable timing summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub calls: usize,
    pub total_time: f64,
    pub formula_time: f64,
}

/// Arena of [`TraceNode`]s forming one tree per top-level request
#[derive(Debug, Default)]
pub struct FullTracer {
    nodes: Vec<TraceNode>,
    roots: Vec<usize>,
    open: Vec<usize>,
    stack: Vec<StackFrame>,
}

impl FullTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[TraceNode] {
        &self.nodes
    }

    /// Root nodes of every top-level request, oldest first
    pub fn trees(&self) -> Vec<&TraceNode> {
        self.roots.iter().map(|&i| &self.nodes[i]).collect()
    }

    pub fn children(&self, node: &TraceNode) -> Vec<&TraceNode> {
        node.children.iter().map(|&i| &self.nodes[i]).collect()
    }

    pub fn get_nb_requests(&self, variable: &str) -> usize {
        self.nodes.iter().filter(|n| n.name == variable).count()
    }

    fn formula_time(&self, node: &TraceNode) -> Duration {
        let children: Duration = node
            .children
            .iter()
            .map(|&c| self.nodes[c].calculation_time())
            .sum();
        node.calculation_time().saturating_sub(children)
    }

    /// Every traced request, keyed by `name<period, (branch)>`
    ///
    /// A request traced more than once keeps its latest entry.
    pub fn get_flat_trace(&self) -> BTreeMap<String, FlatTraceEntry> {
        self.nodes
            .iter()
            .map(|node| {
                let entry = FlatTraceEntry {
                    dependencies: node.children.iter().map(|&c| self.nodes[c].key()).collect(),
                    parameters: node
                        .parameters
                        .iter()
                        .map(|p| (format!("{}<{}>", p.name, p.period), p.value.clone()))
                        .collect(),
                    value: node.value.as_ref().map(Array::to_json),
                    calculation_time: node.calculation_time().as_secs_f64(),
                    formula_time: self.formula_time(node).as_secs_f64(),
                };
                (node.key(), entry)
            })
            .collect()
    }

    pub fn get_serialized_flat_trace(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.get_flat_trace())
    }

    /// Indented `name<period, (branch)> = value` lines, depth first
    ///
    /// With `aggregate`, numeric values are summarized as avg/max/min.
    pub fn computation_log(&self, aggregate: bool) -> Vec<String> {
        let mut lines = Vec::new();
        for &root in &self.roots {
            self.log_node(root, 0, aggregate, &mut lines);
        }
        lines
    }

    fn log_node(&self, index: usize, depth: usize, aggregate: bool, lines: &mut Vec<String>) {
        let node = &self.nodes[index];
        let value = match &node.value {
            None => "None".to_string(),
            Some(array) if aggregate && array.value_type() != crate::arrays::ValueType::Str => {
                let values = array.to_f64();
                if values.is_empty() {
                    "{'avg': nan, 'max': nan, 'min': nan}".to_string()
                } else {
                    let avg = values.iter().sum::<f64>() / values.len() as f64;
                    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
                    format!("{{'avg': {}, 'max': {}, 'min': {}}}", avg, max, min)
                }
            }
            Some(array) => array.to_json().to_string(),
        };
        lines.push(format!("{}{} = {}", "  ".repeat(depth), node.key(), value));
        for &child in &node.children {
            self.log_node(child, depth + 1, aggregate, lines);
        }
    }

    pub fn print_computation_log(&self, aggregate: bool) {
        for line in self.computation_log(aggregate) {
            log::info!("{}", line);
        }
    }

    /// Call count and time per variable
    pub fn performance_log(&self) -> BTreeMap<String, PerformanceStats> {
        let mut stats: BTreeMap<String, PerformanceStats> = BTreeMap::new();
        for node in &self.nodes {
            let entry = stats.entry(node.name.clone()).or_default();
            entry.calls += 1;
            entry.total_time += node.calculation_time().as_secs_f64();
            entry.formula_time += self.formula_time(node).as_secs_f64();
        }
        stats
    }
}

impl Tracer for FullTracer {
    fn record_calculation_start(&mut self, variable: &str, period: Period, branch: &str) {
        let index = self.nodes.len();
        let parent = self.open.last().copied();
        self.nodes.push(TraceNode {
            name: variable.to_string(),
            period,
            branch: branch.to_string(),
            parent,
            children: Vec::new(),
            parameters: Vec::new(),
            value: None,
            start: Clock::now(),
            end: None,
        });
        match parent {
            Some(p) => self.nodes[p].children.push(index),
            None => self.roots.push(index),
        }
        self.open.push(index);
        self.stack.push(StackFrame {
            name: variable.to_string(),
            period,
            branch: branch.to_string(),
        });
    }

    fn record_calculation_result(&mut self, value: &Array) {
        if let Some(&current) = self.open.last() {
            self.nodes[current].value = Some(value.clone());
        }
    }

    fn record_parameter_access(&mut self, parameter: &str, period: Period, value: serde_json::Value) {
        if let Some(&current) = self.open.last() {
            self.nodes[current].parameters.push(ParameterAccess {
                name: parameter.to_string(),
                period,
                value,
            });
        }
    }

    fn record_calculation_end(&mut self) {
        if let Some(current) = self.open.pop() {
            self.nodes[current].end = Some(Clock::now());
        }
        self.stack.pop();
    }

    fn stack(&self) -> &[StackFrame] {
        &self.stack
    }

    fn as_full(&self) -> Option<&FullTracer> {
        Some(self)
    }
}
