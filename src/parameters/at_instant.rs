//! Read-only snapshots of the parameter tree at one instant

use std::collections::BTreeMap;
use std::sync::Arc;

use super::parameter::ParameterValue;
use crate::errors::ParameterError;
use crate::periods::Instant;

/// Resolved child of a snapshot node
#[derive(Debug, Clone)]
pub enum AtInstantValue {
    Value(Option<ParameterValue>),
    Node(Arc<ParameterNodeAtInstant>),
    Scale(Arc<ScaleAtInstant>),
}

/// A parameter node with every descendant resolved at `instant`
#[derive(Debug, Clone)]
pub struct ParameterNodeAtInstant {
    pub name: String,
    pub instant: Instant,
    children: BTreeMap<String, AtInstantValue>,
}

impl ParameterNodeAtInstant {
    pub(crate) fn new(name: String, instant: Instant, children: BTreeMap<String, AtInstantValue>) -> Self {
        Self {
            name,
            instant,
            children,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn child(&self, key: &str) -> Result<&AtInstantValue, ParameterError> {
        self.children.get(key).ok_or_else(|| ParameterError::NotFound {
            name: key.to_string(),
            path: self.full_name(key),
            suggestions: self
                .children
                .keys()
                .filter(|k| k.to_lowercase().contains(&key.to_lowercase()))
                .cloned()
                .collect(),
        })
    }

    fn full_name(&self, key: &str) -> String {
        if self.name.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.name, key)
        }
    }

    /// Follow a dotted path
    pub fn get(&self, path: &str) -> Result<&AtInstantValue, ParameterError> {
        let mut parts = path.split('.');
        let first = parts.next().unwrap_or_default();
        let mut current = self.child(first)?;
        for part in parts {
            current = match current {
                AtInstantValue::Node(node) => node.child(part)?,
                _ => {
                    return Err(ParameterError::NotFound {
                        name: part.to_string(),
                        path: path.to_string(),
                        suggestions: vec![],
                    })
                }
            };
        }
        Ok(current)
    }

    pub fn node(&self, path: &str) -> Result<&ParameterNodeAtInstant, ParameterError> {
        match self.get(path)? {
            AtInstantValue::Node(node) => Ok(node),
            _ => Err(ParameterError::Parsing {
                name: path.to_string(),
                message: "is not a parameter node".to_string(),
            }),
        }
    }

    pub fn scale(&self, path: &str) -> Result<&ScaleAtInstant, ParameterError> {
        match self.get(path)? {
            AtInstantValue::Scale(scale) => Ok(scale),
            _ => Err(ParameterError::Parsing {
                name: path.to_string(),
                message: "is not a scale".to_string(),
            }),
        }
    }

    /// Numeric leaf value
    pub fn value(&self, path: &str) -> Result<f64, ParameterError> {
        let resolved = match self.get(path)? {
            AtInstantValue::Value(Some(value)) => value.as_f64(),
            _ => None,
        };
        resolved.ok_or_else(|| ParameterError::NotANumber {
            name: self.full_name(path),
            instant: self.instant.to_string(),
        })
    }

    /// Boolean leaf value
    pub fn flag(&self, path: &str) -> Result<bool, ParameterError> {
        let resolved = match self.get(path)? {
            AtInstantValue::Value(Some(value)) => value.as_bool(),
            _ => None,
        };
        resolved.ok_or_else(|| ParameterError::NotANumber {
            name: self.full_name(path),
            instant: self.instant.to_string(),
        })
    }

    /// The snapshot as nested JSON; scales become lists of brackets
    pub fn to_json(&self) -> serde_json::Value {
        let children = self
            .children
            .iter()
            .map(|(key, child)| {
                let value = match child {
                    AtInstantValue::Value(None) => serde_json::Value::Null,
                    AtInstantValue::Value(Some(ParameterValue::Bool(b))) => serde_json::json!(b),
                    AtInstantValue::Value(Some(ParameterValue::Number(n))) => serde_json::json!(n),
                    AtInstantValue::Value(Some(ParameterValue::Text(t))) => serde_json::json!(t),
                    AtInstantValue::Node(node) => node.to_json(),
                    AtInstantValue::Scale(scale) => scale.to_json(),
                };
                (key.clone(), value)
            })
            .collect();
        serde_json::Value::Object(children)
    }

    /// Fancy indexing: pick the child named by each key
    pub fn index_by<S: AsRef<str>>(&self, keys: &[S]) -> Result<VectorialValue, ParameterError> {
        let picked = keys
            .iter()
            .map(|key| self.child(key.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        VectorialValue::from_children(&self.name, picked)
    }
}

/// Result of vectorial indexing
#[derive(Debug, Clone)]
pub enum VectorialValue {
    Numbers(Vec<f64>),
    Nodes(VectorialNodeAtInstant),
}

impl VectorialValue {
    fn from_children(name: &str, children: Vec<&AtInstantValue>) -> Result<Self, ParameterError> {
        if !children.is_empty() && children.iter().all(|c| matches!(c, AtInstantValue::Node(_))) {
            let rows = children
                .into_iter()
                .filter_map(|c| match c {
                    AtInstantValue::Node(node) => Some(Arc::clone(node)),
                    _ => None,
                })
                .collect();
            return Ok(VectorialValue::Nodes(VectorialNodeAtInstant {
                name: name.to_string(),
                rows,
            }));
        }
        children
            .into_iter()
            .map(|c| match c {
                AtInstantValue::Value(Some(value)) => value.as_f64(),
                _ => None,
            })
            .collect::<Option<Vec<f64>>>()
            .map(VectorialValue::Numbers)
            .ok_or_else(|| ParameterError::Parsing {
                name: name.to_string(),
                message: "vectorial indexing requires children that are all numbers or all nodes"
                    .to_string(),
            })
    }

    pub fn into_numbers(self) -> Result<Vec<f64>, ParameterError> {
        match self {
            VectorialValue::Numbers(values) => Ok(values),
            VectorialValue::Nodes(node) => Err(ParameterError::Parsing {
                name: node.name,
                message: "expected numeric values, got parameter nodes".to_string(),
            }),
        }
    }

    pub fn into_nodes(self) -> Result<VectorialNodeAtInstant, ParameterError> {
        match self {
            VectorialValue::Nodes(node) => Ok(node),
            VectorialValue::Numbers(_) => Err(ParameterError::Parsing {
                name: String::new(),
                message: "expected parameter nodes, got numeric values".to_string(),
            }),
        }
    }
}

/// One snapshot node per population member
#[derive(Debug, Clone)]
pub struct VectorialNodeAtInstant {
    pub name: String,
    rows: Vec<Arc<ParameterNodeAtInstant>>,
}

impl VectorialNodeAtInstant {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Same child in every row
    pub fn get(&self, key: &str) -> Result<VectorialValue, ParameterError> {
        let picked = self
            .rows
            .iter()
            .map(|row| row.child(key))
            .collect::<Result<Vec<_>, _>>()?;
        VectorialValue::from_children(&format!("{}.{}", self.name, key), picked)
    }

    /// A different child per row
    pub fn index_by<S: AsRef<str>>(&self, keys: &[S]) -> Result<VectorialValue, ParameterError> {
        let picked = self
            .rows
            .iter()
            .zip(keys)
            .map(|(row, key)| row.child(key.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        VectorialValue::from_children(&self.name, picked)
    }
}

/// Bracket values at one instant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BracketAtInstant {
    pub threshold: Option<f64>,
    pub rate: Option<f64>,
    pub amount: Option<f64>,
    pub average_rate: Option<f64>,
    pub base: Option<f64>,
}

/// A progressive schedule at one instant
#[derive(Debug, Clone)]
pub struct ScaleAtInstant {
    pub name: String,
    pub brackets: Vec<BracketAtInstant>,
}

impl ScaleAtInstant {
    pub fn to_json(&self) -> serde_json::Value {
        self.brackets
            .iter()
            .map(|b| {
                serde_json::json!({
                    "threshold": b.threshold,
                    "rate": b.rate,
                    "amount": b.amount,
                })
            })
            .collect()
    }

    fn thresholds(&self) -> Vec<f64> {
        self.brackets
            .iter()
            .map(|b| b.threshold.unwrap_or(0.0))
            .collect()
    }

    /// Marginal-rate tax owed on each base amount
    pub fn calc(&self, base: &[f64]) -> Vec<f64> {
        let thresholds = self.thresholds();
        base.iter()
            .map(|&amount| {
                self.brackets
                    .iter()
                    .enumerate()
                    .map(|(i, bracket)| {
                        let lower = thresholds[i];
                        let upper = thresholds.get(i + 1).copied().unwrap_or(f64::INFINITY);
                        let taxable = (amount.min(upper) - lower).max(0.0);
                        taxable * bracket.rate.unwrap_or(0.0)
                    })
                    .sum()
            })
            .collect()
    }

    /// Index of the bracket each amount falls in
    pub fn bracket_indices(&self, base: &[f64]) -> Vec<usize> {
        let thresholds = self.thresholds();
        base.iter()
            .map(|&amount| {
                thresholds
                    .iter()
                    .filter(|&&t| t <= amount)
                    .count()
                    .saturating_sub(1)
            })
            .collect()
    }

    /// Rate of the bracket each amount falls in
    pub fn marginal_rates(&self, base: &[f64]) -> Vec<f64> {
        self.bracket_indices(base)
            .into_iter()
            .map(|i| self.brackets.get(i).and_then(|b| b.rate).unwrap_or(0.0))
            .collect()
    }

    /// Single-amount schedule: the amount of the bracket each value falls in
    pub fn amounts(&self, base: &[f64]) -> Vec<f64> {
        self.bracket_indices(base)
            .into_iter()
            .map(|i| self.brackets.get(i).and_then(|b| b.amount).unwrap_or(0.0))
            .collect()
    }
}
