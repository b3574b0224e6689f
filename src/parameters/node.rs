//! Parameter tree: nodes, scales and brackets
//!
//! Children are reference counted so cloning a tree shares every subtree.
//! Mutation goes through `Arc::make_mut`, copying only the path being changed.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::at_instant::{AtInstantValue, BracketAtInstant, ParameterNodeAtInstant, ScaleAtInstant};
use super::parameter::Parameter;
use crate::errors::ParameterError;
use crate::periods::{parse_instant, Instant};

/// Keys a scale bracket may define
pub const BRACKET_KEYS: [&str; 5] = ["amount", "threshold", "rate", "average_rate", "base"];

const RESERVED_NODE_KEYS: [&str; 4] = ["description", "metadata", "documentation", "reference"];

/// Child of a parameter node
#[derive(Debug, Clone)]
pub enum ParameterChild {
    Node(Arc<ParameterNode>),
    Parameter(Arc<Parameter>),
    Scale(Arc<ParameterScale>),
}

/// Interior node of the parameter tree
#[derive(Debug, Clone, Default)]
pub struct ParameterNode {
    pub name: String,
    pub description: Option<String>,
    pub metadata: Map<String, Value>,
    pub(crate) children: BTreeMap<String, ParameterChild>,
}

/// One bracket of a progressive schedule
#[derive(Debug, Clone)]
pub struct ParameterScaleBracket {
    pub name: String,
    pub(crate) children: BTreeMap<String, Arc<Parameter>>,
}

/// Progressive schedule made of brackets
#[derive(Debug, Clone)]
pub struct ParameterScale {
    pub name: String,
    pub description: Option<String>,
    pub metadata: Map<String, Value>,
    pub brackets: Vec<ParameterScaleBracket>,
}

fn child_name(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn looks_like_parameter(object: &Map<String, Value>) -> bool {
    object.contains_key("values")
        || (!object.is_empty()
            && object
                .keys()
                .all(|k| k.matches('-').count() == 2 && parse_instant(k).is_ok()))
}

impl ParameterNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build a tree from JSON-shaped data
    ///
    /// An object with `brackets` is a scale, one with `values` (or only dated
    /// keys) is a parameter, anything else is a node.
    pub fn from_json(name: &str, data: &Value) -> Result<Self, ParameterError> {
        let object = data.as_object().ok_or_else(|| ParameterError::Parsing {
            name: name.to_string(),
            message: "a parameter node must be an object".to_string(),
        })?;

        let mut node = ParameterNode::new(name);
        node.description = object
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        node.metadata = object
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        for (key, child) in object {
            if RESERVED_NODE_KEYS.contains(&key.as_str()) {
                continue;
            }
            let full_name = child_name(name, key);
            let child_object = child.as_object().ok_or_else(|| ParameterError::Parsing {
                name: full_name.clone(),
                message: "expected an object".to_string(),
            })?;
            let parsed = if child_object.contains_key("brackets") {
                ParameterChild::Scale(Arc::new(ParameterScale::from_json(&full_name, child)?))
            } else if looks_like_parameter(child_object) {
                ParameterChild::Parameter(Arc::new(Parameter::from_json(&full_name, child)?))
            } else {
                ParameterChild::Node(Arc::new(ParameterNode::from_json(&full_name, child)?))
            };
            node.children.insert(key.clone(), parsed);
        }
        Ok(node)
    }

    pub fn children(&self) -> &BTreeMap<String, ParameterChild> {
        &self.children
    }

    pub fn child(&self, key: &str) -> Option<&ParameterChild> {
        self.children.get(key)
    }

    pub fn add_child(&mut self, key: impl Into<String>, child: ParameterChild) {
        self.children.insert(key.into(), child);
    }

    pub fn add_parameter(&mut self, key: impl Into<String>, parameter: Parameter) {
        self.add_child(key, ParameterChild::Parameter(Arc::new(parameter)));
    }

    /// Existing child node for `key`, created empty if absent
    pub(crate) fn child_node_mut(&mut self, key: &str) -> Result<&mut ParameterNode, ParameterError> {
        let name = child_name(&self.name, key);
        let entry = self
            .children
            .entry(key.to_string())
            .or_insert_with(|| ParameterChild::Node(Arc::new(ParameterNode::new(name.clone()))));
        match entry {
            ParameterChild::Node(node) => Ok(Arc::make_mut(node)),
            _ => Err(ParameterError::Parsing {
                name,
                message: "expected a parameter node".to_string(),
            }),
        }
    }

    /// Resolve every descendant at `instant`
    pub fn get_at_instant(&self, instant: Instant) -> ParameterNodeAtInstant {
        let children = self
            .children
            .iter()
            .map(|(key, child)| {
                let resolved = match child {
                    ParameterChild::Parameter(p) => {
                        AtInstantValue::Value(p.get_at_instant(instant).cloned())
                    }
                    ParameterChild::Node(n) => AtInstantValue::Node(Arc::new(n.get_at_instant(instant))),
                    ParameterChild::Scale(s) => AtInstantValue::Scale(Arc::new(s.get_at_instant(instant))),
                };
                (key.clone(), resolved)
            })
            .collect();
        ParameterNodeAtInstant::new(self.name.clone(), instant, children)
    }

    /// Paths, relative to this node, of every leaf parameter including bracket keys
    pub fn parameter_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_paths("", &mut paths);
        paths
    }

    fn collect_paths(&self, prefix: &str, paths: &mut Vec<String>) {
        for (key, child) in &self.children {
            let path = child_name(prefix, key);
            match child {
                ParameterChild::Parameter(_) => paths.push(path),
                ParameterChild::Node(node) => node.collect_paths(&path, paths),
                ParameterChild::Scale(scale) => {
                    for (i, bracket) in scale.brackets.iter().enumerate() {
                        for bracket_key in bracket.children.keys() {
                            paths.push(format!("{}[{}].{}", path, i, bracket_key));
                        }
                    }
                }
            }
        }
    }
}

impl ParameterScaleBracket {
    pub fn children(&self) -> &BTreeMap<String, Arc<Parameter>> {
        &self.children
    }

    pub fn get(&self, key: &str) -> Option<&Parameter> {
        self.children.get(key).map(|p| p.as_ref())
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut Parameter> {
        self.children.get_mut(key).map(Arc::make_mut)
    }

    fn at_instant(&self, key: &str, instant: Instant) -> Option<f64> {
        self.get(key).and_then(|p| p.number_at(instant))
    }
}

impl ParameterScale {
    pub fn from_json(name: &str, data: &Value) -> Result<Self, ParameterError> {
        let brackets_data = data
            .get("brackets")
            .and_then(Value::as_array)
            .ok_or_else(|| ParameterError::Parsing {
                name: name.to_string(),
                message: "'brackets' must be a list".to_string(),
            })?;

        let mut brackets = Vec::with_capacity(brackets_data.len());
        for (i, bracket_data) in brackets_data.iter().enumerate() {
            let bracket_name = format!("{}[{}]", name, i);
            let object = bracket_data.as_object().ok_or_else(|| ParameterError::Parsing {
                name: bracket_name.clone(),
                message: "a bracket must be an object".to_string(),
            })?;
            let mut children = BTreeMap::new();
            for (key, value) in object {
                if !BRACKET_KEYS.contains(&key.as_str()) {
                    return Err(ParameterError::InvalidBracketKey {
                        name: bracket_name,
                        key: key.clone(),
                    });
                }
                let parameter = Parameter::from_json(&format!("{}.{}", bracket_name, key), value)?;
                children.insert(key.clone(), Arc::new(parameter));
            }
            brackets.push(ParameterScaleBracket {
                name: bracket_name,
                children,
            });
        }

        Ok(Self {
            name: name.to_string(),
            description: data
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            metadata: data
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            brackets,
        })
    }

    pub fn get_at_instant(&self, instant: Instant) -> ScaleAtInstant {
        let brackets = self
            .brackets
            .iter()
            .map(|b| BracketAtInstant {
                threshold: b.at_instant("threshold", instant),
                rate: b.at_instant("rate", instant),
                amount: b.at_instant("amount", instant),
                average_rate: b.at_instant("average_rate", instant),
                base: b.at_instant("base", instant),
            })
            .collect();
        ScaleAtInstant {
            name: self.name.clone(),
            brackets,
        }
    }
}
