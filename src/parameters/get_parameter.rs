//! Dotted-path lookup with bracket indexing, e.g. `tax.scale[2].rate`

use std::sync::Arc;

use super::node::{ParameterChild, ParameterNode, ParameterScale, ParameterScaleBracket};
use super::parameter::Parameter;
use crate::errors::ParameterError;

/// Borrowed view of whatever a path resolves to
#[derive(Debug, Clone, Copy)]
pub enum ParameterRef<'a> {
    Node(&'a ParameterNode),
    Parameter(&'a Parameter),
    Scale(&'a ParameterScale),
    Bracket(&'a ParameterScaleBracket),
}

impl<'a> ParameterRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            ParameterRef::Node(n) => &n.name,
            ParameterRef::Parameter(p) => &p.name,
            ParameterRef::Scale(s) => &s.name,
            ParameterRef::Bracket(b) => &b.name,
        }
    }

    pub fn as_parameter(&self) -> Option<&'a Parameter> {
        match self {
            ParameterRef::Parameter(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&'a ParameterNode> {
        match self {
            ParameterRef::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_scale(&self) -> Option<&'a ParameterScale> {
        match self {
            ParameterRef::Scale(s) => Some(s),
            _ => None,
        }
    }

    fn child_keys(&self) -> Vec<String> {
        match self {
            ParameterRef::Node(n) => n.children.keys().cloned().collect(),
            ParameterRef::Bracket(b) => b.children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn child(&self, key: &str) -> Option<ParameterRef<'a>> {
        match *self {
            ParameterRef::Node(n) => n.children.get(key).map(|child| match child {
                ParameterChild::Node(n) => ParameterRef::Node(n),
                ParameterChild::Parameter(p) => ParameterRef::Parameter(p),
                ParameterChild::Scale(s) => ParameterRef::Scale(s),
            }),
            ParameterRef::Bracket(b) => b.children.get(key).map(|p| ParameterRef::Parameter(p)),
            _ => None,
        }
    }
}

enum PathStep<'p> {
    Child(&'p str),
    Bracket(&'p str, usize),
}

fn similar_names(keys: &[String], name: &str) -> Vec<String> {
    let needle = name.to_lowercase();
    keys.iter()
        .filter(|k| k.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

fn not_found(keys: &[String], name: &str, path: &str) -> ParameterError {
    ParameterError::NotFound {
        name: name.to_string(),
        path: path.to_string(),
        suggestions: similar_names(keys, name),
    }
}

fn parse_step<'p>(component: &'p str, path: &str) -> Result<PathStep<'p>, ParameterError> {
    if !component.contains('[') {
        return Ok(PathStep::Child(component));
    }
    let syntax_error = || ParameterError::Path {
        message: format!(
            "Invalid bracket syntax at '{}' in parameter path '{}'. Use format: parameter_name[index], e.g., brackets[0].rate",
            component, path
        ),
        parameter_path: path.to_string(),
        failed_at: component.to_string(),
    };
    if component.matches('[').count() != 1 {
        return Err(syntax_error());
    }
    let (name, bracket) = component.split_once('[').ok_or_else(syntax_error)?;
    let index = bracket
        .strip_suffix(']')
        .and_then(|raw| raw.parse::<usize>().ok())
        .ok_or_else(syntax_error)?;
    Ok(PathStep::Bracket(name, index))
}

fn index_scale<'a>(
    scale: &'a ParameterScale,
    index: usize,
    component: &str,
    path: &str,
) -> Result<&'a ParameterScaleBracket, ParameterError> {
    scale.brackets.get(index).ok_or_else(|| ParameterError::Path {
        message: format!(
            "Bracket index out of range in '{}' of parameter path '{}'. Valid indices are 0 to {}.",
            component,
            path,
            scale.brackets.len() as i64 - 1
        ),
        parameter_path: path.to_string(),
        failed_at: component.to_string(),
    })
}

fn not_a_scale(name: &str, component: &str, path: &str) -> ParameterError {
    ParameterError::Path {
        message: format!(
            "'{}' in parameter path '{}' does not support bracket indexing. Only scale parameters (like brackets) support indexing.",
            name, path
        ),
        parameter_path: path.to_string(),
        failed_at: component.to_string(),
    }
}

/// Resolve a dotted path from `root`
pub fn get_parameter<'a>(root: &'a ParameterNode, path: &str) -> Result<ParameterRef<'a>, ParameterError> {
    let mut current = ParameterRef::Node(root);
    for component in path.split('.') {
        current = match parse_step(component, path)? {
            PathStep::Child(name) => current
                .child(name)
                .ok_or_else(|| not_found(&current.child_keys(), name, path))?,
            PathStep::Bracket(name, index) => {
                let child = current
                    .child(name)
                    .ok_or_else(|| not_found(&current.child_keys(), name, path))?;
                let scale = child
                    .as_scale()
                    .ok_or_else(|| not_a_scale(name, component, path))?;
                ParameterRef::Bracket(index_scale(scale, index, component, path)?)
            }
        };
    }
    Ok(current)
}

/// Resolve a path that must end at a leaf parameter
pub fn get_leaf<'a>(root: &'a ParameterNode, path: &str) -> Result<&'a Parameter, ParameterError> {
    get_parameter(root, path)?
        .as_parameter()
        .ok_or_else(|| ParameterError::Parsing {
            name: path.to_string(),
            message: "is not a leaf parameter".to_string(),
        })
}

/// Mutable access to a leaf parameter, copying shared subtrees on the way down
pub fn get_parameter_mut<'a>(
    root: &'a mut ParameterNode,
    path: &str,
) -> Result<&'a mut Parameter, ParameterError> {
    let components: Vec<&str> = path.split('.').collect();
    let mut node: &'a mut ParameterNode = root;
    let mut i = 0;
    while i < components.len() {
        let component = components[i];
        let is_last = i + 1 == components.len();
        match parse_step(component, path)? {
            PathStep::Child(name) => {
                if !node.children.contains_key(name) {
                    let keys: Vec<String> = node.children.keys().cloned().collect();
                    return Err(not_found(&keys, name, path));
                }
                let name_of_node = node.name.clone();
                match node.children.get_mut(name) {
                    Some(ParameterChild::Node(child)) => node = Arc::make_mut(child),
                    Some(ParameterChild::Parameter(p)) if is_last => return Ok(Arc::make_mut(p)),
                    _ => {
                        return Err(ParameterError::Parsing {
                            name: format!("{}.{}", name_of_node, name),
                            message: format!("'{}' does not lead to a leaf parameter", path),
                        })
                    }
                }
            }
            PathStep::Bracket(name, index) => {
                if !node.children.contains_key(name) {
                    let keys: Vec<String> = node.children.keys().cloned().collect();
                    return Err(not_found(&keys, name, path));
                }
                let scale = match node.children.get_mut(name) {
                    Some(ParameterChild::Scale(scale)) => Arc::make_mut(scale),
                    _ => return Err(not_a_scale(name, component, path)),
                };
                index_scale(scale, index, component, path)?;
                let key = match components.get(i + 1) {
                    Some(key) if i + 2 == components.len() => *key,
                    _ => {
                        return Err(ParameterError::Parsing {
                            name: path.to_string(),
                            message: "a bracket path must end with one bracket key".to_string(),
                        })
                    }
                };
                let bracket_keys: Vec<String> = scale.brackets[index].children.keys().cloned().collect();
                return scale.brackets[index]
                    .get_mut(key)
                    .ok_or_else(|| not_found(&bracket_keys, key, path));
            }
        }
        i += 1;
    }
    Err(ParameterError::Parsing {
        name: path.to_string(),
        message: "is not a leaf parameter".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periods::instant;

    fn root() -> ParameterNode {
        let data = serde_json::json!({
            "tax": {
                "income_tax_rate": {"2015-01-01": 0.15},
                "income_tax_threshold": {"2015-01-01": 1000},
                "brackets": {
                    "brackets": [
                        {"threshold": {"2015-01-01": 0}, "rate": {"2015-01-01": 0.1}},
                        {"threshold": {"2015-01-01": 500}, "rate": {"2015-01-01": 0.2}}
                    ]
                }
            }
        });
        ParameterNode::from_json("", &data).unwrap()
    }

    #[test]
    fn test_dotted_lookup() {
        let root = root();
        let p = get_leaf(&root, "tax.income_tax_rate").unwrap();
        assert_eq!(p.name, "tax.income_tax_rate");
        assert!(get_parameter(&root, "tax").unwrap().as_node().is_some());
    }

    #[test]
    fn test_bracket_lookup() {
        let root = root();
        let p = get_leaf(&root, "tax.brackets[1].rate").unwrap();
        assert_eq!(p.number_at(instant("2016").unwrap()), Some(0.2));
    }

    #[test]
    fn test_not_found_suggests_similar_names() {
        let root = root();
        let err = get_parameter(&root, "tax.income_tax").unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Parameter 'income_tax' not found in path 'tax.income_tax'."));
        assert!(message.contains("income_tax_rate"));
        assert!(message.contains("income_tax_threshold"));
    }

    #[test]
    fn test_invalid_bracket_syntax() {
        let root = root();
        for path in ["tax.brackets[0.rate", "tax.brackets[a].rate", "tax.brackets[0][1].rate"] {
            match get_parameter(&root, path).unwrap_err() {
                ParameterError::Path {
                    message,
                    parameter_path,
                    ..
                } => {
                    assert!(message.starts_with("Invalid bracket syntax"));
                    assert_eq!(parameter_path, path);
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn test_bracket_on_non_scale() {
        let root = root();
        match get_parameter(&root, "tax.income_tax_rate[0]").unwrap_err() {
            ParameterError::Path { message, failed_at, .. } => {
                assert!(message.contains("does not support bracket indexing"));
                assert_eq!(failed_at, "income_tax_rate[0]");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_bracket_index_out_of_range() {
        let root = root();
        let err = get_parameter(&root, "tax.brackets[5].rate").unwrap_err();
        assert!(err.to_string().contains("Valid indices are 0 to 1."));
    }

    #[test]
    fn test_get_parameter_mut_copies_on_write() {
        let original = root();
        let mut reformed = original.clone();
        get_parameter_mut(&mut reformed, "tax.brackets[0].rate")
            .unwrap()
            .update(instant("2015").unwrap(), None, Some(0.5.into()));
        let at = instant("2016").unwrap();
        assert_eq!(get_leaf(&reformed, "tax.brackets[0].rate").unwrap().number_at(at), Some(0.5));
        assert_eq!(get_leaf(&original, "tax.brackets[0].rate").unwrap().number_at(at), Some(0.1));
    }

    #[test]
    fn test_get_parameter_mut_rejects_nodes() {
        let mut root = root();
        assert!(get_parameter_mut(&mut root, "tax").is_err());
        assert!(get_parameter_mut(&mut root, "tax.missing").is_err());
    }
}
