//! Typed per-entity value arrays
//!
//! Every value the engine stores or returns is an `Array` whose length is the
//! population count of the variable's entity.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Declared type of a variable's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Str,
    Enum,
}

impl ValueType {
    /// Bool, int and float: the types that can be summed and zeroed
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Bool | ValueType::Int | ValueType::Float)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Str => "str",
            ValueType::Enum => "Enum",
        };
        f.write_str(name)
    }
}

/// Named items of an enumeration, indexed by position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PossibleValues {
    pub name: String,
    pub items: Vec<String>,
}

impl PossibleValues {
    pub fn new(name: impl Into<String>, items: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            items: items.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn index_of(&self, item: &str) -> Option<i16> {
        self.items.iter().position(|i| i == item).map(|i| i as i16)
    }

    /// Encode item names; unknown names map to the first item
    pub fn encode<S: AsRef<str>>(&self, names: &[S]) -> Vec<i16> {
        names
            .iter()
            .map(|n| self.index_of(n.as_ref()).unwrap_or(0))
            .collect()
    }

    pub fn decode(&self, indices: &[i16]) -> Vec<String> {
        indices
            .iter()
            .map(|&i| self.items.get(i as usize).cloned().unwrap_or_default())
            .collect()
    }
}

/// Enum item indices together with their enumeration
#[derive(Debug, Clone, PartialEq)]
pub struct EnumArray {
    pub indices: Vec<i16>,
    pub possible_values: Arc<PossibleValues>,
}

impl EnumArray {
    pub fn decode(&self) -> Vec<String> {
        self.possible_values.decode(&self.indices)
    }
}

/// A single value, used for defaults and situation inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Str(_) => None,
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

/// Population-length values of one type
#[derive(Debug, Clone, PartialEq)]
pub enum Array {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
    Enum(EnumArray),
}

impl Array {
    pub fn len(&self) -> usize {
        match self {
            Array::Float(v) => v.len(),
            Array::Int(v) => v.len(),
            Array::Bool(v) => v.len(),
            Array::Str(v) => v.len(),
            Array::Enum(e) => e.indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Array::Float(_) => ValueType::Float,
            Array::Int(_) => ValueType::Int,
            Array::Bool(_) => ValueType::Bool,
            Array::Str(_) => ValueType::Str,
            Array::Enum(_) => ValueType::Enum,
        }
    }

    /// Array of `count` copies of `value`, typed as `value_type`
    pub fn filled(
        value_type: ValueType,
        value: &Scalar,
        count: usize,
        possible_values: Option<&Arc<PossibleValues>>,
    ) -> Array {
        match value_type {
            ValueType::Float => Array::Float(vec![value.as_f64().unwrap_or(0.0); count]),
            ValueType::Int => Array::Int(vec![value.as_f64().unwrap_or(0.0) as i64; count]),
            ValueType::Bool => Array::Bool(vec![value.as_f64().unwrap_or(0.0) != 0.0; count]),
            ValueType::Str => Array::Str(vec![
                match value {
                    Scalar::Str(s) => s.clone(),
                    _ => String::new(),
                };
                count
            ]),
            ValueType::Enum => {
                let possible_values = possible_values
                    .cloned()
                    .unwrap_or_else(|| PossibleValues::new("", &[]));
                let index = match value {
                    Scalar::Str(name) => possible_values.index_of(name).unwrap_or(0),
                    other => other.as_f64().unwrap_or(0.0) as i16,
                };
                Array::Enum(EnumArray {
                    indices: vec![index; count],
                    possible_values,
                })
            }
        }
    }

    /// Build from heterogeneous scalars, as read from a situation
    pub fn from_scalars(
        value_type: ValueType,
        values: &[Scalar],
        possible_values: Option<&Arc<PossibleValues>>,
    ) -> Result<Array, String> {
        let numbers = || -> Result<Vec<f64>, String> {
            values
                .iter()
                .map(|v| {
                    v.as_f64()
                        .ok_or_else(|| format!("expected a number, got {:?}", v))
                })
                .collect()
        };
        Ok(match value_type {
            ValueType::Float => Array::Float(numbers()?),
            ValueType::Int => Array::Int(numbers()?.into_iter().map(|v| v as i64).collect()),
            ValueType::Bool => Array::Bool(numbers()?.into_iter().map(|v| v != 0.0).collect()),
            ValueType::Str => Array::Str(
                values
                    .iter()
                    .map(|v| match v {
                        Scalar::Str(s) => s.clone(),
                        other => format!("{:?}", other),
                    })
                    .collect(),
            ),
            ValueType::Enum => {
                let possible_values = possible_values
                    .ok_or_else(|| "enum variable without possible values".to_string())?;
                let indices = values
                    .iter()
                    .map(|v| match v {
                        Scalar::Str(name) => possible_values.index_of(name).ok_or_else(|| {
                            format!(
                                "'{}' is not a known value of {}. Possible values are: {}",
                                name,
                                possible_values.name,
                                possible_values.items.join(", ")
                            )
                        }),
                        Scalar::Int(i) => Ok(*i as i16),
                        other => Err(format!("expected an enum item name, got {:?}", other)),
                    })
                    .collect::<Result<Vec<i16>, String>>()?;
                Array::Enum(EnumArray {
                    indices,
                    possible_values: Arc::clone(possible_values),
                })
            }
        })
    }

    /// Numeric view; enums yield their indices and strings yield 0
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Array::Float(v) => v.clone(),
            Array::Int(v) => v.iter().map(|&x| x as f64).collect(),
            Array::Bool(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
            Array::Str(v) => vec![0.0; v.len()],
            Array::Enum(e) => e.indices.iter().map(|&i| i as f64).collect(),
        }
    }

    pub fn as_f64_slice(&self) -> Option<&[f64]> {
        match self {
            Array::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Truthiness per element: numbers above zero, or `true`
    pub fn to_mask(&self) -> Vec<bool> {
        match self {
            Array::Bool(v) => v.clone(),
            other => other.to_f64().into_iter().map(|x| x > 0.0).collect(),
        }
    }

    /// Item names for enum arrays, raw strings otherwise
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            Array::Str(v) => v.clone(),
            Array::Enum(e) => e.decode(),
            other => other.to_f64().iter().map(|x| x.to_string()).collect(),
        }
    }

    /// Convert to `value_type`
    pub fn cast(
        &self,
        value_type: ValueType,
        possible_values: Option<&Arc<PossibleValues>>,
    ) -> Result<Array, String> {
        if self.value_type() == value_type && value_type != ValueType::Enum {
            return Ok(self.clone());
        }
        Ok(match value_type {
            ValueType::Float => Array::Float(self.to_f64()),
            ValueType::Int => Array::Int(self.to_f64().into_iter().map(|x| x as i64).collect()),
            ValueType::Bool => Array::Bool(self.to_f64().into_iter().map(|x| x != 0.0).collect()),
            ValueType::Str => Array::Str(self.to_strings()),
            ValueType::Enum => {
                let possible_values = match (possible_values, self) {
                    (Some(p), _) => Arc::clone(p),
                    (None, Array::Enum(e)) => Arc::clone(&e.possible_values),
                    (None, _) => return Err("cannot encode an enum without possible values".to_string()),
                };
                let indices = match self {
                    Array::Enum(e) => e.indices.clone(),
                    Array::Str(names) => possible_values.encode(names),
                    Array::Float(_) | Array::Int(_) | Array::Bool(_) => {
                        self.to_f64().into_iter().map(|x| x as i16).collect()
                    }
                };
                Array::Enum(EnumArray {
                    indices,
                    possible_values,
                })
            }
        })
    }

    /// Element-wise choice: `self` where `mask` is true, `other` elsewhere
    pub fn select(&self, mask: &[bool], other: &Array) -> Result<Array, String> {
        if self.len() != mask.len() || other.len() != mask.len() {
            return Err(format!(
                "length mismatch in select: {} values, {} mask, {} fallback",
                self.len(),
                mask.len(),
                other.len()
            ));
        }
        let other = other.cast(self.value_type(), self.possible_values())?;
        fn pick<T: Clone>(a: &[T], b: &[T], mask: &[bool]) -> Vec<T> {
            a.iter()
                .zip(b)
                .zip(mask)
                .map(|((x, y), &m)| if m { x.clone() } else { y.clone() })
                .collect()
        }
        Ok(match (self, &other) {
            (Array::Float(a), Array::Float(b)) => Array::Float(pick(a, b, mask)),
            (Array::Int(a), Array::Int(b)) => Array::Int(pick(a, b, mask)),
            (Array::Bool(a), Array::Bool(b)) => Array::Bool(pick(a, b, mask)),
            (Array::Str(a), Array::Str(b)) => Array::Str(pick(a, b, mask)),
            (Array::Enum(a), Array::Enum(b)) => Array::Enum(EnumArray {
                indices: pick(&a.indices, &b.indices, mask),
                possible_values: Arc::clone(&a.possible_values),
            }),
            _ => return Err("incompatible array types in select".to_string()),
        })
    }

    pub fn possible_values(&self) -> Option<&Arc<PossibleValues>> {
        match self {
            Array::Enum(e) => Some(&e.possible_values),
            _ => None,
        }
    }

    /// Approximate heap size in bytes
    pub fn nbytes(&self) -> usize {
        match self {
            Array::Float(v) => v.len() * 8,
            Array::Int(v) => v.len() * 8,
            Array::Bool(v) => v.len(),
            Array::Str(v) => v.iter().map(String::len).sum(),
            Array::Enum(e) => e.indices.len() * 2,
        }
    }

    /// JSON rendering, with enums decoded to item names
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Array::Float(v) => serde_json::json!(v),
            Array::Int(v) => serde_json::json!(v),
            Array::Bool(v) => serde_json::json!(v),
            Array::Str(v) => serde_json::json!(v),
            Array::Enum(e) => serde_json::json!(e.decode()),
        }
    }
}

impl From<Vec<f64>> for Array {
    fn from(values: Vec<f64>) -> Self {
        Array::Float(values)
    }
}

impl From<Vec<i64>> for Array {
    fn from(values: Vec<i64>) -> Self {
        Array::Int(values)
    }
}

impl From<Vec<bool>> for Array {
    fn from(values: Vec<bool>) -> Self {
        Array::Bool(values)
    }
}

/// Element-wise sum of numeric arrays, as floats
pub fn sum_arrays<'a>(arrays: impl IntoIterator<Item = &'a Array>, len: usize) -> Vec<f64> {
    let mut total = vec![0.0; len];
    for array in arrays {
        for (t, v) in total.iter_mut().zip(array.to_f64()) {
            *t += v;
        }
    }
    total
}
