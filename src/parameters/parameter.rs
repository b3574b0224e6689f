//! Time-varying leaf parameters

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ParameterError;
use crate::periods::{parse_instant, DateUnit, Instant, Period};

/// A legislated value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ParameterValue {
    /// Numeric view; booleans count as 0 or 1
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Number(n) => Some(*n),
            ParameterValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ParameterValue::Text(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(b) => Some(*b),
            ParameterValue::Number(n) => Some(*n != 0.0),
            ParameterValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Number(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Bool(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Text(value.to_string())
    }
}

/// One dated entry of a parameter
///
/// A `None` value means the parameter is undefined from this instant on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterAtInstant {
    pub instant: Instant,
    pub value: Option<ParameterValue>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ParameterAtInstant {
    pub fn new(instant: Instant, value: Option<ParameterValue>) -> Self {
        Self {
            instant,
            value,
            metadata: Map::new(),
        }
    }

    pub fn instant_str(&self) -> String {
        self.instant.to_string()
    }
}

/// A named leaf of the parameter tree
///
/// `values_list` is kept newest-first at all times.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub description: Option<String>,
    pub metadata: Map<String, Value>,
    values_list: Vec<ParameterAtInstant>,
}

impl Parameter {
    /// Build from `(instant, value)` pairs in any order
    pub fn new(
        name: impl Into<String>,
        values: impl IntoIterator<Item = (Instant, Option<ParameterValue>)>,
    ) -> Self {
        let mut parameter = Self {
            name: name.into(),
            description: None,
            metadata: Map::new(),
            values_list: values
                .into_iter()
                .map(|(instant, value)| ParameterAtInstant::new(instant, value))
                .collect(),
        };
        parameter.sort_values();
        parameter
    }

    /// Convenience constructor for numeric series keyed by instant strings
    pub fn from_numbers(name: impl Into<String>, values: &[(&str, f64)]) -> Result<Self, ParameterError> {
        let name = name.into();
        let mut entries = Vec::with_capacity(values.len());
        for (instant_str, value) in values {
            let instant = parse_instant(instant_str).map_err(|e| ParameterError::Parsing {
                name: name.clone(),
                message: e.to_string(),
            })?;
            entries.push((instant, Some(ParameterValue::Number(*value))));
        }
        Ok(Self::new(name, entries))
    }

    /// Parse `{"values": {...}, "metadata": {...}}` or a bare `{instant: value}` map
    pub fn from_json(name: &str, data: &Value) -> Result<Self, ParameterError> {
        let parsing = |message: String| ParameterError::Parsing {
            name: name.to_string(),
            message,
        };
        let object = data
            .as_object()
            .ok_or_else(|| parsing("expected an object".to_string()))?;

        let (values, metadata, description) = match object.get("values") {
            Some(values) => (
                values
                    .as_object()
                    .ok_or_else(|| parsing("'values' must be an object".to_string()))?,
                object
                    .get("metadata")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                object
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            None => (object, Map::new(), None),
        };

        let mut values_list = Vec::with_capacity(values.len());
        for (instant_str, raw) in values {
            let instant = parse_instant(instant_str).map_err(|e| parsing(e.to_string()))?;
            let (raw_value, entry_metadata) = match raw {
                Value::Object(entry) => (
                    entry.get("value").cloned().unwrap_or(Value::Null),
                    entry
                        .get("metadata")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default(),
                ),
                other => (other.clone(), Map::new()),
            };
            let value = if raw_value.is_null() {
                None
            } else {
                Some(
                    serde_json::from_value::<ParameterValue>(raw_value).map_err(|e| {
                        parsing(format!("invalid value at {}: {}", instant_str, e))
                    })?,
                )
            };
            values_list.push(ParameterAtInstant {
                instant,
                value,
                metadata: entry_metadata,
            });
        }

        let mut parameter = Self {
            name: name.to_string(),
            description,
            metadata,
            values_list,
        };
        parameter.sort_values();
        Ok(parameter)
    }

    pub fn values_list(&self) -> &[ParameterAtInstant] {
        &self.values_list
    }

    /// Append entries, restoring newest-first order
    pub fn extend_values(&mut self, entries: impl IntoIterator<Item = ParameterAtInstant>) {
        self.values_list.extend(entries);
        self.sort_values();
    }

    pub(crate) fn sort_values(&mut self) {
        self.values_list.sort_by(|a, b| b.instant.cmp(&a.instant));
    }

    /// Most recent value not after `instant`
    pub fn get_at_instant(&self, instant: Instant) -> Option<&ParameterValue> {
        self.values_list
            .iter()
            .find(|entry| entry.instant <= instant)
            .and_then(|entry| entry.value.as_ref())
    }

    /// Numeric value at `instant`, if defined and numeric
    pub fn number_at(&self, instant: Instant) -> Option<f64> {
        self.get_at_instant(instant).and_then(ParameterValue::as_f64)
    }

    /// Newest entry instant
    pub fn latest_instant(&self) -> Option<Instant> {
        self.values_list.first().map(|entry| entry.instant)
    }

    /// Replace the value over a whole period
    pub fn update_period(&mut self, period: &Period, value: Option<ParameterValue>) {
        let stop = if period.is_eternity() {
            None
        } else {
            Some(period.stop())
        };
        let start = if period.is_eternity() {
            Instant::new(0, 1, 1).unwrap_or(Instant::MIN)
        } else {
            period.start()
        };
        self.update(start, stop, value);
    }

    /// Replace the value from `start` up to and including `stop`
    ///
    /// Entries after `stop` are kept, and the value in force at `stop` resumes the
    /// day after. A `None` stop makes the new value open-ended.
    pub fn update(&mut self, start: Instant, stop: Option<Instant>, value: Option<ParameterValue>) {
        let resume = stop.map(|s| s.offset(1, DateUnit::Day));
        let old_values = std::mem::take(&mut self.values_list);
        let mut new_values = Vec::with_capacity(old_values.len() + 2);
        let mut i = 0;
        let n = old_values.len();

        if let Some(resume) = resume {
            while i < n && old_values[i].instant >= resume {
                new_values.push(old_values[i].clone());
                i += 1;
            }
            let boundary_exists = new_values
                .last()
                .map(|entry: &ParameterAtInstant| entry.instant == resume)
                .unwrap_or(false);
            if !boundary_exists {
                let overlapped = if i < n { old_values[i].value.clone() } else { None };
                new_values.push(ParameterAtInstant::new(resume, overlapped));
            }
        }

        new_values.push(ParameterAtInstant::new(start, value));

        while i < n && old_values[i].instant >= start {
            i += 1;
        }
        new_values.extend(old_values[i..].iter().cloned());

        self.values_list = new_values;
    }

    /// Relative change between two instants, `value(end) / value(start) - 1`
    pub fn relative_change(&self, start: Instant, end: Instant) -> Option<f64> {
        let start_value = self.number_at(start)?;
        let end_value = self.number_at(end)?;
        if start_value == 0.0 {
            return None;
        }
        Some(end_value / start_value - 1.0)
    }
}
