//! Extrapolating parameters forward with an uprating index
//!
//! Two modes:
//! - **Chained**: every uprater instant after the parameter's last known value
//!   produces a new value scaled by the uprater's growth since the previous one.
//! - **Cadence** (`at_defined_interval`): values change only on enactment dates,
//!   by the uprater's growth between two reference dates a fixed offset earlier.

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::Deserialize;

use super::get_parameter::{get_leaf, get_parameter_mut};
use super::node::ParameterNode;
use super::parameter::{Parameter, ParameterAtInstant, ParameterValue};
use crate::errors::UpratingError;
use crate::periods::{parse_instant, DateUnit, Instant};

/// Parsed `metadata.uprating`
#[derive(Debug, Clone, Deserialize)]
pub struct UpratingSpec {
    /// Path of the uprating parameter, or `"self"`
    pub parameter: String,
    #[serde(default)]
    pub rounding: Option<Rounding>,
    #[serde(default)]
    pub at_defined_interval: Option<CadenceSpec>,
    #[serde(default)]
    pub start_instant: Option<String>,
    /// Self-uprating: reference instants and number of projected steps
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum UpratingMetadata {
    Short(String),
    Full(UpratingSpec),
}

/// Rounding applied to every uprated value
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum Rounding {
    /// Round to the nearest multiple
    Interval(f64),
    Rule {
        interval: f64,
        #[serde(rename = "type")]
        kind: RoundingKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingKind {
    Nearest,
    Upwards,
    Downwards,
}

impl Rounding {
    pub fn apply(&self, value: f64) -> f64 {
        let (interval, kind) = match *self {
            Rounding::Interval(interval) => (interval, RoundingKind::Nearest),
            Rounding::Rule { interval, kind } => (interval, kind),
        };
        let steps = value / interval;
        let rounded = match kind {
            // Ties go to the even multiple
            RoundingKind::Nearest => steps.round_ties_even(),
            RoundingKind::Upwards => steps.ceil(),
            RoundingKind::Downwards => steps.floor(),
        };
        rounded * interval
    }
}

/// Raw `at_defined_interval` settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CadenceSpec {
    pub start: Option<String>,
    pub end: Option<String>,
    pub enactment: Option<String>,
    pub effective: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CadenceInterval {
    Year,
    Month,
    Day,
}

#[derive(Debug, Clone)]
struct CadenceOptions {
    start: NaiveDate,
    end: NaiveDate,
    enactment: NaiveDate,
    effective: Option<NaiveDate>,
    interval: CadenceInterval,
}

impl UpratingSpec {
    /// Read the uprating settings of a parameter, if it has any
    pub fn from_metadata(parameter: &Parameter) -> Result<Option<Self>, UpratingError> {
        let raw = match parameter.metadata.get("uprating") {
            None | Some(serde_json::Value::Null) => return Ok(None),
            Some(raw) => raw.clone(),
        };
        let parsed: UpratingMetadata =
            serde_json::from_value(raw).map_err(|e| UpratingError::Syntax {
                parameter: parameter.name.clone(),
                message: e.to_string(),
            })?;
        Ok(Some(match parsed {
            UpratingMetadata::Short(path) => UpratingSpec {
                parameter: path,
                rounding: None,
                at_defined_interval: None,
                start_instant: None,
                from: None,
                to: None,
                number: None,
                interval: None,
            },
            UpratingMetadata::Full(spec) => spec,
        }))
    }
}

/// Calendar difference applied months-first, then days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CalendarOffset {
    months: i32,
    days: i64,
}

fn add_months(date: NaiveDate, months: i32) -> Option<NaiveDate> {
    if months >= 0 {
        date.checked_add_months(Months::new(months as u32))
    } else {
        date.checked_sub_months(Months::new(months.unsigned_abs()))
    }
}

impl CalendarOffset {
    /// Offset such that `earlier + offset == later`
    fn between(later: NaiveDate, earlier: NaiveDate) -> Option<Self> {
        let mut months =
            (later.year() - earlier.year()) * 12 + later.month() as i32 - earlier.month() as i32;
        let mut shifted = add_months(earlier, months)?;
        if later >= earlier {
            while later < shifted {
                months -= 1;
                shifted = add_months(earlier, months)?;
            }
        } else {
            while later > shifted {
                months += 1;
                shifted = add_months(earlier, months)?;
            }
        }
        Some(Self {
            months,
            days: (later - shifted).num_days(),
        })
    }

    fn add_to(&self, date: NaiveDate) -> Option<NaiveDate> {
        Some(add_months(date, self.months)? + Duration::days(self.days))
    }

    fn subtract_from(&self, date: NaiveDate) -> Option<NaiveDate> {
        Some(add_months(date, -self.months)? - Duration::days(self.days))
    }
}

fn syntax(parameter: &Parameter, message: impl Into<String>) -> UpratingError {
    UpratingError::Syntax {
        parameter: parameter.name.clone(),
        message: message.into(),
    }
}

fn value_error(parameter: &Parameter, message: impl Into<String>) -> UpratingError {
    UpratingError::Value {
        parameter: parameter.name.clone(),
        message: message.into(),
    }
}

fn parse_cadence_date(parameter: &Parameter, key: &str, raw: &str) -> Result<NaiveDate, UpratingError> {
    let invalid = || syntax(parameter, format!("'{}' must be in format 'YYYY-MM-DD', got '{}'", key, raw));
    let parts: Vec<&str> = raw.split('-').collect();
    if parts.len() != 3 || parts[0].len() != 4 || parts[1].len() != 2 || parts[2].len() != 2 {
        return Err(invalid());
    }
    let year: i32 = parts[0].parse().map_err(|_| invalid())?;
    let month: u32 = parts[1].parse().map_err(|_| invalid())?;
    let day: u32 = parts[2].parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

fn cadence_options(parameter: &Parameter, spec: &CadenceSpec) -> Result<CadenceOptions, UpratingError> {
    let (Some(start), Some(end), Some(enactment)) = (&spec.start, &spec.end, &spec.enactment) else {
        return Err(syntax(
            parameter,
            "start, end, and enactment must all be provided to uprate using cadence",
        ));
    };
    let interval = match spec.interval.as_deref().map(str::to_lowercase).as_deref() {
        None | Some("year") => CadenceInterval::Year,
        Some("month") => CadenceInterval::Month,
        Some("day") => CadenceInterval::Day,
        Some(other) => {
            return Err(syntax(
                parameter,
                format!("interval '{}' is invalid; valid options are (year, month, day)", other),
            ))
        }
    };
    Ok(CadenceOptions {
        start: parse_cadence_date(parameter, "start", start)?,
        end: parse_cadence_date(parameter, "end", end)?,
        enactment: parse_cadence_date(parameter, "enactment", enactment)?,
        effective: spec
            .effective
            .as_deref()
            .map(|raw| parse_cadence_date(parameter, "effective", raw))
            .transpose()?,
        interval,
    })
}

/// First date on or after `from` matching the cadence anchor
fn next_matching(from: NaiveDate, anchor: NaiveDate, interval: CadenceInterval) -> Option<NaiveDate> {
    match interval {
        CadenceInterval::Day => Some(from),
        CadenceInterval::Year => (from.year()..from.year() + 9)
            .filter_map(|y| NaiveDate::from_ymd_opt(y, anchor.month(), anchor.day()))
            .find(|d| *d >= from),
        CadenceInterval::Month => (0..120)
            .filter_map(|k| {
                let month_start = add_months(from.with_day(1)?, k)?;
                month_start.with_day(anchor.day())
            })
            .find(|d| *d >= from),
    }
}

/// Last date within `[from, until]` matching the cadence anchor
fn last_matching(
    from: NaiveDate,
    until: NaiveDate,
    anchor: NaiveDate,
    interval: CadenceInterval,
) -> Option<NaiveDate> {
    match interval {
        CadenceInterval::Day => Some(from),
        CadenceInterval::Year => (from.year()..=until.year())
            .rev()
            .filter_map(|y| NaiveDate::from_ymd_opt(y, anchor.month(), anchor.day()))
            .find(|d| *d >= from && *d <= until),
        CadenceInterval::Month => (0..13)
            .filter_map(|k| {
                let month_start = add_months(until.with_day(1)?, -k)?;
                month_start.with_day(anchor.day())
            })
            .find(|d| *d >= from && *d <= until),
    }
}

fn value_at(parameter: &Parameter, date: NaiveDate) -> Option<f64> {
    parameter.number_at(Instant::from_date(date))
}

fn uprate_by_cadence(
    parameter: &Parameter,
    uprater: &Parameter,
    spec: &UpratingSpec,
    cadence: &CadenceSpec,
) -> Result<Vec<ParameterAtInstant>, UpratingError> {
    let options = cadence_options(parameter, cadence)?;
    if options.end <= options.start {
        return Err(value_error(
            parameter,
            format!("failed to uprate using {}: end must come after start", uprater.name),
        ));
    }
    if options.enactment <= options.end {
        return Err(value_error(
            parameter,
            format!("failed to uprate using {}: enactment must come after end", uprater.name),
        ));
    }

    let date_error = || value_error(parameter, "date arithmetic out of range while uprating by cadence");
    let enactment_start = CalendarOffset::between(options.enactment, options.start).ok_or_else(date_error)?;
    let enactment_end = CalendarOffset::between(options.enactment, options.end).ok_or_else(date_error)?;
    let end_start = CalendarOffset::between(options.end, options.start).ok_or_else(date_error)?;

    // First application: the enactment anchor after the newest value
    let first_date = match options.effective {
        Some(effective) => effective,
        None => {
            let newest = parameter
                .latest_instant()
                .ok_or_else(|| value_error(parameter, "parameter has no values to uprate"))?;
            next_matching(newest.to_date() + Duration::days(1), options.enactment, options.interval)
                .ok_or_else(date_error)?
        }
    };

    // Last application: the enactment following the newest end date the uprater covers
    let last_uprater = uprater
        .latest_instant()
        .ok_or_else(|| value_error(parameter, format!("uprating parameter {} has no values", uprater.name)))?
        .to_date();
    let window_start = add_months(last_uprater, -12).ok_or_else(date_error)? + Duration::days(1);
    let last_end = last_matching(window_start, last_uprater, options.end, options.interval).ok_or_else(|| {
        value_error(
            parameter,
            format!("no end date found for {} before {}", uprater.name, last_uprater),
        )
    })?;
    let last_start = end_start.subtract_from(last_end).ok_or_else(date_error)?;
    if value_at(uprater, last_start).is_none() {
        return Err(value_error(
            parameter,
            format!(
                "error while uprating using {}: no valid start, end pair found; did you forget to add earlier values, or is there a long gap between start and end year?",
                uprater.name
            ),
        ));
    }
    let last_date = enactment_end.add_to(last_end).ok_or_else(date_error)?;

    let mut reference = value_at(parameter, first_date).ok_or_else(|| {
        value_error(parameter, format!("no value defined at first uprating date {}", first_date))
    })?;

    let mut uprated = Vec::new();
    let mut step = 0;
    loop {
        let date = match options.interval {
            CadenceInterval::Year => add_months(first_date, 12 * step),
            CadenceInterval::Month => add_months(first_date, step),
            CadenceInterval::Day => Some(first_date + Duration::days(step as i64)),
        }
        .ok_or_else(date_error)?;
        if date > last_date {
            break;
        }
        let start_calc = enactment_start.subtract_from(date).ok_or_else(date_error)?;
        let end_calc = enactment_end.subtract_from(date).ok_or_else(date_error)?;
        let start_value = value_at(uprater, start_calc)
            .filter(|v| *v != 0.0)
            .ok_or_else(|| {
                value_error(
                    parameter,
                    format!("failed to uprate using {}: uprater missing values at date {}", uprater.name, start_calc),
                )
            })?;
        let end_value = value_at(uprater, end_calc).ok_or_else(|| {
            value_error(
                parameter,
                format!("failed to uprate using {}: uprater missing values at date {}", uprater.name, end_calc),
            )
        })?;

        let mut value = reference * end_value / start_value;
        if let Some(rounding) = &spec.rounding {
            value = rounding.apply(value);
        }
        uprated.push(ParameterAtInstant::new(
            Instant::from_date(date),
            Some(ParameterValue::Number(value)),
        ));
        reference = value;
        step += 1;
    }
    Ok(uprated)
}

fn uprate_chained(
    parameter: &Parameter,
    uprater: &Parameter,
    spec: &UpratingSpec,
) -> Result<Vec<ParameterAtInstant>, UpratingError> {
    let mut last_known = match &spec.start_instant {
        Some(raw) => parse_instant(raw).map_err(|e| syntax(parameter, e.to_string()))?,
        None => parameter
            .latest_instant()
            .ok_or_else(|| value_error(parameter, "parameter has no values to uprate"))?,
    };
    let mut last_value = parameter.number_at(last_known);

    let mut uprated = Vec::new();
    for entry in uprater.values_list().iter().rev() {
        if entry.instant <= last_known {
            continue;
        }
        let uprater_at_start = uprater
            .number_at(last_known)
            .filter(|v| *v != 0.0)
            .ok_or_else(|| {
                value_error(
                    parameter,
                    format!(
                        "failed to uprate using {} at {} for {} at {} because the uprating parameter is not defined at {}",
                        uprater.name, last_known, parameter.name, entry.instant, last_known
                    ),
                )
            })?;
        let uprater_at_entry = entry
            .value
            .as_ref()
            .and_then(ParameterValue::as_f64)
            .ok_or_else(|| value_error(parameter, format!("uprater {} is not numeric at {}", uprater.name, entry.instant)))?;
        let value_at_start = last_value.ok_or_else(|| {
            value_error(parameter, format!("no value to uprate from at {}", last_known))
        })?;

        let mut value = value_at_start * uprater_at_entry / uprater_at_start;
        if let Some(rounding) = &spec.rounding {
            value = rounding.apply(value);
        }
        uprated.push(ParameterAtInstant::new(entry.instant, Some(ParameterValue::Number(value))));
        last_known = entry.instant;
        last_value = Some(value);
    }
    Ok(uprated)
}

/// Synthetic uprater compounding the parameter's own latest growth
fn self_uprater(parameter: &Parameter, spec: &UpratingSpec) -> Result<Parameter, UpratingError> {
    let unit: DateUnit = match &spec.interval {
        Some(raw) => raw.parse().map_err(|e: crate::errors::PeriodError| syntax(parameter, e.to_string()))?,
        None => DateUnit::Year,
    };
    let last = parameter
        .latest_instant()
        .ok_or_else(|| value_error(parameter, "parameter has no values to uprate"))?;
    let parse = |raw: &String| parse_instant(raw).map_err(|e| syntax(parameter, e.to_string()));
    let start_instant = match &spec.from {
        Some(raw) => parse(raw)?,
        None => last.offset(-1, unit),
    };
    let end_instant = match &spec.to {
        Some(raw) => parse(raw)?,
        None => last,
    };
    let start = parameter
        .number_at(start_instant)
        .filter(|v| *v != 0.0)
        .ok_or_else(|| value_error(parameter, format!("self-uprating needs a non-zero value at {}", start_instant)))?;
    let end = parameter
        .number_at(end_instant)
        .ok_or_else(|| value_error(parameter, format!("self-uprating needs a value at {}", end_instant)))?;
    let increase = end / start;

    let mut value = parameter
        .number_at(last)
        .ok_or_else(|| value_error(parameter, format!("no value at {}", last)))?;
    let entries = (0..spec.number.unwrap_or(10)).map(|i| {
        value *= increase;
        (last.offset(i as i64, unit), Some(ParameterValue::Number(value)))
    });
    Ok(Parameter::new("self", entries.collect::<Vec<_>>()))
}

/// New entries for one parameter, without touching it
pub fn uprated_entries(
    parameter: &Parameter,
    uprater: &Parameter,
    spec: &UpratingSpec,
) -> Result<Vec<ParameterAtInstant>, UpratingError> {
    match &spec.at_defined_interval {
        Some(cadence) => uprate_by_cadence(parameter, uprater, spec, cadence),
        None => uprate_chained(parameter, uprater, spec),
    }
}

/// Apply uprating metadata to every descendant parameter, bracket keys included
pub fn uprate_parameters(root: &mut ParameterNode) -> Result<(), UpratingError> {
    for path in root.parameter_paths() {
        let entries = {
            let parameter = get_leaf(root, &path).map_err(|e| UpratingError::Value {
                parameter: path.clone(),
                message: e.to_string(),
            })?;
            let Some(spec) = UpratingSpec::from_metadata(parameter)? else {
                continue;
            };
            let own;
            let uprater = if spec.parameter == "self" {
                own = self_uprater(parameter, &spec)?;
                &own
            } else {
                get_leaf(root, &spec.parameter).map_err(|e| value_error(parameter, e.to_string()))?
            };
            log::debug!("Uprating {} using {}", parameter.name, uprater.name);
            uprated_entries(parameter, uprater, &spec)?
        };
        if !entries.is_empty() {
            get_parameter_mut(root, &path)
                .map_err(|e| UpratingError::Value {
                    parameter: path.clone(),
                    message: e.to_string(),
                })?
                .extend_values(entries);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periods::instant;
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    fn uprate(data: serde_json::Value) -> Result<ParameterNode, UpratingError> {
        let mut root = ParameterNode::from_json("", &data).unwrap();
        uprate_parameters(&mut root)?;
        Ok(root)
    }

    fn at(root: &ParameterNode, path: &str, when: &str) -> Option<f64> {
        get_leaf(root, path).unwrap().number_at(instant(when).unwrap())
    }

    #[test]
    fn test_multiplicative_law() {
        let root = uprate(json!({
            "to_be_uprated": {
                "values": {"2015-01-01": 1, "2016-01-01": 2},
                "metadata": {"uprating": "uprater"}
            },
            "uprater": {"values": {"2015-01-01": 1, "2017-01-01": 2, "2018-01-01": 3}}
        }))
        .unwrap();
        assert_eq!(at(&root, "to_be_uprated", "2016-06-01"), Some(2.0));
        assert_eq!(at(&root, "to_be_uprated", "2017-01-01"), Some(4.0));
        assert_eq!(at(&root, "to_be_uprated", "2018-01-01"), Some(6.0));
        let list = get_leaf(&root, "to_be_uprated").unwrap().values_list();
        assert_eq!(list[0].instant_str(), "2018-01-01");
    }

    #[test]
    fn test_start_instant_override() {
        let root = uprate(json!({
            "p": {
                "values": {"2015-01-01": 10, "2017-01-01": 50},
                "metadata": {"uprating": {"parameter": "index", "start_instant": "2015-01-01"}}
            },
            "index": {"values": {"2015-01-01": 1, "2016-01-01": 2}}
        }))
        .unwrap();
        assert_eq!(at(&root, "p", "2016-01-01"), Some(20.0));
        // Existing later entries are kept
        assert_eq!(at(&root, "p", "2017-01-01"), Some(50.0));
    }

    #[test]
    fn test_rounding_rules() {
        let data = |rounding: serde_json::Value, growth: f64| {
            json!({
                "p": {
                    "values": {"2015-01-01": 100},
                    "metadata": {"uprating": {"parameter": "index", "rounding": rounding}}
                },
                "index": {"values": {"2015-01-01": 1, "2016-01-01": growth}}
            })
        };
        let down = uprate(data(json!({"interval": 5, "type": "downwards"}), 1.234)).unwrap();
        assert_eq!(at(&down, "p", "2016"), Some(120.0));
        let up = uprate(data(json!({"interval": 5, "type": "upwards"}), 1.234)).unwrap();
        assert_eq!(at(&up, "p", "2016"), Some(125.0));
        let nearest = uprate(data(json!({"interval": 5, "type": "nearest"}), 1.234)).unwrap();
        assert_eq!(at(&nearest, "p", "2016"), Some(125.0));
        // 112.5 is 22.5 steps of 5; the tie rounds to the even step
        let tie = uprate(data(json!(5.0), 1.125)).unwrap();
        assert_eq!(at(&tie, "p", "2016"), Some(110.0));
    }

    #[test]
    fn test_self_uprating() {
        let root = uprate(json!({
            "p": {
                "values": {"2015-01-01": 1, "2016-01-01": 2},
                "metadata": {"uprating": "self"}
            }
        }))
        .unwrap();
        assert_eq!(at(&root, "p", "2017-01-01"), Some(4.0));
        assert_eq!(at(&root, "p", "2018-01-01"), Some(8.0));
    }

    #[test]
    fn test_missing_uprater_value_is_fatal() {
        let err = uprate(json!({
            "p": {
                "values": {"2010-01-01": 1},
                "metadata": {"uprating": "index"}
            },
            "index": {"values": {"2015-01-01": 1, "2016-01-01": 2}}
        }))
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("index"));
        assert!(message.contains("2010-01-01"));
        assert!(matches!(err, UpratingError::Value { .. }));
    }

    #[test]
    fn test_unknown_uprater_path() {
        let err = uprate(json!({
            "p": {"values": {"2015-01-01": 1}, "metadata": {"uprating": "nope"}}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_bracket_parameters_are_uprated() {
        let root = uprate(json!({
            "scale": {
                "brackets": [{
                    "threshold": {
                        "values": {"2015-01-01": 100},
                        "metadata": {"uprating": "index"}
                    },
                    "rate": {"values": {"2015-01-01": 0.1}}
                }]
            },
            "index": {"values": {"2015-01-01": 1, "2016-01-01": 1.5}}
        }))
        .unwrap();
        assert_eq!(at(&root, "scale[0].threshold", "2016"), Some(150.0));
    }

    fn cadence_tree(cadence: serde_json::Value) -> serde_json::Value {
        json!({
            "to_be_uprated": {
                "values": {"2015-04-01": 1, "2016-04-01": 2, "2017-04-01": 4},
                "metadata": {"uprating": {"parameter": "uprater", "at_defined_interval": cadence}}
            },
            "uprater": {
                "values": {
                    "2015-10-01": 2,
                    "2015-12-01": 1,
                    "2016-10-01": 4,
                    "2017-10-01": 6,
                    "2018-10-01": 3
                }
            }
        })
    }

    #[test]
    fn test_cadence_worked_example() {
        let root = uprate(cadence_tree(json!({
            "enactment": "0002-04-01",
            "start": "0000-10-01",
            "end": "0001-10-01"
        })))
        .unwrap();
        assert_eq!(at(&root, "to_be_uprated", "2018-04-01"), Some(6.0));
        assert_eq!(at(&root, "to_be_uprated", "2019-04-01"), Some(3.0));
        assert_eq!(at(&root, "to_be_uprated", "2020-04-01"), Some(3.0));
        assert_eq!(get_leaf(&root, "to_be_uprated").unwrap().values_list().len(), 5);
    }

    #[test]
    fn test_cadence_effective_override() {
        let root = uprate(cadence_tree(json!({
            "enactment": "0002-04-01",
            "start": "0000-10-01",
            "end": "0001-10-01",
            "effective": "2019-04-01"
        })))
        .unwrap();
        // Only the 2019 application remains, seeded from the 2017 value of 4
        assert_eq!(at(&root, "to_be_uprated", "2018-04-01"), Some(4.0));
        assert_eq!(at(&root, "to_be_uprated", "2019-04-01"), Some(2.0));
    }

    #[test]
    fn test_cadence_requires_all_dates() {
        let err = uprate(cadence_tree(json!({"start": "0000-10-01", "end": "0001-10-01"}))).unwrap_err();
        assert!(matches!(err, UpratingError::Syntax { .. }));
    }

    #[test]
    fn test_cadence_date_format() {
        let err = uprate(cadence_tree(json!({
            "enactment": "2-04-01",
            "start": "0000-10-01",
            "end": "0001-10-01"
        })))
        .unwrap_err();
        assert!(matches!(err, UpratingError::Syntax { .. }));
        assert!(err.to_string().contains("YYYY-MM-DD"));
    }

    #[test]
    fn test_cadence_interval_must_be_known() {
        let err = uprate(cadence_tree(json!({
            "enactment": "0002-04-01",
            "start": "0000-10-01",
            "end": "0001-10-01",
            "interval": "week"
        })))
        .unwrap_err();
        assert!(matches!(err, UpratingError::Syntax { .. }));
    }

    #[test]
    fn test_cadence_date_ordering() {
        let err = uprate(cadence_tree(json!({
            "enactment": "0002-04-01",
            "start": "0001-10-01",
            "end": "0000-10-01"
        })))
        .unwrap_err();
        assert!(err.to_string().contains("end must come after start"));

        let err = uprate(cadence_tree(json!({
            "enactment": "0001-04-01",
            "start": "0000-10-01",
            "end": "0001-10-01"
        })))
        .unwrap_err();
        assert!(err.to_string().contains("enactment must come after end"));
    }

    #[test]
    fn test_monthly_cadence() {
        let root = uprate(json!({
            "p": {
                "values": {"2020-01-01": 100},
                "metadata": {"uprating": {
                    "parameter": "index",
                    "at_defined_interval": {
                        "start": "0000-01-01",
                        "end": "0000-02-01",
                        "enactment": "0000-03-01",
                        "interval": "month"
                    }
                }}
            },
            "index": {"values": {
                "2019-11-01": 1.0,
                "2019-12-01": 1.0,
                "2020-01-01": 1.0,
                "2020-02-01": 1.1,
                "2020-03-01": 1.21
            }}
        }))
        .unwrap();
        assert_abs_diff_eq!(at(&root, "p", "2020-02-15").unwrap(), 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(at(&root, "p", "2020-03-15").unwrap(), 110.0, epsilon = 1e-9);
        assert_abs_diff_eq!(at(&root, "p", "2020-04-01").unwrap(), 121.0, epsilon = 1e-9);
    }

    #[test]
    fn test_calendar_offset() {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        let offset = CalendarOffset::between(d("0002-04-01"), d("0000-10-01")).unwrap();
        assert_eq!(offset, CalendarOffset { months: 18, days: 0 });
        assert_eq!(offset.subtract_from(d("2018-04-01")), Some(d("2016-10-01")));
        let offset = CalendarOffset::between(d("2020-03-15"), d("2020-01-31")).unwrap();
        assert_eq!(offset, CalendarOffset { months: 1, days: 15 });
    }
}
