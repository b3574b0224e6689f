//! Period and instant string grammar

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use super::{DateUnit, Instant, Period};
use crate::errors::PeriodError;

/// Upper bound on interned instants; the table is emptied when it fills up.
const INSTANT_CACHE_CAPACITY: usize = 4096;

static INSTANT_CACHE: OnceLock<Mutex<HashMap<String, Instant>>> = OnceLock::new();

fn instant_cache() -> &'static Mutex<HashMap<String, Instant>> {
    INSTANT_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Parse `YYYY`, `YYYY-MM` or `YYYY-MM-DD` into an instant
///
/// Missing month and day default to 1. Results are interned by trimmed source
/// string since the same few instants are parsed on every calculation.
pub fn parse_instant(value: &str) -> Result<Instant, PeriodError> {
    let key = value.trim();
    if let Ok(guard) = instant_cache().lock() {
        if let Some(found) = guard.get(key) {
            return Ok(*found);
        }
    }

    let (_, parsed) = parse_simple(key).ok_or_else(|| {
        PeriodError::Invalid(format!(
            "'{}' is not a valid instant. Instants are described using the 'YYYY-MM-DD' format, for instance '2015-06-15'.",
            value
        ))
    })?;

    if let Ok(mut guard) = instant_cache().lock() {
        if guard.len() >= INSTANT_CACHE_CAPACITY {
            log::debug!("instant cache full at {} entries, clearing", guard.len());
            guard.clear();
        }
        guard.insert(key.to_string(), parsed);
    }
    Ok(parsed)
}

/// Parse a bare date string, returning the unit implied by its precision
fn parse_simple(value: &str) -> Option<(DateUnit, Instant)> {
    let parts: Vec<&str> = value.split('-').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    if parts
        .iter()
        .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }
    let year: i32 = parts[0].parse().ok()?;
    let month: u32 = match parts.get(1) {
        Some(m) => m.parse().ok()?,
        None => 1,
    };
    let day: u32 = match parts.get(2) {
        Some(d) => d.parse().ok()?,
        None => 1,
    };
    let unit = match parts.len() {
        1 => DateUnit::Year,
        2 => DateUnit::Month,
        _ => DateUnit::Day,
    };
    Instant::new(year, month, day).ok().map(|i| (unit, i))
}

/// Parse the period grammar
///
/// Accepts `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, `unit:simple[:size]` and `ETERNITY`.
pub fn parse_period(value: &str) -> Result<Period, PeriodError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("eternity") {
        return Ok(Period::eternity());
    }

    if let Some((unit, start)) = parse_simple(trimmed) {
        return Ok(Period::new(unit, start, 1));
    }

    if !trimmed.contains(':') {
        return Err(PeriodError::invalid(value, "Unrecognized date format."));
    }

    let components: Vec<&str> = trimmed.split(':').collect();
    if components.len() > 3 {
        return Err(PeriodError::invalid(
            value,
            "A period has at most three ':'-separated components.",
        ));
    }

    let unit: DateUnit = components[0]
        .parse()
        .map_err(|_| PeriodError::invalid(value, "The unit must be one of: day, month, year."))?;
    if unit == DateUnit::Eternity {
        return Err(PeriodError::invalid(
            value,
            "The unit must be one of: day, month, year.",
        ));
    }

    let (base_unit, start) = parse_simple(components[1])
        .ok_or_else(|| PeriodError::invalid(value, "The start of the period is not a valid date."))?;

    // "month:2014" would need to invent a month from a bare year
    if base_unit.weight() > unit.weight() {
        return Err(PeriodError::invalid(
            value,
            &format!(
                "A {} period cannot start from a date given with {} precision.",
                unit, base_unit
            ),
        ));
    }

    let size = match components.get(2) {
        Some(raw) => match raw.parse::<u32>() {
            Ok(n) if n >= 1 => n,
            _ => {
                return Err(PeriodError::invalid(
                    value,
                    "The size must be a positive integer.",
                ))
            }
        },
        None => 1,
    };

    Ok(Period::new(unit, start, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_periods_round_trip() {
        for s in ["2014", "2014-02", "2014-03-02"] {
            assert_eq!(parse_period(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_explicit_periods() {
        let p = parse_period("year:2014-3:2").unwrap();
        assert_eq!(p.unit(), DateUnit::Year);
        assert_eq!(p.start(), Instant::new(2014, 3, 1).unwrap());
        assert_eq!(p.size(), 2);

        let p = parse_period("month:2014-02:3").unwrap();
        assert_eq!(p.to_string(), "month:2014-02:3");

        let p = parse_period("day:2014-02-03").unwrap();
        assert_eq!(p.to_string(), "2014-02-03");
    }

    #[test]
    fn test_ambiguous_precision_is_rejected() {
        assert!(parse_period("month:2014").is_err());
        assert!(parse_period("day:2014-02").is_err());
    }

    #[test]
    fn test_malformed_periods_are_rejected() {
        assert!(parse_period("year:2014:2:1").is_err());
        assert!(parse_period("week:2014").is_err());
        assert!(parse_period("year:2014:0").is_err());
        assert!(parse_period("year:2014:x").is_err());
        assert!(parse_period("2014-13").is_err());
        assert!(parse_period("hello").is_err());
        assert!(parse_period("eternity:2014").is_err());
    }

    #[test]
    fn test_eternity() {
        assert_eq!(parse_period("ETERNITY").unwrap(), Period::eternity());
        assert_eq!(parse_period("eternity").unwrap(), Period::eternity());
    }

    #[test]
    fn test_instant_cache_returns_equal_values() {
        let a = parse_instant("2031-07-04").unwrap();
        let b = parse_instant("2031-07-04").unwrap();
        assert_eq!(a, b);
        assert!(parse_instant("2031-07-04:2").is_err());
        assert_eq!(parse_instant(" 2031-07-04 ").unwrap(), a);
    }

    #[test]
    fn test_instant_cache_stays_bounded() {
        for day in 0..(INSTANT_CACHE_CAPACITY + 500) {
            let year = 3000 + day / 336;
            let value = format!("{}-{:02}-{:02}", year, day % 12 + 1, day / 12 % 28 + 1);
            parse_instant(&value).unwrap();
            assert!(instant_cache().lock().unwrap().len() <= INSTANT_CACHE_CAPACITY);
        }
    }
}
