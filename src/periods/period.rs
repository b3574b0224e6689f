//! Time period: a unit, a start instant and a size

use std::fmt;

use serde::{Deserialize, Serialize};

use super::parse::parse_period;
use super::{DateUnit, Instant};
use crate::errors::PeriodError;

/// An interval of `size` consecutive `unit`s starting at `start`
///
/// Eternity has size `u32::MAX` by convention and contains every period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    unit: DateUnit,
    start: Instant,
    size: u32,
}

impl Period {
    pub fn new(unit: DateUnit, start: Instant, size: u32) -> Self {
        if unit == DateUnit::Eternity {
            return Self::eternity();
        }
        Self {
            unit,
            start,
            size: size.max(1),
        }
    }

    pub fn eternity() -> Self {
        Self {
            unit: DateUnit::Eternity,
            start: Instant::MIN,
            size: u32::MAX,
        }
    }

    pub fn unit(&self) -> DateUnit {
        self.unit
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_eternity(&self) -> bool {
        self.unit == DateUnit::Eternity
    }

    /// Last day covered by the period
    pub fn stop(&self) -> Instant {
        let size = self.size as i64;
        match self.unit {
            DateUnit::Eternity => Instant::MAX,
            DateUnit::Day => self.start.offset(size - 1, DateUnit::Day),
            DateUnit::Month | DateUnit::Year => self
                .start
                .offset(size, self.unit)
                .offset(-1, DateUnit::Day),
        }
    }

    /// Whether `other` lies entirely within this period
    pub fn contains(&self, other: &Period) -> bool {
        if self.is_eternity() {
            return true;
        }
        if other.is_eternity() {
            return false;
        }
        self.start <= other.start && other.stop() <= self.stop()
    }

    /// Shift the start by `n` of the period's own unit
    pub fn offset(&self, n: i64) -> Period {
        self.offset_by(n, self.unit)
    }

    /// Shift the start by `n` of an arbitrary unit, keeping unit and size
    pub fn offset_by(&self, n: i64, unit: DateUnit) -> Period {
        if self.is_eternity() {
            return *self;
        }
        Period {
            unit: self.unit,
            start: self.start.offset(n, unit),
            size: self.size,
        }
    }

    pub fn this_year(&self) -> Period {
        Period::new(DateUnit::Year, self.start.first_of(DateUnit::Year), 1)
    }

    pub fn last_year(&self) -> Period {
        self.this_year().offset(-1)
    }

    pub fn first_month(&self) -> Period {
        Period::new(DateUnit::Month, self.start.first_of(DateUnit::Month), 1)
    }

    pub fn last_month(&self) -> Period {
        self.first_month().offset(-1)
    }

    pub fn first_day(&self) -> Period {
        Period::new(DateUnit::Day, self.start, 1)
    }

    pub fn size_in_months(&self) -> Result<u32, PeriodError> {
        match self.unit {
            DateUnit::Year => Ok(self.size * 12),
            DateUnit::Month => Ok(self.size),
            _ => Err(PeriodError::Invalid(format!(
                "Cannot calculate number of months in a {} period",
                self.unit
            ))),
        }
    }

    pub fn size_in_days(&self) -> Result<u32, PeriodError> {
        match self.unit {
            DateUnit::Day => Ok(self.size),
            DateUnit::Month | DateUnit::Year => {
                Ok((self.start.days_until(&self.stop()) + 1) as u32)
            }
            DateUnit::Eternity => Err(PeriodError::Invalid(
                "Cannot calculate number of days in eternity".to_string(),
            )),
        }
    }

    /// Consecutive single-unit periods covering this one
    pub fn get_subperiods(&self, unit: DateUnit) -> Result<Subperiods, PeriodError> {
        if self.is_eternity() || unit == DateUnit::Eternity {
            return Err(PeriodError::Invalid(format!(
                "Cannot subdivide {} into {} periods",
                self, unit
            )));
        }
        if self.unit.weight() < unit.weight() {
            return Err(PeriodError::Invalid(format!(
                "Cannot subdivide {} into {} periods: the unit is larger than the period's",
                self, unit
            )));
        }
        let (first, remaining) = match unit {
            DateUnit::Year => (Period::new(DateUnit::Year, self.start, 1), self.size),
            DateUnit::Month => (self.first_month(), self.size_in_months()?),
            _ => (self.first_day(), self.size_in_days()?),
        };
        Ok(Subperiods {
            next: first,
            remaining,
        })
    }
}

/// Lazy iterator over sub-periods
#[derive(Debug, Clone)]
pub struct Subperiods {
    next: Period,
    remaining: u32,
}

impl Iterator for Subperiods {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next;
        self.next = current.offset(1);
        self.remaining -= 1;
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

impl ExactSizeIterator for Subperiods {}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (year, month, day) = (self.start.year(), self.start.month(), self.start.day());
        match (self.unit, self.size) {
            (DateUnit::Eternity, _) => write!(f, "ETERNITY"),
            (DateUnit::Year, 1) | (DateUnit::Month, 12) => {
                if month == 1 {
                    write!(f, "{:04}", year)
                } else {
                    write!(f, "year:{:04}-{:02}", year, month)
                }
            }
            (DateUnit::Month, 1) => write!(f, "{:04}-{:02}", year, month),
            (DateUnit::Year, size) if month == 1 => write!(f, "year:{:04}:{}", year, size),
            (DateUnit::Day, 1) => write!(f, "{:04}-{:02}-{:02}", year, month, day),
            (DateUnit::Day, size) => {
                write!(f, "day:{:04}-{:02}-{:02}:{}", year, month, day, size)
            }
            (unit, size) => write!(f, "{}:{:04}-{:02}:{}", unit, year, month, size),
        }
    }
}

impl TryFrom<String> for Period {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_period(&value)
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.to_string()
    }
}

/// Values that can be normalized into a `Period`
pub trait AsPeriod {
    fn as_period(&self) -> Result<Period, PeriodError>;
}

impl AsPeriod for Period {
    fn as_period(&self) -> Result<Period, PeriodError> {
        Ok(*self)
    }
}

impl AsPeriod for str {
    fn as_period(&self) -> Result<Period, PeriodError> {
        parse_period(self)
    }
}

impl AsPeriod for String {
    fn as_period(&self) -> Result<Period, PeriodError> {
        parse_period(self)
    }
}

impl AsPeriod for i32 {
    fn as_period(&self) -> Result<Period, PeriodError> {
        Ok(Period::new(DateUnit::Year, Instant::new(*self, 1, 1)?, 1))
    }
}

impl AsPeriod for Instant {
    fn as_period(&self) -> Result<Period, PeriodError> {
        Ok(Period::new(DateUnit::Day, *self, 1))
    }
}

impl<T: AsPeriod + ?Sized> AsPeriod for &T {
    fn as_period(&self) -> Result<Period, PeriodError> {
        (**self).as_period()
    }
}

/// Normalize a string, year, instant or period into a canonical period
pub fn period(value: impl AsPeriod) -> Result<Period, PeriodError> {
    value.as_period()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Period {
        period(s).unwrap()
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(p("2014").to_string(), "2014");
        assert_eq!(p("year:2014-03").to_string(), "year:2014-03");
        assert_eq!(p("year:2014:3").to_string(), "year:2014:3");
        assert_eq!(p("month:2014-02:3").to_string(), "month:2014-02:3");
        assert_eq!(p("day:2014-02-03:3").to_string(), "day:2014-02-03:3");
        assert_eq!(Period::eternity().to_string(), "ETERNITY");
    }

    #[test]
    fn test_stop() {
        assert_eq!(p("2014").stop().to_string(), "2014-12-31");
        assert_eq!(p("2014-02").stop().to_string(), "2014-02-28");
        assert_eq!(p("month:2014-11:3").stop().to_string(), "2015-01-31");
        assert_eq!(p("day:2014-02-27:3").stop().to_string(), "2014-03-01");
    }

    #[test]
    fn test_contains() {
        assert!(p("2014").contains(&p("2014-06")));
        assert!(p("2014").contains(&p("2014")));
        assert!(!p("2014-06").contains(&p("2014")));
        assert!(!p("2014").contains(&p("month:2014-12:2")));
        assert!(Period::eternity().contains(&p("2014")));
        assert!(!p("2014").contains(&Period::eternity()));
    }

    #[test]
    fn test_year_subperiods_are_twelve_months() {
        let months: Vec<String> = p("2014")
            .get_subperiods(DateUnit::Month)
            .unwrap()
            .map(|m| m.to_string())
            .collect();
        assert_eq!(months.len(), 12);
        assert_eq!(months[0], "2014-01");
        assert_eq!(months[11], "2014-12");
    }

    #[test]
    fn test_subperiods_in_days_and_years() {
        assert_eq!(p("2016-02").get_subperiods(DateUnit::Day).unwrap().count(), 29);
        let years: Vec<Period> = p("year:2014:3")
            .get_subperiods(DateUnit::Year)
            .unwrap()
            .collect();
        assert_eq!(years, vec![p("2014"), p("2015"), p("2016")]);
    }

    #[test]
    fn test_subperiods_reject_larger_unit() {
        assert!(p("2014-01").get_subperiods(DateUnit::Year).is_err());
        assert!(Period::eternity().get_subperiods(DateUnit::Year).is_err());
    }

    #[test]
    fn test_conversion_helpers() {
        assert_eq!(p("2014-05").this_year(), p("2014"));
        assert_eq!(p("2014").first_month(), p("2014-01"));
        assert_eq!(p("2014-01").last_month(), p("2013-12"));
        assert_eq!(p("2014-05").last_year(), p("2013"));
        assert_eq!(p("2014").offset(2), p("2016"));
        assert_eq!(p("2014").size_in_days().unwrap(), 365);
        assert_eq!(p("year:2014:2").size_in_months().unwrap(), 24);
    }

    #[test]
    fn test_period_from_other_values() {
        assert_eq!(period(2014).unwrap(), p("2014"));
        let day = Instant::new(2014, 2, 3).unwrap();
        assert_eq!(period(day).unwrap(), p("2014-02-03"));
        assert_eq!(period(p("2014")).unwrap(), p("2014"));
    }
}
