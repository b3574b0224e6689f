//! Calendar instant

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::parse::parse_instant;
use super::{days_in_month, DateUnit, Period};
use crate::errors::PeriodError;

/// A calendar day, ordered chronologically
///
/// Field order matters: the derived `Ord` compares year, then month, then day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Instant {
    year: i32,
    month: u32,
    day: u32,
}

impl Instant {
    /// Create a validated instant
    pub fn new(year: i32, month: u32, day: u32) -> Result<Self, PeriodError> {
        if !(0..=9999).contains(&year) {
            return Err(PeriodError::Invalid(format!(
                "Year {} is out of range (0 to 9999)",
                year
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(PeriodError::Invalid(format!(
                "Month {} is out of range (1 to 12)",
                month
            )));
        }
        if day == 0 || day > days_in_month(year, month) {
            return Err(PeriodError::Invalid(format!(
                "Day {} is out of range for {:04}-{:02}",
                day, year, month
            )));
        }
        Ok(Self { year, month, day })
    }

    /// The earliest representable instant, used as the start of eternity
    pub const MIN: Instant = Instant {
        year: 1,
        month: 1,
        day: 1,
    };

    /// The latest representable instant, used as the stop of eternity
    pub const MAX: Instant = Instant {
        year: 9999,
        month: 12,
        day: 31,
    };

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn to_date(&self) -> NaiveDate {
        // Fields are validated at construction and NaiveDate covers year 0
        NaiveDate::from_ymd_opt(self.year, self.month, self.day).unwrap_or(NaiveDate::MIN)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }

    /// Move by `n` units, clamping the day to the target month's length
    ///
    /// Offsetting by eternity leaves the instant unchanged.
    pub fn offset(&self, n: i64, unit: DateUnit) -> Instant {
        match unit {
            DateUnit::Day => Instant::from_date(self.to_date() + Duration::days(n)),
            DateUnit::Month => {
                let total = self.year as i64 * 12 + (self.month as i64 - 1) + n;
                let year = total.div_euclid(12) as i32;
                let month = (total.rem_euclid(12) + 1) as u32;
                let day = self.day.min(days_in_month(year, month));
                Instant { year, month, day }
            }
            DateUnit::Year => {
                let year = self.year + n as i32;
                let day = self.day.min(days_in_month(year, self.month));
                Instant {
                    year,
                    month: self.month,
                    day,
                }
            }
            DateUnit::Eternity => *self,
        }
    }

    /// First day of the enclosing unit
    pub fn first_of(&self, unit: DateUnit) -> Instant {
        match unit {
            DateUnit::Year => Instant {
                year: self.year,
                month: 1,
                day: 1,
            },
            DateUnit::Month => Instant {
                year: self.year,
                month: self.month,
                day: 1,
            },
            DateUnit::Day | DateUnit::Eternity => *self,
        }
    }

    /// Last day of the enclosing unit
    pub fn last_of(&self, unit: DateUnit) -> Instant {
        match unit {
            DateUnit::Year => Instant {
                year: self.year,
                month: 12,
                day: 31,
            },
            DateUnit::Month => Instant {
                year: self.year,
                month: self.month,
                day: days_in_month(self.year, self.month),
            },
            DateUnit::Day | DateUnit::Eternity => *self,
        }
    }

    /// Whole days from `self` to `other`
    pub fn days_until(&self, other: &Instant) -> i64 {
        (other.to_date() - self.to_date()).num_days()
    }

    /// Single-unit period starting at this instant
    pub fn period(&self, unit: DateUnit) -> Period {
        Period::new(unit, *self, 1)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl TryFrom<String> for Instant {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_instant(&value)
    }
}

impl From<Instant> for String {
    fn from(value: Instant) -> Self {
        value.to_string()
    }
}

/// Values that can be normalized into an `Instant`
pub trait AsInstant {
    fn as_instant(&self) -> Result<Instant, PeriodError>;
}

impl AsInstant for Instant {
    fn as_instant(&self) -> Result<Instant, PeriodError> {
        Ok(*self)
    }
}

impl AsInstant for str {
    fn as_instant(&self) -> Result<Instant, PeriodError> {
        parse_instant(self)
    }
}

impl AsInstant for String {
    fn as_instant(&self) -> Result<Instant, PeriodError> {
        parse_instant(self)
    }
}

impl AsInstant for i32 {
    fn as_instant(&self) -> Result<Instant, PeriodError> {
        Instant::new(*self, 1, 1)
    }
}

impl AsInstant for (i32, u32, u32) {
    fn as_instant(&self) -> Result<Instant, PeriodError> {
        Instant::new(self.0, self.1, self.2)
    }
}

impl AsInstant for NaiveDate {
    fn as_instant(&self) -> Result<Instant, PeriodError> {
        Ok(Instant::from_date(*self))
    }
}

impl AsInstant for Period {
    fn as_instant(&self) -> Result<Instant, PeriodError> {
        Ok(self.start())
    }
}

impl<T: AsInstant + ?Sized> AsInstant for &T {
    fn as_instant(&self) -> Result<Instant, PeriodError> {
        (**self).as_instant()
    }
}

/// Normalize a string, year, tuple, date or period into an instant
pub fn instant(value: impl AsInstant) -> Result<Instant, PeriodError> {
    value.as_instant()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> Instant {
        Instant::new(y, m, d).unwrap()
    }

    #[test]
    fn test_display() {
        assert_eq!(at(2014, 3, 2).to_string(), "2014-03-02");
        assert_eq!(at(0, 1, 1).to_string(), "0000-01-01");
    }

    #[test]
    fn test_rejects_invalid_dates() {
        assert!(Instant::new(2021, 2, 29).is_err());
        assert!(Instant::new(2021, 13, 1).is_err());
        assert!(Instant::new(2021, 1, 0).is_err());
    }

    #[test]
    fn test_offset_months_clamps_day() {
        assert_eq!(at(2014, 1, 31).offset(1, DateUnit::Month), at(2014, 2, 28));
        assert_eq!(at(2014, 1, 15).offset(-1, DateUnit::Month), at(2013, 12, 15));
        assert_eq!(at(2014, 11, 1).offset(14, DateUnit::Month), at(2016, 1, 1));
    }

    #[test]
    fn test_offset_years_and_days() {
        assert_eq!(at(2016, 2, 29).offset(1, DateUnit::Year), at(2017, 2, 28));
        assert_eq!(at(2014, 12, 31).offset(1, DateUnit::Day), at(2015, 1, 1));
        assert_eq!(at(2015, 3, 1).offset(-1, DateUnit::Day), at(2015, 2, 28));
    }

    #[test]
    fn test_first_and_last_of() {
        let i = at(2014, 5, 17);
        assert_eq!(i.first_of(DateUnit::Year), at(2014, 1, 1));
        assert_eq!(i.first_of(DateUnit::Month), at(2014, 5, 1));
        assert_eq!(i.last_of(DateUnit::Month), at(2014, 5, 31));
        assert_eq!(i.last_of(DateUnit::Year), at(2014, 12, 31));
    }

    #[test]
    fn test_instant_normalization() {
        assert_eq!(instant("2014").unwrap(), at(2014, 1, 1));
        assert_eq!(instant("2014-02").unwrap(), at(2014, 2, 1));
        assert_eq!(instant(2014).unwrap(), at(2014, 1, 1));
        assert_eq!(instant((2014, 2, 3)).unwrap(), at(2014, 2, 3));
        assert!(instant("2014-02-30").is_err());
    }

    #[test]
    fn test_ordering_is_chronological() {
        assert!(at(2014, 12, 31) < at(2015, 1, 1));
        assert!(at(2015, 1, 2) > at(2015, 1, 1));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&at(2020, 4, 1)).unwrap();
        assert_eq!(json, "\"2020-04-01\"");
        let back: Instant = serde_json::from_str(&json).unwrap();
        assert_eq!(back, at(2020, 4, 1));
    }
}
