//! Calendar instants and periods
//!
//! A `Period` is a `(unit, start, size)` triple. Units are ordered by weight
//! (day < month < year < eternity); the weight ordering is what rejects
//! ambiguous strings such as `month:2014` and decides which ADD/DIVIDE
//! conversions are legal.

mod instant;
mod parse;
mod period;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PeriodError;

pub use instant::{instant, AsInstant, Instant};
pub use parse::{parse_instant, parse_period};
pub use period::{period, AsPeriod, Period, Subperiods};

/// Unit of a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateUnit {
    Day,
    Month,
    Year,
    Eternity,
}

impl DateUnit {
    /// Relative coarseness used to compare units
    pub fn weight(self) -> u32 {
        match self {
            DateUnit::Day => 100,
            DateUnit::Month => 200,
            DateUnit::Year => 300,
            DateUnit::Eternity => 400,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DateUnit::Day => "day",
            DateUnit::Month => "month",
            DateUnit::Year => "year",
            DateUnit::Eternity => "eternity",
        }
    }
}

impl fmt::Display for DateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateUnit {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(DateUnit::Day),
            "month" => Ok(DateUnit::Month),
            "year" => Ok(DateUnit::Year),
            "eternity" => Ok(DateUnit::Eternity),
            other => Err(PeriodError::Invalid(format!(
                "'{}' is not a valid period unit. Expected one of: day, month, year, eternity",
                other
            ))),
        }
    }
}

/// Number of days in a month of the proleptic Gregorian calendar
pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 {
                29
            } else {
                28
            }
        }
    }
}
