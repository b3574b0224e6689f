//! Variables and their formulas
//!
//! A [`Variable`] declares its entity, value type and definition period, plus
//! the ways a value can be obtained: time-windowed formulas, `adds`/`subtracts`
//! component lists, uprating from an earlier known value, or the default.

mod formula;
mod variable;

pub use formula::Formula;
pub use variable::{InputSplit, OutputMode, QuantityType, Variable};
