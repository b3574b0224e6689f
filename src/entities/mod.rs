//! Entities, roles and populations
//!
//! One person entity and any number of group entities. A group population
//! carries the membership of every person and exposes the aggregation and
//! projection helpers formulas use to move values between entities.

mod entity;
mod population;

pub use entity::{Entity, Role};
pub use population::{Members, Population};
