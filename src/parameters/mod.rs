//! Legislative parameters
//!
//! This module provides:
//! - Time-varying leaf parameters with exact interval splicing (`Parameter::update`)
//! - A copy-on-write parameter tree with scales and brackets
//! - At-instant snapshots with dotted access and vectorial indexing
//! - Path lookup with bracket indexing (`get_parameter`)
//! - Uprating: extrapolation of values with another parameter as index
//!
//! # Example
//!
//! ```rust,ignore
//! use microsim_engine::parameters::{ParameterNode, uprate_parameters};
//! use microsim_engine::periods::instant;
//!
//! let mut root = ParameterNode::from_json("", &data)?;
//! uprate_parameters(&mut root)?;
//! let rate = root.get_at_instant(instant("2024")?).value("tax.rate")?;
//! ```

mod at_instant;
mod get_parameter;
mod node;
mod parameter;
mod uprating;

pub use at_instant::{
    AtInstantValue, BracketAtInstant, ParameterNodeAtInstant, ScaleAtInstant, VectorialNodeAtInstant,
    VectorialValue,
};
pub use get_parameter::{get_leaf, get_parameter, get_parameter_mut, ParameterRef};
pub use node::{ParameterChild, ParameterNode, ParameterScale, ParameterScaleBracket, BRACKET_KEYS};
pub use parameter::{Parameter, ParameterAtInstant, ParameterValue};
pub use uprating::{uprate_parameters, uprated_entries, CadenceSpec, Rounding, RoundingKind, UpratingSpec};
