//! Error taxonomy for the calculation engine
//!
//! Every fallible layer has its own enum. `CalculationError` wraps the lower
//! layers so a formula can use `?` on period, parameter and storage results.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed period or instant input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeriodError {
    #[error("{0}")]
    Invalid(String),
}

impl PeriodError {
    pub(crate) fn invalid(value: impl std::fmt::Display, reason: &str) -> Self {
        PeriodError::Invalid(format!(
            "Expected a period (eg. '2017', '2017-01', 'month:2017-01', 'year:2017-03:2'); got: '{}'. {}",
            value, reason
        ))
    }
}

/// Parameter tree lookup and construction failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("{}", not_found_message(.name, .path, .suggestions))]
    NotFound {
        name: String,
        path: String,
        suggestions: Vec<String>,
    },

    #[error("{message}")]
    Path {
        message: String,
        parameter_path: String,
        failed_at: String,
    },

    #[error("Error parsing parameter '{name}': {message}")]
    Parsing { name: String, message: String },

    #[error("Parameter '{name}' is not numeric at {instant}")]
    NotANumber { name: String, instant: String },

    #[error("Scale bracket '{name}' has unexpected key '{key}'. Allowed keys are: amount, threshold, rate, average_rate, base")]
    InvalidBracketKey { name: String, key: String },
}

fn not_found_message(name: &str, path: &str, suggestions: &[String]) -> String {
    let mut message = format!("Parameter '{}' not found in path '{}'.", name, path);
    if !suggestions.is_empty() {
        message.push_str(&format!(" Did you mean: {}?", suggestions.join(", ")));
    }
    message
}

/// Uprating metadata that cannot be applied
///
/// Both variants abort tax-benefit system construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpratingError {
    #[error("Invalid uprating metadata for parameter '{parameter}': {message}")]
    Syntax { parameter: String, message: String },

    #[error("Error uprating parameter '{parameter}': {message}")]
    Value { parameter: String, message: String },
}

/// Spill-to-disk and cache file failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not decode {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not read CSV {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Invalid memory configuration: {0}")]
    Config(String),
}

/// Malformed situation input, located by its JSON path
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Situation error at '{path}': {message}")]
pub struct SituationParsingError {
    pub path: String,
    pub message: String,
}

impl SituationParsingError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Failures of a single `calculate` request
#[derive(Debug, Error)]
pub enum CalculationError {
    #[error("You tried to calculate or to set a value for variable '{name}', but it was not found in the loaded tax and benefit system.{}", suggestion_suffix(.suggestions))]
    VariableNotFound {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("Variable '{0}' is already defined. Use `update_variable` to replace it.")]
    VariableNameConflict(String),

    #[error("{0}")]
    Cycle(String),

    /// Raised by the spiral check and always converted into a defaulted outcome
    #[error("Quasicircular definition detected on formula {0}")]
    Spiral(String),

    #[error("{0}")]
    PeriodMismatch(String),

    #[error("Invalid adds/subtracts component for variable '{variable}': {message}")]
    InvalidAdds { variable: String, message: String },

    #[error("Unable to set value for variable '{variable}': expected an array of length {expected}, got {actual}")]
    InvalidArraySize {
        variable: String,
        expected: usize,
        actual: usize,
    },

    #[error("Entity '{0}' is not defined in this simulation")]
    EntityNotFound(String),

    #[error("Role '{role}' is not defined for entity '{entity}'")]
    RoleNotFound { entity: String, role: String },

    #[error("Maximum calculation depth of {depth} exceeded. Computation stack:\n{stack}")]
    StackOverflow { depth: usize, stack: String },

    #[error("Formula for '{variable}' failed: {message}")]
    Formula { variable: String, message: String },

    #[error(transparent)]
    Period(#[from] PeriodError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Uprating(#[from] UpratingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Situation(#[from] SituationParsingError),
}

fn suggestion_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" Did you mean: {}?", suggestions.join(", "))
    }
}

impl CalculationError {
    /// Shorthand for formula authors reporting domain errors
    pub fn formula(variable: impl Into<String>, message: impl Into<String>) -> Self {
        CalculationError::Formula {
            variable: variable.into(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = CalculationError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_suggestions() {
        let err = ParameterError::NotFound {
            name: "rat".to_string(),
            path: "tax.rat".to_string(),
            suggestions: vec!["rate".to_string(), "rates".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("'rat'"));
        assert!(message.ends_with("Did you mean: rate, rates?"));
    }

    #[test]
    fn test_not_found_without_suggestions() {
        let err = ParameterError::NotFound {
            name: "zzz".to_string(),
            path: "zzz".to_string(),
            suggestions: vec![],
        };
        assert!(!err.to_string().contains("Did you mean"));
    }

    #[test]
    fn test_calculation_error_wraps_period_error() {
        let err: CalculationError = PeriodError::Invalid("bad".to_string()).into();
        assert_eq!(err.to_string(), "bad");
    }
}
