//! Error types for the variable model and the model contract

use thiserror::Error;

use crate::variable::Kind;

/// Errors raised when applying a value to a [`crate::Variable`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VariableError {
    /// The value's kind does not match the variable's declared kind
    #[error("kind mismatch for '{name}': expected {expected}, got {got}")]
    KindMismatch { name: String, expected: Kind, got: Kind },

    /// The variable is constant and already holds its startup value
    #[error("variable '{name}' is constant and cannot be written")]
    ConstantWrite { name: String },

    /// The value payload is internally inconsistent (e.g. image data/shape disagree)
    #[error("malformed value for '{name}': {reason}")]
    MalformedValue { name: String, reason: String },
}

/// Errors raised by model evaluation or by violations of the model contract
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// The model itself failed to evaluate
    #[error("model evaluation failed: {0}")]
    Evaluation(String),

    /// A declared output variable was missing from the model's result
    #[error("model did not return declared output '{0}'")]
    MissingOutput(String),

    /// The model returned a variable that is not a declared output
    #[error("model returned undeclared output '{0}'")]
    UnknownOutput(String),

    /// A returned output's kind does not match its declaration
    #[error("output '{name}' has kind {got}, declared as {expected}")]
    OutputKindMismatch { name: String, expected: Kind, got: Kind },

    /// A declared input was absent from the evaluation inputs
    #[error("input '{0}' missing from evaluation state")]
    MissingInput(String),
}
