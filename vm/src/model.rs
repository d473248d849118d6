//! The model evaluation contract
//!
//! A [`Model`] declares a fixed set of named input and output variables and
//! evaluates the full input state into a full output state. Evaluation must
//! be repeatable and independent: no hidden cross-call mutable state other
//! than what is passed in, since the call may come from a freshly spawned
//! execution context.

use std::collections::HashMap;

use crate::error::ModelError;
use crate::variable::Variable;

/// An opaque computational model exposed through process variables
pub trait Model: Send + Sync {
    /// The declared input variables, keyed by name
    fn input_variables(&self) -> HashMap<String, Variable>;

    /// The declared output variables, keyed by name
    fn output_variables(&self) -> HashMap<String, Variable>;

    /// Evaluate the model against the full input state
    ///
    /// `inputs` always contains every declared input with a value present.
    /// The result must contain exactly the declared outputs, each with a
    /// value of the declared kind; violations are treated as fatal by the
    /// caller.
    fn evaluate(&self, inputs: &HashMap<String, Variable>) -> Result<HashMap<String, Variable>, ModelError>;
}
