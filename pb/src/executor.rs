//! Model executor
//!
//! Wraps the opaque model behind a contract check: every evaluation must
//! return exactly the declared outputs, each carrying a value of the
//! declared kind. The call runs on a blocking thread so a model may compute
//! for as long as it needs; the coordinator deliberately offers no timeout,
//! since a timed-out-but-still-running evaluation could race a later one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use varmodel::{Kind, Model, ModelError, Variable};

/// Executes the model and enforces its output contract
pub struct ModelExecutor {
    model: Arc<dyn Model>,
    declared_outputs: HashMap<String, Kind>,
}

impl ModelExecutor {
    pub fn new(model: Arc<dyn Model>) -> Self {
        let declared_outputs = model
            .output_variables()
            .into_iter()
            .map(|(name, variable)| (name, variable.kind()))
            .collect();
        Self { model, declared_outputs }
    }

    /// Evaluate the model against the full variable state
    ///
    /// A panicking model surfaces here as an evaluation error; the caller
    /// treats both the same way (fatal).
    pub async fn evaluate(&self, inputs: HashMap<String, Variable>) -> Result<HashMap<String, Variable>, ModelError> {
        let model = Arc::clone(&self.model);
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || model.evaluate(&inputs)).await;
        let outputs = match result {
            Ok(outputs) => outputs?,
            Err(join_err) => return Err(ModelError::Evaluation(format!("model panicked: {join_err}"))),
        };

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model evaluation finished"
        );

        self.check_contract(&outputs)?;
        Ok(outputs)
    }

    fn check_contract(&self, outputs: &HashMap<String, Variable>) -> Result<(), ModelError> {
        for (name, declared) in &self.declared_outputs {
            let Some(variable) = outputs.get(name) else {
                return Err(ModelError::MissingOutput(name.clone()));
            };

            let Some(value) = &variable.value else {
                return Err(ModelError::MissingOutput(name.clone()));
            };

            if value.kind() != *declared {
                return Err(ModelError::OutputKindMismatch {
                    name: name.clone(),
                    expected: *declared,
                    got: value.kind(),
                });
            }
        }

        for name in outputs.keys() {
            if !self.declared_outputs.contains_key(name) {
                return Err(ModelError::UnknownOutput(name.clone()));
            }
        }

        Ok(())
    }
}
