//! Coordinator configuration

use serde::{Deserialize, Serialize};

/// Configuration for the execution coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Capacity of the shared inbound update queue
    #[serde(rename = "inbound-capacity")]
    pub inbound_capacity: usize,

    /// Capacity of each adapter's outbound publish queue
    #[serde(rename = "outbound-capacity")]
    pub outbound_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 64,
            outbound_capacity: 16,
        }
    }
}
