//! Message types crossing the coordinator boundary
//!
//! These are the only shapes that travel between the protocol adapters and
//! the execution coordinator. Messages are immutable once created and are
//! consumed exactly once by their target queue's reader.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use varmodel::{Value, Variable};

use crate::routing::Protocol;

/// Inbound: a batch of external writes from one protocol adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableUpdate {
    /// The protocol that received the external writes
    pub origin: Protocol,

    /// Normalized values keyed by variable name
    pub changes: HashMap<String, Value>,
}

/// Whether an outbound publish carries synced inputs or model outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishKind {
    Input,
    Output,
}

/// Outbound: a snapshot of variables for an adapter to republish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatePublish {
    pub kind: PublishKind,

    /// Full variable copies; adapters never see state by reference
    pub changes: HashMap<String, Variable>,
}

/// Control requests serviced by the coordinator between cycles
#[derive(Debug)]
pub enum CoordRequest {
    /// Copy of the authoritative state
    Snapshot {
        reply_tx: oneshot::Sender<HashMap<String, Variable>>,
    },

    /// Current metrics
    GetMetrics {
        reply_tx: oneshot::Sender<CoordinatorMetrics>,
    },

    /// Stop the event loop
    Shutdown,
}

/// Coordinator metrics for observability
#[derive(Debug, Clone, Default)]
pub struct CoordinatorMetrics {
    /// Busy cycles run (one per settled burst of writes)
    pub cycles: u64,

    /// Inbound update batches merged
    pub updates_received: u64,

    /// Model evaluations completed
    pub evaluations: u64,

    /// Writes dropped (constant, unknown, or wrong-kind targets)
    pub writes_rejected: u64,

    /// Outbound publishes dropped on full or closed queues
    pub publishes_dropped: u64,
}
