//! Client interface to a running coordinator

use std::collections::HashMap;

use eyre::{Result, eyre};
use tokio::sync::{mpsc, oneshot};
use varmodel::Variable;

use super::messages::{CoordRequest, CoordinatorMetrics};

/// Handle for interacting with the coordinator task
///
/// Cloneable; all operations go through the control channel and are
/// serviced between coordinator cycles, so a snapshot never observes a
/// half-updated state.
#[derive(Clone)]
pub struct CoordinatorHandle {
    ctrl_tx: mpsc::Sender<CoordRequest>,
}

impl CoordinatorHandle {
    pub(crate) fn new(ctrl_tx: mpsc::Sender<CoordRequest>) -> Self {
        Self { ctrl_tx }
    }

    /// Copy of the authoritative state
    pub async fn snapshot(&self) -> Result<HashMap<String, Variable>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ctrl_tx
            .send(CoordRequest::Snapshot { reply_tx })
            .await
            .map_err(|_| eyre!("Coordinator control channel closed"))?;
        reply_rx.await.map_err(|_| eyre!("Coordinator shutdown before reply"))
    }

    /// Current coordinator metrics
    pub async fn metrics(&self) -> Result<CoordinatorMetrics> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ctrl_tx
            .send(CoordRequest::GetMetrics { reply_tx })
            .await
            .map_err(|_| eyre!("Coordinator control channel closed"))?;
        reply_rx.await.map_err(|_| eyre!("Coordinator shutdown before reply"))
    }

    /// Ask the coordinator to stop its event loop
    pub async fn shutdown(&self) -> Result<()> {
        self.ctrl_tx
            .send(CoordRequest::Shutdown)
            .await
            .map_err(|_| eyre!("Coordinator control channel closed"))
    }
}
