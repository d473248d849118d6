//! In-memory wire backend
//!
//! Stands in for a real protocol server library: handles live in a shared
//! map, posts append to a per-handle history, and a [`LoopbackClient`] plays
//! the role of an external protocol client for tests and demos.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::{PvSpec, WireBackend, WireError, WireValue, WireWrite};

const WRITE_CHANNEL_CAPACITY: usize = 64;

type PostLog = Arc<Mutex<HashMap<String, Vec<WireValue>>>>;

/// In-memory [`WireBackend`]
pub struct LoopbackWire {
    posted: PostLog,
    external: Arc<Mutex<HashMap<String, WireValue>>>,
    started: Arc<AtomicBool>,
    writes_tx: mpsc::Sender<WireWrite>,
    writes_rx: Option<mpsc::Receiver<WireWrite>>,
}

impl LoopbackWire {
    pub fn new() -> Self {
        let (writes_tx, writes_rx) = mpsc::channel(WRITE_CHANNEL_CAPACITY);
        Self {
            posted: Arc::new(Mutex::new(HashMap::new())),
            external: Arc::new(Mutex::new(HashMap::new())),
            started: Arc::new(AtomicBool::new(false)),
            writes_tx,
            writes_rx: Some(writes_rx),
        }
    }

    /// A client handle usable after the backend has been boxed away
    pub fn client(&self) -> LoopbackClient {
        LoopbackClient {
            posted: Arc::clone(&self.posted),
            external: Arc::clone(&self.external),
            started: Arc::clone(&self.started),
            writes_tx: self.writes_tx.clone(),
        }
    }
}

impl Default for LoopbackWire {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WireBackend for LoopbackWire {
    async fn start(&self, pvs: Vec<PvSpec>) -> Result<(), WireError> {
        let mut posted = self.posted.lock().await;
        for pv in pvs {
            debug!(pv = %pv.pvname, "Loopback handle created");
            posted.entry(pv.pvname).or_default().push(pv.initial);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn post(&self, pvname: &str, value: WireValue) -> Result<(), WireError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(WireError::NotStarted);
        }
        let mut posted = self.posted.lock().await;
        match posted.get_mut(pvname) {
            Some(history) => {
                history.push(value);
                Ok(())
            }
            None => Err(WireError::UnknownPv(pvname.to_string())),
        }
    }

    async fn read_external(&self, pvname: &str) -> Result<WireValue, WireError> {
        self.external
            .lock()
            .await
            .get(pvname)
            .cloned()
            .ok_or_else(|| WireError::ConnectFailed(pvname.to_string()))
    }

    fn take_writes(&mut self) -> Option<mpsc::Receiver<WireWrite>> {
        self.writes_rx.take()
    }

    async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }
}

/// External protocol client for a [`LoopbackWire`]
#[derive(Clone)]
pub struct LoopbackClient {
    posted: PostLog,
    external: Arc<Mutex<HashMap<String, WireValue>>>,
    started: Arc<AtomicBool>,
    writes_tx: mpsc::Sender<WireWrite>,
}

impl LoopbackClient {
    /// Issue a client write; delivery to the adapter is fire-and-forget
    pub async fn write(&self, pvname: &str, value: WireValue) {
        let _ = self
            .writes_tx
            .send(WireWrite {
                pvname: pvname.to_string(),
                value,
            })
            .await;
    }

    /// The current (last posted) value of a handle
    pub async fn read(&self, pvname: &str) -> Option<WireValue> {
        self.posted.lock().await.get(pvname).and_then(|history| history.last().cloned())
    }

    /// How many times a handle has been posted, including its initial value
    pub async fn post_count(&self, pvname: &str) -> usize {
        self.posted.lock().await.get(pvname).map_or(0, Vec::len)
    }

    /// Whether the backend has created its handles and is serving
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Host a value on the simulated external source (mirror seeding)
    pub async fn host_external(&self, pvname: &str, value: WireValue) {
        self.external.lock().await.insert(pvname.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_post_requires_start() {
        let wire = LoopbackWire::new();
        assert!(matches!(
            wire.post("a", WireValue::Float(1.0)).await,
            Err(WireError::NotStarted)
        ));

        wire.start(vec![PvSpec::new("a", WireValue::Float(0.0))]).await.unwrap();
        wire.post("a", WireValue::Float(1.0)).await.unwrap();

        let client = wire.client();
        assert_eq!(client.read("a").await, Some(WireValue::Float(1.0)));
        assert_eq!(client.post_count("a").await, 2);
    }

    #[tokio::test]
    async fn test_unknown_pv_rejected() {
        let wire = LoopbackWire::new();
        wire.start(vec![]).await.unwrap();
        assert!(matches!(
            wire.post("missing", WireValue::Float(1.0)).await,
            Err(WireError::UnknownPv(_))
        ));
    }

    #[tokio::test]
    async fn test_client_write_reaches_backend() {
        let mut wire = LoopbackWire::new();
        let client = wire.client();
        let mut writes = wire.take_writes().unwrap();

        client.write("a", WireValue::Float(5.0)).await;
        let write = writes.recv().await.unwrap();
        assert_eq!(write.pvname, "a");
        assert_eq!(write.value, WireValue::Float(5.0));
    }

    #[tokio::test]
    async fn test_read_external() {
        let wire = LoopbackWire::new();
        let client = wire.client();

        assert!(matches!(wire.read_external("ext:x").await, Err(WireError::ConnectFailed(_))));

        client.host_external("ext:x", WireValue::Float(7.0)).await;
        assert_eq!(wire.read_external("ext:x").await.unwrap(), WireValue::Float(7.0));
    }
}
