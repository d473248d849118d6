//! Server lifecycle
//!
//! Builds the queues and flags, spawns the coordinator and one task per
//! protocol adapter, and owns shutdown: cooperative first (a watch flag each
//! component polls), escalating to abort after a grace period. A fatal
//! signal from any component tears the whole server down; protocols are
//! never left individually inconsistent.

use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, eyre};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use varmodel::Model;

use crate::adapter::{Adapter, AdapterLinks, CaTranslator, ProtocolTranslator, PvaTranslator};
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorHandle, CoordinatorMetrics, RunningIndicator};
use crate::routing::{Protocol, Routing};
use crate::wire::WireBackend;

/// A model server over one or more protocol backends
pub struct Server {
    model: Arc<dyn Model>,
    routing: Routing,
    config: Config,
    backends: Vec<(Protocol, Box<dyn WireBackend>)>,
}

impl Server {
    pub fn new(model: Arc<dyn Model>, routing: Routing, config: Config) -> Self {
        Self {
            model,
            routing,
            config,
            backends: Vec::new(),
        }
    }

    /// Attach a wire backend for a protocol
    pub fn with_backend(mut self, protocol: Protocol, backend: Box<dyn WireBackend>) -> Self {
        self.backends.push((protocol, backend));
        self
    }

    /// Validate, spawn everything, and return a handle for driving shutdown
    pub fn start(self) -> Result<ServerHandle> {
        if self.backends.is_empty() {
            return Err(eyre!("at least one protocol backend must be configured"));
        }

        let protocols: Vec<Protocol> = self.backends.iter().map(|(protocol, _)| *protocol).collect();
        for (i, protocol) in protocols.iter().enumerate() {
            if protocols[..i].contains(protocol) {
                return Err(eyre!("protocol '{}' configured twice", protocol));
            }
        }

        self.config.validate()?;
        self.routing.validate(self.model.as_ref(), &protocols)?;

        let routing = Arc::new(self.routing);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fatal_tx, fatal_rx) = mpsc::channel(4);
        let indicator = RunningIndicator::new();

        let mut coordinator = Coordinator::new(
            Arc::clone(&self.model),
            Arc::clone(&routing),
            self.config.coordinator.clone(),
            indicator.clone(),
            shutdown_rx.clone(),
            fatal_tx.clone(),
        );
        let coordinator_handle = coordinator.handle();
        let in_tx = coordinator.inbound_sender();

        let mut tasks: Vec<(String, JoinHandle<Result<()>>)> = Vec::new();

        for (protocol, backend) in self.backends {
            let out_rx = coordinator.register_adapter(protocol);
            let translator: Box<dyn ProtocolTranslator> = match protocol {
                Protocol::Ca => Box::new(CaTranslator),
                Protocol::Pva => Box::new(PvaTranslator),
            };

            let adapter = Adapter::new(
                translator,
                backend,
                self.model.as_ref(),
                Arc::clone(&routing),
                AdapterLinks {
                    in_tx: in_tx.clone(),
                    out_rx,
                    indicator: indicator.clone(),
                    shutdown_rx: shutdown_rx.clone(),
                    fatal_tx: fatal_tx.clone(),
                },
                self.config.adapter.clone(),
            );

            tasks.push((format!("adapter-{protocol}"), tokio::spawn(adapter.run())));
        }

        tasks.push(("coordinator".to_string(), tokio::spawn(coordinator.run())));

        info!(protocols = protocols.len(), "Server started");

        Ok(ServerHandle {
            shutdown_tx,
            fatal_rx,
            coordinator: coordinator_handle,
            tasks,
            grace: Duration::from_secs(self.config.shutdown.grace_period_secs),
        })
    }
}

/// Handle to a running server
pub struct ServerHandle {
    shutdown_tx: watch::Sender<bool>,
    fatal_rx: mpsc::Receiver<String>,
    coordinator: CoordinatorHandle,
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
    grace: Duration,
}

impl ServerHandle {
    /// Control handle to the coordinator
    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Copy of the authoritative state
    pub async fn snapshot(&self) -> Result<std::collections::HashMap<String, varmodel::Variable>> {
        self.coordinator.snapshot().await
    }

    /// Current coordinator metrics
    pub async fn metrics(&self) -> Result<CoordinatorMetrics> {
        self.coordinator.metrics().await
    }

    /// Request cooperative shutdown of every component
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait until any component raises a fatal error
    ///
    /// Returns None if all fatal senders are gone (normal shutdown).
    pub async fn wait_fatal(&mut self) -> Option<String> {
        self.fatal_rx.recv().await
    }

    /// Shut down and wait for every component within the grace period
    ///
    /// Components that do not exit in time are aborted. Returns an error if
    /// any component reported a fatal failure, so the process exits
    /// non-zero after a fatal model error.
    pub async fn join(mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        let mut failure: Option<String> = self.fatal_rx.try_recv().ok();

        for (name, mut task) in self.tasks {
            match tokio::time::timeout(self.grace, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(report))) => {
                    warn!(task = %name, "Component exited with error: {report}");
                    failure.get_or_insert(report.to_string());
                }
                Ok(Err(join_err)) => {
                    warn!(task = %name, "Component panicked: {join_err}");
                    failure.get_or_insert(format!("{name} panicked"));
                }
                Err(_) => {
                    warn!(task = %name, "Component did not stop within the grace period; aborting");
                    task.abort();
                }
            }
        }

        if let Ok(reason) = self.fatal_rx.try_recv() {
            failure.get_or_insert(reason);
        }

        match failure {
            Some(reason) => Err(eyre!(reason)),
            None => {
                info!("Server stopped");
                Ok(())
            }
        }
    }
}
