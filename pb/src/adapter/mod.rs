//! Protocol adapters
//!
//! An adapter owns the protocol-native representation of the variables its
//! protocol carries: it seeds them at startup, forwards external writes to
//! the coordinator as normalized update events, and republishes coordinator
//! publishes in protocol-native form. Concrete adapters differ only in
//! their [`ProtocolTranslator`]; the runtime here is shared.

pub mod ca;
pub mod pva;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use varmodel::{Model, Value, Variable};

use crate::coordinator::{PublishKind, RunningIndicator, StatePublish, VariableUpdate};
use crate::routing::{Protocol, Routing, RoutingEntry};
use crate::wire::{PvSpec, WireBackend, WireValue, WireWrite};

pub use ca::CaTranslator;
pub use pva::PvaTranslator;

/// Adapter tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// How often cached writes are retried against the inbound queue
    #[serde(rename = "flush-interval-ms")]
    pub flush_interval_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self { flush_interval_ms: 50 }
    }
}

/// Protocol-specific translation between variables and wire handles
pub trait ProtocolTranslator: Send {
    fn protocol(&self) -> Protocol;

    /// Native handle specs for one served variable, children included
    fn handles(&self, variable: &Variable, entry: &RoutingEntry) -> Vec<PvSpec>;

    /// `(pvname, value)` posts that republish the variable's current value
    fn posts(&self, variable: &Variable, entry: &RoutingEntry) -> Vec<(String, WireValue)>;

    /// Child pvnames of a variable; these are read-back handles and reject writes
    fn child_pvnames(&self, variable: &Variable, entry: &RoutingEntry) -> Vec<String>;

    /// Convert an external write payload into a typed value for the variable
    fn to_value(&self, wire: WireValue, variable: &Variable) -> Option<Value>;
}

/// Channels wiring an adapter to the coordinator and the lifecycle manager
pub struct AdapterLinks {
    pub in_tx: mpsc::Sender<VariableUpdate>,
    pub out_rx: mpsc::Receiver<StatePublish>,
    pub indicator: RunningIndicator,
    pub shutdown_rx: watch::Receiver<bool>,
    pub fatal_tx: mpsc::Sender<String>,
}

enum Step {
    Shutdown,
    Write(WireWrite),
    Publish(StatePublish),
    Flush,
}

/// The shared adapter runtime
pub struct Adapter {
    protocol: Protocol,
    translator: Box<dyn ProtocolTranslator>,
    wire: Box<dyn WireBackend>,
    routing: Arc<Routing>,
    config: AdapterConfig,

    /// Local snapshot of variable definitions and last known values
    variables: HashMap<String, Variable>,
    input_names: HashSet<String>,
    pvname_to_varname: HashMap<String, String>,
    child_pvnames: HashSet<String>,

    links: AdapterLinks,

    /// Writes cached while the coordinator is busy or the queue is full
    pending: HashMap<String, Value>,
    started: bool,
}

impl Adapter {
    pub fn new(
        translator: Box<dyn ProtocolTranslator>,
        wire: Box<dyn WireBackend>,
        model: &dyn Model,
        routing: Arc<Routing>,
        links: AdapterLinks,
        config: AdapterConfig,
    ) -> Self {
        let protocol = translator.protocol();
        let inputs = model.input_variables();
        let input_names: HashSet<String> = inputs.keys().cloned().collect();

        let mut variables = inputs;
        variables.extend(model.output_variables());

        let pvname_to_varname = routing.pvname_to_varname();

        let mut child_pvnames = HashSet::new();
        for (name, variable) in &variables {
            if let Some(entry) = routing.entry(name) {
                child_pvnames.extend(translator.child_pvnames(variable, entry));
            }
        }

        Self {
            protocol,
            translator,
            wire,
            routing,
            config,
            variables,
            input_names,
            pvname_to_varname,
            child_pvnames,
            links,
            pending: HashMap::new(),
            started: false,
        }
    }

    /// Run the adapter until shutdown
    ///
    /// Startup failures (an unreachable external source for a mirrored
    /// variable) raise the fatal signal so the whole process is torn down:
    /// there is no safe default for an externally authoritative value.
    pub async fn run(mut self) -> Result<()> {
        if let Err(report) = self.startup().await {
            let _ = self
                .links
                .fatal_tx
                .try_send(format!("{} adapter startup failed: {report}", self.protocol));
            return Err(report);
        }

        if !self.started {
            // shutdown arrived before the first output publish
            return Ok(());
        }

        let mut writes = self
            .wire
            .take_writes()
            .ok_or_else(|| eyre!("wire backend provides no write stream"))?;
        let mut flush = tokio::time::interval(Duration::from_millis(self.config.flush_interval_ms));

        loop {
            let step = tokio::select! {
                changed = self.links.shutdown_rx.changed() => {
                    if changed.is_err() || *self.links.shutdown_rx.borrow() {
                        Step::Shutdown
                    } else {
                        Step::Flush
                    }
                }
                write = writes.recv() => match write {
                    Some(write) => Step::Write(write),
                    None => Step::Shutdown,
                },
                publish = self.links.out_rx.recv() => match publish {
                    Some(publish) => Step::Publish(publish),
                    None => Step::Shutdown,
                },
                _ = flush.tick() => Step::Flush,
            };

            match step {
                Step::Shutdown => break,
                Step::Write(write) => self.on_external_write(write).await,
                Step::Publish(publish) => {
                    self.merge_publish(&publish);
                    self.post_publish(&publish).await;
                }
                Step::Flush => self.flush_pending(),
            }
        }

        self.wire.stop().await;
        info!(protocol = %self.protocol, "Adapter stopped");
        Ok(())
    }

    /// Seed carried inputs, wait for the first output publish, start the wire
    async fn startup(&mut self) -> Result<()> {
        let mut seed: HashMap<String, Value> = HashMap::new();

        for (name, variable) in &self.variables {
            if !self.input_names.contains(name) {
                continue;
            }
            let Some(entry) = self.routing.entry(name) else { continue };
            if !entry.protocol.carries(self.protocol) {
                continue;
            }

            let value = if entry.serve {
                variable.default.clone()
            } else {
                // mirrored variable: blocking read of the external source
                let wire_value = self
                    .wire
                    .read_external(&entry.pvname)
                    .await
                    .context(format!("Unable to connect to {}", entry.pvname))?;
                self.translator
                    .to_value(wire_value, variable)
                    .ok_or_else(|| eyre!("external value for '{}' has an unexpected shape", name))?
            };

            seed.insert(name.clone(), value);
        }

        // sent even when empty: the coordinator treats the startup batch as
        // its trigger for the initial evaluation
        self.links
            .in_tx
            .send(VariableUpdate {
                origin: self.protocol,
                changes: seed,
            })
            .await
            .map_err(|_| eyre!("inbound queue closed during startup"))?;

        // hold until the first model outputs arrive so every handle starts
        // with a real value
        loop {
            let publish = tokio::select! {
                changed = self.links.shutdown_rx.changed() => {
                    if changed.is_err() || *self.links.shutdown_rx.borrow() {
                        return Ok(());
                    }
                    continue;
                }
                publish = self.links.out_rx.recv() => publish,
            };

            match publish {
                Some(publish) => {
                    let is_output = publish.kind == PublishKind::Output;
                    self.merge_publish(&publish);
                    if is_output {
                        break;
                    }
                }
                None => return Err(eyre!("outbound queue closed during startup")),
            }
        }

        let mut pvs = Vec::new();
        for (name, variable) in &self.variables {
            let Some(entry) = self.routing.entry(name) else { continue };
            if !entry.protocol.carries(self.protocol) || !entry.serve {
                continue;
            }
            pvs.extend(self.translator.handles(variable, entry));
        }

        let count = pvs.len();
        self.wire.start(pvs).await?;
        self.started = true;
        info!(protocol = %self.protocol, handles = count, "Adapter serving");
        Ok(())
    }

    /// Normalize an external write and cache it for the coordinator
    async fn on_external_write(&mut self, write: WireWrite) {
        if self.child_pvnames.contains(&write.pvname) {
            warn!(pv = %write.pvname, "Rejecting write to read-back field");
            return;
        }

        let Some(name) = self.pvname_to_varname.get(&write.pvname).cloned() else {
            warn!(pv = %write.pvname, "Rejecting write to unknown pv");
            return;
        };

        if !self.input_names.contains(&name) {
            warn!(
                variable = %name,
                "Rejecting write: output variables only change via model evaluation"
            );
            return;
        }

        let Some(entry) = self.routing.entry(&name).cloned() else {
            return;
        };

        let accepted = {
            let Some(variable) = self.variables.get_mut(&name) else {
                return;
            };

            if variable.is_constant {
                debug!(variable = %name, "Dropping write to constant variable");
                return;
            }

            let Some(value) = self.translator.to_value(write.value, variable) else {
                warn!(variable = %name, "Discarding write with an unexpected shape");
                return;
            };

            match variable.apply(value.clone()) {
                Ok(()) => Some(value),
                Err(err) => {
                    warn!(variable = %name, %err, "Discarding write");
                    None
                }
            }
        };

        let Some(value) = accepted else { return };

        // reflect the accepted write on our own handles right away; the
        // coordinator will not echo it back to us
        if entry.serve
            && let Some(variable) = self.variables.get(&name)
        {
            for (pvname, wire_value) in self.translator.posts(variable, &entry) {
                if let Err(err) = self.wire.post(&pvname, wire_value).await {
                    warn!(pv = %pvname, %err, "Failed to post local echo");
                }
            }
        }

        self.pending.insert(name, value);
        if !self.links.indicator.is_running() {
            self.flush_pending();
        }
    }

    /// Fire-and-forget the cached batch at the coordinator
    fn flush_pending(&mut self) {
        if self.pending.is_empty() || self.links.indicator.is_running() {
            return;
        }

        let changes = std::mem::take(&mut self.pending);
        match self.links.in_tx.try_send(VariableUpdate {
            origin: self.protocol,
            changes,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                debug!(protocol = %self.protocol, "Inbound queue full; keeping writes cached");
                self.pending = update.changes;
            }
            Err(TrySendError::Closed(_)) => {
                warn!(protocol = %self.protocol, "Inbound queue closed; dropping cached writes");
            }
        }
    }

    /// Update the local snapshot from a coordinator publish
    fn merge_publish(&mut self, publish: &StatePublish) {
        for (name, variable) in &publish.changes {
            self.variables.insert(name.clone(), variable.clone());
        }
    }

    /// Republish a coordinator publish in protocol-native form
    async fn post_publish(&mut self, publish: &StatePublish) {
        debug!(
            protocol = %self.protocol,
            kind = ?publish.kind,
            variables = publish.changes.len(),
            "Republishing"
        );

        for (name, variable) in &publish.changes {
            let Some(entry) = self.routing.entry(name) else { continue };
            if !entry.protocol.carries(self.protocol) {
                continue;
            }
            if !entry.serve {
                // mirrored: the external host owns this handle
                debug!(variable = %name, "Skipping publish for mirrored variable");
                continue;
            }

            for (pvname, wire_value) in self.translator.posts(variable, entry) {
                if let Err(err) = self.wire.post(&pvname, wire_value).await {
                    warn!(pv = %pvname, %err, "Failed to post update");
                }
            }
        }
    }
}
