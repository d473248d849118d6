//! The execution coordinator event loop
//!
//! The coordinator is the sole mutator of authoritative variable state, the
//! sole caller of model evaluation, and the sole decision point for which
//! adapters receive which updates. It runs as a single task: within one
//! cycle all state mutations happen before any outbound publish, so no
//! reader ever observes a half-updated state, and an update is never routed
//! back to the protocol that originated it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use eyre::Result;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use varmodel::{Model, Value, Variable, VariableError};

use super::config::CoordinatorConfig;
use super::handle::CoordinatorHandle;
use super::indicator::RunningIndicator;
use super::messages::{CoordRequest, CoordinatorMetrics, PublishKind, StatePublish, VariableUpdate};
use crate::executor::ModelExecutor;
use crate::routing::{Protocol, Routing};

/// Coordinator lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Draining,
    Evaluating,
    Publishing,
    Exiting,
}

/// The execution coordinator
pub struct Coordinator {
    config: CoordinatorConfig,

    /// Authoritative state; owned exclusively by this task
    state: HashMap<String, Variable>,

    input_names: HashSet<String>,
    output_names: Vec<String>,

    routing: Arc<Routing>,
    executor: ModelExecutor,

    in_tx: mpsc::Sender<VariableUpdate>,
    in_rx: mpsc::Receiver<VariableUpdate>,
    ctrl_tx: mpsc::Sender<CoordRequest>,
    ctrl_rx: mpsc::Receiver<CoordRequest>,

    /// Per-adapter outbound queues
    outbound: Vec<(Protocol, mpsc::Sender<StatePublish>)>,

    indicator: RunningIndicator,
    shutdown_rx: watch::Receiver<bool>,
    fatal_tx: mpsc::Sender<String>,

    metrics: CoordinatorMetrics,
    phase: Phase,
}

impl Coordinator {
    /// Create a coordinator for the given model and routing
    pub fn new(
        model: Arc<dyn Model>,
        routing: Arc<Routing>,
        config: CoordinatorConfig,
        indicator: RunningIndicator,
        shutdown_rx: watch::Receiver<bool>,
        fatal_tx: mpsc::Sender<String>,
    ) -> Self {
        let inputs = model.input_variables();
        let outputs = model.output_variables();

        let input_names: HashSet<String> = inputs.keys().cloned().collect();
        let output_names: Vec<String> = outputs.keys().cloned().collect();

        let mut state = inputs;
        state.extend(outputs);

        let (in_tx, in_rx) = mpsc::channel(config.inbound_capacity);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(16);

        Self {
            config,
            state,
            input_names,
            output_names,
            routing,
            executor: ModelExecutor::new(model),
            in_tx,
            in_rx,
            ctrl_tx,
            ctrl_rx,
            outbound: Vec::new(),
            indicator,
            shutdown_rx,
            fatal_tx,
            metrics: CoordinatorMetrics::default(),
            phase: Phase::Idle,
        }
    }

    /// Sender side of the shared inbound queue
    pub fn inbound_sender(&self) -> mpsc::Sender<VariableUpdate> {
        self.in_tx.clone()
    }

    /// A control handle for snapshots, metrics, and shutdown
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.ctrl_tx.clone())
    }

    /// Register an adapter's outbound queue
    ///
    /// All adapters must be registered before `run()` so no publish can
    /// precede a registration.
    pub fn register_adapter(&mut self, protocol: Protocol) -> mpsc::Receiver<StatePublish> {
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity);
        self.outbound.push((protocol, tx));
        rx
    }

    /// Run the event loop until shutdown or a fatal model error
    pub async fn run(mut self) -> Result<()> {
        info!(
            inputs = self.input_names.len(),
            outputs = self.output_names.len(),
            adapters = self.outbound.len(),
            "Coordinator started"
        );

        loop {
            self.set_phase(Phase::Idle);

            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }

                Some(req) = self.ctrl_rx.recv() => {
                    if self.handle_control(req) {
                        break;
                    }
                }

                update = self.in_rx.recv() => match update {
                    Some(update) => {
                        if let Err(report) = self.cycle(update).await {
                            error!("Fatal model error: {report}");
                            let _ = self.fatal_tx.try_send(report.to_string());
                            self.set_phase(Phase::Exiting);
                            return Err(report);
                        }
                    }
                    None => break,
                },
            }
        }

        self.set_phase(Phase::Exiting);
        info!("Coordinator stopped");
        Ok(())
    }

    /// One busy cycle: drain, merge, sync, evaluate, publish
    async fn cycle(&mut self, first: VariableUpdate) -> Result<()> {
        self.indicator.set(true);
        self.set_phase(Phase::Draining);
        self.metrics.cycles += 1;

        // pre-change values of everything this cycle touches, for rollback
        let mut snapshot: HashMap<String, Option<Value>> = HashMap::new();
        let mut any_changed = false;

        // coalesce the settled burst into one batch
        let mut batch = vec![first];
        while let Ok(update) = self.in_rx.try_recv() {
            batch.push(update);
        }

        for update in batch {
            any_changed |= self.apply_update(update, &mut snapshot);
        }

        // evaluate once per batch that changed something; the very first
        // batch with complete inputs evaluates even without a change so the
        // startup seeds produce initial outputs
        if any_changed || self.metrics.evaluations == 0 {
            if self.inputs_ready() {
                if let Err(report) = self.evaluate_and_publish().await {
                    self.restore(snapshot);
                    self.indicator.set(false);
                    return Err(report);
                }
            } else {
                debug!("Holding evaluation until all inputs are known");
            }
        }

        self.indicator.set(false);
        Ok(())
    }

    /// Merge one inbound batch and sync changed keys to the other adapters
    ///
    /// Returns whether any variable's value actually changed.
    fn apply_update(&mut self, update: VariableUpdate, snapshot: &mut HashMap<String, Option<Value>>) -> bool {
        self.metrics.updates_received += 1;
        let origin = update.origin;
        let mut changed: Vec<String> = Vec::new();

        for (name, value) in update.changes {
            let Some(variable) = self.state.get_mut(&name) else {
                warn!(variable = %name, "Rejecting write to unknown variable");
                self.metrics.writes_rejected += 1;
                continue;
            };

            if !self.input_names.contains(&name) {
                warn!(
                    variable = %name,
                    "Rejecting write to output variable; outputs only change via model evaluation"
                );
                self.metrics.writes_rejected += 1;
                continue;
            }

            let previous = variable.value.clone();
            if previous.as_ref() == Some(&value) {
                // no actual change; nothing to sync or evaluate
                continue;
            }
            match variable.apply(value) {
                Ok(()) => {
                    snapshot.entry(name.clone()).or_insert(previous);
                    changed.push(name);
                }
                Err(VariableError::ConstantWrite { .. }) => {
                    debug!(variable = %name, "Dropping write to constant variable");
                    self.metrics.writes_rejected += 1;
                }
                Err(err) => {
                    warn!(variable = %name, %err, "Rejecting write");
                    self.metrics.writes_rejected += 1;
                }
            }
        }

        if changed.is_empty() {
            return false;
        }

        // cross-protocol sync: only the changed keys, never back to the
        // originating adapter
        let mut dropped = 0u64;
        for (protocol, tx) in &self.outbound {
            if *protocol == origin {
                continue;
            }

            let subset: HashMap<String, Variable> = changed
                .iter()
                .filter(|name| self.routing.carried_by(name, *protocol))
                .filter_map(|name| self.state.get(name.as_str()).map(|v| (name.clone(), v.clone())))
                .collect();

            if subset.is_empty() {
                continue;
            }

            dropped += send_publish(
                tx,
                *protocol,
                StatePublish {
                    kind: PublishKind::Input,
                    changes: subset,
                },
            );
        }
        self.metrics.publishes_dropped += dropped;

        true
    }

    /// Whether every declared input has a value (cold-start gate)
    fn inputs_ready(&self) -> bool {
        self.input_names
            .iter()
            .all(|name| self.state.get(name).is_some_and(|v| v.value.is_some()))
    }

    /// Evaluate the model on the full state and fan outputs out per routing
    async fn evaluate_and_publish(&mut self) -> Result<()> {
        self.set_phase(Phase::Evaluating);

        let outputs = self.executor.evaluate(self.state.clone()).await?;

        for (name, variable) in outputs {
            self.state.insert(name, variable);
        }
        self.metrics.evaluations += 1;

        self.set_phase(Phase::Publishing);
        let mut dropped = 0u64;
        for (protocol, tx) in &self.outbound {
            let subset: HashMap<String, Variable> = self
                .output_names
                .iter()
                .filter(|name| self.routing.carried_by(name, *protocol))
                .filter_map(|name| self.state.get(name.as_str()).map(|v| (name.clone(), v.clone())))
                .collect();

            if subset.is_empty() {
                continue;
            }

            dropped += send_publish(
                tx,
                *protocol,
                StatePublish {
                    kind: PublishKind::Output,
                    changes: subset,
                },
            );
        }
        self.metrics.publishes_dropped += dropped;

        Ok(())
    }

    /// Roll the touched variables back to their pre-cycle values
    fn restore(&mut self, snapshot: HashMap<String, Option<Value>>) {
        for (name, previous) in snapshot {
            if let Some(variable) = self.state.get_mut(&name) {
                variable.value = previous;
            }
        }
    }

    /// Service a control request; returns true on shutdown
    fn handle_control(&mut self, req: CoordRequest) -> bool {
        match req {
            CoordRequest::Snapshot { reply_tx } => {
                let _ = reply_tx.send(self.state.clone());
                false
            }
            CoordRequest::GetMetrics { reply_tx } => {
                let _ = reply_tx.send(self.metrics.clone());
                false
            }
            CoordRequest::Shutdown => true,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if phase != self.phase {
            debug!(from = ?self.phase, to = ?phase, "Coordinator phase");
            self.phase = phase;
        }
    }
}

/// Lossy outbound send; returns the number of dropped publishes (0 or 1)
///
/// A full queue drops this cycle's publish for that adapter only; the next
/// evaluation republishes current values, so staleness is bounded and no
/// deadlock can form.
fn send_publish(tx: &mpsc::Sender<StatePublish>, protocol: Protocol, publish: StatePublish) -> u64 {
    match tx.try_send(publish) {
        Ok(()) => 0,
        Err(TrySendError::Full(_)) => {
            warn!(protocol = %protocol, "Outbound queue full; dropping publish for this cycle");
            1
        }
        Err(TrySendError::Closed(_)) => {
            warn!(protocol = %protocol, "Outbound queue closed; dropping publish");
            1
        }
    }
}
