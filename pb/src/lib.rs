//! pvbridge - serve a computational model's variables over multiple
//! process-variable protocols
//!
//! A model's named input/output variables become externally addressable
//! process variables over independent wire protocols simultaneously. All
//! protocol-facing replicas of a variable stay consistent, and the model is
//! re-executed exactly once per coherent batch of input changes.
//!
//! # Core Concepts
//!
//! - **Single writer**: the coordinator is the only mutator of variable
//!   state and the only caller of the model
//! - **Queues, not sharing**: adapters exchange immutable messages with the
//!   coordinator over bounded queues; nothing crosses the boundary by
//!   reference except the busy flag
//! - **Echo suppression**: an update is never routed back to the protocol
//!   that originated it
//! - **Fail fast**: a model evaluation failure tears the whole server down
//!   rather than serving possibly-corrupt output
//!
//! # Modules
//!
//! - [`coordinator`] - the synchronization and execution event loop
//! - [`adapter`] - protocol adapters and their translation tables
//! - [`wire`] - the seam to external protocol server libraries
//! - [`executor`] - model invocation and contract checking
//! - [`lifecycle`] - startup, supervision, and shutdown
//! - [`routing`] - variable declaration schema and validation
//! - [`registry`] - model identifier -> constructor mapping
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod adapter;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod executor;
pub mod lifecycle;
pub mod registry;
pub mod routing;
pub mod wire;

// Re-export commonly used types
pub use adapter::{Adapter, AdapterConfig, AdapterLinks, CaTranslator, ProtocolTranslator, PvaTranslator};
pub use config::{Config, ShutdownConfig};
pub use coordinator::{
    CoordRequest, Coordinator, CoordinatorConfig, CoordinatorHandle, CoordinatorMetrics, PublishKind,
    RunningIndicator, StatePublish, VariableUpdate,
};
pub use executor::ModelExecutor;
pub use lifecycle::{Server, ServerHandle};
pub use registry::{DemoModel, DoublerModel, ModelRegistry};
pub use routing::{Protocol, ProtocolChoice, Routing, RoutingEntry};
pub use wire::{LoopbackClient, LoopbackWire, PvSpec, WireBackend, WireError, WireValue, WireWrite};
