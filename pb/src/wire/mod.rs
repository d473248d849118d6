//! Wire-protocol seam
//!
//! The actual protocol servers (Channel Access, pvAccess) are third-party
//! libraries outside this crate. Adapters talk to them through the
//! [`WireBackend`] trait: create native handles at startup, post values,
//! receive external client writes as a stream, and read externally hosted
//! process variables. [`loopback`] provides an in-memory backend used by the
//! tests and the demo binary.

pub mod loopback;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use loopback::{LoopbackClient, LoopbackWire};

/// Errors surfaced by a wire backend
#[derive(Debug, Clone, Error)]
pub enum WireError {
    #[error("wire backend is not started")]
    NotStarted,

    #[error("unknown process variable '{0}'")]
    UnknownPv(String),

    #[error("unable to connect to '{0}'")]
    ConnectFailed(String),

    #[error("wire backend error: {0}")]
    Backend(String),
}

/// A value in protocol-native form
///
/// Scalars and flat arrays cover the Channel Access child handles; `Image`
/// carries the full grid with its bounding-box attributes the way pvAccess
/// posts structured arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Float(f64),
    Int(i64),
    FloatArray(Vec<f64>),
    IntArray(Vec<i64>),
    Image {
        data: Vec<f64>,
        rows: usize,
        cols: usize,
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
    },
}

impl WireValue {
    /// Numeric payload of a scalar-shaped value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            WireValue::Float(v) => Some(*v),
            WireValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn from_image(image: &varmodel::ImageValue) -> Self {
        WireValue::Image {
            data: image.data.clone(),
            rows: image.rows,
            cols: image.cols,
            x_min: image.x_min,
            x_max: image.x_max,
            y_min: image.y_min,
            y_max: image.y_max,
        }
    }

    pub fn into_image(self) -> Option<varmodel::ImageValue> {
        match self {
            WireValue::Image {
                data,
                rows,
                cols,
                x_min,
                x_max,
                y_min,
                y_max,
            } => Some(varmodel::ImageValue {
                data,
                rows,
                cols,
                x_min,
                x_max,
                y_min,
                y_max,
            }),
            _ => None,
        }
    }
}

/// Description of one native handle to create when the server starts
#[derive(Debug, Clone)]
pub struct PvSpec {
    pub pvname: String,
    pub initial: WireValue,
    /// Display limits (lolim/hilim)
    pub limits: Option<(f64, f64)>,
    pub precision: Option<u32>,
    pub units: Option<String>,
}

impl PvSpec {
    pub fn new(pvname: impl Into<String>, initial: WireValue) -> Self {
        Self {
            pvname: pvname.into(),
            initial,
            limits: None,
            precision: None,
            units: None,
        }
    }
}

/// An external client write delivered by the wire library
#[derive(Debug, Clone)]
pub struct WireWrite {
    pub pvname: String,
    pub value: WireValue,
}

/// The boundary to a protocol server library
///
/// Implementations own the protocol's request loop; adapters never block
/// inside it. `read_external` is the startup-only blocking read used to
/// seed mirrored variables.
#[async_trait]
pub trait WireBackend: Send + Sync {
    /// Create the native handles and start serving
    async fn start(&self, pvs: Vec<PvSpec>) -> Result<(), WireError>;

    /// Publish a new value on an existing handle
    async fn post(&self, pvname: &str, value: WireValue) -> Result<(), WireError>;

    /// Read an externally hosted process variable (mirror seeding)
    async fn read_external(&self, pvname: &str) -> Result<WireValue, WireError>;

    /// Take the stream of external client writes; yields once
    fn take_writes(&mut self) -> Option<mpsc::Receiver<WireWrite>>;

    /// Stop serving and release protocol resources
    async fn stop(&self);
}
