//! pvAccess-style translation
//!
//! pvAccess carries structured values, so every variable maps to exactly one
//! handle: images travel whole with their bounding-box attributes attached,
//! arrays as flat sequences. Declared child fields are not decomposed here;
//! attributes ride along with the value.

use varmodel::{ArrayValue, Kind, Value, Variable};

use super::ProtocolTranslator;
use crate::routing::{Protocol, RoutingEntry};
use crate::wire::{PvSpec, WireValue};

pub struct PvaTranslator;

fn to_wire(value: &Value) -> WireValue {
    match value {
        Value::Scalar { value } => WireValue::Float(*value),
        Value::Image(image) => WireValue::from_image(image),
        Value::Array(array) => WireValue::FloatArray(array.data.clone()),
    }
}

impl ProtocolTranslator for PvaTranslator {
    fn protocol(&self) -> Protocol {
        Protocol::Pva
    }

    fn handles(&self, variable: &Variable, entry: &RoutingEntry) -> Vec<PvSpec> {
        let mut spec = PvSpec::new(entry.pvname.clone(), to_wire(variable.value_or_default()));
        if variable.kind() == Kind::Scalar {
            spec.limits = variable.value_range;
            spec.precision = variable.precision;
            spec.units = variable.units.clone();
        }
        vec![spec]
    }

    fn posts(&self, variable: &Variable, entry: &RoutingEntry) -> Vec<(String, WireValue)> {
        vec![(entry.pvname.clone(), to_wire(variable.value_or_default()))]
    }

    fn child_pvnames(&self, _variable: &Variable, _entry: &RoutingEntry) -> Vec<String> {
        Vec::new()
    }

    fn to_value(&self, wire: WireValue, variable: &Variable) -> Option<Value> {
        match variable.kind() {
            Kind::Scalar => wire.as_float().map(Value::scalar),
            Kind::Image => wire.into_image().map(Value::Image),
            Kind::Array => match wire {
                WireValue::FloatArray(data) => Some(Value::Array(ArrayValue::new(data))),
                WireValue::IntArray(data) => {
                    Some(Value::Array(ArrayValue::new(data.into_iter().map(|v| v as f64).collect())))
                }
                _ => None,
            },
        }
    }
}
