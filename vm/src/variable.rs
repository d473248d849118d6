//! Typed process variables
//!
//! A [`Variable`] is a named value exposed to protocol clients, either an
//! input to or an output of the model. The payload is a closed union over
//! the three supported kinds (scalar, image, array) so decomposition points
//! match exhaustively instead of probing attributes.

use serde::{Deserialize, Serialize};

use crate::error::VariableError;

/// The declared kind of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Scalar,
    Image,
    Array,
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kind::Scalar => write!(f, "scalar"),
            Kind::Image => write!(f, "image"),
            Kind::Array => write!(f, "array"),
        }
    }
}

/// A 2-D numeric grid with bounding-box metadata
///
/// Data is row-major; `rows * cols` must equal `data.len()`. The bounding
/// box describes the physical extent of the grid and travels with the value
/// so protocol adapters can republish it alongside the pixel data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageValue {
    pub data: Vec<f64>,
    pub rows: usize,
    pub cols: usize,
    #[serde(rename = "x-min")]
    pub x_min: f64,
    #[serde(rename = "x-max")]
    pub x_max: f64,
    #[serde(rename = "y-min")]
    pub y_min: f64,
    #[serde(rename = "y-max")]
    pub y_max: f64,
}

impl ImageValue {
    /// Create an image from row-major data and a shape
    pub fn new(data: Vec<f64>, rows: usize, cols: usize) -> Self {
        Self {
            data,
            rows,
            cols,
            x_min: 0.0,
            x_max: cols as f64,
            y_min: 0.0,
            y_max: rows as f64,
        }
    }

    /// Set the bounding box
    pub fn with_bounds(mut self, x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        self.x_min = x_min;
        self.x_max = x_max;
        self.y_min = y_min;
        self.y_max = y_max;
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total element count implied by the shape
    pub fn size(&self) -> usize {
        self.rows * self.cols
    }

    /// Whether the data length agrees with the shape
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.size()
    }
}

/// A 1-D numeric sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    pub data: Vec<f64>,
}

impl ArrayValue {
    pub fn new(data: Vec<f64>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A variable payload, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Value {
    Scalar { value: f64 },
    Image(ImageValue),
    Array(ArrayValue),
}

impl Value {
    pub fn scalar(value: f64) -> Self {
        Value::Scalar { value }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Value::Scalar { .. } => Kind::Scalar,
            Value::Image(_) => Kind::Image,
            Value::Array(_) => Kind::Array,
        }
    }

    /// The scalar payload, if this is a scalar
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar { value } => Some(*value),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageValue> {
        match self {
            Value::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }
}

/// A named, typed process variable
///
/// `value` is absent until first set; the coordinator's cold-start gate
/// holds model evaluation until every input has one. A constant variable
/// accepts exactly one write (the startup seed from its default or from an
/// external read) and rejects everything after that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,

    /// Current value; None until first set
    pub value: Option<Value>,

    /// Startup value used to seed served variables
    pub default: Value,

    /// Display limits (scalar/array only); advisory, not write clamping
    #[serde(rename = "value-range")]
    pub value_range: Option<(f64, f64)>,

    /// Once true, external writes are permanently rejected after seeding
    #[serde(rename = "is-constant", default)]
    pub is_constant: bool,

    /// Display precision
    #[serde(default)]
    pub precision: Option<u32>,

    #[serde(default)]
    pub units: Option<String>,
}

impl Variable {
    /// Create a scalar variable with the given default
    pub fn scalar(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            value: None,
            default: Value::scalar(default),
            value_range: None,
            is_constant: false,
            precision: None,
            units: None,
        }
    }

    /// Create an image variable with the given default grid
    pub fn image(name: impl Into<String>, default: ImageValue) -> Self {
        Self {
            name: name.into(),
            value: None,
            default: Value::Image(default),
            value_range: None,
            is_constant: false,
            precision: None,
            units: None,
        }
    }

    /// Create an array variable with the given default sequence
    pub fn array(name: impl Into<String>, default: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            value: None,
            default: Value::Array(ArrayValue::new(default)),
            value_range: None,
            is_constant: false,
            precision: None,
            units: None,
        }
    }

    pub fn with_range(mut self, low: f64, high: f64) -> Self {
        self.value_range = Some((low, high));
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn constant(mut self) -> Self {
        self.is_constant = true;
        self
    }

    /// Set the current value (builder form, used when constructing outputs)
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// The declared kind, derived from the default payload
    pub fn kind(&self) -> Kind {
        self.default.kind()
    }

    /// Apply a new value, enforcing kind and constant rules
    ///
    /// The first write to a constant variable is accepted as its startup
    /// seed; every later write returns [`VariableError::ConstantWrite`].
    pub fn apply(&mut self, value: Value) -> Result<(), VariableError> {
        if value.kind() != self.kind() {
            return Err(VariableError::KindMismatch {
                name: self.name.clone(),
                expected: self.kind(),
                got: value.kind(),
            });
        }

        if self.is_constant && self.value.is_some() {
            return Err(VariableError::ConstantWrite { name: self.name.clone() });
        }

        if let Value::Image(image) = &value
            && !image.is_consistent()
        {
            return Err(VariableError::MalformedValue {
                name: self.name.clone(),
                reason: format!("image data length {} != {}x{}", image.data.len(), image.rows, image.cols),
            });
        }

        self.value = Some(value);
        Ok(())
    }

    /// The current value, falling back to the default
    pub fn value_or_default(&self) -> &Value {
        self.value.as_ref().unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_apply() {
        let mut var = Variable::scalar("x", 1.0).with_range(0.0, 5.0);
        assert_eq!(var.kind(), Kind::Scalar);
        assert!(var.value.is_none());

        var.apply(Value::scalar(3.0)).unwrap();
        assert_eq!(var.value.as_ref().and_then(Value::as_scalar), Some(3.0));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut var = Variable::scalar("x", 1.0);
        let err = var.apply(Value::Array(ArrayValue::new(vec![1.0]))).unwrap_err();
        assert_eq!(
            err,
            VariableError::KindMismatch {
                name: "x".to_string(),
                expected: Kind::Scalar,
                got: Kind::Array,
            }
        );
        assert!(var.value.is_none());
    }

    #[test]
    fn test_constant_accepts_seed_then_rejects() {
        let mut var = Variable::scalar("c", 2.0).constant();

        // first write is the startup seed
        var.apply(Value::scalar(2.0)).unwrap();

        // everything after the seed is rejected and the value is unchanged
        let err = var.apply(Value::scalar(9.0)).unwrap_err();
        assert_eq!(err, VariableError::ConstantWrite { name: "c".to_string() });
        assert_eq!(var.value.as_ref().and_then(Value::as_scalar), Some(2.0));
    }

    #[test]
    fn test_malformed_image_rejected() {
        let mut var = Variable::image("img", ImageValue::new(vec![0.0; 4], 2, 2));
        let bad = ImageValue::new(vec![0.0; 3], 2, 2);
        assert!(matches!(
            var.apply(Value::Image(bad)),
            Err(VariableError::MalformedValue { .. })
        ));
    }

    #[test]
    fn test_image_bounds_travel_with_value() {
        let image = ImageValue::new(vec![1.0, 6.0, 4.0, 1.0], 2, 2).with_bounds(0.0, 5.0, 0.0, 5.0);
        let mut var = Variable::image("img", image.clone());
        var.apply(Value::Image(image)).unwrap();

        let held = var.value.as_ref().and_then(Value::as_image).unwrap();
        assert_eq!(held.shape(), (2, 2));
        assert_eq!((held.x_max, held.y_max), (5.0, 5.0));
    }

    #[test]
    fn test_value_or_default() {
        let var = Variable::array("a", vec![1.0, 2.0]);
        assert_eq!(var.value_or_default().as_array().unwrap().len(), 2);
    }
}
