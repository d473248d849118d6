//! Built-in model registry
//!
//! Maps the model identifier given on the command line to a constructor.
//! Ships two demonstration models; embedders register their own.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use eyre::{Result, eyre};
use rand::Rng;
use varmodel::{ImageValue, Model, ModelError, Value, Variable};

type ModelFactory = Box<dyn Fn() -> Arc<dyn Model> + Send + Sync>;

/// Registry of constructible models
pub struct ModelRegistry {
    factories: BTreeMap<String, ModelFactory>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry preloaded with the built-in demonstration models
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("demo", || Arc::new(DemoModel));
        registry.register("doubler", || Arc::new(DoublerModel));
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Model> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Instantiate a model by identifier
    pub fn create(&self, name: &str) -> Result<Arc<dyn Model>> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(eyre!("unknown model '{}'; available: {}", name, self.names().join(", "))),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn scalar_input(inputs: &HashMap<String, Variable>, name: &str) -> Result<f64, ModelError> {
    inputs
        .get(name)
        .and_then(|v| v.value.as_ref())
        .and_then(Value::as_scalar)
        .ok_or_else(|| ModelError::MissingInput(name.to_string()))
}

const DEMO_IMAGE_DIM: usize = 50;

/// Two scalar bounds in, a uniform-noise image and both bounds echoed out
pub struct DemoModel;

impl Model for DemoModel {
    fn input_variables(&self) -> HashMap<String, Variable> {
        HashMap::from([
            ("input1".to_string(), Variable::scalar("input1", 1.0).with_range(0.0, 5.0)),
            ("input2".to_string(), Variable::scalar("input2", 2.0).with_range(0.0, 5.0)),
        ])
    }

    fn output_variables(&self) -> HashMap<String, Variable> {
        HashMap::from([
            (
                "output1".to_string(),
                Variable::image(
                    "output1",
                    ImageValue::new(vec![0.0; DEMO_IMAGE_DIM * DEMO_IMAGE_DIM], DEMO_IMAGE_DIM, DEMO_IMAGE_DIM),
                ),
            ),
            ("output2".to_string(), Variable::scalar("output2", 0.0)),
            ("output3".to_string(), Variable::scalar("output3", 0.0)),
        ])
    }

    fn evaluate(&self, inputs: &HashMap<String, Variable>) -> Result<HashMap<String, Variable>, ModelError> {
        let a = scalar_input(inputs, "input1")?;
        let b = scalar_input(inputs, "input2")?;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

        let count = DEMO_IMAGE_DIM * DEMO_IMAGE_DIM;
        let data = if hi > lo {
            let mut rng = rand::rng();
            (0..count).map(|_| rng.random_range(lo..hi)).collect()
        } else {
            vec![lo; count]
        };

        let image = ImageValue::new(data, DEMO_IMAGE_DIM, DEMO_IMAGE_DIM);

        Ok(HashMap::from([
            (
                "output1".to_string(),
                Variable::image(
                    "output1",
                    ImageValue::new(vec![0.0; count], DEMO_IMAGE_DIM, DEMO_IMAGE_DIM),
                )
                .with_value(Value::Image(image)),
            ),
            (
                "output2".to_string(),
                Variable::scalar("output2", 0.0).with_value(Value::scalar(a)),
            ),
            (
                "output3".to_string(),
                Variable::scalar("output3", 0.0).with_value(Value::scalar(b)),
            ),
        ]))
    }
}

/// Everything doubled: two scalars (one constant) and an image with
/// halved bounds
pub struct DoublerModel;

impl DoublerModel {
    fn default_image() -> ImageValue {
        ImageValue::new(vec![1.0, 6.0, 4.0, 1.0], 2, 2).with_bounds(0.0, 5.0, 0.0, 5.0)
    }
}

impl Model for DoublerModel {
    fn input_variables(&self) -> HashMap<String, Variable> {
        HashMap::from([
            ("input1".to_string(), Variable::scalar("input1", 1.0).with_range(0.0, 5.0)),
            (
                "input2".to_string(),
                Variable::scalar("input2", 2.0).with_range(0.0, 5.0).constant(),
            ),
            ("input3".to_string(), Variable::image("input3", Self::default_image())),
        ])
    }

    fn output_variables(&self) -> HashMap<String, Variable> {
        HashMap::from([
            ("output1".to_string(), Variable::scalar("output1", 0.0)),
            ("output2".to_string(), Variable::scalar("output2", 0.0)),
            ("output3".to_string(), Variable::image("output3", Self::default_image())),
        ])
    }

    fn evaluate(&self, inputs: &HashMap<String, Variable>) -> Result<HashMap<String, Variable>, ModelError> {
        let input1 = scalar_input(inputs, "input1")?;
        let input2 = scalar_input(inputs, "input2")?;
        let image = inputs
            .get("input3")
            .and_then(|v| v.value.as_ref())
            .and_then(Value::as_image)
            .ok_or_else(|| ModelError::MissingInput("input3".to_string()))?;

        let doubled = ImageValue::new(image.data.iter().map(|v| v * 2.0).collect(), image.rows, image.cols)
            .with_bounds(image.x_min / 2.0, image.x_max / 2.0, image.y_min / 2.0, image.y_max / 2.0);

        Ok(HashMap::from([
            (
                "output1".to_string(),
                Variable::scalar("output1", 0.0).with_value(Value::scalar(input1 * 2.0)),
            ),
            (
                "output2".to_string(),
                Variable::scalar("output2", 0.0).with_value(Value::scalar(input2 * 2.0)),
            ),
            (
                "output3".to_string(),
                Variable::image("output3", Self::default_image()).with_value(Value::Image(doubled)),
            ),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_inputs(model: &dyn Model) -> HashMap<String, Variable> {
        let mut inputs = model.input_variables();
        for variable in inputs.values_mut() {
            variable.value = Some(variable.default.clone());
        }
        inputs
    }

    #[test]
    fn test_builtin_names() {
        let registry = ModelRegistry::builtin();
        assert_eq!(registry.names(), vec!["demo", "doubler"]);
    }

    #[test]
    fn test_unknown_model_lists_available() {
        let registry = ModelRegistry::builtin();
        let err = registry.create("missing").err().unwrap();
        assert!(err.to_string().contains("demo"));
    }

    #[test]
    fn test_demo_model_noise_respects_bounds() {
        let model = ModelRegistry::builtin().create("demo").unwrap();
        let mut inputs = seeded_inputs(model.as_ref());
        inputs.get_mut("input1").unwrap().value = Some(Value::scalar(1.0));
        inputs.get_mut("input2").unwrap().value = Some(Value::scalar(3.0));

        let outputs = model.evaluate(&inputs).unwrap();
        let image = outputs
            .get("output1")
            .and_then(|v| v.value.as_ref())
            .and_then(Value::as_image)
            .unwrap();

        assert_eq!(image.shape(), (DEMO_IMAGE_DIM, DEMO_IMAGE_DIM));
        assert!(image.data.iter().all(|v| (1.0..3.0).contains(v)));
        assert_eq!(
            outputs.get("output2").and_then(|v| v.value.as_ref()).and_then(Value::as_scalar),
            Some(1.0)
        );
    }

    #[test]
    fn test_demo_model_equal_bounds() {
        let model = DemoModel;
        let mut inputs = seeded_inputs(&model);
        inputs.get_mut("input1").unwrap().value = Some(Value::scalar(2.0));
        inputs.get_mut("input2").unwrap().value = Some(Value::scalar(2.0));

        let outputs = model.evaluate(&inputs).unwrap();
        let image = outputs
            .get("output1")
            .and_then(|v| v.value.as_ref())
            .and_then(Value::as_image)
            .unwrap();
        assert!(image.data.iter().all(|v| *v == 2.0));
    }

    #[test]
    fn test_doubler_model() {
        let model = DoublerModel;
        let mut inputs = seeded_inputs(&model);
        inputs.get_mut("input1").unwrap().value = Some(Value::scalar(2.5));

        let outputs = model.evaluate(&inputs).unwrap();
        assert_eq!(
            outputs.get("output1").and_then(|v| v.value.as_ref()).and_then(Value::as_scalar),
            Some(5.0)
        );
        assert_eq!(
            outputs.get("output2").and_then(|v| v.value.as_ref()).and_then(Value::as_scalar),
            Some(4.0)
        );

        let image = outputs
            .get("output3")
            .and_then(|v| v.value.as_ref())
            .and_then(Value::as_image)
            .unwrap();
        assert_eq!(image.data, vec![2.0, 12.0, 8.0, 2.0]);
        assert_eq!(image.x_max, 2.5);
    }
}
