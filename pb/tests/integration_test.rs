//! Integration tests for pvbridge
//!
//! These tests drive a full server (coordinator + both protocol adapters)
//! over in-memory wire backends and verify the end-to-end properties:
//! cross-protocol sync, echo suppression, constant immutability, the
//! cold-start gate, and fail-fast teardown on model errors.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use predicates::prelude::PredicateBooleanExt;
use pvbridge::config::Config;
use pvbridge::lifecycle::{Server, ServerHandle};
use pvbridge::registry::DoublerModel;
use pvbridge::routing::{Protocol, Routing};
use pvbridge::wire::{LoopbackClient, LoopbackWire, WireValue};
use varmodel::{Model, ModelError, Value, Variable};

/// y = x * 2, fails when x < 0
struct ScaleModel;

impl Model for ScaleModel {
    fn input_variables(&self) -> HashMap<String, Variable> {
        HashMap::from([("x".to_string(), Variable::scalar("x", 1.0))])
    }

    fn output_variables(&self) -> HashMap<String, Variable> {
        HashMap::from([("y".to_string(), Variable::scalar("y", 0.0))])
    }

    fn evaluate(&self, inputs: &HashMap<String, Variable>) -> Result<HashMap<String, Variable>, ModelError> {
        let x = inputs
            .get("x")
            .and_then(|v| v.value.as_ref())
            .and_then(Value::as_scalar)
            .ok_or_else(|| ModelError::MissingInput("x".to_string()))?;

        if x < 0.0 {
            return Err(ModelError::Evaluation("x must be non-negative".to_string()));
        }

        Ok(HashMap::from([(
            "y".to_string(),
            Variable::scalar("y", 0.0).with_value(Value::scalar(x * 2.0)),
        )]))
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.adapter.flush_interval_ms = 10;
    config.shutdown.grace_period_secs = 2;
    config
}

fn start_both(
    model: Arc<dyn Model>,
    routing: Routing,
) -> (eyre::Result<ServerHandle>, LoopbackClient, LoopbackClient) {
    let ca = LoopbackWire::new();
    let ca_client = ca.client();
    let pva = LoopbackWire::new();
    let pva_client = pva.client();

    let handle = Server::new(model, routing, test_config())
        .with_backend(Protocol::Ca, Box::new(ca))
        .with_backend(Protocol::Pva, Box::new(pva))
        .start();

    (handle, ca_client, pva_client)
}

async fn wait_float(client: &LoopbackClient, pvname: &str, expected: f64) {
    for _ in 0..300 {
        if let Some(value) = client.read(pvname).await
            && value.as_float() == Some(expected)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pv {pvname} never reached {expected}");
}

fn scalar_in(state: &HashMap<String, Variable>, name: &str) -> Option<f64> {
    state.get(name).and_then(|v| v.value.as_ref()).and_then(Value::as_scalar)
}

// =============================================================================
// Startup
// =============================================================================

#[tokio::test]
async fn test_startup_seeds_defaults_and_first_outputs() {
    let model: Arc<dyn Model> = Arc::new(ScaleModel);
    let routing = Routing::default_for_model(model.as_ref(), "test");
    let (handle, ca, pva) = start_both(model, routing);
    let handle = handle.unwrap();

    // both protocols come up with the default input and its first output
    wait_float(&ca, "test:y", 2.0).await;
    wait_float(&pva, "test:y", 2.0).await;
    assert_eq!(ca.read("test:x").await, Some(WireValue::Float(1.0)));
    assert_eq!(pva.read("test:x").await, Some(WireValue::Float(1.0)));

    // exactly one evaluation for the settled startup seeds
    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.evaluations, 1);

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_start_rejects_incomplete_routing() {
    let model: Arc<dyn Model> = Arc::new(ScaleModel);
    let mut routing = Routing::default_for_model(model.as_ref(), "test");
    routing.variables.remove("y");

    let (handle, _ca, _pva) = start_both(model, routing);
    assert!(handle.is_err());
}

// =============================================================================
// Cross-protocol sync and echo suppression
// =============================================================================

#[tokio::test]
async fn test_write_syncs_across_protocols_without_echo() {
    let model: Arc<dyn Model> = Arc::new(ScaleModel);
    let routing = Routing::default_for_model(model.as_ref(), "test");
    let (handle, ca, pva) = start_both(model, routing);
    let handle = handle.unwrap();

    wait_float(&ca, "test:y", 2.0).await;
    wait_float(&pva, "test:y", 2.0).await;

    // write x=5 via ca
    ca.write("test:x", WireValue::Float(5.0)).await;

    // pva receives the input sync, then both protocols the new output
    wait_float(&pva, "test:x", 5.0).await;
    wait_float(&ca, "test:y", 10.0).await;
    wait_float(&pva, "test:y", 10.0).await;

    // ca saw x twice: the initial handle value and its own local echo.
    // A coordinator echo back to ca would make it three.
    assert_eq!(ca.post_count("test:x").await, 2);
    assert_eq!(pva.post_count("test:x").await, 2);

    let state = handle.snapshot().await.unwrap();
    assert_eq!(scalar_in(&state, "x"), Some(5.0));
    assert_eq!(scalar_in(&state, "y"), Some(10.0));

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_burst_of_writes_settles_on_last_value() {
    let model: Arc<dyn Model> = Arc::new(ScaleModel);
    let routing = Routing::default_for_model(model.as_ref(), "test");
    let (handle, ca, pva) = start_both(model, routing);
    let handle = handle.unwrap();

    wait_float(&ca, "test:y", 2.0).await;

    for i in 1..=10 {
        ca.write("test:x", WireValue::Float(i as f64)).await;
    }

    wait_float(&ca, "test:y", 20.0).await;
    wait_float(&pva, "test:y", 20.0).await;

    let state = handle.snapshot().await.unwrap();
    assert_eq!(scalar_in(&state, "x"), Some(10.0));

    handle.shutdown();
    handle.join().await.unwrap();
}

// =============================================================================
// Constant variables
// =============================================================================

#[tokio::test]
async fn test_constant_write_changes_nothing() {
    let model: Arc<dyn Model> = Arc::new(DoublerModel);
    let routing = Routing::default_for_model(model.as_ref(), "test");
    let (handle, ca, pva) = start_both(model, routing);
    let handle = handle.unwrap();

    // startup: input2=2 (constant) doubles to output2=4
    wait_float(&ca, "test:output2", 4.0).await;
    wait_float(&pva, "test:output2", 4.0).await;
    let evaluations = handle.metrics().await.unwrap().evaluations;

    // a write to the constant input is rejected at the adapter
    ca.write("test:input2", WireValue::Float(5.0)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let state = handle.snapshot().await.unwrap();
    assert_eq!(scalar_in(&state, "input2"), Some(2.0));
    assert_eq!(handle.metrics().await.unwrap().evaluations, evaluations);

    // no event was published anywhere for the rejected write
    assert_eq!(ca.post_count("test:input2").await, 1);
    assert_eq!(pva.post_count("test:input2").await, 1);
    assert_eq!(pva.post_count("test:output2").await, 1);

    handle.shutdown();
    handle.join().await.unwrap();
}

// =============================================================================
// Images
// =============================================================================

#[tokio::test]
async fn test_image_output_decomposed_on_ca_whole_on_pva() {
    let model: Arc<dyn Model> = Arc::new(DoublerModel);
    let routing = Routing::default_for_model(model.as_ref(), "test");
    let (handle, ca, pva) = start_both(model, routing);
    let handle = handle.unwrap();

    wait_float(&ca, "test:output2", 4.0).await;
    wait_float(&pva, "test:output2", 4.0).await;

    // ca decomposes the output image into children
    assert_eq!(
        ca.read("test:output3:ArrayData_RBV").await,
        Some(WireValue::FloatArray(vec![2.0, 12.0, 8.0, 2.0]))
    );
    assert_eq!(ca.read("test:output3:MaxX_RBV").await, Some(WireValue::Float(2.5)));
    assert_eq!(ca.read("test:output3:ArraySize_RBV").await, Some(WireValue::Int(4)));

    // pva carries the image whole, bounds attached
    match pva.read("test:output3").await {
        Some(WireValue::Image { data, x_max, .. }) => {
            assert_eq!(data, vec![2.0, 12.0, 8.0, 2.0]);
            assert_eq!(x_max, 2.5);
        }
        other => panic!("expected image on pva, got {other:?}"),
    }

    // whole-image write over pva reaches the model; ca children follow
    let image = WireValue::Image {
        data: vec![1.0, 1.0, 1.0, 1.0],
        rows: 2,
        cols: 2,
        x_min: 0.0,
        x_max: 4.0,
        y_min: 0.0,
        y_max: 4.0,
    };
    pva.write("test:input3", image).await;

    wait_float(&ca, "test:output3:MaxX_RBV", 2.0).await;
    assert_eq!(
        ca.read("test:output3:ArrayData_RBV").await,
        Some(WireValue::FloatArray(vec![2.0, 2.0, 2.0, 2.0]))
    );

    handle.shutdown();
    handle.join().await.unwrap();
}

// =============================================================================
// Fatal errors
// =============================================================================

#[tokio::test]
async fn test_model_failure_raises_fatal_and_exits_nonzero() {
    let model: Arc<dyn Model> = Arc::new(ScaleModel);
    let routing = Routing::default_for_model(model.as_ref(), "test");
    let (handle, ca, pva) = start_both(model, routing);
    let mut handle = handle.unwrap();

    wait_float(&ca, "test:y", 2.0).await;
    wait_float(&pva, "test:y", 2.0).await;

    ca.write("test:x", WireValue::Float(-1.0)).await;

    let reason = handle.wait_fatal().await.expect("fatal signal");
    assert!(reason.contains("non-negative"));

    // no partial output was ever published
    assert_eq!(ca.post_count("test:y").await, 1);
    assert_eq!(pva.post_count("test:y").await, 1);

    handle.shutdown();
    assert!(handle.join().await.is_err());
}

// =============================================================================
// Mirrored variables
// =============================================================================

fn mirror_routing(model: &dyn Model) -> Routing {
    let mut routing = Routing::default_for_model(model, "test");
    let entry = routing.variables.get_mut("x").unwrap();
    entry.pvname = "ext:x".to_string();
    entry.serve = false;
    routing
}

#[tokio::test]
async fn test_mirror_seeds_from_external_source() {
    let model: Arc<dyn Model> = Arc::new(ScaleModel);
    let routing = mirror_routing(model.as_ref());

    let ca = LoopbackWire::new();
    let ca_client = ca.client();
    let pva = LoopbackWire::new();
    let pva_client = pva.client();

    // each adapter reads the externally hosted value through its own wire
    ca_client.host_external("ext:x", WireValue::Float(7.0)).await;
    pva_client.host_external("ext:x", WireValue::Float(7.0)).await;

    let handle = Server::new(model, routing, test_config())
        .with_backend(Protocol::Ca, Box::new(ca))
        .with_backend(Protocol::Pva, Box::new(pva))
        .start()
        .unwrap();

    wait_float(&ca_client, "test:y", 14.0).await;
    wait_float(&pva_client, "test:y", 14.0).await;

    // the mirrored variable is never served by this process
    assert_eq!(ca_client.read("ext:x").await, None);

    handle.shutdown();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_mirror_fails_startup() {
    let model: Arc<dyn Model> = Arc::new(ScaleModel);
    let routing = mirror_routing(model.as_ref());

    // nothing hosts ext:x
    let (handle, _ca, _pva) = start_both(model, routing);
    let mut handle = handle.unwrap();

    let reason = handle.wait_fatal().await.expect("fatal signal");
    assert!(reason.contains("Unable to connect"));

    handle.shutdown();
    assert!(handle.join().await.is_err());
}

// =============================================================================
// CLI
// =============================================================================

fn doubler_declarations() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
variables:
  input1: {{ pvname: "demo:input1" }}
  input2: {{ pvname: "demo:input2" }}
  input3: {{ pvname: "demo:input3", protocol: pva }}
  output1: {{ pvname: "demo:output1" }}
  output2: {{ pvname: "demo:output2" }}
  output3: {{ pvname: "demo:output3" }}
"#
    )
    .unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_cli_models_lists_builtins() {
    assert_cmd::Command::cargo_bin("pvb")
        .unwrap()
        .arg("models")
        .assert()
        .success()
        .stdout(predicates::str::contains("demo").and(predicates::str::contains("doubler")));
}

#[test]
fn test_cli_check_accepts_valid_declarations() {
    let file = doubler_declarations();
    assert_cmd::Command::cargo_bin("pvb")
        .unwrap()
        .args(["check", "doubler", "--declarations"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicates::str::contains("declarations OK"));
}

#[test]
fn test_cli_check_rejects_missing_entry() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "variables:\n  input1: {{ pvname: \"demo:input1\" }}\n").unwrap();
    file.flush().unwrap();

    assert_cmd::Command::cargo_bin("pvb")
        .unwrap()
        .args(["check", "doubler", "--declarations"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicates::str::contains("no routing entry"));
}

#[test]
fn test_cli_unknown_model_fails() {
    assert_cmd::Command::cargo_bin("pvb")
        .unwrap()
        .args(["models"])
        .assert()
        .success();

    assert_cmd::Command::cargo_bin("pvb")
        .unwrap()
        .args(["serve", "missing"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("unknown model"));
}
