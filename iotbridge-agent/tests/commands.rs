use iotbridge_agent::commands::{CommandHandlers, METHOD_EMERGENCY_STOP, METHOD_RESET_ERROR_STATUS};
use iotbridge_agent::hub::{CommandSink, MethodRequest, KEY_EMERGENCY_STOP, KEY_TELEMETRY_INTERVAL};
use iotbridge_agent::state::{DeviceState, RunMode};
use iotbridge_devkit::MockPropertyReporter;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn handlers() -> (CommandHandlers, MockPropertyReporter) {
    let reporter = MockPropertyReporter::new();
    let handlers = CommandHandlers::new(DeviceState::default(), Arc::new(reporter.clone()));
    (handlers, reporter)
}

fn method(name: &str) -> MethodRequest {
    MethodRequest {
        name: name.to_string(),
        payload: Value::Null,
    }
}

#[tokio::test]
async fn test_emergency_stop_then_reset() {
    let (handlers, reporter) = handlers();

    let response = handlers.on_method(method(METHOD_EMERGENCY_STOP)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.payload, json!({"message": "Emergency Stop activated"}));
    assert_eq!(handlers.state().get().mode(), RunMode::Paused);
    assert_eq!(reporter.last_value(KEY_EMERGENCY_STOP), Some(Value::Bool(true)));

    let response = handlers.on_method(method(METHOD_RESET_ERROR_STATUS)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.payload, json!({"message": "Error status reset"}));
    assert_eq!(handlers.state().get().mode(), RunMode::Running);
    assert_eq!(reporter.last_value(KEY_EMERGENCY_STOP), Some(Value::Bool(false)));
}

#[tokio::test]
async fn test_repeated_stop_is_idempotent() {
    let (handlers, reporter) = handlers();

    handlers.on_method(method(METHOD_EMERGENCY_STOP)).await;
    handlers.on_method(method(METHOD_EMERGENCY_STOP)).await;

    assert!(handlers.state().get().stopped);
    assert_eq!(reporter.patches().len(), 2);
}

#[tokio::test]
async fn test_unknown_method_is_not_found() {
    let (handlers, reporter) = handlers();

    let response = handlers.on_method(method("Restart")).await;

    assert_eq!(response.status, 404);
    assert!(!handlers.state().get().stopped);
    assert!(reporter.patches().is_empty());
}

#[tokio::test]
async fn test_desired_interval_is_applied_and_reported() {
    let (handlers, reporter) = handlers();

    let applied = handlers
        .on_desired_changed(&json!({"telemetryInterval": 500, "$version": 4}))
        .await;

    assert_eq!(applied, Some(500));
    assert_eq!(handlers.state().get().interval_ms, 500);
    assert_eq!(reporter.last_value(KEY_TELEMETRY_INTERVAL), Some(Value::from(500)));
}

#[tokio::test]
async fn test_invalid_desired_interval_is_ignored() {
    let (handlers, reporter) = handlers();

    for desired in [
        json!({"telemetryInterval": 0}),
        json!({"telemetryInterval": -5}),
        json!({"telemetryInterval": "fast"}),
        json!({"telemetryInterval": 1.5}),
        json!({"$version": 7}),
    ] {
        assert_eq!(handlers.on_desired_changed(&desired).await, None, "{}", desired);
    }

    assert_eq!(handlers.state().get().interval_ms, 2000);
    assert!(reporter.patches().is_empty());
}

#[tokio::test]
async fn test_desired_push_through_sink() {
    let (handlers, _reporter) = handlers();

    handlers.on_desired(json!({"telemetryInterval": 1500})).await;
    assert_eq!(handlers.state().get().interval_ms, 1500);
}

#[tokio::test]
async fn test_report_failure_does_not_undo_the_change() {
    let (handlers, reporter) = handlers();
    reporter.set_failing(true);

    let response = handlers.on_method(method(METHOD_EMERGENCY_STOP)).await;
    assert_eq!(response.status, 200);
    assert!(handlers.state().get().stopped);

    assert_eq!(handlers.on_desired_changed(&json!({"telemetryInterval": 800})).await, Some(800));
    assert_eq!(handlers.state().get().interval_ms, 800);
}

#[tokio::test]
async fn test_initial_report_carries_both_keys() {
    let (handlers, reporter) = handlers();

    handlers.report_initial().await;

    let patches = reporter.patches();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].get(KEY_EMERGENCY_STOP), Some(&Value::Bool(false)));
    assert_eq!(patches[0].get(KEY_TELEMETRY_INTERVAL), Some(&Value::from(2000)));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_stop_and_reset_report_the_final_state() {
    let (handlers, reporter) = handlers();
    // the stop's echo is slow, so the reset lands while it is in flight
    reporter.push_delay(Duration::from_millis(50));

    tokio::join!(
        handlers.on_method(method(METHOD_EMERGENCY_STOP)),
        handlers.on_method(method(METHOD_RESET_ERROR_STATUS)),
    );

    assert!(!handlers.state().get().stopped);
    assert_eq!(reporter.last_value(KEY_EMERGENCY_STOP), Some(Value::Bool(false)));
    let order: Vec<_> = reporter
        .patches()
        .iter()
        .map(|patch| patch[KEY_EMERGENCY_STOP].clone())
        .collect();
    assert_eq!(order, vec![Value::Bool(true), Value::Bool(false)]);
}
