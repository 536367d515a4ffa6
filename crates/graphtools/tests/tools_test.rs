use graphcore::{Fields, Phase, RunStatus, Tool, ToolContext, ToolError, Value};
use graphruntime::{GraphRuntime, RuntimeConfig, ToolRegistry};
use graphtools::{
    data_quality_graph, sample_dataset, DelayTool, IdentifyAnomaliesTool, IncrementTool,
    ProfileDataTool, SetStateTool, TransformDataTool, ValidateDataTool,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// Helper function to create a test context
fn create_test_context(state: Fields, params: HashMap<String, Value>) -> ToolContext {
    ToolContext::new(uuid::Uuid::new_v4(), "test-node", state).with_params(params)
}

fn fields(pairs: Vec<(&str, Value)>) -> Fields {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn params(pairs: Vec<(&str, Value)>) -> HashMap<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn runtime() -> GraphRuntime {
    let mut registry = ToolRegistry::new();
    graphtools::register_all(&mut registry);
    GraphRuntime::with_registry(Arc::new(registry), RuntimeConfig::default())
}

#[tokio::test]
async fn test_set_state_copies_params() {
    let ctx = create_test_context(
        Fields::new(),
        params(vec![("greeting", Value::from("hi")), ("count", Value::from(2))]),
    );

    let update = SetStateTool.invoke(ctx).await.unwrap();

    assert_eq!(update.get("greeting"), Some(&Value::from("hi")));
    assert_eq!(update.get("count"), Some(&Value::from(2)));
}

#[tokio::test]
async fn test_increment_treats_missing_field_as_zero() {
    let ctx = create_test_context(Fields::new(), params(vec![("field", Value::from("count"))]));

    let update = IncrementTool.invoke(ctx).await.unwrap();

    assert_eq!(update.get("count"), Some(&Value::from(1)));
}

#[tokio::test]
async fn test_increment_by_custom_step() {
    let ctx = create_test_context(
        fields(vec![("total", Value::from(10))]),
        params(vec![("field", Value::from("total")), ("by", Value::from(2.5))]),
    );

    let update = IncrementTool.invoke(ctx).await.unwrap();

    assert_eq!(update.get("total").and_then(Value::as_f64), Some(12.5));
}

#[tokio::test]
async fn test_increment_rejects_non_numeric_field() {
    let ctx = create_test_context(
        fields(vec![("count", Value::from("three"))]),
        params(vec![("field", Value::from("count"))]),
    );

    let err = IncrementTool.invoke(ctx).await.unwrap_err();

    assert!(matches!(err, ToolError::InvalidFieldType { ref field, .. } if field == "count"));
}

#[tokio::test]
async fn test_increment_requires_field_param() {
    let ctx = create_test_context(Fields::new(), HashMap::new());

    let err = IncrementTool.invoke(ctx).await.unwrap_err();

    assert_eq!(err, ToolError::MissingParam("field".to_string()));
}

#[tokio::test]
async fn test_transform_doubles_numbers() {
    let ctx = create_test_context(
        fields(vec![("data", Value::from(vec![1, 2, 3]))]),
        HashMap::new(),
    );

    let update = TransformDataTool.invoke(ctx).await.unwrap();

    assert_eq!(update.get("transformed_data"), Some(&Value::from(vec![2, 4, 6])));
}

#[tokio::test]
async fn test_validate_data() {
    let valid = create_test_context(fields(vec![("data", Value::from(vec![1]))]), HashMap::new());
    let update = ValidateDataTool.invoke(valid).await.unwrap();
    assert_eq!(update.get("is_valid"), Some(&Value::from(true)));
    assert_eq!(update.get("validation_result"), Some(&Value::from("passed")));

    let empty = create_test_context(Fields::new(), HashMap::new());
    let update = ValidateDataTool.invoke(empty).await.unwrap();
    assert_eq!(update.get("is_valid"), Some(&Value::from(false)));
    assert_eq!(update.get("validation_result"), Some(&Value::from("failed")));
}

#[tokio::test]
async fn test_delay_waits() {
    let ctx = create_test_context(Fields::new(), params(vec![("delay_ms", Value::from(20))]));

    let start = std::time::Instant::now();
    let update = DelayTool.invoke(ctx).await.unwrap();

    assert!(update.is_empty());
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[tokio::test]
async fn test_delay_stops_on_cancellation() {
    let ctx = create_test_context(Fields::new(), params(vec![("delay_ms", Value::from(10_000))]));
    let token = ctx.cancellation.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(2), DelayTool.invoke(ctx))
        .await
        .expect("delay should end once cancelled");

    assert_eq!(result, Err(ToolError::Cancelled));
}

#[tokio::test]
async fn test_profile_sample_dataset() {
    let ctx = create_test_context(
        fields(vec![("dataset", Value::Array(sample_dataset()))]),
        HashMap::new(),
    );

    let update = ProfileDataTool.invoke(ctx).await.unwrap();
    let profile = update.get("profile").and_then(Value::as_object).unwrap();

    assert_eq!(profile.get("total_records"), Some(&Value::from(106)));
    assert_eq!(profile.get("numeric_records"), Some(&Value::from(104)));
    assert_eq!(profile.get("median"), Some(&Value::from(101.0)));
    assert_eq!(profile.get("min"), Some(&Value::from(-50.0)));
    assert_eq!(profile.get("max"), Some(&Value::from(300.0)));
    assert_eq!(update.get("iteration"), Some(&Value::from(0)));
}

#[tokio::test]
async fn test_profile_empty_dataset() {
    let ctx = create_test_context(Fields::new(), HashMap::new());

    let update = ProfileDataTool.invoke(ctx).await.unwrap();

    assert_eq!(update.get("anomaly_count"), Some(&Value::from(0)));
    let profile = update.get("profile").and_then(Value::as_object).unwrap();
    assert!(profile.contains_key("error"));
}

#[tokio::test]
async fn test_identify_anomalies_finds_planted_values() {
    let ctx = create_test_context(
        fields(vec![("dataset", Value::Array(sample_dataset()))]),
        HashMap::new(),
    );

    let update = IdentifyAnomaliesTool.invoke(ctx).await.unwrap();

    // four outliers and two missing values
    assert_eq!(update.get("anomaly_count"), Some(&Value::from(6)));
    let detection = update.get("detection_params").and_then(Value::as_object).unwrap();
    assert_eq!(detection.get("lower_bound"), Some(&Value::from(58.5)));
    assert_eq!(detection.get("upper_bound"), Some(&Value::from(142.5)));
}

#[tokio::test]
async fn test_identify_anomalies_needs_four_numbers() {
    let ctx = create_test_context(
        fields(vec![("dataset", Value::from(vec![1, 2, 1000]))]),
        HashMap::new(),
    );

    let update = IdentifyAnomaliesTool.invoke(ctx).await.unwrap();

    assert_eq!(update.get("anomaly_count"), Some(&Value::from(0)));
}

#[tokio::test]
async fn test_data_quality_pipeline() {
    let runtime = runtime();
    let graph_id = runtime.create_graph(data_quality_graph()).await.unwrap();

    let outcome = runtime
        .run(graph_id, fields(vec![("dataset", Value::Array(sample_dataset()))]))
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed, "error: {:?}", outcome.error);

    let state = &outcome.final_state;
    assert_eq!(state.get("anomaly_count"), Some(&Value::from(0)));
    assert_eq!(state.get("modifications_made"), Some(&Value::from(6)));
    assert_eq!(state.get("iteration"), Some(&Value::from(1)));

    let dataset = state.get("dataset").and_then(Value::as_array).unwrap();
    assert_eq!(dataset.len(), 106);
    assert!(dataset.iter().all(|v| !v.is_null()), "missing values should be imputed");
    assert!(dataset.iter().filter_map(Value::as_f64).all(|n| (58.5..=142.5).contains(&n)));

    let score = state.get("quality_score").and_then(Value::as_f64).unwrap();
    assert!((score - 100.0 * 100.0 / 106.0).abs() < 1e-9);

    let exit = outcome
        .log
        .iter()
        .find(|entry| entry.phase == Phase::LoopExit)
        .expect("loop should log its exit");
    assert_eq!(exit.node_id, "detect");
    assert_eq!(exit.detail["reason"], "predicate");
    assert_eq!(exit.detail["iterations"], 1);
}

#[tokio::test]
async fn test_register_all_lists_tools() {
    let runtime = runtime();
    let tools = runtime.list_tools();

    for name in [
        "debug.log",
        "state.set",
        "state.increment",
        "time.delay",
        "transform_data",
        "validate_data",
        "profile_data",
        "identify_anomalies",
        "generate_rules",
        "apply_rules",
    ] {
        assert!(tools.contains(&name.to_string()), "missing tool {}", name);
    }
}
