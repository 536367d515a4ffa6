//! Data-quality pipeline: profile a numeric dataset, detect outliers and
//! missing values, derive cleaning rules and apply them until the anomaly
//! count drops below a threshold.

use async_trait::async_trait;
use graphcore::{
    CompareOp, GraphDefinition, LoopSpec, NodeSpec, Predicate, StateUpdate, Tool, ToolContext,
    ToolError, ToolMetadata, Value,
};
use serde_json::json;

const OUTLIER: &str = "statistical_outlier";
const MISSING: &str = "missing_value";

/// Graph wiring the four pipeline tools.
///
/// `detect` runs once, then the loop repeats generate, apply and re-detect
/// while at least 5 anomalies remain, at most 5 times.
pub fn data_quality_graph() -> GraphDefinition {
    let mut def = GraphDefinition::new("data_quality_pipeline")
        .with_description("Automated data quality assessment and improvement pipeline");

    def.add_node(NodeSpec::new("profile", "profile_data"));
    def.add_node(NodeSpec::new("detect", "identify_anomalies"));
    def.add_node(NodeSpec::new("rules", "generate_rules"));
    def.add_node(NodeSpec::new("apply", "apply_rules"));
    def.add_node(NodeSpec::new("recheck", "identify_anomalies"));

    def.connect("profile", "detect");
    def.add_loop(
        LoopSpec::new(
            "detect",
            vec!["rules", "apply", "recheck"],
            Predicate::field("anomaly_count", CompareOp::Ge, 5),
        )
        .with_max_iterations(5),
    );
    def.set_entry("profile");
    def
}

/// 106 records around 100 with four planted outliers and two missing values
pub fn sample_dataset() -> Vec<Value> {
    let mut data: Vec<Value> = (0..100)
        .map(|i| Value::from(80.0 + ((i * 37) % 41) as f64))
        .collect();

    let planted = [
        (7, Value::from(200.0)),
        (15, Value::Null),
        (23, Value::from(250.0)),
        (51, Value::from(-50.0)),
        (64, Value::Null),
        (88, Value::from(300.0)),
    ];
    for (pos, value) in planted {
        data.insert(pos, value);
    }
    data
}

/// Basic statistics over the numeric records of `dataset`
pub struct ProfileDataTool;

#[async_trait]
impl Tool for ProfileDataTool {
    fn name(&self) -> &str {
        "profile_data"
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError> {
        let data = dataset(&ctx)?;
        let mut update = StateUpdate::new();

        if data.is_empty() {
            update.insert("profile".into(), json!({ "error": "No data provided" }).into());
            update.insert("anomaly_count".into(), Value::from(0));
            return Ok(update);
        }

        let mut numbers = numeric(&data);
        numbers.sort_by(f64::total_cmp);

        let profile = json!({
            "total_records": data.len(),
            "numeric_records": numbers.len(),
            "mean": mean(&numbers),
            "median": median(&numbers),
            "std_dev": std_dev(&numbers),
            "min": numbers.first(),
            "max": numbers.last(),
        });
        tracing::info!("Data profile: {}", profile);

        update.insert("profile".into(), profile.into());
        update.insert("iteration".into(), ctx.field_or("iteration", Value::from(0)));
        Ok(update)
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Compute count, mean, median, spread and range of the dataset".to_string(),
            category: "data_quality".to_string(),
        }
    }
}

/// Flags IQR outliers and missing values
pub struct IdentifyAnomaliesTool;

#[async_trait]
impl Tool for IdentifyAnomaliesTool {
    fn name(&self) -> &str {
        "identify_anomalies"
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError> {
        let data = dataset(&ctx)?;
        let mut sorted = numeric(&data);
        let mut update = StateUpdate::new();

        if sorted.len() < 4 {
            update.insert("anomalies".into(), Value::Array(Vec::new()));
            update.insert("anomaly_count".into(), Value::from(0));
            update.insert("anomaly_indices".into(), Value::Array(Vec::new()));
            return Ok(update);
        }

        sorted.sort_by(f64::total_cmp);
        let q1 = sorted[sorted.len() / 4];
        let q3 = sorted[3 * sorted.len() / 4];
        let iqr = q3 - q1;
        let lower = q1 - 1.5 * iqr;
        let upper = q3 + 1.5 * iqr;

        let mut anomalies = Vec::new();
        let mut indices = Vec::new();

        for (idx, value) in data.iter().enumerate() {
            if let Some(n) = value.as_f64().filter(|n| *n < lower || *n > upper) {
                anomalies.push(json!({
                    "index": idx,
                    "value": n,
                    "reason": OUTLIER,
                    "bounds": { "lower": lower, "upper": upper },
                }));
                indices.push(idx);
            }
        }
        for (idx, value) in data.iter().enumerate() {
            if value.is_null() {
                anomalies.push(json!({ "index": idx, "value": null, "reason": MISSING }));
                indices.push(idx);
            }
        }

        tracing::info!("Found {} anomalies", anomalies.len());

        update.insert("anomaly_count".into(), Value::from(anomalies.len()));
        update.insert("anomalies".into(), json!(anomalies).into());
        update.insert("anomaly_indices".into(), Value::from(indices));
        update.insert(
            "detection_params".into(),
            json!({
                "q1": q1,
                "q3": q3,
                "iqr": iqr,
                "lower_bound": lower,
                "upper_bound": upper,
            })
            .into(),
        );
        Ok(update)
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Detect outliers (1.5 IQR) and missing values".to_string(),
            category: "data_quality".to_string(),
        }
    }
}

/// Turns the detected anomalies into cleaning rules
pub struct GenerateRulesTool;

#[async_trait]
impl Tool for GenerateRulesTool {
    fn name(&self) -> &str {
        "generate_rules"
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError> {
        let anomalies = ctx.field_or("anomalies", Value::Array(Vec::new()));
        let profile = ctx.field_or("profile", Value::Null);
        let params = ctx.field_or("detection_params", Value::Null);

        let count = |reason: &str| {
            anomalies.as_array().map_or(0, |items| {
                items
                    .iter()
                    .filter(|a| get(a, "reason").and_then(Value::as_str) == Some(reason))
                    .count()
            })
        };
        let json_of =
            |v: &Value, key: &str| serde_json::Value::from(get(v, key).cloned().unwrap_or_default());

        let mut rules = Vec::new();

        let missing = count(MISSING);
        if missing > 0 {
            rules.push(json!({
                "rule_id": "rule_001",
                "type": "imputation",
                "action": "replace_with_median",
                "target": "missing_values",
                "params": {
                    "replacement_value": get(&profile, "median").and_then(Value::as_f64).unwrap_or(0.0),
                },
                "affected_count": missing,
            }));
        }

        let outliers = count(OUTLIER);
        if outliers > 0 {
            rules.push(json!({
                "rule_id": "rule_002",
                "type": "capping",
                "action": "cap_at_bounds",
                "target": "outliers",
                "params": {
                    "lower_bound": json_of(&params, "lower_bound"),
                    "upper_bound": json_of(&params, "upper_bound"),
                },
                "affected_count": outliers,
            }));
        }

        rules.push(json!({
            "rule_id": "rule_003",
            "type": "validation",
            "action": "enforce_range",
            "target": "all_numeric",
            "params": { "min": json_of(&profile, "min"), "max": json_of(&profile, "max") },
        }));

        tracing::info!("Generated {} quality rules", rules.len());

        let mut update = StateUpdate::new();
        update.insert("rules_count".into(), Value::from(rules.len()));
        update.insert("rules".into(), json!(rules).into());
        Ok(update)
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Derive imputation, capping and range rules".to_string(),
            category: "data_quality".to_string(),
        }
    }
}

/// Applies imputation and capping rules to `dataset`
pub struct ApplyRulesTool;

#[async_trait]
impl Tool for ApplyRulesTool {
    fn name(&self) -> &str {
        "apply_rules"
    }

    async fn invoke(&self, ctx: ToolContext) -> Result<StateUpdate, ToolError> {
        let mut data = dataset(&ctx)?;
        let rules = ctx.field_or("rules", Value::Array(Vec::new()));
        let anomalies = ctx.field_or("anomalies", Value::Array(Vec::new()));
        let flagged = ctx
            .field_or("anomaly_indices", Value::Array(Vec::new()))
            .as_array()
            .map_or(0, Vec::len);
        let iteration = ctx.field_or("iteration", Value::from(0)).as_f64().unwrap_or(0.0);

        let indices_for = |reason: &str| -> Vec<usize> {
            anomalies
                .as_array()
                .into_iter()
                .flatten()
                .filter(|a| get(a, "reason").and_then(Value::as_str) == Some(reason))
                .filter_map(|a| get(a, "index").and_then(Value::as_i64))
                .filter_map(|idx| usize::try_from(idx).ok())
                .collect()
        };

        let mut modifications: usize = 0;
        for rule in rules.as_array().into_iter().flatten() {
            let kind = get(rule, "type").and_then(Value::as_str);
            let param = |key: &str| {
                get(rule, "params")
                    .and_then(|p| get(p, key))
                    .and_then(Value::as_f64)
            };

            match kind {
                Some("imputation") => {
                    let replacement = param("replacement_value").ok_or_else(|| {
                        ToolError::ExecutionFailed("imputation rule without replacement_value".to_string())
                    })?;
                    for idx in indices_for(MISSING) {
                        if let Some(slot) = data.get_mut(idx) {
                            *slot = Value::from(replacement);
                            modifications += 1;
                        }
                    }
                }
                Some("capping") => {
                    let (Some(lower), Some(upper)) = (param("lower_bound"), param("upper_bound")) else {
                        return Err(ToolError::ExecutionFailed("capping rule without bounds".to_string()));
                    };
                    for idx in indices_for(OUTLIER) {
                        let Some(slot) = data.get_mut(idx) else { continue };
                        match slot.as_f64() {
                            Some(n) if n < lower => *slot = Value::from(lower),
                            Some(n) if n > upper => *slot = Value::from(upper),
                            _ => continue,
                        }
                        modifications += 1;
                    }
                }
                _ => {}
            }
        }

        tracing::info!("Applied rules, made {} modifications", modifications);

        let original = get(&ctx.field_or("profile", Value::Null), "total_records")
            .and_then(Value::as_f64)
            .unwrap_or(data.len() as f64);
        let quality_score = if original > 0.0 {
            (original - flagged as f64) / original * 100.0
        } else {
            0.0
        };

        let mut update = StateUpdate::new();
        update.insert("dataset".into(), Value::Array(data));
        update.insert("modifications_made".into(), Value::from(modifications));
        update.insert("quality_score".into(), Value::from(quality_score));
        update.insert("iteration".into(), Value::from(iteration + 1.0));
        Ok(update)
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Clean the dataset with the generated rules".to_string(),
            category: "data_quality".to_string(),
        }
    }
}

/// `dataset` as a list; missing reads as empty
fn dataset(ctx: &ToolContext) -> Result<Vec<Value>, ToolError> {
    match ctx.state.get("dataset") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(ToolError::InvalidFieldType {
            field: "dataset".to_string(),
            expected: "array".to_string(),
            actual: other.type_name().to_string(),
        }),
    }
}

fn numeric(data: &[Value]) -> Vec<f64> {
    data.iter().filter_map(Value::as_f64).collect()
}

fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_object().and_then(|map| map.get(key))
}

fn mean(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.iter().sum::<f64>() / sorted.len() as f64
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Sample standard deviation
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}
