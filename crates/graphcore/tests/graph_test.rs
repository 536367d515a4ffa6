use graphcore::{
    CompareOp, Edge, Fields, Graph, GraphDefinition, LoopSpec, NodeSpec, Predicate, ValidationError,
    Value,
};
use serde_json::json;

fn fields(pairs: Vec<(&str, Value)>) -> Fields {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// a -> b, both no-ops
fn linear() -> GraphDefinition {
    let mut def = GraphDefinition::new("linear");
    def.add_node(NodeSpec::new("a", "noop"));
    def.add_node(NodeSpec::new("b", "noop"));
    def.connect("a", "b");
    def.set_entry("a");
    def
}

#[test]
fn test_compile_linear_graph() {
    let graph = Graph::compile(linear()).unwrap();

    assert_eq!(graph.name(), "linear");
    assert_eq!(graph.entry(), "a");
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge("a").map(String::as_str), Some("b"));
    assert!(graph.edge("b").is_none());
    assert!(graph.conditional_edges("a").is_empty());
    assert!(!graph.has_undeclared_cycle());
}

#[test]
fn test_missing_entry() {
    let mut def = linear();
    def.entry = String::new();

    assert_eq!(Graph::compile(def).unwrap_err(), ValidationError::MissingEntry);
}

#[test]
fn test_unknown_entry() {
    let mut def = linear();
    def.set_entry("zzz");

    assert_eq!(
        Graph::compile(def).unwrap_err(),
        ValidationError::UnknownEntry("zzz".to_string())
    );
}

#[test]
fn test_duplicate_node() {
    let mut def = linear();
    def.add_node(NodeSpec::new("a", "other"));

    assert_eq!(
        Graph::compile(def).unwrap_err(),
        ValidationError::DuplicateNode("a".to_string())
    );
}

#[test]
fn test_empty_tool_name() {
    let mut def = linear();
    def.add_node(NodeSpec::new("c", "  "));

    assert_eq!(
        Graph::compile(def).unwrap_err(),
        ValidationError::EmptyTool("c".to_string())
    );
}

#[test]
fn test_dangling_edges() {
    let mut def = linear();
    def.connect("b", "ghost");
    assert!(matches!(
        Graph::compile(def).unwrap_err(),
        ValidationError::DanglingEdge { ref to, .. } if to == "ghost"
    ));

    let mut def = linear();
    def.connect_if("ghost", Predicate::always(), "a");
    assert!(matches!(
        Graph::compile(def).unwrap_err(),
        ValidationError::DanglingEdge { ref from, .. } if from == "ghost"
    ));
}

#[test]
fn test_two_unconditional_edges_are_ambiguous() {
    let mut def = linear();
    def.add_node(NodeSpec::new("c", "noop"));
    def.connect("a", "c");

    assert_eq!(
        Graph::compile(def).unwrap_err(),
        ValidationError::AmbiguousEdges("a".to_string())
    );
}

#[test]
fn test_conditional_edges_keep_declaration_order() {
    let mut def = linear();
    def.add_node(NodeSpec::new("c", "noop"));
    def.connect_if("b", Predicate::field("x", CompareOp::Gt, 1), "c");
    def.connect_if("b", Predicate::always(), "a");

    let graph = Graph::compile(def).unwrap();
    let targets: Vec<&str> = graph
        .conditional_edges("b")
        .iter()
        .map(|(_, to)| to.as_str())
        .collect();

    assert_eq!(targets, vec!["c", "a"]);
    assert!(graph.has_undeclared_cycle());
}

#[test]
fn test_loop_validation() {
    let always = Predicate::always;

    let mut def = linear();
    def.add_loop(LoopSpec::new("a", "ghost", always()));
    assert!(matches!(
        Graph::compile(def).unwrap_err(),
        ValidationError::UnknownLoopNode { ref missing, .. } if missing == "ghost"
    ));

    let mut def = linear();
    def.add_loop(LoopSpec::new("a", Vec::<String>::new(), always()));
    assert_eq!(
        Graph::compile(def).unwrap_err(),
        ValidationError::EmptyLoopBody("a".to_string())
    );

    let mut def = linear();
    def.add_loop(LoopSpec::new("a", "b", always()).with_max_iterations(0));
    assert_eq!(
        Graph::compile(def).unwrap_err(),
        ValidationError::InvalidLoopBound("a".to_string())
    );

    let mut def = linear();
    def.add_loop(LoopSpec::new("a", "b", always()));
    def.add_loop(LoopSpec::new("a", "b", always()));
    assert_eq!(
        Graph::compile(def).unwrap_err(),
        ValidationError::DuplicateLoop("a".to_string())
    );

    let mut def = linear();
    def.add_loop(LoopSpec::new("a", "b", always()));
    def.add_loop(LoopSpec::new("b", "a", always()));
    assert!(matches!(
        Graph::compile(def).unwrap_err(),
        ValidationError::NestedLoop { .. }
    ));

    let mut def = linear();
    def.add_loop(LoopSpec::new("a", "b", always()).with_exit("nowhere"));
    assert!(matches!(
        Graph::compile(def).unwrap_err(),
        ValidationError::UnknownLoopNode { ref missing, .. } if missing == "nowhere"
    ));
}

#[test]
fn test_loop_bodies_are_not_cycles() {
    let mut def = GraphDefinition::new("counter");
    def.add_node(NodeSpec::new("start", "noop"));
    def.add_node(NodeSpec::new("inc", "state.increment").with_param("field", "count"));
    def.add_loop(LoopSpec::new(
        "start",
        "inc",
        Predicate::field("count", CompareOp::Lt, 3),
    ));
    def.set_entry("start");

    let graph = Graph::compile(def).unwrap();

    assert!(!graph.has_undeclared_cycle());
    let spec = graph.loop_at("start").unwrap();
    assert_eq!(spec.max_iterations, 10);
    assert_eq!(spec.body.nodes(), ["inc".to_string()]);
}

#[test]
fn test_definition_accepts_alternate_field_names() {
    let def: GraphDefinition = serde_json::from_value(json!({
        "name": "aliases",
        "nodes": [
            { "name": "profile", "tool": "profile_data", "config": { "threshold": 5 } },
            { "id": "apply", "tool": "apply_rules" }
        ],
        "edges": [ { "from_node": "profile", "to_node": "apply" } ],
        "conditional_edges": [
            { "from": "apply", "condition": { "field": "done", "operator": "==", "value": false }, "to": "profile" }
        ],
        "loops": [
            {
                "node": "apply",
                "body": ["profile"],
                "continue_while": { "field": "anomaly_count", "operator": ">=", "value": 5 },
                "max_iterations": 5
            }
        ],
        "entry_point": "profile"
    }))
    .unwrap();

    assert_eq!(def.entry, "profile");
    assert_eq!(def.find_node("profile").unwrap().params.get("threshold"), Some(&Value::from(5)));
    assert_eq!(def.edges[0].to, "apply");
    assert_eq!(def.loops[0].max_iterations, 5);

    Graph::compile(def).unwrap();
}

#[test]
fn test_edge_with_condition_becomes_conditional() {
    let def: GraphDefinition = serde_json::from_value(json!({
        "name": "gated",
        "nodes": [
            { "name": "a", "tool": "noop" },
            { "name": "b", "tool": "noop" },
            { "name": "c", "tool": "noop" }
        ],
        "edges": [
            { "from_node": "a", "to_node": "b", "condition": { "field": "go", "operator": "==", "value": true } },
            { "from_node": "a", "to_node": "c", "condition": null }
        ],
        "conditional_edges": [
            { "from": "a", "when": { "field": "stop", "operator": "==", "value": true }, "to": "c" }
        ],
        "entry_point": "a"
    }))
    .unwrap();

    assert_eq!(def.edges, vec![Edge { from: "a".into(), to: "c".into() }]);
    let graph = Graph::compile(def).unwrap();
    let targets: Vec<&str> = graph.conditional_edges("a").iter().map(|(_, to)| to.as_str()).collect();
    assert_eq!(targets, vec!["c", "b"]);

    let (gate, _) = &graph.conditional_edges("a")[1];
    assert!(!gate.evaluate(&Fields::new()));
    assert!(gate.evaluate(&fields(vec![("go", Value::from(true))])));

    // a bare edge never drops keys silently
    let err = serde_json::from_value::<Edge>(json!({ "from": "a", "to": "b", "when": {} })).unwrap_err();
    assert!(err.to_string().contains("unknown field"));
}

#[test]
fn test_loop_condition_is_an_exit_condition() {
    let spec: LoopSpec = serde_json::from_value(json!({
        "node": "apply",
        "body": "detect",
        "condition": { "field": "anomaly_count", "operator": "<", "value": 5 },
        "max_iterations": 5
    }))
    .unwrap();

    assert!(spec.continue_while.evaluate(&fields(vec![("anomaly_count", Value::from(6))])));
    assert!(!spec.continue_while.evaluate(&fields(vec![("anomaly_count", Value::from(2))])));
    assert!(matches!(spec.continue_while, Predicate::Not { .. }));

    let without_body = serde_json::from_value::<LoopSpec>(json!({
        "node": "apply",
        "condition": { "field": "anomaly_count", "operator": "<", "value": 5 }
    }))
    .unwrap_err();
    assert!(without_body.to_string().contains("needs a `body`"));

    let both = serde_json::from_value::<LoopSpec>(json!({
        "node": "apply",
        "body": "detect",
        "condition": { "always": true },
        "continue_while": { "always": true }
    }))
    .unwrap_err();
    assert!(both.to_string().contains("both"));

    let neither = serde_json::from_value::<LoopSpec>(json!({ "node": "apply", "body": "detect" }));
    assert!(neither.is_err());
}

#[test]
fn test_definition_serializes_and_reloads() {
    let mut def = linear();
    def.add_node(NodeSpec::new("c", "noop"));
    def.connect_if("b", Predicate::field("x", CompareOp::Gt, 1), "c");
    def.add_loop(LoopSpec::new("a", "c", Predicate::field("x", CompareOp::Lt, 2.5)).with_max_iterations(3));
    def.nodes[0] = NodeSpec::new("a", "noop").with_param("limit", 2);

    let json = serde_json::to_value(&def).unwrap();
    assert_eq!(json["nodes"][0]["params"]["limit"], json!(2));
    assert_eq!(json["loops"][0]["continue_while"]["value"], json!(2.5));

    let reloaded: GraphDefinition = serde_json::from_value(json).unwrap();
    assert_eq!(reloaded.edges, def.edges);
    assert_eq!(reloaded.conditional_edges.len(), 1);
    assert_eq!(reloaded.loops[0].max_iterations, 3);
    Graph::compile(reloaded).unwrap();
}

#[test]
fn test_custom_predicates_serialize_by_name() {
    let mut def = linear();
    def.add_node(NodeSpec::new("c", "noop"));
    def.connect_if("b", Predicate::custom("x_is_even", |_: &Fields| true), "c");
    let graph = Graph::compile(def).unwrap();

    let json = serde_json::to_value(graph.definition()).unwrap();
    assert_eq!(json["conditional_edges"][0]["when"], json!({ "custom": "x_is_even" }));

    // the name alone cannot rebuild the callback
    assert!(serde_json::from_value::<Predicate>(json!({ "custom": "x_is_even" })).is_err());
}

#[test]
fn test_numbers_keep_their_integral_form() {
    let state = fields(vec![
        ("count", Value::from(2)),
        ("ratio", Value::from(2.5)),
        ("items", Value::from(vec![1.0, 3.0])),
    ]);

    let text = serde_json::to_string(&state).unwrap();
    assert_eq!(text, r#"{"count":2,"items":[1,3],"ratio":2.5}"#);
    assert_eq!(serde_json::to_value(&state).unwrap(), serde_json::Value::from(Value::from(state.clone())));

    let back: Fields = serde_json::from_str(&text).unwrap();
    assert_eq!(back, state);
}

#[test]
fn test_condition_operators() {
    let state = fields(vec![
        ("x", Value::from(2)),
        ("name", Value::from("alpha")),
        ("tags", Value::from(vec!["red", "blue"])),
    ]);
    let holds = |field: &str, op: CompareOp, value: Value| Predicate::field(field, op, value).evaluate(&state);

    assert!(holds("x", CompareOp::Eq, Value::from(2)));
    assert!(holds("x", CompareOp::Ne, Value::from(3)));
    assert!(holds("x", CompareOp::Gt, Value::from(1)));
    assert!(holds("x", CompareOp::Ge, Value::from(2)));
    assert!(holds("x", CompareOp::Lt, Value::from(2.5)));
    assert!(holds("x", CompareOp::Le, Value::from(2)));
    assert!(holds("name", CompareOp::In, Value::from(vec!["alpha", "beta"])));
    assert!(holds("name", CompareOp::NotIn, Value::from(vec!["gamma"])));
    assert!(holds("tags", CompareOp::Contains, Value::from("red")));
    assert!(holds("name", CompareOp::Contains, Value::from("lph")));

    // incomparable or missing values never satisfy an ordering
    assert!(!holds("name", CompareOp::Gt, Value::from(1)));
    assert!(!holds("missing", CompareOp::Lt, Value::from(1)));
    assert!(holds("missing", CompareOp::Eq, Value::Null));
    assert!(!holds("name", CompareOp::NotIn, Value::from(5)));
}

#[test]
fn test_composite_predicates() {
    let state = fields(vec![("x", Value::from(2)), ("flag", Value::Null)]);

    let parsed: Predicate = serde_json::from_value(json!({
        "all": [
            { "field": "x", "operator": ">", "value": 1 },
            { "not": { "exists": "flag" } },
            { "any": [ { "always": false }, { "field": "x", "operator": "in", "value": [1, 2] } ] }
        ]
    }))
    .unwrap();
    assert!(parsed.evaluate(&state));

    assert!(Predicate::All { all: vec![] }.evaluate(&state));
    assert!(!Predicate::Any { any: vec![] }.evaluate(&state));
    assert!(!Predicate::always().negate().evaluate(&state));

    let even = Predicate::custom("x_is_even", |f: &Fields| {
        f.get("x").and_then(Value::as_i64).is_some_and(|x| x % 2 == 0)
    });
    assert!(even.evaluate(&state));
}
