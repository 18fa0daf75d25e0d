use leycore::{
    Edge, ErrorKind, EventKind, ExecutionOptions, ExecutionStatus, NodeExecutionStatus, NodeSpec,
    Value, Workflow,
};
use leynodes::standard_registry;
use leyruntime::{EngineConfig, ExecutionEngine};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(standard_registry()), EngineConfig::default())
}

fn value(json: serde_json::Value) -> Value {
    Value::from(json)
}

#[test]
fn registers_every_standard_node() {
    let registry = standard_registry();
    assert_eq!(
        registry.list_node_types(),
        vec!["debug", "delay", "filter", "http", "input", "join", "output", "transform"]
    );
}

#[tokio::test]
async fn input_transform_output() {
    let mut workflow = Workflow::new("double");
    workflow.add_node(
        NodeSpec::new("in", "input")
            .with_label("numbers")
            .with_property("dataType", "array"),
    );
    workflow.add_node(
        NodeSpec::new("double", "transform")
            .with_property("transformType", "map")
            .with_property("expression", "item * 2"),
    );
    workflow.add_node(
        NodeSpec::new("out", "output")
            .with_label("doubled")
            .with_property("format", "raw"),
    );
    workflow.link("in", "double");
    workflow.link("double", "out");

    let options = ExecutionOptions::new().with_variable("numbers", value(json!([1, 2, 3])));
    let result = engine().run_workflow(&workflow, options).await;

    assert!(result.success, "errors: {:?}", result.context.errors);
    assert_eq!(result.final_outputs["doubled"], value(json!([2, 4, 6])));
    assert_eq!(result.node_states["out"].output, Some(value(json!([2, 4, 6]))));
}

#[tokio::test]
async fn filter_then_join() {
    let nodes = vec![
        NodeSpec::new("users", "input")
            .with_property("dataType", "array")
            .with_property(
                "defaultValue",
                value(json!([
                    {"id": 1, "name": "Ada", "active": true},
                    {"id": 2, "name": "Linus", "active": false}
                ])),
            ),
        NodeSpec::new("orders", "input")
            .with_property("dataType", "array")
            .with_property("defaultValue", value(json!([{"id": 1, "total": 10}]))),
        NodeSpec::new("active", "transform")
            .with_property("transformType", "filter")
            .with_property("expression", "item.active"),
        NodeSpec::new("joined", "join")
            .with_property("joinType", "inner")
            .with_property("joinKey", "id"),
        NodeSpec::new("report", "output")
            .with_label("report")
            .with_property("format", "raw"),
    ];
    let edges = vec![
        Edge::new("users", "active"),
        Edge::new("active", "joined").with_handles("output", "input1"),
        Edge::new("orders", "joined").with_handles("output", "input2"),
        Edge::new("joined", "report"),
    ];

    let result = engine().run(nodes, edges, ExecutionOptions::new()).await;

    assert!(result.success, "errors: {:?}", result.context.errors);
    assert_eq!(
        result.final_outputs["report"],
        value(json!([{"id": 1, "name": "Ada", "active": true, "total": 10}]))
    );
}

#[tokio::test]
async fn filter_node_splits_items() {
    let nodes = vec![
        NodeSpec::new("n", "input")
            .with_property("dataType", "array")
            .with_property("defaultValue", value(json!([1, 5, 10]))),
        NodeSpec::new("big", "filter").with_property("condition", "item > 3"),
    ];
    let edges = vec![Edge::new("n", "big")];

    let result = engine().run(nodes, edges, ExecutionOptions::new()).await;

    assert!(result.success);
    assert_eq!(
        result.node_states["big"].output,
        Some(value(json!({"passed": [5, 10], "failed": [1]})))
    );
}

#[tokio::test]
async fn bad_expression_fails_validation_and_skips_dependents() {
    let nodes = vec![
        NodeSpec::new("n", "input").with_property("defaultValue", "x"),
        NodeSpec::new("t", "transform").with_property("expression", "input +"),
        NodeSpec::new("out", "output"),
    ];
    let edges = vec![Edge::new("n", "t"), Edge::new("t", "out")];

    let result = engine().run(nodes, edges, ExecutionOptions::new()).await;

    assert!(!result.success);
    assert_eq!(result.context.status, ExecutionStatus::Failed);
    assert_eq!(result.node_status("n"), Some(NodeExecutionStatus::Completed));
    assert_eq!(result.node_status("t"), Some(NodeExecutionStatus::Failed));
    assert_eq!(result.node_status("out"), Some(NodeExecutionStatus::Skipped));
    assert_eq!(result.context.errors.len(), 1);
    assert_eq!(result.context.errors[0].kind, ErrorKind::ValidationError);
}

#[tokio::test]
async fn cancelling_interrupts_a_delay() {
    let engine = Arc::new(engine());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    engine.subscribe(EventKind::NodeStarted, move |event| {
        if event.node_id.as_deref() == Some("wait") {
            let _ = tx.send(event.execution_id);
        }
    });

    let nodes = vec![
        NodeSpec::new("wait", "delay").with_property("delayMs", 60_000i64),
        NodeSpec::new("out", "output"),
    ];
    let edges = vec![Edge::new("wait", "out")];
    let options = ExecutionOptions::new().with_timeout_ms(120_000);

    let runner = Arc::clone(&engine);
    let handle = tokio::spawn(async move { runner.run(nodes, edges, options).await });

    let execution_id = rx.recv().await.unwrap();
    assert!(engine.cancel(execution_id));

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("delay should observe cancellation")
        .unwrap();

    assert_eq!(result.context.status, ExecutionStatus::Cancelled);
    assert_eq!(result.node_status("wait"), Some(NodeExecutionStatus::Failed));
    assert_eq!(result.node_status("out"), Some(NodeExecutionStatus::Skipped));
}
