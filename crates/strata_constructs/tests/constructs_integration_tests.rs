//! Integration tests for constructs sharing one app.

use std::fs;

use serde_json::json;
use tempfile::tempdir;

use strata_constructs::{
    CachePolicy, CachePolicyProps, Construct, Nodegroup, NodegroupProps, PlaceIndex, PlaceIndexProps, Queue,
    QueueEncryption, QueueProps,
};
use strata_core::{App, ContextFile, CoreError, RenderInputs, Template};

fn app_from_context_file(content: &str) -> App {
    let temp = tempdir().unwrap();
    let path = temp.path().join("strata.json");
    fs::write(&path, content).unwrap();

    let mut app = App::default();
    app.apply_context_file(&ContextFile::load(&path).unwrap()).unwrap();
    app
}

#[test]
fn test_full_stack_synthesis() {
    let mut app = app_from_context_file(
        r#"{ "context": { "@strata/aws-eks:nodegroupNameAttribute": true, "@strata/aws-sqs:sqsManagedSseByDefault": true } }"#,
    );
    let stack = app.add_scope(app.root(), "Prod").unwrap();

    let desired = app.parameter::<u32>("DesiredSize");
    let nodegroup = Nodegroup::new(
        &mut app,
        stack,
        "Workers",
        NodegroupProps::new("prod-cluster")
            .with_desired_size(desired)
            .with_max_size(8u32)
            .with_instance_types(["m5.large"]),
    )
    .unwrap();
    let queue = Queue::new(&mut app, stack, "Jobs", QueueProps::new().with_name("jobs.fifo")).unwrap();
    let policy = CachePolicy::new(&mut app, stack, "Cache", CachePolicyProps::new()).unwrap();
    let index = PlaceIndex::new(&mut app, stack, "Places", PlaceIndexProps::new()).unwrap();

    assert_eq!(
        nodegroup.nodegroup_name(),
        &json!({ "Fn::GetAtt": ["ProdWorkers", "NodegroupName"] })
    );
    assert!(queue.fifo());
    assert_eq!(queue.encryption(), Some(QueueEncryption::SqsManaged));

    let template = app.synth(&RenderInputs::new().with("DesiredSize", 4)).unwrap();
    assert_eq!(template.resources.len(), 4);
    for construct in [
        &nodegroup as &dyn Construct,
        &queue as &dyn Construct,
        &policy as &dyn Construct,
        &index as &dyn Construct,
    ] {
        assert!(template.resource(construct.logical_id()).is_some());
    }

    let workers = template.resource("ProdWorkers").unwrap();
    assert_eq!(workers.properties["ScalingConfig"]["DesiredSize"], json!(4));
    assert_eq!(workers.properties["AmiType"], json!("AL2_x86_64"));
    assert_eq!(workers.metadata["strata:path"], json!("Prod/Workers"));
    assert_eq!(template.resource("ProdPlaces").unwrap().properties["IndexName"], json!("ProdPlaces"));

    let rendered = template.to_json_pretty().unwrap();
    let parsed: Template = serde_json::from_str(&rendered).unwrap();
    assert_eq!(parsed, template);
    assert!(!rendered.contains("${Token["));
}

#[test]
fn test_first_registered_deferred_failure_is_reported() {
    let mut app = App::default();
    let stack = app.add_scope(app.root(), "Stack").unwrap();
    let size = app.parameter::<u32>("Size");
    let retention = app.parameter::<u32>("Retention");

    Nodegroup::new(
        &mut app,
        stack,
        "Workers",
        NodegroupProps::new("c").with_desired_size(size).with_max_size(3u32),
    )
    .unwrap();
    Queue::new(&mut app, stack, "Jobs", QueueProps::new().with_retention_period(retention)).unwrap();

    let inputs = RenderInputs::new().with("Size", 5).with("Retention", 10);
    match app.synth(&inputs).unwrap_err() {
        CoreError::Validation { path, message } => {
            assert_eq!(path, "Stack/Workers");
            assert!(message.contains("Desired capacity 5"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_missing_parameter_is_reported() {
    let mut app = App::default();
    let stack = app.add_scope(app.root(), "Stack").unwrap();
    let max = app.parameter::<u32>("MaxSize");
    Nodegroup::new(&mut app, stack, "Workers", NodegroupProps::new("c").with_max_size(max)).unwrap();

    let err = app.synth(&RenderInputs::new()).unwrap_err();
    assert!(matches!(err, CoreError::UnresolvedToken { .. }));
    assert!(err.to_string().contains("MaxSize"));
}

#[test]
fn test_warnings_are_rendered() {
    let mut app = App::default();
    let stack = app.add_scope(app.root(), "Stack").unwrap();
    let mut props = NodegroupProps::new("c");
    props.instance_type = Some("t3.large".to_string());
    Nodegroup::new(&mut app, stack, "Workers", props).unwrap();

    let template = app.synth(&RenderInputs::new()).unwrap();
    assert_eq!(template.warnings.len(), 1);
    assert_eq!(template.warnings[0].path, "Stack/Workers");

    let rendered: serde_json::Value = serde_json::from_str(&template.to_json_pretty().unwrap()).unwrap();
    assert!(rendered["Warnings"][0]["message"]
        .as_str()
        .unwrap()
        .contains("instanceTypes"));
}

#[test]
fn test_duplicate_construct_id_rejected() {
    let mut app = App::default();
    let stack = app.add_scope(app.root(), "Stack").unwrap();
    Queue::new(&mut app, stack, "Jobs", QueueProps::new()).unwrap();

    let err = Queue::new(&mut app, stack, "Jobs", QueueProps::new()).unwrap_err();
    assert!(matches!(
        err,
        strata_constructs::ConstructError::Core(CoreError::DuplicateScope { .. })
    ));
}
