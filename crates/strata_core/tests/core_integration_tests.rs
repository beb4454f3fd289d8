//! Integration tests for flag resolution and deferred validation.

use std::cell::Cell;
use std::fs;
use std::rc::Rc;

use serde_json::json;
use tempfile::tempdir;

use strata_core::{
    flags::EKS_NODEGROUP_NAME, App, ContextFile, CoreError, FlagDefaults, FlagDefinition,
    FlagRegistry, RenderInputs, Resolvable, ValidationError, RETIRED_FLAGS,
};

fn min_max(min: Resolvable<u32>, max: Resolvable<u32>) -> (Resolvable<u32>, Resolvable<u32>) {
    (min, max)
}

fn check_min_max((min, max): (u32, u32)) -> Result<(), ValidationError> {
    if min > max {
        return Err(ValidationError::new(format!("bad range: {} > {}", min, max)));
    }
    Ok(())
}

/// Every flag that is not retired and not set resolves to its default.
#[test]
fn test_defaults_for_every_registered_flag() {
    let app = App::default();
    let registry = FlagRegistry::current();

    for definition in registry.flags() {
        assert_eq!(
            app.is_enabled(app.root(), &definition.name).unwrap(),
            registry.default_for(&definition.name),
            "flag {}",
            definition.name
        );
    }
}

/// Retired flags are enabled unless someone tries to set them.
#[test]
fn test_every_retired_flag() {
    for flag in RETIRED_FLAGS {
        let app = App::default();
        assert_eq!(app.is_enabled(app.root(), flag).unwrap(), Some(true));

        let app = App::default().with_context(*flag, true).unwrap();
        let err = app.is_enabled(app.root(), flag).unwrap_err();
        assert!(matches!(err, CoreError::RetiredFlag { .. }));
        assert!(err.to_string().contains(flag));
    }
}

#[test]
fn test_retired_flag_override_scenario() {
    let registry = FlagRegistry::new().with_retired("old-flag");
    let app = App::new(registry).with_context("old-flag", false).unwrap();

    let err = app.is_enabled(app.root(), "old-flag").unwrap_err();
    assert!(err.to_string().contains("'old-flag'"));
}

#[test]
fn test_parent_context_scenario() {
    let mut app = App::new(FlagRegistry::new());
    let parent = app.add_scope(app.root(), "Parent").unwrap();
    app.set_context(parent, "flagA", true).unwrap();
    let child = app.add_scope(parent, "Child").unwrap();

    assert_eq!(app.is_enabled(child, "flagA").unwrap(), Some(true));
    assert_eq!(app.is_enabled(app.root(), "flagA").unwrap(), None);
}

#[test]
fn test_context_file_on_disk() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("strata.json");
    fs::write(
        &path,
        r#"{ "context": { "@strata/aws-eks:nodegroupNameAttribute": true } }"#,
    )
    .unwrap();

    let mut app = App::default();
    app.apply_context_file(&ContextFile::load(&path).unwrap()).unwrap();
    let stack = app.add_scope(app.root(), "Stack").unwrap();

    assert_eq!(app.is_enabled(stack, EKS_NODEGROUP_NAME).unwrap(), Some(true));
}

#[test]
fn test_registry_file_on_disk() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("flags.yaml");
    fs::write(
        &path,
        "flags:\n  - name: custom\n    default: true\nretired:\n  - gone\n",
    )
    .unwrap();

    let mut registry = FlagRegistry::current();
    registry.merge(FlagRegistry::load(&path).unwrap());
    registry.add_flag(FlagDefinition::new("other"));

    let app = App::new(registry);
    assert_eq!(app.is_enabled(app.root(), "custom").unwrap(), Some(true));
    assert_eq!(app.is_enabled(app.root(), "gone").unwrap(), Some(true));
    assert_eq!(app.is_enabled(app.root(), "other").unwrap(), None);
}

#[test]
fn test_literal_min_max_passes() {
    let mut app = App::default();
    let scope = app.add_scope(app.root(), "Range").unwrap();

    app.with_resolved(
        scope,
        min_max(Resolvable::Literal(5), Resolvable::Literal(10)),
        check_min_max,
    )
    .unwrap();
    assert_eq!(app.pipeline().pending_checks(), 0);
}

#[test]
fn test_literal_min_max_fails_synchronously() {
    let mut app = App::default();
    let scope = app.add_scope(app.root(), "Range").unwrap();

    let err = app
        .with_resolved(
            scope,
            min_max(Resolvable::Literal(15), Resolvable::Literal(10)),
            check_min_max,
        )
        .unwrap_err();
    assert!(err.to_string().contains("bad"));
}

#[test]
fn test_deferred_check_never_sees_partial_inputs() {
    let mut app = App::default();
    let scope = app.add_scope(app.root(), "Range").unwrap();
    let min = app.parameter::<u32>("Min");
    let max = app.parameter::<u32>("Max");
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();

    app.with_resolved(
        scope,
        min_max(Resolvable::Deferred(min), Resolvable::Deferred(max)),
        move |values| {
            counter.set(counter.get() + 1);
            check_min_max(values)
        },
    )
    .unwrap();

    // Only one of the two values is available: the pass fails before the
    // callback sees anything.
    let err = app.synth(&RenderInputs::new().with("Min", 1)).unwrap_err();
    assert!(matches!(err, CoreError::UnresolvedToken { .. }));
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_deferred_check_runs_once_across_syntheses() {
    let mut app = App::default();
    let scope = app.add_scope(app.root(), "Range").unwrap();
    let max = app.parameter::<u32>("Max");
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();

    app.with_resolved(
        scope,
        min_max(Resolvable::Literal(2), Resolvable::Deferred(max)),
        move |values| {
            counter.set(counter.get() + 1);
            check_min_max(values)
        },
    )
    .unwrap();
    app.add_resource(scope, "Test::Range", json!({ "Max": Resolvable::Deferred(max) }))
        .unwrap();

    let inputs = RenderInputs::new().with("Max", 8);
    let first = app.synth(&inputs).unwrap();
    let second = app.synth(&inputs).unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(first, second);
    assert_eq!(first.resource("Range").unwrap().properties, json!({ "Max": 8 }));
}

fn desired_group(app: &mut App) -> Rc<Cell<u32>> {
    let scope = app.add_scope(app.root(), "Group").unwrap();
    let desired = app.parameter::<u32>("Desired");
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();

    app.with_resolved(
        scope,
        min_max(Resolvable::Deferred(desired), Resolvable::Literal(4)),
        move |values| {
            counter.set(counter.get() + 1);
            check_min_max(values)
        },
    )
    .unwrap();
    app.add_resource(scope, "Test::Group", json!({ "Desired": Resolvable::Deferred(desired) }))
        .unwrap();
    calls
}

#[test]
fn test_failed_check_keeps_failing_on_later_syntheses() {
    let mut app = App::default();
    let calls = desired_group(&mut app);
    let inputs = RenderInputs::new().with("Desired", 9);

    let first = app.synth(&inputs).unwrap_err();
    assert!(first.to_string().contains("bad range: 9 > 4"));

    let second = app.synth(&inputs).unwrap_err();
    assert!(matches!(second, CoreError::Validation { .. }));
    assert!(second.to_string().contains("bad range: 9 > 4"));
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_check_runs_after_missing_parameter_is_supplied() {
    let mut app = App::default();
    let calls = desired_group(&mut app);

    let err = app.synth(&RenderInputs::new()).unwrap_err();
    assert!(matches!(err, CoreError::UnresolvedToken { .. }));
    assert_eq!(calls.get(), 0);
    assert_eq!(app.pipeline().pending_checks(), 1);

    let err = app.synth(&RenderInputs::new().with("Desired", 9)).unwrap_err();
    assert!(err.to_string().contains("bad range: 9 > 4"));
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_missing_parameter_then_valid_value_renders() {
    let mut app = App::default();
    let calls = desired_group(&mut app);

    assert!(app.synth(&RenderInputs::new()).is_err());

    let template = app.synth(&RenderInputs::new().with("Desired", 3)).unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(template.resource("Group").unwrap().properties, json!({ "Desired": 3 }));
}

#[test]
fn test_later_checks_stay_queued_behind_a_failure() {
    let mut app = App::default();
    let first = app.add_scope(app.root(), "First").unwrap();
    let second = app.add_scope(app.root(), "Second").unwrap();
    let size = app.parameter::<u32>("Size");
    let later_calls = Rc::new(Cell::new(0));
    let counter = later_calls.clone();

    app.with_resolved(
        first,
        min_max(Resolvable::Deferred(size), Resolvable::Literal(4)),
        check_min_max,
    )
    .unwrap();
    app.with_resolved(second, Resolvable::Deferred(size), move |_| {
        counter.set(counter.get() + 1);
        Ok(())
    })
    .unwrap();

    let inputs = RenderInputs::new().with("Size", 5);
    for _ in 0..2 {
        let err = app.synth(&inputs).unwrap_err();
        assert!(err.to_string().contains("'First'"));
    }
    assert_eq!(later_calls.get(), 0);
    assert_eq!(app.pipeline().pending_checks(), 2);
}
