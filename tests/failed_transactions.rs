mod common;

use std::fs;

use cellcomp::CompositionError;
use cellcomp::error::{Incompatibility, IntegrationError};
use common::Bench;

fn incompatibility(error: CompositionError) -> Incompatibility {
    match error {
        CompositionError::ArtifactIntegration {
            source: IntegrationError::Incompatible(incompatibility),
            ..
        } => incompatibility,
        other => panic!("expected an incompatible module, got {other}"),
    }
}

#[test]
fn loading_before_init_fails() {
    let bench = Bench::new().module("A", &["X"]).start();
    let error = bench.load("A").unwrap_err();
    assert!(matches!(error, CompositionError::NotInitialized));
    assert!(bench.jobs.lock().unwrap().is_empty());
}

#[test]
fn generator_failure_leaves_catalog_untouched() {
    let bench = Bench::new()
        .module("A", &["X", "Y"])
        .module("broken", &["Z"])
        .failing_codegen("broken")
        .start();
    bench.init();
    bench.load("A").expect("load A");
    let before = bench.snapshot();
    let error = bench.load("broken").unwrap_err();
    assert!(matches!(error, CompositionError::CodeGenFailed(_)));
    assert_eq!(bench.snapshot(), before);
    assert!(bench.controller.in_flight().unwrap().is_none());
}

#[test]
fn build_failure_leaves_catalog_untouched() {
    let bench = Bench::new()
        .module("A", &["X"])
        .module("unlinked", &["Z"])
        .failing_build("unlinked")
        .start();
    bench.init();
    bench.load("A").expect("load A");
    let before = bench.snapshot();
    let error = bench.load("unlinked").unwrap_err();
    assert!(matches!(error, CompositionError::BuildFailed(_)));
    assert_eq!(bench.snapshot(), before);
}

#[test]
fn artifact_without_module_is_an_integration_error() {
    let bench = Bench::new().unregistered("ghost").start();
    bench.init();
    let before = bench.snapshot();
    match bench.load("ghost").unwrap_err() {
        CompositionError::ArtifactIntegration { artifact, source } => {
            assert!(matches!(source, IntegrationError::UnknownModule(name) if name == "ghost"));
            assert_eq!(artifact.file_stem().unwrap(), "ghost");
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(bench.snapshot(), before);
}

#[test]
fn id_below_assigned_offset_is_rejected() {
    let bench = Bench::new()
        .module("A", &["P", "Q", "R"])
        .fixed("intruder", &[("Sneaky", 1)])
        .start();
    bench.init();
    bench.load("A").expect("load A");
    let before = bench.snapshot();
    let error = incompatibility(bench.load("intruder").unwrap_err());
    assert_eq!(
        error,
        Incompatibility::BelowOffset { type_name: "Sneaky".to_string(), cell_type: 1, offset: 3 }
    );
    assert_eq!(bench.snapshot(), before);
    assert_eq!(bench.controller.catalog().by_type_id(1).unwrap(), 0);
}

#[test]
fn gaps_in_the_id_space_are_rejected() {
    let bench = Bench::new().fixed("sparse", &[("First", 0), ("Third", 2)]).start();
    bench.init();
    let error = incompatibility(bench.load("sparse").unwrap_err());
    assert_eq!(error, Incompatibility::Gap { missing: 1 });
    assert_eq!(bench.controller.current_offset().unwrap(), 0);
}

#[test]
fn duplicates_within_a_module_are_rejected() {
    let bench = Bench::new()
        .fixed("twice", &[("Same", 0), ("Other", 0)])
        .fixed("echo", &[("Same", 0), ("Same", 1)])
        .start();
    bench.init();
    assert_eq!(incompatibility(bench.load("twice").unwrap_err()), Incompatibility::DuplicateTypeId(0));
    assert_eq!(
        incompatibility(bench.load("echo").unwrap_err()),
        Incompatibility::DuplicateTypeName("Same".to_string())
    );
}

#[test]
fn names_of_earlier_modules_cannot_be_taken_over() {
    let bench = Bench::new()
        .module("A", &["Person"])
        .module("B", &["Person", "Place"])
        .start();
    bench.init();
    bench.load("A").expect("load A");
    let before = bench.snapshot();
    let error = incompatibility(bench.load("B").unwrap_err());
    assert_eq!(error, Incompatibility::NameCollision { type_name: "Person".to_string(), existing: 0 });
    assert_eq!(bench.snapshot(), before);
    assert_eq!(bench.controller.catalog().by_type_name("Person").unwrap(), 0);
}

#[test]
fn module_without_cell_types_is_rejected() {
    let bench = Bench::new().fixed("hollow", &[]).start();
    bench.init();
    assert_eq!(incompatibility(bench.load("hollow").unwrap_err()), Incompatibility::Empty);
    assert!(bench.controller.catalog().is_empty().unwrap());
}

#[test]
fn module_names_must_be_identifiers() {
    let bench = Bench::new().start();
    bench.init();
    for name in ["", "9lives", "with space", "../escape", "dash-ed"] {
        let error = bench
            .controller
            .load_from(bench.source_dir("x"), bench.build_dir("x"), name, None)
            .unwrap_err();
        assert!(matches!(error, CompositionError::InvalidModuleName(_)), "{name:?} accepted");
    }
    assert!(bench.jobs.lock().unwrap().is_empty());
}

#[test]
fn source_directory_without_schemas_fails_generation() {
    let bench = Bench::new().unsourced("empty").start();
    bench.init();
    let error = bench.load("empty").unwrap_err();
    assert!(matches!(error, CompositionError::CodeGenFailed(_)));
    assert!(bench.jobs.lock().unwrap().is_empty());
}

#[test]
fn failed_transaction_can_be_retried_after_correction() {
    let bench = Bench::new()
        .module("A", &["X"])
        .unregistered("late")
        .module("B", &["Y", "Z"])
        .start();
    bench.init();
    bench.load("A").expect("load A");
    assert!(bench.load("late").is_err());
    // the failed attempt consumed no ids
    let version = bench.load("B").expect("load B");
    assert_eq!(version.cell_type_offset(), 1);
    let catalog = bench.controller.catalog();
    assert_eq!(catalog.intervals().unwrap(), vec![0, 1]);
    assert_eq!(catalog.cursor().unwrap(), 3);
}

#[test]
fn unwritable_build_directory_fails_staging() {
    let bench = Bench::new().module("A", &["X"]).module("blocked", &["Y"]).start();
    bench.init();
    bench.load("A").expect("load A");
    let before = bench.snapshot();
    // a plain file where the build directory should go
    let build_dir = bench.build_dir("blocked");
    fs::create_dir_all(build_dir.parent().unwrap()).expect("build root");
    fs::write(&build_dir, "in the way").expect("blocking file");

    match bench.load("blocked").unwrap_err() {
        CompositionError::Staging { path, .. } => assert_eq!(path, build_dir),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(bench.snapshot(), before);
    assert!(bench.controller.in_flight().unwrap().is_none());
    assert_eq!(bench.jobs.lock().unwrap().len(), 1);
}

#[test]
fn unusable_storage_root_fails_staging() {
    let bench = Bench::new().module("A", &["X"]).start();
    bench.init();
    let before = bench.snapshot();
    fs::write(bench.dir.path().join("storage"), "not a directory").expect("blocking file");

    let error = bench.load("A").unwrap_err();
    assert!(matches!(error, CompositionError::Staging { .. }));
    assert_eq!(bench.snapshot(), before);
    assert!(bench.controller.in_flight().unwrap().is_none());
    assert!(bench.jobs.lock().unwrap().is_empty());
}

#[test]
fn loaded_module_cannot_be_loaded_again() {
    let bench = Bench::new().module("A", &["X", "Y"]).start();
    bench.init();
    bench.load("A").expect("load A");
    let before = bench.snapshot();

    let error = bench.load("A").unwrap_err();
    assert!(matches!(error, CompositionError::ModuleAlreadyLoaded(name) if name == "A"));
    assert_eq!(bench.snapshot(), before);
    // rejected before the generator ran a second time
    assert_eq!(bench.jobs.lock().unwrap().len(), 1);
}
