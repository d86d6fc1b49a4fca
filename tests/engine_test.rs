//! # Engine Test Suite
//!
//! End-to-end runs of the [`TestDriver`]: declaring a [`TestSpec`], driving a
//! target and inspecting the outcome.
//!
//! ## Coverage
//! - Round-trip properties over lists of several element specs
//! - Hypothesis filtering inside the drive loop
//! - Failure reports for panicking, `false`-returning and `Err` targets
//! - Seed reproducibility and replay of a single iteration
//! - Driver state after an aborted run
//! - Parameter-table validation and receivers

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use typedrive::{
    seed_for_name, ConfigurationError, DriveError, DriveState, FaultKind, GenerationError, Generator, Hypothesis,
    RunnerConfig, SizeLimits, TestDriver, TestSpec, TypeSpec, Value,
};

fn small_limits() -> SizeLimits {
    SizeLimits { max_basic_arg_size: 10_000, max_complex_arg_size: 12 }
}

fn reverse_twice_is_identity(args: &[Value]) -> bool {
    let original = args[0].as_list().unwrap().to_vec();
    let mut reversed = original.clone();
    reversed.reverse();
    reversed.reverse();
    reversed == original
}

#[test]
fn test_reverse_round_trip_over_element_specs() {
    let element_specs = vec![
        TypeSpec::int(),
        TypeSpec::string(),
        TypeSpec::dict(TypeSpec::string(), TypeSpec::int()).unwrap(),
    ];
    for element in element_specs {
        let spec = TestSpec::new(format!("reverse_twice_{}", element))
            .iterations(200)
            .seed(1)
            .limits(small_limits())
            .param("l", TypeSpec::list(element));
        let result = TestDriver::new().drive(&spec, reverse_twice_is_identity).unwrap();
        assert_eq!(result.assert_passed(), 200);
    }
}

#[test]
fn test_hypothesis_filters_inside_drive_loop() {
    let in_range = |v: &Value| matches!(v.as_int(), Some(x) if (1..=100).contains(&x));
    let spec = TestSpec::new("filtered")
        .iterations(1000)
        .param("x", TypeSpec::int_between(-1000, 1000).unwrap())
        .hypothesis("x", Hypothesis::new(in_range));

    let result = TestDriver::new()
        .drive(&spec, |args| {
            let x = args[0].as_int().unwrap();
            assert!((1..=100).contains(&x), "{} escaped the hypothesis", x);
        })
        .unwrap();
    assert!(result.is_passed());
}

#[test]
fn test_always_failing_target_fails_on_first_iteration() {
    let spec = TestSpec::new("always_fails")
        .iterations(5)
        .limits(small_limits())
        .param("a", TypeSpec::int())
        .param("b", TypeSpec::list(TypeSpec::boolean()));

    let mut driver = TestDriver::new();
    let result = driver.drive(&spec, |_| assert!(false)).unwrap();

    let report = result.into_result().unwrap_err();
    assert_eq!(report.iteration, 1);
    assert_eq!(report.fault.kind, FaultKind::Panic);
    assert!(report.fault.message.contains("assertion failed"));
    assert_eq!(report.args.len(), 2);
    assert_eq!(report.args[0].name, "a");
    assert_eq!(report.args[1].name, "b");
    assert_eq!(report.values.len(), 2);
    assert_eq!(driver.state(), DriveState::Failed { iteration: 1 });
    assert_eq!(driver.stats().iterations_run, 1);

    let text = report.to_string();
    assert!(text.contains("always_fails failed on iteration 1"));
    assert!(text.contains(&format!("Replay with seed {}", report.seed)));
}

#[test]
fn test_err_returning_target_is_reported() {
    let spec = TestSpec::new("non_negative")
        .seed(3)
        .param("x", TypeSpec::int_between(-10, 10).unwrap());

    let result = TestDriver::new()
        .drive(&spec, |args| {
            let x = args[0].as_int().unwrap();
            if x < 0 {
                Err(format!("{} is negative", x))
            } else {
                Ok(())
            }
        })
        .unwrap();

    let report = result.failure().unwrap();
    assert_eq!(report.fault.kind, FaultKind::Error);
    assert!(report.fault.message.ends_with("is negative"));
    assert!(report.values[0].as_int().unwrap() < 0);
}

#[test]
fn test_failure_replays_from_seed_and_iteration() {
    let spec = TestSpec::new("small_sums")
        .iterations(1000)
        .limits(small_limits())
        .param("xs", TypeSpec::list(TypeSpec::int_between(0, 9).unwrap()));
    let sum_is_small = |args: &[Value]| args[0].as_list().unwrap().iter().filter_map(Value::as_int).sum::<i64>() < 40;

    let report = TestDriver::new()
        .drive(&spec, sum_is_small)
        .unwrap()
        .into_result()
        .unwrap_err();

    let replayed = TestDriver::new()
        .replay(&spec, report.seed, report.iteration, sum_is_small)
        .unwrap()
        .into_result()
        .unwrap_err();
    assert_eq!(replayed.iteration, report.iteration);
    assert_eq!(replayed.values, report.values);
    assert_eq!(replayed.args, report.args);
}

#[test]
fn test_same_seed_draws_same_arguments() {
    let spec = TestSpec::new("recorded")
        .iterations(25)
        .seed(77)
        .limits(small_limits())
        .param("v", TypeSpec::any())
        .param("s", TypeSpec::set(TypeSpec::string()));

    let record = || {
        let mut seen = Vec::new();
        TestDriver::new()
            .drive(&spec, |args| seen.push(args.to_vec()))
            .unwrap()
            .assert_passed();
        seen
    };
    assert_eq!(record(), record());
}

#[test]
fn test_derandomized_seed_comes_from_test_name() {
    let config = RunnerConfig { iterations: 3, derandomize: true, ..RunnerConfig::default() };
    let spec = TestSpec::new("stable_name").config(config).param("x", TypeSpec::boolean());
    let mut driver = TestDriver::new();
    driver.drive(&spec, |_| ()).unwrap().assert_passed();
    assert_eq!(driver.stats().seed, seed_for_name("stable_name"));
}

#[test]
fn test_override_generator_replaces_compiled_one() {
    let spec = TestSpec::new("overridden")
        .iterations(20)
        .untyped_param("x")
        .param("y", TypeSpec::int_between(0, 1).unwrap())
        .generator("x", Generator::constant(Value::Str("fixed".to_string())));

    let result = TestDriver::new()
        .drive(&spec, |args| args[0].as_str() == Some("fixed") && args[1].as_int().is_some())
        .unwrap();
    assert!(result.is_passed());
}

#[test]
fn test_parameter_tables_are_validated_before_running() {
    let calls = AtomicUsize::new(0);
    let target = |_: &[Value]| {
        calls.fetch_add(1, Ordering::SeqCst);
    };

    let spec = TestSpec::new("bad_override")
        .param("x", TypeSpec::int())
        .generator("nope", Generator::constant(Value::None));
    let err = TestDriver::new().drive(&spec, target).unwrap_err();
    assert_eq!(
        err,
        DriveError::Configuration(ConfigurationError::UnknownParameter {
            table: "generators",
            name: "nope".to_string(),
        })
    );

    let spec = TestSpec::new("bad_hypothesis")
        .param("x", TypeSpec::int())
        .hypothesis("y", Hypothesis::always());
    assert!(matches!(
        TestDriver::new().drive(&spec, target),
        Err(DriveError::Configuration(ConfigurationError::UnknownParameter { table: "hypotheses", .. }))
    ));

    let spec = TestSpec::new("untyped").untyped_param("x");
    assert!(matches!(
        TestDriver::new().drive(&spec, target),
        Err(DriveError::Configuration(ConfigurationError::UntypedParameter { .. }))
    ));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_uncompilable_parameter_names_the_parameter() {
    let spec = TestSpec::new("unknown_type").param("w", TypeSpec::named("Widget"));
    match TestDriver::new().drive(&spec, |_| ()) {
        Err(DriveError::Spec { param, .. }) => assert_eq!(param, "w"),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_named_type_registered_on_the_spec() {
    let spec = TestSpec::new("points")
        .iterations(50)
        .named_type(
            "Point",
            Generator::from_fn("Point", |rng| {
                use rand::Rng;
                Value::Tuple(vec![Value::Int(rng.gen_range(0..10)), Value::Int(rng.gen_range(0..10))])
            }),
        )
        .param("p", TypeSpec::named("Point"));

    let result = TestDriver::new()
        .drive(&spec, |args| args[0].as_tuple().map_or(false, |t| t.len() == 2))
        .unwrap();
    assert!(result.is_passed());
}

#[test]
fn test_unsatisfiable_hypothesis_stops_the_run() {
    let config = RunnerConfig { iterations: 10, max_hypothesis_attempts: Some(200), ..RunnerConfig::default() };
    let spec = TestSpec::new("unsatisfiable")
        .config(config)
        .param("x", TypeSpec::int_between(0, 5).unwrap())
        .hypothesis("x", Hypothesis::new(|v| v.as_int() == Some(6)));

    let mut driver = TestDriver::new();
    let err = driver.drive(&spec, |_| ()).unwrap_err();
    assert_eq!(
        err,
        DriveError::Generation {
            param: "x".to_string(),
            iteration: 1,
            source: GenerationError::UnsatisfiableHypothesis { attempts: 200 },
        }
    );
    assert_eq!(driver.state(), DriveState::Aborted { iteration: 1 });
    assert_eq!(driver.stats().iterations_run, 1);
    assert!(driver.stats().total_runtime > Duration::ZERO);
}

#[test]
fn test_replay_rejects_iterations_outside_the_run() {
    let spec = TestSpec::new("three_iterations").iterations(3).seed(4).param("x", TypeSpec::boolean());
    let mut driver = TestDriver::new();

    for iteration in [0, 4, 999] {
        let err = driver.replay(&spec, 4, iteration, |_| false).unwrap_err();
        assert_eq!(
            err,
            DriveError::Configuration(ConfigurationError::InvalidIteration { iteration, iterations: 3 })
        );
    }
    assert_eq!(driver.state(), DriveState::Pending);

    let report = driver
        .replay(&spec, 4, 3, |_| false)
        .unwrap()
        .into_result()
        .unwrap_err();
    assert_eq!(report.iteration, 3);
}

#[test]
fn test_receiver_sees_every_iteration() {
    struct Collector {
        seen: HashSet<bool>,
    }

    let spec = TestSpec::new("collects").iterations(100).seed(8).param("b", TypeSpec::boolean());
    let mut collector = Collector { seen: HashSet::new() };
    let result = TestDriver::new()
        .drive_with_receiver(&spec, &mut collector, |this, args| {
            this.seen.insert(args[0].as_bool().unwrap());
        })
        .unwrap();

    assert!(result.is_passed());
    assert_eq!(collector.seen.len(), 2);
}

#[test]
fn test_generated_functions_can_be_called_by_the_target() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let spec = TestSpec::new("callbacks")
        .iterations(30)
        .param("f", TypeSpec::function(TypeSpec::int_between(0, 3).unwrap()));

    TestDriver::new()
        .drive(&spec, move |args| {
            let f = args[0].as_function().unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            matches!(f.call(&[Value::Int(1)]), Ok(Value::Int(x)) if (0..=3).contains(&x))
        })
        .unwrap()
        .assert_passed();
    assert_eq!(calls.load(Ordering::SeqCst), 30);
}

#[test]
fn test_failure_report_serializes_to_json() {
    let spec = TestSpec::new("json_report").seed(5).param("s", TypeSpec::string());
    let report = TestDriver::new()
        .drive(&spec, |_| false)
        .unwrap()
        .into_result()
        .unwrap_err();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["test_name"], "json_report");
    assert_eq!(json["seed"], 5);
    assert_eq!(json["iteration"], 1);
    assert_eq!(json["args"][0]["name"], "s");
    assert_eq!(json["fault"]["kind"], "returned_false");
}
