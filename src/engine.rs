//! TestDriver - the test-drive loop
//!
//! A run is declared first as a [`TestSpec`] (parameters, override
//! generators, hypotheses, configuration) and then executed by a
//! [`TestDriver`]. Driving a spec:
//!
//! 1. validates the configuration and the parameter tables,
//! 2. compiles one generator per parameter, unless the user overrode it,
//! 3. runs exactly `iterations` iterations, each drawing the arguments in
//!    declaration order, filtering them through their hypotheses and calling
//!    the target,
//! 4. stops at the first failing iteration and returns its
//!    [`FailureReport`].
//!
//! Every iteration draws from its own ChaCha8 stream of the run seed, so a
//! failing iteration can be replayed on its own with [`TestDriver::replay`].

use crate::compiler::{Compiler, Generator, TestRng};
use crate::error::{ConfigurationError, DriveError};
use crate::hypothesis::{sample_until, Hypothesis};
use crate::report::{run_guarded, FailureReport, TestFailure, TestReturn};
use crate::spec::{SizeLimits, TypeSpec};
use crate::value::Value;
use byteorder::{BigEndian, ByteOrder};
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

/// Configuration for a run
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Number of iterations to run
    pub iterations: u32,

    /// Ceilings for unbounded scalars and containers
    pub limits: SizeLimits,

    /// Rejections allowed per drawn argument before the hypothesis is
    /// declared unsatisfiable; `None` retries forever
    pub max_hypothesis_attempts: Option<u64>,

    /// Fixed run seed
    pub seed: Option<u64>,

    /// Derive the seed from the test name when no seed is given
    pub derandomize: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            limits: SizeLimits::default(),
            max_hypothesis_attempts: Some(100_000),
            seed: None,
            derandomize: false,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.iterations == 0 {
            return Err(ConfigurationError::ZeroIterations);
        }
        if self.max_hypothesis_attempts == Some(0) {
            return Err(ConfigurationError::NonPositive { field: "max_hypothesis_attempts" });
        }
        self.limits.validate()
    }
}

/// A declared parameter of the target
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    /// `None` only when an override generator supplies the values
    pub spec: Option<TypeSpec>,
}

/// Everything needed to drive one target: its parameters in declaration
/// order, per-parameter overrides and hypotheses, and the run configuration.
#[derive(Debug, Clone)]
pub struct TestSpec {
    name: String,
    params: Vec<Param>,
    generators: HashMap<String, Generator>,
    hypotheses: HashMap<String, Hypothesis>,
    named_types: HashMap<String, Generator>,
    config: RunnerConfig,
}

impl TestSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            generators: HashMap::new(),
            hypotheses: HashMap::new(),
            named_types: HashMap::new(),
            config: RunnerConfig::default(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, spec: TypeSpec) -> Self {
        self.params.push(Param { name: name.into(), spec: Some(spec) });
        self
    }

    /// Declares a parameter whose values must come from an override generator.
    pub fn untyped_param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param { name: name.into(), spec: None });
        self
    }

    /// Replaces the compiled generator of `name`.
    pub fn generator(mut self, name: impl Into<String>, generator: Generator) -> Self {
        self.generators.insert(name.into(), generator);
        self
    }

    /// Sets the hypothesis of `name`, replacing any earlier one.
    pub fn hypothesis(mut self, name: impl Into<String>, hypothesis: Hypothesis) -> Self {
        self.hypotheses.insert(name.into(), hypothesis);
        self
    }

    /// Registers the generator behind `TypeSpec::named(name)` for this test.
    pub fn named_type(mut self, name: impl Into<String>, generator: Generator) -> Self {
        self.named_types.insert(name.into(), generator);
        self
    }

    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn iterations(mut self, iterations: u32) -> Self {
        self.config.iterations = iterations;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn limits(mut self, limits: SizeLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Checks the configuration and that every table refers to declared
    /// parameters.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.config.validate()?;

        let mut declared = HashSet::new();
        for param in &self.params {
            if !declared.insert(param.name.as_str()) {
                return Err(ConfigurationError::DuplicateParameter { name: param.name.clone() });
            }
            if param.spec.is_none() && !self.generators.contains_key(&param.name) {
                return Err(ConfigurationError::UntypedParameter { name: param.name.clone() });
            }
        }

        check_known("generators", self.generators.keys(), &declared)?;
        check_known("hypotheses", self.hypotheses.keys(), &declared)
    }
}

/// Errors on the first (in sorted order) name that is not a declared parameter.
fn check_known<'a>(
    table: &'static str,
    names: impl Iterator<Item = &'a String>,
    declared: &HashSet<&str>,
) -> Result<(), ConfigurationError> {
    let mut unknown: Vec<&String> = names.filter(|name| !declared.contains(name.as_str())).collect();
    unknown.sort();
    match unknown.first() {
        Some(name) => Err(ConfigurationError::UnknownParameter { table, name: (*name).clone() }),
        None => Ok(()),
    }
}

/// Where a driver is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    Pending,
    Running { iteration: u32 },
    Passed { iterations: u32 },
    Failed { iteration: u32 },
    /// Arguments for `iteration` could not be generated
    Aborted { iteration: u32 },
}

/// Statistics about a run
#[derive(Debug, Clone, Default)]
pub struct RunnerStats {
    /// Seed the run used
    pub seed: u64,

    /// Iterations started, including a failing one
    pub iterations_run: u32,

    /// Values drawn from generators, including rejected ones
    pub values_generated: u64,

    /// Values thrown away by hypotheses
    pub hypothesis_rejections: u64,

    /// Time spent compiling generators
    pub compile_time: Duration,

    /// Time spent in the whole run
    pub total_runtime: Duration,
}

/// Result of driving a test
#[derive(Debug, Clone)]
pub enum RunResult {
    /// Every iteration passed
    Passed { iterations: u32 },
    /// The target failed; no later iteration was run
    Failed(Box<FailureReport>),
}

impl RunResult {
    pub fn is_passed(&self) -> bool {
        matches!(self, RunResult::Passed { .. })
    }

    pub fn failure(&self) -> Option<&FailureReport> {
        match self {
            RunResult::Failed(report) => Some(report),
            RunResult::Passed { .. } => None,
        }
    }

    /// The iteration count on success, the failure report otherwise.
    pub fn into_result(self) -> Result<u32, TestFailure> {
        match self {
            RunResult::Passed { iterations } => Ok(iterations),
            RunResult::Failed(report) => Err(*report),
        }
    }

    /// For use inside `#[test]` functions.
    ///
    /// # Panics
    ///
    /// Panics with the rendered failure report if the run failed.
    pub fn assert_passed(self) -> u32 {
        match self.into_result() {
            Ok(iterations) => iterations,
            Err(report) => panic!("{}", report),
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunResult::Passed { iterations } => write!(f, "+++ {} tests passed +++", iterations),
            RunResult::Failed(report) => write!(f, "{}", report),
        }
    }
}

/// Compiled per-parameter draws for one run.
struct PreparedRun {
    seed: u64,
    names: Vec<String>,
    draws: Vec<(Generator, Hypothesis)>,
}

/// Main test driver
#[derive(Debug)]
pub struct TestDriver {
    state: DriveState,
    stats: RunnerStats,
}

impl Default for TestDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDriver {
    pub fn new() -> Self {
        Self {
            state: DriveState::Pending,
            stats: RunnerStats::default(),
        }
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }

    /// Drives a free function taking the generated arguments.
    pub fn drive<T, F>(&mut self, spec: &TestSpec, mut target: F) -> Result<RunResult, DriveError>
    where
        T: TestReturn,
        F: FnMut(&[Value]) -> T,
    {
        self.drive_with_receiver(spec, &mut (), |_, args| target(args))
    }

    /// Drives a method: `receiver` is passed ahead of the generated arguments
    /// on every call.
    pub fn drive_with_receiver<R, T, F>(
        &mut self,
        spec: &TestSpec,
        receiver: &mut R,
        mut target: F,
    ) -> Result<RunResult, DriveError>
    where
        T: TestReturn,
        F: FnMut(&mut R, &[Value]) -> T,
    {
        let started = Instant::now();
        let prepared = self.prepare(spec, None)?;
        let iterations = spec.config.iterations;
        log::info!(
            "Driving {} for {} iterations with seed {}",
            spec.name,
            iterations,
            prepared.seed
        );

        for iteration in 1..=iterations {
            let outcome = self.run_iteration(spec, &prepared, iteration, receiver, &mut target);
            if !matches!(outcome, Ok(None)) {
                self.finish(started);
            }
            if let Some(report) = outcome? {
                return Ok(RunResult::Failed(Box::new(report)));
            }
        }

        self.state = DriveState::Passed { iterations };
        self.finish(started);
        log::info!("{}: {} iterations passed", spec.name, iterations);
        Ok(RunResult::Passed { iterations })
    }

    /// Re-runs only `iteration` of a run seeded with `seed`, reproducing the
    /// arguments that iteration drew.
    pub fn replay<T, F>(
        &mut self,
        spec: &TestSpec,
        seed: u64,
        iteration: u32,
        mut target: F,
    ) -> Result<RunResult, DriveError>
    where
        T: TestReturn,
        F: FnMut(&[Value]) -> T,
    {
        let iterations = spec.config.iterations;
        if iteration == 0 || iteration > iterations {
            return Err(ConfigurationError::InvalidIteration { iteration, iterations }.into());
        }

        let started = Instant::now();
        let prepared = self.prepare(spec, Some(seed))?;
        log::info!("Replaying {} iteration {} with seed {}", spec.name, iteration, seed);

        let mut unit = ();
        let mut call = |_: &mut (), args: &[Value]| target(args);
        let outcome = self.run_iteration(spec, &prepared, iteration, &mut unit, &mut call);
        self.finish(started);
        match outcome? {
            Some(report) => Ok(RunResult::Failed(Box::new(report))),
            None => {
                self.state = DriveState::Passed { iterations: 1 };
                Ok(RunResult::Passed { iterations: 1 })
            }
        }
    }

    fn prepare(&mut self, spec: &TestSpec, seed_override: Option<u64>) -> Result<PreparedRun, DriveError> {
        self.state = DriveState::Pending;
        self.stats = RunnerStats::default();
        spec.validate()?;

        let seed = seed_override.unwrap_or_else(|| resolve_seed(spec));
        self.stats.seed = seed;

        let compile_started = Instant::now();
        let mut compiler = Compiler::new(spec.config.limits);
        for (name, generator) in &spec.named_types {
            compiler.register(name.clone(), generator.clone());
        }

        let mut rng = stream_rng(seed, 0);
        let mut names = Vec::with_capacity(spec.params.len());
        let mut draws = Vec::with_capacity(spec.params.len());
        for param in &spec.params {
            let generator = match (spec.generators.get(&param.name), &param.spec) {
                (Some(generator), _) => generator.clone(),
                (None, Some(type_spec)) => {
                    compiler
                        .compile(type_spec, &mut rng)
                        .map_err(|source| DriveError::Spec { param: param.name.clone(), source })?
                }
                (None, None) => {
                    return Err(ConfigurationError::UntypedParameter { name: param.name.clone() }.into())
                }
            };
            let hypothesis = spec.hypotheses.get(&param.name).cloned().unwrap_or_else(Hypothesis::always);
            log::debug!("Parameter {} draws from {}", param.name, generator.description());
            names.push(param.name.clone());
            draws.push((generator, hypothesis));
        }
        self.stats.compile_time = compile_started.elapsed();

        Ok(PreparedRun { seed, names, draws })
    }

    fn run_iteration<R, T, F>(
        &mut self,
        spec: &TestSpec,
        prepared: &PreparedRun,
        iteration: u32,
        receiver: &mut R,
        target: &mut F,
    ) -> Result<Option<FailureReport>, DriveError>
    where
        T: TestReturn,
        F: FnMut(&mut R, &[Value]) -> T,
    {
        self.state = DriveState::Running { iteration };
        self.stats.iterations_run += 1;

        let mut rng = stream_rng(prepared.seed, u64::from(iteration));
        let mut args = Vec::with_capacity(prepared.draws.len());
        for (name, (generator, hypothesis)) in prepared.names.iter().zip(&prepared.draws) {
            let accepted = match sample_until(generator, hypothesis, &mut rng, spec.config.max_hypothesis_attempts) {
                Ok(accepted) => accepted,
                Err(source) => {
                    self.state = DriveState::Aborted { iteration };
                    return Err(DriveError::Generation { param: name.clone(), iteration, source });
                }
            };
            self.stats.values_generated += accepted.rejections + 1;
            self.stats.hypothesis_rejections += accepted.rejections;
            args.push(accepted.value);
        }
        log::debug!("Iteration {} of {} with args {:?}", iteration, spec.name, args);

        match run_guarded(|| target(receiver, &args)) {
            None => Ok(None),
            Some(fault) => {
                log::info!("{} failed on iteration {}: {}", spec.name, iteration, fault);
                self.state = DriveState::Failed { iteration };
                Ok(Some(FailureReport::new(
                    spec.name.clone(),
                    prepared.seed,
                    iteration,
                    &prepared.names,
                    args,
                    fault,
                )))
            }
        }
    }

    fn finish(&mut self, started: Instant) {
        self.stats.total_runtime = started.elapsed();
    }
}

/// Stream 0 compiles; stream `i` draws iteration `i`.
fn stream_rng(seed: u64, stream: u64) -> TestRng {
    let mut rng = TestRng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

fn resolve_seed(spec: &TestSpec) -> u64 {
    match spec.config.seed {
        Some(seed) => seed,
        None if spec.config.derandomize => seed_for_name(&spec.name),
        None => rand::random(),
    }
}

/// Stable seed derived from a test name.
///
/// Only the name is hashed, so tests sharing a name in different modules
/// share a derandomized seed. Qualify the name (e.g. with `module_path!()`)
/// to keep them apart.
pub fn seed_for_name(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    BigEndian::read_u64(&digest[..8])
}

/// Compiles and drives `spec` in one call.
pub fn drive<T, F>(spec: &TestSpec, target: F) -> Result<RunResult, DriveError>
where
    T: TestReturn,
    F: FnMut(&[Value]) -> T,
{
    TestDriver::new().drive(spec, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FaultKind;

    fn small_spec(name: &str) -> TestSpec {
        TestSpec::new(name)
            .iterations(50)
            .seed(42)
            .limits(SizeLimits { max_basic_arg_size: 1000, max_complex_arg_size: 10 })
    }

    #[test]
    fn test_driver_creation() {
        let driver = TestDriver::new();
        assert_eq!(driver.state(), DriveState::Pending);
        assert_eq!(driver.stats().iterations_run, 0);
    }

    #[test]
    fn test_passing_property() {
        let spec = small_spec("passes").param("x", TypeSpec::int_between(0, 100).unwrap());
        let mut driver = TestDriver::new();
        let result = driver
            .drive(&spec, |args| {
                let x = args[0].as_int().unwrap();
                assert!((0..=100).contains(&x));
            })
            .unwrap();

        assert!(result.is_passed());
        assert_eq!(driver.state(), DriveState::Passed { iterations: 50 });
        assert_eq!(driver.stats().iterations_run, 50);
        assert_eq!(result.to_string(), "+++ 50 tests passed +++");
    }

    #[test]
    fn test_failing_property_stops_at_first_failure() {
        let spec = small_spec("fails").iterations(5).param("x", TypeSpec::int());
        let mut driver = TestDriver::new();
        let mut calls = 0;
        let result = driver
            .drive(&spec, |_| {
                calls += 1;
                false
            })
            .unwrap();

        let report = result.failure().unwrap();
        assert_eq!(report.iteration, 1);
        assert_eq!(report.fault.kind, FaultKind::ReturnedFalse);
        assert_eq!(calls, 1);
        assert_eq!(driver.state(), DriveState::Failed { iteration: 1 });
    }

    #[test]
    fn test_zero_iterations_is_rejected_before_running() {
        let spec = small_spec("zero").iterations(0).param("x", TypeSpec::int());
        let mut called = false;
        let err = TestDriver::new().drive(&spec, |_| called = true).unwrap_err();
        assert_eq!(err, DriveError::Configuration(ConfigurationError::ZeroIterations));
        assert!(!called);
    }

    #[test]
    fn test_unknown_override_and_hypothesis_keys() {
        let spec = small_spec("keys")
            .param("x", TypeSpec::int())
            .generator("y", Generator::constant(Value::Int(1)));
        assert!(matches!(
            spec.validate(),
            Err(ConfigurationError::UnknownParameter { table: "generators", .. })
        ));

        let spec = small_spec("keys").param("x", TypeSpec::int()).hypothesis("z", Hypothesis::always());
        assert!(matches!(
            spec.validate(),
            Err(ConfigurationError::UnknownParameter { table: "hypotheses", .. })
        ));
    }

    #[test]
    fn test_untyped_and_duplicate_params() {
        let spec = small_spec("untyped").untyped_param("x");
        assert_eq!(
            spec.validate(),
            Err(ConfigurationError::UntypedParameter { name: "x".to_string() })
        );
        let spec = spec.generator("x", Generator::constant(Value::Int(1)));
        assert!(spec.validate().is_ok());

        let spec = small_spec("dup").param("x", TypeSpec::int()).param("x", TypeSpec::string());
        assert!(matches!(spec.validate(), Err(ConfigurationError::DuplicateParameter { .. })));
    }

    #[test]
    fn test_receiver_is_passed_to_every_call() {
        struct Counter {
            calls: u32,
        }
        let spec = small_spec("method").param("b", TypeSpec::boolean());
        let mut counter = Counter { calls: 0 };
        let result = TestDriver::new()
            .drive_with_receiver(&spec, &mut counter, |this, args| {
                this.calls += 1;
                args[0].as_bool().is_some()
            })
            .unwrap();
        assert!(result.is_passed());
        assert_eq!(counter.calls, 50);
    }

    #[test]
    fn test_seed_for_name_is_stable() {
        assert_eq!(seed_for_name("test_adds"), seed_for_name("test_adds"));
        assert_ne!(seed_for_name("test_adds"), seed_for_name("test_subs"));
    }

    #[test]
    fn test_module_qualified_names_get_distinct_seeds() {
        let qualified = format!("{}::test_adds", module_path!());
        assert_ne!(seed_for_name(&qualified), seed_for_name("test_adds"));
    }

    #[test]
    fn test_stats_count_rejections() {
        let spec = small_spec("rejects")
            .param("x", TypeSpec::int_between(0, 9).unwrap())
            .hypothesis("x", Hypothesis::new(|v| v.as_int() == Some(3)));
        let mut driver = TestDriver::new();
        driver.drive(&spec, |args| args[0].as_int() == Some(3)).unwrap().assert_passed();
        let stats = driver.stats();
        assert!(stats.hypothesis_rejections > 0);
        assert_eq!(stats.values_generated, stats.hypothesis_rejections + 50);
        assert_eq!(stats.seed, 42);
    }
}
