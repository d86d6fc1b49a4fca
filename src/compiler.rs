//! Type-to-generator compiler.
//!
//! [`Compiler::compile`] lowers a [`TypeSpec`] into a [`Generator`] by
//! dispatching on the spec's variant:
//!
//! - **Scalars** sample uniformly from their bounds, with unset bounds taken
//!   from the run's [`SizeLimits`].
//! - **Unions** are flattened once and every member is compiled eagerly, so
//!   a bad member fails the compile instead of a later draw.
//! - **Containers** compile their sub-specs first, then sample a length in
//!   `[0, max]` per instance and fill each slot independently.
//! - **`Any`** is materialized into a random concrete spec, bounded by its
//!   depth and breadth, and that spec is compiled. Every occurrence is
//!   materialized on its own.
//! - **Functions** produce callables that resample their return spec on every
//!   call.
//! - **Named** types come from the compiler's registry.
//!
//! Compilation never mutates shared state. All randomness, including `Any`
//! materialization, comes from the caller's [`TestRng`].

use crate::error::{GenerationError, SpecError};
use crate::spec::{check_key_spec, Scalar, SizeLimits, TypeSpec, DEFAULT_ANY_BREADTH, DEFAULT_ANY_DEPTH};
use crate::value::{insert_entry, FunctionValue, Value};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Random source threaded through compilation and generation
pub type TestRng = ChaCha8Rng;

const ASCII_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

type SampleFn = dyn Fn(&mut TestRng) -> Result<Value, GenerationError> + Send + Sync;

/// A niladic value producer: each call to [`generate`](Generator::generate)
/// yields one fresh value.
#[derive(Clone)]
pub struct Generator {
    description: Arc<str>,
    sample: Arc<SampleFn>,
}

impl Generator {
    pub fn new<F>(description: impl Into<String>, sample: F) -> Self
    where
        F: Fn(&mut TestRng) -> Result<Value, GenerationError> + Send + Sync + 'static,
    {
        Self {
            description: Arc::from(description.into()),
            sample: Arc::new(sample),
        }
    }

    /// Wraps an infallible sampling function.
    pub fn from_fn<F>(description: impl Into<String>, sample: F) -> Self
    where
        F: Fn(&mut TestRng) -> Value + Send + Sync + 'static,
    {
        Self::new(description, move |rng| Ok(sample(rng)))
    }

    pub fn constant(value: Value) -> Self {
        Self::new(format!("constant {}", value), move |_| Ok(value.clone()))
    }

    /// Delegates each draw to one alternative chosen uniformly at random.
    pub fn one_of(alternatives: Vec<Generator>) -> Self {
        let description = alternatives
            .iter()
            .map(|g| g.description().to_string())
            .collect::<Vec<_>>()
            .join(" | ");
        Self::new(description, move |rng| match alternatives.choose(rng) {
            Some(chosen) => chosen.generate(rng),
            None => Err(GenerationError::Custom("union has no alternatives".to_string())),
        })
    }

    pub fn generate(&self, rng: &mut TestRng) -> Result<Value, GenerationError> {
        (self.sample)(rng)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generator({})", self.description)
    }
}

/// Lowers type specs into generators under one set of size limits.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    limits: SizeLimits,
    registry: HashMap<String, Generator>,
}

impl Compiler {
    pub fn new(limits: SizeLimits) -> Self {
        Self {
            limits,
            registry: HashMap::new(),
        }
    }

    pub fn limits(&self) -> SizeLimits {
        self.limits
    }

    /// Registers the generator used for `TypeSpec::Named { name }`.
    pub fn register(&mut self, name: impl Into<String>, generator: Generator) {
        self.registry.insert(name.into(), generator);
    }

    /// Validates `spec` and lowers it into a generator.
    ///
    /// Either the whole tree compiles or an error is returned; no partially
    /// compiled generator escapes.
    pub fn compile(&self, spec: &TypeSpec, rng: &mut TestRng) -> Result<Generator, SpecError> {
        self.limits.validate()?;
        spec.validate()?;
        log::debug!("Compiling {}", spec);
        self.lower(spec, rng)
    }

    fn lower(&self, spec: &TypeSpec, rng: &mut TestRng) -> Result<Generator, SpecError> {
        match spec {
            TypeSpec::Scalar(scalar) => self.lower_scalar(scalar),
            TypeSpec::Union { .. } => self.lower_union(spec, rng),
            TypeSpec::List { element, max_length } => {
                let element = self.lower(element, rng)?;
                let max = max_length.unwrap_or(self.limits.max_complex_arg_size);
                Ok(sequence(spec, element, max, Value::List))
            }
            TypeSpec::Tuple { element, max_length } => {
                let element = self.lower(element, rng)?;
                let max = max_length.unwrap_or(self.limits.max_complex_arg_size);
                Ok(sequence(spec, element, max, Value::Tuple))
            }
            TypeSpec::Set { element, max_length } => {
                let element = self.lower(element, rng)?;
                let max = max_length.unwrap_or(self.limits.max_complex_arg_size);
                Ok(sequence(spec, element, max, Value::set_from))
            }
            TypeSpec::Dict { key, value, max_keys } => self.lower_dict(spec, key, value, *max_keys, rng),
            TypeSpec::Any { max_depth, max_breadth } => {
                let concrete = materialize_any(
                    max_depth.unwrap_or(DEFAULT_ANY_DEPTH),
                    max_breadth.unwrap_or(DEFAULT_ANY_BREADTH),
                    rng,
                );
                log::debug!("Materialized {} as {}", spec, concrete);
                self.lower(&concrete, rng)
            }
            TypeSpec::Function { returns } => {
                let returns = self.lower(returns, rng)?;
                Ok(Generator::new(spec.to_string(), move |rng| {
                    Ok(Value::Function(FunctionValue::new(returns.clone(), rng.gen())))
                }))
            }
            TypeSpec::Named { name } => self
                .registry
                .get(name)
                .cloned()
                .ok_or_else(|| SpecError::UnsupportedType { name: name.clone() }),
        }
    }

    fn lower_scalar(&self, scalar: &Scalar) -> Result<Generator, SpecError> {
        let basic = self.limits.max_basic_arg_size;
        let spec = TypeSpec::Scalar(scalar.clone());
        match scalar {
            Scalar::Int { min, max } => {
                let (min, max) = (min.unwrap_or(-basic), max.unwrap_or(basic));
                crate::spec::check_bounds("Int", min, max)?;
                Ok(Generator::from_fn(spec.to_string(), move |rng| Value::Int(rng.gen_range(min..=max))))
            }
            Scalar::Float { min, max } => {
                let (min, max) = (min.unwrap_or(-basic), max.unwrap_or(basic));
                crate::spec::check_bounds("Float", min, max)?;
                // Unit draw scaled by a random integer from the range, not by its width.
                Ok(Generator::from_fn(spec.to_string(), move |rng| {
                    let unit: f64 = rng.gen();
                    Value::Float(unit * rng.gen_range(min..=max) as f64)
                }))
            }
            Scalar::Str { max_length } => {
                let max = max_length.unwrap_or(self.limits.max_complex_arg_size);
                Ok(Generator::from_fn(spec.to_string(), move |rng| {
                    let len = rng.gen_range(1..=max);
                    let text = (0..len)
                        .map(|_| ASCII_LETTERS[rng.gen_range(0..ASCII_LETTERS.len())] as char)
                        .collect();
                    Value::Str(text)
                }))
            }
            Scalar::Bool => Ok(Generator::from_fn(spec.to_string(), |rng| Value::Bool(rng.gen()))),
            Scalar::None => Ok(Generator::from_fn(spec.to_string(), |_| Value::None)),
        }
    }

    fn lower_union(&self, spec: &TypeSpec, rng: &mut TestRng) -> Result<Generator, SpecError> {
        let mut members = spec
            .flatten_union()
            .iter()
            .map(|member| self.lower(member, rng))
            .collect::<Result<Vec<_>, _>>()?;
        if members.len() == 1 {
            if let Some(only) = members.pop() {
                return Ok(only);
            }
        }
        Ok(Generator::one_of(members))
    }

    /// Key members that are `Any` materialize as scalars only.
    fn lower_key(&self, key: &TypeSpec, rng: &mut TestRng) -> Result<Generator, SpecError> {
        let mut members = Vec::new();
        for member in key.flatten_union() {
            let generator = match member {
                TypeSpec::Any { max_breadth, .. } => {
                    let concrete = materialize_key(max_breadth.unwrap_or(DEFAULT_ANY_BREADTH), rng);
                    log::debug!("Materialized dict key Any as {}", concrete);
                    self.lower(&concrete, rng)?
                }
                other => self.lower(&other, rng)?,
            };
            members.push(generator);
        }
        if members.len() == 1 {
            if let Some(only) = members.pop() {
                return Ok(only);
            }
        }
        Ok(Generator::one_of(members))
    }

    fn lower_dict(
        &self,
        spec: &TypeSpec,
        key: &TypeSpec,
        value: &TypeSpec,
        max_keys: Option<usize>,
        rng: &mut TestRng,
    ) -> Result<Generator, SpecError> {
        check_key_spec(key)?;
        let keys = self.lower_key(key, rng)?;
        let values = self.lower(value, rng)?;
        let max = max_keys.unwrap_or(self.limits.max_complex_arg_size);
        Ok(Generator::new(spec.to_string(), move |rng| {
            let count = rng.gen_range(0..=max);
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let key = keys.generate(rng)?;
                if !key.is_hashable() {
                    return Err(GenerationError::UnhashableKey { value: key.to_string() });
                }
                let value = values.generate(rng)?;
                insert_entry(&mut entries, key, value);
            }
            Ok(Value::Dict(entries))
        }))
    }
}

fn sequence(spec: &TypeSpec, element: Generator, max: usize, build: fn(Vec<Value>) -> Value) -> Generator {
    Generator::new(spec.to_string(), move |rng| {
        let len = rng.gen_range(0..=max);
        let items = (0..len)
            .map(|_| element.generate(rng))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(build(items))
    })
}

/// Compiles `spec` with default size limits and an empty type registry.
pub fn compile(spec: &TypeSpec, rng: &mut TestRng) -> Result<Generator, SpecError> {
    Compiler::default().compile(spec, rng)
}

fn random_scalar(rng: &mut TestRng) -> TypeSpec {
    match rng.gen_range(0..5) {
        0 => TypeSpec::int(),
        1 => TypeSpec::float(),
        2 => TypeSpec::string(),
        3 => TypeSpec::boolean(),
        _ => TypeSpec::none(),
    }
}

fn union_or_single(mut members: Vec<TypeSpec>) -> TypeSpec {
    if members.len() == 1 {
        if let Some(only) = members.pop() {
            return only;
        }
    }
    TypeSpec::Union { members }
}

fn materialize_members(depth: usize, breadth: usize, rng: &mut TestRng) -> TypeSpec {
    let count = rng.gen_range(1..=breadth);
    let members = (0..count).map(|_| materialize_any(depth, breadth, rng)).collect();
    union_or_single(members)
}

fn materialize_key(breadth: usize, rng: &mut TestRng) -> TypeSpec {
    let count = rng.gen_range(1..=breadth.max(1));
    union_or_single((0..count).map(|_| random_scalar(rng)).collect())
}

/// Resolves an `Any` into a concrete spec with at most `max_depth` levels of
/// container nesting and at most `max_breadth` members per union.
///
/// The result never contains `Any`, functions or named types.
pub fn materialize_any(max_depth: usize, max_breadth: usize, rng: &mut TestRng) -> TypeSpec {
    let breadth = max_breadth.max(1);
    if max_depth == 0 || rng.gen_range(0..9) < 5 {
        return random_scalar(rng);
    }
    let depth = max_depth - 1;
    match rng.gen_range(0..4) {
        0 => TypeSpec::list(materialize_members(depth, breadth, rng)),
        1 => TypeSpec::tuple(materialize_members(depth, breadth, rng)),
        2 => TypeSpec::set(materialize_members(depth, breadth, rng)),
        _ => TypeSpec::Dict {
            key: Box::new(materialize_key(breadth, rng)),
            value: Box::new(materialize_members(depth, breadth, rng)),
            max_keys: None,
        },
    }
}
