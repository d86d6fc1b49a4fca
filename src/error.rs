//! Error taxonomy for spec construction, compilation, generation and driving.
//!
//! Test failures are not errors in this sense: a failing target produces a
//! [`FailureReport`](crate::report::FailureReport) inside
//! [`RunResult::Failed`](crate::engine::RunResult). Everything here means the
//! run could not be set up or could not produce arguments.

use std::fmt;

/// Invalid setup detected before any value is generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A numeric range whose lower bound exceeds its upper bound
    InvalidBounds { field: &'static str, min: i64, max: i64 },
    /// A size, count, depth or breadth bound that must be strictly positive
    NonPositive { field: &'static str },
    /// The run was asked to execute zero iterations
    ZeroIterations,
    /// An override or hypothesis keyed by a name that is not a parameter
    UnknownParameter { table: &'static str, name: String },
    /// Two parameters share a name
    DuplicateParameter { name: String },
    /// A parameter has neither a type spec nor an override generator
    UntypedParameter { name: String },
    /// A replayed iteration outside `1..=iterations`
    InvalidIteration { iteration: u32, iterations: u32 },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::InvalidBounds { field, min, max } => {
                write!(f, "{}: min {} is greater than max {}", field, min, max)
            }
            ConfigurationError::NonPositive { field } => {
                write!(f, "{} must be greater than 0", field)
            }
            ConfigurationError::ZeroIterations => {
                write!(f, "iterations must be greater than 0")
            }
            ConfigurationError::UnknownParameter { table, name } => {
                write!(f, "{} names unknown parameter '{}'", table, name)
            }
            ConfigurationError::DuplicateParameter { name } => {
                write!(f, "parameter '{}' is declared more than once", name)
            }
            ConfigurationError::UntypedParameter { name } => write!(
                f,
                "parameter '{}' has no type spec and no override generator",
                name
            ),
            ConfigurationError::InvalidIteration { iteration, iterations } => write!(
                f,
                "iteration {} is outside 1..={}",
                iteration, iterations
            ),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// A type spec that cannot be built or lowered into a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    Configuration(ConfigurationError),
    /// A named type with no registered generator
    UnsupportedType { name: String },
    /// A dict key spec that can produce unhashable values
    InvalidKeyType { key: String },
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecError::Configuration(err) => write!(f, "Invalid configuration: {}", err),
            SpecError::UnsupportedType { name } => write!(f, "Unsupported type: {}", name),
            SpecError::InvalidKeyType { key } => {
                write!(f, "Invalid dict key type {}: keys must be hashable scalars", key)
            }
        }
    }
}

impl std::error::Error for SpecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpecError::Configuration(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigurationError> for SpecError {
    fn from(err: ConfigurationError) -> Self {
        SpecError::Configuration(err)
    }
}

/// Failure while drawing a single value from a compiled generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// A dict key that turned out to be unhashable at generation time
    UnhashableKey { value: String },
    /// The hypothesis rejected every candidate up to the retry cap
    UnsatisfiableHypothesis { attempts: u64 },
    /// Raised by a user-supplied generator
    Custom(String),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::UnhashableKey { value } => {
                write!(f, "Generated dict key {} is not hashable", value)
            }
            GenerationError::UnsatisfiableHypothesis { attempts } => write!(
                f,
                "Hypothesis rejected {} consecutive candidates and looks unsatisfiable",
                attempts
            ),
            GenerationError::Custom(msg) => write!(f, "Generation failed: {}", msg),
        }
    }
}

impl std::error::Error for GenerationError {}

/// Anything that stops a run before it can report pass or fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveError {
    Configuration(ConfigurationError),
    Spec { param: String, source: SpecError },
    Generation { param: String, iteration: u32, source: GenerationError },
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveError::Configuration(err) => write!(f, "Invalid configuration: {}", err),
            DriveError::Spec { param, source } => {
                write!(f, "Cannot compile parameter '{}': {}", param, source)
            }
            DriveError::Generation { param, iteration, source } => write!(
                f,
                "Cannot generate parameter '{}' on iteration {}: {}",
                param, iteration, source
            ),
        }
    }
}

impl std::error::Error for DriveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriveError::Configuration(err) => Some(err),
            DriveError::Spec { source, .. } => Some(source),
            DriveError::Generation { source, .. } => Some(source),
        }
    }
}

impl From<ConfigurationError> for DriveError {
    fn from(err: ConfigurationError) -> Self {
        DriveError::Configuration(err)
    }
}
