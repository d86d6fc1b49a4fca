//! # typedrive
//!
//! A property-based test driver: declare each parameter of a target with a
//! [`TypeSpec`], and the driver compiles a random-value generator for it,
//! filters draws through optional hypotheses and calls the target a fixed
//! number of times, stopping at the first failure.
//!
//! There is no shrinking. A failure is reported with the arguments exactly as
//! generated, along with the seed and iteration that reproduce them.
//!
//! ```
//! use typedrive::{TestSpec, TypeSpec, drive};
//!
//! let spec = TestSpec::new("reverse_twice")
//!     .iterations(100)
//!     .param("xs", TypeSpec::list(TypeSpec::int()));
//!
//! let result = drive(&spec, |args| {
//!     let xs = args[0].as_list().unwrap().to_vec();
//!     let mut twice = xs.clone();
//!     twice.reverse();
//!     twice.reverse();
//!     twice == xs
//! })
//! .unwrap();
//! assert!(result.is_passed());
//! ```

pub mod compiler;
pub mod engine;
pub mod error;
pub mod hypothesis;
pub mod report;
pub mod spec;
pub mod value;

pub use compiler::{compile, materialize_any, Compiler, Generator, TestRng};
pub use engine::{
    drive, seed_for_name, DriveState, Param, RunResult, RunnerConfig, RunnerStats, TestDriver, TestSpec,
};
pub use error::{ConfigurationError, DriveError, GenerationError, SpecError};
pub use hypothesis::{sample_until, Accepted, Hypothesis};
pub use report::{FailureReport, Fault, FaultKind, RenderedArg, TestFailure, TestReturn};
pub use spec::{Scalar, SizeLimits, TypeSpec};
pub use value::{FunctionValue, Value};
