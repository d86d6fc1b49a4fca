//! Hypotheses: per-parameter predicates enforced by rejection sampling.

use crate::compiler::{Generator, TestRng};
use crate::error::GenerationError;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Rejections after which a warning is logged once per draw
const REJECTION_WARNING_THRESHOLD: u64 = 1000;

/// A predicate a generated value must satisfy to be passed to the target.
#[derive(Clone)]
pub struct Hypothesis {
    predicate: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl Hypothesis {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Accepts every value; used for parameters without a hypothesis.
    pub fn always() -> Self {
        Self::new(|_| true)
    }

    pub fn accepts(&self, value: &Value) -> bool {
        (self.predicate)(value)
    }
}

impl fmt::Debug for Hypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hypothesis(..)")
    }
}

/// An accepted value together with how many candidates were thrown away.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub value: Value,
    pub rejections: u64,
}

/// Draws from `generator` until `hypothesis` accepts.
///
/// With `max_attempts` set, giving up after that many rejections returns
/// `UnsatisfiableHypothesis`. With `None` the loop never gives up, so an
/// unsatisfiable predicate hangs the caller.
pub fn sample_until(
    generator: &Generator,
    hypothesis: &Hypothesis,
    rng: &mut TestRng,
    max_attempts: Option<u64>,
) -> Result<Accepted, GenerationError> {
    let mut rejections = 0u64;
    loop {
        let value = generator.generate(rng)?;
        if hypothesis.accepts(&value) {
            return Ok(Accepted { value, rejections });
        }
        rejections += 1;
        if rejections == REJECTION_WARNING_THRESHOLD {
            log::warn!(
                "Hypothesis has rejected {} values from {}",
                rejections,
                generator.description()
            );
        }
        if let Some(cap) = max_attempts {
            if rejections >= cap {
                return Err(GenerationError::UnsatisfiableHypothesis { attempts: rejections });
            }
        }
    }
}

impl Generator {
    /// Builds the rejection loop into a new generator.
    pub fn filtered(self, hypothesis: Hypothesis, max_attempts: Option<u64>) -> Generator {
        let description = format!("{} where ..", self.description());
        Generator::new(description, move |rng| {
            sample_until(&self, &hypothesis, rng, max_attempts).map(|accepted| accepted.value)
        })
    }
}
