//! Failure reporting: capturing what went wrong in the target and with
//! which arguments.
//!
//! Panics are caught with `catch_unwind`. To keep the backtrace of the
//! original panic site, rather than of the reporter, a panic hook is
//! installed once per process. It only records while a target is running on
//! the current thread and defers to the previous hook otherwise.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

/// How the target signalled failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The target panicked, including failed assertions
    Panic,
    /// The target returned `Err`
    Error,
    /// The target returned `false`
    ReturnedFalse,
}

/// The captured failure of one target invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub type_name: String,
    pub message: String,
    pub location: Option<String>,
    /// Backtrace of the panic site, or the debug form of a returned error
    pub trace: Option<String>,
}

impl Fault {
    pub fn returned_false() -> Self {
        Self {
            kind: FaultKind::ReturnedFalse,
            type_name: "bool".to_string(),
            message: "test returned false".to_string(),
            location: None,
            trace: None,
        }
    }

    pub fn from_error<E: fmt::Debug + fmt::Display>(err: &E) -> Self {
        Self {
            kind: FaultKind::Error,
            type_name: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            location: None,
            trace: Some(format!("{:?}", err)),
        }
    }

    fn from_panic(payload: Box<dyn Any + Send>, captured: Option<PanicCapture>) -> Self {
        let (location, trace) = match captured {
            Some(capture) => (capture.location, Some(capture.backtrace)),
            None => (None, None),
        };
        Self {
            kind: FaultKind::Panic,
            type_name: "panic".to_string(),
            message: panic_message(payload.as_ref()),
            location,
            trace,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at {})", location)?;
        }
        Ok(())
    }
}

/// Return types a test target may use to signal pass or fail.
pub trait TestReturn {
    fn into_fault(self) -> Option<Fault>;
}

impl TestReturn for () {
    fn into_fault(self) -> Option<Fault> {
        None
    }
}

impl TestReturn for bool {
    fn into_fault(self) -> Option<Fault> {
        if self {
            None
        } else {
            Some(Fault::returned_false())
        }
    }
}

impl<E: fmt::Debug + fmt::Display> TestReturn for Result<(), E> {
    fn into_fault(self) -> Option<Fault> {
        self.err().map(|err| Fault::from_error(&err))
    }
}

#[derive(Debug)]
struct PanicCapture {
    location: Option<String>,
    backtrace: String,
}

thread_local! {
    static CAPTURING: Cell<bool> = Cell::new(false);
    static CAPTURED: RefCell<Option<PanicCapture>> = RefCell::new(None);
}

static HOOK: Once = Once::new();

fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let capture = PanicCapture {
                    location: info.location().map(|l| l.to_string()),
                    backtrace: Backtrace::force_capture().to_string(),
                };
                CAPTURED.with(|slot| *slot.borrow_mut() = Some(capture));
            } else {
                previous(info);
            }
        }));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs `invoke`, turning a panic or a failing return into a [`Fault`].
pub(crate) fn run_guarded<T, F>(invoke: F) -> Option<Fault>
where
    T: TestReturn,
    F: FnOnce() -> T,
{
    install_hook();
    let was_capturing = CAPTURING.with(|c| c.replace(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(invoke));
    CAPTURING.with(|c| c.set(was_capturing));
    match outcome {
        Ok(returned) => returned.into_fault(),
        Err(payload) => {
            let captured = CAPTURED.with(|slot| slot.borrow_mut().take());
            Some(Fault::from_panic(payload, captured))
        }
    }
}

/// One argument as it was passed to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedArg {
    pub name: String,
    pub value: String,
}

/// The single artifact produced by a failed run.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub test_name: String,
    /// Run seed; with `iteration` it reproduces the arguments exactly
    pub seed: u64,
    /// 1-based index of the failing iteration
    pub iteration: u32,
    pub args: Vec<RenderedArg>,
    #[serde(skip)]
    pub values: Vec<Value>,
    pub fault: Fault,
}

/// A failed run, as an error value.
pub type TestFailure = FailureReport;

impl FailureReport {
    pub fn new(
        test_name: impl Into<String>,
        seed: u64,
        iteration: u32,
        names: &[String],
        values: Vec<Value>,
        fault: Fault,
    ) -> Self {
        let args = names
            .iter()
            .zip(&values)
            .map(|(name, value)| RenderedArg {
                name: name.clone(),
                value: value.to_string(),
            })
            .collect();
        Self {
            test_name: test_name.into(),
            seed,
            iteration,
            args,
            values,
            fault,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} failed on iteration {}", self.test_name, self.iteration)?;
        let args = self
            .args
            .iter()
            .map(|arg| format!("{}={}", arg.name, arg.value))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "Args passed: {}", args)?;
        writeln!(f, "Fault: {}", self.fault)?;
        if let Some(trace) = &self.fault.trace {
            writeln!(f, "\n{}", trace)?;
        }
        write!(f, "Replay with seed {} iteration {}", self.seed, self.iteration)
    }
}

impl std::error::Error for FailureReport {}
