//! Dynamically shaped values produced by compiled generators.
//!
//! A test parameter can be declared as anything from a bounded integer to a
//! dict of unions of lists, so generators hand back a single [`Value`] enum
//! and the test picks it apart with the typed accessors.

use crate::compiler::{Generator, TestRng};
use crate::error::GenerationError;
use rand::SeedableRng;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A generated argument.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Elements are unique by equality
    Set(Vec<Value>),
    /// Keys are unique by equality and kept in insertion order
    Dict(Vec<(Value, Value)>),
    Function(FunctionValue),
}

impl Value {
    /// Short name of the value's shape, used in logs and type assertions.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
        }
    }

    /// Whether the value may be used as a dict key.
    ///
    /// Scalars are hashable, tuples are hashable when all of their elements
    /// are, and every other container (and functions) is not.
    pub fn is_hashable(&self) -> bool {
        match self {
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => true,
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            Value::List(_) | Value::Set(_) | Value::Dict(_) | Value::Function(_) => false,
        }
    }

    /// Builds a set, dropping later duplicates.
    pub fn set_from(items: Vec<Value>) -> Value {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        Value::Set(unique)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&[Value]> {
        match self {
            Value::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionValue> {
        match self {
            Value::Function(func) => Some(func),
            _ => None,
        }
    }
}

/// Inserts `key -> value`, replacing the value of an equal existing key.
pub(crate) fn insert_entry(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match entries.iter_mut().find(|(existing, _)| *existing == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|item| b.contains(item))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            (Value::Function(a), Value::Function(b)) => a.same_as(b),
            _ => false,
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Value], open: &str, close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => write_seq(f, items, "[", "]"),
            Value::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            Value::Tuple(items) => write_seq(f, items, "(", ")"),
            Value::Set(items) if items.is_empty() => f.write_str("set()"),
            Value::Set(items) => write_seq(f, items, "{", "}"),
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Value::Function(_) => f.write_str("<function>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self)
    }
}

/// A generated callable.
///
/// It ignores its arguments and draws a fresh sample of its return spec on
/// every call, from a random stream it owns.
#[derive(Clone)]
pub struct FunctionValue {
    returns: Generator,
    rng: Arc<Mutex<TestRng>>,
}

impl FunctionValue {
    pub(crate) fn new(returns: Generator, seed: u64) -> Self {
        Self {
            returns,
            rng: Arc::new(Mutex::new(TestRng::seed_from_u64(seed))),
        }
    }

    pub fn call(&self, _args: &[Value]) -> Result<Value, GenerationError> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.returns.generate(&mut rng)
    }

    fn same_as(&self, other: &FunctionValue) -> bool {
        Arc::ptr_eq(&self.rng, &other.rng)
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionValue(returns {})", self.returns.description())
    }
}
