//! Type specifications: the shapes test parameters are declared with.
//!
//! A [`TypeSpec`] is an immutable tree. Bounds live on the node that owns
//! them and are checked by the constructors, so an invalid spec fails where
//! it is written rather than somewhere inside a run. Bounds left unset are
//! filled from the run's [`SizeLimits`] when the spec is compiled.
//!
//! ```rust
//! use typedrive::spec::TypeSpec;
//!
//! let ints = TypeSpec::int_between(0, 10).unwrap();
//! let words = TypeSpec::list_with_max_length(TypeSpec::string(), 5).unwrap();
//! let either = ints | words;
//! assert_eq!(either.flatten_union().len(), 2);
//! ```

use crate::error::{ConfigurationError, SpecError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Container nesting used by `Any` when no depth is given
pub const DEFAULT_ANY_DEPTH: usize = 2;
/// Members per union level used by `Any` when no breadth is given
pub const DEFAULT_ANY_BREADTH: usize = 3;

/// Leaf types with their kind-specific bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scalar {
    Int {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    /// Float bounds are integers: the sample is a unit draw scaled by a
    /// random integer from the range
    Float {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Str {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Bool,
    None,
}

/// The shape of a generated value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypeSpec {
    Scalar(Scalar),
    List {
        #[serde(default = "TypeSpec::boxed_any")]
        element: Box<TypeSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Tuple {
        #[serde(default = "TypeSpec::boxed_any")]
        element: Box<TypeSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Set {
        #[serde(default = "TypeSpec::boxed_any")]
        element: Box<TypeSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Dict {
        #[serde(default = "TypeSpec::boxed_any")]
        key: Box<TypeSpec>,
        #[serde(default = "TypeSpec::boxed_any")]
        value: Box<TypeSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_keys: Option<usize>,
    },
    Union {
        #[serde(default)]
        members: Vec<TypeSpec>,
    },
    Any {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_depth: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_breadth: Option<usize>,
    },
    Function {
        #[serde(default = "TypeSpec::boxed_any")]
        returns: Box<TypeSpec>,
    },
    /// Resolved through the compiler's type registry
    Named { name: String },
}

pub(crate) fn check_bounds(field: &'static str, min: i64, max: i64) -> Result<(), ConfigurationError> {
    if min > max {
        return Err(ConfigurationError::InvalidBounds { field, min, max });
    }
    Ok(())
}

fn check_positive(field: &'static str, value: Option<usize>) -> Result<(), ConfigurationError> {
    if value == Some(0) {
        return Err(ConfigurationError::NonPositive { field });
    }
    Ok(())
}

impl TypeSpec {
    fn boxed_any() -> Box<TypeSpec> {
        Box::new(TypeSpec::any())
    }

    pub fn int() -> Self {
        TypeSpec::Scalar(Scalar::Int { min: None, max: None })
    }

    pub fn int_between(min: i64, max: i64) -> Result<Self, SpecError> {
        check_bounds("Int", min, max)?;
        Ok(TypeSpec::Scalar(Scalar::Int { min: Some(min), max: Some(max) }))
    }

    /// An integer with only a lower bound; the upper bound comes from the
    /// run's basic size limit.
    pub fn int_at_least(min: i64) -> Self {
        TypeSpec::Scalar(Scalar::Int { min: Some(min), max: None })
    }

    pub fn float() -> Self {
        TypeSpec::Scalar(Scalar::Float { min: None, max: None })
    }

    pub fn float_between(min: i64, max: i64) -> Result<Self, SpecError> {
        check_bounds("Float", min, max)?;
        Ok(TypeSpec::Scalar(Scalar::Float { min: Some(min), max: Some(max) }))
    }

    pub fn string() -> Self {
        TypeSpec::Scalar(Scalar::Str { max_length: None })
    }

    pub fn string_with_max_length(max_length: usize) -> Result<Self, SpecError> {
        check_positive("Str.max_length", Some(max_length))?;
        Ok(TypeSpec::Scalar(Scalar::Str { max_length: Some(max_length) }))
    }

    pub fn boolean() -> Self {
        TypeSpec::Scalar(Scalar::Bool)
    }

    pub fn none() -> Self {
        TypeSpec::Scalar(Scalar::None)
    }

    pub fn list(element: TypeSpec) -> Self {
        TypeSpec::List { element: Box::new(element), max_length: None }
    }

    pub fn list_with_max_length(element: TypeSpec, max_length: usize) -> Result<Self, SpecError> {
        check_positive("List.max_length", Some(max_length))?;
        Ok(TypeSpec::List { element: Box::new(element), max_length: Some(max_length) })
    }

    pub fn tuple(element: TypeSpec) -> Self {
        TypeSpec::Tuple { element: Box::new(element), max_length: None }
    }

    pub fn tuple_with_max_length(element: TypeSpec, max_length: usize) -> Result<Self, SpecError> {
        check_positive("Tuple.max_length", Some(max_length))?;
        Ok(TypeSpec::Tuple { element: Box::new(element), max_length: Some(max_length) })
    }

    pub fn set(element: TypeSpec) -> Self {
        TypeSpec::Set { element: Box::new(element), max_length: None }
    }

    pub fn set_with_max_length(element: TypeSpec, max_length: usize) -> Result<Self, SpecError> {
        check_positive("Set.max_length", Some(max_length))?;
        Ok(TypeSpec::Set { element: Box::new(element), max_length: Some(max_length) })
    }

    pub fn dict(key: TypeSpec, value: TypeSpec) -> Result<Self, SpecError> {
        check_key_spec(&key)?;
        Ok(TypeSpec::Dict { key: Box::new(key), value: Box::new(value), max_keys: None })
    }

    pub fn dict_with_max_keys(key: TypeSpec, value: TypeSpec, max_keys: usize) -> Result<Self, SpecError> {
        check_positive("Dict.max_keys", Some(max_keys))?;
        check_key_spec(&key)?;
        Ok(TypeSpec::Dict { key: Box::new(key), value: Box::new(value), max_keys: Some(max_keys) })
    }

    pub fn union(members: Vec<TypeSpec>) -> Self {
        TypeSpec::Union { members }
    }

    pub fn any() -> Self {
        TypeSpec::Any { max_depth: None, max_breadth: None }
    }

    pub fn any_bounded(max_depth: usize, max_breadth: usize) -> Result<Self, SpecError> {
        check_positive("Any.max_depth", Some(max_depth))?;
        check_positive("Any.max_breadth", Some(max_breadth))?;
        Ok(TypeSpec::Any { max_depth: Some(max_depth), max_breadth: Some(max_breadth) })
    }

    pub fn function(returns: TypeSpec) -> Self {
        TypeSpec::Function { returns: Box::new(returns) }
    }

    pub fn named(name: impl Into<String>) -> Self {
        TypeSpec::Named { name: name.into() }
    }

    /// Expands nested unions into one ordered list of non-union members.
    ///
    /// A non-union spec flattens to itself and an empty union to `Any`.
    pub fn flatten_union(&self) -> Vec<TypeSpec> {
        let mut members = Vec::new();
        flatten_into(self, &mut members);
        if members.is_empty() {
            members.push(TypeSpec::any());
        }
        members
    }

    /// Levels of container nesting. `Any` counts as zero since it is not
    /// yet materialized.
    pub fn container_depth(&self) -> usize {
        match self {
            TypeSpec::Scalar(_) | TypeSpec::Any { .. } | TypeSpec::Named { .. } => 0,
            TypeSpec::List { element, .. } | TypeSpec::Tuple { element, .. } | TypeSpec::Set { element, .. } => {
                1 + element.container_depth()
            }
            TypeSpec::Dict { key, value, .. } => 1 + key.container_depth().max(value.container_depth()),
            TypeSpec::Union { members } => members.iter().map(TypeSpec::container_depth).max().unwrap_or(0),
            TypeSpec::Function { returns } => returns.container_depth(),
        }
    }

    /// Re-checks every bound and dict key in the tree.
    ///
    /// The constructors already enforce these rules; this is for specs that
    /// were built literally or deserialized.
    pub fn validate(&self) -> Result<(), SpecError> {
        match self {
            TypeSpec::Scalar(Scalar::Int { min: Some(min), max: Some(max) }) => check_bounds("Int", *min, *max)?,
            TypeSpec::Scalar(Scalar::Float { min: Some(min), max: Some(max) }) => {
                check_bounds("Float", *min, *max)?
            }
            TypeSpec::Scalar(Scalar::Str { max_length }) => check_positive("Str.max_length", *max_length)?,
            TypeSpec::Scalar(_) | TypeSpec::Named { .. } => {}
            TypeSpec::List { element, max_length } => {
                check_positive("List.max_length", *max_length)?;
                element.validate()?;
            }
            TypeSpec::Tuple { element, max_length } => {
                check_positive("Tuple.max_length", *max_length)?;
                element.validate()?;
            }
            TypeSpec::Set { element, max_length } => {
                check_positive("Set.max_length", *max_length)?;
                element.validate()?;
            }
            TypeSpec::Dict { key, value, max_keys } => {
                check_positive("Dict.max_keys", *max_keys)?;
                check_key_spec(key)?;
                key.validate()?;
                value.validate()?;
            }
            TypeSpec::Union { members } => {
                for member in members {
                    member.validate()?;
                }
            }
            TypeSpec::Any { max_depth, max_breadth } => {
                check_positive("Any.max_depth", *max_depth)?;
                check_positive("Any.max_breadth", *max_breadth)?;
            }
            TypeSpec::Function { returns } => returns.validate()?,
        }
        Ok(())
    }
}

fn flatten_into(spec: &TypeSpec, out: &mut Vec<TypeSpec>) {
    match spec {
        TypeSpec::Union { members } => {
            for member in members {
                flatten_into(member, out);
            }
        }
        other => out.push(other.clone()),
    }
}

/// Dict keys must come from hashable scalars. `Any` and named types are
/// resolved later; the compiler materializes `Any` keys as scalars and the
/// dict generator re-checks named-type keys as they are drawn.
pub(crate) fn check_key_spec(key: &TypeSpec) -> Result<(), SpecError> {
    for member in key.flatten_union() {
        match member {
            TypeSpec::Scalar(_) | TypeSpec::Any { .. } | TypeSpec::Named { .. } => {}
            other => return Err(SpecError::InvalidKeyType { key: other.to_string() }),
        }
    }
    Ok(())
}

impl BitOr for TypeSpec {
    type Output = TypeSpec;

    fn bitor(self, rhs: TypeSpec) -> TypeSpec {
        TypeSpec::Union { members: vec![self, rhs] }
    }
}

fn write_bounds(f: &mut fmt::Formatter<'_>, name: &str, min: &Option<i64>, max: &Option<i64>) -> fmt::Result {
    match (min, max) {
        (Some(min), Some(max)) => write!(f, "{}[{}, {}]", name, min, max),
        (Some(min), None) => write!(f, "{}[{}]", name, min),
        _ => f.write_str(name),
    }
}

fn write_container(f: &mut fmt::Formatter<'_>, name: &str, element: &TypeSpec, max: &Option<usize>) -> fmt::Result {
    match max {
        Some(max) => write!(f, "{}[{}, {}]", name, element, max),
        None => write!(f, "{}[{}]", name, element),
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Scalar(Scalar::Int { min, max }) => write_bounds(f, "Int", min, max),
            TypeSpec::Scalar(Scalar::Float { min, max }) => write_bounds(f, "Float", min, max),
            TypeSpec::Scalar(Scalar::Str { max_length: Some(len) }) => write!(f, "Str[{}]", len),
            TypeSpec::Scalar(Scalar::Str { max_length: None }) => f.write_str("Str"),
            TypeSpec::Scalar(Scalar::Bool) => f.write_str("Bool"),
            TypeSpec::Scalar(Scalar::None) => f.write_str("None"),
            TypeSpec::List { element, max_length } => write_container(f, "List", element, max_length),
            TypeSpec::Tuple { element, max_length } => write_container(f, "Tuple", element, max_length),
            TypeSpec::Set { element, max_length } => write_container(f, "Set", element, max_length),
            TypeSpec::Dict { key, value, max_keys: Some(max) } => write!(f, "Dict[{}, {}, {}]", key, value, max),
            TypeSpec::Dict { key, value, max_keys: None } => write!(f, "Dict[{}, {}]", key, value),
            TypeSpec::Union { members } if members.is_empty() => f.write_str("Union[]"),
            TypeSpec::Union { members } => {
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{}", member)?;
                }
                Ok(())
            }
            TypeSpec::Any { max_depth: None, max_breadth: None } => f.write_str("Any"),
            TypeSpec::Any { max_depth, max_breadth } => write!(
                f,
                "Any[{}, {}]",
                max_depth.unwrap_or(DEFAULT_ANY_DEPTH),
                max_breadth.unwrap_or(DEFAULT_ANY_BREADTH)
            ),
            TypeSpec::Function { returns } => write!(f, "Function[{}]", returns),
            TypeSpec::Named { name } => f.write_str(name),
        }
    }
}

/// Global ceilings threaded into every compilation of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimits {
    /// Magnitude bound for unbounded Int and Float specs
    pub max_basic_arg_size: i64,
    /// Length bound for unbounded containers and strings
    pub max_complex_arg_size: usize,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            max_basic_arg_size: i32::MAX as i64,
            max_complex_arg_size: 100,
        }
    }
}

impl SizeLimits {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_basic_arg_size <= 0 {
            return Err(ConfigurationError::NonPositive { field: "max_basic_arg_size" });
        }
        check_positive("max_complex_arg_size", Some(self.max_complex_arg_size))
    }
}
