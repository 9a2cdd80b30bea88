//! Native Type and Value Representations
//!
//! - `NativeType`: declared type of a method argument or return value
//! - `NativeValue`: a value travelling through an argument stack
//!
//! Reference types (`StrRef`) cannot be produced from nothing: whoever
//! writes one must provide backing storage for it.

use std::fmt;

use smol_str::SmolStr;

use crate::object::NativeHandle;

/// Declared type of an argument or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeType {
    /// No value
    Void,
    /// Boolean
    Bool,
    /// 64 bit signed integer
    Int,
    /// Double precision float
    Float,
    /// String passed by value
    Str,
    /// String passed by const reference
    StrRef,
    /// Pointer to an object of the named class (nullable)
    Object(SmolStr),
}

impl NativeType {
    /// The value a call yields when no implementation is available.
    pub fn default_value(&self) -> NativeValue {
        match self {
            NativeType::Void => NativeValue::Void,
            NativeType::Bool => NativeValue::Bool(false),
            NativeType::Int => NativeValue::Int(0),
            NativeType::Float => NativeValue::Float(0.0),
            NativeType::Str | NativeType::StrRef => NativeValue::Str(SmolStr::default()),
            NativeType::Object(_) => NativeValue::Object(None),
        }
    }

    /// Check if values of this type refer to storage owned by someone else
    pub fn is_reference(&self) -> bool {
        matches!(self, NativeType::StrRef | NativeType::Object(_))
    }

    /// Check if a value fits this type
    pub fn accepts(&self, value: &NativeValue) -> bool {
        match (self, value) {
            (NativeType::Void, NativeValue::Void) => true,
            (NativeType::Bool, NativeValue::Bool(_)) => true,
            (NativeType::Int, NativeValue::Int(_)) => true,
            (NativeType::Float, NativeValue::Float(_)) => true,
            (NativeType::Str | NativeType::StrRef, NativeValue::Str(_)) => true,
            (NativeType::Object(class), NativeValue::Object(handle)) => match handle {
                Some(handle) => handle.class().is_a_named(class),
                None => true,
            },
            _ => false,
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::Void => write!(f, "void"),
            NativeType::Bool => write!(f, "bool"),
            NativeType::Int => write!(f, "int"),
            NativeType::Float => write!(f, "double"),
            NativeType::Str => write!(f, "string"),
            NativeType::StrRef => write!(f, "const string &"),
            NativeType::Object(class) => write!(f, "{} *", class),
        }
    }
}

/// A native argument or return value.
#[derive(Debug, Clone)]
pub enum NativeValue {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(SmolStr),
    Object(Option<NativeHandle>),
}

impl NativeValue {
    /// Name of the value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            NativeValue::Void => "void",
            NativeValue::Bool(_) => "bool",
            NativeValue::Int(_) => "int",
            NativeValue::Float(_) => "double",
            NativeValue::Str(_) => "string",
            NativeValue::Object(_) => "object",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NativeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            NativeValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            NativeValue::Float(f) => Some(*f),
            NativeValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&NativeHandle> {
        match self {
            NativeValue::Object(handle) => handle.as_ref(),
            _ => None,
        }
    }
}

impl PartialEq for NativeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NativeValue::Void, NativeValue::Void) => true,
            (NativeValue::Bool(a), NativeValue::Bool(b)) => a == b,
            (NativeValue::Int(a), NativeValue::Int(b)) => a == b,
            (NativeValue::Float(a), NativeValue::Float(b)) => a == b,
            (NativeValue::Str(a), NativeValue::Str(b)) => a == b,
            (NativeValue::Object(a), NativeValue::Object(b)) => match (a, b) {
                (Some(a), Some(b)) => a.ptr_eq(b),
                (None, None) => true,
                _ => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeValue::Void => write!(f, "void"),
            NativeValue::Bool(b) => write!(f, "{}", b),
            NativeValue::Int(n) => write!(f, "{}", n),
            NativeValue::Float(x) => write!(f, "{}", x),
            NativeValue::Str(s) => write!(f, "{:?}", s),
            NativeValue::Object(Some(handle)) => {
                write!(f, "<{} #{}>", handle.class().name(), handle.id())
            }
            NativeValue::Object(None) => write!(f, "null"),
        }
    }
}

impl From<bool> for NativeValue {
    fn from(b: bool) -> Self {
        NativeValue::Bool(b)
    }
}

impl From<i64> for NativeValue {
    fn from(n: i64) -> Self {
        NativeValue::Int(n)
    }
}

impl From<f64> for NativeValue {
    fn from(x: f64) -> Self {
        NativeValue::Float(x)
    }
}

impl From<&str> for NativeValue {
    fn from(s: &str) -> Self {
        NativeValue::Str(SmolStr::new(s))
    }
}

impl From<NativeHandle> for NativeValue {
    fn from(handle: NativeHandle) -> Self {
        NativeValue::Object(Some(handle))
    }
}
