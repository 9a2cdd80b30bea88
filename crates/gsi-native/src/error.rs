//! Error Types for the Native Object Model
//!
//! ## Error Categories
//!
//! - Registry lookups (unknown or duplicate classes, unknown methods)
//! - Use of a native object after it has been destroyed
//! - Failures raised by script callbacks and event handlers

use smol_str::SmolStr;
use thiserror::Error;

/// Result type for native object operations
pub type NativeResult<T> = Result<T, NativeError>;

/// Error raised by a callback target or event handler.
///
/// Kept opaque so the native layer does not depend on the script side;
/// callers downcast to recover the original error.
pub type CallbackError = Box<dyn std::error::Error + 'static>;

/// Native object model error types
#[derive(Error, Debug)]
pub enum NativeError {
    /// No class with this name is registered
    #[error("unknown class: {name}")]
    UnknownClass {
        /// Name of the class
        name: SmolStr,
    },

    /// A class with this name is registered already
    #[error("class already registered: {name}")]
    DuplicateClass {
        /// Name of the class
        name: SmolStr,
    },

    /// Method not declared anywhere in the class hierarchy
    #[error("no method '{method}' in class {class}")]
    UnknownMethod {
        /// Class searched
        class: SmolStr,
        /// Method name
        method: SmolStr,
    },

    /// Method exists but is not an event
    #[error("method '{class}.{method}' is not an event")]
    NotAnEvent {
        /// Declaring class
        class: SmolStr,
        /// Method name
        method: SmolStr,
    },

    /// The native object was destroyed already
    #[error("object of class {class} has been destroyed")]
    Destroyed {
        /// Class of the destroyed object
        class: SmolStr,
    },

    /// A callback or event handler failed
    #[error("error in callback '{context}': {source}")]
    Callback {
        /// `Class.Method` of the failing call
        context: String,
        /// The error raised by the callback
        #[source]
        source: CallbackError,
    },
}

impl NativeError {
    /// Create an unknown class error
    pub fn unknown_class(name: impl Into<SmolStr>) -> Self {
        NativeError::UnknownClass { name: name.into() }
    }

    /// Create a duplicate class error
    pub fn duplicate_class(name: impl Into<SmolStr>) -> Self {
        NativeError::DuplicateClass { name: name.into() }
    }

    /// Create an unknown method error
    pub fn unknown_method(class: impl Into<SmolStr>, method: impl Into<SmolStr>) -> Self {
        NativeError::UnknownMethod {
            class: class.into(),
            method: method.into(),
        }
    }

    /// Create a not-an-event error
    pub fn not_an_event(class: impl Into<SmolStr>, method: impl Into<SmolStr>) -> Self {
        NativeError::NotAnEvent {
            class: class.into(),
            method: method.into(),
        }
    }

    /// Create a destroyed object error
    pub fn destroyed(class: impl Into<SmolStr>) -> Self {
        NativeError::Destroyed { class: class.into() }
    }

    /// Wrap an error raised by a callback
    pub fn callback(context: impl Into<String>, source: CallbackError) -> Self {
        NativeError::Callback {
            context: context.into(),
            source,
        }
    }

    /// Borrow the callback error as a concrete type, if it is one
    pub fn callback_error<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            NativeError::Callback { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Check if this error came out of a callback
    pub fn is_callback_error(&self) -> bool {
        matches!(self, NativeError::Callback { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Error, Debug)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_unknown_method_message() {
        let err = NativeError::unknown_method("Shape", "area");
        assert_eq!(err.to_string(), "no method 'area' in class Shape");
    }

    #[test]
    fn test_callback_downcast() {
        let err = NativeError::callback("Shape.area", Box::new(Boom));
        assert!(err.is_callback_error());
        assert!(err.callback_error::<Boom>().is_some());
        assert!(err.to_string().contains("Shape.area"));
        assert!(NativeError::destroyed("Shape").callback_error::<Boom>().is_none());
    }
}
