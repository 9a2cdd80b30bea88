//! Error Types for the Script Bridge
//!
//! ## Error Categories
//!
//! - Programmer errors: invariant violations, permission failures,
//!   use of destroyed objects
//! - Script exceptions raised by script code, optionally annotated with
//!   the `Class.Method` through which native code called into script
//! - The interpreter exit signal, which is never wrapped or annotated
//! - Marshalling failures (conversion, type mismatch, arity)
//! - Errors of the native object model

use gsi_native::NativeError;
use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A bridge invariant was broken by the caller
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant
        message: String,
    },

    /// The operation is not permitted on this object
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the refused operation
        message: String,
    },

    /// Explicit destroy of an object that was destroyed already
    #[error("object of class {class} has been destroyed already")]
    AlreadyDestroyed {
        /// Class of the object
        class: String,
    },

    /// Exception raised by script code
    #[error("{exception_type}: {message}{}", fmt_context(.context))]
    ScriptException {
        /// Script exception type (e.g. "TypeError")
        exception_type: String,
        /// Exception message
        message: String,
        /// `Class.Method` through which native code made the call
        context: Option<String>,
    },

    /// A non-script error raised while native code called into script
    #[error("error calling method '{context}': {message}")]
    ScriptCallFailed {
        /// `Class.Method` of the call
        context: String,
        /// Message of the underlying error
        message: String,
    },

    /// The script requested interpreter exit
    #[error("interpreter exit requested (code {code})")]
    Exit {
        /// Exit status
        code: i32,
    },

    /// Type conversion failed
    #[error("type conversion failed: cannot convert {from_type} to {to_type}: {reason}")]
    ConversionFailed {
        /// Source type name
        from_type: String,
        /// Target type name
        to_type: String,
        /// Reason for failure
        reason: String,
    },

    /// Type mismatch during conversion
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Actual type received
        actual: String,
    },

    /// Wrong number of arguments
    #[error("{function}() takes {expected} positional arguments but {actual} were given")]
    WrongArgumentCount {
        /// Function name
        function: String,
        /// Expected count
        expected: usize,
        /// Actual count
        actual: usize,
    },

    /// Attribute not found on object
    #[error("attribute '{attribute}' not found on {object_type}")]
    AttributeNotFound {
        /// Name of the attribute
        attribute: String,
        /// Type of the object
        object_type: String,
    },

    /// The interpreter was finalized
    #[error("script interpreter has been finalized")]
    InterpreterFinalized,

    /// Error of the native object model
    #[error(transparent)]
    Native(NativeError),
}

fn fmt_context(context: &Option<String>) -> String {
    match context {
        Some(context) => format!(" (in {})", context),
        None => String::new(),
    }
}

impl BridgeError {
    /// Create an invariant violation
    pub fn invariant(message: impl Into<String>) -> Self {
        BridgeError::InvariantViolation {
            message: message.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        BridgeError::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create an already destroyed error
    pub fn already_destroyed(class: impl Into<String>) -> Self {
        BridgeError::AlreadyDestroyed { class: class.into() }
    }

    /// Create a script exception
    pub fn exception(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::ScriptException {
            exception_type: exception_type.into(),
            message: message.into(),
            context: None,
        }
    }

    /// Create an exit request
    pub fn exit(code: i32) -> Self {
        BridgeError::Exit { code }
    }

    /// Create a conversion failed error
    pub fn conversion_failed(
        from_type: impl Into<String>,
        to_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        BridgeError::ConversionFailed {
            from_type: from_type.into(),
            to_type: to_type.into(),
            reason: reason.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        BridgeError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a wrong argument count error
    pub fn wrong_argument_count(function: impl Into<String>, expected: usize, actual: usize) -> Self {
        BridgeError::WrongArgumentCount {
            function: function.into(),
            expected,
            actual,
        }
    }

    /// Create an attribute not found error
    pub fn attribute_not_found(attribute: impl Into<String>, object_type: impl Into<String>) -> Self {
        BridgeError::AttributeNotFound {
            attribute: attribute.into(),
            object_type: object_type.into(),
        }
    }

    /// Annotate an error escaping a native-to-script call.
    ///
    /// Script exceptions get the context attached, exit requests pass
    /// through untouched and everything else is reported as a failed call.
    pub fn with_call_context(self, context: impl Into<String>) -> Self {
        match self {
            BridgeError::ScriptException {
                exception_type,
                message,
                ..
            } => BridgeError::ScriptException {
                exception_type,
                message,
                context: Some(context.into()),
            },
            exit @ BridgeError::Exit { .. } => exit,
            other => BridgeError::ScriptCallFailed {
                context: context.into(),
                message: other.to_string(),
            },
        }
    }

    /// Check if this is an exit request
    pub fn is_exit(&self) -> bool {
        matches!(self, BridgeError::Exit { .. })
    }

    /// Check if this is a script exception
    pub fn is_script_exception(&self) -> bool {
        matches!(self, BridgeError::ScriptException { .. })
    }

    /// Check if this is a programmer error
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            BridgeError::InvariantViolation { .. }
                | BridgeError::PermissionDenied { .. }
                | BridgeError::AlreadyDestroyed { .. }
        )
    }

    /// Check if this is a marshalling error
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            BridgeError::ConversionFailed { .. }
                | BridgeError::TypeMismatch { .. }
                | BridgeError::WrongArgumentCount { .. }
        )
    }

    /// The call context attached to this error, if any
    pub fn call_context(&self) -> Option<&str> {
        match self {
            BridgeError::ScriptException { context, .. } => context.as_deref(),
            BridgeError::ScriptCallFailed { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<NativeError> for BridgeError {
    /// Errors raised by script code travel through native frames boxed in
    /// `NativeError::Callback`; unbox them so they surface unchanged.
    fn from(err: NativeError) -> Self {
        match err {
            NativeError::Callback { context, source } => match source.downcast::<BridgeError>() {
                Ok(inner) => *inner,
                Err(source) => BridgeError::Native(NativeError::Callback { context, source }),
            },
            other => BridgeError::Native(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_script_exception_context() {
        let err = BridgeError::exception("ValueError", "bad radius").with_call_context("Shape.area");
        assert!(err.is_script_exception());
        assert_eq!(err.call_context(), Some("Shape.area"));
        assert_eq!(err.to_string(), "ValueError: bad radius (in Shape.area)");
    }

    #[test]
    fn test_exit_passes_through() {
        let err = BridgeError::exit(3).with_call_context("Shape.area");
        assert!(matches!(err, BridgeError::Exit { code: 3 }));
        assert_eq!(err.call_context(), None);
    }

    #[test]
    fn test_other_errors_become_call_failures() {
        let err = BridgeError::type_mismatch("int", "str").with_call_context("Shape.area");
        assert!(matches!(err, BridgeError::ScriptCallFailed { .. }));
        assert_eq!(
            err.to_string(),
            "error calling method 'Shape.area': type mismatch: expected int, got str"
        );
    }

    #[test]
    fn test_native_callback_error_is_unboxed() {
        let native = NativeError::callback("Shape.area", Box::new(BridgeError::exit(1)));
        let err = BridgeError::from(native);
        assert!(err.is_exit());

        let native = NativeError::destroyed("Shape");
        assert!(matches!(BridgeError::from(native), BridgeError::Native(_)));
    }

    #[test]
    fn test_classification() {
        assert!(BridgeError::invariant("x").is_programmer_error());
        assert!(BridgeError::already_destroyed("Shape").is_programmer_error());
        assert!(BridgeError::wrong_argument_count("f", 1, 2).is_type_error());
        assert!(!BridgeError::InterpreterFinalized.is_type_error());
    }
}
