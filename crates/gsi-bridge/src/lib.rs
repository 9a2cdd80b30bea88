//! # GSI Bridge
//!
//! Binding bridge between a reflected native object model (`gsi-native`)
//! and an embedded scripting runtime.
//!
//! ## Overview
//!
//! Every script instance of a class backed by a native class carries a
//! [`BoundObject`] that ties it to at most one native object. The bridge:
//!
//! - Creates native objects lazily and tracks who owns them
//! - Routes native virtual calls to script overrides ([`Callee`])
//! - Relays native events to any number of script subscribers
//!   ([`SignalRelay`])
//! - Follows ownership changes and destruction of managed native objects
//! - Caches which script class overrides which native callbacks
//!   ([`CallbackCache`])
//!
//! ## Ownership
//!
//! A bound object is either *script-owned* (the native object dies with the
//! script object) or *native-owned* (native code keeps the native object
//! alive, and the script object holds one extra reference to itself so it
//! survives as long as the native side needs it). `capture` and `release`
//! move an object between the two states.
//!
//! ## Module Structure
//!
//! - [`object`]: bound objects and lifecycle tracking
//! - [`callback`]: weak-receiver callable references
//! - [`callee`]: dispatch of native virtual calls
//! - [`signal`]: event relays
//! - [`cache`]: per-class callback cache
//! - [`context`]: interpreter service and execution context
//! - [`script`]: script runtime representations
//! - [`marshal`]: value conversion across the boundary
//! - [`error`]: error types

use smol_str::SmolStr;

pub mod cache;
pub mod callback;
pub mod callee;
pub mod context;
pub mod error;
pub mod marshal;
pub mod object;
pub mod script;
pub mod signal;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use cache::CallbackCache;
pub use callback::CallbackFunction;
pub use callee::Callee;
pub use context::{ExecGuard, ExecStats, Interpreter};
pub use error::{BridgeError, BridgeResult};
pub use marshal::Heap;
pub use object::BoundObject;
pub use script::{BoundMethod, Callable, Function, ScriptClass, ScriptObject, ScriptRef, ScriptValue, WeakRef};
pub use signal::SignalRelay;

/// Configuration of a bridge interpreter.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Name used in log output
    pub name: SmolStr,
    /// Cache the per-class callback lookup
    pub callback_cache: bool,
    /// Report `release()` on an already script-owned object as an error
    pub strict_release: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: SmolStr::new_inline("gsi"),
            callback_cache: true,
            strict_release: false,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the interpreter name.
    pub fn with_name(mut self, name: impl Into<SmolStr>) -> Self {
        self.name = name.into();
        self
    }

    /// Enable or disable the callback cache.
    pub fn with_callback_cache(mut self, enabled: bool) -> Self {
        self.callback_cache = enabled;
        self
    }

    /// Enable or disable strict release checking.
    pub fn with_strict_release(mut self, strict: bool) -> Self {
        self.strict_release = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_config_default() {
        let config = BridgeConfig::default();
        assert_eq!(config.name, "gsi");
        assert!(config.callback_cache);
        assert!(!config.strict_release);
    }

    #[test]
    fn test_bridge_config_builder() {
        let config = BridgeConfig::new()
            .with_name("layout")
            .with_callback_cache(false)
            .with_strict_release(true);

        assert_eq!(config.name, "layout");
        assert!(!config.callback_cache);
        assert!(config.strict_release);
    }
}
