//! # GSI Native
//!
//! Reflected native object model consumed by the script bridge.
//!
//! ## Overview
//!
//! This crate describes native classes the way a reflection layer exposes
//! them to a scripting language:
//!
//! - Class descriptors with base classes, overridable (virtual) methods,
//!   events, and factory/destroy operations
//! - Native handles with per-object callback slots, event handler slots
//!   and a weak pointer to the attached script wrapper
//! - An ownership ledger for *managed* classes whose destruction and
//!   ownership changes are observable
//! - Serialized argument stacks used to pass values across the boundary
//!
//! ## Module Structure
//!
//! - [`class`]: class descriptors and the class builder
//! - [`method`]: method descriptors
//! - [`object`]: native handles, callback and event interfaces
//! - [`ledger`]: ownership ledger and status events
//! - [`args`]: serialized argument stacks
//! - [`types`]: native types and values
//! - [`registry`]: name-indexed class registry
//! - [`error`]: error types

pub mod args;
pub mod class;
pub mod error;
pub mod ledger;
pub mod method;
pub mod object;
pub mod registry;
pub mod types;

// Re-export main types for convenience
pub use args::SerialArgs;
pub use class::{ClassBuilder, ClassDecl};
pub use error::{CallbackError, NativeError, NativeResult};
pub use ledger::{ListenerId, ObjectLedger, StatusEvent, StatusListener};
pub use method::{ArgDecl, MethodDecl, MethodId, MethodKind, NativeImpl};
pub use object::{Callback, CallbackTarget, EventHandler, NativeHandle};
pub use registry::ClassRegistry;
pub use types::{NativeType, NativeValue};
