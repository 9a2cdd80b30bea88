//! Value Marshalling
//!
//! Conversion between script values and native values, in both directions,
//! and the argument stack helpers used by callback dispatch and event
//! relays.
//!
//! ## Temporaries
//!
//! Converting a script value into a native reference type (`StrRef`)
//! needs backing storage that outlives the conversion. Such storage goes
//! to a [`Heap`] owned by the caller. Argument heaps live for the duration
//! of a call. A return-value heap must stay empty: the storage would die
//! before native code reads the returned reference.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use gsi_native::{ArgDecl, NativeType, NativeValue, SerialArgs};

use crate::context::Interpreter;
use crate::error::{BridgeError, BridgeResult};
use crate::script::ScriptValue;

// ============================================================================
// Heap
// ============================================================================

/// Scratch storage for temporaries created during conversion.
#[derive(Default)]
pub struct Heap {
    temporaries: Vec<Box<dyn Any>>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `value` alive until the heap is dropped
    pub fn alloc<T: Any>(&mut self, value: T) {
        self.temporaries.push(Box::new(value));
    }

    pub fn len(&self) -> usize {
        self.temporaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.temporaries.is_empty()
    }

    pub fn clear(&mut self) {
        self.temporaries.clear();
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap").field("temporaries", &self.temporaries.len()).finish()
    }
}

// ============================================================================
// Native -> Script
// ============================================================================

/// Convert a native value into a script value.
///
/// Native objects are mapped to their attached wrapper, or to a new
/// native-owned wrapper.
pub fn native_to_script(interp: &Rc<Interpreter>, value: NativeValue) -> BridgeResult<ScriptValue> {
    Ok(match value {
        NativeValue::Void => ScriptValue::None,
        NativeValue::Bool(b) => ScriptValue::Bool(b),
        NativeValue::Int(n) => ScriptValue::Int(n),
        NativeValue::Float(x) => ScriptValue::Float(x),
        NativeValue::Str(s) => ScriptValue::Str(s),
        NativeValue::Object(None) => ScriptValue::None,
        NativeValue::Object(Some(handle)) => ScriptValue::Object(interp.wrap(handle)?),
    })
}

// ============================================================================
// Script -> Native
// ============================================================================

/// Convert a script value into a native value of the declared type.
pub fn script_to_native(value: &ScriptValue, ty: &NativeType, heap: &mut Heap) -> BridgeResult<NativeValue> {
    match ty {
        NativeType::Void => Ok(NativeValue::Void),
        NativeType::Bool => Ok(NativeValue::Bool(value.is_truthy())),
        NativeType::Int => match value {
            ScriptValue::Int(n) => Ok(NativeValue::Int(*n)),
            ScriptValue::Bool(b) => Ok(NativeValue::Int(i64::from(*b))),
            ScriptValue::Float(x) if x.fract() == 0.0 && x.is_finite() => Ok(NativeValue::Int(*x as i64)),
            ScriptValue::Float(x) => Err(BridgeError::conversion_failed(
                "float",
                "int",
                format!("{} has a fractional part", x),
            )),
            other => Err(BridgeError::type_mismatch(ty.to_string(), other.type_name())),
        },
        NativeType::Float => value
            .as_float()
            .map(NativeValue::Float)
            .ok_or_else(|| BridgeError::type_mismatch(ty.to_string(), value.type_name())),
        NativeType::Str => match value {
            ScriptValue::Str(s) => Ok(NativeValue::Str(s.clone())),
            other => Err(BridgeError::type_mismatch(ty.to_string(), other.type_name())),
        },
        NativeType::StrRef => match value {
            ScriptValue::Str(s) => {
                heap.alloc(s.clone());
                Ok(NativeValue::Str(s.clone()))
            }
            other => Err(BridgeError::type_mismatch(ty.to_string(), other.type_name())),
        },
        NativeType::Object(class) => match value {
            ScriptValue::None => Ok(NativeValue::Object(None)),
            ScriptValue::Object(obj) => {
                let handle = obj.binding().handle()?;
                if !handle.class().is_a_named(class) {
                    return Err(BridgeError::type_mismatch(class.as_str(), handle.class().name().as_str()));
                }
                Ok(NativeValue::Object(Some(handle)))
            }
            other => Err(BridgeError::type_mismatch(ty.to_string(), other.type_name())),
        },
    }
}

// ============================================================================
// Argument Stacks
// ============================================================================

/// Read the next argument from a native argument stack.
pub fn pop_arg(
    interp: &Rc<Interpreter>,
    arg: &ArgDecl,
    args: &mut SerialArgs,
    heap: &mut Heap,
) -> BridgeResult<ScriptValue> {
    let value = args
        .read()
        .ok_or_else(|| BridgeError::invariant(format!("argument '{}' missing from stack", arg.name)))?;
    if !arg.ty.accepts(&value) {
        return Err(BridgeError::type_mismatch(arg.ty.to_string(), value.type_name()));
    }
    if arg.ty == NativeType::StrRef {
        heap.alloc(value.clone());
    }
    native_to_script(interp, value)
}

/// Write a return value to a native argument stack.
pub fn push_arg(ty: &NativeType, ret: &mut SerialArgs, value: &ScriptValue, heap: &mut Heap) -> BridgeResult<()> {
    if *ty == NativeType::Void {
        return Ok(());
    }
    ret.write(script_to_native(value, ty, heap)?);
    Ok(())
}
