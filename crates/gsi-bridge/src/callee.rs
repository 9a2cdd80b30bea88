//! Virtual Call Dispatch
//!
//! Each bound object owns one `Callee`. When the object is attached, the
//! script overrides of native callback methods are appended to the
//! callee's dispatch table and a native callback slot naming the table
//! index is installed on the native object. Native code calling such a
//! method ends up in [`Callee::invoke`].
//!
//! ## Dispatch
//!
//! 1. Resolve the table entry; an expired receiver yields the declared
//!    default return value
//! 2. Read the declared arguments from the native stack (stopping early if
//!    the stack runs out)
//! 3. Call the script function with the receiver prepended
//! 4. Write the result back as the declared return type
//!
//! Script exceptions leave with a `Class.Method` context attached. Exit
//! requests pass through unchanged.
//!
//! A detached callee keeps its table so that native code still holding one
//! of its callbacks gets the declared default value instead of an error.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Weak;

use gsi_native::{CallbackError, CallbackTarget, MethodDecl, SerialArgs};
use smol_str::SmolStr;
use tracing::{debug, trace};

use crate::callback::CallbackFunction;
use crate::context::Interpreter;
use crate::error::{BridgeError, BridgeResult};
use crate::marshal::{self, Heap};
use crate::script::Callable;

/// Dispatch table of one bound object.
pub struct Callee {
    class: SmolStr,
    interp: Weak<Interpreter>,
    entries: RefCell<Vec<CallbackFunction>>,
    active: Cell<bool>,
}

impl Callee {
    pub(crate) fn new(class: SmolStr, interp: Weak<Interpreter>) -> Self {
        Self {
            class,
            interp,
            entries: RefCell::new(Vec::new()),
            active: Cell::new(true),
        }
    }

    /// Append an entry; returns its dispatch id
    pub fn add(&self, entry: CallbackFunction) -> usize {
        let mut entries = self.entries.borrow_mut();
        entries.push(entry);
        entries.len() - 1
    }

    /// Start over with an empty, active table
    pub fn reset(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        self.active.set(true);
        drop(entries);
    }

    /// Stop dispatching; returns the entries so their slots can be cleared
    pub fn deactivate(&self) -> Vec<CallbackFunction> {
        self.active.set(false);
        self.entries.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn get(&self, id: usize) -> Option<CallbackFunction> {
        self.entries.borrow().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Dispatch a native virtual call to entry `id`.
    pub fn invoke(&self, id: usize, args: &mut SerialArgs, ret: &mut SerialArgs) -> BridgeResult<()> {
        let entry = self
            .get(id)
            .ok_or_else(|| BridgeError::invariant(format!("no callback with id {} on {}", id, self.class)))?;
        let method = entry
            .method()
            .cloned()
            .ok_or_else(|| BridgeError::invariant(format!("callback {} on {} has no method", id, self.class)))?;

        let callable = if self.active.get() { entry.resolve() } else { None };
        let Some(callable) = callable else {
            debug!(class = %self.class, method = %method.name(), "receiver unavailable, returning default");
            ret.write(method.ret_type().default_value());
            return Ok(());
        };

        trace!(class = %self.class, method = %method.name(), "dispatching virtual call");
        self.dispatch(&method, &callable, args, ret)
            .map_err(|err| err.with_call_context(format!("{}.{}", self.class, method.name())))
    }

    fn dispatch(
        &self,
        method: &MethodDecl,
        callable: &Callable,
        args: &mut SerialArgs,
        ret: &mut SerialArgs,
    ) -> BridgeResult<()> {
        let interp = self.interp.upgrade().ok_or(BridgeError::InterpreterFinalized)?;
        let _guard = interp.enter()?;

        let mut heap = Heap::new();
        let mut argv = Vec::with_capacity(method.arg_count());
        for arg in method.args() {
            if !args.has_more() {
                break;
            }
            argv.push(marshal::pop_arg(&interp, arg, args, &mut heap)?);
        }

        let result = callable.call(&argv)?;

        let mut ret_heap = Heap::new();
        marshal::push_arg(method.ret_type(), ret, &result, &mut ret_heap)?;
        if !ret_heap.is_empty() {
            return Err(BridgeError::invariant(format!(
                "return value of {} left {} temporaries behind",
                method.name(),
                ret_heap.len()
            )));
        }
        Ok(())
    }
}

impl CallbackTarget for Callee {
    fn call(&self, id: usize, args: &mut SerialArgs, ret: &mut SerialArgs) -> Result<(), CallbackError> {
        self.invoke(id, args, ret).map_err(|err| Box::new(err) as CallbackError)
    }
}

impl fmt::Debug for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callee")
            .field("class", &self.class)
            .field("active", &self.active.get())
            .field("entries", &self.entries.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{ScriptClass, ScriptValue};
    use crate::testing::fixture;
    use gsi_native::NativeValue;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    #[test]
    fn test_override_is_dispatched() {
        let fx = fixture();
        let cls = ScriptClass::builder("Square")
            .extends(&fx.interp.class_for(&fx.shape))
            .def("area", 1, |_| Ok(ScriptValue::Int(16)))
            .build();
        let obj = fx.interp.instantiate(&cls);
        let handle = obj.binding().handle().unwrap();

        assert_eq!(obj.binding().callee().len(), 1);
        assert_eq!(handle.call("area", &[]).unwrap(), NativeValue::Int(16));
    }

    #[test]
    fn test_arguments_are_converted() {
        let fx = fixture();
        let cls = ScriptClass::builder("Loud")
            .extends(&fx.interp.class_for(&fx.shape))
            .def("describe", 2, |args| {
                let prefix = args[1].as_str().unwrap_or_default();
                Ok(ScriptValue::from(format!("{}LOUD", prefix).as_str()))
            })
            .build();
        let obj = fx.interp.instantiate(&cls);
        let handle = obj.binding().handle().unwrap();

        let result = handle.call("describe", &[NativeValue::Str("a ".into())]).unwrap();
        assert_eq!(result, NativeValue::Str("a LOUD".into()));
    }

    #[test]
    fn test_short_argument_stack_stops_early() {
        let fx = fixture();
        let cls = ScriptClass::builder("Quiet")
            .extends(&fx.interp.class_for(&fx.shape))
            .def("describe", 1, |_| Ok(ScriptValue::from("quiet")))
            .build();
        let obj = fx.interp.instantiate(&cls);
        let handle = obj.binding().handle().unwrap();

        assert_eq!(handle.call("describe", &[]).unwrap(), NativeValue::Str("quiet".into()));
    }

    #[test]
    fn test_script_exception_gets_context() {
        let fx = fixture();
        let cls = ScriptClass::builder("Broken")
            .extends(&fx.interp.class_for(&fx.shape))
            .def("area", 1, |_| Err(BridgeError::exception("ValueError", "no area")))
            .build();
        let obj = fx.interp.instantiate(&cls);
        let handle = obj.binding().handle().unwrap();

        let err = BridgeError::from(handle.call("area", &[]).unwrap_err());
        assert!(err.is_script_exception());
        assert_eq!(err.call_context(), Some("Shape.area"));
    }

    #[test]
    fn test_expired_receiver_yields_default() {
        let fx = fixture();
        let area = fx.shape.find_method("area").unwrap();
        let callee = Callee::new("Shape".into(), Rc::downgrade(&fx.interp));
        let obj = fx.interp.instantiate(&fx.interp.class_for(&fx.shape));
        let id = callee.add(CallbackFunction::new(obj.method("area").unwrap(), Some(area)));

        drop(obj);
        let mut ret = SerialArgs::new();
        callee.invoke(id, &mut SerialArgs::new(), &mut ret).unwrap();
        assert_eq!(ret.read(), Some(NativeValue::Int(0)));
    }

    #[test]
    fn test_detached_callee_answers_with_defaults() {
        let fx = fixture();
        let cls = ScriptClass::builder("Square")
            .extends(&fx.interp.class_for(&fx.shape))
            .def("area", 1, |_| Ok(ScriptValue::Int(16)))
            .build();
        let obj = fx.interp.instantiate(&cls);
        let handle = obj.binding().handle().unwrap();
        let area = fx.shape.find_method("area").unwrap();
        let stale = handle.callback(area.id()).unwrap();

        obj.binding().detach();
        assert!(!obj.binding().callee().is_active());

        let mut ret = SerialArgs::new();
        stale.invoke(&mut SerialArgs::new(), &mut ret).unwrap();
        assert_eq!(ret.read(), Some(NativeValue::Int(0)));
    }

    #[test]
    fn test_unknown_id_is_an_invariant_violation() {
        let fx = fixture();
        let callee = Callee::new("Shape".into(), Rc::downgrade(&fx.interp));
        let err = callee
            .invoke(3, &mut SerialArgs::new(), &mut SerialArgs::new())
            .unwrap_err();
        assert!(err.is_programmer_error());
    }
}
