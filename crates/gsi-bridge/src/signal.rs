//! Event Relays
//!
//! A `SignalRelay` is installed as the native handler of one event of one
//! native object and forwards every emission to its script subscribers.
//!
//! ## Subscribers
//!
//! Subscribers are stored as [`CallbackFunction`]s, so a bound method
//! subscribed to an event does not keep its receiver alive. Adding a
//! subscriber that is present already moves it to the end; subscribers
//! whose receiver has expired are skipped.
//!
//! ## Argument Trimming
//!
//! A subscriber declaring fewer positional parameters than the event
//! provides receives only the leading arguments. Subscribers with unknown
//! arity (variadic or builtin) receive all of them. The result of the last
//! subscriber called is the result of the emission.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use gsi_native::{CallbackError, EventHandler, MethodDecl, SerialArgs};
use smol_str::SmolStr;
use tracing::trace;

use crate::callback::CallbackFunction;
use crate::context::Interpreter;
use crate::error::{BridgeError, BridgeResult};
use crate::marshal::{self, Heap};
use crate::script::Callable;

/// Forwards a native event to script subscribers.
pub struct SignalRelay {
    context: SmolStr,
    interp: Weak<Interpreter>,
    entries: RefCell<Vec<CallbackFunction>>,
}

impl SignalRelay {
    /// Create a relay; `context` names the event as `Class.event`
    pub fn new(interp: &Rc<Interpreter>, context: impl Into<SmolStr>) -> Self {
        Self {
            context: context.into(),
            interp: Rc::downgrade(interp),
            entries: RefCell::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &SmolStr {
        &self.context
    }

    /// Subscribe `callable`, moving it to the end if already subscribed
    pub fn add(&self, callable: Callable) {
        let entry = CallbackFunction::new(callable, None);
        let removed = {
            let mut entries = self.entries.borrow_mut();
            let removed: Vec<_> = entries.iter().filter(|e| **e == entry).cloned().collect();
            entries.retain(|e| *e != entry);
            entries.push(entry);
            removed
        };
        drop(removed);
    }

    /// Unsubscribe the first entry matching `callable`
    pub fn remove(&self, callable: &Callable) -> bool {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            entries
                .iter()
                .position(|e| e.matches(callable))
                .map(|pos| entries.remove(pos))
        };
        removed.is_some()
    }

    pub fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        drop(entries);
    }

    /// Replace the subscribers with those of `other`
    pub fn assign(&self, other: &SignalRelay) {
        if std::ptr::eq(self, other) {
            return;
        }
        let entries = other.entries.borrow().clone();
        let previous = std::mem::replace(&mut *self.entries.borrow_mut(), entries);
        drop(previous);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Deliver one emission of `method` to every live subscriber.
    pub fn broadcast(&self, method: &MethodDecl, args: &mut SerialArgs, ret: &mut SerialArgs) -> BridgeResult<()> {
        self.deliver(method, args, ret)
            .map_err(|err| err.with_call_context(self.context.as_str()))
    }

    fn deliver(&self, method: &MethodDecl, args: &mut SerialArgs, ret: &mut SerialArgs) -> BridgeResult<()> {
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
        let available = argv.len();

        // Subscribers may connect or disconnect while being called
        let subscribers = self.entries.borrow().clone();

        let mut result = None;
        for entry in subscribers {
            let Some(callable) = entry.resolve() else {
                continue;
            };

            let wanted = if available > 0 {
                callable.declared_arg_count().unwrap_or(available).min(available)
            } else {
                0
            };
            trace!(event = %self.context, subscriber = %callable.name(), args = wanted, "relaying event");
            result = Some(callable.call(&argv[..wanted])?);
        }

        match result {
            Some(value) => {
                let mut ret_heap = Heap::new();
                marshal::push_arg(method.ret_type(), ret, &value, &mut ret_heap)?;
                if !ret_heap.is_empty() {
                    return Err(BridgeError::invariant(format!(
                        "return value of {} left {} temporaries behind",
                        self.context,
                        ret_heap.len()
                    )));
                }
            }
            None => ret.write(method.ret_type().default_value()),
        }
        Ok(())
    }
}

impl EventHandler for SignalRelay {
    fn call(&self, method: &MethodDecl, args: &mut SerialArgs, ret: &mut SerialArgs) -> Result<(), CallbackError> {
        self.broadcast(method, args, ret).map_err(|err| Box::new(err) as CallbackError)
    }
}

impl fmt::Debug for SignalRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalRelay")
            .field("context", &self.context)
            .field("subscribers", &self.entries.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{Function, ScriptValue};
    use crate::testing::fixture;
    use gsi_native::NativeValue;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    fn counter(name: &str, arg_count: usize, hits: &Rc<Cell<usize>>) -> Callable {
        let hits = Rc::clone(hits);
        Callable::Function(Function::new(name, arg_count, move |args| {
            hits.set(hits.get() + 1);
            Ok(ScriptValue::Int(args.len() as i64))
        }))
    }

    #[test]
    fn test_add_is_idempotent_and_remove_unsubscribes() {
        let fx = fixture();
        let relay = SignalRelay::new(&fx.interp, "Shape.moved");
        let hits = Rc::new(Cell::new(0));
        let f = counter("f", 0, &hits);

        relay.add(f.clone());
        relay.add(f.clone());
        assert_eq!(relay.len(), 1);

        assert!(relay.remove(&f));
        assert!(relay.is_empty());
        assert!(!relay.remove(&f));
    }

    #[test]
    fn test_assign_copies_subscribers() {
        let fx = fixture();
        let hits = Rc::new(Cell::new(0));
        let a = SignalRelay::new(&fx.interp, "Shape.moved");
        let b = SignalRelay::new(&fx.interp, "Shape.moved");
        a.add(counter("f", 0, &hits));
        a.add(counter("g", 0, &hits));

        b.assign(&a);
        assert_eq!(b.len(), 2);
        a.assign(&a);
        assert_eq!(a.len(), 2);
        b.clear();
        assert!(b.is_empty());
    }

    #[test]
    fn test_broadcast_trims_arguments() {
        let fx = fixture();
        let moved = fx.shape.find_method("moved").unwrap();
        let relay = SignalRelay::new(&fx.interp, "Shape.moved");
        let hits = Rc::new(Cell::new(0));

        relay.add(counter("none", 0, &hits));
        relay.add(counter("one", 1, &hits));
        relay.add(counter("two", 2, &hits));

        let mut args = SerialArgs::from_values([NativeValue::Int(1), NativeValue::Int(2)]);
        let mut ret = SerialArgs::new();
        relay.broadcast(&moved, &mut args, &mut ret).unwrap();

        assert_eq!(hits.get(), 3);
        assert_eq!(ret.read(), Some(NativeValue::Int(2)));
    }

    #[test]
    fn test_broadcast_without_subscribers_yields_default() {
        let fx = fixture();
        let moved = fx.shape.find_method("moved").unwrap();
        let relay = SignalRelay::new(&fx.interp, "Shape.moved");

        let mut args = SerialArgs::from_values([NativeValue::Int(1), NativeValue::Int(2)]);
        let mut ret = SerialArgs::new();
        relay.broadcast(&moved, &mut args, &mut ret).unwrap();
        assert_eq!(ret.read(), Some(NativeValue::Int(0)));
    }

    #[test]
    fn test_first_error_aborts_broadcast() {
        let fx = fixture();
        let moved = fx.shape.find_method("moved").unwrap();
        let relay = SignalRelay::new(&fx.interp, "Shape.moved");
        let hits = Rc::new(Cell::new(0));

        relay.add(Callable::Function(Function::variadic("boom", |_| {
            Err(BridgeError::exception("RuntimeError", "boom"))
        })));
        relay.add(counter("late", 0, &hits));

        let mut args = SerialArgs::from_values([NativeValue::Int(1), NativeValue::Int(2)]);
        let err = relay.broadcast(&moved, &mut args, &mut SerialArgs::new()).unwrap_err();
        assert_eq!(err.call_context(), Some("Shape.moved"));
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_exit_is_not_annotated() {
        let fx = fixture();
        let moved = fx.shape.find_method("moved").unwrap();
        let relay = SignalRelay::new(&fx.interp, "Shape.moved");
        relay.add(Callable::Function(Function::variadic("quit", |_| Err(BridgeError::exit(2)))));

        let mut args = SerialArgs::from_values([NativeValue::Int(1), NativeValue::Int(2)]);
        let err = relay.broadcast(&moved, &mut args, &mut SerialArgs::new()).unwrap_err();
        assert!(matches!(err, BridgeError::Exit { code: 2 }));
    }
}
