//! Callable References
//!
//! A `CallbackFunction` stores a callable without keeping the receiver of a
//! bound method alive. Bound methods are decomposed into a weak receiver
//! and the underlying function; plain functions are held strongly.
//!
//! Dispatch tables and event relays are owned by the object whose methods
//! they reference. Holding receivers strongly would make every override an
//! ownership cycle.

use std::fmt;
use std::rc::Rc;

use gsi_native::MethodDecl;

use crate::script::{BoundMethod, Callable, Function, ScriptClass, WeakRef};

#[derive(Clone)]
enum Target {
    Function(Rc<Function>),
    Method {
        receiver: WeakRef,
        function: Rc<Function>,
        class: Option<Rc<ScriptClass>>,
    },
}

/// A stored callable, optionally tied to the native method it implements.
#[derive(Clone)]
pub struct CallbackFunction {
    target: Target,
    method: Option<Rc<MethodDecl>>,
}

impl CallbackFunction {
    pub fn new(callable: Callable, method: Option<Rc<MethodDecl>>) -> Self {
        let target = match callable {
            Callable::Function(function) => Target::Function(function),
            Callable::Method(bound) => Target::Method {
                receiver: WeakRef::new(bound.receiver()),
                function: Rc::clone(bound.function()),
                class: bound.class().cloned(),
            },
        };
        Self { target, method }
    }

    /// Native method this callable implements
    pub fn method(&self) -> Option<&Rc<MethodDecl>> {
        self.method.as_ref()
    }

    pub fn is_instance_method(&self) -> bool {
        matches!(self.target, Target::Method { .. })
    }

    /// Rebuild the callable. `None` once the receiver is gone.
    pub fn resolve(&self) -> Option<Callable> {
        match &self.target {
            Target::Function(function) => Some(Callable::Function(Rc::clone(function))),
            Target::Method {
                receiver,
                function,
                class,
            } => receiver
                .upgrade()
                .map(|obj| Callable::Method(BoundMethod::new(obj, Rc::clone(function), class.clone()))),
        }
    }

    /// Check if the callable can still be invoked
    pub fn is_available(&self) -> bool {
        match &self.target {
            Target::Function(_) => true,
            Target::Method { receiver, .. } => receiver.is_alive(),
        }
    }

    /// Check if this references `callable`
    pub fn matches(&self, callable: &Callable) -> bool {
        match (&self.target, callable) {
            (Target::Function(a), Callable::Function(b)) => Rc::ptr_eq(a, b),
            (Target::Method { receiver, function, .. }, Callable::Method(bound)) => {
                receiver.ptr_eq(&WeakRef::new(bound.receiver())) && Rc::ptr_eq(function, bound.function())
            }
            _ => false,
        }
    }
}

impl PartialEq for CallbackFunction {
    fn eq(&self, other: &Self) -> bool {
        match (&self.target, &other.target) {
            (Target::Function(a), Target::Function(b)) => Rc::ptr_eq(a, b),
            (
                Target::Method {
                    receiver: ra,
                    function: fa,
                    ..
                },
                Target::Method {
                    receiver: rb,
                    function: fb,
                    ..
                },
            ) => ra.ptr_eq(rb) && Rc::ptr_eq(fa, fb),
            _ => false,
        }
    }
}

impl fmt::Debug for CallbackFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("CallbackFunction");
        match &self.target {
            Target::Function(function) => s.field("function", function.name()),
            Target::Method { receiver, function, .. } => s
                .field("function", function.name())
                .field("receiver_alive", &receiver.is_alive()),
        };
        s.field("method", &self.method.as_ref().map(|m| m.name().clone()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptValue;
    use crate::testing::fixture;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bound_method_does_not_keep_receiver_alive() {
        let fx = fixture();
        let obj = fx.interp.instantiate(&fx.interp.class_for(&fx.shape));
        let method = obj.method("describe").unwrap();

        let cb = CallbackFunction::new(method, None);
        assert!(cb.is_instance_method());
        assert!(cb.resolve().is_some());

        drop(obj);
        assert!(!cb.is_available());
        assert!(cb.resolve().is_none());
    }

    #[test]
    fn test_plain_function_is_held_strongly() {
        let f = Function::new("f", 0, |_| Ok(ScriptValue::Int(7)));
        let cb = CallbackFunction::new(Callable::Function(f), None);
        assert!(!cb.is_instance_method());

        let callable = cb.resolve().unwrap();
        assert_eq!(callable.call(&[]).unwrap(), ScriptValue::Int(7));
    }

    #[test]
    fn test_equality_is_identity() {
        let fx = fixture();
        let cls = fx.interp.class_for(&fx.shape);
        let a = fx.interp.instantiate(&cls);
        let b = fx.interp.instantiate(&cls);
        let f = Function::new("f", 0, |_| Ok(ScriptValue::None));

        let on_a = CallbackFunction::new(a.method("describe").unwrap(), None);
        assert_eq!(on_a, CallbackFunction::new(a.method("describe").unwrap(), None));
        assert_ne!(on_a, CallbackFunction::new(b.method("describe").unwrap(), None));
        assert_ne!(on_a, CallbackFunction::new(Callable::Function(f.clone()), None));
        assert!(on_a.matches(&a.method("describe").unwrap()));
        assert!(!on_a.matches(&Callable::Function(f)));
    }
}
