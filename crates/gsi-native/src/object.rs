//! Native Objects and Handles
//!
//! A `NativeHandle` is a shared reference to one native instance. Besides
//! its payload, every instance carries:
//!
//! - a callback slot per overridable method, filled by whoever wants to
//!   intercept native virtual calls (the script bridge),
//! - an event handler slot per event,
//! - an ownership ledger if the class is managed,
//! - a weak *peer* pointer naming the one script wrapper attached to it.
//!
//! None of the slot tables is borrowed while a callback runs, so callbacks
//! are free to reenter the object (install or clear slots, destroy it).

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::args::SerialArgs;
use crate::class::ClassDecl;
use crate::error::{CallbackError, NativeError, NativeResult};
use crate::ledger::{ObjectLedger, StatusEvent};
use crate::method::{MethodDecl, MethodId};
use crate::types::NativeValue;

// ============================================================================
// Callback Interfaces
// ============================================================================

/// Receiver of native virtual calls.
///
/// `id` is the index the target handed out when the callback was
/// installed. Arguments are read from `args` in declaration order; the
/// return value, if any, is written to `ret`.
pub trait CallbackTarget {
    fn call(&self, id: usize, args: &mut SerialArgs, ret: &mut SerialArgs) -> Result<(), CallbackError>;
}

/// Receiver of a native event.
pub trait EventHandler {
    fn call(&self, method: &MethodDecl, args: &mut SerialArgs, ret: &mut SerialArgs) -> Result<(), CallbackError>;
}

/// An installed virtual method override.
#[derive(Clone)]
pub struct Callback {
    id: usize,
    target: Rc<dyn CallbackTarget>,
}

impl Callback {
    pub fn new(id: usize, target: Rc<dyn CallbackTarget>) -> Self {
        Self { id, target }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Invoke the target directly
    pub fn invoke(&self, args: &mut SerialArgs, ret: &mut SerialArgs) -> Result<(), CallbackError> {
        self.target.call(self.id, args, ret)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("id", &self.id).finish_non_exhaustive()
    }
}

// ============================================================================
// NativeObject / NativeHandle
// ============================================================================

/// A native instance. Only reachable through `NativeHandle`.
pub struct NativeObject {
    id: u64,
    class: Rc<ClassDecl>,
    data: RefCell<Box<dyn Any>>,
    ledger: Option<ObjectLedger>,
    destroyed: Cell<bool>,
    callbacks: RefCell<FxHashMap<MethodId, Callback>>,
    handlers: RefCell<FxHashMap<MethodId, Rc<dyn EventHandler>>>,
    peer: RefCell<Option<Weak<dyn Any>>>,
}

/// Shared handle to a native instance
#[derive(Clone)]
pub struct NativeHandle(Rc<NativeObject>);

impl NativeHandle {
    pub(crate) fn new(class: Rc<ClassDecl>, data: Box<dyn Any>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let ledger = class.is_managed().then(ObjectLedger::new);
        NativeHandle(Rc::new(NativeObject {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            class,
            data: RefCell::new(data),
            ledger,
            destroyed: Cell::new(false),
            callbacks: RefCell::new(FxHashMap::default()),
            handlers: RefCell::new(FxHashMap::default()),
            peer: RefCell::new(None),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Dynamic class of the object
    pub fn class(&self) -> &Rc<ClassDecl> {
        &self.0.class
    }

    /// Check if two handles refer to the same object
    pub fn ptr_eq(&self, other: &NativeHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    /// Ownership ledger, present for managed classes only
    pub fn ledger(&self) -> Option<&ObjectLedger> {
        self.0.ledger.as_ref()
    }

    /// Claim ownership on the native side. No-op for unmanaged classes.
    pub fn keep(&self) {
        if let Some(ledger) = self.ledger() {
            ledger.keep();
        }
    }

    /// Give up native ownership. No-op for unmanaged classes.
    pub fn release(&self) {
        if let Some(ledger) = self.ledger() {
            ledger.release();
        }
    }

    /// Access the payload if it has type `T`
    pub fn with_data<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut data = self.0.data.borrow_mut();
        data.downcast_mut::<T>().map(f)
    }

    // ------------------------------------------------------------------------
    // Peer
    // ------------------------------------------------------------------------

    /// The live script wrapper attached to this object, if any
    pub fn peer(&self) -> Option<Rc<dyn Any>> {
        self.0.peer.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub fn set_peer(&self, peer: Option<Weak<dyn Any>>) {
        *self.0.peer.borrow_mut() = peer;
    }

    // ------------------------------------------------------------------------
    // Virtual calls
    // ------------------------------------------------------------------------

    /// Install or clear the override of a callback method
    pub fn set_callback(&self, method: MethodId, callback: Option<Callback>) {
        let previous = match callback {
            Some(cb) => self.0.callbacks.borrow_mut().insert(method, cb),
            None => self.0.callbacks.borrow_mut().remove(&method),
        };
        drop(previous);
    }

    pub fn callback(&self, method: MethodId) -> Option<Callback> {
        self.0.callbacks.borrow().get(&method).cloned()
    }

    pub fn has_callback(&self, method: MethodId) -> bool {
        self.0.callbacks.borrow().contains_key(&method)
    }

    /// Number of installed overrides
    pub fn callback_count(&self) -> usize {
        self.0.callbacks.borrow().len()
    }

    /// Call a method the way native code does: overridable methods go to
    /// the installed override, everything else to the native body.
    pub fn call(&self, name: &str, args: &[NativeValue]) -> NativeResult<NativeValue> {
        self.ensure_alive()?;
        let method = self.0.class.require_method(name)?;

        match self.callback(method.id()) {
            Some(callback) => {
                let mut input = SerialArgs::from_values(args.iter().cloned());
                let mut ret = SerialArgs::new();
                callback
                    .invoke(&mut input, &mut ret)
                    .map_err(|source| NativeError::callback(self.context(&method), source))?;
                Ok(ret.read().unwrap_or_else(|| method.ret_type().default_value()))
            }
            None => method.call_native(self, args),
        }
    }

    /// Call the native body, bypassing any installed override
    pub fn call_base(&self, name: &str, args: &[NativeValue]) -> NativeResult<NativeValue> {
        self.ensure_alive()?;
        let method = self.0.class.require_method(name)?;
        method.call_native(self, args)
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    pub fn add_handler(&self, event: MethodId, handler: Rc<dyn EventHandler>) {
        let previous = self.0.handlers.borrow_mut().insert(event, handler);
        drop(previous);
    }

    pub fn remove_handler(&self, event: MethodId) -> bool {
        let removed = self.0.handlers.borrow_mut().remove(&event);
        removed.is_some()
    }

    pub fn has_handler(&self, event: MethodId) -> bool {
        self.0.handlers.borrow().contains_key(&event)
    }

    /// Emit an event. Without a handler the declared default is returned.
    pub fn emit(&self, name: &str, args: &[NativeValue]) -> NativeResult<NativeValue> {
        self.ensure_alive()?;
        let method = self.0.class.require_method(name)?;
        if !method.is_event() {
            return Err(NativeError::not_an_event(self.0.class.name().clone(), name));
        }

        let handler = self.0.handlers.borrow().get(&method.id()).cloned();
        match handler {
            Some(handler) => {
                let mut input = SerialArgs::from_values(args.iter().cloned());
                let mut ret = SerialArgs::new();
                handler
                    .call(&method, &mut input, &mut ret)
                    .map_err(|source| NativeError::callback(self.context(&method), source))?;
                Ok(ret.read().unwrap_or_else(|| method.ret_type().default_value()))
            }
            None => Ok(method.ret_type().default_value()),
        }
    }

    // ------------------------------------------------------------------------
    // Destruction
    // ------------------------------------------------------------------------

    /// Mark the object destroyed and tell the ledger listeners.
    ///
    /// Slots and ledger subscriptions are emptied after the notification;
    /// listeners may still clear the slots themselves.
    pub(crate) fn mark_destroyed(&self) {
        self.0.destroyed.set(true);

        if let Some(ledger) = self.ledger() {
            ledger.notify(StatusEvent::Destroyed);
            ledger.clear_listeners();
        }

        let callbacks = std::mem::take(&mut *self.0.callbacks.borrow_mut());
        let handlers = std::mem::take(&mut *self.0.handlers.borrow_mut());
        self.set_peer(None);
        drop(callbacks);
        drop(handlers);
    }

    fn ensure_alive(&self) -> NativeResult<()> {
        if self.is_destroyed() {
            Err(NativeError::destroyed(self.0.class.name().clone()))
        } else {
            Ok(())
        }
    }

    fn context(&self, method: &MethodDecl) -> String {
        format!("{}.{}", self.0.class.name(), method.name())
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("id", &self.0.id)
            .field("class", self.0.class.name())
            .field("destroyed", &self.0.destroyed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::ArgDecl;
    use crate::types::NativeType;
    use pretty_assertions::assert_eq;

    struct Doubler;

    impl CallbackTarget for Doubler {
        fn call(&self, _id: usize, args: &mut SerialArgs, ret: &mut SerialArgs) -> Result<(), CallbackError> {
            let n = args.read().and_then(|v| v.as_int()).unwrap_or(0);
            ret.write(NativeValue::Int(n * 2));
            Ok(())
        }
    }

    struct Recorder(RefCell<Vec<NativeValue>>);

    impl EventHandler for Recorder {
        fn call(&self, _method: &MethodDecl, args: &mut SerialArgs, _ret: &mut SerialArgs) -> Result<(), CallbackError> {
            while let Some(v) = args.read() {
                self.0.borrow_mut().push(v);
            }
            Ok(())
        }
    }

    fn calc_class() -> Rc<ClassDecl> {
        ClassDecl::builder("Calc")
            .managed(true)
            .callback_with("scale", [ArgDecl::new("n", NativeType::Int)], NativeType::Int, |_, args| {
                Ok(NativeValue::Int(args[0].as_int().unwrap_or(0) + 1))
            })
            .event("changed", [ArgDecl::new("n", NativeType::Int)], NativeType::Void)
            .build()
    }

    #[test]
    fn test_virtual_call_without_override_uses_native_body() {
        let handle = calc_class().create();
        assert_eq!(handle.call("scale", &[NativeValue::Int(4)]).unwrap(), NativeValue::Int(5));
    }

    #[test]
    fn test_virtual_call_routes_to_override() {
        let cls = calc_class();
        let handle = cls.create();
        let scale = cls.find_method("scale").unwrap();

        handle.set_callback(scale.id(), Some(Callback::new(0, Rc::new(Doubler))));
        assert!(handle.has_callback(scale.id()));
        assert_eq!(handle.call("scale", &[NativeValue::Int(4)]).unwrap(), NativeValue::Int(8));
        assert_eq!(handle.call_base("scale", &[NativeValue::Int(4)]).unwrap(), NativeValue::Int(5));

        handle.set_callback(scale.id(), None);
        assert_eq!(handle.callback_count(), 0);
        assert_eq!(handle.call("scale", &[NativeValue::Int(4)]).unwrap(), NativeValue::Int(5));
    }

    #[test]
    fn test_emit_without_handler_yields_default() {
        let handle = calc_class().create();
        assert_eq!(handle.emit("changed", &[NativeValue::Int(1)]).unwrap(), NativeValue::Void);
        assert!(matches!(handle.emit("scale", &[]), Err(NativeError::NotAnEvent { .. })));
    }

    #[test]
    fn test_emit_reaches_handler() {
        let cls = calc_class();
        let handle = cls.create();
        let changed = cls.find_method("changed").unwrap();
        let recorder = Rc::new(Recorder(RefCell::new(Vec::new())));

        handle.add_handler(changed.id(), recorder.clone());
        handle.emit("changed", &[NativeValue::Int(9)]).unwrap();
        assert_eq!(*recorder.0.borrow(), vec![NativeValue::Int(9)]);

        assert!(handle.remove_handler(changed.id()));
        assert!(!handle.has_handler(changed.id()));
    }

    #[test]
    fn test_destroyed_object_rejects_calls() {
        let cls = calc_class();
        let handle = cls.create();
        let scale = cls.find_method("scale").unwrap();
        handle.set_callback(scale.id(), Some(Callback::new(0, Rc::new(Doubler))));

        cls.destroy(&handle).unwrap();
        assert_eq!(handle.callback_count(), 0);
        assert!(matches!(handle.call("scale", &[]), Err(NativeError::Destroyed { .. })));
    }

    #[test]
    fn test_peer_is_weak() {
        let handle = calc_class().create();
        let wrapper: Rc<dyn Any> = Rc::new(17_u32);
        handle.set_peer(Some(Rc::downgrade(&wrapper)));
        assert!(handle.peer().is_some());

        drop(wrapper);
        assert!(handle.peer().is_none());
    }
}
