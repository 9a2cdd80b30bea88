//! Bound Objects
//!
//! A `BoundObject` is the part of a script instance that ties it to a
//! native object. It tracks:
//!
//! - the attached native handle (at most one, and a native object has at
//!   most one live wrapper)
//! - who owns the native object: the script side (*owned*) or native code
//! - whether script code may destroy the native object explicitly
//! - the dispatch table of script overrides and the event relay table
//! - the *retention*, the extra reference a native-owned wrapper holds on
//!   itself so that it stays alive while native code needs it
//!
//! ## Lifecycle
//!
//! ```text
//!              attach / handle()              destroy()
//! Unattached ------------------> Attached ---------------> Destroyed
//!                                   |  ^                       ^
//!                     native dies   |  | capture() / release() |
//!                                   +--+-----------------------+
//! ```
//!
//! Objects of managed classes report destruction and ownership changes
//! through their ownership ledger; the bound object subscribes a
//! [`LifecycleListener`] while attached.
//!
//! ## Reentrancy
//!
//! No interior borrow is held while native or script code runs. Releasing
//! the retention may free the script instance itself, so it is always the
//! last thing an operation does.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use gsi_native::{
    Callback, CallbackTarget, ClassDecl, EventHandler, ListenerId, MethodId, NativeError, NativeHandle,
    StatusEvent, StatusListener,
};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::callback::CallbackFunction;
use crate::callee::Callee;
use crate::context::Interpreter;
use crate::error::{BridgeError, BridgeResult};
use crate::script::{BoundMethod, Callable, ScriptClass, ScriptObject, ScriptRef};
use crate::signal::SignalRelay;

/// Native side of a script instance.
pub struct BoundObject {
    owner: Weak<ScriptObject>,
    script_class: Rc<ScriptClass>,
    cls: Option<Rc<ClassDecl>>,
    interp: Weak<Interpreter>,
    handle: RefCell<Option<NativeHandle>>,
    owned: Cell<bool>,
    const_ref: Cell<bool>,
    destroyed: Cell<bool>,
    can_destroy: Cell<bool>,
    callee: Rc<Callee>,
    signals: RefCell<FxHashMap<MethodId, Rc<SignalRelay>>>,
    listener: Cell<Option<ListenerId>>,
    retention: RefCell<Option<ScriptRef>>,
}

impl BoundObject {
    pub(crate) fn new(owner: Weak<ScriptObject>, script_class: Rc<ScriptClass>, interp: Weak<Interpreter>) -> Self {
        let cls = script_class.native_class().cloned();
        let class_name = cls.as_ref().map_or_else(|| script_class.name().clone(), |c| c.name().clone());
        Self {
            owner,
            script_class,
            cls,
            callee: Rc::new(Callee::new(class_name, interp.clone())),
            interp,
            handle: RefCell::new(None),
            owned: Cell::new(false),
            const_ref: Cell::new(false),
            destroyed: Cell::new(false),
            can_destroy: Cell::new(false),
            signals: RefCell::new(FxHashMap::default()),
            listener: Cell::new(None),
            retention: RefCell::new(None),
        }
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// Native class descriptor, `None` for pure script classes
    pub fn class_decl(&self) -> Option<&Rc<ClassDecl>> {
        self.cls.as_ref()
    }

    /// Currently attached handle, without creating one
    pub fn attached_handle(&self) -> Option<NativeHandle> {
        self.handle.borrow().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.handle.borrow().is_some()
    }

    /// Check if the script side owns the native object
    pub fn is_owned(&self) -> bool {
        self.owned.get()
    }

    pub fn is_const_ref(&self) -> bool {
        self.const_ref.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Check if script code may destroy the native object explicitly
    pub fn can_destroy(&self) -> bool {
        self.can_destroy.get()
    }

    /// Check if the instance keeps itself alive for native code
    pub fn is_retained(&self) -> bool {
        self.retention.borrow().is_some()
    }

    pub fn callee(&self) -> &Rc<Callee> {
        &self.callee
    }

    /// Number of events with a relay installed
    pub fn signal_count(&self) -> usize {
        self.signals.borrow().len()
    }

    pub(crate) fn interpreter(&self) -> BridgeResult<Rc<Interpreter>> {
        match self.interp.upgrade() {
            Some(interp) if !interp.is_finalized() => Ok(interp),
            _ => Err(BridgeError::InterpreterFinalized),
        }
    }

    fn class_name(&self) -> &str {
        self.cls.as_ref().map_or(self.script_class.name().as_str(), |c| c.name().as_str())
    }

    // ------------------------------------------------------------------------
    // Attach / detach
    // ------------------------------------------------------------------------

    /// Bind a native object to this instance.
    ///
    /// Installs the script overrides on the native object, subscribes to
    /// its ownership ledger (managed classes) and retains the instance if
    /// the native side owns the object.
    pub fn attach(&self, handle: NativeHandle, owned: bool, const_ref: bool, can_destroy: bool) -> BridgeResult<()> {
        let interp = self.interpreter()?;
        let cls = self.cls.clone().ok_or_else(|| {
            BridgeError::invariant(format!("class {} has no native counterpart", self.script_class.name()))
        })?;

        if self.destroyed.get() {
            return Err(BridgeError::invariant(format!(
                "object of class {} has been destroyed already",
                cls.name()
            )));
        }
        if self.is_attached() {
            return Err(BridgeError::invariant(format!(
                "object of class {} is already attached to a native object",
                cls.name()
            )));
        }
        if handle.is_destroyed() {
            return Err(NativeError::destroyed(handle.class().name().clone()).into());
        }
        if !handle.class().is_a(&cls) {
            return Err(BridgeError::type_mismatch(cls.name().as_str(), handle.class().name().as_str()));
        }
        if handle.peer().is_some() {
            return Err(BridgeError::invariant(format!(
                "native object #{} is already bound to another script object",
                handle.id()
            )));
        }

        *self.handle.borrow_mut() = Some(handle.clone());
        self.owned.set(owned);
        self.const_ref.set(const_ref);
        self.can_destroy.set(can_destroy);

        let peer: Weak<dyn Any> = self.owner.clone();
        handle.set_peer(Some(peer));

        self.install_callbacks(&interp, &cls, &handle);

        if let Some(ledger) = handle.ledger() {
            if ledger.already_kept() {
                self.capture();
            }
            let listener = Rc::new(LifecycleListener {
                target: self.owner.clone(),
            });
            self.listener.set(Some(ledger.subscribe(listener)));
        }

        if !self.owned.get() {
            self.retain();
        }

        debug!(
            class = %cls.name(),
            object = handle.id(),
            owned = self.owned.get(),
            can_destroy,
            "attached native object"
        );
        Ok(())
    }

    fn install_callbacks(&self, interp: &Interpreter, cls: &ClassDecl, handle: &NativeHandle) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };

        self.callee.reset();
        let methods = interp.callback_cache().overridden(&self.script_class, cls);
        for method in methods.iter() {
            let Some(function) = self.script_class.lookup(method.name()) else {
                continue;
            };
            let bound = BoundMethod::new(Rc::clone(&owner), function, Some(Rc::clone(&self.script_class)));
            let id = self
                .callee
                .add(CallbackFunction::new(Callable::Method(bound), Some(Rc::clone(method))));
            let target: Rc<dyn CallbackTarget> = self.callee.clone();
            handle.set_callback(method.id(), Some(Callback::new(id, target)));
        }
    }

    /// Unbind the native object.
    ///
    /// Unsubscribes from the ledger (unless the native object is gone),
    /// clears the installed overrides and event relays and resets the
    /// ownership flags. Does nothing if no native object is attached.
    pub fn detach(&self) {
        let Some(handle) = self.handle.borrow_mut().take() else {
            return;
        };

        if let Some(id) = self.listener.take() {
            if !self.destroyed.get() {
                if let Some(ledger) = handle.ledger() {
                    ledger.unsubscribe(id);
                }
            }
        }

        let entries = self.callee.deactivate();
        for entry in &entries {
            if let Some(method) = entry.method() {
                handle.set_callback(method.id(), None);
            }
        }

        let relays: Vec<_> = self.signals.borrow_mut().drain().collect();
        for (event, relay) in &relays {
            handle.remove_handler(*event);
            relay.clear();
        }

        handle.set_peer(None);
        self.owned.set(false);
        self.const_ref.set(false);
        self.can_destroy.set(false);

        debug!(class = %self.class_name(), object = handle.id(), "detached native object");
        drop(entries);
        drop(relays);
    }

    /// The native object, created on first use.
    ///
    /// A created object is owned by the script side and may be destroyed
    /// explicitly.
    pub fn handle(&self) -> BridgeResult<NativeHandle> {
        if self.destroyed.get() {
            return Err(BridgeError::invariant(format!(
                "object of class {} has been destroyed already",
                self.class_name()
            )));
        }
        if let Some(handle) = self.attached_handle() {
            return Ok(handle);
        }

        let cls = self.cls.clone().ok_or_else(|| {
            BridgeError::invariant(format!("class {} has no native counterpart", self.script_class.name()))
        })?;
        let handle = cls.create();
        self.attach(handle.clone(), true, false, true)?;
        Ok(handle)
    }

    // ------------------------------------------------------------------------
    // Destruction
    // ------------------------------------------------------------------------

    /// Destroy the native object on request of script code.
    ///
    /// Fails with `PermissionDenied` if the attached object may not be
    /// destroyed and with `AlreadyDestroyed` on a second call. An object
    /// that was never created is created first so that construction and
    /// destruction side effects stay paired.
    pub fn destroy(&self) -> BridgeResult<()> {
        let Some(cls) = self.cls.clone() else {
            return Ok(());
        };

        let handle = match self.attached_handle() {
            Some(handle) if !self.can_destroy.get() => {
                return Err(BridgeError::permission_denied(format!(
                    "object #{} of class {} cannot be destroyed explicitly",
                    handle.id(),
                    cls.name()
                )));
            }
            Some(handle) => handle,
            None if self.destroyed.get() => {
                return Err(BridgeError::already_destroyed(cls.name().as_str()));
            }
            None => {
                let handle = cls.create();
                *self.handle.borrow_mut() = Some(handle.clone());
                self.owned.set(true);
                handle
            }
        };

        let free = self.owned.get() || self.can_destroy.get();
        self.detach();

        let result = if free && !handle.is_destroyed() {
            cls.destroy(&handle).map_err(BridgeError::from)
        } else {
            Ok(())
        };

        self.destroyed.set(true);
        debug!(class = %cls.name(), object = handle.id(), freed = free, "destroyed object");

        drop(self.take_retention());
        result
    }

    /// React to the native object being destroyed by native code.
    pub fn on_native_destroyed(&self) {
        let interp = match self.interpreter() {
            Ok(interp) => interp,
            Err(_) => {
                warn!(
                    class = %self.class_name(),
                    "native object destroyed after interpreter shutdown; script object is leaked"
                );
                self.destroyed.set(true);
                self.listener.set(None);
                return;
            }
        };

        let retention = {
            let Ok(_guard) = interp.enter() else {
                return;
            };
            let was_owned = self.owned.get();
            self.destroyed.set(true);
            self.detach();
            debug!(class = %self.class_name(), "native object destroyed by native code");
            if was_owned {
                None
            } else {
                self.take_retention()
            }
        };
        drop(retention);
    }

    /// Finalization of the script instance.
    pub(crate) fn finalize(&self) {
        let was_owned = self.owned.get();
        let handle = self.attached_handle();
        self.detach();

        if let (true, Some(cls), Some(handle)) = (was_owned, &self.cls, handle) {
            if !handle.is_destroyed() {
                if let Err(err) = cls.destroy(&handle) {
                    warn!(class = %cls.name(), error = %err, "failed to destroy native object");
                }
            }
        }
        self.destroyed.set(true);
    }

    // ------------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------------

    /// Hand ownership to native code: the instance retains itself.
    pub fn capture(&self) {
        if self.owned.get() {
            self.owned.set(false);
            self.retain();
            debug!(class = %self.class_name(), "ownership captured by native code");
        }
    }

    /// Make native code keep the object.
    ///
    /// Managed objects go through the ownership ledger (which tells every
    /// listener, this object included); others are captured directly.
    pub fn keep(&self) -> BridgeResult<()> {
        let handle = self.handle()?;
        match handle.ledger() {
            Some(ledger) => ledger.keep(),
            None => self.capture(),
        }
        Ok(())
    }

    /// Hand ownership back to the script side.
    ///
    /// Marks the native claim on a managed object so that other claimants
    /// let go, then drops the retention. On an object that is owned by the
    /// script side already this does nothing, or fails if strict release
    /// checking is configured.
    pub fn release(&self) -> BridgeResult<()> {
        if self.owned.get() {
            let strict = self.interp.upgrade().is_some_and(|i| i.config().strict_release);
            if strict {
                return Err(BridgeError::invariant(format!(
                    "release() on object of class {} which is owned by script already",
                    self.class_name()
                )));
            }
            debug!(class = %self.class_name(), "release() on script-owned object ignored");
            return Ok(());
        }

        if let Some(handle) = self.attached_handle() {
            if let Some(ledger) = handle.ledger() {
                ledger.keep();
            }
        }
        self.hand_back();
        Ok(())
    }

    /// Switch to script ownership and drop the retention
    fn hand_back(&self) {
        self.owned.set(true);
        debug!(class = %self.class_name(), "ownership released to script");
        drop(self.take_retention());
    }

    fn retain(&self) {
        if self.retention.borrow().is_some() {
            return;
        }
        let me = self.owner.upgrade();
        *self.retention.borrow_mut() = me;
    }

    fn take_retention(&self) -> Option<ScriptRef> {
        self.retention.borrow_mut().take()
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Relay for a native event, installed on first use
    pub fn signal(&self, event: &str) -> BridgeResult<Rc<SignalRelay>> {
        let handle = self.handle()?;
        let method = handle.class().require_method(event)?;
        if !method.is_event() {
            return Err(NativeError::not_an_event(handle.class().name().clone(), event).into());
        }

        let existing = self.signals.borrow().get(&method.id()).cloned();
        if let Some(relay) = existing {
            return Ok(relay);
        }

        let interp = self.interpreter()?;
        let relay = Rc::new(SignalRelay::new(&interp, format!("{}.{}", self.class_name(), method.name())));
        self.signals.borrow_mut().insert(method.id(), Rc::clone(&relay));
        let handler: Rc<dyn EventHandler> = relay.clone();
        handle.add_handler(method.id(), handler);
        Ok(relay)
    }
}

impl fmt::Debug for BoundObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundObject")
            .field("class", &self.class_name())
            .field("handle", &self.handle.borrow())
            .field("owned", &self.owned.get())
            .field("const_ref", &self.const_ref.get())
            .field("destroyed", &self.destroyed.get())
            .field("can_destroy", &self.can_destroy.get())
            .field("retained", &self.is_retained())
            .finish()
    }
}

// ============================================================================
// LifecycleListener
// ============================================================================

/// Ledger subscriber forwarding status events to a bound object.
pub struct LifecycleListener {
    target: Weak<ScriptObject>,
}

impl StatusListener for LifecycleListener {
    fn status_changed(&self, event: StatusEvent) {
        let Some(target) = self.target.upgrade() else {
            return;
        };
        let binding = target.binding();
        if event != StatusEvent::Destroyed && (binding.is_destroyed() || !binding.is_attached()) {
            return;
        }
        match event {
            StatusEvent::Destroyed => binding.on_native_destroyed(),
            StatusEvent::Keep => binding.capture(),
            StatusEvent::Release => {
                if !binding.is_owned() {
                    binding.hand_back();
                }
            }
        }
    }
}
