//! Ownership Ledger of Managed Objects
//!
//! Every instance of a managed class carries a ledger. It records whether
//! native code has claimed the object ("kept" it) and broadcasts status
//! changes to subscribed listeners:
//!
//! - `Destroyed`: the object is going away
//! - `Keep`: native code took ownership; every other claimant must let go
//! - `Release`: native code gave up ownership
//!
//! Listeners are invoked from a snapshot of the subscriber list, so a
//! listener may subscribe or unsubscribe (itself or others) while being
//! notified. A listener removed during a notification round is not called
//! afterwards in that round.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Status change of a managed object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Destroyed,
    Keep,
    Release,
}

/// Subscriber of ledger status events
pub trait StatusListener {
    fn status_changed(&self, event: StatusEvent);
}

/// Subscription token returned by `ObjectLedger::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Per-object ownership ledger.
pub struct ObjectLedger {
    kept: Cell<bool>,
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn StatusListener>)>>,
}

impl ObjectLedger {
    pub fn new() -> Self {
        Self {
            kept: Cell::new(false),
            next_id: Cell::new(0),
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// Check if native code claimed the object, possibly before any
    /// listener was around to hear about it
    pub fn already_kept(&self) -> bool {
        self.kept.get()
    }

    /// Claim the object for native code
    pub fn keep(&self) {
        self.kept.set(true);
        self.notify(StatusEvent::Keep);
    }

    /// Give the object back
    pub fn release(&self) {
        self.kept.set(false);
        self.notify(StatusEvent::Release);
    }

    pub fn subscribe(&self, listener: Rc<dyn StatusListener>) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    /// Remove a subscription. Returns false if it was not present.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let removed = {
            let mut listeners = self.listeners.borrow_mut();
            listeners
                .iter()
                .position(|(lid, _)| *lid == id)
                .map(|pos| listeners.remove(pos))
        };
        removed.is_some()
    }

    pub fn is_subscribed(&self, id: ListenerId) -> bool {
        self.listeners.borrow().iter().any(|(lid, _)| *lid == id)
    }

    /// Drop every subscription
    pub(crate) fn clear_listeners(&self) {
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        drop(listeners);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Deliver an event to every subscribed listener
    pub fn notify(&self, event: StatusEvent) {
        let snapshot: Vec<_> = self.listeners.borrow().clone();
        for (id, listener) in snapshot {
            if self.is_subscribed(id) {
                listener.status_changed(event);
            }
        }
    }
}

impl Default for ObjectLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLedger")
            .field("kept", &self.kept.get())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
