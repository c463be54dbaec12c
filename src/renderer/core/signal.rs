//! Signal / Connection
//!
//! A minimal publish/subscribe primitive. The emitting object owns a
//! [`Signal`] and therefore its subscriber list; subscribers receive a
//! [`Connection`] token that can unsubscribe later but never keeps the signal
//! alive.
//!
//! Engine objects subscribe with a callback that forwards the payload into a
//! `flume` channel they drain on their next bind, so an emitter never needs
//! access to its dependents.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use slotmap::{SlotMap, new_key_type};

new_key_type! {
    struct SlotKey;
}

type Slot<A> = Box<dyn FnMut(&A)>;

/// Subscriber list for events carrying an `A`.
pub struct Signal<A> {
    slots: Rc<RefCell<SlotMap<SlotKey, Slot<A>>>>,
}

impl<A: 'static> Signal<A> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Rc::new(RefCell::new(SlotMap::with_key())),
        }
    }

    /// Registers `slot`, returning the token that removes it.
    pub fn connect(&self, slot: impl FnMut(&A) + 'static) -> Connection {
        let key = self.slots.borrow_mut().insert(Box::new(slot));
        let weak: Weak<RefCell<SlotMap<SlotKey, Slot<A>>>> = Rc::downgrade(&self.slots);
        Connection {
            detach: Some(Box::new(move || {
                if let Some(slots) = weak.upgrade() {
                    slots.borrow_mut().remove(key);
                }
            })),
        }
    }

    /// Invokes every connected slot with `args`.
    pub fn emit(&self, args: &A) {
        for slot in self.slots.borrow_mut().values_mut() {
            slot(args);
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.slots.borrow().len()
    }
}

impl<A: 'static> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.slots.borrow().len())
            .finish()
    }
}

/// Capability to unsubscribe one slot.
///
/// Dropping a `Connection` does not disconnect it.
#[must_use = "a dropped Connection can no longer be disconnected"]
pub struct Connection {
    detach: Option<Box<dyn FnOnce()>>,
}

impl Connection {
    /// Removes the slot. Further calls, or calls after the signal is gone, do
    /// nothing.
    pub fn disconnect(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.detach.is_some()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish()
    }
}
