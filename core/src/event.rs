//! Change events.
//!
//! Events are queued while a store transaction is open and fired, in
//! FIFO order, only after the transaction committed; a rollback drops
//! them.  The callback runs with the store lock released, so it may
//! re-enter the store.

use std::sync::Mutex;

/// An event handed to the application callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Messages changed in some way; redisplay the chat.
    MsgsChanged { chat_id: u32, msg_id: u32 },
    /// A fresh incoming message arrived.
    IncomingMsg { chat_id: u32, msg_id: u32 },
    /// A read receipt for an own message arrived.
    MsgRead { chat_id: u32, msg_id: u32 },
    /// Group name or membership changed.
    ChatModified { chat_id: u32 },
    /// The frontend should keep the process alive (`on == true`) or may
    /// let it sleep again.
    WakeLock { on: bool },
}

pub type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

pub(crate) struct Events {
    callback: EventCallback,
    queue: Mutex<Vec<Event>>,
}

impl Events {
    pub fn new(callback: EventCallback) -> Self {
        Events {
            callback,
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Queues an event for delivery after the transaction commits.
    pub fn queue(&self, event: Event) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(event);
        }
    }

    /// Fires all queued events in FIFO order.  Must be called without
    /// the store lock held.
    pub fn flush(&self) {
        let queued = match self.queue.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(_) => return,
        };
        for event in &queued {
            (self.callback)(event);
        }
    }

    /// Drops all queued events, after a rollback.
    pub fn clear(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    /// Fires an event immediately, bypassing the queue.  Used for wake
    /// locks which are not tied to a transaction.
    pub fn emit(&self, event: Event) {
        (self.callback)(&event);
    }
}
