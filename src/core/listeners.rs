//! Ordered listener lists with deferred mutation
//!
//! Endpoints keep one [`ListenerList`] per callback kind. Listeners are
//! invoked in registration order. Registering or removing through the list
//! itself takes effect at once; a listener that wants to change the list
//! while it is being dispatched uses a [`ListenerControl`] instead, whose
//! operations are applied at the start of the next dispatch.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque handle identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

enum PendingOp<L: ?Sized> {
    Add(ListenerToken, Box<L>),
    Remove(ListenerToken),
}

struct Pending<L: ?Sized> {
    next_token: u64,
    ops: Vec<PendingOp<L>>,
}

impl<L: ?Sized> Pending<L> {
    fn token(&mut self) -> ListenerToken {
        let token = ListenerToken(self.next_token);
        self.next_token += 1;
        token
    }
}

/// Cloneable handle for queuing list changes from inside a callback
pub struct ListenerControl<L: ?Sized> {
    pending: Arc<Mutex<Pending<L>>>,
}

impl<L: ?Sized> Clone for ListenerControl<L> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<L: ?Sized> ListenerControl<L> {
    /// Queue a registration; the token is valid immediately
    pub fn register(&self, listener: Box<L>) -> ListenerToken {
        let mut pending = self.pending.lock();
        let token = pending.token();
        pending.ops.push(PendingOp::Add(token, listener));
        token
    }

    /// Queue a removal
    pub fn unregister(&self, token: ListenerToken) {
        self.pending.lock().ops.push(PendingOp::Remove(token));
    }
}

/// Registration-ordered listeners with O(1) amortized removal
pub struct ListenerList<L: ?Sized> {
    entries: Vec<Option<(ListenerToken, Box<L>)>>,
    index: HashMap<ListenerToken, usize>,
    vacant: usize,
    control: ListenerControl<L>,
}

impl<L: ?Sized> ListenerList<L> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            vacant: 0,
            control: ListenerControl {
                pending: Arc::new(Mutex::new(Pending {
                    next_token: 0,
                    ops: Vec::new(),
                })),
            },
        }
    }

    /// Add a listener at the end of the dispatch order
    pub fn register(&mut self, listener: Box<L>) -> ListenerToken {
        let token = self.control.pending.lock().token();
        self.insert(token, listener);
        token
    }

    /// Remove a listener; false if the token is unknown
    pub fn unregister(&mut self, token: ListenerToken) -> bool {
        let Some(slot) = self.index.remove(&token) else {
            return false;
        };
        self.entries[slot] = None;
        self.vacant += 1;
        if self.vacant * 2 > self.entries.len() {
            self.compact();
        }
        true
    }

    /// Handle for deferred changes
    pub fn control(&self) -> ListenerControl<L> {
        self.control.clone()
    }

    /// Live listeners, not counting queued registrations
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Apply queued changes, then call `f` on every listener in order
    pub fn dispatch(&mut self, mut f: impl FnMut(&mut L)) {
        self.apply_pending();
        for (_, listener) in self.entries.iter_mut().flatten() {
            f(&mut **listener);
        }
    }

    /// Apply changes queued through [`ListenerControl`]
    pub fn apply_pending(&mut self) {
        let ops = std::mem::take(&mut self.control.pending.lock().ops);
        for op in ops {
            match op {
                PendingOp::Add(token, listener) => self.insert(token, listener),
                PendingOp::Remove(token) => {
                    self.unregister(token);
                }
            }
        }
    }

    fn insert(&mut self, token: ListenerToken, listener: Box<L>) {
        self.index.insert(token, self.entries.len());
        self.entries.push(Some((token, listener)));
    }

    fn compact(&mut self) {
        self.entries.retain(Option::is_some);
        self.vacant = 0;
        self.index.clear();
        for (slot, entry) in self.entries.iter().enumerate() {
            if let Some((token, _)) = entry {
                self.index.insert(*token, slot);
            }
        }
    }
}

impl<L: ?Sized> Default for ListenerList<L> {
    fn default() -> Self {
        Self::new()
    }
}
