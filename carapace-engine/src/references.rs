//! Object reference tables for shared and repeated identities.
//!
//! One table is created per `serialize` or `deserialize` call and dropped at
//! its end. The encode side keys identities by `Arc` pointer; the decode side
//! keys objects by the handle written in the data section.

use carapace_model::Value;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What the encode table knows about an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// Never seen in this call.
    New,
    /// Seen, and its value is still being written (a cycle).
    InProgress(u32),
    /// Seen and fully written.
    Complete(u32),
}

/// Encode-side table: pointer identity to handle.
#[derive(Default)]
pub struct EncodeReferences {
    next_handle: u32,
    seen: HashMap<usize, u32>,
    in_progress: HashSet<usize>,
    // Keeps every tracked allocation alive so an address cannot be reused
    // by a different object within the same call.
    retained: Vec<Arc<dyn Any + Send + Sync>>,
}

impl EncodeReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_of<T: Send + Sync + 'static>(value: &Arc<T>) -> usize {
        Arc::as_ptr(value) as *const () as usize
    }

    pub fn lookup(&self, key: usize) -> Identity {
        match self.seen.get(&key) {
            None => Identity::New,
            Some(&handle) if self.in_progress.contains(&key) => Identity::InProgress(handle),
            Some(&handle) => Identity::Complete(handle),
        }
    }

    /// Assigns the next handle to a first-seen identity and marks it in
    /// progress.
    pub fn begin<T: Send + Sync + 'static>(&mut self, value: &Arc<T>) -> u32 {
        let key = Self::identity_of(value);
        let handle = self.next_handle;
        self.next_handle += 1;
        self.seen.insert(key, handle);
        self.in_progress.insert(key);
        self.retained.push(value.clone());
        handle
    }

    pub fn complete(&mut self, key: usize) {
        self.in_progress.remove(&key);
    }

    /// Drops a failed identity so the table stays consistent.
    pub fn abandon(&mut self, key: usize) {
        self.in_progress.remove(&key);
        self.seen.remove(&key);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// State of one decode-side handle.
pub enum Slot {
    /// Defined in the data section, not yet materialized.
    Pending(Arc<Value>),
    /// Being materialized; a backreference now would need a cycle.
    InProgress,
    Built(Arc<dyn Any + Send + Sync>),
}

/// Decode-side table: handle to object.
#[derive(Default)]
pub struct DecodeReferences {
    slots: HashMap<u32, Slot>,
}

impl DecodeReferences {
    /// Records every shared definition in `root`, so a backreference can be
    /// materialized even when the definition sits in a field the reader
    /// drops.
    pub fn index(root: &Value) -> Self {
        let mut slots = HashMap::new();
        let mut stack: Vec<&Value> = vec![root];
        while let Some(value) = stack.pop() {
            match value {
                Value::Shared { handle, value } => {
                    slots.insert(*handle, Slot::Pending(value.clone()));
                    stack.push(value);
                }
                Value::List(items) => stack.extend(items.iter()),
                Value::Map(entries) => {
                    for (k, v) in entries {
                        stack.push(k);
                        stack.push(v);
                    }
                }
                Value::Record(record) => stack.extend(record.fields.iter()),
                _ => {}
            }
        }
        Self { slots }
    }

    /// Takes a pending value for materialization, leaving the slot in
    /// progress.
    pub fn take(&mut self, handle: u32) -> Option<Slot> {
        let slot = self.slots.get_mut(&handle)?;
        if let Slot::Built(object) = &*slot {
            return Some(Slot::Built(object.clone()));
        }
        Some(std::mem::replace(slot, Slot::InProgress))
    }

    pub fn complete(&mut self, handle: u32, object: Arc<dyn Any + Send + Sync>) {
        self.slots.insert(handle, Slot::Built(object));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
