//! Bounded slab of live connections, keyed by event-loop token.

use slab::Slab;

/// Slab-backed registry with a hard capacity.
///
/// Keys double as mio tokens, so they stay valid until `remove`.
#[derive(Debug)]
pub struct Registry<T> {
    entries: Slab<T>,
    max_entries: usize,
}

impl<T> Registry<T> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Slab::with_capacity(max_entries),
            max_entries,
        }
    }

    /// Insert an entry, handing it back if the registry is full.
    pub fn insert(&mut self, entry: T) -> Result<usize, T> {
        if self.entries.len() >= self.max_entries {
            return Err(entry);
        }
        Ok(self.entries.insert(entry))
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut T> {
        self.entries.get_mut(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<T> {
        self.entries.try_remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }
}
