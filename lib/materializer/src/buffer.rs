use crate::settings::MaterializerSettings;
use std::collections::VecDeque;

/// Bounded element buffer used by stages.
///
/// Capacities up to `max_fixed_buffer_size` get their storage allocated up front; larger ones start
/// with room for `initial_input_buffer_size` elements and grow on demand. Both flavours reject
/// elements once `capacity` is reached.
#[derive(Debug)]
pub struct StreamBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    fixed: bool,
}

impl<T> StreamBuffer<T> {
    pub fn for_capacity(capacity: usize, settings: &MaterializerSettings) -> Self {
        let fixed = capacity <= settings.max_fixed_buffer_size();
        let items = if fixed {
            VecDeque::with_capacity(capacity)
        } else {
            VecDeque::with_capacity(settings.initial_input_buffer_size().min(capacity))
        };
        Self {
            items,
            capacity,
            fixed,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Hands the element back if the buffer is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Empties the buffer, keeping its storage for reuse.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }
}
