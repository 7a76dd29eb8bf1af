//! Provides utilities for managing callbacks.

use std::collections::HashMap;

/// Utility for managing callbacks conveniently.
pub struct Callbacks<T: Send + ?Sized> {
    callbacks: HashMap<u32, Box<T>>,
    last_id: u32,
}

impl<T: Send + ?Sized> Callbacks<T> {
    /// Creates new Callbacks.
    pub fn new() -> Self {
        Self { callbacks: HashMap::new(), last_id: 0 }
    }

    /// Stores a new callback.
    ///
    /// Returns the id of the callback.
    pub fn add_callback(&mut self, callback: Box<T>) -> u32 {
        self.last_id = self.last_id.wrapping_add(1);
        let id = self.last_id;
        self.callbacks.insert(id, callback);
        id
    }

    /// Removes the callback given the id.
    ///
    /// Returns true if callback is removed, false if there is no such id.
    pub fn remove_callback(&mut self, id: u32) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    /// Returns the callback object based on the given id.
    pub fn get_by_id(&mut self, id: u32) -> Option<&mut Box<T>> {
        self.callbacks.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Applies the given function on all active callbacks, in registration order.
    pub fn for_all_callbacks<F: Fn(&Box<T>)>(&self, f: F) {
        let mut ids = self.callbacks.keys().cloned().collect::<Vec<u32>>();
        ids.sort();
        for id in ids {
            if let Some(callback) = self.callbacks.get(&id) {
                f(callback);
            }
        }
    }
}
