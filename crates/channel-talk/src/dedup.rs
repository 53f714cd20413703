//! In-memory window of recently delivered message ids.
//!
//! The provider redelivers a webhook when acknowledgment is slow or fails;
//! the window keeps those redeliveries from reaching the host twice.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

pub struct RecentIds {
    capacity: usize,
    inner: Mutex<Window>,
}

#[derive(Default)]
struct Window {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Window::default()),
        }
    }

    /// Record `id`; returns `false` if it was already in the window.
    ///
    /// Empty ids cannot be deduplicated and always count as new.
    pub fn insert(&self, id: &str) -> bool {
        if id.is_empty() {
            return true;
        }
        let mut window = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if window.seen.contains(id) {
            return false;
        }
        if window.order.len() >= self.capacity {
            if let Some(oldest) = window.order.pop_front() {
                window.seen.remove(&oldest);
            }
        }
        window.order.push_back(id.to_string());
        window.seen.insert(id.to_string());
        true
    }

    /// Forget `id`, so a redelivery of a message we could not queue is accepted.
    pub fn remove(&self, id: &str) {
        let mut window = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if window.seen.remove(id) {
            window.order.retain(|seen| seen != id);
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.order.len(),
            Err(poisoned) => poisoned.into_inner().order.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecentIds {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_ids_are_reported() {
        let ids = RecentIds::default();
        assert!(ids.insert("m-1"));
        assert!(!ids.insert("m-1"));
        assert!(ids.insert("m-2"));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn oldest_ids_are_evicted_at_capacity() {
        let ids = RecentIds::new(2);
        assert!(ids.insert("a"));
        assert!(ids.insert("b"));
        assert!(ids.insert("c"));
        assert_eq!(ids.len(), 2);
        assert!(ids.insert("a"));
        assert!(!ids.insert("c"));
    }

    #[test]
    fn removed_ids_are_accepted_again() {
        let ids = RecentIds::default();
        assert!(ids.insert("m-1"));
        ids.remove("m-1");
        assert!(ids.is_empty());
        assert!(ids.insert("m-1"));
    }

    #[test]
    fn empty_ids_are_never_deduplicated() {
        let ids = RecentIds::default();
        assert!(ids.insert(""));
        assert!(ids.insert(""));
        assert!(ids.is_empty());
    }
}
