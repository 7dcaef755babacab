//! Bounded memory of recently seen envelope ids.

use std::collections::{HashSet, VecDeque};

/// Remembers the last `window` ids. Oldest ids are evicted first.
#[derive(Debug)]
pub struct RecentIds {
    window: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            order: VecDeque::with_capacity(window),
            seen: HashSet::with_capacity(window),
        }
    }

    /// Record `id`. Returns `false` if it was already in the window.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() >= self.window {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_is_rejected() {
        let mut ids = RecentIds::new(4);
        assert!(ids.insert("a"));
        assert!(!ids.insert("a"));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn oldest_is_evicted() {
        let mut ids = RecentIds::new(2);
        assert!(ids.insert("a"));
        assert!(ids.insert("b"));
        assert!(ids.insert("c"));
        assert_eq!(ids.len(), 2);
        // "a" fell out of the window and is accepted again.
        assert!(ids.insert("a"));
        assert!(!ids.insert("c"));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut ids = RecentIds::new(8);
        ids.insert("a");
        ids.clear();
        assert!(ids.is_empty());
        assert!(ids.insert("a"));
    }
}
