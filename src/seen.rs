use std::collections::{HashSet, VecDeque};

/// Bounded membership cache of recently processed thing ids.
///
/// Eviction is by insertion order: once the capacity is reached, adding a
/// new id drops the oldest one. Re-adding a present id is a no-op and does
/// not refresh its position. The set is only a fast-path filter; the
/// has-replied check is what actually prevents duplicate replies after a
/// restart, when this starts out empty.
#[derive(Debug)]
pub struct RecencySet {
    members: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl RecencySet {
    pub fn new(capacity: usize) -> Self {
        Self {
            members: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn add(&mut self, id: &str) {
        if self.capacity == 0 || self.members.contains(id) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.order.len()
    }
}
