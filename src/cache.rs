use std::collections::{HashMap, VecDeque};

/// Bounded least-recently-used cache of GitHub API responses, keyed by URL.
pub struct ResponseCache<V> {
    entries: HashMap<String, V>,
    /// Keys from least to most recently used
    order: VecDeque<String>,
    capacity: usize,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&mut self, url: &str) -> Option<V> {
        let value = self.entries.get(url).cloned()?;
        self.touch(url);
        Some(value)
    }

    pub fn insert(&mut self, url: String, value: V) {
        if self.entries.insert(url.clone(), value).is_some() {
            self.touch(&url);
            return;
        }

        self.order.push_back(url);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    pub fn remove(&mut self, url: &str) {
        if self.entries.remove(url).is_some() {
            self.order.retain(|k| k != url);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, url: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == url) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }
}
