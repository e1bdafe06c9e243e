use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

/// Small least-recently-used cache of decoded blocks shared between worker
/// threads. Loading happens outside the lock, so two threads may decode the
/// same block concurrently; the later insert wins.
pub struct BlockCache<T> {
    capacity: usize,
    entries: Mutex<VecDeque<(usize, Arc<T>)>>,
}

impl<T> BlockCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn lookup(&self, key: usize) -> Option<Arc<T>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let pos = entries.iter().position(|(k, _)| *k == key)?;
        let entry = entries.remove(pos)?;
        let value = entry.1.clone();
        entries.push_front(entry);
        Some(value)
    }

    pub fn get_or_load<E>(&self, key: usize, load: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
        if let Some(value) = self.lookup(key) {
            return Ok(value);
        }

        let value = Arc::new(load()?);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(k, _)| *k != key);
        entries.push_front((key, value.clone()));
        entries.truncate(self.capacity);
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
