use crate::core::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-process mutexes keyed by entity name.
///
/// Only writers take these. Readers never block on them. Entries stay in the
/// map until [`EntityLocks::release_idle`] drops the ones nobody holds.
#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutex guarding `entity`, creating it on first use.
    pub fn lock_for(&self, entity: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock()?;
        let lock = locks
            .entry(entity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Ok(Arc::clone(lock))
    }

    /// Returns the mutexes for two entities in a stable order, so concurrent
    /// renames in opposite directions cannot deadlock.
    pub fn pair_for(&self, a: &str, b: &str) -> Result<(Arc<Mutex<()>>, Option<Arc<Mutex<()>>>)> {
        if a == b {
            return Ok((self.lock_for(a)?, None));
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        Ok((self.lock_for(first)?, Some(self.lock_for(second)?)))
    }

    /// Drops mutexes no caller currently holds a handle to. Returns how many
    /// were dropped.
    pub fn release_idle(&self) -> Result<usize> {
        let mut locks = self.locks.lock()?;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(before - locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
