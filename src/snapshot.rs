use std::sync::{Arc, RwLock};

/// Holds the current immutable snapshot of some shared state.
///
/// Readers take an `Arc` and keep using that version for the whole scoring
/// pass; `store` swaps in a complete replacement, so nobody ever sees a
/// half-updated value.
#[derive(Debug)]
pub struct SnapshotCell<T> {
    current: RwLock<Arc<T>>,
}

impl<T> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        // The lock only guards an Arc swap, so a poisoned guard still holds a
        // complete snapshot.
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Installs `value` and returns the snapshot it replaced.
    pub fn store(&self, value: T) -> Arc<T> {
        let next = Arc::new(value);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, next)
    }
}
