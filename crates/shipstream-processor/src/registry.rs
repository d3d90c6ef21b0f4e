//! Indexed listener registry with removal handles.

use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

pub(crate) trait Unregister: Send + Sync {
    fn unregister(&self, id: u64) -> bool;
}

struct Entries<T> {
    next_id: u64,
    items: IndexMap<u64, T>,
}

/// Listeners in registration order. Dispatch works on a snapshot, so a
/// listener removed mid-block still sees the rest of that block.
pub(crate) struct Registry<T> {
    entries: Mutex<Entries<T>>,
}

impl<T: Clone + Send + 'static> Registry<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Entries {
                next_id: 0,
                items: IndexMap::new(),
            }),
        })
    }

    pub fn insert(self: &Arc<Self>, item: T) -> ListenerHandle {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let id = entries.next_id;
        entries.next_id += 1;
        entries.items.insert(id, item);

        let registry: Weak<dyn Unregister> = Arc::downgrade(self) as Weak<dyn Unregister>;
        ListenerHandle { id, registry }
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }
}

impl<T: Send> Unregister for Registry<T> {
    fn unregister(&self, id: u64) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .shift_remove(&id)
            .is_some()
    }
}

/// Returned by every `add_*` call. Dropping the handle keeps the listener
/// registered; call [`remove`](ListenerHandle::remove) to unregister.
pub struct ListenerHandle {
    id: u64,
    registry: Weak<dyn Unregister>,
}

impl ListenerHandle {
    /// Unregister the listener. Returns `false` if it was already removed or
    /// the processor is gone.
    pub fn remove(&self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.unregister(self.id))
            .unwrap_or(false)
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
