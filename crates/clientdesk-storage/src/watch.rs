use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct WatcherTable<T: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// Listeners that receive the full state of a collection on every change.
pub(crate) struct Watchers<T: ?Sized + 'static> {
    table: Arc<Mutex<WatcherTable<T>>>,
}

impl<T: ?Sized + 'static> Clone for Watchers<T> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<T: ?Sized + 'static> Default for Watchers<T> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(WatcherTable {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<T: ?Sized + 'static> Watchers<T> {
    pub(crate) fn add(&self, listener: Listener<T>) -> Subscription {
        let id = {
            let mut table = lock(&self.table);
            table.next_id += 1;
            let id = table.next_id;
            table.entries.push((id, listener));
            id
        };
        let table = Arc::downgrade(&self.table);
        Subscription::new(move || {
            if let Some(table) = table.upgrade() {
                lock(&table).entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.table).entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every listener outside the table lock, so a listener may
    /// subscribe, unsubscribe or read the store again.
    pub(crate) fn notify(&self, value: &T) {
        let listeners: Vec<Listener<T>> = lock(&self.table)
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(value);
        }
    }
}

fn lock<X>(mutex: &Mutex<X>) -> MutexGuard<'_, X> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle of a live subscription. Dropping it stops delivery.
#[must_use = "dropping a Subscription ends it immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
