use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registry of one-way callbacks for an event type. Clones share the same
/// registry, so a producer on another thread sees every subscriber.
pub struct Subscribers<T> {
    callbacks: Arc<Mutex<Vec<Callback<T>>>>,
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Call every subscriber. The lock is released first so a callback may
    /// subscribe further listeners.
    pub fn emit(&self, event: &T) {
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            callbacks: Arc::clone(&self.callbacks),
        }
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_all_clones() {
        let subscribers: Subscribers<u32> = Subscribers::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        subscribers.subscribe(move |n| {
            counter.fetch_add(*n as usize, Ordering::SeqCst);
        });
        let shared = subscribers.clone();
        let counter = seen.clone();
        shared.subscribe(move |n| {
            counter.fetch_add(*n as usize, Ordering::SeqCst);
        });

        subscribers.emit(&5);
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert_eq!(shared.len(), 2);
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let subscribers: Subscribers<()> = Subscribers::new();
        let inner = subscribers.clone();
        subscribers.subscribe(move |_| inner.subscribe(|_| {}));

        subscribers.emit(&());
        assert_eq!(subscribers.len(), 2);
    }
}
