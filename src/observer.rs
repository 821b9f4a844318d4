//! Observer registration shared by the sequence machine and the event log.
//!
//! Observers declare up front how they want to be called ([`Delivery`]);
//! the notifier never probes what an observer returns. Inline observers run
//! synchronously in emission order. Scheduled observers are handed a clone
//! of the value on a spawned task and must not rely on ordering.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use thiserror::Error;

/// How an observer wants to be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Called synchronously, in emission order, on the emitting task.
    #[default]
    Inline,
    /// Called on a freshly spawned Tokio task.
    Scheduled,
}

/// Failure reported by an observer callback.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

impl ObserverError {
    /// Creates an observer error from any displayable message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A registered callback for values of type `T`.
pub trait Observer<T>: Send + Sync {
    /// Declared delivery capability. Defaults to [`Delivery::Inline`].
    fn delivery(&self) -> Delivery {
        Delivery::Inline
    }

    /// Handles one value. Must not block.
    ///
    /// # Errors
    ///
    /// Returns an [`ObserverError`] when the observer could not process the
    /// value; the notifier reports it and carries on.
    fn notify(&self, value: &T) -> Result<(), ObserverError>;
}

/// Adapts a closure into an [`Observer`].
pub struct FnObserver<F> {
    f: F,
    delivery: Delivery,
}

impl<F> FnObserver<F> {
    /// Wraps `f` as an inline observer.
    pub fn new<T>(f: F) -> Self
    where
        F: Fn(&T) -> Result<(), ObserverError> + Send + Sync,
    {
        Self {
            f,
            delivery: Delivery::Inline,
        }
    }

    /// Wraps `f` as a scheduled observer.
    pub fn scheduled<T>(f: F) -> Self
    where
        F: Fn(&T) -> Result<(), ObserverError> + Send + Sync,
    {
        Self {
            f,
            delivery: Delivery::Scheduled,
        }
    }
}

impl<T, F> Observer<T> for FnObserver<F>
where
    F: Fn(&T) -> Result<(), ObserverError> + Send + Sync,
{
    fn delivery(&self) -> Delivery {
        self.delivery
    }

    fn notify(&self, value: &T) -> Result<(), ObserverError> {
        (self.f)(value)
    }
}

/// A failed notification, returned to the caller for reporting.
#[derive(Debug, Clone)]
pub struct ObserverFailure {
    /// Registration index of the failing observer.
    pub index: usize,
    /// What went wrong (error message or panic payload).
    pub message: String,
}

/// Thread-safe list of observers for values of type `T`.
pub struct ObserverSet<T> {
    observers: RwLock<Vec<Arc<dyn Observer<T>>>>,
}

impl<T> Default for ObserverSet<T> {
    fn default() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }
}

impl<T> std::fmt::Debug for ObserverSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> ObserverSet<T> {
    /// Returns the number of registered observers.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.read().expect("observer lock poisoned").len()
    }

    /// Returns `true` if no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> ObserverSet<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Registers an observer.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn register(&self, observer: Arc<dyn Observer<T>>) {
        self.observers
            .write()
            .expect("observer lock poisoned")
            .push(observer);
    }

    /// Delivers `value` to every observer.
    ///
    /// Errors and panics from individual observers are caught and returned;
    /// they never prevent delivery to the remaining observers. Scheduled
    /// observers are spawned only when a Tokio runtime is available and
    /// otherwise called inline.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn notify_all(&self, value: &T) -> Vec<ObserverFailure> {
        // Snapshot so observers may register others without deadlocking.
        let observers: Vec<Arc<dyn Observer<T>>> = self
            .observers
            .read()
            .expect("observer lock poisoned")
            .clone();

        let mut failures = Vec::new();
        for (index, observer) in observers.into_iter().enumerate() {
            if observer.delivery() == Delivery::Scheduled {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let value = value.clone();
                    handle.spawn(async move {
                        if let Err(message) = invoke(observer.as_ref(), &value) {
                            tracing::warn!(index, error = %message, "scheduled observer failed");
                        }
                    });
                    continue;
                }
            }
            if let Err(message) = invoke(observer.as_ref(), value) {
                failures.push(ObserverFailure { index, message });
            }
        }
        failures
    }
}

fn invoke<T>(observer: &dyn Observer<T>, value: &T) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(|| observer.notify(value))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(|| "observer panicked".to_string(), |m| format!("observer panicked: {m}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn inline_observers_see_values_in_order() {
        let set = ObserverSet::<u32>::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        set.register(Arc::new(FnObserver::new(move |v: &u32| {
            sink.lock().unwrap().push(*v);
            Ok(())
        })));

        for v in 0..5 {
            assert!(set.notify_all(&v).is_empty());
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn failing_observer_does_not_block_others() {
        let set = ObserverSet::<u32>::default();
        let count = Arc::new(AtomicUsize::new(0));

        set.register(Arc::new(FnObserver::new(|_: &u32| {
            Err(ObserverError::new("boom"))
        })));
        let c = Arc::clone(&count);
        set.register(Arc::new(FnObserver::new(move |_: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));

        let failures = set.notify_all(&1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 0);
        assert_eq!(failures[0].message, "boom");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_observer_is_contained() {
        let set = ObserverSet::<u32>::default();
        let count = Arc::new(AtomicUsize::new(0));

        set.register(Arc::new(FnObserver::new(|_: &u32| -> Result<(), ObserverError> {
            panic!("observer exploded")
        })));
        let c = Arc::clone(&count);
        set.register(Arc::new(FnObserver::new(move |_: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));

        let failures = set.notify_all(&7);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("observer exploded"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scheduled_observer_runs_on_spawned_task() {
        let set = ObserverSet::<u32>::default();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        set.register(Arc::new(FnObserver::scheduled(move |v: &u32| {
            tx.send(*v).map_err(|e| ObserverError::new(e.to_string()))
        })));

        assert!(set.notify_all(&42).is_empty());
        let got = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(42));
    }

    #[test]
    fn scheduled_observer_falls_back_to_inline_without_runtime() {
        let set = ObserverSet::<u32>::default();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        set.register(Arc::new(FnObserver::scheduled(move |_: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));

        set.notify_all(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
