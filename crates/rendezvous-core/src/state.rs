//! Observable state shared between a background task and its handle.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A value guarded by a mutex, with a condvar signalled on every change.
#[derive(Debug)]
pub(crate) struct StateCell<T>
{
    value: Mutex<T>,
    changed: Condvar,
}

impl<T: Clone> StateCell<T>
{
    pub(crate) fn new(value: T) -> Self
    {
        Self {
            value: Mutex::new(value),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, T>
    {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self) -> T
    {
        self.lock().clone()
    }

    pub(crate) fn set(&self, value: T)
    {
        *self.lock() = value;
        self.changed.notify_all();
    }

    /// Replace the value only if `pred` holds for the current one.
    pub(crate) fn set_if(&self, pred: impl FnOnce(&T) -> bool, value: T) -> bool
    {
        let mut guard = self.lock();
        if !pred(&guard) {
            return false;
        }
        *guard = value;
        drop(guard);
        self.changed.notify_all();
        true
    }

    /// Block until `pred` holds or `timeout` elapses. Returns the last value
    /// seen and whether `pred` held for it.
    pub(crate) fn wait_until(&self, timeout: Duration, mut pred: impl FnMut(&T) -> bool) -> (T, bool)
    {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if pred(&guard) {
                return (guard.clone(), true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return (guard.clone(), false);
            }
            guard = self
                .changed
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests
{
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_wait_sees_update_from_other_thread()
    {
        let cell = Arc::new(StateCell::new(0_u32));
        let writer = Arc::clone(&cell);
        let t = thread::spawn(move || writer.set(7));

        let (value, reached) = cell.wait_until(Duration::from_secs(5), |v| *v == 7);
        t.join().unwrap();
        assert!(reached);
        assert_eq!(value, 7);
    }

    #[test]
    fn test_wait_times_out()
    {
        let cell = StateCell::new(false);
        let (value, reached) = cell.wait_until(Duration::from_millis(10), |v| *v);
        assert!(!reached);
        assert!(!value);
    }

    #[test]
    fn test_set_if_is_conditional()
    {
        let cell = StateCell::new(1);
        assert!(!cell.set_if(|v| *v == 2, 3));
        assert!(cell.set_if(|v| *v == 1, 3));
        assert_eq!(cell.get(), 3);
    }
}
