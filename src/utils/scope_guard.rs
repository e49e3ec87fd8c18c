use std::future::Future;

use tokio::task::JoinHandle;

/// Runs the closure when dropped
pub struct ScopeGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Owns a spawned task and aborts it when dropped
pub struct TaskGuard {
    handle: Option<JoinHandle<()>>,
    _abort: ScopeGuard<Box<dyn FnOnce() + Send + Sync>>,
}

impl TaskGuard {
    pub fn spawn<T>(task: T) -> Self
    where
        T: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let abort = handle.abort_handle();
        Self {
            handle: Some(handle),
            _abort: ScopeGuard::new(Box::new(move || abort.abort())),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_guard_runs_on_drop() {
        let fired = Arc::new(AtomicBool::new(false));
        {
            let fired = fired.clone();
            let _guard = ScopeGuard::new(move || fired.store(true, Ordering::SeqCst));
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_task_guard_aborts_on_drop() {
        let finished = Arc::new(AtomicBool::new(false));
        let guard = {
            let finished = finished.clone();
            TaskGuard::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                finished.store(true, Ordering::SeqCst);
            })
        };
        assert!(!guard.is_finished());
        drop(guard);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
