//! Cancellable periodic tasks.
//!
//! Each task re-arms only after its callback has returned, so a slow firing
//! stretches the period instead of stacking up work. Cancellation is strict:
//! once [`TaskHandle::cancel`] returns, the callback will not start again.

use std::{
    cell::Cell,
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use tokio::sync::Notify;
use tracing::{debug, error};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Id of the task whose callback is running on this thread, 0 when none.
    static FIRING: Cell<u64> = const { Cell::new(0) };
}

struct TaskShared {
    id: u64,
    name: String,
    cancelled: AtomicBool,
    firing: Mutex<()>,
    wake: Notify,
    firings: AtomicU64,
}

impl TaskShared {
    /// Run one firing. Returns false once the task should stop.
    fn fire<F: FnMut()>(&self, callback: &mut F) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        let _guard = lock(&self.firing);
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        let outer = FIRING.with(|current| current.replace(self.id));
        if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
            error!("periodic task '{}' panicked; keeping schedule", self.name);
        }
        FIRING.with(|current| current.set(outer));
        self.firings.fetch_add(1, Ordering::Relaxed);
        !self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        let first = !self.cancelled.swap(true, Ordering::AcqRel);
        self.wake.notify_one();
        // From inside a firing, waiting could deadlock on our own or a peer's lock.
        if FIRING.with(Cell::get) == 0 {
            drop(lock(&self.firing));
        }
        if first {
            debug!("periodic task '{}' cancelled", self.name);
        }
    }
}

/// Handle to a scheduled task. Cloning shares the same task.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Completed firings so far.
    pub fn firings(&self) -> u64 {
        self.shared.firings.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[derive(Default)]
struct Registry {
    tasks: Mutex<HashMap<u64, Arc<TaskShared>>>,
}

impl Registry {
    fn remove(&self, id: u64) -> Option<Arc<TaskShared>> {
        lock(&self.tasks).remove(&id)
    }

    fn drain(&self) -> Vec<Arc<TaskShared>> {
        lock(&self.tasks).drain().map(|(_, task)| task).collect()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        for task in lock(&self.tasks).values() {
            task.cancelled.store(true, Ordering::Release);
            task.wake.notify_one();
        }
    }
}

/// Owns a set of periodic tasks running on the tokio runtime. Dropping the
/// scheduler cancels everything it still tracks.
#[derive(Default)]
pub struct PeriodicTaskScheduler {
    registry: Arc<Registry>,
}

impl PeriodicTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` every `interval`, measured from the end of the previous
    /// firing. Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, name: impl Into<String>, interval: Duration, callback: F) -> TaskHandle
    where
        F: FnMut() + Send + 'static,
    {
        let shared = Arc::new(TaskShared {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            cancelled: AtomicBool::new(false),
            firing: Mutex::new(()),
            wake: Notify::new(),
            firings: AtomicU64::new(0),
        });
        lock(&self.registry.tasks).insert(shared.id, Arc::clone(&shared));
        debug!("scheduling '{}' every {:?}", shared.name, interval);

        let task = Arc::clone(&shared);
        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        tokio::spawn(async move {
            let mut callback = callback;
            loop {
                tokio::select! {
                    _ = task.wake.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
                if !task.fire(&mut callback) {
                    break;
                }
            }
            if let Some(registry) = registry.upgrade() {
                registry.remove(task.id);
            }
        });

        TaskHandle { shared }
    }

    pub fn cancel(&self, handle: &TaskHandle) {
        self.registry.remove(handle.id());
        handle.cancel();
    }

    /// Cancel every tracked task. Returns how many were still live.
    pub fn cancel_all(&self) -> usize {
        let tasks = self.registry.drain();
        let live = tasks
            .iter()
            .filter(|task| !task.cancelled.load(Ordering::Acquire))
            .count();
        for task in &tasks {
            task.cancel();
        }
        live
    }

    pub fn active_count(&self) -> usize {
        lock(&self.registry.tasks)
            .values()
            .filter(|task| !task.cancelled.load(Ordering::Acquire))
            .count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
