// src/core/task.rs
use tokio::task::JoinHandle;

/// Owns a spawned background task and aborts it on drop, so timers
/// never outlive the session or feed that started them.
#[must_use = "dropping the guard aborts the task"]
pub struct TaskGuard {
    handle: JoinHandle<()>,
}

impl TaskGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
