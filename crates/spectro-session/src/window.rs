use crate::scheduler::TaskHandle;

/// A group of analysis tasks feeding one view. Closing the window, or
/// dropping it, cancels every attached task.
#[derive(Debug, Default)]
pub struct AnalysisWindow {
    title: String,
    tasks: Vec<TaskHandle>,
}

impl AnalysisWindow {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            tasks: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn attach(&mut self, handle: TaskHandle) {
        self.tasks.push(handle);
    }

    pub fn tasks(&self) -> &[TaskHandle] {
        &self.tasks
    }

    /// True while at least one attached task is still live.
    pub fn is_open(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_cancelled())
    }

    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.cancel();
        }
    }
}

impl Drop for AnalysisWindow {
    fn drop(&mut self) {
        self.close();
    }
}
