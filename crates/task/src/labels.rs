//! Labels identifying a background task in logs.

/// List of labels for a background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLabels {
    /// The task category (e.g. "source", "trigger", "lookup").
    pub task_cat: String,
    /// The task id.
    pub task_id: String,
}

impl TaskLabels {
    /// Create a new `TaskLabels` instance.
    pub fn new(task_cat: &str, task_id: &str) -> Self {
        Self {
            task_cat: task_cat.into(),
            task_id: task_id.into(),
        }
    }

    /// Create a unique task id.
    pub fn unique_id(&self) -> String {
        format!("{}:{}", self.task_cat, self.task_id)
    }
}
