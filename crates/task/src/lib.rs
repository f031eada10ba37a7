#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! A manager for long-lived background tasks.
//!
//! The host registers every helper task it spawns (metrics flusher,
//! periodic trigger tickers, lookup refreshers) under a pair of labels.
//! Registered tasks are expected to loop until cancelled; `shutdown`
//! aborts them all and awaits their join handles.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::error;

use crate::labels::TaskLabels;

pub mod labels;

/// All the errors of this crate.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {}

struct RegisteredTask {
    labels: TaskLabels,
    join_handle: JoinHandle<()>,
}

/// A background-task manager.
#[derive(Clone, Default)]
#[must_use]
pub struct TaskManager {
    /// All the tasks registered with this manager.
    registered_tasks: Arc<Mutex<Vec<RegisteredTask>>>,
}

impl TaskManager {
    /// Creates a new task manager.
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a task.
    pub fn register(&self, join_handle: JoinHandle<()>, task_labels: &TaskLabels) {
        self.registered_tasks
            .lock()
            .expect("unexpected tasks lock issue")
            .push(RegisteredTask {
                labels: task_labels.clone(),
                join_handle,
            });

        tracing::info!(
            task_id=%task_labels.task_id,
            task_cat=%task_labels.task_cat,
            "task registered and started");
    }

    /// Returns the number of registered tasks.
    pub fn len(&self) -> usize {
        self.registered_tasks
            .lock()
            .expect("unexpected tasks lock issue")
            .len()
    }

    /// Returns true when no task is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aborts every registered task and awaits its completion.
    pub async fn shutdown(&self) {
        let tasks: Vec<RegisteredTask> = self
            .registered_tasks
            .lock()
            .expect("unexpected tasks lock issue")
            .drain(..)
            .collect();

        tracing::info!(task_count = tasks.len(), "shutting down registered tasks");

        for task in tasks {
            task.join_handle.abort();
            match task.join_handle.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => error!(
                    task_id=%task.labels.task_id,
                    task_cat=%task.labels.task_cat,
                    error=?err,
                    "task join error"
                ),
            }
            tracing::trace!(
                task_id=%task.labels.task_id,
                task_cat=%task.labels.task_cat,
                "task shut down");
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_register_and_shutdown() {
        let manager = TaskManager::new();

        let join_handle = tokio::spawn(async {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
        manager.register(join_handle, &TaskLabels::new("test", "sleeper"));
        assert_eq!(manager.len(), 1);

        manager.shutdown().await;
        assert!(manager.is_empty());
    }
}
