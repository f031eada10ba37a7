//! Definition of the `Source` trait and its lifecycle driver.
//!
//! A source is the event-producing side of a pipeline. Each source runs
//! as one long-lived task owned by a [`SourceHandle`]: `start` is
//! idempotent, `stop` cancels the task at its next suspension point and
//! awaits it, `restart` is cancel-then-start. A pipeline error never
//! cancels a source; it only blocks readiness until cleared.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use context::Context;
use tokio::task::JoinHandle;

use crate::{Error, Pipeline};

/// The source trait.
#[async_trait]
pub trait Source<Msg: 'static + Clone + Send>: Send {
    /// Returns the id of the source, unique within its pipeline.
    fn id(&self) -> &str;

    /// Returns the intake sender of an in-process queue source, if this
    /// source is one. The intake is what a tee processor forwards into.
    fn intake(&self) -> Option<flume::Sender<Msg>> {
        None
    }

    /// The long-lived body of the source task. Expected to loop until
    /// cancelled, checking pipeline readiness once per produced event
    /// (which `SourceContext::process` does on its behalf).
    async fn main(&mut self, context: &SourceContext<Msg>) -> Result<(), Error>;
}

/// Capabilities handed to a running source task.
pub struct SourceContext<Msg: 'static + Clone + Send> {
    pipeline: Arc<Pipeline<Msg>>,
    source_id: String,
}

impl<Msg: 'static + Clone + Send> SourceContext<Msg> {
    /// Returns the pipeline the source belongs to.
    pub fn pipeline(&self) -> &Arc<Pipeline<Msg>> {
        &self.pipeline
    }

    /// Returns the id of the running source.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Pushes one event into the pipeline, awaiting readiness first.
    pub async fn process(&self, event: Msg) -> Result<(), Error> {
        self.pipeline.process(event, None).await
    }

    /// Pushes one event together with a caller-supplied context.
    pub async fn process_with_context(&self, event: Msg, context: Context) -> Result<(), Error> {
        self.pipeline.process(event, Some(context)).await
    }
}

/// The lifecycle driver owning a source and its task.
pub struct SourceHandle<Msg: 'static + Clone + Send> {
    id: String,
    intake: Option<flume::Sender<Msg>>,
    source: Arc<tokio::sync::Mutex<Box<dyn Source<Msg>>>>,
    running: Mutex<Option<JoinHandle<()>>>,
}

impl<Msg: 'static + Clone + Send> SourceHandle<Msg> {
    pub(crate) fn new(source: Box<dyn Source<Msg>>) -> Self {
        Self {
            id: source.id().to_string(),
            intake: source.intake(),
            source: Arc::new(tokio::sync::Mutex::new(source)),
            running: Mutex::new(None),
        }
    }

    /// Returns the id of the owned source.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the intake sender of the owned source, if it has one.
    pub fn intake(&self) -> Option<flume::Sender<Msg>> {
        self.intake.clone()
    }

    /// Returns true while the source task is running.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .expect("source task slot lock failed")
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Ensures the source task is running. A no-op if it already is.
    pub fn start(&self, pipeline: Arc<Pipeline<Msg>>) {
        let mut slot = self.running.lock().expect("source task slot lock failed");
        if slot
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
        {
            return;
        }

        let source = self.source.clone();
        let source_id = self.id.clone();
        let pipeline_id = pipeline.id().to_string();
        *slot = Some(tokio::task::spawn(async move {
            let context = SourceContext {
                pipeline,
                source_id: source_id.clone(),
            };
            // A restarted source waits here until the cancelled task has
            // released the source.
            let mut source = source.lock().await;
            tracing::info!(pipeline = %pipeline_id, source = %source_id, "source started");
            match source.main(&context).await {
                Ok(()) => {
                    tracing::info!(pipeline = %pipeline_id, source = %source_id, "source has stopped normally")
                }
                Err(error) => {
                    tracing::error!(pipeline = %pipeline_id, source = %source_id, %error, "source failed")
                }
            }
        }));
    }

    /// Cancels the source task at its next suspension point and awaits
    /// its completion.
    pub async fn stop(&self) {
        let handle = self
            .running
            .lock()
            .expect("source task slot lock failed")
            .take();
        if let Some(handle) = handle {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => tracing::error!(source = %self.id, error = ?err, "source join error"),
            }
            tracing::info!(source = %self.id, "source stopped");
        }
    }

    /// Cancels the current source task (if any) and starts a fresh one.
    pub fn restart(&self, pipeline: Arc<Pipeline<Msg>>) {
        {
            let mut slot = self.running.lock().expect("source task slot lock failed");
            if let Some(handle) = slot.take() {
                handle.abort();
                tracing::info!(source = %self.id, "source cancelled for restart");
            }
        }
        self.start(pipeline);
    }
}
