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

//! Concrete sources of the core contract: the trigger-driven source and
//! the in-process queue source, together with the tee processor that
//! feeds the latter.

use async_trait::async_trait;
use bus::{topics, BusEvent};
use pipeline::{Source, SourceContext};
use trigger::Trigger;

pub mod internal;
pub mod tee;

pub use internal::InternalSource;
pub use tee::TeeProcessor;

/// The cycle hook of a trigger-driven source.
///
/// `cycle` runs once per trigger firing and pushes the events it
/// produces through `context.process(...)`. Cycles of one source never
/// overlap: a firing arriving while a cycle still runs waits until the
/// cycle returns.
#[async_trait]
pub trait CycleSource<Msg: 'static + Clone + Send>: Send {
    /// Executes one source cycle.
    async fn cycle(&mut self, context: &SourceContext<Msg>) -> Result<(), pipeline::Error>;
}

/// A source executing one [`CycleSource::cycle`] per trigger firing.
///
/// Triggers are attached with [`TriggerSource::on`]; firings arriving
/// while a cycle runs queue up and are served in order. After each
/// completed cycle the source publishes `bspump.pipeline.cycle_end!`.
pub struct TriggerSource<Msg, C>
where
    Msg: 'static + Clone + Send,
    C: CycleSource<Msg>,
{
    id: String,
    cycler: C,
    firing_tx: flume::Sender<()>,
    firing_rx: flume::Receiver<()>,
    _marker: std::marker::PhantomData<fn(Msg) -> Msg>,
}

impl<Msg, C> TriggerSource<Msg, C>
where
    Msg: 'static + Clone + Send,
    C: CycleSource<Msg>,
{
    /// Creates a trigger-driven source around a cycle implementation.
    pub fn new(id: &str, cycler: C) -> Self {
        let (firing_tx, firing_rx) = flume::unbounded();
        Self {
            id: id.to_string(),
            cycler,
            firing_tx,
            firing_rx,
            _marker: std::marker::PhantomData,
        }
    }

    /// Attaches a trigger and returns the source for fluent composition.
    pub fn on(self, trigger: &dyn Trigger) -> Self {
        trigger.subscribe(self.firing_tx.clone());
        self
    }
}

#[async_trait]
impl<Msg, C> Source<Msg> for TriggerSource<Msg, C>
where
    Msg: 'static + Clone + Send,
    C: CycleSource<Msg>,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn main(&mut self, context: &SourceContext<Msg>) -> Result<(), pipeline::Error> {
        loop {
            match self.firing_rx.recv_async().await {
                // Every trigger is gone; nothing will fire again.
                Err(_) => return Ok(()),
                Ok(()) => {
                    context.pipeline().ready().await;
                    if let Err(error) = self.cycler.cycle(context).await {
                        // The pipeline tracked the failure; the source
                        // stays alive and waits for the next firing.
                        tracing::warn!(source = %self.id, %error, "source cycle failed");
                    }
                    context.pipeline().bus().publish(
                        topics::PIPELINE_CYCLE_END,
                        BusEvent::pipeline(context.pipeline().id()),
                    );
                }
            }
        }
    }
}
