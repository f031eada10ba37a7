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

//! Definition of the `Processor`, `Generator` and `Sink` traits.
//!
//! Stages are the per-event transformation steps of a pipeline chain. A
//! processor returns the next event or `None` to drop it; a generator
//! returns a lazy, finite sequence of sub-events that the runtime expands
//! at the next chain depth; a sink terminates an event. Stage `process`
//! methods are synchronous and non-blocking: long I/O belongs in sources
//! or connection-backed operations called from sources.
//!
//! Every stage invocation receives a [`PumpControl`] handler granting the
//! capabilities a stage may exercise against its pipeline: throttling,
//! publishing on the bus, and writing to the pipeline log ring.

use bus::BusEvent;
use context::Context;

pub mod config;
pub mod noop;

/// All the errors that can occur with a stage.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The stage has an invalid configuration.
    #[error("invalid configuration (reason: {message}, stage: {stage})")]
    InvalidConfig {
        /// The id of the stage.
        stage: String,
        /// The error message.
        message: String,
    },

    /// The stage failed while handling an event.
    #[error("stage error (stage: {stage}, reason: {error})")]
    Stage {
        /// The id of the stage.
        stage: String,
        /// The error message.
        error: String,
    },
}

impl Error {
    /// Creates a stage error from any displayable reason.
    pub fn stage(stage: &str, error: impl std::fmt::Display) -> Self {
        Error::Stage {
            stage: stage.to_string(),
            error: error.to_string(),
        }
    }
}

/// Handler passed to every stage invocation, exposing the capabilities a
/// stage may exercise against the pipeline it runs in.
pub trait PumpControl {
    /// Returns the id of the pipeline.
    fn pipeline_id(&self) -> &str;

    /// Adds (`enable = true`) or removes one hold of the named throttle
    /// token. A throttled pipeline stops being ready until every hold is
    /// removed.
    fn throttle(&self, who: &str, enable: bool);

    /// Publishes an event on the pipeline's bus.
    fn publish(&self, topic: &str, event: BusEvent);

    /// Writes an info record to the pipeline log ring.
    fn info(&self, message: &str);

    /// Writes a warning record to the pipeline log ring and bumps the
    /// pipeline `warning` counter.
    fn warn(&self, message: &str);

    /// Writes an error record to the pipeline log ring and bumps the
    /// pipeline `error` counter.
    fn error(&self, message: &str);
}

/// A lazy, finite sequence of sub-events produced by a generator.
pub type SubEvents<Msg> = Box<dyn Iterator<Item = Msg> + Send>;

/// The processor trait: a per-event transform.
pub trait Processor<Msg: 'static + Clone + Send>: Send {
    /// Returns the id of the processor.
    fn id(&self) -> &str;

    /// Transforms an event. Returns the event handed to the next stage,
    /// or `None` to drop the event.
    fn process(
        &mut self,
        control: &dyn PumpControl,
        context: &mut Context,
        event: Msg,
    ) -> Result<Option<Msg>, Error>;
}

/// The generator trait: a processor multiplying one event into a lazy
/// sequence of sub-events, each processed at the next chain depth.
///
/// Generators must not push into the pipeline themselves; the runtime
/// consumes the returned iterator and re-awaits readiness between
/// sub-events.
pub trait Generator<Msg: 'static + Clone + Send>: Send {
    /// Returns the id of the generator.
    fn id(&self) -> &str;

    /// Expands an event into sub-events.
    fn generate(
        &mut self,
        control: &dyn PumpControl,
        context: &mut Context,
        event: Msg,
    ) -> Result<SubEvents<Msg>, Error>;
}

/// The sink trait: the terminal stage consuming every event that reaches
/// the end of the chain.
pub trait Sink<Msg: 'static + Clone + Send>: Send {
    /// Returns the id of the sink.
    fn id(&self) -> &str;

    /// Consumes an event.
    fn consume(
        &mut self,
        control: &dyn PumpControl,
        context: &Context,
        event: Msg,
    ) -> Result<(), Error>;
}

/// The role a stage plays in a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    /// A per-event transform.
    Processor,
    /// A sub-event producing transform opening a new chain depth.
    Generator,
    /// A terminal stage.
    Sink,
}

impl StageKind {
    /// Returns the name of the stage kind.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Processor => "Processor",
            StageKind::Generator => "Generator",
            StageKind::Sink => "Sink",
        }
    }
}

/// A stage as chained by a pipeline.
pub enum Stage<Msg: 'static + Clone + Send> {
    /// A processor stage.
    Processor(Box<dyn Processor<Msg> + Send>),
    /// A generator stage.
    Generator(Box<dyn Generator<Msg> + Send>),
    /// A sink stage.
    Sink(Box<dyn Sink<Msg> + Send>),
}

impl<Msg: 'static + Clone + Send> Stage<Msg> {
    /// Returns the id of the wrapped stage.
    pub fn id(&self) -> &str {
        match self {
            Stage::Processor(processor) => processor.id(),
            Stage::Generator(generator) => generator.id(),
            Stage::Sink(sink) => sink.id(),
        }
    }

    /// Returns the kind of the wrapped stage.
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Processor(_) => StageKind::Processor,
            Stage::Generator(_) => StageKind::Generator,
            Stage::Sink(_) => StageKind::Sink,
        }
    }
}
