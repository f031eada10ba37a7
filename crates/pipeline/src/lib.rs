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

//! The pipeline runtime.
//!
//! A pipeline composes one or more sources with a chain of processors
//! organised as a list of depth levels: level 0 handles source-produced
//! events, and every generator terminating a level opens the next one for
//! its sub-events. The last stage of the last level is always a sink.
//!
//! Event intake is gated by *readiness*: a pipeline is ready iff it is
//! not in the error state and no throttle hold is active. Sources await
//! readiness once per event; readiness transitions are published on the
//! bus synchronously, so a `not_ready!` is observed before the next event
//! is pushed.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
};

use bus::{topics, Bus, BusEvent};
use context::Context;
use futures::future::BoxFuture;
use metrics::{Counter, DutyCycle, Gauge, Registry};
use processor::{
    Generator, Processor, PumpControl, Sink, Stage, StageKind, SubEvents,
};
use serde_json::json;
use tokio::sync::watch;

use crate::log::{LogLevel, PipelineLog};

pub mod log;
mod source;

pub use source::{Source, SourceContext, SourceHandle};

/// Name of the per-pipeline counter metric (`event.in`, `event.out`,
/// `event.drop`, `warning`, `error`), tagged `pipeline=<id>`.
pub const METRIC_PIPELINE: &str = "bspump.pipeline";
/// Name of the per-pipeline gauge metric (`warning.ratio`,
/// `error.ratio`).
pub const METRIC_PIPELINE_GAUGE: &str = "bspump.pipeline.gauge";
/// Name of the per-pipeline readiness duty-cycle metric.
pub const METRIC_PIPELINE_DUTY_CYCLE: &str = "bspump.pipeline.dutycycle";

/// Number of `ready()` calls after which one scheduler yield is forced,
/// so a high-volume pipeline cannot starve the event loop.
pub const CHILLOUT_TRIGGER: usize = 10_000;

/// All the errors that can occur when building or running a pipeline.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The pipeline chain violates a construction invariant.
    #[error("pipeline build error (pipeline: {pipeline}, reason: {reason})")]
    Build {
        /// The id of the pipeline.
        pipeline: String,
        /// The reason of the rejection.
        reason: String,
    },

    /// A stage failed while handling an event.
    #[error(transparent)]
    Stage(#[from] processor::Error),

    /// The chain finished with an event that no sink consumed.
    #[error("incomplete pipeline (pipeline: {pipeline}, an event was not consumed by a sink)")]
    NotConsumed {
        /// The id of the pipeline.
        pipeline: String,
    },

    /// A source failed outside of event processing.
    #[error("source error (source: {source_id}, reason: {error})")]
    Source {
        /// The id of the source.
        source_id: String,
        /// The error message.
        error: String,
    },
}

/// Classifier deciding whether a processing error is hard (stop the
/// pipeline) or soft (bump the warning counter and resume).
pub type CatchError<Msg> = Box<dyn Fn(&Error, &Msg) -> bool + Send + Sync>;

/// The error state of a faulted pipeline.
#[derive(Clone, Debug)]
pub struct Fault {
    /// The context of the event that failed.
    pub context: Context,
    /// The rendered error.
    pub error: String,
    /// RFC 3339 timestamp of the failure.
    pub timestamp: String,
}

struct State {
    fault: Option<Fault>,
    // Throttle holds are counted per token: enabling twice requires
    // disabling twice.
    throttles: HashMap<String, usize>,
}

/// A chained stage together with its descriptor.
pub struct StageRef<Msg: 'static + Clone + Send> {
    id: String,
    kind: StageKind,
    stage: Arc<tokio::sync::Mutex<Stage<Msg>>>,
}

impl<Msg: 'static + Clone + Send> Clone for StageRef<Msg> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind,
            stage: self.stage.clone(),
        }
    }
}

impl<Msg: 'static + Clone + Send> StageRef<Msg> {
    fn new(stage: Stage<Msg>) -> Self {
        Self {
            id: stage.id().to_string(),
            kind: stage.kind(),
            stage: Arc::new(tokio::sync::Mutex::new(stage)),
        }
    }

    /// Returns the id of the stage.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the kind of the stage.
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Returns the shared stage itself.
    pub fn stage(&self) -> Arc<tokio::sync::Mutex<Stage<Msg>>> {
        self.stage.clone()
    }
}

enum Step<Msg: 'static + Clone + Send> {
    Next(Msg),
    Dropped,
    Consumed,
    Expand(SubEvents<Msg>),
}

/// A composed unit of sources and a processor chain terminated by a
/// sink. Built through [`PipelineBuilder`]; shared as `Arc<Pipeline>`.
pub struct Pipeline<Msg: 'static + Clone + Send> {
    id: String,
    // Handed to source tasks, which call back into the pipeline.
    weak_self: Weak<Pipeline<Msg>>,
    bus: Bus,
    counter: Arc<Counter>,
    gauge: Arc<Gauge>,
    duty_cycle: Arc<DutyCycle>,
    log: PipelineLog,
    state: Mutex<State>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    chillout_counter: AtomicUsize,
    base_context: Context,
    chain: Vec<Vec<StageRef<Msg>>>,
    sources: Vec<Arc<SourceHandle<Msg>>>,
    catch_error: CatchError<Msg>,
}

impl<Msg: 'static + Clone + Send> Pipeline<Msg> {
    /// Starts building a pipeline.
    pub fn builder(bus: Bus, registry: Registry, id: &str) -> PipelineBuilder<Msg> {
        PipelineBuilder::new(bus, registry, id)
    }

    /// Returns the id of the pipeline.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the bus of the pipeline.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Returns the per-pipeline counter metric.
    pub fn counter(&self) -> &Arc<Counter> {
        &self.counter
    }

    /// Returns the per-pipeline gauge metric.
    pub fn gauge(&self) -> &Arc<Gauge> {
        &self.gauge
    }

    /// Returns the sources of the pipeline.
    pub fn sources(&self) -> &[Arc<SourceHandle<Msg>>] {
        &self.sources
    }

    /// Finds a source by id.
    pub fn locate_source(&self, source_id: &str) -> Option<Arc<SourceHandle<Msg>>> {
        self.sources
            .iter()
            .find(|source| source.id() == source_id)
            .cloned()
    }

    /// Finds a chained stage by id.
    pub fn locate_processor(&self, processor_id: &str) -> Option<StageRef<Msg>> {
        self.chain
            .iter()
            .flatten()
            .find(|cell| cell.id() == processor_id)
            .cloned()
    }

    /// Returns true while the pipeline accepts events.
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Returns true while the pipeline is in the error state.
    pub fn is_error(&self) -> bool {
        self.state
            .lock()
            .expect("pipeline state lock failed")
            .fault
            .is_some()
    }

    /// Suspends until the pipeline is ready.
    ///
    /// Every [`CHILLOUT_TRIGGER`] calls, one scheduler yield is forced
    /// even when the pipeline is ready the whole time.
    pub async fn ready(&self) {
        let calls = self.chillout_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if calls >= CHILLOUT_TRIGGER {
            self.chillout_counter.store(0, Ordering::Relaxed);
            tokio::task::yield_now().await;
        }

        if *self.ready_rx.borrow() {
            return;
        }
        let mut ready_rx = self.ready_rx.clone();
        loop {
            if *ready_rx.borrow_and_update() {
                return;
            }
            if ready_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Adds (`enable = true`) or removes one hold of the named throttle
    /// token and re-evaluates readiness.
    pub fn throttle(&self, who: &str, enable: bool) {
        let transition = {
            let mut state = self.state.lock().expect("pipeline state lock failed");
            if enable {
                *state.throttles.entry(who.to_string()).or_insert(0) += 1;
            } else if let Some(holds) = state.throttles.get_mut(who) {
                *holds -= 1;
                if *holds == 0 {
                    let _ = state.throttles.remove(who);
                }
            }
            self.evaluate_ready_locked(&state)
        };
        if let Some(ready) = transition {
            self.announce_ready(ready);
        }
    }

    /// The single event entry point used by sources.
    ///
    /// Awaits readiness, accounts the event, materialises its context
    /// (the caller-supplied context is merged with the pipeline base
    /// context, the base winning) and runs the processor chain. Stage
    /// failures are classified by the `catch_error` hook: hard errors put
    /// the pipeline into the error state; soft errors only bump the
    /// `warning` counter. Either way the error is returned to the caller.
    pub async fn process(&self, event: Msg, context: Option<Context>) -> Result<(), Error> {
        self.ready().await;
        self.counter.add("event.in", 1);

        let context = match context {
            Some(mut supplied) => {
                supplied.merge_from(&self.base_context);
                supplied
            }
            None => self.base_context.clone(),
        };

        let failure_context = context.clone();
        let failure_event = event.clone();
        match self.walk(0, context, event).await {
            Ok(()) => Ok(()),
            Err(error) => Err(self.set_error(failure_context, &failure_event, error)),
        }
    }

    fn walk<'a>(
        &'a self,
        depth: usize,
        context: Context,
        event: Msg,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let last_depth = self.chain.len() - 1;
            let mut context = context;
            let mut event = event;

            for cell in &self.chain[depth] {
                let step = {
                    // Concurrent events interleave between stages but
                    // serialise at each stage: a sink never runs two
                    // invocations at once.
                    let mut stage = cell.stage.lock().await;
                    match &mut *stage {
                        Stage::Processor(processor) => {
                            match processor.process(self.as_control(), &mut context, event)? {
                                Some(next) => Step::Next(next),
                                None => Step::Dropped,
                            }
                        }
                        Stage::Generator(generator) => {
                            Step::Expand(generator.generate(self.as_control(), &mut context, event)?)
                        }
                        Stage::Sink(sink) => {
                            sink.consume(self.as_control(), &context, event)?;
                            Step::Consumed
                        }
                    }
                };

                event = match step {
                    Step::Next(next) => next,
                    Step::Dropped => {
                        self.counter.add("event.drop", 1);
                        return Ok(());
                    }
                    Step::Consumed => {
                        self.counter.add("event.out", 1);
                        return Ok(());
                    }
                    Step::Expand(sub_events) => {
                        if depth >= last_depth {
                            return Err(Error::NotConsumed {
                                pipeline: self.id.clone(),
                            });
                        }
                        // Sub-events are dispatched one by one, each with
                        // its own copy of the context, re-awaiting
                        // readiness in between.
                        for sub_event in sub_events {
                            self.ready().await;
                            self.walk(depth + 1, context.clone(), sub_event).await?;
                        }
                        return Ok(());
                    }
                };
            }

            Err(Error::NotConsumed {
                pipeline: self.id.clone(),
            })
        })
    }

    /// Routes a processing failure through the `catch_error` classifier
    /// and returns the error back to the caller.
    pub fn set_error(&self, context: Context, event: &Msg, error: Error) -> Error {
        if !(self.catch_error)(&error, event) {
            self.counter.add("warning", 1);
            self.bus
                .publish(topics::PIPELINE_WARNING, BusEvent::pipeline(&self.id));
            return error;
        }

        self.counter.add("error", 1);
        let transition = {
            let mut state = self.state.lock().expect("pipeline state lock failed");
            if state.fault.is_some() {
                tracing::warn!(pipeline = %self.id, "error on the pipeline is already set");
            }
            state.fault = Some(Fault {
                context,
                error: error.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            });
            self.evaluate_ready_locked(&state)
        };
        tracing::warn!(pipeline = %self.id, %error, "pipeline stopped due to a processing error");
        self.bus
            .publish(topics::PIPELINE_ERROR, BusEvent::pipeline(&self.id));
        if let Some(ready) = transition {
            self.announce_ready(ready);
        }
        error
    }

    /// Clears the error state, restarts every source and re-evaluates
    /// readiness. A no-op when the pipeline is not faulted.
    pub fn clear_error(&self) {
        let cleared = {
            let mut state = self.state.lock().expect("pipeline state lock failed");
            state.fault.take().is_some()
        };
        if !cleared {
            return;
        }

        tracing::info!(pipeline = %self.id, "error cleared");
        let this = self.strong_self();
        for source in &self.sources {
            source.restart(this.clone());
        }
        self.bus
            .publish(topics::PIPELINE_CLEAR_ERROR, BusEvent::pipeline(&self.id));
        let transition = {
            let state = self.state.lock().expect("pipeline state lock failed");
            self.evaluate_ready_locked(&state)
        };
        if let Some(ready) = transition {
            self.announce_ready(ready);
        }
    }

    /// Returns the current error state.
    pub fn fault(&self) -> Option<Fault> {
        self.state
            .lock()
            .expect("pipeline state lock failed")
            .fault
            .clone()
    }

    /// Publishes `start!`, starts all non-started sources and evaluates
    /// readiness.
    pub fn start(&self) {
        self.bus
            .publish(topics::PIPELINE_START, BusEvent::pipeline(&self.id));
        let this = self.strong_self();
        for source in &self.sources {
            source.start(this.clone());
        }
        let transition = {
            let state = self.state.lock().expect("pipeline state lock failed");
            self.evaluate_ready_locked(&state)
        };
        if let Some(ready) = transition {
            self.announce_ready(ready);
        }
    }

    /// Stops every started source and awaits their completion.
    pub async fn stop(&self) {
        for source in &self.sources {
            source.stop().await;
        }
    }

    /// Returns an introspection snapshot of the pipeline.
    pub fn rest_get(&self) -> serde_json::Value {
        let mut payload = serde_json::Map::new();
        let _ = payload.insert("Id".into(), json!(self.id));
        let _ = payload.insert("Ready".into(), json!(self.is_ready()));
        let _ = payload.insert(
            "Sources".into(),
            json!(self
                .sources
                .iter()
                .map(|source| json!({ "Id": source.id(), "Running": source.is_running() }))
                .collect::<Vec<_>>()),
        );
        let _ = payload.insert(
            "Processors".into(),
            json!(self
                .chain
                .iter()
                .map(|level| {
                    level
                        .iter()
                        .map(|cell| json!({ "Id": cell.id(), "Kind": cell.kind().name() }))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()),
        );
        let mut metrics_payload = serde_json::Map::new();
        let _ = metrics_payload.insert(METRIC_PIPELINE.to_string(), json!(self.counter.snapshot()));
        let _ = metrics_payload.insert(
            METRIC_PIPELINE_GAUGE.to_string(),
            json!(self.gauge.snapshot()),
        );
        let _ = metrics_payload.insert(
            METRIC_PIPELINE_DUTY_CYCLE.to_string(),
            json!({ "ready": self.duty_cycle.ratio() }),
        );
        let _ = payload.insert("Metrics".into(), serde_json::Value::Object(metrics_payload));
        let _ = payload.insert(
            "Log".into(),
            serde_json::to_value(self.log.snapshot()).unwrap_or_default(),
        );
        if let Some(fault) = self.fault() {
            let _ = payload.insert("Error".into(), json!(fault.error));
            let _ = payload.insert("ErrorTimestamp".into(), json!(fault.timestamp));
        }
        serde_json::Value::Object(payload)
    }

    fn as_control(&self) -> &dyn PumpControl {
        self
    }

    fn strong_self(&self) -> Arc<Pipeline<Msg>> {
        self.weak_self
            .upgrade()
            .expect("pipeline used while being dropped")
    }

    fn evaluate_ready_locked(&self, state: &State) -> Option<bool> {
        let new_ready = state.fault.is_none() && state.throttles.is_empty();
        if *self.ready_rx.borrow() == new_ready {
            None
        } else {
            let _ = self.ready_tx.send_replace(new_ready);
            Some(new_ready)
        }
    }

    fn announce_ready(&self, ready: bool) {
        self.duty_cycle.set(ready);
        if ready {
            self.bus
                .publish(topics::PIPELINE_READY, BusEvent::pipeline(&self.id));
        } else {
            self.bus
                .publish(topics::PIPELINE_NOT_READY, BusEvent::pipeline(&self.id));
        }
    }
}

impl<Msg: 'static + Clone + Send> PumpControl for Pipeline<Msg> {
    fn pipeline_id(&self) -> &str {
        &self.id
    }

    fn throttle(&self, who: &str, enable: bool) {
        Pipeline::throttle(self, who, enable);
    }

    fn publish(&self, topic: &str, event: BusEvent) {
        self.bus.publish(topic, event);
    }

    fn info(&self, message: &str) {
        self.log.record(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log.record(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log.record(LogLevel::Error, message);
    }
}

/// Builder assembling and validating a pipeline.
///
/// Stages are appended in chain order; appending a generator opens a new
/// chain depth for its sub-events; the chain is complete once a sink is
/// appended. Construction invariants (at least one source, a terminal
/// sink, nothing after the sink) are enforced by [`PipelineBuilder::build`].
pub struct PipelineBuilder<Msg: 'static + Clone + Send> {
    id: String,
    bus: Bus,
    registry: Registry,
    base_context: Context,
    catch_error: CatchError<Msg>,
    sources: Vec<Arc<SourceHandle<Msg>>>,
    chain: Vec<Vec<StageRef<Msg>>>,
    defects: Vec<String>,
    sealed: bool,
}

impl<Msg: 'static + Clone + Send> PipelineBuilder<Msg> {
    /// Creates a builder for a pipeline with the given id.
    pub fn new(bus: Bus, registry: Registry, id: &str) -> Self {
        Self {
            id: id.to_string(),
            bus,
            registry,
            base_context: Context::new(),
            // Every error is hard unless the user installs a classifier.
            catch_error: Box::new(|_error, _event| true),
            sources: Vec::new(),
            chain: vec![Vec::new()],
            defects: Vec::new(),
            sealed: false,
        }
    }

    /// Seeds the base context merged into every event's context.
    pub fn base_context(mut self, context: Context) -> Self {
        self.base_context = context;
        self
    }

    /// Installs the error classifier (`true` = hard error).
    pub fn catch_error<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Error, &Msg) -> bool + Send + Sync + 'static,
    {
        self.catch_error = Box::new(classifier);
        self
    }

    /// Appends a source.
    pub fn source(mut self, source: impl Source<Msg> + 'static) -> Self {
        self.sources.push(Arc::new(SourceHandle::new(Box::new(source))));
        self
    }

    /// Appends a processor to the current chain depth.
    pub fn processor(mut self, processor: impl Processor<Msg> + 'static) -> Self {
        self.append(Stage::Processor(Box::new(processor)));
        self
    }

    /// Appends a generator, opening a new chain depth for its sub-events.
    pub fn generator(mut self, generator: impl Generator<Msg> + 'static) -> Self {
        self.append(Stage::Generator(Box::new(generator)));
        if !self.sealed {
            self.chain.push(Vec::new());
        }
        self
    }

    /// Appends the terminal sink, completing the chain.
    pub fn sink(mut self, sink: impl Sink<Msg> + 'static) -> Self {
        self.append(Stage::Sink(Box::new(sink)));
        self.sealed = true;
        self
    }

    fn append(&mut self, stage: Stage<Msg>) {
        if self.sealed {
            self.defects.push(format!(
                "stage '{}' appended after the sink",
                stage.id()
            ));
            return;
        }
        self.chain
            .last_mut()
            .expect("chain always holds at least one level")
            .push(StageRef::new(stage));
    }

    /// Validates the chain and returns the pipeline.
    pub fn build(self) -> Result<Arc<Pipeline<Msg>>, Error> {
        let build_error = |reason: String| Error::Build {
            pipeline: self.id.clone(),
            reason,
        };

        if let Some(defect) = self.defects.first() {
            return Err(build_error(defect.clone()));
        }
        if self.sources.is_empty() {
            return Err(build_error("pipeline has no source".to_string()));
        }
        if !self.sealed {
            return Err(build_error(
                "pipeline chain does not terminate with a sink".to_string(),
            ));
        }

        let tags: metrics::Tags =
            std::iter::once(("pipeline".to_string(), self.id.clone())).collect();
        let counter = self.registry.create_counter(
            METRIC_PIPELINE,
            tags.clone(),
            &["event.in", "event.out", "event.drop", "warning", "error"],
        );
        let gauge = self.registry.create_gauge(
            METRIC_PIPELINE_GAUGE,
            tags.clone(),
            &["warning.ratio", "error.ratio"],
        );
        let duty_cycle =
            self.registry
                .create_duty_cycle(METRIC_PIPELINE_DUTY_CYCLE, tags, "ready", false);

        // Ratio gauges follow the pipeline's own counter on every flush.
        {
            let gauge = gauge.clone();
            let pipeline_id = self.id.clone();
            self.bus.subscribe(topics::METRICS_FLUSH, move |_topic, event| {
                if let BusEvent::MetricsFlush { metric, tags, values } = event {
                    if metric != METRIC_PIPELINE
                        || tags.get("pipeline").map(String::as_str) != Some(pipeline_id.as_str())
                    {
                        return;
                    }
                    let event_in = values.get("event.in").copied().unwrap_or(0.0);
                    if event_in == 0.0 {
                        gauge.set("warning.ratio", 0.0);
                        gauge.set("error.ratio", 0.0);
                    } else {
                        gauge.set(
                            "warning.ratio",
                            values.get("warning").copied().unwrap_or(0.0) / event_in,
                        );
                        gauge.set(
                            "error.ratio",
                            values.get("error").copied().unwrap_or(0.0) / event_in,
                        );
                    }
                }
            });
        }

        let (ready_tx, ready_rx) = watch::channel(false);
        Ok(Arc::new_cyclic(|weak_self| Pipeline {
            log: PipelineLog::new(&self.id, counter.clone()),
            id: self.id,
            weak_self: weak_self.clone(),
            bus: self.bus,
            counter,
            gauge,
            duty_cycle,
            state: Mutex::new(State {
                fault: None,
                throttles: HashMap::new(),
            }),
            ready_tx,
            ready_rx,
            chillout_counter: AtomicUsize::new(0),
            base_context: self.base_context,
            chain: self.chain,
            sources: self.sources,
            catch_error: self.catch_error,
        }))
    }
}
