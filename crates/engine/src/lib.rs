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

//! The application host.
//!
//! An [`App`] owns the event loop, the pub/sub bus, the metrics
//! registry, the background-task manager, and the [`PumpService`]
//! registry. `run` drives the whole lifecycle: initialize the service
//! (lookups first, then pipelines), flush metrics periodically, process
//! commands until `StopAll`, then finalize in reverse order.

use std::time::Duration;

use bus::{topics, Bus, BusEvent};
use metrics::Registry;
use pipeline::PipelineBuilder;
use task::{labels::TaskLabels, TaskManager};
use tokio::sync::mpsc::{Receiver, Sender};

mod service;

pub use service::{Located, PumpService};

/// All the errors that can occur when using the host or its registry.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A runtime error occurred.
    #[error("engine runtime error (reason: {error})")]
    Runtime {
        /// The error that occurred.
        error: String,
    },

    /// A pipeline with the same id is already registered.
    #[error("pipeline '{pipeline}' is already registered")]
    DuplicatePipeline {
        /// The pipeline id.
        pipeline: String,
    },

    /// A connection with the same id is already registered.
    #[error("connection '{connection}' is already registered")]
    DuplicateConnection {
        /// The connection id.
        connection: String,
    },

    /// A lookup with the same id is already registered.
    #[error("lookup '{lookup}' is already registered")]
    DuplicateLookup {
        /// The lookup id.
        lookup: String,
    },

    /// A connection reference did not resolve.
    #[error("cannot find connection '{connection}' (did you call add_connection?)")]
    UnknownConnection {
        /// The connection id.
        connection: String,
    },

    /// A lookup reference did not resolve.
    #[error("cannot find lookup '{lookup}' (did you call add_lookup?)")]
    UnknownLookup {
        /// The lookup id.
        lookup: String,
    },

    /// A lookup failed to perform its initial load.
    #[error("lookup '{lookup}' failed to load (reason: {error})")]
    Lookup {
        /// The lookup id.
        lookup: String,
        /// The error that occurred.
        error: String,
    },

    /// A command error occurred.
    #[error("command error (reason: {error}, command: {command})")]
    Command {
        /// The command that failed.
        command: String,
        /// The error that occurred.
        error: String,
    },
}

/// All the commands supported by the host.
#[derive(Debug)]
#[non_exhaustive]
pub enum Command {
    /// Stops every pipeline and shuts the host down.
    StopAll,
}

impl Command {
    /// Returns the name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::StopAll => "stop_all",
        }
    }
}

/// Command handler to interact with a running host from another thread.
pub struct CommandHandler {
    sender: Sender<Command>,
}

impl CommandHandler {
    /// Creates a new command handler.
    pub fn new(sender: Sender<Command>) -> Self {
        Self { sender }
    }

    /// Sends a command to the host.
    pub fn send(&self, command: Command) -> Result<(), Error> {
        let command_name = command.name().to_string();
        self.sender.try_send(command).map_err(|e| Error::Command {
            command: command_name,
            error: e.to_string(),
        })
    }
}

/// A set of methods called by the host when it is started and stopped.
#[async_trait::async_trait]
pub trait AsyncObserver: Send {
    /// Called when the host has started every pipeline.
    async fn on_started(&self);
    /// Called when the host has stopped.
    async fn on_stopped(&self);
}

/// Default interval between two metric flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// The application host.
pub struct App<Msg: 'static + Clone + Send> {
    bus: Bus,
    metrics: Registry,
    service: PumpService<Msg>,
    tasks: TaskManager,
    flush_interval: Duration,
    observer: Option<Box<dyn AsyncObserver + Send + Sync>>,
    command_sender: Sender<Command>,
    command_receiver: Option<Receiver<Command>>,
}

impl<Msg: 'static + Clone + Send> Default for App<Msg> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Msg: 'static + Clone + Send> App<Msg> {
    /// Creates a new host.
    pub fn new() -> Self {
        let (command_sender, command_receiver) = tokio::sync::mpsc::channel(10);
        Self {
            bus: Bus::new(),
            metrics: Registry::new(),
            service: PumpService::new(),
            tasks: TaskManager::new(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            observer: None,
            command_sender,
            command_receiver: Some(command_receiver),
        }
    }

    /// Overrides the metric flush interval.
    pub fn flush_interval(mut self, every: Duration) -> Self {
        self.flush_interval = every;
        self
    }

    /// Sets an observer for this host.
    pub fn observer(&mut self, observer: impl AsyncObserver + Send + Sync + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Returns the pub/sub bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Returns the metrics registry.
    pub fn metrics(&self) -> &Registry {
        &self.metrics
    }

    /// Returns the background-task manager.
    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// Returns the service registry.
    pub fn service(&self) -> &PumpService<Msg> {
        &self.service
    }

    /// Returns the service registry for registration.
    pub fn service_mut(&mut self) -> &mut PumpService<Msg> {
        &mut self.service
    }

    /// Starts building a pipeline wired to this host's bus and metrics.
    pub fn pipeline(&self, pipeline_id: &str) -> PipelineBuilder<Msg> {
        PipelineBuilder::new(self.bus.clone(), self.metrics.clone(), pipeline_id)
    }

    /// Returns a command handler to interact with the host once started.
    pub fn command_handler(&self) -> CommandHandler {
        CommandHandler::new(self.command_sender.clone())
    }

    /// Initializes the service and spawns the metrics flusher. Usable
    /// directly from an already-running runtime; `run` calls it.
    pub async fn start(&self) -> Result<(), Error> {
        self.service.initialize(&self.tasks).await?;
        self.spawn_metrics_flusher();
        Ok(())
    }

    /// Finalizes the service and shuts every background task down.
    pub async fn stop(&self) {
        self.service.finalize().await;
        self.tasks.shutdown().await;
    }

    /// Builds the runtime and drives the host until a `StopAll` command
    /// arrives.
    pub fn run(mut self) -> Result<(), Error> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Runtime { error: e.to_string() })?;

        rt.block_on(async move {
            self.start().await?;
            if let Some(observer) = &self.observer {
                observer.on_started().await;
            }

            if let Some(mut command_receiver) = self.command_receiver.take() {
                tracing::info!("ready to process the commands sent to the host");
                while let Some(command) = command_receiver.recv().await {
                    match command {
                        Command::StopAll => {
                            tracing::info!("received StopAll command");
                            break;
                        }
                    }
                }
            }

            self.stop().await;
            if let Some(observer) = &self.observer {
                observer.on_stopped().await;
            }
            tracing::info!("host run stopped");
            Ok(())
        })
    }

    /// Publishes `Application.Metrics.Flush!` for every metric on a
    /// fixed interval.
    fn spawn_metrics_flusher(&self) {
        let bus = self.bus.clone();
        let registry = self.metrics.clone();
        let every = self.flush_interval;

        let join_handle = tokio::task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            let _ = interval.tick().await;
            loop {
                let _ = interval.tick().await;
                for snapshot in registry.flush() {
                    bus.publish(
                        topics::METRICS_FLUSH,
                        BusEvent::MetricsFlush {
                            metric: snapshot.name,
                            tags: snapshot.tags,
                            values: snapshot.values,
                        },
                    );
                }
            }
        });
        self.tasks
            .register(join_handle, &TaskLabels::new("metrics", "flusher"));
    }
}
