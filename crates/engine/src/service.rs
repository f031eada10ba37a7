//! The service registry: the process-wide directory of pipelines,
//! connections, and lookups.

use std::{collections::HashMap, sync::Arc};

use connection::Connection;
use lookup::Lookup;
use pipeline::{Pipeline, SourceHandle, StageRef};
use task::{labels::TaskLabels, TaskManager};

use crate::Error;

/// The result of resolving an address with [`PumpService::locate`].
pub enum Located<Msg: 'static + Clone + Send> {
    /// The address named a pipeline.
    Pipeline(Arc<Pipeline<Msg>>),
    /// The address named a source (`pipeline.*source`).
    Source(Arc<SourceHandle<Msg>>),
    /// The address named a chained stage (`pipeline.processor`).
    Processor(StageRef<Msg>),
}

/// The process-wide registry of pipelines, connections, and lookups.
///
/// The three namespaces are disjoint and reject duplicate ids. Startup
/// ordering is the registry's contract: every lookup completes its
/// initial load before any pipeline starts; shutdown stops every
/// pipeline concurrently.
pub struct PumpService<Msg: 'static + Clone + Send> {
    pipelines: HashMap<String, Arc<Pipeline<Msg>>>,
    connections: HashMap<String, Arc<dyn Connection>>,
    lookups: HashMap<String, Arc<dyn Lookup>>,
}

impl<Msg: 'static + Clone + Send> Default for PumpService<Msg> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Msg: 'static + Clone + Send> PumpService<Msg> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            pipelines: HashMap::new(),
            connections: HashMap::new(),
            lookups: HashMap::new(),
        }
    }

    /// Registers a pipeline. Duplicate ids are a hard error.
    pub fn add_pipeline(&mut self, pipeline: Arc<Pipeline<Msg>>) -> Result<(), Error> {
        let id = pipeline.id().to_string();
        if self.pipelines.contains_key(&id) {
            return Err(Error::DuplicatePipeline { pipeline: id });
        }
        let _ = self.pipelines.insert(id, pipeline);
        Ok(())
    }

    /// Registers a connection. Duplicate ids are a hard error.
    pub fn add_connection(&mut self, connection: Arc<dyn Connection>) -> Result<(), Error> {
        let id = connection.id().to_string();
        if self.connections.contains_key(&id) {
            return Err(Error::DuplicateConnection { connection: id });
        }
        let _ = self.connections.insert(id, connection);
        Ok(())
    }

    /// Registers a lookup. Duplicate ids are a hard error.
    pub fn add_lookup(&mut self, lookup: Arc<dyn Lookup>) -> Result<(), Error> {
        let id = lookup.id().to_string();
        if self.lookups.contains_key(&id) {
            return Err(Error::DuplicateLookup { lookup: id });
        }
        let _ = self.lookups.insert(id, lookup);
        Ok(())
    }

    /// Returns the pipeline registered under `pipeline_id`.
    pub fn pipeline(&self, pipeline_id: &str) -> Option<Arc<Pipeline<Msg>>> {
        self.pipelines.get(pipeline_id).cloned()
    }

    /// Returns the connection registered under `connection_id`.
    pub fn locate_connection(&self, connection_id: &str) -> Result<Arc<dyn Connection>, Error> {
        self.connections
            .get(connection_id)
            .cloned()
            .ok_or_else(|| Error::UnknownConnection {
                connection: connection_id.to_string(),
            })
    }

    /// Returns the lookup registered under `lookup_id`.
    pub fn locate_lookup(&self, lookup_id: &str) -> Result<Arc<dyn Lookup>, Error> {
        self.lookups
            .get(lookup_id)
            .cloned()
            .ok_or_else(|| Error::UnknownLookup {
                lookup: lookup_id.to_string(),
            })
    }

    /// Resolves an address of the form `pipeline`, `pipeline.processor`
    /// or `pipeline.*source` (the address splits on the first dot).
    pub fn locate(&self, address: &str) -> Option<Located<Msg>> {
        match address.split_once('.') {
            None => self.pipeline(address).map(Located::Pipeline),
            Some((pipeline_id, tail)) => {
                let pipeline = self.pipelines.get(pipeline_id)?;
                match tail.strip_prefix('*') {
                    Some(source_id) => pipeline.locate_source(source_id).map(Located::Source),
                    None => pipeline.locate_processor(tail).map(Located::Processor),
                }
            }
        }
    }

    /// Awaits the initial load of every lookup, schedules periodic
    /// lookup refreshes, then starts every pipeline.
    pub async fn initialize(&self, tasks: &TaskManager) -> Result<(), Error> {
        let loads = self.lookups.values().map(|registered| {
            let registered = registered.clone();
            async move {
                registered
                    .load()
                    .await
                    .map_err(|error| Error::Lookup {
                        lookup: registered.id().to_string(),
                        error: error.to_string(),
                    })
            }
        });
        let _ = futures::future::try_join_all(loads).await?;

        for (lookup_id, registered) in &self.lookups {
            if let Some(every) = registered.refresh_interval() {
                let registered = registered.clone();
                let lookup_id_owned = lookup_id.clone();
                let join_handle = tokio::task::spawn(async move {
                    loop {
                        tokio::time::sleep(every).await;
                        if let Err(error) = registered.load().await {
                            tracing::error!(lookup = %lookup_id_owned, %error, "lookup refresh failed");
                        }
                    }
                });
                tasks.register(join_handle, &TaskLabels::new("lookup", lookup_id));
            }
        }

        for pipeline in self.pipelines.values() {
            pipeline.start();
        }
        tracing::info!(
            pipeline_count = self.pipelines.len(),
            lookup_count = self.lookups.len(),
            "service started"
        );
        Ok(())
    }

    /// Stops every pipeline concurrently and awaits all of them.
    pub async fn finalize(&self) {
        let _: Vec<()> =
            futures::future::join_all(self.pipelines.values().map(|pipeline| pipeline.stop()))
                .await;
        tracing::info!("service stopped");
    }
}
