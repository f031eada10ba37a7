#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use pipeline::{Source, SourceContext};

/// A source replaying a fixed list of events on every (re)start.
///
/// Rejected events are pushed again on the next start: the whole list is
/// replayed, which is what the recovery tests assert against.
pub struct ListSource<Msg: 'static + Clone + Send> {
    id: String,
    items: Vec<Msg>,
    runs: Arc<AtomicUsize>,
}

impl<Msg: 'static + Clone + Send> ListSource<Msg> {
    pub fn new(id: &str, items: Vec<Msg>) -> Self {
        Self {
            id: id.to_string(),
            items,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of how many times the source task ran.
    pub fn runs(&self) -> Arc<AtomicUsize> {
        self.runs.clone()
    }
}

#[async_trait]
impl<Msg: 'static + Clone + Send> Source<Msg> for ListSource<Msg> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn main(&mut self, context: &SourceContext<Msg>) -> Result<(), pipeline::Error> {
        let _ = self.runs.fetch_add(1, Ordering::SeqCst);
        for item in self.items.clone() {
            if let Err(error) = context.process(item).await {
                tracing::warn!(source = %self.id, %error, "event rejected");
            }
        }
        Ok(())
    }
}

/// A source pushing `count` numbered events as fast as the pipeline
/// accepts them.
pub struct BurstySource {
    id: String,
    count: u64,
}

impl BurstySource {
    pub fn new(id: &str, count: u64) -> Self {
        Self {
            id: id.to_string(),
            count,
        }
    }
}

#[async_trait]
impl Source<u64> for BurstySource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn main(&mut self, context: &SourceContext<u64>) -> Result<(), pipeline::Error> {
        for n in 0..self.count {
            context.process(n).await?;
        }
        Ok(())
    }
}
