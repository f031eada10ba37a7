//! In-process queue source for pipeline-to-pipeline composition.

use async_trait::async_trait;
use pipeline::{Source, SourceContext};
use processor::config::{mapping, StageConfig};
use serde_yaml::Mapping;

/// A source fed through an in-process FIFO queue.
///
/// The queue is unbounded by default (`queue_max_size: 0`); a positive
/// `queue_max_size` bounds it, making [`InternalSource::put_nowait`]
/// fail when the queue is full. The intake side is what
/// [`crate::TeeProcessor`] and other producers write into; the source
/// side awaits pipeline readiness and dequeues events into
/// `pipeline.process`.
pub struct InternalSource<Msg: 'static + Clone + Send> {
    id: String,
    intake: flume::Sender<Msg>,
    events: flume::Receiver<Msg>,
}

impl<Msg: 'static + Clone + Send> InternalSource<Msg> {
    /// Creates an internal source. See the type docs for the recognised
    /// configuration keys.
    pub fn new(id: &str, config: Option<Mapping>) -> Self {
        let config = StageConfig::new(mapping([("queue_max_size", 0i64)]), config);
        let queue_max_size = config.get_i64("queue_max_size").unwrap_or(0);
        let (intake, events) = if queue_max_size > 0 {
            flume::bounded(queue_max_size as usize)
        } else {
            flume::unbounded()
        };
        Self {
            id: id.to_string(),
            intake,
            events,
        }
    }

    /// Enqueues one event without waiting. Fails when the queue is
    /// bounded and full, or when the source is gone.
    pub fn put_nowait(&self, event: Msg) -> Result<(), pipeline::Error> {
        Self::send(&self.id, &self.intake, event)
    }

    /// Enqueues one event on an intake handle obtained from
    /// [`pipeline::SourceHandle::intake`].
    pub fn put_nowait_on(
        source_id: &str,
        intake: &flume::Sender<Msg>,
        event: Msg,
    ) -> Result<(), pipeline::Error> {
        Self::send(source_id, intake, event)
    }

    fn send(
        source_id: &str,
        intake: &flume::Sender<Msg>,
        event: Msg,
    ) -> Result<(), pipeline::Error> {
        intake.try_send(event).map_err(|error| pipeline::Error::Source {
            source_id: source_id.to_string(),
            error: match error {
                flume::TrySendError::Full(_) => "queue is full".to_string(),
                flume::TrySendError::Disconnected(_) => "queue is closed".to_string(),
            },
        })
    }
}

#[async_trait]
impl<Msg: 'static + Clone + Send> Source<Msg> for InternalSource<Msg> {
    fn id(&self) -> &str {
        &self.id
    }

    fn intake(&self) -> Option<flume::Sender<Msg>> {
        Some(self.intake.clone())
    }

    async fn main(&mut self, context: &SourceContext<Msg>) -> Result<(), pipeline::Error> {
        loop {
            context.pipeline().ready().await;
            match self.events.recv_async().await {
                // Every intake handle is gone, ours included only when
                // the source itself is dropped.
                Err(_) => return Ok(()),
                Ok(event) => {
                    if let Err(error) = context.process(event).await {
                        tracing::warn!(source = %self.id, %error, "internal source event rejected");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use metrics::Registry;
    use processor::{PumpControl, Sink};

    use super::*;

    struct KeepSink {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Sink<String> for KeepSink {
        fn id(&self) -> &str {
            "KeepSink"
        }

        fn consume(
            &mut self,
            _control: &dyn PumpControl,
            _context: &context::Context,
            event: String,
        ) -> Result<(), processor::Error> {
            self.seen.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_enqueued_events_flow_into_the_pipeline() {
        let source = InternalSource::new("internal", None);
        let intake = source.put_nowait("early".to_string());
        assert!(intake.is_ok());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = pipeline::Pipeline::builder(bus::Bus::new(), Registry::new(), "p")
            .source(source)
            .sink(KeepSink { seen: seen.clone() })
            .build()
            .unwrap();
        pipeline.start();

        let intake = pipeline.locate_source("internal").unwrap().intake().unwrap();
        InternalSource::put_nowait_on("internal", &intake, "late".to_string()).unwrap();

        for _ in 0..500 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec!["early", "late"]);
        pipeline.stop().await;
    }

    #[test]
    fn test_bounded_queue_rejects_when_full() {
        let source: InternalSource<String> =
            InternalSource::new("internal", Some(mapping([("queue_max_size", 1i64)])));
        source.put_nowait("one".to_string()).unwrap();
        assert!(source.put_nowait("two".to_string()).is_err());
    }
}
