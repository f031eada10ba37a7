//! Tee processor: copies every event to an internal source of another
//! pipeline and passes the original through unchanged.

use context::Context;
use processor::{Error, Processor, PumpControl};

use crate::internal::InternalSource;

/// A processor forwarding a copy of each event to a named internal
/// source, typically located through the service registry
/// (`service.locate("other.*internal")` → `SourceHandle::intake`).
///
/// The copy is a deep copy in the sense of `Clone`: events own their
/// data, so mutating the original afterwards does not affect the copy.
pub struct TeeProcessor<Msg: 'static + Clone + Send> {
    id: String,
    target_id: String,
    target: flume::Sender<Msg>,
}

impl<Msg: 'static + Clone + Send> TeeProcessor<Msg> {
    /// Creates a tee forwarding into the given intake. `target_id` names
    /// the target source in log records.
    pub fn new(id: &str, target_id: &str, target: flume::Sender<Msg>) -> Self {
        Self {
            id: id.to_string(),
            target_id: target_id.to_string(),
            target,
        }
    }
}

impl<Msg: 'static + Clone + Send> Processor<Msg> for TeeProcessor<Msg> {
    fn id(&self) -> &str {
        &self.id
    }

    fn process(
        &mut self,
        control: &dyn PumpControl,
        _context: &mut Context,
        event: Msg,
    ) -> Result<Option<Msg>, Error> {
        if let Err(error) = InternalSource::put_nowait_on(&self.target_id, &self.target, event.clone()) {
            // The original still flows on; losing the copy is the
            // target pipeline's backlog problem, not this pipeline's.
            control.warn(&format!(
                "tee '{}' cannot forward to '{}': {}",
                self.id, self.target_id, error
            ));
        }
        Ok(Some(event))
    }
}
