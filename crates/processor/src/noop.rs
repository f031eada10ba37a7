//! Trivial built-in stages.

use context::Context;

use crate::{Error, Processor, PumpControl, Sink};

/// A processor that passes every event through unchanged.
pub struct NoopProcessor {
    id: String,
}

impl NoopProcessor {
    /// Creates a new no-op processor.
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl Default for NoopProcessor {
    fn default() -> Self {
        Self::new("NoopProcessor")
    }
}

impl<Msg: 'static + Clone + Send> Processor<Msg> for NoopProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    fn process(
        &mut self,
        _control: &dyn PumpControl,
        _context: &mut Context,
        event: Msg,
    ) -> Result<Option<Msg>, Error> {
        Ok(Some(event))
    }
}

/// A sink that discards every event.
pub struct NullSink {
    id: String,
}

impl NullSink {
    /// Creates a new null sink.
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new("NullSink")
    }
}

impl<Msg: 'static + Clone + Send> Sink<Msg> for NullSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn consume(
        &mut self,
        _control: &dyn PumpControl,
        _context: &Context,
        _event: Msg,
    ) -> Result<(), Error> {
        Ok(())
    }
}
