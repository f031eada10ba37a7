#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use context::{Context, Value};
use processor::{Error, Generator, Processor, PumpControl, Sink, SubEvents};

/// A sink collecting every consumed event into a shared vector.
pub struct CollectSink<Msg: 'static + Clone + Send> {
    id: String,
    collected: Arc<Mutex<Vec<Msg>>>,
}

impl<Msg: 'static + Clone + Send> CollectSink<Msg> {
    pub fn new(id: &str) -> (Self, Arc<Mutex<Vec<Msg>>>) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                id: id.to_string(),
                collected: collected.clone(),
            },
            collected,
        )
    }
}

impl<Msg: 'static + Clone + Send> Sink<Msg> for CollectSink<Msg> {
    fn id(&self) -> &str {
        &self.id
    }

    fn consume(
        &mut self,
        _control: &dyn PumpControl,
        _context: &Context,
        event: Msg,
    ) -> Result<(), Error> {
        self.collected.lock().unwrap().push(event);
        Ok(())
    }
}

/// A processor applying a function to every event.
pub struct MapProcessor<Msg: 'static + Clone + Send> {
    id: String,
    map: Box<dyn Fn(Msg) -> Option<Msg> + Send>,
}

impl<Msg: 'static + Clone + Send> MapProcessor<Msg> {
    pub fn new(id: &str, map: impl Fn(Msg) -> Option<Msg> + Send + 'static) -> Self {
        Self {
            id: id.to_string(),
            map: Box::new(map),
        }
    }
}

impl<Msg: 'static + Clone + Send> Processor<Msg> for MapProcessor<Msg> {
    fn id(&self) -> &str {
        &self.id
    }

    fn process(
        &mut self,
        _control: &dyn PumpControl,
        _context: &mut Context,
        event: Msg,
    ) -> Result<Option<Msg>, Error> {
        Ok((self.map)(event))
    }
}

/// A generator expanding a string into one sub-event per character.
pub struct CharSplitter {
    id: String,
}

impl CharSplitter {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl Generator<String> for CharSplitter {
    fn id(&self) -> &str {
        &self.id
    }

    fn generate(
        &mut self,
        _control: &dyn PumpControl,
        _context: &mut Context,
        event: String,
    ) -> Result<SubEvents<String>, Error> {
        let chars: Vec<String> = event.chars().map(String::from).collect();
        Ok(Box::new(chars.into_iter()))
    }
}

/// A processor failing the first time it sees the marked event, passing
/// it on every later run.
pub struct FailOnce<Msg: 'static + Clone + Send + PartialEq> {
    id: String,
    needle: Msg,
    tripped: Arc<AtomicBool>,
}

impl<Msg: 'static + Clone + Send + PartialEq> FailOnce<Msg> {
    pub fn new(id: &str, needle: Msg) -> Self {
        Self {
            id: id.to_string(),
            needle,
            tripped: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<Msg: 'static + Clone + Send + PartialEq> Processor<Msg> for FailOnce<Msg> {
    fn id(&self) -> &str {
        &self.id
    }

    fn process(
        &mut self,
        _control: &dyn PumpControl,
        _context: &mut Context,
        event: Msg,
    ) -> Result<Option<Msg>, Error> {
        if event == self.needle && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(Error::stage(&self.id, "poisoned event"));
        }
        Ok(Some(event))
    }
}

/// A sink throttling its pipeline for the duration of every consume
/// call, and asserting its invocations never overlap.
pub struct ThrottlingSink {
    id: String,
    consuming: AtomicBool,
    consumed: Arc<AtomicUsize>,
}

impl ThrottlingSink {
    pub fn new(id: &str) -> (Self, Arc<AtomicUsize>) {
        let consumed = Arc::new(AtomicUsize::new(0));
        (
            Self {
                id: id.to_string(),
                consuming: AtomicBool::new(false),
                consumed: consumed.clone(),
            },
            consumed,
        )
    }
}

impl Sink<u64> for ThrottlingSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn consume(
        &mut self,
        control: &dyn PumpControl,
        _context: &Context,
        _event: u64,
    ) -> Result<(), Error> {
        control.throttle(&self.id, true);
        assert!(
            !self.consuming.swap(true, Ordering::SeqCst),
            "sink invocations overlapped"
        );
        let _ = self.consumed.fetch_add(1, Ordering::SeqCst);
        self.consuming.store(false, Ordering::SeqCst);
        control.throttle(&self.id, false);
        Ok(())
    }
}

/// A generator side stage recording the context value it observed before
/// tagging the context itself, to prove sub-event context isolation.
pub struct ContextProbe {
    id: String,
    observed: Arc<Mutex<Vec<Option<String>>>>,
}

impl ContextProbe {
    pub fn new(id: &str) -> (Self, Arc<Mutex<Vec<Option<String>>>>) {
        let observed = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                id: id.to_string(),
                observed: observed.clone(),
            },
            observed,
        )
    }
}

impl Processor<String> for ContextProbe {
    fn id(&self) -> &str {
        &self.id
    }

    fn process(
        &mut self,
        _control: &dyn PumpControl,
        context: &mut Context,
        event: String,
    ) -> Result<Option<String>, Error> {
        let seen = match context.get("probe") {
            Some(Value::String(sibling)) => Some(sibling.clone()),
            _ => None,
        };
        self.observed.lock().unwrap().push(seen);
        context.set("probe", Value::String(event.clone()));
        Ok(Some(event))
    }
}
