//! Per-pipeline log ring.
//!
//! Every pipeline keeps its last 50 log records for introspection.
//! Warning and error records additionally increment the pipeline's
//! `warning` / `error` counters.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use metrics::Counter;
use serde::Serialize;

/// Number of records retained by the ring.
pub const LOG_RING_CAPACITY: usize = 50;

/// Severity of a pipeline log record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    /// Informational record.
    Info,
    /// Warning record; counted by the pipeline `warning` counter.
    Warning,
    /// Error record; counted by the pipeline `error` counter.
    Error,
}

/// One record of the pipeline log ring.
#[derive(Clone, Debug, Serialize)]
pub struct LogRecord {
    /// Severity of the record.
    pub level: LogLevel,
    /// The logged message.
    pub message: String,
    /// RFC 3339 timestamp of the record.
    pub timestamp: String,
}

pub(crate) struct PipelineLog {
    pipeline_id: String,
    counter: Arc<Counter>,
    records: Mutex<VecDeque<LogRecord>>,
}

impl PipelineLog {
    pub(crate) fn new(pipeline_id: &str, counter: Arc<Counter>) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            counter,
            records: Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY)),
        }
    }

    pub(crate) fn record(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => {
                tracing::info!(pipeline = %self.pipeline_id, message = %message)
            }
            LogLevel::Warning => {
                self.counter.add("warning", 1);
                tracing::warn!(pipeline = %self.pipeline_id, message = %message)
            }
            LogLevel::Error => {
                self.counter.add("error", 1);
                tracing::error!(pipeline = %self.pipeline_id, message = %message)
            }
        }

        let mut records = self.records.lock().expect("pipeline log ring lock failed");
        if records.len() == LOG_RING_CAPACITY {
            let _ = records.pop_front();
        }
        records.push_back(LogRecord {
            level,
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }

    pub(crate) fn snapshot(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .expect("pipeline log ring lock failed")
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ring_is_bounded() {
        let registry = metrics::Registry::new();
        let counter = registry.create_counter("pump", Default::default(), &["warning", "error"]);
        let log = PipelineLog::new("p", counter.clone());

        for n in 0..(LOG_RING_CAPACITY + 10) {
            log.record(LogLevel::Info, &format!("record {}", n));
        }

        let records = log.snapshot();
        assert_eq!(records.len(), LOG_RING_CAPACITY);
        assert_eq!(records[0].message, "record 10");
    }

    #[test]
    fn test_levels_feed_counters() {
        let registry = metrics::Registry::new();
        let counter = registry.create_counter("pump", Default::default(), &["warning", "error"]);
        let log = PipelineLog::new("p", counter.clone());

        log.record(LogLevel::Info, "all fine");
        log.record(LogLevel::Warning, "be careful");
        log.record(LogLevel::Error, "it broke");
        log.record(LogLevel::Error, "again");

        assert_eq!(counter.get("warning"), 1);
        assert_eq!(counter.get("error"), 2);
    }
}
