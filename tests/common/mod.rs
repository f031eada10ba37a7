#![allow(dead_code)]

use std::time::Duration;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initializes logs and traces. Safe to call from every test.
pub fn init() {
    let _ = color_eyre::install();

    let subscriber = FmtSubscriber::builder().with_max_level(Level::ERROR).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Polls `condition` until it holds or five seconds elapsed.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let started_at = std::time::Instant::now();
    while !condition() {
        if started_at.elapsed() > Duration::from_secs(5) {
            panic!("condition not reached within 5 seconds");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// An event owning its data, so cloning it is a deep copy.
///
/// Note: an event must be at the minimum 'static + Clone + Send.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub payload: String,
    pub tags: Vec<String>,
}

impl Message {
    pub fn new(payload: &str) -> Self {
        Self {
            payload: payload.to_string(),
            tags: Vec::new(),
        }
    }
}
