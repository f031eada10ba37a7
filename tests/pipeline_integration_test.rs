use bus::Bus;
use metrics::Registry;
use pipeline::Pipeline;

use crate::{
    sources::ListSource,
    stages::{CharSplitter, CollectSink, ContextProbe, FailOnce, MapProcessor},
};

mod common;
mod sources;
mod stages;

/// A transforming processor between a list source and a collecting sink:
/// every event reaches the sink transformed, nothing is dropped.
#[tokio::test]
async fn transform_chain_delivers_everything() {
    common::init();

    let (sink, collected) = CollectSink::new("collector");
    let pipeline = Pipeline::builder(Bus::new(), Registry::new(), "doubling")
        .source(ListSource::new("list", vec![1i64, 2, 3]))
        .processor(MapProcessor::new("double", |n: i64| Some(n * 2)))
        .sink(sink)
        .build()
        .unwrap();
    pipeline.start();

    common::wait_until(|| collected.lock().unwrap().len() == 3).await;
    assert_eq!(*collected.lock().unwrap(), vec![2, 4, 6]);
    assert_eq!(pipeline.counter().get("event.in"), 3);
    assert_eq!(pipeline.counter().get("event.out"), 3);
    assert_eq!(pipeline.counter().get("event.drop"), 0);
    pipeline.stop().await;
}

/// A processor returning `None` drops the event: dropped events are
/// counted and never reach the sink.
#[tokio::test]
async fn dropping_processor_is_counted() {
    common::init();

    let (sink, collected) = CollectSink::new("collector");
    let pipeline = Pipeline::builder(Bus::new(), Registry::new(), "odd-only")
        .source(ListSource::new("list", vec![1i64, 2, 3]))
        .processor(MapProcessor::new(
            "drop-evens",
            |n: i64| if n % 2 == 0 { None } else { Some(n) },
        ))
        .sink(sink)
        .build()
        .unwrap();
    pipeline.start();

    common::wait_until(|| collected.lock().unwrap().len() == 2).await;
    assert_eq!(*collected.lock().unwrap(), vec![1, 3]);
    assert_eq!(pipeline.counter().get("event.in"), 3);
    assert_eq!(pipeline.counter().get("event.out"), 2);
    assert_eq!(pipeline.counter().get("event.drop"), 1);
    // Every event is accounted for.
    assert_eq!(
        pipeline.counter().get("event.in"),
        pipeline.counter().get("event.out") + pipeline.counter().get("event.drop")
    );
    pipeline.stop().await;
}

/// A generator multiplies events: sub-events are processed at the next
/// depth, each with an isolated copy of the context.
#[tokio::test]
async fn generator_expands_with_context_isolation() {
    common::init();

    let (probe, observed) = ContextProbe::new("probe");
    let (sink, collected) = CollectSink::new("collector");
    let pipeline = Pipeline::builder(Bus::new(), Registry::new(), "splitting")
        .source(ListSource::new(
            "list",
            vec!["ab".to_string(), "c".to_string()],
        ))
        .generator(CharSplitter::new("split"))
        .processor(probe)
        .sink(sink)
        .build()
        .unwrap();
    pipeline.start();

    common::wait_until(|| collected.lock().unwrap().len() == 3).await;
    assert_eq!(
        *collected.lock().unwrap(),
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
    assert_eq!(pipeline.counter().get("event.in"), 2);
    assert_eq!(pipeline.counter().get("event.out"), 3);

    // No sub-event saw a sibling's context mutation.
    assert_eq!(*observed.lock().unwrap(), vec![None, None, None]);
    pipeline.stop().await;
}

/// A hard processing error stops the pipeline; clearing it restores
/// readiness and restarts the source from scratch.
#[tokio::test]
async fn hard_error_blocks_until_cleared() {
    common::init();

    let source = ListSource::new("list", vec![1i64, 2, 3]);
    let runs = source.runs();
    let (sink, collected) = CollectSink::new("collector");
    let pipeline = Pipeline::builder(Bus::new(), Registry::new(), "recovering")
        .source(source)
        .processor(FailOnce::new("fail-on-2", 2i64))
        .sink(sink)
        .build()
        .unwrap();
    pipeline.start();

    // The first event passes, the second faults the pipeline.
    common::wait_until(|| pipeline.is_error()).await;
    assert!(!pipeline.is_ready());
    assert_eq!(*collected.lock().unwrap(), vec![1]);
    assert_eq!(pipeline.counter().get("event.in"), 2);
    assert_eq!(pipeline.counter().get("event.out"), 1);
    assert_eq!(pipeline.counter().get("error"), 1);

    let snapshot = pipeline.rest_get();
    assert_eq!(snapshot["Ready"], false);
    assert!(snapshot["Error"].as_str().unwrap().contains("poisoned"));
    assert!(snapshot.get("ErrorTimestamp").is_some());

    // Recovery: readiness is restored and the source replays its list.
    pipeline.clear_error();
    common::wait_until(|| pipeline.is_ready()).await;
    common::wait_until(|| collected.lock().unwrap().len() == 4).await;
    assert_eq!(*collected.lock().unwrap(), vec![1, 1, 2, 3]);
    assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 2);

    // in = 2 (first run) + 3 (replay); one event faulted.
    let event_in = pipeline.counter().get("event.in");
    let event_out = pipeline.counter().get("event.out");
    let event_drop = pipeline.counter().get("event.drop");
    assert_eq!(event_in, 5);
    assert_eq!(event_out + event_drop + 1, event_in);
    pipeline.stop().await;
}
