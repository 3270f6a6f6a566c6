//! Integration tests for the pipeline runtime
//!
//! Pipelines own their event loop thread, so these tests drive the blocking
//! public API from plain test functions and observe effects through shared
//! state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use brickflow::pipeline::StageOptions;
use brickflow::{processor_fn, sink_fn, source_fn, BlockingSource, Pipeline};

fn collecting_sink<T: Send + 'static>(
    into: Arc<Mutex<Vec<T>>>,
) -> impl FnMut(T) + Send + 'static {
    move |item| into.lock().unwrap().push(item)
}

#[test]
fn test_source_processor_sink_basics() {
    let mut items = vec![1i64, 2, 3].into_iter();
    let output = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = Pipeline::blocking_source(source_fn(move || items.next()))
        .unwrap()
        .blocking_processor(processor_fn(|x: i64| Some(x * 2)))
        .unwrap()
        .blocking_sink(sink_fn(collecting_sink(output.clone())))
        .unwrap();

    pipeline.start().unwrap();
    assert!(
        pipeline.wait_terminated(Duration::from_secs(5)),
        "pipeline did not finish after the source ran dry"
    );
    pipeline.stop().unwrap();

    assert_eq!(*output.lock().unwrap(), vec![2, 4, 6]);
    assert!(pipeline.is_terminated());
}

#[test]
fn test_processor_drop_semantics() {
    let mut items = vec![1i64, 2, 3, 4].into_iter();
    let output = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = Pipeline::blocking_source(source_fn(move || items.next()))
        .unwrap()
        .blocking_processor(processor_fn(|x: i64| if x % 2 == 0 { None } else { Some(x) }))
        .unwrap()
        .blocking_sink(sink_fn(collecting_sink(output.clone())))
        .unwrap();

    pipeline.start().unwrap();
    assert!(pipeline.wait_terminated(Duration::from_secs(5)));
    pipeline.stop().unwrap();

    assert_eq!(*output.lock().unwrap(), vec![1, 3]);
}

#[test]
fn test_order_preserved_end_to_end() {
    let mut items = (0..100i64).collect::<Vec<_>>().into_iter();
    let output = Arc::new(Mutex::new(Vec::new()));

    let mut pipeline = Pipeline::blocking_source(source_fn(move || items.next()))
        .unwrap()
        .blocking_processor(processor_fn(|x: i64| Some(x)))
        .unwrap()
        .blocking_sink(sink_fn(collecting_sink(output.clone())))
        .unwrap();

    pipeline.start().unwrap();
    assert!(pipeline.wait_terminated(Duration::from_secs(5)));
    pipeline.stop().unwrap();

    assert_eq!(*output.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_backpressure_throttles_source() {
    // The sink takes 50ms per item and every queue holds one item, so in one
    // second the source cannot race ahead: roughly 20 items are consumed and
    // each hop (producer thread, handoff slot, source task, stage queue,
    // sink) can hold at most one more.
    let emitted = Arc::new(AtomicUsize::new(0));
    let counter = emitted.clone();

    let source = source_fn(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Some(0u8)
    });
    let sink = sink_fn(|_: u8| std::thread::sleep(Duration::from_millis(50)));

    let mut pipeline = Pipeline::blocking_source(source)
        .unwrap()
        .blocking_sink(sink)
        .unwrap();

    pipeline.start().unwrap();
    std::thread::sleep(Duration::from_secs(1));
    pipeline.stop().unwrap();

    let count = emitted.load(Ordering::SeqCst);
    assert!(count >= 5, "source made no progress: {count} emissions");
    assert!(count <= 27, "backpressure failed: {count} emissions in 1s");
}

#[test]
fn test_rate_limited_source() {
    let emitted = Arc::new(AtomicUsize::new(0));
    let counter = emitted.clone();

    let source = source_fn(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Some(0u8)
    });

    let mut pipeline = Pipeline::blocking_source_with(
        source,
        StageOptions {
            rate_limit: Some(10.0),
            ..StageOptions::default()
        },
    )
    .unwrap()
    .blocking_sink(sink_fn(|_: u8| {}))
    .unwrap();

    pipeline.start().unwrap();
    std::thread::sleep(Duration::from_secs(1));
    pipeline.stop().unwrap();

    // At 10/s the emission side pulls at most ~11 items in a second; the
    // producer thread runs at most two ahead (the handoff slot plus the send
    // it is blocked in).
    let count = emitted.load(Ordering::SeqCst);
    assert!(count <= 16, "rate limiter ineffective: {count} emissions in 1s");
}

/// A source whose `produce` blocks until `stop` releases it, the shape of a
/// microphone or socket read that can only be interrupted externally.
struct ForeverBlockingSource {
    data: Mutex<mpsc::Receiver<u8>>,
    release: Mutex<Option<mpsc::Sender<u8>>>,
}

impl ForeverBlockingSource {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            data: Mutex::new(rx),
            release: Mutex::new(Some(tx)),
        }
    }
}

impl BlockingSource for ForeverBlockingSource {
    type Item = u8;

    fn produce(&self) -> anyhow::Result<Option<u8>> {
        match self.data.lock().unwrap().recv() {
            Ok(item) => Ok(Some(item)),
            Err(_) => Ok(None),
        }
    }

    fn stop(&self) -> anyhow::Result<()> {
        self.release.lock().unwrap().take();
        Ok(())
    }
}

#[test]
fn test_graceful_stop_with_blocked_source() {
    let consumed = Arc::new(AtomicUsize::new(0));
    let counter = consumed.clone();

    let mut pipeline = Pipeline::blocking_source(ForeverBlockingSource::new())
        .unwrap()
        .blocking_sink(sink_fn(move |_: u8| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    pipeline.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let stop_started = Instant::now();
    pipeline.stop().unwrap();
    let stop_elapsed = stop_started.elapsed();

    assert!(
        stop_elapsed < Duration::from_secs(2),
        "stop took {stop_elapsed:?}"
    );
    assert!(pipeline.is_terminated());
    assert_eq!(consumed.load(Ordering::SeqCst), 0);
}

/// Emits two items, then fails. The error must terminate only the source
/// stage and let the shutdown sentinel drain through the rest.
struct FlakySource {
    produced: Mutex<i64>,
}

impl BlockingSource for FlakySource {
    type Item = i64;

    fn produce(&self) -> anyhow::Result<Option<i64>> {
        let mut produced = self.produced.lock().unwrap();
        *produced += 1;
        if *produced <= 2 {
            Ok(Some(*produced))
        } else {
            anyhow::bail!("sensor went away")
        }
    }
}

#[test]
fn test_source_error_terminates_stage_not_process() {
    let output = Arc::new(Mutex::new(Vec::new()));

    let source = FlakySource {
        produced: Mutex::new(0),
    };

    let mut pipeline = Pipeline::blocking_source(source)
        .unwrap()
        .blocking_sink(sink_fn(collecting_sink(output.clone())))
        .unwrap();

    pipeline.start().unwrap();
    assert!(
        pipeline.wait_terminated(Duration::from_secs(5)),
        "source error did not shut the pipeline down"
    );
    pipeline.stop().unwrap();

    // Items emitted before the failure were delivered, then the shutdown
    // sentinel propagated.
    assert_eq!(*output.lock().unwrap(), vec![1, 2]);
}

#[test]
fn test_rejects_invalid_rate_limit() {
    let result = Pipeline::blocking_source_with(
        source_fn(|| Some(1u8)),
        StageOptions {
            rate_limit: Some(0.0),
            ..StageOptions::default()
        },
    );
    assert!(result.is_err());
}

#[test]
fn test_stop_before_start_and_double_stop_are_harmless() {
    let mut items = vec![1u8].into_iter();
    let mut pipeline = Pipeline::blocking_source(source_fn(move || items.next()))
        .unwrap()
        .blocking_sink(sink_fn(|_: u8| {}))
        .unwrap();

    pipeline.stop().unwrap();
    pipeline.start().unwrap();
    assert!(pipeline.wait_terminated(Duration::from_secs(5)));
    pipeline.stop().unwrap();
    pipeline.stop().unwrap();
}
