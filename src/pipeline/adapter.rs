//! Brick adapters
//!
//! Adapters normalize the two flavors of every role (cooperative and
//! blocking) behind a single cooperative surface that the stage run loops
//! consume. Rate limiting is applied here, before the user method fires; for
//! blocking sources it fires on the emission side, before pulling from the
//! handoff channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::brick::{BlockingProcessor, BlockingSink, BlockingSource, Processor, Sink, Source};
use super::limiter::RateLimiter;
use super::task::Envelope;

/// Bound on waiting for a blocking source's producer thread during stop.
const PRODUCER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Strips the module path off a type name for stage-context logging.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

async fn offload<B, R>(brick: B, op: impl FnOnce(B) -> (B, R) + Send + 'static) -> (Option<B>, anyhow::Result<R>)
where
    B: Send + 'static,
    R: Send + 'static,
{
    match tokio::task::spawn_blocking(move || op(brick)).await {
        Ok((brick, result)) => (Some(brick), Ok(result)),
        Err(join_err) => (None, Err(anyhow!("blocking brick call panicked: {join_err}"))),
    }
}

// ============================================
// SOURCE ADAPTER
// ============================================

pub(crate) struct SourceAdapter<T> {
    flavor: SourceFlavor<T>,
    limiter: Option<RateLimiter>,
    name: String,
}

enum SourceFlavor<T> {
    Cooperative(Box<dyn Source<Item = T>>),
    Blocking(BlockingSourceState<T>),
}

struct BlockingSourceState<T> {
    brick: Arc<dyn BlockingSource<Item = T>>,
    handoff_tx: mpsc::Sender<Envelope<T>>,
    handoff_rx: mpsc::Receiver<Envelope<T>>,
    stop_flag: Arc<AtomicBool>,
    producer: Option<std::thread::JoinHandle<()>>,
}

/// Cancels a blocking source from outside the event loop: sets the stop flag
/// and injects the shutdown sentinel so a receiver blocked on the handoff
/// channel is released without waiting for the producer thread's next
/// iteration.
#[derive(Clone)]
pub(crate) struct UnblockHandle {
    inner: Arc<dyn Fn() + Send + Sync>,
}

impl UnblockHandle {
    pub(crate) fn unblock(&self) {
        (self.inner)();
    }
}

impl<T: Send + 'static> SourceAdapter<T> {
    pub(crate) fn cooperative(
        brick: impl Source<Item = T>,
        limiter: Option<RateLimiter>,
        name: String,
    ) -> Self {
        Self {
            flavor: SourceFlavor::Cooperative(Box::new(brick)),
            limiter,
            name,
        }
    }

    pub(crate) fn blocking(
        brick: impl BlockingSource<Item = T>,
        limiter: Option<RateLimiter>,
        name: String,
    ) -> (Self, UnblockHandle) {
        // Capacity-1 handoff between the producer thread and the event loop.
        let (handoff_tx, handoff_rx) = mpsc::channel(1);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop_flag = stop_flag.clone();
            let handoff_tx = handoff_tx.clone();
            let name = name.clone();
            UnblockHandle {
                inner: Arc::new(move || {
                    if !stop_flag.swap(true, Ordering::SeqCst) {
                        debug!(source = %name, "signaling stop and injecting sentinel");
                        if handoff_tx.try_send(Envelope::Shutdown).is_err() {
                            warn!(source = %name, "could not inject sentinel, handoff full");
                        }
                    } else {
                        debug!(source = %name, "stop already signaled");
                    }
                }),
            }
        };

        let adapter = Self {
            flavor: SourceFlavor::Blocking(BlockingSourceState {
                brick: Arc::new(brick),
                handoff_tx,
                handoff_rx,
                stop_flag,
                producer: None,
            }),
            limiter,
            name,
        };
        (adapter, handle)
    }

    pub(crate) async fn start(&mut self) -> anyhow::Result<()> {
        debug!(source = %self.name, "running start hook");
        match &mut self.flavor {
            SourceFlavor::Cooperative(brick) => brick.start().await,
            SourceFlavor::Blocking(state) => {
                let brick = state.brick.clone();
                tokio::task::spawn_blocking(move || brick.start())
                    .await
                    .map_err(|e| anyhow!("source start hook panicked: {e}"))??;

                let thread_alive = state
                    .producer
                    .as_ref()
                    .map(|h| !h.is_finished())
                    .unwrap_or(false);
                if !thread_alive {
                    // Restart hygiene: clear the stop flag and drain any
                    // leftovers from a previous run before spawning anew.
                    state.stop_flag.store(false, Ordering::SeqCst);
                    while state.handoff_rx.try_recv().is_ok() {}

                    let brick = state.brick.clone();
                    let tx = state.handoff_tx.clone();
                    let stop = state.stop_flag.clone();
                    let name = self.name.clone();
                    let thread = std::thread::Builder::new()
                        .name(format!("producer-{}", self.name))
                        .spawn(move || producer_loop(brick, tx, stop, name))?;
                    state.producer = Some(thread);
                    debug!(source = %self.name, "started producer thread");
                }
                Ok(())
            }
        }
    }

    pub(crate) async fn stop(&mut self) -> anyhow::Result<()> {
        debug!(source = %self.name, "running stop hook");
        match &mut self.flavor {
            SourceFlavor::Cooperative(brick) => brick.stop().await,
            SourceFlavor::Blocking(state) => {
                // Unblock first so the producer thread can observe the stop
                // flag, then give it a bounded window to exit.
                if !state.stop_flag.swap(true, Ordering::SeqCst) {
                    let _ = state.handoff_tx.try_send(Envelope::Shutdown);
                }
                if let Some(thread) = state.producer.take() {
                    let deadline = Instant::now() + PRODUCER_JOIN_TIMEOUT;
                    while !thread.is_finished() && Instant::now() < deadline {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    if thread.is_finished() {
                        let _ = thread.join();
                    } else {
                        warn!(source = %self.name, "producer thread did not exit in time");
                    }
                }

                let brick = state.brick.clone();
                tokio::task::spawn_blocking(move || brick.stop())
                    .await
                    .map_err(|e| anyhow!("source stop hook panicked: {e}"))?
            }
        }
    }

    /// Produces the next datum with rate limiting applied, translating the
    /// end-of-stream conditions of both flavors into `Ok(None)`.
    pub(crate) async fn produce(&mut self) -> anyhow::Result<Option<T>> {
        match &mut self.flavor {
            SourceFlavor::Cooperative(brick) => {
                if let Some(limiter) = &self.limiter {
                    limiter.acquire().await;
                }
                brick.produce().await
            }
            SourceFlavor::Blocking(state) => {
                let thread_alive = state
                    .producer
                    .as_ref()
                    .map(|h| !h.is_finished())
                    .unwrap_or(false);
                if state.stop_flag.load(Ordering::SeqCst) || !thread_alive {
                    debug!(source = %self.name, "producer thread not running");
                    return Ok(None);
                }

                // Rate limiting applies at emission time, before pulling the
                // datum out of the handoff channel.
                if let Some(limiter) = &self.limiter {
                    limiter.acquire().await;
                }

                match state.handoff_rx.recv().await {
                    None | Some(Envelope::Shutdown) => {
                        debug!(source = %self.name, "received sentinel from handoff");
                        Ok(None)
                    }
                    Some(Envelope::Item(item)) => Ok(Some(item)),
                }
            }
        }
    }
}

/// Target of the producer thread: transfers data from the blocking `produce`
/// into the handoff channel until stopped or the stream ends.
fn producer_loop<T: Send + 'static>(
    brick: Arc<dyn BlockingSource<Item = T>>,
    tx: mpsc::Sender<Envelope<T>>,
    stop: Arc<AtomicBool>,
    name: String,
) {
    while !stop.load(Ordering::SeqCst) {
        match brick.produce() {
            Ok(Some(item)) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if tx.blocking_send(Envelope::Item(item)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(source = %name, "blocking produce returned end of stream");
                let _ = tx.blocking_send(Envelope::Shutdown);
                break;
            }
            Err(e) => {
                error!(source = %name, error = %e, "error in producer thread");
                let _ = tx.blocking_send(Envelope::Shutdown);
                break;
            }
        }
    }
    // Leave a sentinel behind on every exit path.
    let _ = tx.try_send(Envelope::Shutdown);
    debug!(source = %name, "producer thread finished");
}

// ============================================
// PROCESSOR ADAPTER
// ============================================

pub(crate) struct ProcessorAdapter<I, O> {
    flavor: ProcessorFlavor<I, O>,
    limiter: Option<RateLimiter>,
    name: String,
}

enum ProcessorFlavor<I, O> {
    Cooperative(Box<dyn Processor<Input = I, Output = O>>),
    // The slot is empty only while a call is offloaded, or after the brick
    // was lost to a panic in the blocking pool.
    Blocking(Option<Box<dyn BlockingProcessor<Input = I, Output = O>>>),
}

impl<I: Send + 'static, O: Send + 'static> ProcessorAdapter<I, O> {
    pub(crate) fn cooperative(
        brick: impl Processor<Input = I, Output = O>,
        limiter: Option<RateLimiter>,
        name: String,
    ) -> Self {
        Self {
            flavor: ProcessorFlavor::Cooperative(Box::new(brick)),
            limiter,
            name,
        }
    }

    pub(crate) fn blocking(
        brick: impl BlockingProcessor<Input = I, Output = O>,
        limiter: Option<RateLimiter>,
        name: String,
    ) -> Self {
        Self {
            flavor: ProcessorFlavor::Blocking(Some(Box::new(brick))),
            limiter,
            name,
        }
    }

    pub(crate) async fn start(&mut self) -> anyhow::Result<()> {
        debug!(processor = %self.name, "running start hook");
        match &mut self.flavor {
            ProcessorFlavor::Cooperative(brick) => brick.start().await,
            ProcessorFlavor::Blocking(slot) => {
                let Some(brick) = slot.take() else {
                    return Err(anyhow!("processor brick unavailable"));
                };
                let (brick, result) = offload(brick, |mut b| {
                    let r = b.start();
                    (b, r)
                })
                .await;
                *slot = brick;
                result?
            }
        }
    }

    pub(crate) async fn stop(&mut self) -> anyhow::Result<()> {
        debug!(processor = %self.name, "running stop hook");
        match &mut self.flavor {
            ProcessorFlavor::Cooperative(brick) => brick.stop().await,
            ProcessorFlavor::Blocking(slot) => {
                let Some(brick) = slot.take() else {
                    warn!(processor = %self.name, "brick lost, skipping stop hook");
                    return Ok(());
                };
                let (brick, result) = offload(brick, |mut b| {
                    let r = b.stop();
                    (b, r)
                })
                .await;
                *slot = brick;
                result?
            }
        }
    }

    pub(crate) async fn process(&mut self, input: I) -> anyhow::Result<Option<O>> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        match &mut self.flavor {
            ProcessorFlavor::Cooperative(brick) => brick.process(input).await,
            ProcessorFlavor::Blocking(slot) => {
                let Some(brick) = slot.take() else {
                    return Err(anyhow!("processor brick unavailable"));
                };
                let (brick, result) = offload(brick, move |mut b| {
                    let r = b.process(input);
                    (b, r)
                })
                .await;
                *slot = brick;
                result?
            }
        }
    }
}

// ============================================
// SINK ADAPTER
// ============================================

pub(crate) struct SinkAdapter<T> {
    flavor: SinkFlavor<T>,
    limiter: Option<RateLimiter>,
    name: String,
}

enum SinkFlavor<T> {
    Cooperative(Box<dyn Sink<Item = T>>),
    Blocking(Option<Box<dyn BlockingSink<Item = T>>>),
}

impl<T: Send + 'static> SinkAdapter<T> {
    pub(crate) fn cooperative(
        brick: impl Sink<Item = T>,
        limiter: Option<RateLimiter>,
        name: String,
    ) -> Self {
        Self {
            flavor: SinkFlavor::Cooperative(Box::new(brick)),
            limiter,
            name,
        }
    }

    pub(crate) fn blocking(
        brick: impl BlockingSink<Item = T>,
        limiter: Option<RateLimiter>,
        name: String,
    ) -> Self {
        Self {
            flavor: SinkFlavor::Blocking(Some(Box::new(brick))),
            limiter,
            name,
        }
    }

    pub(crate) async fn start(&mut self) -> anyhow::Result<()> {
        debug!(sink = %self.name, "running start hook");
        match &mut self.flavor {
            SinkFlavor::Cooperative(brick) => brick.start().await,
            SinkFlavor::Blocking(slot) => {
                let Some(brick) = slot.take() else {
                    return Err(anyhow!("sink brick unavailable"));
                };
                let (brick, result) = offload(brick, |mut b| {
                    let r = b.start();
                    (b, r)
                })
                .await;
                *slot = brick;
                result?
            }
        }
    }

    pub(crate) async fn stop(&mut self) -> anyhow::Result<()> {
        debug!(sink = %self.name, "running stop hook");
        match &mut self.flavor {
            SinkFlavor::Cooperative(brick) => brick.stop().await,
            SinkFlavor::Blocking(slot) => {
                let Some(brick) = slot.take() else {
                    warn!(sink = %self.name, "brick lost, skipping stop hook");
                    return Ok(());
                };
                let (brick, result) = offload(brick, |mut b| {
                    let r = b.stop();
                    (b, r)
                })
                .await;
                *slot = brick;
                result?
            }
        }
    }

    pub(crate) async fn consume(&mut self, item: T) -> anyhow::Result<()> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        match &mut self.flavor {
            SinkFlavor::Cooperative(brick) => brick.consume(item).await,
            SinkFlavor::Blocking(slot) => {
                let Some(brick) = slot.take() else {
                    return Err(anyhow!("sink brick unavailable"));
                };
                let (brick, result) = offload(brick, move |mut b| {
                    let r = b.consume(item);
                    (b, r)
                })
                .await;
                *slot = brick;
                result?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::brick::{processor_fn, source_fn};

    #[tokio::test]
    async fn test_blocking_source_adapter_round_trip() {
        let mut items = vec![1, 2].into_iter();
        let (mut adapter, _handle) =
            SourceAdapter::blocking(source_fn(move || items.next()), None, "test".to_string());

        adapter.start().await.unwrap();

        assert_eq!(adapter.produce().await.unwrap(), Some(1));
        assert_eq!(adapter.produce().await.unwrap(), Some(2));
        assert_eq!(adapter.produce().await.unwrap(), None);

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unblock_releases_blocked_receiver() {
        // A source that never produces: the adapter would wait on the
        // handoff forever unless the sentinel is injected.
        let (mut adapter, handle) = SourceAdapter::blocking(
            source_fn(move || -> Option<i32> {
                std::thread::sleep(Duration::from_secs(3600));
                None
            }),
            None,
            "stuck".to_string(),
        );

        adapter.start().await.unwrap();
        handle.unblock();

        let produced = tokio::time::timeout(Duration::from_secs(1), adapter.produce())
            .await
            .expect("produce did not unblock");
        assert_eq!(produced.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blocking_processor_offload() {
        let mut adapter = ProcessorAdapter::blocking(
            processor_fn(|x: i32| Some(x + 1)),
            None,
            "incr".to_string(),
        );

        adapter.start().await.unwrap();
        assert_eq!(adapter.process(41).await.unwrap(), Some(42));
        adapter.stop().await.unwrap();
    }
}
