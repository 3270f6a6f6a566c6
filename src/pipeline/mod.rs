//! Staged, back-pressured dataflow pipelines
//!
//! A pipeline is an ordered chain of stages: one source, zero or more
//! processors, one sink. Stages are connected by bounded channels (capacity 1
//! by default), so a slow sink naturally throttles the source by blocking the
//! upstream send. The pipeline owns a cooperative event loop hosted on a
//! dedicated thread; user bricks that block are kept off that loop.
//!
//! Topology rules (source first, nothing after the sink, adjacent item types
//! match, at least two stages) are enforced by the builder's types at compile
//! time.

pub mod brick;
pub mod limiter;

mod adapter;
mod task;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{BrickflowError, Result};

use adapter::{short_type_name, ProcessorAdapter, SinkAdapter, SourceAdapter, UnblockHandle};
use brick::{BlockingProcessor, BlockingSink, BlockingSource, Processor, Sink, Source};
use limiter::RateLimiter;
use task::{Envelope, StageTask};

/// Default capacity of the inter-stage channels.
const DEFAULT_QUEUE_SIZE: usize = 1;
/// Bound on waiting for the event loop thread to come up.
const LOOP_READY_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on draining the stages after a stop request, before cancellation.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);
/// Caller-side bound on the whole stop sequence.
const STOP_TIMEOUT: Duration = Duration::from_secs(70);
/// Bound on joining the event loop thread.
const LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-stage options.
#[derive(Debug, Clone)]
pub struct StageOptions {
    /// Maximum emissions per second for this stage, applied before each user
    /// call. `None` disables rate limiting.
    pub rate_limit: Option<f64>,
    /// Capacity of the stage's output channel.
    pub queue_size: usize,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            rate_limit: None,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

impl StageOptions {
    fn build_limiter(&self) -> Result<Option<RateLimiter>> {
        self.rate_limit.map(RateLimiter::new).transpose()
    }

    fn channel<T>(&self) -> (mpsc::Sender<Envelope<T>>, mpsc::Receiver<Envelope<T>>) {
        mpsc::channel(self.queue_size.max(1))
    }
}

// ============================================
// BUILDER
// ============================================

/// Pipeline under construction whose current tail emits items of type `T`.
pub struct PipelineBuilder<T: Send + 'static> {
    stages: Vec<Box<dyn StageTask>>,
    tail: mpsc::Receiver<Envelope<T>>,
    unblock: Option<UnblockHandle>,
}

impl Pipeline {
    /// Starts a pipeline with a cooperative source.
    pub fn source<S: Source>(source: S) -> Result<PipelineBuilder<S::Item>> {
        Self::source_with(source, StageOptions::default())
    }

    pub fn source_with<S: Source>(
        source: S,
        options: StageOptions,
    ) -> Result<PipelineBuilder<S::Item>> {
        let name = short_type_name::<S>().to_string();
        let adapter = SourceAdapter::cooperative(source, options.build_limiter()?, name.clone());
        let (tx, rx) = options.channel();
        Ok(PipelineBuilder {
            stages: vec![Box::new(task::SourceTask::new(name, adapter, tx))],
            tail: rx,
            unblock: None,
        })
    }

    /// Starts a pipeline with a synchronous source that may block
    /// indefinitely. The source gets a dedicated producer thread.
    pub fn blocking_source<S: BlockingSource>(source: S) -> Result<PipelineBuilder<S::Item>> {
        Self::blocking_source_with(source, StageOptions::default())
    }

    pub fn blocking_source_with<S: BlockingSource>(
        source: S,
        options: StageOptions,
    ) -> Result<PipelineBuilder<S::Item>> {
        let name = short_type_name::<S>().to_string();
        let (adapter, unblock) =
            SourceAdapter::blocking(source, options.build_limiter()?, name.clone());
        let (tx, rx) = options.channel();
        Ok(PipelineBuilder {
            stages: vec![Box::new(task::SourceTask::new(name, adapter, tx))],
            tail: rx,
            unblock: Some(unblock),
        })
    }
}

impl<T: Send + 'static> PipelineBuilder<T> {
    pub fn processor<P>(self, processor: P) -> Result<PipelineBuilder<P::Output>>
    where
        P: Processor<Input = T>,
    {
        self.processor_with(processor, StageOptions::default())
    }

    pub fn processor_with<P>(
        self,
        processor: P,
        options: StageOptions,
    ) -> Result<PipelineBuilder<P::Output>>
    where
        P: Processor<Input = T>,
    {
        let name = short_type_name::<P>().to_string();
        let adapter = ProcessorAdapter::cooperative(processor, options.build_limiter()?, name.clone());
        self.push_processor(name, adapter, options)
    }

    pub fn blocking_processor<P>(self, processor: P) -> Result<PipelineBuilder<P::Output>>
    where
        P: BlockingProcessor<Input = T>,
    {
        self.blocking_processor_with(processor, StageOptions::default())
    }

    pub fn blocking_processor_with<P>(
        self,
        processor: P,
        options: StageOptions,
    ) -> Result<PipelineBuilder<P::Output>>
    where
        P: BlockingProcessor<Input = T>,
    {
        let name = short_type_name::<P>().to_string();
        let adapter = ProcessorAdapter::blocking(processor, options.build_limiter()?, name.clone());
        self.push_processor(name, adapter, options)
    }

    fn push_processor<O: Send + 'static>(
        mut self,
        name: String,
        adapter: ProcessorAdapter<T, O>,
        options: StageOptions,
    ) -> Result<PipelineBuilder<O>> {
        let (tx, rx) = options.channel();
        self.stages
            .push(Box::new(task::ProcessorTask::new(name, adapter, self.tail, tx)));
        Ok(PipelineBuilder {
            stages: self.stages,
            tail: rx,
            unblock: self.unblock,
        })
    }

    /// Terminates the pipeline with a cooperative sink.
    pub fn sink<K>(self, sink: K) -> Result<Pipeline>
    where
        K: Sink<Item = T>,
    {
        self.sink_with(sink, StageOptions::default())
    }

    pub fn sink_with<K>(self, sink: K, options: StageOptions) -> Result<Pipeline>
    where
        K: Sink<Item = T>,
    {
        let name = short_type_name::<K>().to_string();
        let adapter = SinkAdapter::cooperative(sink, options.build_limiter()?, name.clone());
        Ok(self.finish(name, adapter))
    }

    pub fn blocking_sink<K>(self, sink: K) -> Result<Pipeline>
    where
        K: BlockingSink<Item = T>,
    {
        self.blocking_sink_with(sink, StageOptions::default())
    }

    pub fn blocking_sink_with<K>(self, sink: K, options: StageOptions) -> Result<Pipeline>
    where
        K: BlockingSink<Item = T>,
    {
        let name = short_type_name::<K>().to_string();
        let adapter = SinkAdapter::blocking(sink, options.build_limiter()?, name.clone());
        Ok(self.finish(name, adapter))
    }

    fn finish(mut self, name: String, adapter: SinkAdapter<T>) -> Pipeline {
        self.stages
            .push(Box::new(task::SinkTask::new(name, adapter, self.tail)));
        Pipeline {
            stages: Some(self.stages),
            unblock: self.unblock,
            running: false,
            loop_thread: None,
            stop_notify: None,
            cancel: None,
            done_rx: None,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }
}

// ============================================
// PIPELINE
// ============================================

/// A fully built pipeline. Runs once: `start` hands the stages to a
/// dedicated event loop thread and `stop` coordinates the graceful shutdown.
pub struct Pipeline {
    stages: Option<Vec<Box<dyn StageTask>>>,
    unblock: Option<UnblockHandle>,
    running: bool,
    loop_thread: Option<std::thread::JoinHandle<()>>,
    stop_notify: Option<Arc<Notify>>,
    cancel: Option<CancellationToken>,
    done_rx: Option<std_mpsc::Receiver<()>>,
    terminated: Arc<AtomicBool>,
}

impl Pipeline {
    /// Starts the pipeline in a background thread hosting the event loop.
    /// Returns once the loop is up (bounded wait).
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            warn!("pipeline is already running");
            return Ok(());
        }
        let stages = self.stages.take().ok_or(BrickflowError::PipelineSpent)?;

        debug!("starting pipeline");
        let (ready_tx, ready_rx) = std_mpsc::channel::<std::io::Result<()>>();
        let (done_tx, done_rx) = std_mpsc::channel::<()>();
        let stop_notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let terminated = self.terminated.clone();

        let loop_notify = stop_notify.clone();
        let loop_cancel = cancel.clone();
        let thread = std::thread::Builder::new()
            .name("pipeline-loop".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                debug!("pipeline event loop started");

                runtime.block_on(run_pipeline(stages, loop_notify, loop_cancel));

                terminated.store(true, Ordering::SeqCst);
                let _ = done_tx.send(());
                debug!("pipeline event loop stopped");
            })?;

        match ready_rx.recv_timeout(LOOP_READY_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(BrickflowError::Io(e));
            }
            Err(_) => {
                // Loop failed to come up; try to tear it down.
                cancel.cancel();
                stop_notify.notify_one();
                return Err(BrickflowError::LoopStart);
            }
        }

        self.loop_thread = Some(thread);
        self.stop_notify = Some(stop_notify);
        self.cancel = Some(cancel);
        self.done_rx = Some(done_rx);
        self.running = true;
        debug!("pipeline started successfully");
        Ok(())
    }

    /// Stops the pipeline gracefully: unblocks the source, lets the stages
    /// drain, escalates to cancellation on timeout, and joins the loop
    /// thread. Per-stage cleanup always runs on the loop before it exits.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running {
            warn!("pipeline is not running or already stopped");
            return Ok(());
        }
        debug!("stopping pipeline");

        // Break a blocking source out of its read before anything else.
        if let Some(unblock) = &self.unblock {
            unblock.unblock();
        }
        if let Some(notify) = &self.stop_notify {
            notify.notify_one();
        }

        if let Some(done_rx) = &self.done_rx {
            match done_rx.recv_timeout(STOP_TIMEOUT) {
                Ok(()) => debug!("stop sequence completed"),
                Err(_) => {
                    warn!("timeout waiting for pipeline stop sequence, cancelling tasks");
                    if let Some(cancel) = &self.cancel {
                        cancel.cancel();
                    }
                    let _ = done_rx.recv_timeout(LOOP_JOIN_TIMEOUT);
                }
            }
        }

        if let Some(thread) = self.loop_thread.take() {
            let deadline = Instant::now() + LOOP_JOIN_TIMEOUT;
            while !thread.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if thread.is_finished() {
                let _ = thread.join();
            } else {
                warn!("pipeline event loop thread did not terminate cleanly");
            }
        }

        self.running = false;
        self.stop_notify = None;
        self.cancel = None;
        self.done_rx = None;
        debug!("pipeline stopped");
        Ok(())
    }

    /// True once every stage task has finished and cleanup has run.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for the pipeline to terminate on its own (for
    /// example because the source signaled end of stream).
    pub fn wait_terminated(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_terminated() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        true
    }
}

/// The main async logic, run to completion on the loop thread.
async fn run_pipeline(
    mut stages: Vec<Box<dyn StageTask>>,
    stop_notify: Arc<Notify>,
    cancel: CancellationToken,
) {
    // Start the stages in order: each adapter's start hook is awaited, then
    // its run task is launched.
    let mut handles = Vec::with_capacity(stages.len());
    let mut start_failed = false;
    for stage in stages.iter_mut() {
        match stage.start().await {
            Ok(()) => handles.push(stage.launch(cancel.clone())),
            Err(e) => {
                error!(stage = %stage.name(), error = %e, "failed to start stage");
                start_failed = true;
                break;
            }
        }
    }

    if start_failed {
        cancel.cancel();
        let _ = join_all(handles).await;
        cleanup(&mut stages).await;
        return;
    }
    debug!(stages = stages.len(), "all stage tasks launched");

    let gather = join_all(handles);
    tokio::pin!(gather);

    tokio::select! {
        results = &mut gather => {
            debug!("pipeline run completed normally, all tasks finished");
            log_join_results(results);
        }
        _ = stop_notify.notified() => {
            debug!("stop requested, waiting for stages to drain");
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut gather).await {
                Ok(results) => {
                    debug!("stages drained after stop request");
                    log_join_results(results);
                }
                Err(_) => {
                    warn!("stages did not drain within timeout, cancelling remaining tasks");
                    cancel.cancel();
                    log_join_results(gather.await);
                }
            }
        }
    }

    cleanup(&mut stages).await;
}

/// Final cleanup: every stage's stop hook is attempted in registration
/// order; failures are logged so the remaining stages still get their turn.
async fn cleanup(stages: &mut [Box<dyn StageTask>]) {
    debug!("entering final cleanup phase for all stages");
    for stage in stages.iter_mut() {
        if let Err(e) = stage.stop().await {
            error!(stage = %stage.name(), error = %e, "error while stopping stage");
        }
    }
    debug!("final cleanup phase completed");
}

fn log_join_results(results: Vec<std::result::Result<(), tokio::task::JoinError>>) {
    for result in results {
        if let Err(e) = result {
            if e.is_panic() {
                error!(error = %e, "stage task panicked");
            }
        }
    }
}
