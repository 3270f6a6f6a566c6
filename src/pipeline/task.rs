//! Stage tasks
//!
//! A stage task wraps one adapter into a supervised run loop wired to the
//! inter-stage channels. Every value travels inside an [`Envelope`]; the
//! `Shutdown` variant is the sentinel that ends a stage, and it is always the
//! last value a stage emits on its output, on every exit path including
//! cancellation and user errors.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::adapter::{ProcessorAdapter, SinkAdapter, SourceAdapter};

use std::sync::Arc;

/// Inter-stage message: a datum or the shutdown sentinel.
pub(crate) enum Envelope<T> {
    Item(T),
    Shutdown,
}

#[async_trait]
pub(crate) trait StageTask: Send {
    fn name(&self) -> &str;

    /// Runs the adapter's start hook (for blocking sources this also spawns
    /// the producer thread).
    async fn start(&mut self) -> anyhow::Result<()>;

    /// Launches the run loop on the current runtime.
    fn launch(&mut self, cancel: CancellationToken) -> JoinHandle<()>;

    /// Runs the adapter's stop hook. Called after the run loop has finished.
    async fn stop(&mut self) -> anyhow::Result<()>;
}

// ============================================
// SOURCE TASK
// ============================================

pub(crate) struct SourceTask<T> {
    name: String,
    adapter: Arc<Mutex<SourceAdapter<T>>>,
    output: Option<mpsc::Sender<Envelope<T>>>,
}

impl<T: Send + 'static> SourceTask<T> {
    pub(crate) fn new(
        name: String,
        adapter: SourceAdapter<T>,
        output: mpsc::Sender<Envelope<T>>,
    ) -> Self {
        Self {
            name,
            adapter: Arc::new(Mutex::new(adapter)),
            output: Some(output),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> StageTask for SourceTask<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        self.adapter.lock().await.start().await
    }

    fn launch(&mut self, cancel: CancellationToken) -> JoinHandle<()> {
        let Some(output) = self.output.take() else {
            error!(stage = %self.name, "source task launched twice");
            return tokio::spawn(async {});
        };
        let adapter = self.adapter.clone();
        let name = self.name.clone();
        tokio::spawn(source_run(name, adapter, output, cancel))
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.adapter.lock().await.stop().await
    }
}

async fn source_run<T: Send + 'static>(
    name: String,
    adapter: Arc<Mutex<SourceAdapter<T>>>,
    output: mpsc::Sender<Envelope<T>>,
    cancel: CancellationToken,
) {
    info!(stage = %name, "source run loop started");
    let mut adapter = adapter.lock().await;

    loop {
        let produced = tokio::select! {
            _ = cancel.cancelled() => {
                info!(stage = %name, "source task cancelled");
                break;
            }
            produced = adapter.produce() => produced,
        };

        match produced {
            Ok(Some(item)) => {
                let sent = tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(stage = %name, "source task cancelled while sending");
                        break;
                    }
                    sent = output.send(Envelope::Item(item)) => sent,
                };
                if sent.is_err() {
                    debug!(stage = %name, "downstream closed");
                    break;
                }
            }
            Ok(None) => {
                info!(stage = %name, "source signaled end of stream");
                break;
            }
            Err(e) => {
                error!(stage = %name, error = %e, "error in source task");
                break;
            }
        }
    }

    // Signal downstream on every exit path.
    if output.send(Envelope::Shutdown).await.is_err() {
        debug!(stage = %name, "downstream gone before shutdown signal");
    }
    info!(stage = %name, "source task finished");
}

// ============================================
// PROCESSOR TASK
// ============================================

pub(crate) struct ProcessorTask<I, O> {
    name: String,
    adapter: Arc<Mutex<ProcessorAdapter<I, O>>>,
    input: Option<mpsc::Receiver<Envelope<I>>>,
    output: Option<mpsc::Sender<Envelope<O>>>,
}

impl<I: Send + 'static, O: Send + 'static> ProcessorTask<I, O> {
    pub(crate) fn new(
        name: String,
        adapter: ProcessorAdapter<I, O>,
        input: mpsc::Receiver<Envelope<I>>,
        output: mpsc::Sender<Envelope<O>>,
    ) -> Self {
        Self {
            name,
            adapter: Arc::new(Mutex::new(adapter)),
            input: Some(input),
            output: Some(output),
        }
    }
}

#[async_trait]
impl<I: Send + 'static, O: Send + 'static> StageTask for ProcessorTask<I, O> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        self.adapter.lock().await.start().await
    }

    fn launch(&mut self, cancel: CancellationToken) -> JoinHandle<()> {
        let (Some(input), Some(output)) = (self.input.take(), self.output.take()) else {
            error!(stage = %self.name, "processor task launched twice");
            return tokio::spawn(async {});
        };
        let adapter = self.adapter.clone();
        let name = self.name.clone();
        tokio::spawn(processor_run(name, adapter, input, output, cancel))
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.adapter.lock().await.stop().await
    }
}

async fn processor_run<I: Send + 'static, O: Send + 'static>(
    name: String,
    adapter: Arc<Mutex<ProcessorAdapter<I, O>>>,
    mut input: mpsc::Receiver<Envelope<I>>,
    output: mpsc::Sender<Envelope<O>>,
    cancel: CancellationToken,
) {
    info!(stage = %name, "processor run loop started");
    let mut adapter = adapter.lock().await;

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => {
                info!(stage = %name, "processor task cancelled");
                break;
            }
            received = input.recv() => received,
        };

        let item = match received {
            None | Some(Envelope::Shutdown) => {
                debug!(stage = %name, "processor received sentinel");
                break;
            }
            Some(Envelope::Item(item)) => item,
        };

        let processed = tokio::select! {
            _ = cancel.cancelled() => {
                info!(stage = %name, "processor task cancelled mid-call");
                break;
            }
            processed = adapter.process(item) => processed,
        };

        match processed {
            Ok(Some(out)) => {
                let sent = tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(stage = %name, "processor task cancelled while sending");
                        break;
                    }
                    sent = output.send(Envelope::Item(out)) => sent,
                };
                if sent.is_err() {
                    debug!(stage = %name, "downstream closed");
                    break;
                }
            }
            Ok(None) => {
                debug!(stage = %name, "processor filtered item");
            }
            Err(e) => {
                error!(stage = %name, error = %e, "error processing item");
                break;
            }
        }
    }

    if output.send(Envelope::Shutdown).await.is_err() {
        debug!(stage = %name, "downstream gone before shutdown signal");
    }
    info!(stage = %name, "processor task finished");
}

// ============================================
// SINK TASK
// ============================================

pub(crate) struct SinkTask<T> {
    name: String,
    adapter: Arc<Mutex<SinkAdapter<T>>>,
    input: Option<mpsc::Receiver<Envelope<T>>>,
}

impl<T: Send + 'static> SinkTask<T> {
    pub(crate) fn new(
        name: String,
        adapter: SinkAdapter<T>,
        input: mpsc::Receiver<Envelope<T>>,
    ) -> Self {
        Self {
            name,
            adapter: Arc::new(Mutex::new(adapter)),
            input: Some(input),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> StageTask for SinkTask<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        self.adapter.lock().await.start().await
    }

    fn launch(&mut self, cancel: CancellationToken) -> JoinHandle<()> {
        let Some(input) = self.input.take() else {
            error!(stage = %self.name, "sink task launched twice");
            return tokio::spawn(async {});
        };
        let adapter = self.adapter.clone();
        let name = self.name.clone();
        tokio::spawn(sink_run(name, adapter, input, cancel))
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.adapter.lock().await.stop().await
    }
}

async fn sink_run<T: Send + 'static>(
    name: String,
    adapter: Arc<Mutex<SinkAdapter<T>>>,
    mut input: mpsc::Receiver<Envelope<T>>,
    cancel: CancellationToken,
) {
    info!(stage = %name, "sink run loop started");
    let mut adapter = adapter.lock().await;

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => {
                info!(stage = %name, "sink task cancelled");
                break;
            }
            received = input.recv() => received,
        };

        let item = match received {
            None | Some(Envelope::Shutdown) => {
                debug!(stage = %name, "sink received sentinel");
                break;
            }
            Some(Envelope::Item(item)) => item,
        };

        let consumed = tokio::select! {
            _ = cancel.cancelled() => {
                info!(stage = %name, "sink task cancelled mid-call");
                break;
            }
            consumed = adapter.consume(item) => consumed,
        };

        if let Err(e) = consumed {
            error!(stage = %name, error = %e, "error consuming item");
            break;
        }
    }

    info!(stage = %name, "sink task finished");
}
