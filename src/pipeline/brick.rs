//! Role capability traits for pipeline bricks
//!
//! A brick plays one of three roles: source, processor, or sink. Each role
//! comes in a cooperative flavor (async methods, awaited directly on the
//! pipeline's event loop) and a blocking flavor (plain sync methods, run off
//! the loop). The `start`/`stop` hooks are optional in both flavors.
//!
//! Plain closures can be lifted into a role with [`source_fn`],
//! [`processor_fn`] and [`sink_fn`].

use std::marker::PhantomData;

use async_trait::async_trait;
use parking_lot::Mutex;

/// A cooperative source of data.
#[async_trait]
pub trait Source: Send + 'static {
    type Item: Send + 'static;

    async fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Produces the next datum. `Ok(None)` signals end of stream.
    async fn produce(&mut self) -> anyhow::Result<Option<Self::Item>>;
}

/// A synchronous source whose `produce` may block indefinitely.
///
/// Blocking sources run on a dedicated producer thread, so `produce` can sit
/// in a blocking read without stalling the pipeline's event loop. `stop` must
/// be callable while `produce` is still in flight on the producer thread,
/// hence the `&self` receiver and the `Sync` bound; implementations use
/// interior mutability for their state.
pub trait BlockingSource: Send + Sync + 'static {
    type Item: Send + 'static;

    fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Produces the next datum, possibly blocking. `Ok(None)` signals end of
    /// stream.
    fn produce(&self) -> anyhow::Result<Option<Self::Item>>;
}

/// A cooperative transformation stage.
#[async_trait]
pub trait Processor: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    async fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Transforms one datum. `Ok(None)` drops the item; downstream stages
    /// see the rest of the stream in the original order.
    async fn process(&mut self, input: Self::Input) -> anyhow::Result<Option<Self::Output>>;
}

/// A synchronous transformation stage, offloaded to the blocking pool.
pub trait BlockingProcessor: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn process(&mut self, input: Self::Input) -> anyhow::Result<Option<Self::Output>>;
}

/// A cooperative terminal stage.
#[async_trait]
pub trait Sink: Send + 'static {
    type Item: Send + 'static;

    async fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn consume(&mut self, item: Self::Item) -> anyhow::Result<()>;
}

/// A synchronous terminal stage, offloaded to the blocking pool.
pub trait BlockingSink: Send + 'static {
    type Item: Send + 'static;

    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn consume(&mut self, item: Self::Item) -> anyhow::Result<()>;
}

// ============================================
// FUNCTION LIFTERS
// ============================================

/// A closure lifted into a [`BlockingSource`].
pub struct FnSource<F> {
    f: Mutex<F>,
}

impl<T, F> BlockingSource for FnSource<F>
where
    T: Send + 'static,
    F: FnMut() -> Option<T> + Send + 'static,
{
    type Item = T;

    fn produce(&self) -> anyhow::Result<Option<T>> {
        let mut f = self.f.lock();
        Ok((*f)())
    }
}

/// Lifts a plain closure into a source. Returning `None` ends the stream.
///
/// Closures are treated like any other synchronous source: the pipeline
/// gives them a dedicated producer thread, so they are free to block.
pub fn source_fn<T, F>(f: F) -> FnSource<F>
where
    T: Send + 'static,
    F: FnMut() -> Option<T> + Send + 'static,
{
    FnSource { f: Mutex::new(f) }
}

/// A closure lifted into a [`BlockingProcessor`].
pub struct FnProcessor<F, I, O> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> BlockingProcessor for FnProcessor<F, I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> Option<O> + Send + 'static,
{
    type Input = I;
    type Output = O;

    fn process(&mut self, input: I) -> anyhow::Result<Option<O>> {
        Ok((self.f)(input))
    }
}

/// Lifts a plain closure into a processor. Returning `None` drops the item.
pub fn processor_fn<I, O, F>(f: F) -> FnProcessor<F, I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> Option<O> + Send + 'static,
{
    FnProcessor {
        f,
        _marker: PhantomData,
    }
}

/// A closure lifted into a [`BlockingSink`].
pub struct FnSink<F, T> {
    f: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> BlockingSink for FnSink<F, T>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    type Item = T;

    fn consume(&mut self, item: T) -> anyhow::Result<()> {
        (self.f)(item);
        Ok(())
    }
}

/// Lifts a plain closure into a sink.
pub fn sink_fn<T, F>(f: F) -> FnSink<F, T>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    FnSink {
        f,
        _marker: PhantomData,
    }
}
