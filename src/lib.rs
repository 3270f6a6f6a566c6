//! Brickflow — embedded-device application framework
//!
//! Applications are composed from "bricks": small components that play the
//! role of source, processor or sink inside a staged, back-pressured
//! [`pipeline`], or that expose runnable methods supervised by the
//! [`AppController`]. A persistent MessagePack-RPC [`bridge`] connects the
//! application to a co-located microcontroller router over a Unix or TCP
//! stream socket.
//!
//! Features:
//! - Pipelines with bounded inter-stage queues and per-stage rate limiting
//! - Uniform handling of cooperative and blocking user bricks
//! - Graceful shutdown with sentinel propagation and bounded escalation
//! - Auto-reconnecting RPC client/server with handler re-registration
//! - Sliding-window buffering for streaming detection workloads

pub mod app;
pub mod bridge;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod window;

pub use app::{AppController, Brick};
pub use bridge::{Bridge, BridgeOptions, RpcError};
pub use config::AppConfig;
pub use error::{BrickflowError, Result};
pub use pipeline::brick::{
    processor_fn, sink_fn, source_fn, BlockingProcessor, BlockingSink, BlockingSource, Processor,
    Sink, Source,
};
pub use pipeline::{Pipeline, PipelineBuilder, StageOptions};
pub use window::SlidingWindowBuffer;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sets up structured logging with tracing. `RUST_LOG` takes precedence over
/// the provided default level. Calling this more than once is a no-op.
pub fn init_logging(default_level: &str, json_output: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
    };
    let _ = result;
}
