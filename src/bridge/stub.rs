//! Ergonomic method stubs
//!
//! Stubs bind a method name (and optionally a default timeout) to a bridge
//! reference, so call sites read like local functions. Arguments are passed
//! positionally as a tuple.
//!
//! ```no_run
//! use brickflow::bridge::Bridge;
//!
//! let bridge = Bridge::from_env()?;
//! let set_led = bridge.notifier("set_led");
//! set_led.send(("green", true));
//!
//! let get_temperature = bridge.caller("get_temperature");
//! let celsius: f64 = get_temperature.invoke(("sensor1",))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Bridge, RpcError};

impl Bridge {
    /// Builds a request/response stub for `method`, using this bridge's
    /// default call timeout unless overridden with [`Caller::timeout`].
    pub fn caller(&self, method: &str) -> Caller {
        Caller {
            bridge: self.clone(),
            method: method.to_string(),
            timeout: self.inner.call_timeout,
        }
    }

    /// Builds a fire-and-forget stub for `method`.
    pub fn notifier(&self, method: &str) -> Notifier {
        Notifier {
            bridge: self.clone(),
            method: method.to_string(),
        }
    }
}

/// A bound request/response method.
#[derive(Clone)]
pub struct Caller {
    bridge: Bridge,
    method: String,
    timeout: Duration,
}

impl Caller {
    /// Sets the default timeout for this stub.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Invokes the remote method with positional `params` and deserializes
    /// the result.
    pub fn invoke<P, R>(&self, params: P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.invoke_with_timeout(params, self.timeout)
    }

    /// Invokes the remote method with a one-off timeout override.
    pub fn invoke_with_timeout<P, R>(&self, params: P, timeout: Duration) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let value = self
            .bridge
            .call_with_timeout(&self.method, params, timeout)?;
        serde_json::from_value(value).map_err(|e| RpcError::Codec(e.to_string()))
    }
}

/// A bound fire-and-forget method.
#[derive(Clone)]
pub struct Notifier {
    bridge: Bridge,
    method: String,
}

impl Notifier {
    /// Sends the notification with positional `params`.
    pub fn send<P: Serialize>(&self, params: P) {
        self.bridge.notify(&self.method, params);
    }
}
