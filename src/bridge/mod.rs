//! MessagePack-RPC bridge to a co-located router
//!
//! The bridge keeps a persistent, auto-reconnecting stream connection to a
//! single peer (Unix or TCP socket) and speaks the MessagePack-RPC subset:
//! request/response with timeouts and best-effort cancellation,
//! fire-and-forget notifications, and locally-hosted handlers that are
//! re-registered with the router after every reconnect.
//!
//! The bridge runs on two background threads: a connection manager that owns
//! the reconnect state machine, and a read loop that decodes frames and
//! dispatches them. Outgoing writes happen on the caller's thread, serialized
//! by the connection mutex.

pub mod frame;
mod stub;

pub use stub::{Caller, Notifier};

use std::collections::HashMap;
use std::io::{Read, Write};
use std::mem::MaybeUninit;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use socket2::SockRef;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::{BrickflowError, Result};

use frame::{
    encode_notification, encode_request, encode_response, params_to_array, parse_frame, Frame,
    FrameDecoder, RemoteError, FUNCTION_NOT_FOUND_ERR, GENERIC_ERR, MALFORMED_CALL_ERR,
    ROUTE_ALREADY_EXISTS_ERR,
};

/// Default peer address, overridable with the `APP_SOCKET` environment
/// variable through [`Bridge::from_env`].
pub const DEFAULT_ADDRESS: &str = "unix:///var/run/arduino-router.sock";

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 4096;

/// Errors surfaced by bridge operations.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("method not found: {0}")]
    NotFound(String),

    #[error("malformed call: {0}")]
    Malformed(String),

    #[error("remote error {code:#04x}: {message}")]
    Remote { code: u8, message: String },

    #[error("not connected to router")]
    Disconnected,

    #[error("connection to router lost")]
    ConnectionLost,

    #[error("codec failure: {0}")]
    Codec(String),
}

impl RpcError {
    fn wire_code(&self) -> u8 {
        match self {
            RpcError::NotFound(_) => FUNCTION_NOT_FOUND_ERR,
            RpcError::Malformed(_) => MALFORMED_CALL_ERR,
            _ => GENERIC_ERR,
        }
    }
}

fn error_from_remote(error: RemoteError) -> RpcError {
    match error.code {
        FUNCTION_NOT_FOUND_ERR => RpcError::NotFound(error.message),
        MALFORMED_CALL_ERR => RpcError::Malformed(error.message),
        code => RpcError::Remote {
            code,
            message: error.message,
        },
    }
}

/// A locally-hosted method callable by the peer.
pub type Handler = Arc<dyn Fn(&[Value]) -> std::result::Result<Value, RpcError> + Send + Sync>;

/// Tuning knobs for a bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub reconnect_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

// ============================================
// PEER ADDRESS
// ============================================

#[derive(Debug, Clone)]
enum PeerAddr {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

fn parse_address(address: &str) -> Result<PeerAddr> {
    let url = url::Url::parse(address)
        .map_err(|_| BrickflowError::InvalidAddress(address.to_string()))?;
    match url.scheme() {
        "unix" => {
            let path = url.path();
            if path.is_empty() {
                return Err(BrickflowError::InvalidAddress(address.to_string()));
            }
            Ok(PeerAddr::Unix(PathBuf::from(path)))
        }
        "tcp" => {
            let host = url
                .host_str()
                .ok_or_else(|| BrickflowError::InvalidAddress(address.to_string()))?;
            let port = url
                .port()
                .ok_or_else(|| BrickflowError::InvalidAddress(address.to_string()))?;
            Ok(PeerAddr::Tcp {
                host: host.to_string(),
                port,
            })
        }
        _ => Err(BrickflowError::InvalidAddress(address.to_string())),
    }
}

// ============================================
// CONNECTION
// ============================================

enum Conn {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Conn {
    fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Conn::Unix(stream) => (&*stream).write_all(bytes),
            Conn::Tcp(stream) => (&*stream).write_all(bytes),
        }
    }

    fn try_clone(&self) -> std::io::Result<Conn> {
        Ok(match self {
            Conn::Unix(stream) => Conn::Unix(stream.try_clone()?),
            Conn::Tcp(stream) => Conn::Tcp(stream.try_clone()?),
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Conn::Unix(stream) => stream.read(buf),
            Conn::Tcp(stream) => stream.read(buf),
        }
    }

    fn sock_ref(&self) -> SockRef<'_> {
        match self {
            Conn::Unix(stream) => SockRef::from(stream),
            Conn::Tcp(stream) => SockRef::from(stream),
        }
    }

    fn shutdown(&self) {
        let _ = match self {
            Conn::Unix(stream) => stream.shutdown(Shutdown::Both),
            Conn::Tcp(stream) => stream.shutdown(Shutdown::Both),
        };
    }
}

/// Connected flag with a condvar so senders can wait for the manager to
/// restore the link. Only the connection manager writes it.
struct ConnectedFlag {
    state: Mutex<bool>,
    changed: Condvar,
}

impl ConnectedFlag {
    fn new() -> Self {
        Self {
            state: Mutex::new(false),
            changed: Condvar::new(),
        }
    }

    fn set(&self, connected: bool) {
        let mut state = self.state.lock();
        *state = connected;
        if connected {
            self.changed.notify_all();
        }
    }

    fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if *state {
            return true;
        }
        self.changed.wait_for(&mut state, timeout);
        *state
    }
}

type CallOutcome = std::result::Result<Value, RpcError>;

/// Message-id counter and pending-call table behind one lock, so allocating
/// an id and registering its callback is a single atomic step.
struct CallTable {
    next_msgid: u32,
    pending: HashMap<u32, SyncSender<CallOutcome>>,
}

impl CallTable {
    /// Allocates the next id, skipping any id still awaiting its response.
    fn alloc(&mut self) -> u32 {
        loop {
            self.next_msgid = self.next_msgid.wrapping_add(1);
            if !self.pending.contains_key(&self.next_msgid) {
                return self.next_msgid;
            }
        }
    }
}

// ============================================
// BRIDGE
// ============================================

struct Inner {
    display_addr: String,
    peer: PeerAddr,
    reconnect_delay: Duration,
    call_timeout: Duration,
    calls: Mutex<CallTable>,
    handlers: RwLock<HashMap<String, Handler>>,
    conn: Mutex<Option<Conn>>,
    connected: ConnectedFlag,
}

/// Handle to a bridge instance. Cheap to clone; all clones share the same
/// connection and handler registry.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

static SHARED: Lazy<Mutex<HashMap<String, Bridge>>> = Lazy::new(|| Mutex::new(HashMap::new()));

impl Bridge {
    /// Creates a bridge bound to `address` (`unix:///path` or
    /// `tcp://host:port`) and spawns its connection manager. The first
    /// connection is established in the background.
    pub fn new(address: &str) -> Result<Bridge> {
        Self::with_options(address, BridgeOptions::default())
    }

    pub fn with_options(address: &str, options: BridgeOptions) -> Result<Bridge> {
        let peer = parse_address(address)?;
        let inner = Arc::new(Inner {
            display_addr: address.to_string(),
            peer,
            reconnect_delay: options.reconnect_delay,
            call_timeout: options.call_timeout,
            calls: Mutex::new(CallTable {
                next_msgid: 0,
                pending: HashMap::new(),
            }),
            handlers: RwLock::new(HashMap::new()),
            conn: Mutex::new(None),
            connected: ConnectedFlag::new(),
        });

        let manager = inner.clone();
        std::thread::Builder::new()
            .name("bridge-manager".to_string())
            .spawn(move || conn_manager(manager))?;

        Ok(Bridge { inner })
    }

    /// Creates a bridge from the environment: `APP_SOCKET` (or the default
    /// router address) plus the configured timings.
    pub fn from_env() -> Result<Bridge> {
        let config = AppConfig::load()?;
        Self::with_options(
            &config.app_socket,
            BridgeOptions {
                reconnect_delay: config.reconnect_delay(),
                call_timeout: config.call_timeout(),
            },
        )
    }

    /// Returns the process-wide bridge for `address`, creating it on first
    /// use. Repeated lookups of the same address share one connection.
    pub fn shared(address: &str) -> Result<Bridge> {
        let mut registry = SHARED.lock();
        if let Some(bridge) = registry.get(address) {
            return Ok(bridge.clone());
        }
        let bridge = Bridge::new(address)?;
        registry.insert(address.to_string(), bridge.clone());
        Ok(bridge)
    }

    /// The peer address this bridge is bound to.
    pub fn address(&self) -> &str {
        &self.inner.display_addr
    }

    /// Sends a notification without waiting for a response. Send failures
    /// due to a disconnected router are absorbed (fire-and-forget).
    pub fn notify<P: Serialize>(&self, method: &str, params: P) {
        self.inner.notify(method, params);
    }

    /// Calls a method on the router and waits for the response, up to the
    /// default call timeout.
    pub fn call<P: Serialize>(&self, method: &str, params: P) -> std::result::Result<Value, RpcError> {
        self.inner.call(method, params, self.inner.call_timeout)
    }

    /// Calls a method on the router with an explicit timeout.
    pub fn call_with_timeout<P: Serialize>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> std::result::Result<Value, RpcError> {
        self.inner.call(method, params, timeout)
    }

    /// Makes a method available to the router. Registration is idempotent:
    /// a router that already knows the route answers with
    /// `ROUTE_ALREADY_EXISTS_ERR`, which is treated as success, and the new
    /// handler replaces the previous one.
    pub fn provide<F>(&self, method: &str, handler: F) -> std::result::Result<(), RpcError>
    where
        F: Fn(&[Value]) -> std::result::Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.inner
            .call("$/register", (method,), self.inner.call_timeout)?;
        self.inner
            .handlers
            .write()
            .insert(method.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Withdraws a previously provided method. Unknown methods are a no-op.
    pub fn unprovide(&self, method: &str) -> std::result::Result<(), RpcError> {
        if !self.inner.handlers.read().contains_key(method) {
            return Ok(());
        }
        self.inner
            .call("$/unregister", (method,), self.inner.call_timeout)?;
        self.inner.handlers.write().remove(method);
        Ok(())
    }
}

// ============================================
// CONNECTION MANAGER
// ============================================

/// DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTED -> ...
///
/// Once connected, delegates to the read loop; when the read loop returns
/// the connection is gone, so pending calls are failed and the cycle
/// restarts after the reconnect delay.
fn conn_manager(inner: Arc<Inner>) {
    loop {
        inner.connect();
        inner.read_loop();
        inner.fail_pending(|| RpcError::ConnectionLost);
        std::thread::sleep(inner.reconnect_delay);
    }
}

impl Inner {
    /// Retries until a clean connection is established. This is the only
    /// place allowed to write the connected flag, which keeps readers
    /// lock-free.
    fn connect(self: &Arc<Self>) {
        if self.peek_connected() {
            return;
        }

        // Drop the old, probably broken, connection object.
        if let Some(old) = self.conn.lock().take() {
            old.shutdown();
        }
        self.connected.set(false);

        loop {
            match self.try_connect() {
                Ok(conn) => {
                    *self.conn.lock() = Some(conn);
                    self.connected.set(true);
                    info!(addr = %self.display_addr, "connected to router");
                    self.spawn_reregistration();
                    return;
                }
                Err(e) => {
                    error!(addr = %self.display_addr, error = %e, "failed to connect to router");
                    std::thread::sleep(self.reconnect_delay);
                }
            }
        }
    }

    fn try_connect(&self) -> std::io::Result<Conn> {
        match &self.peer {
            PeerAddr::Unix(path) => Ok(Conn::Unix(UnixStream::connect(path)?)),
            PeerAddr::Tcp { host, port } => {
                let addr = (host.as_str(), *port)
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::AddrNotAvailable,
                            "host resolved to no addresses",
                        )
                    })?;
                Ok(Conn::Tcp(TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?))
            }
        }
    }

    /// Re-issues `$/register` for every provided method on a helper thread,
    /// since the calls block until their responses come back through the
    /// read loop.
    fn spawn_reregistration(self: &Arc<Self>) {
        let methods: Vec<String> = self.handlers.read().keys().cloned().collect();
        if methods.is_empty() {
            return;
        }
        let inner = self.clone();
        let spawned = std::thread::Builder::new()
            .name("bridge-reregister".to_string())
            .spawn(move || {
                for method in methods {
                    if let Err(e) = inner.call("$/register", (method.as_str(),), inner.call_timeout)
                    {
                        error!(method = %method, error = %e, "failed to re-register method after reconnection");
                    }
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn re-registration thread");
        }
    }

    /// Lightweight liveness probe: peeks at the socket without blocking or
    /// removing bytes from the buffer, so it cannot race the read loop.
    fn peek_connected(&self) -> bool {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return false;
        };

        let mut probe = [MaybeUninit::<u8>::uninit(); 8];
        match conn
            .sock_ref()
            .recv_with_flags(&mut probe, libc::MSG_PEEK | libc::MSG_DONTWAIT)
        {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                warn!(error = %e, "connection reset while checking socket status");
                false
            }
            Err(e) => {
                error!(error = %e, "unexpected error while checking socket status");
                false
            }
        }
    }

    /// Reads and dispatches frames until the connection dies.
    fn read_loop(&self) {
        let reader = {
            let guard = self.conn.lock();
            match guard.as_ref() {
                Some(conn) => conn.try_clone(),
                None => return,
            }
        };
        let mut reader = match reader {
            Ok(reader) => reader,
            Err(e) => {
                error!(error = %e, "failed to clone connection for read loop");
                return;
            }
        };

        let mut decoder = FrameDecoder::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => {
                    info!("connection closed by router");
                    return;
                }
                Ok(n) => {
                    decoder.feed(&chunk[..n]);
                    loop {
                        match decoder.next_value() {
                            Ok(Some(value)) => self.handle_message(value),
                            Ok(None) => break,
                            Err(e) => {
                                error!(error = %e, "unrecoverable decode error in read loop");
                                return;
                            }
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::ConnectionReset
                            | std::io::ErrorKind::ConnectionAborted
                            | std::io::ErrorKind::BrokenPipe
                    ) =>
                {
                    warn!(error = %e, "connection reset in read loop");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "unexpected error in read loop");
                    return;
                }
            }
        }
    }

    /// Processes one deserialized message: dispatch a request or
    /// notification to a local handler, or correlate a response with its
    /// pending call. Bad frames are logged and dropped; the stream
    /// continues.
    fn handle_message(&self, value: Value) {
        let frame = match parse_frame(value) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping invalid frame");
                return;
            }
        };

        match frame {
            Frame::Request {
                msgid,
                method,
                params,
            } => {
                let handler = self.handlers.read().get(&method).cloned();
                match handler {
                    Some(handler) => match handler(&params) {
                        Ok(result) => self.send_response(msgid, None, result),
                        Err(e) => {
                            error!(method = %method, error = %e, "call handler failed");
                            self.send_response(
                                msgid,
                                Some(RemoteError {
                                    code: e.wire_code(),
                                    message: e.to_string(),
                                }),
                                Value::Null,
                            );
                        }
                    },
                    None => self.send_response(
                        msgid,
                        Some(RemoteError {
                            code: FUNCTION_NOT_FOUND_ERR,
                            message: format!("method not found: '{method}'"),
                        }),
                        Value::Null,
                    ),
                }
            }

            Frame::Response {
                msgid,
                error,
                result,
            } => {
                let callback = self.calls.lock().pending.remove(&msgid);
                let Some(callback) = callback else {
                    warn!(msgid, "response for unknown msgid");
                    return;
                };
                let outcome = match error {
                    None => Ok(result),
                    // The router already knows the method; registering it
                    // again was unnecessary but harmless.
                    Some(error) if error.code == ROUTE_ALREADY_EXISTS_ERR => Ok(result),
                    Some(error) => {
                        if !result.is_null() {
                            warn!(
                                msgid,
                                code = error.code,
                                "response carries both result and error"
                            );
                        }
                        Err(error_from_remote(error))
                    }
                };
                // A caller that already timed out dropped its receiver; the
                // late outcome vanishes silently.
                let _ = callback.try_send(outcome);
            }

            Frame::Notification { method, params } => {
                let handler = self.handlers.read().get(&method).cloned();
                match handler {
                    Some(handler) => {
                        if let Err(e) = handler(&params) {
                            error!(method = %method, error = %e, "notification handler failed");
                        }
                    }
                    None => debug!(method = %method, "notification without local handler"),
                }
            }
        }
    }

    fn call<P: Serialize>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> std::result::Result<Value, RpcError> {
        let params = params_to_array(params).map_err(|e| RpcError::Codec(e.to_string()))?;

        let (tx, rx) = sync_channel::<CallOutcome>(1);
        let msgid = {
            let mut calls = self.calls.lock();
            let msgid = calls.alloc();
            calls.pending.insert(msgid, tx);
            msgid
        };

        let bytes = match encode_request(msgid, method, &params) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.calls.lock().pending.remove(&msgid);
                return Err(RpcError::Codec(e.to_string()));
            }
        };
        if let Err(e) = self.send_bytes(&bytes) {
            self.calls.lock().pending.remove(&msgid);
            return Err(e);
        }

        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                // Remove the callback first so a late response is dropped,
                // then ask the router to abandon the request (best effort).
                if self.calls.lock().pending.remove(&msgid).is_some() {
                    self.notify("$/cancelRequest", (msgid,));
                }
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.calls.lock().pending.remove(&msgid);
                Err(RpcError::ConnectionLost)
            }
        }
    }

    fn notify<P: Serialize>(&self, method: &str, params: P) {
        let params = match params_to_array(params) {
            Ok(params) => params,
            Err(e) => {
                error!(method = %method, error = %e, "failed to encode notification");
                return;
            }
        };
        let bytes = match encode_notification(method, &params) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(method = %method, error = %e, "failed to encode notification");
                return;
            }
        };
        match self.send_bytes(&bytes) {
            Ok(()) | Err(RpcError::Disconnected) | Err(RpcError::ConnectionLost) => {
                // Fire-and-forget semantics.
            }
            Err(e) => error!(method = %method, error = %e, "failed to send notification"),
        }
    }

    fn send_response(&self, msgid: u32, error: Option<RemoteError>, result: Value) {
        let bytes = match encode_response(msgid, error.as_ref(), &result) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(msgid, error = %e, "failed to encode response");
                return;
            }
        };
        match self.send_bytes(&bytes) {
            Ok(()) | Err(RpcError::Disconnected) | Err(RpcError::ConnectionLost) => {
                // Best effort if the connection drops while handling the
                // request.
            }
            Err(e) => error!(msgid, error = %e, "failed to send response"),
        }
    }

    /// Sends packed bytes over the connection, waiting up to one reconnect
    /// delay for the manager to restore a dropped link first.
    fn send_bytes(&self, bytes: &[u8]) -> std::result::Result<(), RpcError> {
        if !self.connected.wait(self.reconnect_delay) {
            return Err(RpcError::Disconnected);
        }

        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Err(RpcError::Disconnected);
        };
        conn.write_all(bytes).map_err(|e| {
            warn!(error = %e, "send failed due to socket error");
            RpcError::ConnectionLost
        })
    }

    /// Fails every pending call and clears the table, waking all callers
    /// blocked on responses.
    fn fail_pending(&self, reason: impl Fn() -> RpcError) {
        let mut calls = self.calls.lock();
        for (_, callback) in calls.pending.drain() {
            let _ = callback.try_send(Err(reason()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_forms() {
        assert!(matches!(
            parse_address("unix:///var/run/arduino-router.sock"),
            Ok(PeerAddr::Unix(path)) if path == PathBuf::from("/var/run/arduino-router.sock")
        ));
        assert!(matches!(
            parse_address("tcp://127.0.0.1:5555"),
            Ok(PeerAddr::Tcp { host, port }) if host == "127.0.0.1" && port == 5555
        ));
        assert!(parse_address("http://example.com").is_err());
        assert!(parse_address("tcp://no-port").is_err());
        assert!(parse_address("not a url").is_err());
    }

    #[test]
    fn test_msgid_allocation_skips_pending_ids() {
        let mut table = CallTable {
            next_msgid: 0,
            pending: HashMap::new(),
        };
        let (tx, _rx) = sync_channel(1);
        table.pending.insert(1, tx);

        assert_eq!(table.alloc(), 2);

        let (tx, _rx) = sync_channel(1);
        table.pending.insert(3, tx);
        table.next_msgid = 2;
        assert_eq!(table.alloc(), 4);
    }

    #[test]
    fn test_msgid_wraps_around() {
        let mut table = CallTable {
            next_msgid: u32::MAX,
            pending: HashMap::new(),
        };
        assert_eq!(table.alloc(), 0);
    }

    #[test]
    fn test_remote_error_mapping() {
        assert!(matches!(
            error_from_remote(RemoteError {
                code: FUNCTION_NOT_FOUND_ERR,
                message: "nope".into()
            }),
            RpcError::NotFound(_)
        ));
        assert!(matches!(
            error_from_remote(RemoteError {
                code: MALFORMED_CALL_ERR,
                message: "bad".into()
            }),
            RpcError::Malformed(_)
        ));
        assert!(matches!(
            error_from_remote(RemoteError {
                code: 0x42,
                message: "other".into()
            }),
            RpcError::Remote { code: 0x42, .. }
        ));
    }
}
