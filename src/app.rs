//! Application controller
//!
//! The controller supervises the lifecycle of user bricks: bricks are
//! registered into a waiting queue, started together (or individually), and
//! stopped in reverse order on shutdown. Each runnable attached to a brick
//! gets its own worker thread: `execute` runnables run exactly once, `loop`
//! runnables run repeatedly while the brick is up.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;

/// A user component managed by the [`AppController`].
///
/// Both hooks are optional; `start` runs before any worker thread begins and
/// `stop` runs before worker threads are signalled and joined, so blocking
/// runnables get a chance to observe the stop.
pub trait Brick: Send + Sync + 'static {
    fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

enum Runnable {
    /// Called repeatedly on a dedicated thread while the brick is running.
    /// `ControlFlow::Break` ends the loop early.
    Loop(Box<dyn Fn() -> ControlFlow<()> + Send + Sync>),
    /// Called exactly once on a dedicated thread.
    Execute(Box<dyn FnOnce() + Send>),
}

impl Runnable {
    fn kind(&self) -> &'static str {
        match self {
            Runnable::Loop(_) => "loop",
            Runnable::Execute(_) => "execute",
        }
    }
}

struct WaitingBrick {
    brick: Arc<dyn Brick>,
    name: &'static str,
    runnables: Vec<Runnable>,
}

struct Worker {
    label: String,
    thread: std::thread::JoinHandle<()>,
    is_running: Arc<AtomicBool>,
}

struct RunningBrick {
    brick: Arc<dyn Brick>,
    name: &'static str,
    workers: Vec<Worker>,
}

#[derive(Default)]
struct ControllerState {
    waiting: VecDeque<WaitingBrick>,
    running: Vec<RunningBrick>,
}

/// Orchestrates brick startup, shutdown and worker-thread execution.
///
/// Bricks registered before [`run`](AppController::run) are started and
/// stopped automatically; bricks started manually via
/// [`start_brick`](AppController::start_brick) are the caller's
/// responsibility, but [`stop_bricks`](AppController::stop_bricks) stops
/// them too so shutdown is always complete.
pub struct AppController {
    state: Mutex<ControllerState>,
    join_timeout: Duration,
}

impl Default for AppController {
    fn default() -> Self {
        Self::new()
    }
}

fn brick_key(brick: &Arc<dyn Brick>) -> *const () {
    Arc::as_ptr(brick) as *const ()
}

impl AppController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControllerState::default()),
            join_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            state: Mutex::new(ControllerState::default()),
            join_timeout: config.worker_join_timeout(),
        }
    }

    /// Registers a brick to be started on the next
    /// [`start_bricks`](AppController::start_bricks)/[`run`](AppController::run).
    ///
    /// Registering an already-waiting or already-running brick is a no-op.
    /// The returned builder attaches runnables to the waiting brick.
    pub fn register<B: Brick>(&self, brick: Arc<B>) -> Registration<'_> {
        let name = short_name::<B>();
        let brick: Arc<dyn Brick> = brick;
        let key = brick_key(&brick);

        {
            let mut state = self.state.lock();
            let already_running = state.running.iter().any(|r| brick_key(&r.brick) == key);
            let already_waiting = state.waiting.iter().any(|w| brick_key(&w.brick) == key);
            if !already_running && !already_waiting {
                state.waiting.push_back(WaitingBrick {
                    brick,
                    name,
                    runnables: Vec::new(),
                });
                debug!(brick = name, "registered brick for next startup");
            }
        }

        Registration {
            controller: self,
            key,
        }
    }

    /// Removes a brick from the waiting queue. Running bricks are left
    /// untouched.
    pub fn unregister<B: Brick>(&self, brick: &Arc<B>) {
        let key = Arc::as_ptr(brick) as *const ();
        let mut state = self.state.lock();
        if let Some(index) = state
            .waiting
            .iter()
            .position(|w| brick_key(&w.brick) == key)
        {
            let removed = state.waiting.remove(index);
            if let Some(removed) = removed {
                debug!(brick = removed.name, "unregistered brick");
            }
        }
    }

    /// Immediately starts a single brick (removing it from the waiting queue
    /// first, along with any runnables attached there).
    pub fn start_brick<B: Brick>(&self, brick: &Arc<B>) -> anyhow::Result<()> {
        let key = Arc::as_ptr(brick) as *const ();
        let entry = {
            let mut state = self.state.lock();
            if state.running.iter().any(|r| brick_key(&r.brick) == key) {
                warn!(brick = short_name::<B>(), "brick is already running");
                return Ok(());
            }
            match state
                .waiting
                .iter()
                .position(|w| brick_key(&w.brick) == key)
            {
                Some(index) => state.waiting.remove(index),
                None => None,
            }
        };
        let entry = entry.unwrap_or_else(|| WaitingBrick {
            brick: brick.clone(),
            name: short_name::<B>(),
            runnables: Vec::new(),
        });
        self.start_entry(entry)
    }

    /// Immediately stops a single running brick.
    pub fn stop_brick<B: Brick>(&self, brick: &Arc<B>) {
        let key = Arc::as_ptr(brick) as *const ();
        let entry = {
            let mut state = self.state.lock();
            match state.running.iter().position(|r| brick_key(&r.brick) == key) {
                Some(index) => state.running.remove(index),
                None => {
                    warn!(brick = short_name::<B>(), "brick is not running");
                    return;
                }
            }
        };
        self.stop_entry(entry);
    }

    /// Drains the waiting queue in FIFO order, starting each brick. A brick
    /// whose start hook fails is logged and skipped.
    pub fn start_bricks(&self) {
        loop {
            let entry = self.state.lock().waiting.pop_front();
            let Some(entry) = entry else { break };
            let name = entry.name;
            if let Err(e) = self.start_entry(entry) {
                error!(brick = name, error = %e, "failed to start brick");
            }
        }
        debug!("all managed bricks started");
    }

    /// Stops every running brick, in reverse insertion order.
    pub fn stop_bricks(&self) {
        let running = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.running)
        };
        for entry in running.into_iter().rev() {
            self.stop_entry(entry);
        }
        debug!("all bricks stopped");
    }

    /// Starts all registered bricks and blocks until an interrupt (Ctrl-C or
    /// SIGTERM), then performs an orderly shutdown. Never fails: errors are
    /// logged and shutdown always completes.
    pub fn run(&self) {
        self.run_inner(None);
    }

    /// Like [`run`](AppController::run), but calls `user_loop` repeatedly on
    /// the caller's thread instead of sleeping. A `ControlFlow::Break`
    /// return ends the loop and shuts the application down.
    pub fn run_loop<F>(&self, mut user_loop: F)
    where
        F: FnMut() -> ControlFlow<()>,
    {
        self.run_inner(Some(&mut user_loop));
    }

    fn run_inner(&self, user_loop: Option<&mut dyn FnMut() -> ControlFlow<()>>) {
        info!("app is starting");
        self.start_bricks();
        info!("app started");

        let shutdown = Arc::new(AtomicBool::new(false));
        spawn_signal_watcher(shutdown.clone());

        match user_loop {
            Some(user_loop) => {
                while !shutdown.load(Ordering::SeqCst) {
                    if user_loop().is_break() {
                        debug!("user loop finished iterating");
                        break;
                    }
                }
            }
            None => {
                while !shutdown.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(200));
                }
            }
        }

        info!("app is shutting down");
        self.stop_bricks();
        info!("app shutdown completed");
    }

    fn start_entry(&self, mut entry: WaitingBrick) -> anyhow::Result<()> {
        debug!(brick = entry.name, "calling start hook");
        entry
            .brick
            .start()
            .with_context(|| format!("start hook of brick '{}' failed", entry.name))?;

        let mut workers = Vec::with_capacity(entry.runnables.len());
        for runnable in entry.runnables.drain(..) {
            let is_running = Arc::new(AtomicBool::new(true));
            let label = format!("{}.{}", entry.name, runnable.kind());
            let flag = is_running.clone();
            let thread_label = label.clone();

            let spawned = std::thread::Builder::new().name(label.clone()).spawn(move || {
                match runnable {
                    Runnable::Execute(f) => {
                        debug!(worker = %thread_label, "running execute method");
                        if flag.load(Ordering::SeqCst) {
                            f();
                        }
                    }
                    Runnable::Loop(f) => {
                        debug!(worker = %thread_label, "starting loop method");
                        while flag.load(Ordering::SeqCst) {
                            if f().is_break() {
                                debug!(worker = %thread_label, "loop method stopped iterating");
                                break;
                            }
                        }
                    }
                }
                debug!(worker = %thread_label, "worker terminated");
            });

            match spawned {
                Ok(thread) => workers.push(Worker {
                    label,
                    thread,
                    is_running,
                }),
                Err(e) => error!(worker = %label, error = %e, "failed to spawn worker thread"),
            }
        }

        let mut state = self.state.lock();
        state.running.push(RunningBrick {
            brick: entry.brick,
            name: entry.name,
            workers,
        });
        Ok(())
    }

    fn stop_entry(&self, entry: RunningBrick) {
        // Call the brick's stop hook right away so blocking runnables that
        // can only be interrupted externally get unblocked before the join.
        debug!(brick = entry.name, "calling stop hook");
        if let Err(e) = entry.brick.stop() {
            error!(brick = entry.name, error = %e, "stop hook failed");
        }

        for worker in entry.workers {
            worker.is_running.store(false, Ordering::SeqCst);
            let deadline = Instant::now() + self.join_timeout;
            while !worker.thread.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if worker.thread.is_finished() {
                let _ = worker.thread.join();
            } else {
                warn!(worker = %worker.label, "worker thread did not terminate in time");
            }
        }
        debug!(brick = entry.name, "brick stopped");
    }
}

/// Builder returned by [`AppController::register`], used to attach runnables
/// to a waiting brick. Attaching to an already-running brick is ignored.
pub struct Registration<'a> {
    controller: &'a AppController,
    key: *const (),
}

impl Registration<'_> {
    /// Attaches a loop runnable: called repeatedly on its own thread while
    /// the brick is running, until it returns `ControlFlow::Break`.
    pub fn on_loop<F>(self, f: F) -> Self
    where
        F: Fn() -> ControlFlow<()> + Send + Sync + 'static,
    {
        self.attach(Runnable::Loop(Box::new(f)))
    }

    /// Attaches an execute runnable: called exactly once on its own thread.
    pub fn on_execute<F>(self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.attach(Runnable::Execute(Box::new(f)))
    }

    fn attach(self, runnable: Runnable) -> Self {
        let mut state = self.controller.state.lock();
        match state
            .waiting
            .iter_mut()
            .find(|w| brick_key(&w.brick) == self.key)
        {
            Some(entry) => entry.runnables.push(runnable),
            None => debug!("brick already running, ignoring attached runnable"),
        }
        self
    }
}

fn short_name<B>() -> &'static str {
    let full = std::any::type_name::<B>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Hosts a tiny runtime on a helper thread waiting for Ctrl-C or SIGTERM.
fn spawn_signal_watcher(shutdown: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("app-signals".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "failed to start signal watcher");
                    return;
                }
            };
            runtime.block_on(shutdown_signal());
            shutdown.store(true, Ordering::SeqCst);
        });
    if let Err(e) = spawned {
        error!(error = %e, "failed to spawn signal watcher thread");
    }
}

/// Completes on SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Probe {
        started: AtomicBool,
        stopped: AtomicBool,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            })
        }
    }

    impl Brick for Probe {
        fn start(&self) -> anyhow::Result<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) -> anyhow::Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_start_and_stop_hooks_run() {
        let controller = AppController::new();
        let probe = Probe::new();

        controller.register(probe.clone());
        controller.start_bricks();
        assert!(probe.started.load(Ordering::SeqCst));
        assert!(!probe.stopped.load(Ordering::SeqCst));

        controller.stop_bricks();
        assert!(probe.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_register_is_idempotent() {
        let controller = AppController::new();
        let probe = Probe::new();

        controller.register(probe.clone());
        controller.register(probe.clone());
        assert_eq!(controller.state.lock().waiting.len(), 1);

        controller.start_bricks();
        assert_eq!(controller.state.lock().running.len(), 1);

        // Registering a running brick is a no-op.
        controller.register(probe.clone());
        assert_eq!(controller.state.lock().waiting.len(), 0);

        controller.stop_bricks();
    }

    #[test]
    fn test_unregister_removes_waiting_brick() {
        let controller = AppController::new();
        let probe = Probe::new();

        controller.register(probe.clone());
        controller.unregister(&probe);
        controller.start_bricks();

        assert!(!probe.started.load(Ordering::SeqCst));
    }

    #[test]
    fn test_execute_runs_once() {
        let controller = AppController::new();
        let probe = Probe::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        controller
            .register(probe.clone())
            .on_execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        controller.start_bricks();
        std::thread::sleep(Duration::from_millis(100));
        controller.stop_bricks();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_loop_runs_until_stopped() {
        let controller = AppController::new();
        let probe = Probe::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        controller.register(probe.clone()).on_loop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            ControlFlow::Continue(())
        });

        controller.start_bricks();
        std::thread::sleep(Duration::from_millis(100));
        controller.stop_bricks();

        let after_stop = calls.load(Ordering::SeqCst);
        assert!(after_stop > 1);

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_loop_breaks_on_control_flow() {
        let controller = AppController::new();
        let probe = Probe::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        controller.register(probe.clone()).on_loop(move || {
            if counter.fetch_add(1, Ordering::SeqCst) >= 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        controller.start_bricks();
        std::thread::sleep(Duration::from_millis(100));
        controller.stop_bricks();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stop_bricks_in_reverse_order() {
        struct Ordered {
            order: Arc<Mutex<Vec<&'static str>>>,
            tag: &'static str,
        }

        impl Brick for Ordered {
            fn stop(&self) -> anyhow::Result<()> {
                self.order.lock().push(self.tag);
                Ok(())
            }
        }

        let controller = AppController::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::new(Ordered {
            order: order.clone(),
            tag: "first",
        });
        let second = Arc::new(Ordered {
            order: order.clone(),
            tag: "second",
        });

        controller.register(first);
        controller.register(second);
        controller.start_bricks();
        controller.stop_bricks();

        assert_eq!(*order.lock(), vec!["second", "first"]);
    }
}
