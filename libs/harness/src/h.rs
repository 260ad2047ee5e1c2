//! Per-unit harness state.
//!
//! Every executing test unit (a standalone test function, or one member,
//! `Prepare` or `Cleanup` of a group) gets its own [`H`]. The status moves
//! one way only:
//!
//! ```text
//! running ──► passed   (body returned without failing or skipping)
//!    │
//!    ├──────► failed   (error / fatal / panic)
//!    └──────► skipped  (skip)
//! ```
//!
//! `fatal` and `skip` hand back an [`Abort`] which the body returns to stop
//! early; the scheduler catches it at the unit boundary.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Outcome of a test unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The unit has not finished yet.
    Running,
    /// The unit returned without failing or skipping.
    Passed,
    /// The unit recorded an error, a fatal error or panicked.
    Failed,
    /// The unit declared itself not applicable.
    Skipped,
}

impl Status {
    /// Returns true once the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUN",
            Self::Passed => "PASS",
            Self::Failed => "FAIL",
            Self::Skipped => "SKIP",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentinel returned by [`H::fatal`] and [`H::skip`].
///
/// Returning it from a test body ends the body; the verdict has already
/// been recorded on the harness.
#[derive(Debug)]
#[must_use = "return the Abort from the test body to stop it"]
pub struct Abort {
    _private: (),
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("test aborted")
    }
}

/// Result of a test body.
pub type TestResult = Result<(), Abort>;

/// Boxed future produced by a test body.
pub type TestFuture = Pin<Box<dyn Future<Output = TestResult> + Send + 'static>>;

/// Boxed future borrowing its inputs, used by group methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug)]
struct State {
    status: Status,
    log: Vec<String>,
    started: Option<Instant>,
    duration: Duration,
}

impl State {
    fn settle(&mut self, status: Status) {
        if self.status == Status::Running {
            self.status = status;
        }
    }
}

/// Execution context of one test unit.
#[derive(Debug)]
pub struct H {
    name: String,
    state: Mutex<State>,
    parallel: AtomicBool,
    release: Option<watch::Sender<bool>>,
}

impl H {
    /// Create a harness for a unit that is not dispatched by a suite.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), None)
    }

    /// Create a harness whose `parallel()` call releases the dispatcher.
    pub(crate) fn with_release(name: impl Into<String>, release: watch::Sender<bool>) -> Arc<Self> {
        Self::build(name.into(), Some(release))
    }

    fn build(name: String, release: Option<watch::Sender<bool>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(State {
                status: Status::Running,
                log: Vec::new(),
                started: None,
                duration: Duration::ZERO,
            }),
            parallel: AtomicBool::new(false),
            release,
        })
    }

    /// Name of the unit (`Group.Method` for group members).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message to the log.
    pub fn log(&self, msg: impl fmt::Display) {
        self.state.lock().log.push(msg.to_string());
    }

    /// Record a failure and keep going.
    pub fn error(&self, msg: impl fmt::Display) {
        let mut state = self.state.lock();
        state.log.push(msg.to_string());
        state.settle(Status::Failed);
    }

    /// Mark the unit failed without a message.
    pub fn fail(&self) {
        self.state.lock().settle(Status::Failed);
    }

    /// Record a failure; the body must return the [`Abort`].
    pub fn fatal(&self, msg: impl fmt::Display) -> Abort {
        self.error(msg);
        Abort { _private: () }
    }

    /// Mark the unit skipped; the body must return the [`Abort`].
    pub fn skip(&self, msg: impl fmt::Display) -> Abort {
        self.record_skip(msg);
        Abort { _private: () }
    }

    pub(crate) fn record_skip(&self, msg: impl fmt::Display) {
        let msg = msg.to_string();
        let mut state = self.state.lock();
        if !msg.is_empty() {
            state.log.push(msg);
        }
        state.settle(Status::Skipped);
    }

    /// Allow other top-level units to start while this one runs.
    pub fn parallel(&self) {
        if self.parallel.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(release) = &self.release {
            release.send_replace(true);
        }
    }

    /// Returns true if the unit called [`H::parallel`].
    pub fn is_parallel(&self) -> bool {
        self.parallel.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    pub fn failed(&self) -> bool {
        self.status() == Status::Failed
    }

    pub fn skipped(&self) -> bool {
        self.status() == Status::Skipped
    }

    /// Snapshot of the recorded messages.
    pub fn logs(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Wall-clock time the unit ran for.
    pub fn duration(&self) -> Duration {
        self.state.lock().duration
    }

    pub(crate) fn begin(&self) {
        self.state.lock().started = Some(Instant::now());
    }

    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        state.settle(Status::Passed);
        if let Some(started) = state.started {
            state.duration = started.elapsed();
        }
    }
}

/// Conversions from fallible calls into harness verdicts.
pub trait ResultExt<T> {
    /// On error, record a fatal failure on `h` and return the [`Abort`].
    fn or_fatal(self, h: &H) -> Result<T, Abort>;
}

impl<T, E: fmt::Display> ResultExt<T> for Result<T, E> {
    fn or_fatal(self, h: &H) -> Result<T, Abort> {
        self.map_err(|e| h.fatal(e))
    }
}

/// Run a future on its own task, turning a panic into an error message.
pub async fn catch_panic<F>(fut: F) -> Result<F::Output, String>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(output) => Ok(output),
        Err(err) if err.is_panic() => Err(panic_message(err.into_panic())),
        Err(err) => Err(format!("task cancelled: {err}")),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one body under `h`, settling its terminal status.
pub(crate) async fn run_harness(h: &Arc<H>, body: TestFuture) {
    h.begin();
    debug!(test = %h.name(), "running");
    if let Err(panic) = catch_panic(body).await {
        h.error(format!("panic: {panic}"));
    }
    h.finish();
}
