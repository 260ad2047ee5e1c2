//! Signal-safe teardown of provisioned clusters.
//!
//! A [`SignalGuard`] is installed before anything is provisioned. The first
//! SIGINT or SIGTERM starts the teardown callback. While teardown runs, the
//! same signal is swallowed twice; its third repeat, or the end of teardown,
//! restores the default disposition and re-delivers the original signal so
//! the process exits the way the sender expects.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use nix::sys::signal::{kill, SigHandler, Signal};
use nix::unistd::getpid;
use parking_lot::Mutex;
use plfm_platform::Cluster;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Repeats of the first signal after which it is re-delivered even if
/// teardown is still running.
pub const MAX_SIGNALS: u32 = 3;

/// Clusters currently provisioned by a run.
#[derive(Clone, Default)]
pub struct LiveClusters {
    inner: Arc<Mutex<HashMap<u64, Arc<dyn Cluster>>>>,
    next_id: Arc<AtomicU64>,
}

impl LiveClusters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `cluster` until the returned handle is dropped.
    pub fn track(&self, cluster: Arc<dyn Cluster>) -> Tracked {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().insert(id, cluster);
        Tracked {
            live: self.clone(),
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy every tracked cluster concurrently and stop tracking them.
    pub async fn destroy_all(&self) {
        let clusters: Vec<Arc<dyn Cluster>> = self.inner.lock().drain().map(|(_, c)| c).collect();
        if clusters.is_empty() {
            return;
        }

        info!(count = clusters.len(), "Destroying live clusters");
        let results = join_all(clusters.iter().map(|c| c.destroy())).await;
        for (cluster, result) in clusters.iter().zip(results) {
            if let Err(e) = result {
                warn!(cluster = %cluster.name(), error = %e, "Failed to destroy cluster");
            }
        }
    }
}

/// Registration of one live cluster; dropping it stops tracking.
#[must_use]
pub struct Tracked {
    live: LiveClusters,
    id: u64,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.inner.lock().remove(&self.id);
    }
}

/// What to do with a signal that arrives while teardown is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A different signal; not ours to handle.
    Ignore,
    /// The first signal again; keep waiting for teardown.
    Swallow,
    /// Give up waiting and re-deliver.
    Reraise,
}

/// Counts repeats of the signal that started teardown.
#[derive(Debug)]
pub struct Escalation {
    first: Signal,
    count: u32,
}

impl Escalation {
    pub fn new(first: Signal) -> Self {
        Self { first, count: 0 }
    }

    pub fn observe(&mut self, sig: Signal) -> Decision {
        if sig != self.first {
            return Decision::Ignore;
        }
        self.count += 1;
        if self.count >= MAX_SIGNALS {
            Decision::Reraise
        } else {
            Decision::Swallow
        }
    }
}

/// Wait for the first signal, run `teardown`, and return the signal to
/// re-deliver. Returns `None` if the channel closes before any signal.
pub async fn supervise<F, Fut>(mut signals: mpsc::UnboundedReceiver<Signal>, teardown: F) -> Option<Signal>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    let first = signals.recv().await?;
    warn!(signal = ?first, "Received signal, cleaning up");

    let mut escalation = Escalation::new(first);
    let teardown = teardown();
    tokio::pin!(teardown);

    loop {
        tokio::select! {
            _ = &mut teardown => {
                info!("Cleanup done");
                return Some(first);
            }
            received = signals.recv() => match received {
                Some(sig) => match escalation.observe(sig) {
                    Decision::Reraise => {
                        warn!(signal = ?sig, "Signal repeated, giving up on cleanup");
                        return Some(first);
                    }
                    Decision::Swallow => warn!(signal = ?sig, "Cleanup in progress"),
                    Decision::Ignore => {}
                },
                None => {
                    (&mut teardown).await;
                    return Some(first);
                }
            },
        }
    }
}

/// Signals a [`SignalGuard`] intercepts.
const INTERCEPTED: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

/// Put `sig` back to its default disposition. tokio's handler otherwise
/// stays registered for the life of the process.
fn restore_default(sig: Signal) {
    // SAFETY: installs SIG_DFL, which runs no user code.
    if let Err(e) = unsafe { nix::sys::signal::signal(sig, SigHandler::SigDfl) } {
        error!(signal = ?sig, error = %e, "Failed to restore default signal handler");
    }
}

/// Restore the default disposition for `sig` and send it to ourselves.
fn reraise(sig: Signal) {
    restore_default(sig);
    if let Err(e) = kill(getpid(), sig) {
        error!(signal = ?sig, error = %e, "Failed to re-deliver signal");
    }
}

/// Intercepts SIGINT and SIGTERM for the duration of a run.
pub struct SignalGuard {
    forwarder: JoinHandle<()>,
    supervisor: JoinHandle<()>,
    triggered: Arc<AtomicBool>,
}

impl SignalGuard {
    /// Start intercepting. `teardown` runs at most once, on the first
    /// signal.
    pub fn install<F, Fut>(teardown: F) -> io::Result<Self>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let (tx, rx) = mpsc::unbounded_channel();

        let forwarder = tokio::spawn(async move {
            loop {
                let sig = tokio::select! {
                    Some(()) = sigint.recv() => Signal::SIGINT,
                    Some(()) = sigterm.recv() => Signal::SIGTERM,
                    else => return,
                };
                if tx.send(sig).is_err() {
                    return;
                }
            }
        });

        let triggered = Arc::new(AtomicBool::new(false));
        let supervisor = tokio::spawn({
            let triggered = Arc::clone(&triggered);
            async move {
                let teardown = move || {
                    triggered.store(true, Ordering::SeqCst);
                    teardown()
                };
                if let Some(sig) = supervise(rx, teardown).await {
                    reraise(sig);
                }
            }
        });

        Ok(Self {
            forwarder,
            supervisor,
            triggered,
        })
    }

    /// Guard that destroys every cluster in `live` on a signal.
    pub fn for_clusters(live: LiveClusters) -> io::Result<Self> {
        Self::install(move || async move { live.destroy_all().await })
    }

    /// Returns true once a signal has started teardown.
    pub fn triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Stop intercepting. If teardown already started, wait for it to
    /// finish and re-deliver the signal; otherwise later signals get their
    /// default disposition again.
    pub async fn release(self) {
        self.forwarder.abort();
        if self.triggered() {
            let _ = self.supervisor.await;
        } else {
            self.supervisor.abort();
            for sig in INTERCEPTED {
                restore_default(sig);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_escalation_counts_only_first_signal() {
        let mut escalation = Escalation::new(Signal::SIGINT);
        assert_eq!(escalation.observe(Signal::SIGTERM), Decision::Ignore);
        assert_eq!(escalation.observe(Signal::SIGINT), Decision::Swallow);
        assert_eq!(escalation.observe(Signal::SIGTERM), Decision::Ignore);
        assert_eq!(escalation.observe(Signal::SIGINT), Decision::Swallow);
        assert_eq!(escalation.observe(Signal::SIGINT), Decision::Reraise);
    }

    #[tokio::test]
    async fn test_teardown_completion_reraises() {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        tx.send(Signal::SIGTERM).unwrap();

        let counter = Arc::clone(&calls);
        let sig = supervise(rx, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        assert_eq!(sig, Some(Signal::SIGTERM));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_third_repeat_gives_up_on_stuck_teardown() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = [Signal::SIGINT, Signal::SIGINT, Signal::SIGTERM, Signal::SIGINT, Signal::SIGINT];
        for sig in sent {
            tx.send(sig).unwrap();
        }

        let sig = tokio::time::timeout(
            Duration::from_secs(5),
            supervise(rx, || std::future::pending::<()>()),
        )
        .await
        .unwrap();
        assert_eq!(sig, Some(Signal::SIGINT));
    }

    #[tokio::test]
    async fn test_two_repeats_are_swallowed() {
        let (tx, rx) = mpsc::unbounded_channel();
        for _ in 0..3 {
            tx.send(Signal::SIGINT).unwrap();
        }

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            supervise(rx, || std::future::pending::<()>()),
        )
        .await;
        assert!(result.is_err(), "supervisor returned after two repeats");
        drop(tx);
    }

    #[tokio::test]
    async fn test_release_restores_default_disposition() {
        let guard = SignalGuard::install(|| async {}).unwrap();
        assert!(!guard.triggered());
        guard.release().await;

        for sig in INTERCEPTED {
            // Swapping in SIG_DFL hands back whatever was installed before.
            let previous = unsafe { nix::sys::signal::signal(sig, SigHandler::SigDfl) }.unwrap();
            assert!(matches!(previous, SigHandler::SigDfl), "{sig:?} still intercepted");
        }
    }

    #[tokio::test]
    async fn test_closed_channel_without_signal() {
        let (tx, rx) = mpsc::unbounded_channel::<Signal>();
        drop(tx);
        let sig = supervise(rx, || async { panic!("teardown must not run") }).await;
        assert_eq!(sig, None);
    }

    #[tokio::test]
    async fn test_live_clusters_destroy_all() {
        use plfm_platform::{ClusterFactory, MockFactory};
        use std::path::Path;

        let factory = MockFactory::default();
        let live = LiveClusters::new();
        let a = factory.new_cluster(Path::new("/tmp/a")).await.unwrap();
        let b = factory.new_cluster(Path::new("/tmp/b")).await.unwrap();

        let _a = live.track(a);
        let tracked_b = live.track(b);
        assert_eq!(live.len(), 2);
        drop(tracked_b);
        assert_eq!(live.len(), 1);

        live.destroy_all().await;
        assert!(live.is_empty());
        let clusters = factory.clusters();
        assert!(clusters[0].is_destroyed());
        assert!(!clusters[1].is_destroyed());
    }
}
