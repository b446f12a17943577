//! Public election interface.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::core::ElectCore;
use crate::core::Notification;
use crate::core::WatchLoop;
use crate::core::BOOTSTRAP_ATTEMPTS;
use crate::error::ElectError;
use crate::events::EventSink;
use crate::events::LeaderEvent;
use crate::identity::Identity;
use crate::lease::client::KubeLeaseApi;
use crate::lease::client::LeaseApi;
use crate::lifecycle;
use crate::metrics::ElectionMetrics;
use crate::metrics::Wait;

/// Capacity of the leadership-event broadcast channel. Transitions are rare;
/// a subscriber this far behind has stopped reading.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The running state of the ElectCore task.
enum CoreState {
    /// The engine task is still running.
    Running(JoinHandle<()>),

    /// The engine task has finished.
    Done,
}

struct ElectorInner {
    config: Arc<Config>,
    identity: Identity,
    client: Option<Arc<dyn LeaseApi>>,
    tx_notify: mpsc::UnboundedSender<Notification>,
    rx_metrics: watch::Receiver<ElectionMetrics>,
    tx_events: broadcast::Sender<LeaderEvent>,
    tx_shutdown: Mutex<Option<oneshot::Sender<()>>>,
    core_state: Mutex<CoreState>,
    watch_handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

/// A leader-election participant.
///
/// Exactly one participant across all replicas contending for the same lease
/// observes itself as leader at any moment. Leadership changes surface as
/// [`LeaderEvent`]s via [`subscribe`](Elector::subscribe); synchronous code
/// paths can additionally gate on [`is_leader`](Elector::is_leader).
///
/// ### clone
///
/// This type implements `Clone`, and should be cloned liberally. The clone
/// itself is very cheap and helps to facilitate use with async workflows.
///
/// ### shutting down
///
/// Call [`shutdown`](Elector::shutdown) on termination: if the participant
/// is leading, the lease holder is cleared so peers can take over without
/// waiting out the lease duration. [`lifecycle::install_signal_handlers`]
/// wires this to SIGINT/SIGTERM.
///
/// [`lifecycle::install_signal_handlers`]: crate::lifecycle::install_signal_handlers
pub struct Elector {
    inner: Arc<ElectorInner>,
}

impl Elector {
    /// Create and spawn a new election engine.
    ///
    /// The engine stays idle until [`start`](Elector::start) is called.
    /// `client` is the lease-store binding; pass `None` to run standalone
    /// (no orchestrator), in which case `start` assumes leadership
    /// unconditionally and no lease operation is ever attempted.
    #[tracing::instrument(level = "debug", skip(config, client), fields(lease=%config.lease_name))]
    pub fn new(identity: Identity, config: Arc<Config>, client: Option<Arc<dyn LeaseApi>>) -> Self {
        let (tx_notify, rx_notify) = mpsc::unbounded_channel();
        let (tx_metrics, rx_metrics) =
            watch::channel(ElectionMetrics::new_initial(identity.as_str(), &config.lease_name));
        let (tx_events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (tx_shutdown, rx_shutdown) = oneshot::channel();

        let core_handle = ElectCore::spawn(
            config.clone(),
            identity.clone(),
            client.clone(),
            tx_notify.clone(),
            rx_notify,
            tx_metrics,
            EventSink::new(tx_events.clone()),
            rx_shutdown,
        );

        let inner = ElectorInner {
            config,
            identity,
            client,
            tx_notify,
            rx_metrics,
            tx_events,
            tx_shutdown: Mutex::new(Some(tx_shutdown)),
            core_state: Mutex::new(CoreState::Running(core_handle)),
            watch_handle: Mutex::new(None),
            started: AtomicBool::new(false),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Create an elector wired for the current environment: the Kubernetes
    /// coordination API when running under the orchestrator, standalone
    /// otherwise.
    pub async fn try_default(config: Arc<Config>) -> Result<Self, ElectError> {
        let client: Option<Arc<dyn LeaseApi>> = if lifecycle::running_in_cluster() {
            Some(Arc::new(KubeLeaseApi::try_default().await?))
        } else {
            None
        };

        Ok(Self::new(Identity::from_env(), config, client))
    }

    /// Start participating in the election. Idempotent.
    ///
    /// Standalone electors assume leadership immediately. Otherwise the
    /// lease watch starts first (so peers' writes are observed from the
    /// beginning), then the acquisition sequence runs: up to three attempts
    /// spaced half a lease duration apart. With
    /// [`Config::await_leadership`] set, this call returns only once that
    /// sequence has finished, win or lose; after it, further opportunities
    /// arrive through the watch.
    #[tracing::instrument(level = "debug", skip(self), fields(identity=%self.inner.identity))]
    pub async fn start(&self) -> Result<(), ElectError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(client) = self.inner.client.clone() else {
            let (tx_done, rx_done) = oneshot::channel();
            self.inner
                .tx_notify
                .send(Notification::Standalone { done: tx_done })
                .map_err(|_| ElectError::Stopped)?;
            rx_done.await.map_err(|_| ElectError::Stopped)?;
            return Ok(());
        };

        let watch_handle = WatchLoop::spawn(self.inner.config.clone(), client, self.inner.tx_notify.clone());
        *self.inner.watch_handle.lock().await = Some(watch_handle);

        let (tx_done, rx_done) = oneshot::channel();
        self.inner
            .tx_notify
            .send(Notification::Acquire {
                attempts_left: BOOTSTRAP_ATTEMPTS,
                done: Some(tx_done),
            })
            .map_err(|_| ElectError::Stopped)?;

        if self.inner.config.await_leadership {
            let acquired = rx_done.await.map_err(|_| ElectError::Stopped)?;
            tracing::debug!(acquired, "initial acquisition sequence finished");
        }

        Ok(())
    }

    /// Whether this participant currently observes itself as leader.
    ///
    /// Non-blocking snapshot; reflects every transition the engine has made
    /// so far.
    pub fn is_leader(&self) -> bool {
        self.inner.rx_metrics.borrow().is_leader()
    }

    /// This participant's holder identity.
    pub fn identity(&self) -> &str {
        self.inner.identity.as_str()
    }

    /// Subscribe to leadership transitions.
    ///
    /// Events are delivered fire-and-forget; a subscriber that falls behind
    /// misses old transitions but never affects the engine.
    pub fn subscribe(&self) -> broadcast::Receiver<LeaderEvent> {
        self.inner.tx_events.subscribe()
    }

    /// Get a handle to the metrics channel.
    pub fn metrics(&self) -> watch::Receiver<ElectionMetrics> {
        self.inner.rx_metrics.clone()
    }

    /// Get a handle to wait for the metrics to satisfy some condition.
    ///
    /// ```ignore
    /// # use std::time::Duration;
    /// // wait for this participant to become leader:
    /// elector.wait(Some(Duration::from_secs(30))).leader("startup").await?;
    /// ```
    pub fn wait(&self, timeout: Option<Duration>) -> Wait {
        let timeout = timeout.unwrap_or_else(|| Duration::from_millis(500));
        Wait {
            timeout,
            rx: self.inner.rx_metrics.clone(),
        }
    }

    /// Shut down this participant.
    ///
    /// Stops the watch loop, lets the engine release the lease if held
    /// (best effort), and waits for the engine task to finish. The renewal
    /// timer is cancelled as part of the release.
    pub async fn shutdown(&self) -> Result<(), JoinError> {
        if let Some(watch_handle) = self.inner.watch_handle.lock().await.take() {
            watch_handle.abort();
        }

        if let Some(tx) = self.inner.tx_shutdown.lock().await.take() {
            // A failure to send means the engine is already gone.
            let _ = tx.send(());
        }

        let mut core_state = self.inner.core_state.lock().await;
        if let CoreState::Running(handle) = std::mem::replace(&mut *core_state, CoreState::Done) {
            handle.await?;
        }

        Ok(())
    }
}

impl Clone for Elector {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
