//! Readiness detection
//!
//! The observer injected into the page posts a single "ready" message once
//! the DOM has been quiet for the debounce window (or for the grace window
//! when nothing mutates at all). The detector races that message against a
//! hard timeout, then stops the observer, runs the configured post-load
//! scripts and publishes the outcome once. Every waiter, concurrent or later,
//! observes the same outcome.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::{Configuration, PreprocessingTiming};
use super::extraction::evaluate;
use super::handle::EngineHandle;
use super::scripts;
use crate::engine::EngineValue;
use crate::{Error, Result};

/// Readiness of the loaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// No caller has waited yet
    NotStarted,
    /// Waiting for the ready message or the hard timeout
    Observing,
    /// The document went quiet
    Stable,
    /// The hard timeout fired first
    TimedOut,
    /// The session was torn down before resolution
    Cancelled,
}

impl ReadinessState {
    /// Whether extraction may proceed
    pub fn is_resolved(&self) -> bool {
        matches!(self, ReadinessState::Stable | ReadinessState::TimedOut)
    }

    /// Whether the state can no longer change
    pub fn is_terminal(&self) -> bool {
        self.is_resolved() || *self == ReadinessState::Cancelled
    }
}

#[derive(Debug, Default)]
struct DetectorTasks {
    run: Option<JoinHandle<()>>,
    timeout: Option<JoinHandle<()>>,
}

/// Single-flight readiness detector for one session
#[derive(Debug)]
pub struct ReadinessDetector {
    engine: Arc<EngineHandle>,
    config: Arc<Configuration>,
    state: watch::Sender<ReadinessState>,
    signal: Mutex<Option<mpsc::Receiver<String>>>,
    tasks: StdMutex<DetectorTasks>,
    runs: AtomicUsize,
}

impl ReadinessDetector {
    /// Create a detector fed by the ready-message channel
    ///
    /// The channel is registered before navigation, so a message posted
    /// before the first wait stays buffered.
    pub fn new(
        engine: Arc<EngineHandle>,
        config: Arc<Configuration>,
        signal: mpsc::Receiver<String>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ReadinessState::NotStarted);
        Arc::new(Self {
            engine,
            config,
            state,
            signal: Mutex::new(Some(signal)),
            tasks: StdMutex::new(DetectorTasks::default()),
            runs: AtomicUsize::new(0),
        })
    }

    pub fn state(&self) -> ReadinessState {
        *self.state.borrow()
    }

    /// Number of detection runs started (at most one)
    pub fn detection_runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Wait until the document is stable or the hard timeout fired
    ///
    /// The first call starts detection. Fails with
    /// [`Error::SessionClosed`] if the session is torn down first.
    pub async fn wait(self: &Arc<Self>) -> Result<ReadinessState> {
        let mut updates = self.state.subscribe();
        self.start();

        let state = *updates
            .wait_for(ReadinessState::is_terminal)
            .await
            .map_err(|_| Error::SessionClosed)?;

        match state {
            ReadinessState::Cancelled => Err(Error::SessionClosed),
            resolved => Ok(resolved),
        }
    }

    /// Start the detection run unless one already started
    fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks();

        let started = self.state.send_if_modified(|state| {
            if *state == ReadinessState::NotStarted {
                *state = ReadinessState::Observing;
                true
            } else {
                false
            }
        });
        if !started {
            return;
        }

        self.runs.fetch_add(1, Ordering::SeqCst);
        let limit = self.config.timeout();
        debug!("Readiness detection started (timeout {:?})", limit);

        let (fire, fired) = oneshot::channel();
        tasks.timeout = Some(tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            let _ = fire.send(());
        }));

        let detector = Arc::clone(self);
        tasks.run = Some(tokio::spawn(async move {
            detector.run(fired).await;
        }));
    }

    async fn run(self: Arc<Self>, fired: oneshot::Receiver<()>) {
        let signal = self.signal.lock().await.take();

        let outcome = tokio::select! {
            _ = Self::ready_message(signal) => ReadinessState::Stable,
            Ok(()) = fired => ReadinessState::TimedOut,
        };

        match outcome {
            ReadinessState::TimedOut => {
                warn!("Document did not settle within {:?}", self.config.timeout())
            }
            _ => {
                if let Some(timer) = self.tasks().timeout.take() {
                    timer.abort();
                }
                info!("Document is stable");
            }
        }

        self.finish().await;
        self.publish(outcome);
    }

    /// Resolves on the first ready message; never if the channel closes
    async fn ready_message(signal: Option<mpsc::Receiver<String>>) {
        let Some(mut signal) = signal else {
            return std::future::pending().await;
        };

        while let Some(message) = signal.recv().await {
            if message == scripts::READY_MESSAGE {
                return;
            }
            debug!("Ignoring message on readiness channel: {}", message);
        }

        std::future::pending().await
    }

    /// Stop the observer and run post-load scripts
    async fn finish(&self) {
        let timing = self.config.pre_processing_timing();

        if timing == PreprocessingTiming::BeforeStopObserver {
            self.pre_process().await;
        }

        if let Err(e) = self.run_script(scripts::stop_observer()).await {
            debug!("Failed to stop observer: {}", e);
        }

        if timing == PreprocessingTiming::AfterStopObserver {
            self.pre_process().await;
        }

        let sanitization = self.config.sanitization();
        if !sanitization.is_empty() {
            let program = scripts::remove_nodes(&sanitization.selectors());
            if let Err(e) = self.run_script(&program).await {
                warn!("Sanitization failed: {}", e);
            }
        }
    }

    async fn pre_process(&self) {
        if let Some(script) = self.config.pre_processing_script() {
            if let Err(e) = self.run_script(script).await {
                warn!("Pre-processing script failed: {}", e);
            }
        }
    }

    async fn run_script(&self, program: &str) -> Result<()> {
        evaluate::<EngineValue>(&self.engine, program, self.config.script_timeout()).await?;
        Ok(())
    }

    /// Publish a resolution unless the detector already resolved or was cancelled
    fn publish(&self, outcome: ReadinessState) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = outcome;
                true
            }
        });
    }

    /// Abort the hard-timeout task
    pub fn cancel_timeout(&self) {
        if let Some(timer) = self.tasks().timeout.take() {
            timer.abort();
        }
    }

    /// Abort detection and wake waiters with [`ReadinessState::Cancelled`]
    ///
    /// A resolved outcome is left in place.
    pub fn cancel(&self) {
        let mut tasks = self.tasks();
        if let Some(timer) = tasks.timeout.take() {
            timer.abort();
        }
        if let Some(run) = tasks.run.take() {
            run.abort();
        }

        self.state.send_if_modified(|state| {
            if state.is_resolved() {
                false
            } else {
                *state = ReadinessState::Cancelled;
                true
            }
        });
    }

    fn tasks(&self) -> StdMutexGuard<'_, DetectorTasks> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
