//! Render-readiness gate: keeps the video host from capturing a frame until
//! the map has painted it, with a safety timeout that always lets the render
//! move on.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::blocks::BlockLedger;
use crate::host::{MapEvent, MapEventKind};
use crate::wait::{await_condition, WaitOutcome, WaitSpec};

/// Timing of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    /// Pause before releasing a frame whose tiles were already settled, so the
    /// renderer gets one more paint.
    pub grace_delay: Duration,
    pub timeout: Duration,
    /// Timeout used for the first `early_frames` frames, which pay for the
    /// renderer's cold start.
    pub early_frame_timeout: Duration,
    pub early_frames: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            grace_delay: Duration::from_millis(50),
            timeout: Duration::from_secs(8),
            early_frame_timeout: Duration::from_secs(20),
            early_frames: 3,
        }
    }
}

impl GateConfig {
    pub fn timeout_for(&self, frame: u64) -> Duration {
        if frame < self.early_frames {
            self.early_frame_timeout
        } else {
            self.timeout
        }
    }
}

/// What the gate needs to know about the map.
pub trait MapReadiness: Send + Sync {
    fn map_loaded(&self) -> bool;
    fn tiles_settled(&self) -> bool;
    /// Event stream of the live map, if there is one.
    fn subscribe(&self) -> Option<broadcast::Receiver<MapEvent>>;
}

/// How a gated frame was released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// No map yet; released immediately.
    NotLoaded,
    /// Tiles were already settled; released after the grace delay.
    Settled,
    /// Released on the renderer's idle event.
    Idle,
    /// Released by the safety timeout.
    TimedOut,
    /// The map went away or errored while waiting.
    Closed,
}

struct GateTask {
    frame: u64,
    handle: JoinHandle<GateOutcome>,
}

/// Gate for one map view. At most one frame is held at a time; entering a new
/// frame supersedes the previous wait.
pub struct RenderGate {
    ledger: Arc<BlockLedger>,
    config: GateConfig,
    current: Mutex<Option<GateTask>>,
    // Serializes supersession so overlapping entries cannot orphan a hold.
    entering: tokio::sync::Mutex<()>,
}

impl RenderGate {
    pub fn new(ledger: Arc<BlockLedger>, config: GateConfig) -> Self {
        Self {
            ledger,
            config,
            current: Mutex::new(None),
            entering: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Hold `frame` until the map is ready, inline.
    pub async fn hold(&self, frame: u64, readiness: Arc<dyn MapReadiness>) -> GateOutcome {
        hold_frame(Arc::clone(&self.ledger), self.config, frame, readiness).await
    }

    /// Start holding `frame` in the background, superseding any wait still
    /// running for an earlier frame.
    pub async fn enter_frame(&self, frame: u64, readiness: Arc<dyn MapReadiness>) {
        let _entering = self.entering.lock().await;
        self.cancel_current().await;
        let handle = tokio::spawn(hold_frame(
            Arc::clone(&self.ledger),
            self.config,
            frame,
            readiness,
        ));
        *self.current.lock() = Some(GateTask { frame, handle });
    }

    /// Frame currently held in the background, if any.
    pub fn current_frame(&self) -> Option<u64> {
        self.current.lock().as_ref().map(|t| t.frame)
    }

    /// Wait for the background hold to finish.
    pub async fn settle(&self) -> Option<GateOutcome> {
        let task = self.current.lock().take()?;
        match task.handle.await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::warn!(frame = task.frame, error = %err, "gate task did not complete");
                None
            }
        }
    }

    /// Cancel any background hold. Its handle is released by the guard.
    pub async fn teardown(&self) {
        let _entering = self.entering.lock().await;
        self.cancel_current().await;
    }

    async fn cancel_current(&self) {
        let previous = self.current.lock().take();
        if let Some(task) = previous {
            if !task.handle.is_finished() {
                tracing::debug!(frame = task.frame, "superseding gate wait");
                task.handle.abort();
            }
            // Wait for the aborted future to drop so its block is released
            // before a new one is acquired.
            let _ = task.handle.await;
        }
    }
}

async fn hold_frame(
    ledger: Arc<BlockLedger>,
    config: GateConfig,
    frame: u64,
    readiness: Arc<dyn MapReadiness>,
) -> GateOutcome {
    let block = ledger.acquire(format!("map frame {}", frame));

    if !readiness.map_loaded() {
        block.resolve();
        return GateOutcome::NotLoaded;
    }
    let Some(mut events) = readiness.subscribe() else {
        block.resolve();
        return GateOutcome::NotLoaded;
    };

    let timeout = config.timeout_for(frame);
    let spec = WaitSpec::new(MapEventKind::Idle, timeout);
    let outcome = match await_condition(|| readiness.tiles_settled(), &mut events, spec).await {
        WaitOutcome::AlreadySatisfied => {
            tokio::time::sleep(config.grace_delay).await;
            GateOutcome::Settled
        }
        WaitOutcome::Observed => GateOutcome::Idle,
        WaitOutcome::TimedOut => {
            tracing::warn!(
                frame,
                timeout_ms = timeout.as_millis() as u64,
                "map never became idle, releasing frame"
            );
            GateOutcome::TimedOut
        }
        WaitOutcome::Failed(message) => {
            tracing::warn!(frame, %message, "map error while waiting for idle");
            GateOutcome::Closed
        }
        WaitOutcome::Closed => GateOutcome::Closed,
    };
    block.resolve();
    outcome
}
