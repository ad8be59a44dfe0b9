//! Per-frame pipeline: compute the frame state, push it through the
//! synchronizer, then hold the frame until the map is ready.

use parking_lot::Mutex;
use std::sync::Arc;

use mapreel_core::config::ResolvedComposition;
use mapreel_core::frame_state::AnimationFrameState;
use mapreel_core::hash::ContentHash;
use mapreel_core::timeline::derive_phase;

use crate::blocks::BlockLedger;
use crate::gate::{GateConfig, GateOutcome, MapReadiness, RenderGate};
use crate::overlay::{IconGeometry, IconStabilizer, OverlayState};
use crate::sync::{MapSynchronizer, SyncOutcome, SyncRequest};

/// Everything that happened while rendering one frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame: u64,
    pub state: AnimationFrameState,
    pub fingerprint: ContentHash,
    pub sync: SyncOutcome,
    /// Whether camera and opacity reached the map.
    pub applied: bool,
    pub overlay: OverlayState,
    /// How the frame was released; `None` while it is still held in the
    /// background.
    pub gate: Option<GateOutcome>,
    /// Inline error message to show instead of the map.
    pub error: Option<String>,
}

/// Drives one composition against one map.
pub struct FrameDriver {
    composition: Arc<ResolvedComposition>,
    sync: Arc<MapSynchronizer>,
    ledger: Arc<BlockLedger>,
    gate: RenderGate,
    stabilizer: Mutex<IconStabilizer>,
    abort_on_error: bool,
}

impl FrameDriver {
    pub fn new(
        composition: Arc<ResolvedComposition>,
        sync: Arc<MapSynchronizer>,
        ledger: Arc<BlockLedger>,
    ) -> Self {
        let host_fps = ledger.host().frame_rate();
        if (host_fps - composition.fps).abs() > f64::EPSILON {
            tracing::warn!(
                host_fps,
                composition_fps = composition.fps,
                "video host frame rate differs from composition"
            );
        }
        let gate = RenderGate::new(Arc::clone(&ledger), GateConfig::default());
        Self {
            composition,
            sync,
            ledger,
            gate,
            stabilizer: Mutex::new(IconStabilizer::new()),
            abort_on_error: false,
        }
    }

    pub fn with_gate_config(mut self, config: GateConfig) -> Self {
        self.gate = RenderGate::new(Arc::clone(&self.ledger), config);
        self
    }

    /// Abort the whole render instead of degrading when the map fails.
    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }

    pub fn composition(&self) -> &ResolvedComposition {
        &self.composition
    }

    pub fn synchronizer(&self) -> &Arc<MapSynchronizer> {
        &self.sync
    }

    fn request(&self) -> SyncRequest {
        SyncRequest::new(
            self.composition.style_url(),
            self.composition.country.alpha3.clone(),
            self.composition.projection,
        )
    }

    fn report_failure(&self, message: &str) {
        if self.abort_on_error {
            self.ledger.host().abort_render(message);
        }
    }

    /// Render `frame` and wait until the map is ready for capture.
    pub async fn render_frame(&self, frame: u64) -> FrameReport {
        let (report, readiness) = self.prepare(frame).await;
        let gate = self.gate.hold(frame, readiness).await;
        FrameReport {
            gate: Some(gate),
            ..report
        }
    }

    /// Render whatever frame the video host is currently on.
    pub async fn render_current_frame(&self) -> FrameReport {
        let frame = self.ledger.host().current_frame();
        self.render_frame(frame).await
    }

    /// Prepare `frame` and hold it in the background, superseding any frame
    /// still waiting. Used for interactive scrubbing.
    pub async fn preview_frame(&self, frame: u64) -> FrameReport {
        let (report, readiness) = self.prepare(frame).await;
        self.gate.enter_frame(frame, readiness).await;
        report
    }

    /// Cancel any background hold and dispose the map.
    pub async fn teardown(&self) {
        self.gate.teardown().await;
        self.sync.teardown();
    }

    async fn prepare(&self, frame: u64) -> (FrameReport, Arc<dyn MapReadiness>) {
        let sync = self.sync.sync_map_state(self.request()).await;
        if let SyncOutcome::Failed(message) = &sync {
            self.report_failure(message);
        }

        let state = self.composition.frame_state(frame);
        let applied = match self.sync.apply_frame(&state) {
            Ok(applied) => applied,
            Err(err) => {
                tracing::warn!(frame, error = %err, "failed to apply frame to map");
                self.report_failure(&err.to_string());
                false
            }
        };

        let phase = derive_phase(frame, &self.composition.phase_frames());
        let settled = phase.is_stabilized && self.sync.map_loaded();
        let icon = self.stabilizer.lock().observe(settled, || {
            let map = self.sync.map()?;
            IconGeometry::measure(&self.composition.country, &self.composition.icon, |p| {
                map.project(p)
            })
        });
        let overlay = OverlayState::at(&phase, icon, state.info_opacity);

        let report = FrameReport {
            frame,
            fingerprint: state.fingerprint(),
            state,
            sync,
            applied,
            overlay,
            gate: None,
            error: self.sync.error_message(),
        };
        let readiness: Arc<dyn MapReadiness> = self.sync.clone();
        (report, readiness)
    }
}
