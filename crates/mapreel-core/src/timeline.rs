//! The timeline model: named frame offsets and the absolute phase frames
//! derived from them.

use serde::{Deserialize, Serialize};

use crate::easing::clamp01;

/// Frame offsets and fade durations for the animation phases.
///
/// Offsets are cumulative: the highlight starts `highlight_delay` frames after
/// stabilization completes, the label starts `label_delay` frames after
/// stabilization completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeline {
    pub stabilization_buffer: u32,
    pub highlight_delay: u32,
    pub label_delay: u32,
    pub highlight_fade_duration: u32,
    pub label_fade_duration: u32,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            stabilization_buffer: 22,
            highlight_delay: 10,
            label_delay: 15,
            highlight_fade_duration: 8,
            label_fade_duration: 10,
        }
    }
}

/// Caller overrides for individual timeline fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineOverrides {
    pub stabilization_buffer: Option<u32>,
    pub highlight_delay: Option<u32>,
    pub label_delay: Option<u32>,
    pub highlight_fade_duration: Option<u32>,
    pub label_fade_duration: Option<u32>,
}

impl Timeline {
    /// Merge overrides over these values.
    pub fn merged(&self, overrides: &TimelineOverrides) -> Timeline {
        Timeline {
            stabilization_buffer: overrides
                .stabilization_buffer
                .unwrap_or(self.stabilization_buffer),
            highlight_delay: overrides.highlight_delay.unwrap_or(self.highlight_delay),
            label_delay: overrides.label_delay.unwrap_or(self.label_delay),
            highlight_fade_duration: overrides
                .highlight_fade_duration
                .unwrap_or(self.highlight_fade_duration),
            label_fade_duration: overrides
                .label_fade_duration
                .unwrap_or(self.label_fade_duration),
        }
    }

    /// Absolute phase frames relative to `base_frame`.
    pub fn frames(&self, base_frame: u64) -> PhaseFrames {
        derive_frames(self, base_frame)
    }

    /// Frame at which every phase has completed, relative to frame 0.
    pub fn settled_frame(&self) -> u64 {
        let frames = self.frames(0);
        frames.highlight_complete.max(frames.label_complete)
    }
}

/// Absolute frame numbers at which each phase begins or completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFrames {
    pub stabilization_complete: u64,
    pub highlight_start: u64,
    pub highlight_complete: u64,
    pub label_start: u64,
    pub label_complete: u64,
}

/// Phase membership and progress for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub is_stabilized: bool,
    pub is_highlight_active: bool,
    pub is_highlight_complete: bool,
    pub is_label_active: bool,
    pub is_label_complete: bool,
    pub highlight_progress: f64,
    pub label_progress: f64,
}

/// Compute the absolute phase frames for a timeline starting at `base_frame`.
pub fn derive_frames(timeline: &Timeline, base_frame: u64) -> PhaseFrames {
    let stabilization_complete = base_frame + u64::from(timeline.stabilization_buffer);
    let highlight_start = stabilization_complete + u64::from(timeline.highlight_delay);
    let highlight_complete = highlight_start + u64::from(timeline.highlight_fade_duration);
    let label_start = stabilization_complete + u64::from(timeline.label_delay);
    let label_complete = label_start + u64::from(timeline.label_fade_duration);
    PhaseFrames {
        stabilization_complete,
        highlight_start,
        highlight_complete,
        label_start,
        label_complete,
    }
}

/// Progress through `[start, complete]`; a zero-length phase completes
/// instantly at `start`.
fn phase_progress(current: u64, start: u64, complete: u64) -> f64 {
    if complete <= start {
        return if current >= start { 1.0 } else { 0.0 };
    }
    clamp01((current as f64 - start as f64) / (complete - start) as f64)
}

/// Derive phase membership booleans and progress fractions for a frame.
pub fn derive_phase(current_frame: u64, frames: &PhaseFrames) -> PhaseState {
    PhaseState {
        is_stabilized: current_frame >= frames.stabilization_complete,
        is_highlight_active: current_frame >= frames.highlight_start
            && current_frame < frames.highlight_complete,
        is_highlight_complete: current_frame >= frames.highlight_complete,
        is_label_active: current_frame >= frames.label_start
            && current_frame < frames.label_complete,
        is_label_complete: current_frame >= frames.label_complete,
        highlight_progress: phase_progress(
            current_frame,
            frames.highlight_start,
            frames.highlight_complete,
        ),
        label_progress: phase_progress(current_frame, frames.label_start, frames.label_complete),
    }
}
