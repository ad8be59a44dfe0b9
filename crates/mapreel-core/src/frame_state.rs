//! The per-frame state calculator.
//!
//! `compute_frame` is a pure function of its arguments. It may be called for
//! any frame in any order, from a preview or from several batch workers at
//! once, and always returns bit-identical output for identical input.

use serde::{Deserialize, Serialize};

use crate::easing::clamp01;
use crate::hash::{self, ContentHash};
use crate::math::LngLat;
use crate::settings::{HighlightSettings, MotionSettings};
use crate::spring::{SpringChannel, SpringConfig};
use crate::timeline::Timeline;

/// Fully resolved animation output for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimationFrameState {
    /// Camera bearing in degrees.
    pub bearing: f64,
    /// Camera pitch in degrees.
    pub pitch: f64,
    pub animated_center: LngLat,
    pub animated_zoom: f64,
    pub fill_opacity: f64,
    pub line_opacity: f64,
    pub info_opacity: Option<f64>,
}

impl AnimationFrameState {
    /// The state returned for invalid input. Callers treat it as "not ready".
    pub fn neutral() -> Self {
        Self {
            bearing: 0.0,
            pitch: 0.0,
            animated_center: LngLat::origin(),
            animated_zoom: 1.0,
            fill_opacity: 0.0,
            line_opacity: 0.0,
            info_opacity: None,
        }
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::neutral()
    }

    /// SHA-256 over the bit patterns of every field.
    pub fn fingerprint(&self) -> ContentHash {
        hash::hash_frame_state(self)
    }
}

impl Default for AnimationFrameState {
    fn default() -> Self {
        Self::neutral()
    }
}

fn finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

fn springs_valid(springs: &[SpringConfig]) -> bool {
    springs.iter().all(SpringConfig::is_valid)
}

/// Returns the validated focus coordinate, or `None` when any input would
/// make the state undefined.
fn validate_inputs(
    fps: f64,
    coordinates: Option<LngLat>,
    target_zoom: f64,
    motion: &MotionSettings,
    highlight: &HighlightSettings,
) -> Option<LngLat> {
    let center = coordinates.filter(LngLat::is_valid)?;
    let camera = &motion.camera;
    let ok = fps.is_finite()
        && fps > 0.0
        && finite(&[
            target_zoom,
            motion.zoom.zoom_level_offset,
            camera.initial_rotation,
            camera.final_rotation,
            camera.initial_pitch,
            camera.final_pitch,
            highlight.fill_opacity,
            highlight.line_opacity,
        ])
        && springs_valid(&[
            camera.rotation_spring,
            camera.pitch_spring,
            motion.zoom.spring,
            highlight.spring,
            highlight.info_spring,
        ]);
    ok.then_some(center)
}

/// Compute the complete animation state for `frame`.
///
/// Camera channels start after `camera.start_delay`; the highlight fill and
/// line fade in from the highlight phase start; the info label fades in from
/// the label phase start. Invalid input yields [`AnimationFrameState::neutral`].
pub fn compute_frame(
    frame: u64,
    fps: f64,
    coordinates: Option<LngLat>,
    target_zoom: f64,
    motion: &MotionSettings,
    timeline: &Timeline,
    highlight: &HighlightSettings,
) -> AnimationFrameState {
    let Some(center) = validate_inputs(fps, coordinates, target_zoom, motion, highlight) else {
        return AnimationFrameState::neutral();
    };

    let f = frame as f64;
    let phases = timeline.frames(0);
    let camera = &motion.camera;
    let camera_delay = f64::from(camera.start_delay);

    let bearing = SpringChannel::new(
        camera.initial_rotation,
        camera.final_rotation,
        camera.rotation_spring,
    )
    .delayed(camera_delay)
    .value_at(f, fps);

    let pitch = SpringChannel::new(camera.initial_pitch, camera.final_pitch, camera.pitch_spring)
        .delayed(camera_delay)
        .value_at(f, fps);

    // from == to on purpose: a zoom spring that actually travels makes the
    // first frames snap towards the target. Holding it degenerate keeps the
    // zoom constant while the channel stays configurable.
    let zoom = target_zoom + motion.zoom.zoom_level_offset;
    let animated_zoom = SpringChannel::new(zoom, zoom, motion.zoom.spring).value_at(f, fps);

    let highlight_delay = phases.highlight_start as f64;
    let fill_opacity = clamp01(
        SpringChannel::new(0.0, highlight.fill_opacity, highlight.spring)
            .delayed(highlight_delay)
            .value_at(f, fps),
    );
    let line_opacity = clamp01(
        SpringChannel::new(0.0, highlight.line_opacity, highlight.spring)
            .delayed(highlight_delay)
            .value_at(f, fps),
    );

    let info_opacity = highlight.show_info.then(|| {
        clamp01(
            SpringChannel::new(0.0, 1.0, highlight.info_spring)
                .delayed(phases.label_start as f64)
                .value_at(f, fps),
        )
    });

    AnimationFrameState {
        bearing,
        pitch,
        animated_center: center,
        animated_zoom,
        fill_opacity,
        line_opacity,
        info_opacity,
    }
}
