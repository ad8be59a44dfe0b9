//! Composition configuration: the user-facing TOML document and its single
//! resolution step into fully typed settings.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::color::Color;
use crate::country::{CountryData, CountryRegistry};
use crate::error::{MapreelError, MapreelResult};
use crate::frame_state::{compute_frame, AnimationFrameState};
use crate::settings::{
    HighlightSettings, IconKind, IconSettings, MotionPreset, MotionSettings, Projection,
    SpringOverride, Theme,
};
use crate::timeline::{PhaseFrames, Timeline, TimelineOverrides};

fn default_theme() -> String {
    "light".to_string()
}

fn default_fps() -> f64 {
    30.0
}

fn default_duration_frames() -> u64 {
    150
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CameraOverrides {
    pub initial_rotation: Option<f64>,
    pub final_rotation: Option<f64>,
    pub initial_pitch: Option<f64>,
    pub final_pitch: Option<f64>,
    pub start_delay: Option<u32>,
    #[serde(default)]
    pub rotation_spring: SpringOverride,
    #[serde(default)]
    pub pitch_spring: SpringOverride,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ZoomOverrides {
    pub zoom_level_offset: Option<f64>,
    #[serde(default)]
    pub spring: SpringOverride,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct HighlightOverrides {
    pub fill_opacity: Option<f64>,
    pub line_opacity: Option<f64>,
    pub show_info: Option<bool>,
    #[serde(default)]
    pub spring: SpringOverride,
    #[serde(default)]
    pub info_spring: SpringOverride,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ColorOverrides {
    pub background: Option<Color>,
    pub highlight: Option<Color>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct IconOverrides {
    pub kind: Option<IconKind>,
    pub coverage_percent: Option<f64>,
    pub scale_factor: Option<f64>,
}

/// One composition as written by the user.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CompositionConfig {
    /// ISO alpha-3 code of the highlighted country.
    pub country: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub motion_preset: MotionPreset,
    #[serde(default)]
    pub projection: Projection,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_duration_frames")]
    pub duration_frames: u64,
    #[serde(default)]
    pub camera: CameraOverrides,
    #[serde(default)]
    pub zoom: ZoomOverrides,
    #[serde(default)]
    pub highlight: HighlightOverrides,
    #[serde(default)]
    pub timeline: TimelineOverrides,
    #[serde(default)]
    pub colors: ColorOverrides,
    #[serde(default)]
    pub icon: IconOverrides,
}

impl CompositionConfig {
    /// A config for `country` with every other option at its default.
    pub fn for_country(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            theme: default_theme(),
            motion_preset: MotionPreset::default(),
            projection: Projection::default(),
            fps: default_fps(),
            duration_frames: default_duration_frames(),
            camera: CameraOverrides::default(),
            zoom: ZoomOverrides::default(),
            highlight: HighlightOverrides::default(),
            timeline: TimelineOverrides::default(),
            colors: ColorOverrides::default(),
            icon: IconOverrides::default(),
        }
    }

    pub fn from_toml_str(contents: &str) -> MapreelResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load_from_file(path: &Path) -> MapreelResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn save_to_file(&self, path: &Path) -> MapreelResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| MapreelError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn resolve_motion(&self) -> MotionSettings {
        let mut motion = self.motion_preset.settings();
        let cam = &self.camera;
        let base = motion.camera;
        motion.camera.initial_rotation = cam.initial_rotation.unwrap_or(base.initial_rotation);
        motion.camera.final_rotation = cam.final_rotation.unwrap_or(base.final_rotation);
        motion.camera.initial_pitch = cam.initial_pitch.unwrap_or(base.initial_pitch);
        motion.camera.final_pitch = cam.final_pitch.unwrap_or(base.final_pitch);
        motion.camera.start_delay = cam.start_delay.unwrap_or(base.start_delay);
        motion.camera.rotation_spring = cam.rotation_spring.apply(base.rotation_spring);
        motion.camera.pitch_spring = cam.pitch_spring.apply(base.pitch_spring);
        motion.zoom.zoom_level_offset = self
            .zoom
            .zoom_level_offset
            .unwrap_or(motion.zoom.zoom_level_offset);
        motion.zoom.spring = self.zoom.spring.apply(motion.zoom.spring);
        motion
    }

    fn resolve_highlight(&self) -> HighlightSettings {
        let base = HighlightSettings::default();
        let o = &self.highlight;
        HighlightSettings {
            fill_opacity: o.fill_opacity.unwrap_or(base.fill_opacity),
            line_opacity: o.line_opacity.unwrap_or(base.line_opacity),
            spring: o.spring.apply(base.spring),
            show_info: o.show_info.unwrap_or(base.show_info),
            info_spring: o.info_spring.apply(base.info_spring),
        }
    }

    fn resolve_icon(&self) -> IconSettings {
        let base = IconSettings::default();
        IconSettings {
            kind: self.icon.kind.unwrap_or(base.kind),
            coverage_percent: self.icon.coverage_percent.unwrap_or(base.coverage_percent),
            scale_factor: self.icon.scale_factor.unwrap_or(base.scale_factor),
            ..base
        }
    }

    /// Merge defaults, the motion preset, the theme and every override into
    /// a fully typed composition.
    pub fn resolve(&self, registry: &CountryRegistry) -> MapreelResult<ResolvedComposition> {
        let country = registry.require(&self.country)?.clone();
        let theme = Theme::named(&self.theme)?;

        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(MapreelError::Config(format!(
                "fps must be positive, got {}",
                self.fps
            )));
        }
        if self.duration_frames == 0 {
            return Err(MapreelError::Config(
                "duration_frames must be at least 1".into(),
            ));
        }

        let timeline = Timeline::default().merged(&self.timeline);
        if timeline.highlight_fade_duration == 0 || timeline.label_fade_duration == 0 {
            return Err(MapreelError::Config(
                "fade durations must be at least one frame".into(),
            ));
        }

        let motion = self.resolve_motion();
        let highlight = self.resolve_highlight();
        for (name, spring) in [
            ("camera.rotation_spring", motion.camera.rotation_spring),
            ("camera.pitch_spring", motion.camera.pitch_spring),
            ("zoom.spring", motion.zoom.spring),
            ("highlight.spring", highlight.spring),
            ("highlight.info_spring", highlight.info_spring),
        ] {
            if !spring.is_valid() {
                return Err(MapreelError::Config(format!(
                    "{} must have positive damping, stiffness and mass",
                    name
                )));
            }
        }

        let icon = self.resolve_icon();
        if !(icon.coverage_percent > 0.0 && icon.coverage_percent <= 100.0) {
            return Err(MapreelError::Config(format!(
                "icon coverage must be in (0, 100], got {}",
                icon.coverage_percent
            )));
        }
        if !(icon.scale_factor > 0.0 && icon.scale_factor.is_finite()) {
            return Err(MapreelError::Config(format!(
                "icon scale factor must be positive, got {}",
                icon.scale_factor
            )));
        }

        Ok(ResolvedComposition {
            background: self.colors.background.unwrap_or(theme.background),
            highlight_color: self.colors.highlight.unwrap_or(theme.highlight),
            country,
            theme,
            projection: self.projection,
            fps: self.fps,
            duration_frames: self.duration_frames,
            motion,
            highlight,
            timeline,
            icon,
        })
    }
}

/// A composition with every option resolved. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedComposition {
    pub country: CountryData,
    pub theme: Theme,
    pub projection: Projection,
    pub fps: f64,
    pub duration_frames: u64,
    pub motion: MotionSettings,
    pub highlight: HighlightSettings,
    pub timeline: Timeline,
    pub icon: IconSettings,
    pub background: Color,
    pub highlight_color: Color,
}

impl ResolvedComposition {
    pub fn style_url(&self) -> &str {
        &self.theme.style_url
    }

    pub fn phase_frames(&self) -> PhaseFrames {
        self.timeline.frames(0)
    }

    /// Animation state for `frame` of this composition.
    pub fn frame_state(&self, frame: u64) -> AnimationFrameState {
        compute_frame(
            frame,
            self.fps,
            Some(self.country.focus()),
            self.country.zoom_level,
            &self.motion,
            &self.timeline,
            &self.highlight,
        )
    }
}
