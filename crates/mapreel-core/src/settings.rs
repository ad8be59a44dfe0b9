//! Typed animation settings, named presets and their overrides.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::color::Color;
use crate::error::MapreelError;
use crate::spring::SpringConfig;

/// Map projection requested for the base map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    #[default]
    Mercator,
    Globe,
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::Mercator => write!(f, "mercator"),
            Projection::Globe => write!(f, "globe"),
        }
    }
}

impl FromStr for Projection {
    type Err = MapreelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mercator" => Ok(Projection::Mercator),
            "globe" => Ok(Projection::Globe),
            other => Err(MapreelError::InvalidArgument(format!(
                "unknown projection '{}' (expected mercator or globe)",
                other
            ))),
        }
    }
}

/// Camera rotation and pitch channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraMotion {
    pub initial_rotation: f64,
    pub final_rotation: f64,
    pub initial_pitch: f64,
    pub final_pitch: f64,
    pub rotation_spring: SpringConfig,
    pub pitch_spring: SpringConfig,
    /// Frames before the camera starts moving.
    pub start_delay: u32,
}

/// Zoom channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomMotion {
    /// Added to the country's target zoom.
    pub zoom_level_offset: f64,
    pub spring: SpringConfig,
}

/// Camera and zoom settings for one composition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSettings {
    pub camera: CameraMotion,
    pub zoom: ZoomMotion,
}

/// Fade-in targets and springs for the country highlight and info label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlightSettings {
    pub fill_opacity: f64,
    pub line_opacity: f64,
    pub spring: SpringConfig,
    pub show_info: bool,
    pub info_spring: SpringConfig,
}

impl Default for HighlightSettings {
    fn default() -> Self {
        Self {
            fill_opacity: 0.55,
            line_opacity: 1.0,
            spring: SpringConfig::new(30.0, 120.0, 1.0),
            show_info: true,
            info_spring: SpringConfig::new(25.0, 90.0, 1.0),
        }
    }
}

/// Icon glyph drawn over the highlighted country.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconKind {
    #[default]
    Pin,
    Flag,
    Star,
    Dot,
}

impl FromStr for IconKind {
    type Err = MapreelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pin" => Ok(IconKind::Pin),
            "flag" => Ok(IconKind::Flag),
            "star" => Ok(IconKind::Star),
            "dot" => Ok(IconKind::Dot),
            other => Err(MapreelError::InvalidArgument(format!(
                "unknown icon type '{}'",
                other
            ))),
        }
    }
}

/// Icon sizing relative to the projected country extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IconSettings {
    pub kind: IconKind,
    /// Share of the country's smaller projected dimension covered by the icon.
    pub coverage_percent: f64,
    pub scale_factor: f64,
    pub min_size: f64,
    pub max_size: f64,
}

impl Default for IconSettings {
    fn default() -> Self {
        Self {
            kind: IconKind::Pin,
            coverage_percent: 50.0,
            scale_factor: 1.0,
            min_size: 20.0,
            max_size: 400.0,
        }
    }
}

/// Named motion presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionPreset {
    #[default]
    Cinematic,
    Dynamic,
    Subtle,
    Static,
}

impl MotionPreset {
    pub const ALL: [MotionPreset; 4] = [
        MotionPreset::Cinematic,
        MotionPreset::Dynamic,
        MotionPreset::Subtle,
        MotionPreset::Static,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MotionPreset::Cinematic => "cinematic",
            MotionPreset::Dynamic => "dynamic",
            MotionPreset::Subtle => "subtle",
            MotionPreset::Static => "static",
        }
    }

    /// Baseline motion settings for this preset.
    pub fn settings(&self) -> MotionSettings {
        match self {
            MotionPreset::Cinematic => MotionSettings {
                camera: CameraMotion {
                    initial_rotation: 0.0,
                    final_rotation: 30.0,
                    initial_pitch: 0.0,
                    final_pitch: 45.0,
                    rotation_spring: SpringConfig::new(150.0, 10.0, 20.0),
                    pitch_spring: SpringConfig::new(120.0, 12.0, 18.0),
                    start_delay: 0,
                },
                zoom: ZoomMotion {
                    zoom_level_offset: 0.3,
                    spring: SpringConfig::new(100.0, 15.0, 15.0),
                },
            },
            MotionPreset::Dynamic => MotionSettings {
                camera: CameraMotion {
                    initial_rotation: -15.0,
                    final_rotation: 35.0,
                    initial_pitch: 10.0,
                    final_pitch: 55.0,
                    rotation_spring: SpringConfig::new(40.0, 60.0, 4.0),
                    pitch_spring: SpringConfig::new(35.0, 50.0, 4.0),
                    start_delay: 0,
                },
                zoom: ZoomMotion {
                    zoom_level_offset: 0.6,
                    spring: SpringConfig::new(30.0, 50.0, 4.0),
                },
            },
            MotionPreset::Subtle => MotionSettings {
                camera: CameraMotion {
                    initial_rotation: 0.0,
                    final_rotation: 10.0,
                    initial_pitch: 0.0,
                    final_pitch: 20.0,
                    rotation_spring: SpringConfig::new(200.0, 8.0, 25.0),
                    pitch_spring: SpringConfig::new(200.0, 8.0, 25.0),
                    start_delay: 5,
                },
                zoom: ZoomMotion {
                    zoom_level_offset: 0.0,
                    spring: SpringConfig::new(200.0, 8.0, 25.0),
                },
            },
            MotionPreset::Static => MotionSettings {
                camera: CameraMotion {
                    initial_rotation: 0.0,
                    final_rotation: 0.0,
                    initial_pitch: 0.0,
                    final_pitch: 0.0,
                    rotation_spring: SpringConfig::default(),
                    pitch_spring: SpringConfig::default(),
                    start_delay: 0,
                },
                zoom: ZoomMotion {
                    zoom_level_offset: 0.0,
                    spring: SpringConfig::default(),
                },
            },
        }
    }
}

impl fmt::Display for MotionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MotionPreset {
    type Err = MapreelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MotionPreset::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| MapreelError::UnknownPreset(s.to_string()))
    }
}

/// Named base-map theme: a style URL plus default colors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    pub style_url: String,
    pub background: Color,
    pub highlight: Color,
}

impl Theme {
    pub const NAMES: [&'static str; 4] = ["light", "dark", "satellite", "minimal"];

    /// Look up a built-in theme by name (case-insensitive).
    pub fn named(name: &str) -> Result<Theme, MapreelError> {
        let (style_url, background, highlight) = match name.to_ascii_lowercase().as_str() {
            "light" => (
                "https://tiles.mapreel.dev/styles/light.json",
                Color::rgb(0xf4, 0xf1, 0xea),
                Color::rgb(0xe4, 0x57, 0x2e),
            ),
            "dark" => (
                "https://tiles.mapreel.dev/styles/dark.json",
                Color::rgb(0x12, 0x14, 0x1c),
                Color::rgb(0xf2, 0xb7, 0x05),
            ),
            "satellite" => (
                "https://tiles.mapreel.dev/styles/satellite.json",
                Color::rgb(0x0b, 0x1d, 0x2c),
                Color::rgb(0x38, 0xe5, 0xa0),
            ),
            "minimal" => (
                "https://tiles.mapreel.dev/styles/minimal.json",
                Color::WHITE,
                Color::rgb(0x1f, 0x6f, 0xeb),
            ),
            _ => return Err(MapreelError::UnknownTheme(name.to_string())),
        };
        Ok(Theme {
            name: name.to_ascii_lowercase(),
            style_url: style_url.to_string(),
            background,
            highlight,
        })
    }
}

/// Partial spring parameters from user configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpringOverride {
    pub damping: Option<f64>,
    pub stiffness: Option<f64>,
    pub mass: Option<f64>,
    pub overshoot_clamping: Option<bool>,
}

impl SpringOverride {
    pub fn apply(&self, base: SpringConfig) -> SpringConfig {
        SpringConfig {
            damping: self.damping.unwrap_or(base.damping),
            stiffness: self.stiffness.unwrap_or(base.stiffness),
            mass: self.mass.unwrap_or(base.mass),
            overshoot_clamping: self.overshoot_clamping.unwrap_or(base.overshoot_clamping),
        }
    }
}
