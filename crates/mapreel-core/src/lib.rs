//! # mapreel-core
//!
//! Core types and pure animation logic for mapreel.
//! Everything in this crate is synchronous and side-effect free: the same
//! inputs always produce the same outputs, regardless of which frame is
//! rendered first or on which worker.

pub mod color;
pub mod config;
pub mod country;
pub mod easing;
pub mod error;
pub mod frame_state;
pub mod hash;
pub mod math;
pub mod settings;
pub mod spring;
pub mod timeline;

pub use color::Color;
pub use config::{CompositionConfig, ResolvedComposition};
pub use country::{BoundingBox, CountryData, CountryRegistry};
pub use error::{MapreelError, MapreelResult};
pub use frame_state::{compute_frame, AnimationFrameState};
pub use math::{LngLat, ScreenPoint, Size2D};
pub use settings::{
    CameraMotion, HighlightSettings, IconSettings, MotionPreset, MotionSettings, Projection,
    ZoomMotion,
};
pub use spring::{spring_value, SpringConfig};
pub use timeline::{derive_frames, derive_phase, PhaseFrames, PhaseState, Timeline};
