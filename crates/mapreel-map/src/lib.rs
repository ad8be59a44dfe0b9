//! # mapreel-map
//!
//! The asynchronous half of mapreel: everything that talks to the external
//! map renderer or to the video host. The map instance is owned by
//! [`MapSynchronizer`]; readiness is gated per frame by [`RenderGate`]; the
//! [`FrameDriver`] ties both to the pure frame calculator in `mapreel-core`.

pub mod blocks;
pub mod driver;
pub mod gate;
pub mod headless;
pub mod host;
pub mod overlay;
pub mod registry;
pub mod status;
pub mod sync;
pub mod wait;

pub use blocks::{BlockLedger, RenderBlock};
pub use driver::{FrameDriver, FrameReport};
pub use gate::{GateConfig, GateOutcome, MapReadiness, RenderGate};
pub use headless::{HeadlessMap, HeadlessMapFactory, HeadlessMapOptions, RecordingVideoHost};
pub use host::{
    CameraPose, MapEvent, MapEventKind, MapFactory, MapHandle, MapInit, RenderHandleId, VideoHost,
};
pub use overlay::{IconGeometry, IconStabilizer, OverlayState};
pub use registry::MapRegistry;
pub use status::{MapStatus, StatusEvent};
pub use sync::{MapSynchronizer, SyncConfig, SyncOutcome, SyncRequest};
pub use wait::{await_condition, Backoff, WaitOutcome, WaitSpec};
