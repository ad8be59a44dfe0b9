//! Interfaces of the two external hosts: the map renderer and the video
//! composition host. Everything else in this crate is written against these
//! traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use mapreel_core::math::{LngLat, ScreenPoint};
use mapreel_core::settings::Projection;

/// Events emitted by the map renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    Load,
    Idle,
    Error(String),
    StyleData,
    StyleLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapEventKind {
    Load,
    Idle,
    Error,
    StyleData,
    StyleLoaded,
}

impl MapEvent {
    pub fn kind(&self) -> MapEventKind {
        match self {
            MapEvent::Load => MapEventKind::Load,
            MapEvent::Idle => MapEventKind::Idle,
            MapEvent::Error(_) => MapEventKind::Error,
            MapEvent::StyleData => MapEventKind::StyleData,
            MapEvent::StyleLoaded => MapEventKind::StyleLoaded,
        }
    }
}

/// Camera position of the map view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub center: LngLat,
    pub zoom: f64,
    pub bearing: f64,
    pub pitch: f64,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            center: LngLat::origin(),
            zoom: 1.0,
            bearing: 0.0,
            pitch: 0.0,
        }
    }
}

/// Construction parameters for a new map instance.
#[derive(Debug, Clone, PartialEq)]
pub struct MapInit {
    pub container_id: String,
    pub style_url: String,
    pub center: LngLat,
    pub zoom: f64,
    pub projection: Projection,
}

/// A live map instance owned by the external renderer.
///
/// Mutating methods return `anyhow::Result` because the renderer can reject
/// any of them (unknown layer, style not ready, disposed instance).
pub trait MapHandle: Send + Sync {
    /// Subscribe to renderer events. Subscribe before checking a predicate so
    /// that an event fired in between is not missed.
    fn subscribe(&self) -> broadcast::Receiver<MapEvent>;

    fn loaded(&self) -> bool;
    fn is_style_loaded(&self) -> bool;
    fn are_tiles_loaded(&self) -> bool;

    /// Replace the stylesheet. Destroys every source and layer added so far.
    fn set_style(&self, url: &str) -> anyhow::Result<()>;
    fn set_projection(&self, projection: Projection) -> anyhow::Result<()>;

    fn add_source(&self, id: &str, source: Value) -> anyhow::Result<()>;
    fn add_layer(&self, layer: Value) -> anyhow::Result<()>;
    fn remove_layer(&self, id: &str) -> anyhow::Result<()>;
    fn has_layer(&self, id: &str) -> bool;
    fn set_filter(&self, layer_id: &str, filter: Value) -> anyhow::Result<()>;
    fn set_paint_property(&self, layer_id: &str, property: &str, value: Value)
        -> anyhow::Result<()>;

    fn jump_to(&self, pose: CameraPose) -> anyhow::Result<()>;
    fn camera(&self) -> CameraPose;
    fn project(&self, point: LngLat) -> ScreenPoint;

    /// Dispose the instance. Safe to call more than once.
    fn remove(&self);
}

/// Creates map instances.
#[async_trait]
pub trait MapFactory: Send + Sync {
    async fn create_map(&self, init: MapInit) -> anyhow::Result<Arc<dyn MapHandle>>;
}

/// Identity of one render-block handle issued by the video host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RenderHandleId(pub u64);

impl std::fmt::Display for RenderHandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The video composition host: frame clock plus render blocking.
pub trait VideoHost: Send + Sync {
    fn current_frame(&self) -> u64;
    fn frame_rate(&self) -> f64;
    /// Tell the host not to capture the current frame until released.
    fn acquire_render_block(&self, description: &str) -> RenderHandleId;
    fn release_render_block(&self, handle: RenderHandleId);
    fn abort_render(&self, error: &str);
}
