//! In-process stand-ins for the map renderer and the video host.
//!
//! `HeadlessMap` models the renderer's observable lifecycle with timers:
//! asynchronous load, style swaps that wipe every layer and reset the camera,
//! tiles that settle some time after each camera move. Every mutation is
//! recorded so callers can assert on exactly what was sent to the renderer.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use mapreel_core::math::{LngLat, ScreenPoint, Size2D};
use mapreel_core::settings::Projection;

use crate::host::{
    CameraPose, MapEvent, MapFactory, MapHandle, MapInit, RenderHandleId, VideoHost,
};

/// Timing and failure behavior of a [`HeadlessMap`].
#[derive(Debug, Clone)]
pub struct HeadlessMapOptions {
    pub load_delay: Duration,
    pub style_load_delay: Duration,
    pub tile_settle_delay: Duration,
    /// Emit this error instead of completing the initial load.
    pub fail_load: Option<String>,
    /// Emit this error instead of completing any style swap.
    pub fail_style: Option<String>,
    /// Finish style swaps without emitting style events; only polling sees it.
    pub silent_style_load: bool,
    /// Tiles never settle and `idle` never fires.
    pub never_settle: bool,
    pub viewport: Size2D,
}

impl HeadlessMapOptions {
    /// Every timer fires immediately.
    pub fn instant() -> Self {
        Self {
            load_delay: Duration::ZERO,
            style_load_delay: Duration::ZERO,
            tile_settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl Default for HeadlessMapOptions {
    fn default() -> Self {
        Self {
            load_delay: Duration::from_millis(200),
            style_load_delay: Duration::from_millis(150),
            tile_settle_delay: Duration::from_millis(40),
            fail_load: None,
            fail_style: None,
            silent_style_load: false,
            never_settle: false,
            viewport: Size2D::new(1920.0, 1080.0),
        }
    }
}

/// One mutation received by a [`HeadlessMap`].
#[derive(Debug, Clone, PartialEq)]
pub enum MapCall {
    SetStyle(String),
    SetProjection(Projection),
    AddSource(String),
    AddLayer(String),
    RemoveLayer(String),
    SetFilter(String, Value),
    SetPaint(String, String, Value),
    JumpTo(CameraPose),
    Remove,
}

struct MapState {
    loaded: bool,
    style_loaded: bool,
    tiles_loaded: bool,
    removed: bool,
    style_url: String,
    projection: Projection,
    camera: CameraPose,
    sources: HashSet<String>,
    layers: Vec<String>,
    filters: HashMap<String, Value>,
    paint: HashMap<(String, String), Value>,
    calls: Vec<MapCall>,
    /// Bumped by anything that invalidates pending style timers.
    style_generation: u64,
    /// Bumped by anything that invalidates pending tile-settle timers.
    view_generation: u64,
}

struct Shared {
    options: HeadlessMapOptions,
    events: broadcast::Sender<MapEvent>,
    state: Mutex<MapState>,
}

impl Shared {
    fn emit(&self, event: MapEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn schedule_settle(self: &Arc<Self>) {
        if self.options.never_settle {
            return;
        }
        let generation = self.state.lock().view_generation;
        let shared = Arc::clone(self);
        let delay = self.options.tile_settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = shared.state.lock();
            if state.removed || state.view_generation != generation || !state.style_loaded {
                return;
            }
            state.tiles_loaded = true;
            drop(state);
            shared.emit(MapEvent::Idle);
        });
    }
}

/// A scriptable, in-memory map renderer.
pub struct HeadlessMap {
    shared: Arc<Shared>,
}

impl HeadlessMap {
    /// Create the map and start its load timer. Requires a Tokio runtime.
    pub fn new(init: MapInit, options: HeadlessMapOptions) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            options,
            events,
            state: Mutex::new(MapState {
                loaded: false,
                style_loaded: false,
                tiles_loaded: false,
                removed: false,
                style_url: init.style_url,
                projection: init.projection,
                camera: CameraPose {
                    center: init.center,
                    zoom: init.zoom,
                    ..CameraPose::default()
                },
                sources: HashSet::new(),
                layers: Vec::new(),
                filters: HashMap::new(),
                paint: HashMap::new(),
                calls: Vec::new(),
                style_generation: 0,
                view_generation: 0,
            }),
        });

        let loader = Arc::clone(&shared);
        tokio::spawn(async move {
            tokio::time::sleep(loader.options.load_delay).await;
            if let Some(message) = loader.options.fail_load.clone() {
                loader.emit(MapEvent::Error(message));
                return;
            }
            {
                let mut state = loader.state.lock();
                if state.removed {
                    return;
                }
                state.loaded = true;
                state.style_loaded = true;
            }
            loader.emit(MapEvent::StyleData);
            loader.emit(MapEvent::Load);
            loader.schedule_settle();
        });

        Arc::new(Self { shared })
    }

    pub fn calls(&self) -> Vec<MapCall> {
        self.shared.state.lock().calls.clone()
    }

    pub fn layer_ids(&self) -> Vec<String> {
        self.shared.state.lock().layers.clone()
    }

    pub fn filter(&self, layer_id: &str) -> Option<Value> {
        self.shared.state.lock().filters.get(layer_id).cloned()
    }

    pub fn paint(&self, layer_id: &str, property: &str) -> Option<Value> {
        self.shared
            .state
            .lock()
            .paint
            .get(&(layer_id.to_string(), property.to_string()))
            .cloned()
    }

    pub fn style_url(&self) -> String {
        self.shared.state.lock().style_url.clone()
    }

    pub fn projection(&self) -> Projection {
        self.shared.state.lock().projection
    }

    pub fn is_removed(&self) -> bool {
        self.shared.state.lock().removed
    }

    /// Count of recorded calls matching `pred`.
    pub fn count_calls(&self, pred: impl Fn(&MapCall) -> bool) -> usize {
        self.shared.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn mutate<T>(
        &self,
        call: MapCall,
        f: impl FnOnce(&mut MapState) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut state = self.shared.state.lock();
        if state.removed {
            anyhow::bail!("map has been removed");
        }
        state.calls.push(call);
        f(&mut state)
    }
}

fn mercator_world(point: LngLat, zoom: f64) -> (f64, f64) {
    let world = 512.0 * 2f64.powf(zoom);
    let lat = point.lat.clamp(-85.051_128_78, 85.051_128_78).to_radians();
    let x = (point.lng + 180.0) / 360.0 * world;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * world;
    (x, y)
}

impl MapHandle for HeadlessMap {
    fn subscribe(&self) -> broadcast::Receiver<MapEvent> {
        self.shared.events.subscribe()
    }

    fn loaded(&self) -> bool {
        self.shared.state.lock().loaded
    }

    fn is_style_loaded(&self) -> bool {
        self.shared.state.lock().style_loaded
    }

    fn are_tiles_loaded(&self) -> bool {
        let state = self.shared.state.lock();
        state.style_loaded && state.tiles_loaded
    }

    fn set_style(&self, url: &str) -> anyhow::Result<()> {
        let generation = self.mutate(MapCall::SetStyle(url.to_string()), |state| {
            state.style_url = url.to_string();
            state.style_loaded = false;
            state.tiles_loaded = false;
            state.sources.clear();
            state.layers.clear();
            state.filters.clear();
            state.paint.clear();
            // The renderer falls back to the new style's default view.
            state.camera = CameraPose::default();
            state.style_generation += 1;
            state.view_generation += 1;
            Ok(state.style_generation)
        })?;

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(shared.options.style_load_delay).await;
            if let Some(message) = shared.options.fail_style.clone() {
                shared.emit(MapEvent::Error(message));
                return;
            }
            {
                let mut state = shared.state.lock();
                if state.removed || state.style_generation != generation {
                    return;
                }
                state.style_loaded = true;
            }
            if !shared.options.silent_style_load {
                shared.emit(MapEvent::StyleData);
                shared.emit(MapEvent::StyleLoaded);
            }
            shared.schedule_settle();
        });
        Ok(())
    }

    fn set_projection(&self, projection: Projection) -> anyhow::Result<()> {
        self.mutate(MapCall::SetProjection(projection), |state| {
            state.projection = projection;
            Ok(())
        })
    }

    fn add_source(&self, id: &str, _source: Value) -> anyhow::Result<()> {
        self.mutate(MapCall::AddSource(id.to_string()), |state| {
            if !state.style_loaded {
                anyhow::bail!("style is not done loading");
            }
            if !state.sources.insert(id.to_string()) {
                anyhow::bail!("source '{}' already exists", id);
            }
            Ok(())
        })
    }

    fn add_layer(&self, layer: Value) -> anyhow::Result<()> {
        let id = layer["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("layer is missing an id"))?
            .to_string();
        self.mutate(MapCall::AddLayer(id.clone()), |state| {
            if !state.style_loaded {
                anyhow::bail!("style is not done loading");
            }
            if state.layers.contains(&id) {
                anyhow::bail!("layer '{}' already exists", id);
            }
            if let Some(source) = layer["source"].as_str() {
                if !state.sources.contains(source) {
                    anyhow::bail!("layer '{}' references missing source '{}'", id, source);
                }
            }
            if let Some(filter) = layer.get("filter") {
                state.filters.insert(id.clone(), filter.clone());
            }
            if let Some(paint) = layer["paint"].as_object() {
                for (prop, value) in paint {
                    state
                        .paint
                        .insert((id.clone(), prop.clone()), value.clone());
                }
            }
            state.layers.push(id);
            Ok(())
        })
    }

    fn remove_layer(&self, id: &str) -> anyhow::Result<()> {
        self.mutate(MapCall::RemoveLayer(id.to_string()), |state| {
            let before = state.layers.len();
            state.layers.retain(|l| l != id);
            if state.layers.len() == before {
                anyhow::bail!("layer '{}' does not exist", id);
            }
            state.filters.remove(id);
            state.paint.retain(|(layer, _), _| layer != id);
            Ok(())
        })
    }

    fn has_layer(&self, id: &str) -> bool {
        self.shared.state.lock().layers.iter().any(|l| l == id)
    }

    fn set_filter(&self, layer_id: &str, filter: Value) -> anyhow::Result<()> {
        self.mutate(
            MapCall::SetFilter(layer_id.to_string(), filter.clone()),
            |state| {
                if !state.layers.iter().any(|l| l == layer_id) {
                    anyhow::bail!("layer '{}' does not exist", layer_id);
                }
                state.filters.insert(layer_id.to_string(), filter);
                Ok(())
            },
        )
    }

    fn set_paint_property(
        &self,
        layer_id: &str,
        property: &str,
        value: Value,
    ) -> anyhow::Result<()> {
        self.mutate(
            MapCall::SetPaint(layer_id.to_string(), property.to_string(), value.clone()),
            |state| {
                if !state.layers.iter().any(|l| l == layer_id) {
                    anyhow::bail!("layer '{}' does not exist", layer_id);
                }
                state
                    .paint
                    .insert((layer_id.to_string(), property.to_string()), value);
                Ok(())
            },
        )
    }

    fn jump_to(&self, pose: CameraPose) -> anyhow::Result<()> {
        let moved = self.mutate(MapCall::JumpTo(pose), |state| {
            if state.camera == pose {
                return Ok(false);
            }
            state.camera = pose;
            state.tiles_loaded = false;
            state.view_generation += 1;
            Ok(true)
        })?;
        if moved {
            self.shared.schedule_settle();
        }
        Ok(())
    }

    fn camera(&self) -> CameraPose {
        self.shared.state.lock().camera
    }

    fn project(&self, point: LngLat) -> ScreenPoint {
        let camera = self.camera();
        let (px, py) = mercator_world(point, camera.zoom);
        let (cx, cy) = mercator_world(camera.center, camera.zoom);
        let viewport = self.shared.options.viewport;
        ScreenPoint::new(
            viewport.width / 2.0 + (px - cx),
            viewport.height / 2.0 + (py - cy),
        )
    }

    fn remove(&self) {
        let mut state = self.shared.state.lock();
        if !state.removed {
            state.removed = true;
            state.calls.push(MapCall::Remove);
        }
    }
}

/// Factory producing [`HeadlessMap`]s; counts every construction.
pub struct HeadlessMapFactory {
    options: HeadlessMapOptions,
    create_delay: Duration,
    fail_create: Option<String>,
    created: Mutex<Vec<Arc<HeadlessMap>>>,
}

impl HeadlessMapFactory {
    pub fn new(options: HeadlessMapOptions) -> Self {
        Self {
            options,
            create_delay: Duration::ZERO,
            fail_create: None,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_create = Some(message.into());
        self
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn maps(&self) -> Vec<Arc<HeadlessMap>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<HeadlessMap>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl MapFactory for HeadlessMapFactory {
    async fn create_map(&self, init: MapInit) -> anyhow::Result<Arc<dyn MapHandle>> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if let Some(message) = &self.fail_create {
            anyhow::bail!("failed to create map for '{}': {}", init.container_id, message);
        }
        let map = HeadlessMap::new(init, self.options.clone());
        self.created.lock().push(Arc::clone(&map));
        Ok(map as Arc<dyn MapHandle>)
    }
}

#[derive(Default)]
struct HostState {
    acquired: Vec<(RenderHandleId, String)>,
    released: Vec<RenderHandleId>,
    double_releases: usize,
    aborted: Option<String>,
}

/// A video host that records render-block traffic.
pub struct RecordingVideoHost {
    fps: f64,
    frame: AtomicU64,
    next_id: AtomicU64,
    state: Mutex<HostState>,
}

impl RecordingVideoHost {
    pub fn new(fps: f64) -> Self {
        Self {
            fps,
            frame: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn set_frame(&self, frame: u64) {
        self.frame.store(frame, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> Vec<(RenderHandleId, String)> {
        self.state.lock().acquired.clone()
    }

    pub fn released(&self) -> Vec<RenderHandleId> {
        self.state.lock().released.clone()
    }

    /// Handles acquired but never released.
    pub fn outstanding(&self) -> Vec<RenderHandleId> {
        let state = self.state.lock();
        state
            .acquired
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| !state.released.contains(id))
            .collect()
    }

    pub fn double_releases(&self) -> usize {
        self.state.lock().double_releases
    }

    pub fn aborted(&self) -> Option<String> {
        self.state.lock().aborted.clone()
    }
}

impl VideoHost for RecordingVideoHost {
    fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::SeqCst)
    }

    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn acquire_render_block(&self, description: &str) -> RenderHandleId {
        let id = RenderHandleId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.state.lock().acquired.push((id, description.to_string()));
        id
    }

    fn release_render_block(&self, handle: RenderHandleId) {
        let mut state = self.state.lock();
        if state.released.contains(&handle) {
            state.double_releases += 1;
            tracing::warn!(handle = %handle, "render block released twice");
        } else {
            state.released.push(handle);
        }
    }

    fn abort_render(&self, error: &str) {
        tracing::error!(error, "render aborted");
        self.state.lock().aborted = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() -> MapInit {
        MapInit {
            container_id: "c".into(),
            style_url: "style://light".into(),
            center: LngLat::new(10.0, 50.0),
            zoom: 4.0,
            projection: Projection::Mercator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_then_settle() {
        let map = HeadlessMap::new(init(), HeadlessMapOptions::default());
        let mut events = map.subscribe();
        assert!(!map.loaded());
        assert_eq!(events.recv().await.unwrap(), MapEvent::StyleData);
        assert_eq!(events.recv().await.unwrap(), MapEvent::Load);
        assert!(map.loaded());
        assert!(!map.are_tiles_loaded());
        assert_eq!(events.recv().await.unwrap(), MapEvent::Idle);
        assert!(map.are_tiles_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_style_swap_wipes_layers_and_camera() {
        let map = HeadlessMap::new(init(), HeadlessMapOptions::default());
        tokio::time::sleep(Duration::from_secs(1)).await;
        map.add_source("s", serde_json::json!({})).unwrap();
        map.add_layer(serde_json::json!({"id": "l", "source": "s"}))
            .unwrap();
        map.set_style("style://dark").unwrap();
        assert!(map.layer_ids().is_empty());
        assert_eq!(map.camera(), CameraPose::default());
        assert!(map.add_layer(serde_json::json!({"id": "l"})).is_err());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(map.is_style_loaded());
        assert_eq!(map.style_url(), "style://dark");
    }

    #[tokio::test]
    async fn test_removed_map_rejects_mutation() {
        let map = HeadlessMap::new(init(), HeadlessMapOptions::instant());
        map.remove();
        map.remove();
        assert!(map.jump_to(CameraPose::default()).is_err());
        assert_eq!(map.count_calls(|c| *c == MapCall::Remove), 1);
    }

    #[tokio::test]
    async fn test_project_centers_camera() {
        let map = HeadlessMap::new(init(), HeadlessMapOptions::instant());
        let p = map.project(LngLat::new(10.0, 50.0));
        assert!((p.x - 960.0).abs() < 1e-6);
        assert!((p.y - 540.0).abs() < 1e-6);
        let east = map.project(LngLat::new(20.0, 50.0));
        assert!(east.x > p.x);
        let north = map.project(LngLat::new(10.0, 60.0));
        assert!(north.y < p.y);
    }

    #[test]
    fn test_recording_host_counts_double_release() {
        let host = RecordingVideoHost::new(30.0);
        let id = host.acquire_render_block("x");
        host.release_render_block(id);
        host.release_render_block(id);
        assert_eq!(host.double_releases(), 1);
        assert!(host.outstanding().is_empty());
    }
}
