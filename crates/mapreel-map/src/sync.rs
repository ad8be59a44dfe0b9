//! Map synchronization state machine.
//!
//! [`MapSynchronizer`] exclusively owns one map instance. Every mutation
//! (style swaps, filter updates, camera jumps, paint updates) goes through
//! it, and `sync_map_state` is its single entry point for bringing the map
//! in line with a requested style, country and projection.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use mapreel_core::color::Color;
use mapreel_core::country::CountryRegistry;
use mapreel_core::error::{MapreelError, MapreelResult};
use mapreel_core::frame_state::AnimationFrameState;
use mapreel_core::math::{LngLat, ScreenPoint};
use mapreel_core::settings::Projection;

use crate::blocks::{BlockLedger, RenderBlock};
use crate::gate::MapReadiness;
use crate::host::{CameraPose, MapEvent, MapEventKind, MapFactory, MapHandle, MapInit};
use crate::registry::MapRegistry;
use crate::status::{MapStatus, StatusEvent};
use crate::wait::{await_condition, Backoff, WaitOutcome, WaitSpec};

pub const BOUNDARY_SOURCE_ID: &str = "country-boundaries";
pub const BOUNDARY_SOURCE_LAYER: &str = "country_boundaries";
pub const FILL_LAYER_ID: &str = "country-highlight-fill";
pub const LINE_LAYER_ID: &str = "country-highlight-line";

/// Filter expression selecting one country by ISO alpha-3 code.
pub fn country_filter(alpha3: &str) -> Value {
    json!(["==", ["get", "iso_3166_1_alpha_3"], alpha3.to_ascii_uppercase()])
}

/// Timeouts and sources used by the synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Bound on the initial load; continuation is forced when it elapses.
    pub load_timeout: Duration,
    pub style_timeout: Duration,
    /// Poll schedule for style-loaded confirmation during a style swap.
    pub style_backoff: Backoff,
    pub boundaries_url: String,
    pub line_width: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(15),
            style_timeout: Duration::from_secs(10),
            style_backoff: Backoff::new(Duration::from_millis(50), Duration::from_millis(800)),
            boundaries_url: "https://tiles.mapreel.dev/country-boundaries.json".to_string(),
            line_width: 2.0,
        }
    }
}

/// Desired map state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub style_url: String,
    /// ISO 3166 alpha-3 code of the highlighted country.
    pub country: String,
    pub projection: Projection,
}

impl SyncRequest {
    pub fn new(style_url: impl Into<String>, country: impl Into<String>, projection: Projection) -> Self {
        Self {
            style_url: style_url.into(),
            country: country.into(),
            projection,
        }
    }
}

/// Result of one `sync_map_state` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The map was created and prepared.
    Initialized,
    /// The style was swapped and the highlight rebuilt on top of it.
    StyleUpdated,
    /// Country and/or projection were changed in place.
    Applied {
        country_changed: bool,
        projection_changed: bool,
    },
    /// The map already matched the request.
    Unchanged,
    /// The request was ignored because of the current status.
    Dropped(MapStatus),
    Failed(String),
}

struct Inner {
    status: MapStatus,
    map: Option<Arc<dyn MapHandle>>,
    applied: Option<SyncRequest>,
    last_error: Option<String>,
}

enum Plan {
    Initialize,
    SwapStyle(Arc<dyn MapHandle>),
    InPlace(Arc<dyn MapHandle>, SyncRequest),
    Nothing,
}

/// Owner of one map instance.
pub struct MapSynchronizer {
    container_id: String,
    factory: Arc<dyn MapFactory>,
    registry: Arc<MapRegistry>,
    ledger: Arc<BlockLedger>,
    countries: Arc<CountryRegistry>,
    highlight_color: Color,
    config: SyncConfig,
    inner: Mutex<Inner>,
}

impl MapSynchronizer {
    pub fn new(
        container_id: impl Into<String>,
        factory: Arc<dyn MapFactory>,
        registry: Arc<MapRegistry>,
        ledger: Arc<BlockLedger>,
        countries: Arc<CountryRegistry>,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            factory,
            registry,
            ledger,
            countries,
            highlight_color: Color::rgb(0xe4, 0x57, 0x2e),
            config: SyncConfig::default(),
            inner: Mutex::new(Inner {
                status: MapStatus::Uninitialized,
                map: None,
                applied: None,
                last_error: None,
            }),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_highlight_color(mut self, color: Color) -> Self {
        self.highlight_color = color;
        self
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn status(&self) -> MapStatus {
        self.inner.lock().status
    }

    /// Message shown in place of the map once the status is `Error`.
    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// The request the map currently reflects.
    pub fn applied(&self) -> Option<SyncRequest> {
        self.inner.lock().applied.clone()
    }

    pub fn map(&self) -> Option<Arc<dyn MapHandle>> {
        self.inner.lock().map.clone()
    }

    /// Bring the map in line with `request`.
    ///
    /// Requests arriving while the map is initializing or swapping styles are
    /// dropped, not queued; callers re-issue on their next state change.
    pub async fn sync_map_state(&self, request: SyncRequest) -> SyncOutcome {
        let plan = {
            let mut inner = self.inner.lock();
            match inner.status {
                status @ (MapStatus::Initializing | MapStatus::UpdatingStyle | MapStatus::Error) => {
                    tracing::debug!(
                        container_id = %self.container_id,
                        %status,
                        "sync request dropped"
                    );
                    return SyncOutcome::Dropped(status);
                }
                MapStatus::Uninitialized => {
                    if let Err(err) = self.advance(&mut inner, StatusEvent::BeginInit) {
                        return SyncOutcome::Failed(err.to_string());
                    }
                    Plan::Initialize
                }
                MapStatus::Idle => {
                    let Some(map) = inner.map.clone() else {
                        return SyncOutcome::Dropped(MapStatus::Idle);
                    };
                    match inner.applied.clone() {
                        Some(applied) if applied == request => Plan::Nothing,
                        Some(applied) if applied.style_url == request.style_url => {
                            Plan::InPlace(map, applied)
                        }
                        _ => {
                            if let Err(err) = self.advance(&mut inner, StatusEvent::BeginStyleUpdate)
                            {
                                return SyncOutcome::Failed(err.to_string());
                            }
                            Plan::SwapStyle(map)
                        }
                    }
                }
            }
        };

        match plan {
            Plan::Initialize => {
                let guard = BusyGuard::arm(self);
                let outcome = self.initialize(request).await;
                guard.disarm();
                outcome
            }
            Plan::SwapStyle(map) => {
                let guard = BusyGuard::arm(self);
                let outcome = self.swap_style(map, request).await;
                guard.disarm();
                outcome
            }
            Plan::InPlace(map, applied) => self.apply_in_place(&map, &applied, request),
            Plan::Nothing => SyncOutcome::Unchanged,
        }
    }

    fn advance(&self, inner: &mut Inner, event: StatusEvent) -> MapreelResult<()> {
        match inner.status.transition(event) {
            Ok(next) => {
                tracing::debug!(
                    container_id = %self.container_id,
                    from = %inner.status,
                    to = %next,
                    "map status transition"
                );
                inner.status = next;
                Ok(())
            }
            Err(err) => {
                tracing::error!(container_id = %self.container_id, error = %err, "rejected status transition");
                Err(err)
            }
        }
    }

    fn fail(&self, block: RenderBlock, err: MapreelError) -> SyncOutcome {
        let message = err.to_string();
        tracing::error!(container_id = %self.container_id, error = %message, "map synchronization failed");
        {
            let mut inner = self.inner.lock();
            // Fail is legal from every non-terminal status.
            let _ = self.advance(&mut inner, StatusEvent::Fail);
            inner.last_error = Some(message.clone());
        }
        block.resolve();
        SyncOutcome::Failed(message)
    }

    fn initial_view(&self, alpha3: &str) -> (LngLat, f64) {
        match self.countries.get(alpha3) {
            Some(country) => (country.focus(), country.zoom_level),
            None => {
                tracing::warn!(country = alpha3, "unknown country, starting from world view");
                (LngLat::origin(), 1.0)
            }
        }
    }

    async fn initialize(&self, request: SyncRequest) -> SyncOutcome {
        let block = self
            .ledger
            .acquire(format!("map init {}", self.container_id));
        let (center, zoom) = self.initial_view(&request.country);
        let init = MapInit {
            container_id: self.container_id.clone(),
            style_url: request.style_url.clone(),
            center,
            zoom,
            projection: request.projection,
        };

        let map = match self.factory.create_map(init).await {
            Ok(map) => map,
            Err(err) => return self.fail(block, MapreelError::Map(format!("{:#}", err))),
        };
        self.registry.register(&self.container_id, Arc::clone(&map));
        self.inner.lock().map = Some(Arc::clone(&map));

        let mut events = map.subscribe();
        let spec = WaitSpec::new(MapEventKind::Load, self.config.load_timeout).fail_on_error();
        match await_condition(|| map.loaded(), &mut events, spec).await {
            WaitOutcome::AlreadySatisfied | WaitOutcome::Observed => {}
            WaitOutcome::TimedOut => {
                tracing::warn!(
                    container_id = %self.container_id,
                    timeout_ms = self.config.load_timeout.as_millis() as u64,
                    "map load not confirmed, continuing"
                );
            }
            WaitOutcome::Failed(message) => return self.fail(block, MapreelError::Map(message)),
            WaitOutcome::Closed => {
                return self.fail(block, MapreelError::Map("map disposed during load".into()))
            }
        }

        if let Err(err) = self.install_highlight(map.as_ref(), &request.country) {
            return self.fail(block, err);
        }

        {
            let mut inner = self.inner.lock();
            if let Err(err) = self.advance(&mut inner, StatusEvent::InitComplete) {
                drop(inner);
                return self.fail(block, err);
            }
            inner.applied = Some(request);
        }
        block.resolve();
        tracing::info!(container_id = %self.container_id, "map initialized");
        SyncOutcome::Initialized
    }

    async fn swap_style(&self, map: Arc<dyn MapHandle>, request: SyncRequest) -> SyncOutcome {
        let block = self
            .ledger
            .acquire(format!("map style update {}", self.container_id));
        // Style swaps reset the view in some renderers.
        let pose = map.camera();

        let mut events = map.subscribe();
        if let Err(err) = map.set_style(&request.style_url) {
            return self.fail(
                block,
                MapreelError::style_load(format!("{:#}", err), &request.style_url),
            );
        }

        let spec = WaitSpec::new(MapEventKind::StyleLoaded, self.config.style_timeout)
            .fail_on_error()
            .with_poll(self.config.style_backoff);
        match await_condition(|| map.is_style_loaded(), &mut events, spec).await {
            WaitOutcome::AlreadySatisfied | WaitOutcome::Observed => {}
            WaitOutcome::TimedOut => {
                tracing::warn!(
                    container_id = %self.container_id,
                    style_url = %request.style_url,
                    "style load not confirmed, continuing"
                );
            }
            WaitOutcome::Failed(message) => {
                return self.fail(block, MapreelError::style_load(message, &request.style_url))
            }
            WaitOutcome::Closed => {
                return self.fail(
                    block,
                    MapreelError::style_load("map disposed during style swap", &request.style_url),
                )
            }
        }

        let rebuilt = map
            .set_projection(request.projection)
            .map_err(|err| MapreelError::Map(format!("{:#}", err)))
            .and_then(|_| self.install_highlight(map.as_ref(), &request.country))
            .and_then(|_| {
                map.jump_to(pose)
                    .map_err(|err| MapreelError::Map(format!("{:#}", err)))
            });
        if let Err(err) = rebuilt {
            return self.fail(block, err);
        }

        {
            let mut inner = self.inner.lock();
            if let Err(err) = self.advance(&mut inner, StatusEvent::StyleUpdateComplete) {
                drop(inner);
                return self.fail(block, err);
            }
            inner.applied = Some(request);
        }
        block.resolve();
        SyncOutcome::StyleUpdated
    }

    fn apply_in_place(
        &self,
        map: &Arc<dyn MapHandle>,
        applied: &SyncRequest,
        request: SyncRequest,
    ) -> SyncOutcome {
        let country_changed = !applied.country.eq_ignore_ascii_case(&request.country);
        let projection_changed = applied.projection != request.projection;

        let result = (|| -> anyhow::Result<()> {
            if country_changed {
                let filter = country_filter(&request.country);
                map.set_filter(FILL_LAYER_ID, filter.clone())?;
                map.set_filter(LINE_LAYER_ID, filter)?;
            }
            if projection_changed {
                map.set_projection(request.projection)?;
            }
            Ok(())
        })();

        if let Err(err) = result {
            let message = format!("{:#}", err);
            tracing::warn!(container_id = %self.container_id, error = %message, "in-place map update failed");
            return SyncOutcome::Failed(message);
        }

        let outcome = if country_changed || projection_changed {
            SyncOutcome::Applied {
                country_changed,
                projection_changed,
            }
        } else {
            SyncOutcome::Unchanged
        };
        self.inner.lock().applied = Some(request);
        outcome
    }

    /// Add the boundary source and highlight layers to the current style and
    /// point them at `alpha3`.
    fn install_highlight(&self, map: &dyn MapHandle, alpha3: &str) -> MapreelResult<()> {
        for layer in [LINE_LAYER_ID, FILL_LAYER_ID] {
            if map.has_layer(layer) {
                remove_layer_quietly(map, layer);
            }
        }

        let filter = country_filter(alpha3);
        let color = self.highlight_color.to_hex();
        let to_map_err = |err: anyhow::Error| MapreelError::Map(format!("{:#}", err));

        map.add_source(
            BOUNDARY_SOURCE_ID,
            json!({ "type": "vector", "url": self.config.boundaries_url }),
        )
        .map_err(to_map_err)?;
        map.add_layer(json!({
            "id": FILL_LAYER_ID,
            "type": "fill",
            "source": BOUNDARY_SOURCE_ID,
            "source-layer": BOUNDARY_SOURCE_LAYER,
            "filter": filter,
            "paint": { "fill-color": color, "fill-opacity": 0.0 },
        }))
        .map_err(to_map_err)?;
        map.add_layer(json!({
            "id": LINE_LAYER_ID,
            "type": "line",
            "source": BOUNDARY_SOURCE_ID,
            "source-layer": BOUNDARY_SOURCE_LAYER,
            "filter": filter,
            "paint": {
                "line-color": color,
                "line-width": self.config.line_width,
                "line-opacity": 0.0,
            },
        }))
        .map_err(to_map_err)?;

        map.set_filter(FILL_LAYER_ID, filter.clone())
            .map_err(to_map_err)?;
        map.set_filter(LINE_LAYER_ID, filter).map_err(to_map_err)?;
        Ok(())
    }

    /// Push one frame's camera and highlight opacity to the map.
    ///
    /// Returns `Ok(false)` without touching the map unless the status is
    /// `Idle`, or when `state` is the neutral "not ready" state.
    pub fn apply_frame(&self, state: &AnimationFrameState) -> MapreelResult<bool> {
        let map = {
            let inner = self.inner.lock();
            match (&inner.status, &inner.map) {
                (MapStatus::Idle, Some(map)) => Arc::clone(map),
                _ => return Ok(false),
            }
        };
        if state.is_neutral() {
            return Ok(false);
        }

        let to_map_err = |err: anyhow::Error| MapreelError::Map(format!("{:#}", err));
        map.jump_to(CameraPose {
            center: state.animated_center,
            zoom: state.animated_zoom,
            bearing: state.bearing,
            pitch: state.pitch,
        })
        .map_err(to_map_err)?;
        map.set_paint_property(FILL_LAYER_ID, "fill-opacity", json!(state.fill_opacity))
            .map_err(to_map_err)?;
        map.set_paint_property(LINE_LAYER_ID, "line-opacity", json!(state.line_opacity))
            .map_err(to_map_err)?;
        Ok(true)
    }

    /// Project a coordinate through the live map.
    pub fn project(&self, point: LngLat) -> Option<ScreenPoint> {
        self.map().map(|map| map.project(point))
    }

    /// Remove the highlight and dispose the map. Removal errors are expected
    /// during teardown and only logged.
    ///
    /// A torn-down synchronizer goes back to `Uninitialized` so the next sync
    /// mounts a fresh map. `Error` is kept until `reset`.
    pub fn teardown(&self) {
        let map = {
            let mut inner = self.inner.lock();
            if inner.status != MapStatus::Error {
                inner.status = MapStatus::Uninitialized;
            }
            inner.applied = None;
            inner.map.take()
        };
        if let Some(map) = map {
            for layer in [LINE_LAYER_ID, FILL_LAYER_ID] {
                remove_layer_quietly(map.as_ref(), layer);
            }
        }
        self.registry.cleanup(&self.container_id);
    }

    /// Tear down and start over from `Uninitialized`, as a fresh mount would.
    /// This is the only way out of `Error`.
    pub fn reset(&self) {
        self.teardown();
        let mut inner = self.inner.lock();
        inner.status = MapStatus::Uninitialized;
        inner.last_error = None;
    }
}

/// Fails the synchronizer if an initialization or style swap is dropped
/// before it finishes, so the status never stays busy.
struct BusyGuard<'a> {
    sync: &'a MapSynchronizer,
    armed: bool,
}

impl<'a> BusyGuard<'a> {
    fn arm(sync: &'a MapSynchronizer) -> Self {
        Self { sync, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.sync.inner.lock();
        if !inner.status.is_busy() {
            return;
        }
        tracing::warn!(
            container_id = %self.sync.container_id,
            status = %inner.status,
            "map synchronization cancelled"
        );
        let _ = self.sync.advance(&mut inner, StatusEvent::Fail);
        inner.last_error = Some("synchronization cancelled".to_string());
    }
}

fn remove_layer_quietly(map: &dyn MapHandle, layer: &str) {
    if let Err(err) = map.remove_layer(layer) {
        tracing::debug!(layer, error = %err, "ignoring layer removal error");
    }
}

impl MapReadiness for MapSynchronizer {
    fn map_loaded(&self) -> bool {
        self.map().is_some_and(|map| map.loaded())
    }

    fn tiles_settled(&self) -> bool {
        self.map().is_some_and(|map| map.are_tiles_loaded())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<MapEvent>> {
        self.map().map(|map| map.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessMap, HeadlessMapFactory, HeadlessMapOptions, MapCall, RecordingVideoHost};

    const LIGHT: &str = "style://light";
    const DARK: &str = "style://dark";

    struct Fixture {
        host: Arc<RecordingVideoHost>,
        factory: Arc<HeadlessMapFactory>,
        registry: Arc<MapRegistry>,
        sync: MapSynchronizer,
    }

    fn fixture(factory: HeadlessMapFactory) -> Fixture {
        let host = Arc::new(RecordingVideoHost::new(30.0));
        let factory = Arc::new(factory);
        let registry = Arc::new(MapRegistry::new());
        let sync = MapSynchronizer::new(
            "map-container",
            factory.clone(),
            registry.clone(),
            BlockLedger::new(host.clone()),
            Arc::new(CountryRegistry::builtin()),
        );
        Fixture {
            host,
            factory,
            registry,
            sync,
        }
    }

    fn headless(f: &Fixture) -> Arc<HeadlessMap> {
        f.factory.last().expect("map created")
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_installs_highlight() {
        let f = fixture(HeadlessMapFactory::new(HeadlessMapOptions::default()));
        let outcome = f
            .sync
            .sync_map_state(SyncRequest::new(LIGHT, "FRA", Projection::Mercator))
            .await;
        assert_eq!(outcome, SyncOutcome::Initialized);
        assert_eq!(f.sync.status(), MapStatus::Idle);
        assert!(f.registry.contains("map-container"));

        let map = headless(&f);
        assert_eq!(map.layer_ids(), vec![FILL_LAYER_ID, LINE_LAYER_ID]);
        assert_eq!(map.filter(FILL_LAYER_ID), Some(country_filter("FRA")));
        assert_eq!(map.filter(LINE_LAYER_ID), Some(country_filter("FRA")));
        assert!(f.host.outstanding().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_sync_while_initializing_is_dropped() {
        let f = fixture(
            HeadlessMapFactory::new(HeadlessMapOptions::default())
                .with_create_delay(Duration::from_millis(100)),
        );
        let request = SyncRequest::new(LIGHT, "FRA", Projection::Mercator);
        let (first, second) = tokio::join!(
            f.sync.sync_map_state(request.clone()),
            f.sync.sync_map_state(request.clone())
        );
        assert_eq!(first, SyncOutcome::Initialized);
        assert_eq!(second, SyncOutcome::Dropped(MapStatus::Initializing));
        assert_eq!(f.factory.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_country_and_projection_change_in_place() {
        let f = fixture(HeadlessMapFactory::new(HeadlessMapOptions::default()));
        f.sync
            .sync_map_state(SyncRequest::new(LIGHT, "FRA", Projection::Mercator))
            .await;
        let map = headless(&f);

        let outcome = f
            .sync
            .sync_map_state(SyncRequest::new(LIGHT, "NOR", Projection::Mercator))
            .await;
        assert_eq!(
            outcome,
            SyncOutcome::Applied {
                country_changed: true,
                projection_changed: false
            }
        );
        assert_eq!(map.filter(FILL_LAYER_ID), Some(country_filter("NOR")));

        let outcome = f
            .sync
            .sync_map_state(SyncRequest::new(LIGHT, "NOR", Projection::Globe))
            .await;
        assert_eq!(
            outcome,
            SyncOutcome::Applied {
                country_changed: false,
                projection_changed: true
            }
        );
        assert_eq!(map.projection(), Projection::Globe);
        assert_eq!(map.count_calls(|c| matches!(c, MapCall::SetStyle(_))), 0);
        assert_eq!(f.sync.status(), MapStatus::Idle);

        let outcome = f
            .sync
            .sync_map_state(SyncRequest::new(LIGHT, "NOR", Projection::Globe))
            .await;
        assert_eq!(outcome, SyncOutcome::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_style_swap_rebuilds_layers_and_restores_camera() {
        let f = fixture(HeadlessMapFactory::new(HeadlessMapOptions::default()));
        f.sync
            .sync_map_state(SyncRequest::new(LIGHT, "FRA", Projection::Mercator))
            .await;
        let map = headless(&f);

        let pose = CameraPose {
            center: LngLat::new(2.2, 46.2),
            zoom: 4.5,
            bearing: 12.0,
            pitch: 30.0,
        };
        map.jump_to(pose).unwrap();

        let outcome = f
            .sync
            .sync_map_state(SyncRequest::new(DARK, "FRA", Projection::Mercator))
            .await;
        assert_eq!(outcome, SyncOutcome::StyleUpdated);
        assert_eq!(f.sync.status(), MapStatus::Idle);
        assert_eq!(map.style_url(), DARK);
        assert_eq!(map.camera(), pose);
        assert!(map.has_layer(FILL_LAYER_ID));
        assert!(map.has_layer(LINE_LAYER_ID));
        assert_eq!(map.filter(LINE_LAYER_ID), Some(country_filter("FRA")));
        assert!(f.host.outstanding().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_style_load_is_found_by_polling() {
        let options = HeadlessMapOptions {
            silent_style_load: true,
            ..HeadlessMapOptions::default()
        };
        let f = fixture(HeadlessMapFactory::new(options));
        f.sync
            .sync_map_state(SyncRequest::new(LIGHT, "FRA", Projection::Mercator))
            .await;
        let start = tokio::time::Instant::now();
        let outcome = f
            .sync
            .sync_map_state(SyncRequest::new(DARK, "FRA", Projection::Mercator))
            .await;
        assert_eq!(outcome, SyncOutcome::StyleUpdated);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_style_failure_enters_error_state() {
        let options = HeadlessMapOptions {
            fail_style: Some("style 404".into()),
            ..HeadlessMapOptions::default()
        };
        let f = fixture(HeadlessMapFactory::new(options));
        f.sync
            .sync_map_state(SyncRequest::new(LIGHT, "FRA", Projection::Mercator))
            .await;

        let outcome = f
            .sync
            .sync_map_state(SyncRequest::new(DARK, "FRA", Projection::Mercator))
            .await;
        assert!(matches!(outcome, SyncOutcome::Failed(_)));
        assert_eq!(f.sync.status(), MapStatus::Error);
        assert!(f.sync.error_message().unwrap().contains("style 404"));
        assert!(f.host.outstanding().is_empty());

        let outcome = f
            .sync
            .sync_map_state(SyncRequest::new(LIGHT, "FRA", Projection::Mercator))
            .await;
        assert_eq!(outcome, SyncOutcome::Dropped(MapStatus::Error));

        f.sync.reset();
        assert_eq!(f.sync.status(), MapStatus::Uninitialized);
        assert!(!f.registry.contains("map-container"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_enters_error_state() {
        let f = fixture(HeadlessMapFactory::new(HeadlessMapOptions::default()).failing("no gpu"));
        let outcome = f
            .sync
            .sync_map_state(SyncRequest::new(LIGHT, "FRA", Projection::Mercator))
            .await;
        assert!(matches!(outcome, SyncOutcome::Failed(ref m) if m.contains("no gpu")));
        assert_eq!(f.sync.status(), MapStatus::Error);
        assert_eq!(f.host.released().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_timeout_never_leaves_status_busy() {
        let options = HeadlessMapOptions {
            load_delay: Duration::from_secs(60),
            ..HeadlessMapOptions::default()
        };
        let f = fixture(HeadlessMapFactory::new(options));
        let outcome = f
            .sync
            .sync_map_state(SyncRequest::new(LIGHT, "FRA", Projection::Mercator))
            .await;
        assert!(matches!(outcome, SyncOutcome::Failed(_)));
        assert!(!f.sync.status().is_busy());
        assert!(f.host.outstanding().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_frame_only_when_idle() {
        let f = fixture(HeadlessMapFactory::new(HeadlessMapOptions::default()));
        let state = AnimationFrameState {
            bearing: 10.0,
            pitch: 20.0,
            animated_center: LngLat::new(2.2, 46.2),
            animated_zoom: 4.8,
            fill_opacity: 0.3,
            line_opacity: 0.6,
            info_opacity: None,
        };
        assert!(!f.sync.apply_frame(&state).unwrap());

        f.sync
            .sync_map_state(SyncRequest::new(LIGHT, "FRA", Projection::Mercator))
            .await;
        assert!(f.sync.apply_frame(&state).unwrap());
        assert!(!f.sync.apply_frame(&AnimationFrameState::neutral()).unwrap());

        let map = headless(&f);
        assert_eq!(map.camera().bearing, 10.0);
        assert_eq!(map.paint(FILL_LAYER_ID, "fill-opacity"), Some(json!(0.3)));
        assert_eq!(map.paint(LINE_LAYER_ID, "line-opacity"), Some(json!(0.6)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_swallows_removal_errors() {
        let f = fixture(HeadlessMapFactory::new(HeadlessMapOptions::default()));
        f.sync
            .sync_map_state(SyncRequest::new(LIGHT, "FRA", Projection::Mercator))
            .await;
        let map = headless(&f);
        map.remove_layer(FILL_LAYER_ID).unwrap();
        f.sync.teardown();
        assert!(map.is_removed());
        assert!(f.sync.map().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_init_does_not_leave_status_busy() {
        let options = HeadlessMapOptions {
            load_delay: Duration::from_secs(5),
            ..HeadlessMapOptions::default()
        };
        let f = fixture(HeadlessMapFactory::new(options));
        let request = SyncRequest::new(LIGHT, "FRA", Projection::Mercator);
        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            f.sync.sync_map_state(request.clone()),
        )
        .await;
        assert!(cancelled.is_err());
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(f.sync.status(), MapStatus::Error);
        assert_eq!(f.sync.error_message().as_deref(), Some("synchronization cancelled"));
        assert!(f.host.outstanding().is_empty());

        f.sync.reset();
        assert_eq!(f.sync.sync_map_state(request).await, SyncOutcome::Initialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_style_swap_does_not_leave_status_busy() {
        let f = fixture(HeadlessMapFactory::new(HeadlessMapOptions::default()));
        f.sync
            .sync_map_state(SyncRequest::new(LIGHT, "FRA", Projection::Mercator))
            .await;
        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            f.sync
                .sync_map_state(SyncRequest::new(DARK, "FRA", Projection::Mercator)),
        )
        .await;
        assert!(cancelled.is_err());
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(f.sync.status(), MapStatus::Error);
        assert!(f.host.outstanding().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_after_teardown_mounts_a_new_map() {
        let f = fixture(HeadlessMapFactory::new(HeadlessMapOptions::default()));
        let request = SyncRequest::new(LIGHT, "FRA", Projection::Mercator);
        f.sync.sync_map_state(request.clone()).await;
        let first = headless(&f);

        f.sync.teardown();
        assert_eq!(f.sync.status(), MapStatus::Uninitialized);
        assert!(f.sync.applied().is_none());

        assert_eq!(f.sync.sync_map_state(request).await, SyncOutcome::Initialized);
        assert_eq!(f.factory.created_count(), 2);
        assert!(first.is_removed());
        assert!(!headless(&f).is_removed());
        assert!(f.registry.contains("map-container"));
    }
}
