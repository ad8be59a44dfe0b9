use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mapreel_core::config::{CompositionConfig, ResolvedComposition};
use mapreel_core::country::CountryRegistry;
use mapreel_map::headless::MapCall;
use mapreel_map::{
    BlockLedger, FrameDriver, GateOutcome, HeadlessMapFactory, HeadlessMapOptions, MapRegistry,
    MapHandle, MapStatus, MapSynchronizer, RecordingVideoHost, SyncOutcome,
};

struct Pipeline {
    host: Arc<RecordingVideoHost>,
    factory: Arc<HeadlessMapFactory>,
    driver: FrameDriver,
}

fn composition(country: &str) -> Arc<ResolvedComposition> {
    let countries = CountryRegistry::builtin();
    Arc::new(
        CompositionConfig::for_country(country)
            .resolve(&countries)
            .expect("composition should resolve"),
    )
}

fn pipeline(country: &str, options: HeadlessMapOptions) -> Pipeline {
    let composition = composition(country);
    let host = Arc::new(RecordingVideoHost::new(composition.fps));
    let ledger = BlockLedger::new(host.clone());
    let factory = Arc::new(HeadlessMapFactory::new(options));
    let sync = MapSynchronizer::new(
        "render-root",
        factory.clone(),
        Arc::new(MapRegistry::new()),
        Arc::clone(&ledger),
        Arc::new(CountryRegistry::builtin()),
    )
    .with_highlight_color(composition.highlight_color);
    let driver = FrameDriver::new(composition, Arc::new(sync), ledger);
    Pipeline {
        host,
        factory,
        driver,
    }
}

#[tokio::test(start_paused = true)]
async fn test_sequential_render_releases_every_frame() {
    let p = pipeline("FRA", HeadlessMapOptions::default());

    let mut reports = Vec::new();
    for frame in 0..60 {
        p.host.set_frame(frame);
        reports.push(p.driver.render_current_frame().await);
    }

    assert_eq!(reports[0].sync, SyncOutcome::Initialized);
    assert!(reports[1..].iter().all(|r| r.sync == SyncOutcome::Unchanged));
    assert!(reports.iter().all(|r| r.applied));
    assert!(reports
        .iter()
        .all(|r| matches!(r.gate, Some(GateOutcome::Idle) | Some(GateOutcome::Settled))));
    assert_eq!(p.factory.created_count(), 1);

    // One block for map init plus one per frame.
    assert_eq!(p.host.acquired().len(), 61);
    assert!(p.host.outstanding().is_empty());
    assert_eq!(p.host.double_releases(), 0);

    // Icon geometry is frozen once the view has stabilized.
    let stabilized = p.driver.composition().phase_frames().stabilization_complete as usize;
    assert!(reports[stabilized - 1].overlay.icon.is_none());
    let icon = reports[stabilized].overlay.icon;
    assert!(icon.is_some());
    assert!(reports[stabilized..].iter().all(|r| r.overlay.icon == icon));

    let label_complete = p.driver.composition().phase_frames().label_complete as usize;
    assert!(!reports[stabilized].overlay.is_visible());
    assert!(reports[label_complete].overlay.is_visible());
    assert_eq!(reports[label_complete].overlay.icon_opacity, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_workers_agree_on_every_frame() {
    let forward = pipeline("NOR", HeadlessMapOptions::default());
    let backward = pipeline("NOR", HeadlessMapOptions::instant());

    let mut expected = HashMap::new();
    for frame in 0..48u64 {
        let report = forward.driver.render_frame(frame).await;
        expected.insert(frame, (report.fingerprint, report.overlay));
    }
    for frame in (0..48u64).rev() {
        let report = backward.driver.render_frame(frame).await;
        let (fingerprint, overlay) = &expected[&frame];
        assert_eq!(*fingerprint, report.fingerprint, "frame {frame} diverged");
        assert_eq!(*overlay, report.overlay, "overlay at frame {frame} diverged");
    }
    assert!(expected.values().any(|(_, overlay)| overlay.icon.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_highlight_opacity_reaches_the_map() {
    let p = pipeline("FRA", HeadlessMapOptions::default());
    let complete = p.driver.composition().phase_frames().highlight_complete + 30;
    let report = p.driver.render_frame(complete).await;

    let map = p.factory.last().expect("map created");
    let fill = map
        .paint(mapreel_map::sync::FILL_LAYER_ID, "fill-opacity")
        .and_then(|v| v.as_f64())
        .unwrap();
    assert_eq!(fill, report.state.fill_opacity);
    assert!(fill > 0.0);
    assert_eq!(map.camera().bearing, report.state.bearing);
}

#[tokio::test(start_paused = true)]
async fn test_map_failure_degrades_without_leaking_blocks() {
    let options = HeadlessMapOptions {
        fail_load: Some("tile server unreachable".into()),
        ..HeadlessMapOptions::default()
    };
    let p = pipeline("FRA", options);

    let first = p.driver.render_frame(0).await;
    assert!(matches!(first.sync, SyncOutcome::Failed(_)));
    assert_eq!(first.gate, Some(GateOutcome::NotLoaded));
    assert!(!first.applied);
    assert!(first
        .error
        .as_deref()
        .unwrap()
        .contains("tile server unreachable"));
    assert!(p.host.aborted().is_none());

    let second = p.driver.render_frame(1).await;
    assert_eq!(second.sync, SyncOutcome::Dropped(MapStatus::Error));
    assert!(p.host.outstanding().is_empty());
    assert_eq!(p.factory.created_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abort_on_error_reports_to_host() {
    let options = HeadlessMapOptions {
        fail_load: Some("webgl context lost".into()),
        ..HeadlessMapOptions::default()
    };
    let p = pipeline("FRA", options);
    let driver = p.driver.abort_on_error(true);
    driver.render_frame(0).await;
    assert!(p.host.aborted().unwrap().contains("webgl context lost"));
}

#[tokio::test(start_paused = true)]
async fn test_scrubbing_supersedes_pending_holds() {
    let options = HeadlessMapOptions {
        never_settle: true,
        ..HeadlessMapOptions::default()
    };
    let p = pipeline("FRA", options);

    for frame in [10, 11, 12, 30] {
        let report = p.driver.preview_frame(frame).await;
        assert!(report.gate.is_none());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(p.host.outstanding().len(), 1);

    p.driver.teardown().await;
    assert!(p.host.outstanding().is_empty());
    assert_eq!(p.host.double_releases(), 0);

    let map = p.factory.last().unwrap();
    assert!(map.is_removed());
    assert_eq!(map.count_calls(|c| matches!(c, MapCall::Remove)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_render_after_teardown_remounts_the_map() {
    let p = pipeline("FRA", HeadlessMapOptions::default());
    p.driver.render_frame(5).await;
    p.driver.teardown().await;
    assert_eq!(p.driver.synchronizer().status(), MapStatus::Uninitialized);

    let report = p.driver.render_frame(6).await;
    assert_eq!(report.sync, SyncOutcome::Initialized);
    assert!(report.applied);
    assert_eq!(p.factory.created_count(), 2);
    assert!(p.host.outstanding().is_empty());
}
