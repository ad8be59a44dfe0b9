//! `mapreel simulate`: headless multi-worker render.
//!
//! Each worker owns its own video host, map and driver and renders an
//! interleaved share of the frames, odd workers in reverse order. A reference
//! worker renders every frame sequentially alongside them. The run passes
//! when every frame's fingerprint and overlay match the reference and no
//! render block or map instance is left behind.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::future::join_all;

use mapreel_core::config::ResolvedComposition;
use mapreel_core::country::CountryRegistry;
use mapreel_core::hash::ContentHash;
use mapreel_map::{
    BlockLedger, FrameDriver, GateOutcome, HeadlessMapFactory, HeadlessMapOptions, MapRegistry,
    MapSynchronizer, OverlayState, RecordingVideoHost,
};

use crate::composition::CompositionArgs;

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub workers: usize,
    pub frames: Option<u64>,
    pub load_delay: Duration,
    pub settle_delay: Duration,
}

/// What one worker produced for one frame.
#[derive(Debug, Clone, PartialEq)]
struct RenderedFrame {
    fingerprint: ContentHash,
    overlay: OverlayState,
}

#[derive(Debug, Default)]
struct WorkerResult {
    frames: Vec<(u64, RenderedFrame)>,
    timed_out: usize,
    leaked: usize,
    double_releases: usize,
    error: Option<String>,
}

/// Aggregate outcome of a simulated render.
#[derive(Debug, Default)]
pub struct SimulationSummary {
    pub frames: u64,
    pub rendered: usize,
    pub mismatched: Vec<u64>,
    pub timed_out: usize,
    pub leaked: usize,
    /// Map instances still registered after every worker tore down.
    pub leaked_maps: usize,
    pub double_releases: usize,
    pub errors: Vec<String>,
}

impl SimulationSummary {
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty()
            && self.leaked == 0
            && self.leaked_maps == 0
            && self.double_releases == 0
            && self.rendered as u64 == self.frames
    }
}

async fn render_worker(
    name: String,
    frames: Vec<u64>,
    composition: Arc<ResolvedComposition>,
    countries: Arc<CountryRegistry>,
    registry: Arc<MapRegistry>,
    options: &SimulateOptions,
) -> WorkerResult {
    let host = Arc::new(RecordingVideoHost::new(composition.fps));
    let ledger = BlockLedger::new(host.clone());
    let factory = Arc::new(HeadlessMapFactory::new(HeadlessMapOptions {
        load_delay: options.load_delay,
        style_load_delay: options.load_delay / 2,
        tile_settle_delay: options.settle_delay,
        ..HeadlessMapOptions::default()
    }));
    let sync = MapSynchronizer::new(
        name.clone(),
        factory,
        registry,
        Arc::clone(&ledger),
        countries,
    )
    .with_highlight_color(composition.highlight_color);
    let driver = FrameDriver::new(composition, Arc::new(sync), Arc::clone(&ledger));

    let mut result = WorkerResult::default();
    for frame in frames {
        host.set_frame(frame);
        let report = driver.render_current_frame().await;
        if report.gate == Some(GateOutcome::TimedOut) {
            result.timed_out += 1;
        }
        if result.error.is_none() {
            result.error = report.error.clone();
        }
        result.frames.push((
            frame,
            RenderedFrame {
                fingerprint: report.fingerprint,
                overlay: report.overlay,
            },
        ));
    }

    ledger.stuck(Duration::from_secs(1));
    driver.teardown().await;
    let forced = ledger.force_resolve_all();
    if forced > 0 {
        tracing::warn!(worker = %name, forced, "released leftover render blocks");
    }
    result.leaked = host.outstanding().len() + forced;
    result.double_releases = host.double_releases();
    tracing::debug!(worker = %name, issued = ledger.issued(), "worker finished");
    result
}

pub async fn run_simulation(
    composition: Arc<ResolvedComposition>,
    countries: Arc<CountryRegistry>,
    options: &SimulateOptions,
) -> SimulationSummary {
    let workers = options.workers.max(1);
    let total = options
        .frames
        .unwrap_or(composition.duration_frames)
        .min(composition.duration_frames);

    let registry = Arc::new(MapRegistry::new());

    let shares = (0..workers).map(|index| {
        let mut frames: Vec<u64> = (index as u64..total).step_by(workers).collect();
        if index % 2 == 1 {
            frames.reverse();
        }
        (format!("worker-{}", index), frames)
    });
    let jobs = std::iter::once(("reference".to_string(), (0..total).collect::<Vec<u64>>()))
        .chain(shares)
        .map(|(name, frames)| {
            render_worker(
                name,
                frames,
                Arc::clone(&composition),
                Arc::clone(&countries),
                Arc::clone(&registry),
                options,
            )
        });
    let mut results = join_all(jobs).await.into_iter();
    let reference: BTreeMap<u64, RenderedFrame> = results
        .next()
        .map(|r| r.frames.into_iter().collect())
        .unwrap_or_default();

    let mut summary = SimulationSummary {
        frames: total,
        ..SimulationSummary::default()
    };
    let mut rendered = BTreeMap::new();
    for result in results {
        summary.timed_out += result.timed_out;
        summary.leaked += result.leaked;
        summary.double_releases += result.double_releases;
        summary.errors.extend(result.error);
        rendered.extend(result.frames);
    }
    summary.rendered = rendered.len();
    summary.mismatched = rendered
        .iter()
        .filter(|(frame, produced)| reference.get(*frame) != Some(*produced))
        .map(|(frame, _)| *frame)
        .collect();

    summary.leaked_maps = registry.cleanup_all();
    if summary.leaked_maps > 0 {
        tracing::warn!(maps = summary.leaked_maps, "disposed map instances left after teardown");
    }
    summary
}

pub async fn cmd_simulate(args: CompositionArgs, options: SimulateOptions) -> Result<()> {
    let (composition, countries) = args.resolve()?;
    let started = Instant::now();
    println!(
        "🎞️  Simulating {} with {} worker(s)",
        composition.country.name,
        options.workers.max(1)
    );

    let summary = run_simulation(Arc::new(composition), Arc::new(countries), &options).await;

    println!("   Frames rendered: {}/{}", summary.rendered, summary.frames);
    println!("   Gate timeouts:   {}", summary.timed_out);
    println!("   Leaked blocks:   {}", summary.leaked);
    println!("   Leaked maps:     {}", summary.leaked_maps);
    println!("   Double releases: {}", summary.double_releases);
    for error in &summary.errors {
        println!("   ⚠️  Map error: {}", error);
    }
    println!("   Elapsed:         {:.2?}", started.elapsed());

    if !summary.mismatched.is_empty() {
        anyhow::bail!(
            "{} frame(s) diverged between workers, first at frame {}",
            summary.mismatched.len(),
            summary.mismatched[0]
        );
    }
    if !summary.is_clean() {
        anyhow::bail!("simulation left render blocks in an inconsistent state");
    }
    println!("✓ All frames reproduced bit-identically");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapreel_core::config::CompositionConfig;

    fn options(workers: usize, frames: u64) -> SimulateOptions {
        SimulateOptions {
            workers,
            frames: Some(frames),
            load_delay: Duration::from_millis(200),
            settle_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_reproduce_every_frame() {
        let countries = Arc::new(CountryRegistry::builtin());
        let composition = Arc::new(CompositionConfig::for_country("CHL").resolve(&countries).unwrap());
        let summary = run_simulation(composition, countries, &options(3, 40)).await;
        assert_eq!(summary.rendered, 40);
        assert!(summary.mismatched.is_empty());
        assert!(summary.errors.is_empty());
        assert_eq!(summary.leaked_maps, 0);
        assert!(summary.is_clean(), "{:?}", summary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverse_workers_freeze_the_same_icon() {
        let countries = Arc::new(CountryRegistry::builtin());
        let composition = Arc::new(CompositionConfig::for_country("USA").resolve(&countries).unwrap());
        let registry = Arc::new(MapRegistry::new());
        let frames = composition.phase_frames().label_complete + 5;

        let forward = render_worker(
            "forward".into(),
            (0..frames).collect(),
            Arc::clone(&composition),
            Arc::clone(&countries),
            Arc::clone(&registry),
            &options(1, frames),
        )
        .await;
        let reverse = render_worker(
            "reverse".into(),
            (0..frames).rev().collect(),
            Arc::clone(&composition),
            Arc::clone(&countries),
            Arc::clone(&registry),
            &options(1, frames),
        )
        .await;

        let forward: BTreeMap<_, _> = forward.frames.into_iter().collect();
        let reverse: BTreeMap<_, _> = reverse.frames.into_iter().collect();
        assert_eq!(forward, reverse);
        let last = forward[&(frames - 1)].overlay;
        assert!(last.icon.is_some());
        assert_eq!(last.icon_opacity, 1.0);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_limit_is_capped_by_duration() {
        let countries = Arc::new(CountryRegistry::builtin());
        let mut config = CompositionConfig::for_country("FRA");
        config.duration_frames = 12;
        let composition = Arc::new(config.resolve(&countries).unwrap());
        let summary = run_simulation(composition, countries, &options(0, 500)).await;
        assert_eq!(summary.frames, 12);
        assert_eq!(summary.rendered, 12);
        assert!(summary.is_clean());
    }
}
