mod composition;
mod frames;
mod simulate;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use composition::CompositionArgs;
use mapreel_core::config::CompositionConfig;
use mapreel_core::settings::{MotionPreset, Theme};
use mapreel_core::spring::measure_spring;

#[derive(Parser)]
#[command(
    name = "mapreel",
    version,
    about = "mapreel: deterministic map animation for video",
    long_about = "mapreel computes country-highlight map animations frame by frame.\nEvery frame is a pure function of its number, so any worker can render any frame."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the phase frames of a composition
    Timeline {
        #[command(flatten)]
        composition: CompositionArgs,
    },

    /// Dump per-frame animation state as JSON
    Frames {
        #[command(flatten)]
        composition: CompositionArgs,

        /// First frame (inclusive)
        #[arg(long, default_value_t = 0)]
        start: u64,

        /// Last frame (exclusive, default: composition duration)
        #[arg(long)]
        end: Option<u64>,

        /// Write JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a composition against a headless map with concurrent workers
    Simulate {
        #[command(flatten)]
        composition: CompositionArgs,

        /// Number of concurrent workers
        #[arg(short, long, default_value_t = 4)]
        workers: usize,

        /// Render only the first N frames
        #[arg(long)]
        frames: Option<u64>,

        /// Simulated map load latency in milliseconds
        #[arg(long, default_value_t = 200)]
        load_ms: u64,

        /// Simulated tile settle latency in milliseconds
        #[arg(long, default_value_t = 10)]
        settle_ms: u64,
    },

    /// List known countries
    Countries {
        /// JSON country dataset replacing the built-in table
        #[arg(long)]
        countries: Option<PathBuf>,
    },

    /// Write a starter composition file
    Init {
        /// Path of the TOML file to create
        #[arg()]
        path: PathBuf,

        /// ISO alpha-3 country code
        #[arg(long, default_value = "FRA")]
        country: String,
    },

    /// Display version and available presets
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Timeline { composition } => cmd_timeline(&composition),
        Commands::Frames {
            composition,
            start,
            end,
            output,
        } => frames::cmd_frames(&composition, start, end, output),
        Commands::Simulate {
            composition,
            workers,
            frames,
            load_ms,
            settle_ms,
        } => {
            let options = simulate::SimulateOptions {
                workers,
                frames,
                load_delay: std::time::Duration::from_millis(load_ms),
                settle_delay: std::time::Duration::from_millis(settle_ms),
            };
            run_async(simulate::cmd_simulate(composition, options))
        }
        Commands::Countries { countries } => cmd_countries(countries),
        Commands::Init { path, country } => cmd_init(&path, &country),
        Commands::Info => cmd_info(),
    }
}

fn run_async<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to initialize async runtime")?;
    runtime.block_on(future)
}

fn cmd_timeline(args: &CompositionArgs) -> Result<()> {
    let (composition, _) = args.resolve()?;
    let frames = composition.phase_frames();
    let fps = composition.fps;
    let at = |frame: u64| format!("{:>4}  ({:.2}s)", frame, frame as f64 / fps);

    println!(
        "🗺️  {} ({}) @ {}fps, {} frames",
        composition.country.name, composition.country.alpha3, fps, composition.duration_frames
    );
    println!("   Stabilized:         {}", at(frames.stabilization_complete));
    println!("   Highlight start:    {}", at(frames.highlight_start));
    println!("   Highlight complete: {}", at(frames.highlight_complete));
    println!("   Label start:        {}", at(frames.label_start));
    println!("   Label complete:     {}", at(frames.label_complete));

    let camera = &composition.motion.camera;
    let camera_settled = u64::from(camera.start_delay)
        + measure_spring(fps, &camera.rotation_spring, 0.005)
            .max(measure_spring(fps, &camera.pitch_spring, 0.005));
    println!("   Camera settles:     {}", at(camera_settled));

    let needed = composition.timeline.settled_frame().max(camera_settled);
    if needed > composition.duration_frames {
        println!(
            "   ⚠️  Duration ends before the animation settles (needs {} frames)",
            needed
        );
    }
    Ok(())
}

fn cmd_countries(countries: Option<PathBuf>) -> Result<()> {
    let args = CompositionArgs {
        countries,
        ..Default::default()
    };
    let registry = args.registry()?;
    println!("🌍 {} countries", registry.len());
    for country in registry.all() {
        let marker = if country.bounds_override.is_some() {
            " *"
        } else {
            ""
        };
        println!(
            "   {}  {:<24} zoom {:>4.1}{}",
            country.alpha3, country.name, country.zoom_level, marker
        );
    }
    println!("   (* uses a curated bounding box)");
    Ok(())
}

fn cmd_init(path: &std::path::Path, country: &str) -> Result<()> {
    if path.exists() {
        anyhow::bail!("'{}' already exists", path.display());
    }
    let config = CompositionConfig::for_country(country.to_ascii_uppercase());
    config
        .resolve(&mapreel_core::country::CountryRegistry::builtin())
        .with_context(|| format!("cannot create composition for '{}'", country))?;
    config
        .save_to_file(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("✓ Created {}", path.display());
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("🎬 mapreel");
    println!("   Version:  {}", env!("CARGO_PKG_VERSION"));
    let presets: Vec<&str> = MotionPreset::ALL.iter().map(|p| p.name()).collect();
    println!("   Presets:  {}", presets.join(", "));
    println!("   Themes:   {}", Theme::NAMES.join(", "));
    println!("   Projections: mercator, globe");
    Ok(())
}
