//! `mapreel frames`: per-frame state dump.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use mapreel_core::config::ResolvedComposition;
use mapreel_core::frame_state::AnimationFrameState;
use mapreel_core::hash::hash_frame_states;
use mapreel_core::timeline::{derive_phase, PhaseState};

use crate::composition::CompositionArgs;

#[derive(Debug, Serialize)]
pub struct FrameRecord {
    pub frame: u64,
    pub phase: PhaseState,
    pub state: AnimationFrameState,
    pub fingerprint: String,
}

#[derive(Debug, Serialize)]
struct FrameDump {
    country: String,
    fps: f64,
    /// Digest over every dumped state, for comparing whole renders.
    digest: String,
    frames: Vec<FrameRecord>,
}

pub fn frame_records(composition: &ResolvedComposition, start: u64, end: u64) -> Vec<FrameRecord> {
    let phases = composition.phase_frames();
    (start..end)
        .map(|frame| {
            let state = composition.frame_state(frame);
            FrameRecord {
                frame,
                phase: derive_phase(frame, &phases),
                fingerprint: state.fingerprint().to_hex(),
                state,
            }
        })
        .collect()
}

/// Content hash over the states of `records`, in order.
pub fn run_digest(records: &[FrameRecord]) -> String {
    let states: Vec<AnimationFrameState> = records.iter().map(|r| r.state).collect();
    hash_frame_states(&states).to_hex()
}

pub fn cmd_frames(
    args: &CompositionArgs,
    start: u64,
    end: Option<u64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let (composition, _) = args.resolve()?;
    let end = end.unwrap_or(composition.duration_frames);
    if start >= end {
        anyhow::bail!("empty frame range {}..{}", start, end);
    }

    let frames = frame_records(&composition, start, end);
    let dump = FrameDump {
        country: composition.country.alpha3.clone(),
        fps: composition.fps,
        digest: run_digest(&frames),
        frames,
    };
    let json = serde_json::to_string_pretty(&dump).context("failed to serialize frames")?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(
                frames = dump.frames.len(),
                digest = %dump.digest,
                path = %path.display(),
                "frames written"
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
