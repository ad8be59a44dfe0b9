//! Content hashing for deterministic output verification.
//!
//! Produces a SHA-256 hash over the exact IEEE-754 bit patterns of a frame
//! state, so two workers agree on a frame only if every field is bit-identical.

use sha2::{Digest, Sha256};

use crate::frame_state::AnimationFrameState;

/// A content hash digest (SHA-256, 32 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    bytes: [u8; 32],
}

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Get the hash as a hex string.
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn finish(hasher: Sha256) -> ContentHash {
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    ContentHash::from_bytes(bytes)
}

fn update_state(hasher: &mut Sha256, state: &AnimationFrameState) {
    for v in [
        state.bearing,
        state.pitch,
        state.animated_center.lng,
        state.animated_center.lat,
        state.animated_zoom,
        state.fill_opacity,
        state.line_opacity,
    ] {
        hasher.update(v.to_bits().to_le_bytes());
    }
    // Tag byte keeps "no info channel" distinct from any info value.
    match state.info_opacity {
        Some(v) => {
            hasher.update([1u8]);
            hasher.update(v.to_bits().to_le_bytes());
        }
        None => hasher.update([0u8]),
    }
}

/// Compute the content hash of a single frame state.
pub fn hash_frame_state(state: &AnimationFrameState) -> ContentHash {
    let mut hasher = Sha256::new();
    update_state(&mut hasher, state);
    finish(hasher)
}

/// Compute the content hash of a sequence of frame states (a whole render).
pub fn hash_frame_states(states: &[AnimationFrameState]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update((states.len() as u64).to_le_bytes());
    for state in states {
        update_state(&mut hasher, state);
    }
    finish(hasher)
}
