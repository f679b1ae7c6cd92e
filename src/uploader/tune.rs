//! Adaptive chunk sizing from observed network conditions

/// Smallest chunk the engine will use (256 KiB)
pub const MIN_CHUNK_SIZE: u64 = 256 * 1024;

/// Largest chunk the engine will use (16 MiB)
pub const MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Starting point for proposals (1 MiB)
const BASE_CHUNK_SIZE: f64 = (1024 * 1024) as f64;

/// The controller consults the tuner only after this many chunks completed
pub const MIN_SAMPLES_FOR_TUNING: usize = 5;

/// A proposal is applied only when it differs from the current size by more
/// than this fraction of the current size
pub const RETUNE_RATIO: f64 = 0.5;

/// Propose a chunk size for the observed conditions.
///
/// Fast links scale the base up linearly (capped at 8x); high latency also
/// pushes the size up, since fewer round trips amortize it better. The
/// result is clamped to `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]` and rounded to
/// the nearest power of two.
pub fn propose_chunk_size(speed_bps: f64, latency_ms: f64, _file_size: u64) -> u64 {
    let speed_factor = (speed_bps / BASE_CHUNK_SIZE).min(8.0).max(0.0);
    let latency_factor = (latency_ms / 100.0).min(4.0).max(0.0);

    let candidate = BASE_CHUNK_SIZE * speed_factor * (1.0 + latency_factor);
    let clamped = candidate.clamp(MIN_CHUNK_SIZE as f64, MAX_CHUNK_SIZE as f64);

    round_to_power_of_two(clamped)
}

/// Whether `proposed` is far enough from `current` to justify re-planning
pub fn should_retune(current: u64, proposed: u64) -> bool {
    let diff = current.abs_diff(proposed) as f64;
    diff > RETUNE_RATIO * current as f64
}

fn round_to_power_of_two(value: f64) -> u64 {
    let exp = value.log2().round() as u32;
    1u64 << exp
}
