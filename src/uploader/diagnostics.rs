//! Online network diagnostics from completed transfer attempts

use std::collections::VecDeque;
use std::time::Instant;

/// Maximum number of samples retained; the newest evicts the oldest
const WINDOW_SIZE: usize = 10;

/// One completed-attempt measurement
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub speed_bps: f64,
    pub latency_ms: f64,
    pub at: Instant,
}

/// Point-in-time view of the window, safe to hand to the tuner
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticsSnapshot {
    pub mean_speed: f64,
    pub mean_latency: f64,
    pub latency_stddev: f64,
    pub stability: f64,
    pub sample_count: usize,
}

/// Sliding window of transfer samples.
///
/// Written only by the session controller (workers post samples through the
/// event channel); reads are snapshots, so no interior locking is needed.
#[derive(Debug, Default)]
pub struct NetworkDiagnostics {
    samples: VecDeque<Sample>,
}

impl NetworkDiagnostics {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW_SIZE),
        }
    }

    /// Record a sample, evicting the oldest once the window is full
    pub fn record(&mut self, speed_bps: f64, latency_ms: f64) {
        if self.samples.len() == WINDOW_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            speed_bps,
            latency_ms,
            at: Instant::now(),
        });
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Arithmetic mean of speeds, 0 when no samples exist
    pub fn mean_speed(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.speed_bps).sum::<f64>() / self.samples.len() as f64
    }

    /// Arithmetic mean of latencies, 0 when no samples exist
    pub fn mean_latency(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.latency_ms).sum::<f64>() / self.samples.len() as f64
    }

    /// Sample standard deviation of latency, 0 with fewer than two samples
    pub fn latency_stddev(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean_latency();
        let variance = self
            .samples
            .iter()
            .map(|s| {
                let d = s.latency_ms - mean;
                d * d
            })
            .sum::<f64>()
            / (n - 1) as f64;
        variance.sqrt()
    }

    /// `1 - stddev / mean_latency`, clamped to [0, 1]; 0 when the mean
    /// latency is 0. Higher means a smoother connection.
    pub fn stability(&self) -> f64 {
        let mean = self.mean_latency();
        if mean <= 0.0 {
            return 0.0;
        }
        (1.0 - self.latency_stddev() / mean).clamp(0.0, 1.0)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            mean_speed: self.mean_speed(),
            mean_latency: self.mean_latency(),
            latency_stddev: self.latency_stddev(),
            stability: self.stability(),
            sample_count: self.samples.len(),
        }
    }
}
