use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use fileflow_protocol::TransferId;

use crate::TransferSnapshot;

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Formats a byte count as `B`, `KB`, `MB` or `GB` with one decimal.
pub fn format_bytes(bytes: u64) -> String {
    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < MIB {
        format!("{:.1} KB", b / KIB)
    } else if b < GIB {
        format!("{:.1} MB", b / MIB)
    } else {
        format!("{:.1} GB", b / GIB)
    }
}

/// Formats a rate as `B/s`, `KB/s` or `MB/s` with one decimal.
pub fn format_speed(bytes_per_second: f64) -> String {
    if bytes_per_second < KIB {
        format!("{bytes_per_second:.1} B/s")
    } else if bytes_per_second < MIB {
        format!("{:.1} KB/s", bytes_per_second / KIB)
    } else {
        format!("{:.1} MB/s", bytes_per_second / MIB)
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred since the previous sample.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, now: Instant) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples. The first sample only marks the
    /// start of the window, so its bytes are not counted.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples[1..].iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.samples.clear();
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

// ---------------------------------------------------------------------------
// ProgressTracker
// ---------------------------------------------------------------------------

/// Turns a stream of snapshots into per-transfer speed estimates.
#[derive(Default)]
pub struct ProgressTracker {
    transfers: HashMap<TransferId, Tracked>,
}

struct Tracked {
    last_bytes: u64,
    speed: SpeedCalculator,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a snapshot and returns the transfer's current speed.
    ///
    /// Terminal snapshots stop tracking the transfer.
    pub fn observe(&mut self, snapshot: &TransferSnapshot) -> f64 {
        if snapshot.is_terminal() {
            return self
                .transfers
                .remove(&snapshot.id)
                .map_or(0.0, |t| t.speed.bytes_per_second());
        }
        let tracked = self
            .transfers
            .entry(snapshot.id.clone())
            .or_insert_with(|| Tracked {
                last_bytes: 0,
                speed: SpeedCalculator::default(),
            });
        let delta = snapshot.bytes_acknowledged.saturating_sub(tracked.last_bytes);
        tracked.last_bytes = snapshot.bytes_acknowledged;
        tracked.speed.add_sample(delta);
        tracked.speed.bytes_per_second()
    }

    /// Estimated time left for a tracked transfer.
    pub fn eta(&self, snapshot: &TransferSnapshot) -> Option<Duration> {
        let tracked = self.transfers.get(&snapshot.id)?;
        tracked
            .speed
            .eta(snapshot.declared_size.saturating_sub(snapshot.bytes_acknowledged))
    }

    pub fn tracked(&self) -> usize {
        self.transfers.len()
    }
}
