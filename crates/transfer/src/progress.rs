use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Sample {
    bytes: u64,
    timestamp: Instant,
}

/// Run-wide throughput over a sliding window.
///
/// Workers report acknowledged bytes; the orchestrator reads the rate for
/// its periodic progress line.
pub struct ThroughputMeter {
    inner: Mutex<MeterInner>,
}

struct MeterInner {
    samples: Vec<Sample>,
    max_samples: usize,
    window_size: Duration,
    total_bytes: u64,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl ThroughputMeter {
    /// Creates a new meter.
    ///
    /// - `window_size`: time window for the rate (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(MeterInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
                total_bytes: 0,
            }),
        }
    }

    /// Records `bytes` acknowledged at the current instant.
    pub fn record(&self, bytes: u64) {
        self.record_at(bytes, Instant::now());
    }

    fn record_at(&self, bytes: u64, now: Instant) {
        let Ok(mut s) = self.inner.lock() else {
            return;
        };
        s.total_bytes += bytes;
        s.samples.push(Sample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }
        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average rate in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let Ok(s) = self.inner.lock() else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }

        let first = &s.samples[0];
        let last = &s.samples[s.samples.len() - 1];
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Bytes recorded since creation.
    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().map(|s| s.total_bytes).unwrap_or(0)
    }

    /// Estimated time to move `remaining_bytes`; `None` while the rate is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }
}
