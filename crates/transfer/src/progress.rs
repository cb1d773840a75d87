use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Callback invoked with the session's progress percentage.
pub type ProgressCallback = Box<dyn Fn(u8) + Send + Sync>;

/// Percentage of `done` out of `total`, rounded half up.
///
/// Never reports 100 until `done == total`, so 199 of 200 chunks reads 99.
/// An empty total is complete by definition.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 || done >= total {
        return 100;
    }
    let rounded = (200 * done as u128 + total as u128) / (2 * total as u128);
    rounded.min(99) as u8
}

// ---------------------------------------------------------------------------
// ProgressAggregator
// ---------------------------------------------------------------------------

/// Turns completed-chunk counts into a monotonic percentage and notifies
/// observers synchronously.
pub struct ProgressAggregator {
    total_chunks: u64,
    uploaded: u64,
    percent: u8,
    callbacks: Vec<ProgressCallback>,
}

impl ProgressAggregator {
    pub fn new(total_chunks: u64) -> Self {
        Self {
            total_chunks,
            uploaded: 0,
            percent: 0,
            callbacks: Vec::new(),
        }
    }

    /// Registers a progress callback.
    pub fn on_progress(&mut self, callback: ProgressCallback) {
        self.callbacks.push(callback);
    }

    /// Starts the count at `already_uploaded` (chunks confirmed by the store)
    /// and notifies observers of the resulting percentage.
    pub fn seed(&mut self, already_uploaded: u64) -> u8 {
        self.uploaded = self.uploaded.max(already_uploaded.min(self.total_chunks));
        self.recompute()
    }

    /// Counts one more uploaded chunk and notifies observers.
    pub fn record_success(&mut self) -> u8 {
        if self.uploaded < self.total_chunks {
            self.uploaded += 1;
        }
        self.recompute()
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn uploaded_count(&self) -> u64 {
        self.uploaded
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    fn recompute(&mut self) -> u8 {
        self.percent = self.percent.max(percent_of(self.uploaded, self.total_chunks));
        for cb in &self.callbacks {
            cb(self.percent);
        }
        self.percent
    }
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("total_chunks", &self.total_chunks)
            .field("uploaded", &self.uploaded)
            .field("percent", &self.percent)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

/// Calculates transfer speed over a sliding window of samples.
#[derive(Debug)]
pub struct SpeedCalculator {
    samples: VecDeque<(Instant, u64)>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.unwrap_or(100).max(2),
            window_size: window_size.unwrap_or(Duration::from_secs(5)),
        }
    }

    /// Records `bytes` transferred at `now`.
    pub fn record(&mut self, bytes: u64, now: Instant) {
        self.samples.push_back((now, bytes));

        while let Some(&(ts, _)) = self.samples.front() {
            if now.duration_since(ts) > self.window_size {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average bytes/second within the window, 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.0.duration_since(first.0);
        if self.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|(_, b)| b).sum();
        total as f64 / elapsed.as_secs_f64()
    }
}
