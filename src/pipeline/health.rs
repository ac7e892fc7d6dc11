//! Health monitoring and metrics for the pipeline

use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Health metrics for the capture/composite/record pipeline
///
/// Tracks counters across all stages to monitor pipeline behavior.
/// All fields use atomic operations for thread-safe access.
pub struct PipelineHealth {
    /// Synchronized ticks that produced a capture frame
    pub ticks_synced: AtomicU64,

    /// Ticks skipped because color or depth was dropped in transit
    pub ticks_skipped: AtomicU64,

    /// Resolution changes observed (each sacrifices one tick)
    pub resolution_changes: AtomicU64,

    /// Frames composited and submitted to the sink
    pub frames_composited: AtomicU64,

    /// Frames appended to the recording container
    pub frames_recorded: AtomicU64,

    /// Audio chunks appended to the recording container
    pub audio_chunks_recorded: AtomicU64,

    /// Times the drain task found the writer not ready and had to wait
    pub writer_stalls: AtomicU64,
}

impl PipelineHealth {
    /// Create a new health metrics instance
    pub fn new() -> Self {
        Self {
            ticks_synced: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            resolution_changes: AtomicU64::new(0),
            frames_composited: AtomicU64::new(0),
            frames_recorded: AtomicU64::new(0),
            audio_chunks_recorded: AtomicU64::new(0),
            writer_stalls: AtomicU64::new(0),
        }
    }

    pub fn record_tick_synced(&self) {
        self.ticks_synced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution_change(&self) {
        self.resolution_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_composite(&self) {
        self.frames_composited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_written(&self) {
        self.frames_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_written(&self) {
        self.audio_chunks_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_writer_stall(&self) {
        self.writer_stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks_synced(&self) -> u64 {
        self.ticks_synced.load(Ordering::Relaxed)
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped.load(Ordering::Relaxed)
    }

    pub fn resolution_changes(&self) -> u64 {
        self.resolution_changes.load(Ordering::Relaxed)
    }

    pub fn frames_composited(&self) -> u64 {
        self.frames_composited.load(Ordering::Relaxed)
    }

    pub fn frames_recorded(&self) -> u64 {
        self.frames_recorded.load(Ordering::Relaxed)
    }

    pub fn audio_chunks_recorded(&self) -> u64 {
        self.audio_chunks_recorded.load(Ordering::Relaxed)
    }

    pub fn writer_stalls(&self) -> u64 {
        self.writer_stalls.load(Ordering::Relaxed)
    }

    /// Fraction of ticks lost to dropped samples, as a percentage.
    pub fn skip_rate(&self) -> f64 {
        let synced = self.ticks_synced() as f64;
        let skipped = self.ticks_skipped() as f64;
        if synced + skipped == 0.0 {
            0.0
        } else {
            skipped / (synced + skipped) * 100.0
        }
    }

    /// One-line summary for periodic logging.
    pub fn summary(&self) -> String {
        format!(
            "synced: {}, skipped: {} ({:.1}%), composited: {}, recorded: {} (+{} audio), stalls: {}, res changes: {}",
            self.ticks_synced(),
            self.ticks_skipped(),
            self.skip_rate(),
            self.frames_composited(),
            self.frames_recorded(),
            self.audio_chunks_recorded(),
            self.writer_stalls(),
            self.resolution_changes(),
        )
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs the health summary at a fixed interval while the pipeline runs.
pub struct HealthReporter {
    health: Arc<PipelineHealth>,
    interval: Duration,
}

impl HealthReporter {
    pub fn new(health: Arc<PipelineHealth>) -> Self {
        Self {
            health,
            interval: Duration::from_secs(30),
        }
    }

    /// Configure the reporting interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until cancelled, emitting one summary line per interval.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // The interval fires immediately; skip the startup tick
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => info!("Pipeline health: {}", self.health.summary()),
            }
        }
    }
}
