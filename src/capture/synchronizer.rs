//! Frame synchronizer: aligns color, depth and face streams per tick
//!
//! Three independently-arriving sample streams are keyed by a capture tick
//! id. One `CaptureFrame` is emitted per tick, only when both color and
//! depth succeeded; face detections are optional. A tick with a dropped
//! color or depth sample is skipped entirely, never partially emitted.
//!
//! The alignment logic lives in a synchronous [`SyncCore`] so it can be
//! exercised directly in tests; [`FrameSynchronizer`] wraps it in the async
//! channel loop.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::frame::scale::scale_area_bgra;
use crate::frame::types::{CaptureFrame, ColorGrid, DepthGrid, FaceRect};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::types::MediaTime;

/// Color delivery for one capture tick; `frame: None` marks a sample the
/// transport dropped.
#[derive(Debug, Clone)]
pub struct ColorSample {
    pub tick: u64,
    pub frame: Option<ColorGrid>,
    pub pts: MediaTime,
}

/// Depth delivery for one capture tick; `map: None` marks a dropped sample.
#[derive(Debug, Clone)]
pub struct DepthSample {
    pub tick: u64,
    pub map: Option<DepthGrid>,
}

/// Face detection for one capture tick (absent ticks simply send nothing).
#[derive(Debug, Clone, Copy)]
pub struct FaceSample {
    pub tick: u64,
    pub face: FaceRect,
}

/// Output of the synchronizer, one per aligned tick that produced anything.
#[derive(Debug, Clone)]
pub enum SyncedTick {
    /// A fully synchronized capture frame
    Frame(CaptureFrame),
    /// The capture resolution changed: downstream caches must be rebuilt
    /// before the next composite. The tick that observed the change
    /// produces no frame.
    ResolutionChanged { width: usize, height: usize },
}

/// Pending samples kept per stream before alignment gives up on a tick.
const MAX_PENDING: usize = 8;

/// Synchronous alignment core.
pub struct SyncCore {
    pending_color: BTreeMap<u64, ColorSample>,
    pending_depth: BTreeMap<u64, DepthSample>,
    pending_faces: BTreeMap<u64, FaceRect>,
    last_resolution: Option<(usize, usize)>,
    skipped: u64,
}

impl SyncCore {
    pub fn new() -> Self {
        Self {
            pending_color: BTreeMap::new(),
            pending_depth: BTreeMap::new(),
            pending_faces: BTreeMap::new(),
            last_resolution: None,
            skipped: 0,
        }
    }

    pub fn offer_color(&mut self, sample: ColorSample) -> Option<SyncedTick> {
        self.pending_color.insert(sample.tick, sample);
        self.prune();
        self.try_align()
    }

    pub fn offer_depth(&mut self, sample: DepthSample) -> Option<SyncedTick> {
        self.pending_depth.insert(sample.tick, sample);
        self.prune();
        self.try_align()
    }

    pub fn offer_face(&mut self, sample: FaceSample) {
        self.pending_faces.insert(sample.tick, sample.face);
        self.prune();
    }

    /// Ticks abandoned without emission (dropped or unmatched samples).
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn try_align(&mut self) -> Option<SyncedTick> {
        loop {
            let color_tick = *self.pending_color.keys().next()?;
            let depth_tick = *self.pending_depth.keys().next()?;

            // Ticks arrive in order per stream, so a lone older entry on
            // one side can never be matched anymore.
            if color_tick < depth_tick {
                self.pending_color.remove(&color_tick);
                self.skipped += 1;
                debug!("tick {color_tick}: depth never arrived, skipping");
                continue;
            }
            if depth_tick < color_tick {
                self.pending_depth.remove(&depth_tick);
                self.skipped += 1;
                debug!("tick {depth_tick}: color never arrived, skipping");
                continue;
            }

            let tick = color_tick;
            let color = self.pending_color.remove(&tick).unwrap();
            let depth = self.pending_depth.remove(&tick).unwrap();
            let face = self.take_face(tick);

            let (Some(color_frame), Some(depth_map)) = (color.frame, depth.map) else {
                self.skipped += 1;
                debug!("tick {tick}: dropped sample, skipping");
                return None;
            };

            return Some(self.emit(tick, color_frame, depth_map, face, color.pts));
        }
    }

    fn emit(
        &mut self,
        tick: u64,
        color: ColorGrid,
        depth: DepthGrid,
        face: Option<FaceRect>,
        pts: MediaTime,
    ) -> SyncedTick {
        // Common resolution policy: color resolution rounded down to even
        // dimensions. Mask/color index correspondence requires this exact
        // size downstream; the encoder requires the evenness.
        let width = color.width() & !1;
        let height = color.height() & !1;

        if self.last_resolution != Some((width, height)) {
            self.last_resolution = Some((width, height));
            debug!("tick {tick}: resolution changed to {width}x{height}");
            return SyncedTick::ResolutionChanged { width, height };
        }

        let color = scale_area_bgra(&color, width, height);
        SyncedTick::Frame(CaptureFrame {
            color,
            depth,
            face,
            pts,
        })
    }

    fn take_face(&mut self, tick: u64) -> Option<FaceRect> {
        let face = self.pending_faces.remove(&tick);
        // Faces for already-passed ticks are stale
        self.pending_faces.retain(|&t, _| t > tick);
        face
    }

    fn prune(&mut self) {
        while self.pending_color.len() > MAX_PENDING {
            self.pending_color.pop_first();
            self.skipped += 1;
        }
        while self.pending_depth.len() > MAX_PENDING {
            self.pending_depth.pop_first();
            self.skipped += 1;
        }
        while self.pending_faces.len() > MAX_PENDING {
            self.pending_faces.pop_first();
        }
    }
}

impl Default for SyncCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Async synchronizer stage.
///
/// Owns the three input channels fed by a [`crate::capture::CaptureSource`]
/// and the output channel consumed by the processing stage.
pub struct FrameSynchronizer {
    core: SyncCore,
    health: Arc<PipelineHealth>,
    cancel: CancellationToken,
    color_rx: Option<mpsc::Receiver<ColorSample>>,
    depth_rx: Option<mpsc::Receiver<DepthSample>>,
    face_rx: Option<mpsc::Receiver<FaceSample>>,
    output_tx: Option<mpsc::Sender<SyncedTick>>,
}

impl FrameSynchronizer {
    pub fn new(health: Arc<PipelineHealth>, cancel: CancellationToken) -> Self {
        Self {
            core: SyncCore::new(),
            health,
            cancel,
            color_rx: None,
            depth_rx: None,
            face_rx: None,
            output_tx: None,
        }
    }

    /// Create the three input channels and hand back the sender halves.
    pub fn take_inputs(
        &mut self,
    ) -> (
        mpsc::Sender<ColorSample>,
        mpsc::Sender<DepthSample>,
        mpsc::Sender<FaceSample>,
    ) {
        let (color_tx, color_rx) = mpsc::channel(4);
        let (depth_tx, depth_rx) = mpsc::channel(4);
        let (face_tx, face_rx) = mpsc::channel(4);
        self.color_rx = Some(color_rx);
        self.depth_rx = Some(depth_rx);
        self.face_rx = Some(face_rx);
        (color_tx, depth_tx, face_tx)
    }

    /// Get the output channel for synchronized ticks.
    pub fn take_output(&mut self) -> mpsc::Receiver<SyncedTick> {
        let (tx, rx) = mpsc::channel::<SyncedTick>(4);
        self.output_tx = Some(tx);
        rx
    }

    async fn forward(
        output: &mpsc::Sender<SyncedTick>,
        health: &PipelineHealth,
        emission: SyncedTick,
    ) -> bool {
        match &emission {
            SyncedTick::Frame(_) => health.record_tick_synced(),
            SyncedTick::ResolutionChanged { .. } => health.record_resolution_change(),
        }
        output.send(emission).await.is_ok()
    }
}

#[async_trait]
impl PipelineStage for FrameSynchronizer {
    async fn run(&mut self) -> Result<()> {
        let mut color_rx = self
            .color_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No color input channel"))?;
        let mut depth_rx = self
            .depth_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No depth input channel"))?;
        let mut face_rx = self
            .face_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No face input channel"))?;
        let output_tx = self
            .output_tx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No output channel"))?;

        info!("FrameSynchronizer: started");
        let mut skipped_reported = 0u64;

        loop {
            let emission = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("FrameSynchronizer: cancelled");
                    break;
                }
                sample = color_rx.recv() => match sample {
                    Some(sample) => self.core.offer_color(sample),
                    None => {
                        info!("FrameSynchronizer: color input closed");
                        break;
                    }
                },
                sample = depth_rx.recv() => match sample {
                    Some(sample) => self.core.offer_depth(sample),
                    None => {
                        info!("FrameSynchronizer: depth input closed");
                        break;
                    }
                },
                sample = face_rx.recv() => {
                    if let Some(sample) = sample {
                        self.core.offer_face(sample);
                    }
                    // A closed face stream is not fatal: detections are
                    // optional. Keep aligning color and depth.
                    None
                }
            };

            while self.core.skipped() > skipped_reported {
                self.health.record_tick_skipped();
                skipped_reported += 1;
            }

            if let Some(emission) = emission
                && !Self::forward(&output_tx, &self.health, emission).await
            {
                warn!("FrameSynchronizer: output channel closed");
                break;
            }
        }

        info!(
            "FrameSynchronizer: finished ({} synced, {} skipped)",
            self.health.ticks_synced(),
            self.core.skipped()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "FrameSynchronizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelGrid;

    fn color(tick: u64, w: usize, h: usize) -> ColorSample {
        ColorSample {
            tick,
            frame: Some(ColorGrid::new(w, h)),
            pts: MediaTime::from_ticks(tick as i64 * 20),
        }
    }

    fn depth(tick: u64) -> DepthSample {
        DepthSample {
            tick,
            map: Some(PixelGrid::filled(16, 12, 1.0)),
        }
    }

    /// Drive a core past the initial resolution announcement.
    fn primed_core(w: usize, h: usize) -> SyncCore {
        let mut core = SyncCore::new();
        core.offer_color(color(0, w, h));
        let first = core.offer_depth(depth(0));
        assert!(matches!(
            first,
            Some(SyncedTick::ResolutionChanged { .. })
        ));
        core
    }

    #[test]
    fn test_first_tick_announces_resolution() {
        let mut core = SyncCore::new();
        assert!(core.offer_color(color(0, 64, 48)).is_none());
        match core.offer_depth(depth(0)) {
            Some(SyncedTick::ResolutionChanged { width, height }) => {
                assert_eq!((width, height), (64, 48));
            }
            other => panic!("expected resolution change, got {other:?}"),
        }
    }

    #[test]
    fn test_aligned_tick_emits_frame() {
        let mut core = primed_core(64, 48);
        assert!(core.offer_color(color(1, 64, 48)).is_none());
        match core.offer_depth(depth(1)) {
            Some(SyncedTick::Frame(frame)) => {
                assert_eq!(frame.color.resolution(), (64, 48));
                assert_eq!(frame.pts, MediaTime::from_ticks(20));
                assert!(frame.face.is_none());
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_face_attaches_to_matching_tick() {
        let mut core = primed_core(64, 48);
        core.offer_face(FaceSample {
            tick: 1,
            face: FaceRect::new(1.0, 2.0, 3.0, 4.0),
        });
        core.offer_color(color(1, 64, 48));
        match core.offer_depth(depth(1)) {
            Some(SyncedTick::Frame(frame)) => {
                assert_eq!(frame.face, Some(FaceRect::new(1.0, 2.0, 3.0, 4.0)));
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_dropped_depth_skips_tick_entirely() {
        let mut core = primed_core(64, 48);
        core.offer_color(color(1, 64, 48));
        let emission = core.offer_depth(DepthSample { tick: 1, map: None });
        assert!(emission.is_none());
        assert_eq!(core.skipped(), 1);

        // The next tick is unaffected
        core.offer_color(color(2, 64, 48));
        assert!(matches!(
            core.offer_depth(depth(2)),
            Some(SyncedTick::Frame(_))
        ));
    }

    #[test]
    fn test_missing_counterpart_discards_stale_tick() {
        let mut core = primed_core(64, 48);
        // Depth tick 1 never arrives; color 1 then both sides of tick 2
        core.offer_color(color(1, 64, 48));
        core.offer_color(color(2, 64, 48));
        match core.offer_depth(depth(2)) {
            Some(SyncedTick::Frame(_)) => {}
            other => panic!("expected frame for tick 2, got {other:?}"),
        }
        assert_eq!(core.skipped(), 1);
    }

    #[test]
    fn test_resolution_change_sacrifices_one_tick() {
        let mut core = primed_core(64, 48);

        // Steady state at resolution A
        core.offer_color(color(1, 64, 48));
        assert!(matches!(
            core.offer_depth(depth(1)),
            Some(SyncedTick::Frame(_))
        ));

        // Tick at resolution B announces the change, no composite
        core.offer_color(color(2, 32, 24));
        match core.offer_depth(depth(2)) {
            Some(SyncedTick::ResolutionChanged { width, height }) => {
                assert_eq!((width, height), (32, 24));
            }
            other => panic!("expected resolution change, got {other:?}"),
        }

        // Every subsequent B tick produces a frame
        for tick in 3..6 {
            core.offer_color(color(tick, 32, 24));
            match core.offer_depth(depth(tick)) {
                Some(SyncedTick::Frame(frame)) => {
                    assert_eq!(frame.color.resolution(), (32, 24));
                }
                other => panic!("expected frame at tick {tick}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_odd_resolution_rounds_down_to_even() {
        let mut core = SyncCore::new();
        core.offer_color(color(0, 65, 49));
        match core.offer_depth(depth(0)) {
            Some(SyncedTick::ResolutionChanged { width, height }) => {
                assert_eq!((width, height), (64, 48));
            }
            other => panic!("expected resolution change, got {other:?}"),
        }

        core.offer_color(color(1, 65, 49));
        match core.offer_depth(depth(1)) {
            Some(SyncedTick::Frame(frame)) => {
                assert_eq!(frame.color.resolution(), (64, 48));
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stage_loop_forwards_emissions() {
        let health = Arc::new(PipelineHealth::new());
        let cancel = CancellationToken::new();
        let mut stage = FrameSynchronizer::new(health.clone(), cancel);
        let (color_tx, depth_tx, _face_tx) = stage.take_inputs();
        let mut out_rx = stage.take_output();

        let task = tokio::spawn(async move { stage.run().await });

        color_tx.send(color(0, 64, 48)).await.unwrap();
        depth_tx.send(depth(0)).await.unwrap();
        assert!(matches!(
            out_rx.recv().await,
            Some(SyncedTick::ResolutionChanged { .. })
        ));

        color_tx.send(color(1, 64, 48)).await.unwrap();
        depth_tx.send(depth(1)).await.unwrap();
        assert!(matches!(out_rx.recv().await, Some(SyncedTick::Frame(_))));

        drop(color_tx);
        drop(depth_tx);
        task.await.unwrap().unwrap();
        assert_eq!(health.ticks_synced(), 1);
    }
}
