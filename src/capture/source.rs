//! Capture sources: producers of per-tick color, depth and face samples
//!
//! A [`CaptureSource`] is a synchronous tick generator; [`CaptureStage`]
//! paces it at the source frame rate and feeds the synchronizer's input
//! channels. The built-in [`SyntheticSource`] renders a deterministic test
//! scene so the whole pipeline runs without camera hardware.

use anyhow::Result;
use async_trait::async_trait;
use log::info;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capture::synchronizer::{ColorSample, DepthSample, FaceSample};
use crate::frame::types::{Bgra, ColorGrid, DepthGrid, FaceRect};
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::types::MediaTime;

/// Everything a source delivers for one capture tick. Dropped samples are
/// represented inside [`ColorSample`]/[`DepthSample`] with a `None`
/// payload, so the synchronizer still sees the tick.
pub struct TickSamples {
    pub color: ColorSample,
    pub depth: DepthSample,
    pub face: Option<FaceSample>,
}

/// A paced producer of capture ticks.
pub trait CaptureSource: Send {
    /// Nominal frame rate the stage paces delivery at.
    fn fps(&self) -> u32;

    /// Produce the next tick, or `None` when the source is exhausted.
    fn next_tick(&mut self) -> Option<TickSamples>;
}

/// Synthetic depth-camera scene: a gradient backdrop at 2 m with a bright
/// disk subject at 0.5 m orbiting the frame center, plus a face rectangle
/// tracking the disk. Depth is produced at quarter resolution like real
/// depth sensors deliver it.
pub struct SyntheticSource {
    width: usize,
    height: usize,
    fps: u32,
    tick: u64,
    limit: Option<u64>,
}

/// Depth of the synthetic backdrop, meters.
const BACKDROP_DEPTH: f32 = 2.0;
/// Depth of the synthetic subject disk, meters.
const SUBJECT_DEPTH: f32 = 0.5;

impl SyntheticSource {
    pub fn new(width: usize, height: usize, fps: u32, limit: Option<u64>) -> Self {
        Self {
            width,
            height,
            fps,
            tick: 0,
            limit,
        }
    }

    /// Disk center in color coordinates for a given tick.
    fn subject_center(&self, tick: u64) -> (f32, f32) {
        let angle = tick as f32 * 0.05;
        let (cx, cy) = (self.width as f32 / 2.0, self.height as f32 / 2.0);
        let radius = self.width.min(self.height) as f32 / 6.0;
        (cx + angle.cos() * radius, cy + angle.sin() * radius)
    }

    fn subject_radius(&self) -> f32 {
        self.width.min(self.height) as f32 / 5.0
    }

    fn render_color(&self, tick: u64) -> ColorGrid {
        let mut grid = ColorGrid::new(self.width, self.height);
        let (sx, sy) = self.subject_center(tick);
        let radius = self.subject_radius();
        for y in 0..self.height {
            for x in 0..self.width {
                let dx = x as f32 - sx;
                let dy = y as f32 - sy;
                let pixel = if dx * dx + dy * dy <= radius * radius {
                    Bgra::new(80, 180, 240, 255)
                } else {
                    // Diagonal gradient backdrop
                    let shade = ((x + y) * 255 / (self.width + self.height)) as u8;
                    Bgra::new(shade, shade / 2, 40, 255)
                };
                grid.set(x, y, pixel);
            }
        }
        grid
    }

    fn render_depth(&self, tick: u64) -> DepthGrid {
        let dw = (self.width / 4).max(1);
        let dh = (self.height / 4).max(1);
        let scale = self.width as f32 / dw as f32;
        let mut grid = DepthGrid::new(dw, dh);
        let (sx, sy) = self.subject_center(tick);
        let radius = self.subject_radius();
        for y in 0..dh {
            for x in 0..dw {
                let dx = x as f32 * scale - sx;
                let dy = y as f32 * scale - sy;
                let dist = (dx * dx + dy * dy).sqrt();
                let depth = if dist <= radius {
                    SUBJECT_DEPTH
                } else if dist <= radius + scale {
                    // Sensors lose readings around silhouette edges
                    f32::NAN
                } else {
                    BACKDROP_DEPTH
                };
                grid.set(x, y, depth);
            }
        }
        grid
    }
}

impl CaptureSource for SyntheticSource {
    fn fps(&self) -> u32 {
        self.fps
    }

    fn next_tick(&mut self) -> Option<TickSamples> {
        if let Some(limit) = self.limit
            && self.tick >= limit
        {
            return None;
        }
        let tick = self.tick;
        self.tick += 1;

        let pts = MediaTime::frame_duration(self.fps).scaled(tick as i64);
        let (sx, sy) = self.subject_center(tick);
        let radius = self.subject_radius();

        Some(TickSamples {
            color: ColorSample {
                tick,
                frame: Some(self.render_color(tick)),
                pts,
            },
            depth: DepthSample {
                tick,
                map: Some(self.render_depth(tick)),
            },
            face: Some(FaceSample {
                tick,
                face: FaceRect::new(sx - radius / 2.0, sy - radius / 2.0, radius, radius),
            }),
        })
    }
}

/// Async stage pacing a [`CaptureSource`] into the synchronizer inputs.
pub struct CaptureStage {
    source: Box<dyn CaptureSource>,
    cancel: CancellationToken,
    color_tx: mpsc::Sender<ColorSample>,
    depth_tx: mpsc::Sender<DepthSample>,
    face_tx: mpsc::Sender<FaceSample>,
}

impl CaptureStage {
    pub fn new(
        source: Box<dyn CaptureSource>,
        cancel: CancellationToken,
        color_tx: mpsc::Sender<ColorSample>,
        depth_tx: mpsc::Sender<DepthSample>,
        face_tx: mpsc::Sender<FaceSample>,
    ) -> Self {
        Self {
            source,
            cancel,
            color_tx,
            depth_tx,
            face_tx,
        }
    }
}

#[async_trait]
impl PipelineStage for CaptureStage {
    async fn run(&mut self) -> Result<()> {
        let period = Duration::from_secs_f64(1.0 / self.source.fps().max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("CaptureStage: started at {} fps", self.source.fps());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("CaptureStage: cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let Some(samples) = self.source.next_tick() else {
                        info!("CaptureStage: source exhausted");
                        break;
                    };
                    if self.color_tx.send(samples.color).await.is_err()
                        || self.depth_tx.send(samples.depth).await.is_err()
                    {
                        info!("CaptureStage: synchronizer gone");
                        break;
                    }
                    if let Some(face) = samples.face {
                        // Best-effort: detections are optional downstream
                        let _ = self.face_tx.send(face).await;
                    }
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CaptureStage"
    }
}
