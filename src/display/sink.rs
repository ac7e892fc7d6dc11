//! Display hand-off with bounded in-flight frames
//!
//! The processing stage must never outrun the presenter: at most
//! [`MAX_FRAMES_IN_FLIGHT`] composited frames may be queued for display at
//! once. [`FrameSink`] enforces that with a semaphore whose permits are
//! released only when the surface finishes presenting.

use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::frame::types::CompositeFrame;

/// Frames allowed between "composited" and "presented".
pub const MAX_FRAMES_IN_FLIGHT: usize = 1;

/// Something that can present a composited frame.
#[async_trait]
pub trait RenderSurface: Send + Sync {
    async fn present(&self, frame: CompositeFrame) -> Result<()>;
}

/// A surface that discards frames, for headless runs.
pub struct NullSurface;

#[async_trait]
impl RenderSurface for NullSurface {
    async fn present(&self, _frame: CompositeFrame) -> Result<()> {
        Ok(())
    }
}

pub struct FrameSink {
    surface: Arc<dyn RenderSurface>,
    in_flight: Arc<Semaphore>,
}

impl FrameSink {
    pub fn new(surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            surface,
            in_flight: Arc::new(Semaphore::new(MAX_FRAMES_IN_FLIGHT)),
        }
    }

    /// Hand a frame to the surface.
    ///
    /// Awaits until an in-flight slot frees up, then presents on a
    /// detached task so the caller can keep processing the next tick.
    pub async fn update(&self, frame: CompositeFrame) {
        let permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .expect("display semaphore closed");
        let surface = self.surface.clone();
        tokio::spawn(async move {
            if let Err(e) = surface.present(frame).await {
                warn!("Display present failed: {e:#}");
            }
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::types::ColorGrid;
    use crate::pipeline::types::MediaTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn frame() -> CompositeFrame {
        CompositeFrame {
            pixels: ColorGrid::new(4, 4),
            pts: MediaTime::ZERO,
        }
    }

    /// Surface that holds frames until released, tracking the maximum
    /// number presented concurrently.
    struct GateSurface {
        release: Notify,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RenderSurface for GateSurface {
        async fn present(&self, _frame: CompositeFrame) -> Result<()> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.release.notified().await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_at_most_one_frame_in_flight() {
        let surface = Arc::new(GateSurface {
            release: Notify::new(),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let sink = FrameSink::new(surface.clone());

        sink.update(frame()).await;

        // A second update must block until the first present completes
        let second = tokio::time::timeout(std::time::Duration::from_millis(50), sink.update(frame()));
        assert!(second.await.is_err(), "second frame overtook the gate");

        surface.release.notify_one();
        tokio::time::timeout(std::time::Duration::from_secs(1), sink.update(frame()))
            .await
            .expect("slot never freed");

        surface.release.notify_one();
        surface.release.notify_one();
        tokio::task::yield_now().await;
        assert_eq!(surface.peak.load(Ordering::SeqCst), MAX_FRAMES_IN_FLIGHT);
    }

    #[tokio::test]
    async fn test_null_surface_consumes_frames() {
        let sink = FrameSink::new(Arc::new(NullSurface));
        for _ in 0..8 {
            sink.update(frame()).await;
        }
    }
}
