//! Recording session: a lock-free-for-producers queue in front of the
//! writer's drain thread
//!
//! Producers (the processing stage and the audio bridge) enqueue without
//! ever blocking on the writer. A dedicated thread drains the queue in
//! FIFO order, retrying while the writer reports itself not ready; frames
//! are never dropped to relieve backpressure. Finishing happens only when
//! a stop was requested AND the queue is empty, so every frame enqueued
//! before stop lands in the file.

use anyhow::{Result, anyhow};
use log::{error, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::frame::types::CompositeFrame;
use crate::pipeline::clock::SessionClock;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::types::AudioChunk;
use crate::recorder::writer::FrameWriter;

/// How long the drain thread tolerates an unready writer before the
/// session fails.
pub const WRITER_STALL_TIMEOUT: Duration = Duration::from_secs(5);

const WRITER_RETRY_INTERVAL: Duration = Duration::from_millis(10);

enum QueuedItem {
    Video { frame: CompositeFrame },
    Audio(AudioChunk),
}

struct Queue {
    items: VecDeque<QueuedItem>,
    stopping: bool,
    failed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    cond: Condvar,
    health: Arc<PipelineHealth>,
}

pub struct RecordingSession {
    shared: Arc<Shared>,
    clock: SessionClock,
    completion: Mutex<Option<oneshot::Receiver<Result<()>>>>,
}

impl RecordingSession {
    /// Spawn the drain thread over the given writer.
    pub fn spawn(
        writer: Box<dyn FrameWriter>,
        health: Arc<PipelineHealth>,
        clock: SessionClock,
    ) -> Self {
        Self::spawn_with_stall_timeout(writer, health, clock, WRITER_STALL_TIMEOUT)
    }

    pub(crate) fn spawn_with_stall_timeout(
        mut writer: Box<dyn FrameWriter>,
        health: Arc<PipelineHealth>,
        clock: SessionClock,
        stall_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                items: VecDeque::new(),
                stopping: false,
                failed: false,
            }),
            cond: Condvar::new(),
            health,
        });
        let (done_tx, done_rx) = oneshot::channel();

        let drain = shared.clone();
        let drain_clock = clock.clone();
        thread::Builder::new()
            .name("record-drain".into())
            .spawn(move || {
                let result = drain_loop(&drain, writer.as_mut(), &drain_clock, stall_timeout);
                if let Err(e) = &result {
                    error!("Recording failed: {e:#}");
                    let mut q = drain.queue.lock().unwrap();
                    q.failed = true;
                    q.items.clear();
                }
                let _ = done_tx.send(result);
            })
            .expect("failed to spawn drain thread");

        Self {
            shared,
            clock,
            completion: Mutex::new(Some(done_rx)),
        }
    }

    /// Queue a composited frame; returns immediately, the writer is never
    /// awaited here.
    pub fn enqueue_frame(&self, frame: CompositeFrame) {
        let mut q = self.shared.queue.lock().unwrap();
        if q.stopping || q.failed {
            return;
        }
        q.items.push_back(QueuedItem::Video { frame });
        self.shared.cond.notify_one();
    }

    /// Queue a chunk of captured audio. The first chunk anchors the
    /// session clock origin.
    pub fn enqueue_audio(&self, chunk: AudioChunk) {
        self.clock.set_origin_once(chunk.pts);
        let mut q = self.shared.queue.lock().unwrap();
        if q.stopping || q.failed {
            return;
        }
        q.items.push_back(QueuedItem::Audio(chunk));
        self.shared.cond.notify_one();
    }

    /// Request the session to finish. Idempotent; queued media still
    /// drains before the file is finalized.
    pub fn stop(&self) {
        let mut q = self.shared.queue.lock().unwrap();
        if !q.stopping {
            info!(
                "Recording stop requested, {} items still queued",
                q.items.len()
            );
            q.stopping = true;
        }
        self.shared.cond.notify_all();
    }

    /// Stop and wait for the drain thread to finalize the file.
    pub async fn finish(&self) -> Result<()> {
        self.stop();
        let rx = self
            .completion
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("Recording already finished"))?;
        rx.await.map_err(|_| anyhow!("Drain thread vanished"))?
    }
}

fn drain_loop(
    shared: &Shared,
    writer: &mut dyn FrameWriter,
    clock: &SessionClock,
    stall_timeout: Duration,
) -> Result<()> {
    loop {
        let item = {
            let mut q = shared.queue.lock().unwrap();
            loop {
                if let Some(item) = q.items.pop_front() {
                    break Some(item);
                }
                if q.stopping {
                    break None;
                }
                q = shared.cond.wait(q).unwrap();
            }
        };

        match item {
            None => {
                // Stop requested and the queue is empty: finish for real
                writer.finalize()?;
                info!("Recording drain complete");
                return Ok(());
            }
            Some(QueuedItem::Video { frame }) => {
                wait_until_ready(shared, writer, stall_timeout)?;
                // Without audio nothing has anchored the timeline yet, so
                // the first drained frame does; with audio the origin was
                // pinned at the first chunk's capture time and the frame
                // keeps its offset to it.
                clock.set_origin_once(frame.pts);
                writer.write_video(&frame.pixels, clock.presentation(frame.pts))?;
                shared.health.record_frame_written();
            }
            Some(QueuedItem::Audio(mut chunk)) => {
                chunk.pts = clock.presentation(chunk.pts);
                writer.write_audio(&chunk)?;
                shared.health.record_audio_written();
            }
        }
    }
}

/// Hold the pending frame while the writer is unready. Retrying instead of
/// dropping keeps output frame-complete; a writer stuck past the timeout
/// fails the session.
fn wait_until_ready(
    shared: &Shared,
    writer: &dyn FrameWriter,
    stall_timeout: Duration,
) -> Result<()> {
    if writer.is_ready_for_video() {
        return Ok(());
    }
    shared.health.record_writer_stall();
    warn!("Writer not ready, holding frame");
    let stalled_at = Instant::now();
    while !writer.is_ready_for_video() {
        if stalled_at.elapsed() >= stall_timeout {
            return Err(anyhow!(
                "Writer stalled for {:?}, aborting recording",
                stall_timeout
            ));
        }
        thread::sleep(WRITER_RETRY_INTERVAL);
    }
    Ok(())
}
