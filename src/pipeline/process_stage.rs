//! Processing stage: segmentation, compositing, capture handling
//!
//! Consumes synchronized ticks off the capture side, runs the depth
//! segmentation math away from the capture callback, drives the display
//! sink, and services photo/recording commands. All mutable pipeline state
//! (background cache, current resolution, recorder handle) lives here and
//! is touched from this stage only.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use image::RgbaImage;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::capture::SyncedTick;
use crate::compose::{Compositor, DisplayMode, apply_chroma_key, extract_foreground};
use crate::config::{CaptureMode, PipelineConfig};
use crate::display::FrameSink;
use crate::frame::scale::scale_area_bgra;
use crate::frame::types::{CaptureFrame, CompositeFrame};
use crate::pipeline::clock::SessionClock;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::state::RecorderState;
use crate::recorder::session::RecordingSession;
use crate::recorder::writer::MuxWriter;
use crate::recorder::{RecordSettings, save_png};
use crate::segment::DepthSegmenter;
use crate::utils::path::{photo_path, recording_path};

/// Requests the coordinator forwards into the stage.
pub enum PipelineCommand {
    /// Capture a still on the next processed frame.
    CapturePhoto {
        done: oneshot::Sender<Result<PathBuf>>,
    },
    /// Open a writer on the next processed frame and start draining into it.
    StartRecording {
        done: oneshot::Sender<Result<PathBuf>>,
    },
    /// Finish the active recording (waits for the queue to drain).
    StopRecording {
        done: oneshot::Sender<Result<PathBuf>>,
    },
}

/// Recorder handle shared with the audio forwarder.
pub type SessionSlot = Arc<Mutex<Option<Arc<RecordingSession>>>>;

pub struct ProcessStage {
    input: Option<mpsc::Receiver<SyncedTick>>,
    commands: Option<mpsc::Receiver<PipelineCommand>>,
    config_rx: watch::Receiver<PipelineConfig>,
    sink: FrameSink,
    health: Arc<PipelineHealth>,
    cancel: CancellationToken,

    segmenter: DepthSegmenter,
    compositor: Compositor,
    cut: Vec<usize>,

    /// Decoded background sources, reloaded when the configured paths change
    background_sources: Vec<RgbaImage>,
    loaded_paths: Vec<PathBuf>,

    /// Composite resolution from the last ResolutionChanged tick
    resolution: Option<(usize, usize)>,

    output_dir: PathBuf,
    audio_info: Option<crate::capture::AudioStreamInfo>,

    recorder_state: Arc<Mutex<RecorderState>>,
    session_slot: SessionSlot,
    recording_path: Option<PathBuf>,
    pending_photo: Option<oneshot::Sender<Result<PathBuf>>>,
    pending_record: Option<oneshot::Sender<Result<PathBuf>>>,
}

impl ProcessStage {
    pub fn new(
        config_rx: watch::Receiver<PipelineConfig>,
        sink: FrameSink,
        output_dir: PathBuf,
        audio_info: Option<crate::capture::AudioStreamInfo>,
        health: Arc<PipelineHealth>,
        cancel: CancellationToken,
    ) -> Self {
        let mode = config_rx.borrow().display_mode;
        Self {
            input: None,
            commands: None,
            config_rx,
            sink,
            health,
            cancel,
            segmenter: DepthSegmenter::new(),
            compositor: Compositor::new(mode),
            cut: Vec::new(),
            background_sources: Vec::new(),
            loaded_paths: Vec::new(),
            resolution: None,
            output_dir,
            audio_info,
            recorder_state: Arc::new(Mutex::new(RecorderState::Idle)),
            session_slot: Arc::new(Mutex::new(None)),
            recording_path: None,
            pending_photo: None,
            pending_record: None,
        }
    }

    pub fn set_input(&mut self, input: mpsc::Receiver<SyncedTick>) {
        self.input = Some(input);
    }

    /// Create the command channel the coordinator sends requests through.
    pub fn take_commands(&mut self) -> mpsc::Sender<PipelineCommand> {
        let (tx, rx) = mpsc::channel(8);
        self.commands = Some(rx);
        tx
    }

    pub fn session_slot(&self) -> SessionSlot {
        self.session_slot.clone()
    }

    pub fn recorder_state(&self) -> Arc<Mutex<RecorderState>> {
        self.recorder_state.clone()
    }

    fn transition(&self, next: RecorderState) -> Result<()> {
        let mut state = self.recorder_state.lock().unwrap();
        if !state.can_transition_to(&next) {
            return Err(anyhow!(
                "Invalid recorder transition: {} -> {}",
                state.description(),
                next.description()
            ));
        }
        *state = next;
        Ok(())
    }

    fn handle_command(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::CapturePhoto { done } => {
                if self.pending_photo.is_some() {
                    let _ = done.send(Err(anyhow!("Photo capture already pending")));
                } else {
                    self.pending_photo = Some(done);
                }
            }
            PipelineCommand::StartRecording { done } => {
                if let Err(e) = self.transition(RecorderState::Starting) {
                    let _ = done.send(Err(e));
                } else {
                    // The writer opens on the next frame, once the output
                    // resolution is known for certain
                    self.pending_record = Some(done);
                }
            }
            PipelineCommand::StopRecording { done } => {
                let session = self.session_slot.lock().unwrap().clone();
                let Some(session) = session else {
                    let _ = done.send(Err(anyhow!("No active recording")));
                    return;
                };
                // May already be Finishing; session.stop() is idempotent
                let _ = self.transition(RecorderState::Finishing);
                let path = self.recording_path.clone();
                let slot = self.session_slot.clone();
                let state = self.recorder_state.clone();
                tokio::spawn(async move {
                    let result = session.finish().await;
                    slot.lock().unwrap().take();
                    *state.lock().unwrap() = RecorderState::Idle;
                    let _ = done.send(result.and_then(|_| {
                        path.ok_or_else(|| anyhow!("Recording path lost"))
                    }));
                });
            }
        }
    }

    /// Reload background images when the configured list changes.
    fn sync_backgrounds(&mut self, config: &PipelineConfig) {
        if config.backgrounds == self.loaded_paths {
            return;
        }
        self.background_sources.clear();
        for path in &config.backgrounds {
            match image::open(path) {
                Ok(img) => self.background_sources.push(img.to_rgba8()),
                // A missing background is not fatal, the blend degrades
                // to black for that slot
                Err(e) => warn!("Cannot load background {}: {e}", path.display()),
            }
        }
        self.loaded_paths = config.backgrounds.clone();
        if let Some((w, h)) = self.resolution {
            self.compositor
                .backgrounds_mut()
                .rebuild(&self.background_sources, w, h);
        }
    }

    fn handle_resolution_change(&mut self, width: usize, height: usize) {
        self.resolution = Some((width, height));
        self.compositor
            .backgrounds_mut()
            .rebuild(&self.background_sources, width, height);
        info!("Composite resolution now {width}x{height}");
    }

    async fn handle_frame(&mut self, frame: CaptureFrame) {
        let config = self.config_rx.borrow_and_update().clone();
        self.sync_backgrounds(&config);
        self.compositor.set_mode(if config.segmentation {
            config.display_mode
        } else {
            DisplayMode::Original
        });

        let composited = if config.segmentation {
            // Binarize in place: the depth grid becomes the mask. With
            // binarization off the raw depth values act as mask weights
            // and the previously recorded cut offsets stay in effect.
            let mut mask = frame.depth;
            let cutoff = self
                .segmenter
                .compute_cutoff(&mask, frame.face.as_ref(), frame.color.width());
            let mut cut = std::mem::take(&mut self.cut);
            if config.binarize {
                self.segmenter.binarize(&mut mask, cutoff, &mut cut);
            } else {
                self.segmenter.fill_nan(&mut mask);
            }
            if config.smoothing {
                self.segmenter.smooth(&mut mask);
            }

            self.service_captures(&config, &frame.color, &mask.resolution(), &cut, frame.pts);

            let full_mask = self.segmenter.upscale(&mask, frame.color.width());
            self.cut = cut;
            self.compositor.composite(&frame.color, &full_mask)
        } else {
            self.deny_captures("Segmentation is disabled");
            frame.color.clone()
        };

        self.health.record_composite();
        self.sink
            .update(CompositeFrame {
                pixels: composited,
                pts: frame.pts,
            })
            .await;
    }

    /// Service pending photo/recording work for this frame using the cut
    /// offsets recorded during binarization. Captures operate on the color
    /// frame scaled down to mask resolution so the offsets apply exactly.
    fn service_captures(
        &mut self,
        config: &PipelineConfig,
        color: &crate::frame::types::ColorGrid,
        mask_resolution: &(usize, usize),
        cut: &[usize],
        pts: crate::pipeline::types::MediaTime,
    ) {
        let (mw, mh) = *mask_resolution;

        if let Some(done) = self.pending_record.take() {
            let _ = match self.open_recording(mw, mh) {
                Ok(path) => done.send(Ok(path)),
                Err(e) => {
                    // Startup failure returns the recorder to Idle
                    *self.recorder_state.lock().unwrap() = RecorderState::Idle;
                    done.send(Err(e))
                }
            };
        }

        if let Some(done) = self.pending_photo.take() {
            if config.capture_mode == CaptureMode::Photo {
                let small = scale_area_bgra(color, mw, mh);
                let matte = extract_foreground(&small, cut);
                let path = photo_path(&self.output_dir);
                let _ = done.send(save_png(&matte, &path).map(|_| path));
            } else {
                let _ = done.send(Err(anyhow!(
                    "Capture mode is set to video, photo request refused"
                )));
            }
        }

        let recording = self.session_slot.lock().unwrap().clone();
        if let Some(session) = recording
            && config.capture_mode == CaptureMode::Video
        {
            let mut keyed = scale_area_bgra(color, mw, mh);
            apply_chroma_key(&mut keyed, cut);
            session.enqueue_frame(CompositeFrame { pixels: keyed, pts });
        }
    }

    fn open_recording(&mut self, width: usize, height: usize) -> Result<PathBuf> {
        let path = recording_path(&self.output_dir);
        let settings = RecordSettings {
            path: path.clone(),
            width,
            height,
            fps: 30,
            audio: self.audio_info,
        };
        let writer =
            MuxWriter::create(&settings).context("Could not start the recording writer")?;
        let session = Arc::new(RecordingSession::spawn(
            Box::new(writer),
            self.health.clone(),
            SessionClock::new(),
        ));
        self.session_slot.lock().unwrap().replace(session);
        self.recording_path = Some(path.clone());
        self.transition(RecorderState::Recording {
            started_at: std::time::Instant::now(),
        })?;
        Ok(path)
    }

    fn deny_captures(&mut self, reason: &str) {
        if let Some(done) = self.pending_photo.take() {
            let _ = done.send(Err(anyhow!("{reason}")));
        }
        if let Some(done) = self.pending_record.take() {
            *self.recorder_state.lock().unwrap() = RecorderState::Idle;
            let _ = done.send(Err(anyhow!("{reason}")));
        }
    }
}

#[async_trait]
impl PipelineStage for ProcessStage {
    async fn run(&mut self) -> Result<()> {
        let mut input = self
            .input
            .take()
            .ok_or_else(|| anyhow!("No tick input channel"))?;
        let mut commands = self
            .commands
            .take()
            .ok_or_else(|| anyhow!("No command channel"))?;

        info!("ProcessStage: started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("ProcessStage: cancelled");
                    break;
                }
                tick = input.recv() => match tick {
                    Some(SyncedTick::Frame(frame)) => self.handle_frame(frame).await,
                    Some(SyncedTick::ResolutionChanged { width, height }) => {
                        self.handle_resolution_change(width, height);
                    }
                    None => {
                        info!("ProcessStage: input closed");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("ProcessStage: command channel closed");
                        break;
                    }
                },
            }
        }

        self.deny_captures("Pipeline shutting down");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ProcessStage"
    }

    async fn shutdown(&mut self) -> Result<()> {
        let session = self.session_slot.lock().unwrap().take();
        if let Some(session) = session {
            info!("ProcessStage: finishing recording before shutdown");
            session.finish().await?;
        }
        *self.recorder_state.lock().unwrap() = RecorderState::Idle;
        Ok(())
    }
}
