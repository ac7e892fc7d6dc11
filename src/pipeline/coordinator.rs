//! Pipeline coordinator: owns the stages and the control surface
//!
//! Wires capture, synchronization, processing and display into one running
//! pipeline, forwards microphone audio into whichever recording session is
//! active, and exposes the async control calls the binary uses.

use anyhow::{Context, Result, anyhow};
use log::{error, info};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::{AudioCapture, CaptureSource, CaptureStage, FrameSynchronizer};
use crate::config::PipelineConfig;
use crate::display::{FrameSink, RenderSurface};
use crate::pipeline::health::{HealthReporter, PipelineHealth};
use crate::pipeline::process_stage::{PipelineCommand, ProcessStage};
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::state::RecorderState;

pub struct PipelineOptions {
    pub config: PipelineConfig,
    pub output_dir: PathBuf,
    /// Capture microphone audio into recordings.
    pub audio: bool,
    pub surface: Arc<dyn RenderSurface>,
}

pub struct PipelineCoordinator {
    cancel: CancellationToken,
    health: Arc<PipelineHealth>,
    config_tx: watch::Sender<PipelineConfig>,
    commands: mpsc::Sender<PipelineCommand>,
    recorder_state: Arc<Mutex<RecorderState>>,
    tasks: Vec<JoinHandle<Result<()>>>,
    /// Support tasks (audio forwarder, health reporter) that only exit on
    /// cancellation; joined after the stages finish.
    aux: Vec<JoinHandle<()>>,
}

impl PipelineCoordinator {
    /// Build and start the whole pipeline over the given capture source.
    pub fn launch(source: Box<dyn CaptureSource>, options: PipelineOptions) -> Result<Self> {
        let cancel = CancellationToken::new();
        let health = Arc::new(PipelineHealth::new());
        let (config_tx, config_rx) = watch::channel(options.config);

        let mut synchronizer = FrameSynchronizer::new(health.clone(), cancel.clone());
        let (color_tx, depth_tx, face_tx) = synchronizer.take_inputs();
        let ticks = synchronizer.take_output();

        // Audio starts with the pipeline so the recorder knows the stream
        // format up front; a capture failure here is fatal only when audio
        // was requested.
        let (audio_info, audio_rx) = if options.audio {
            let (info, rx) =
                AudioCapture::start(cancel.clone()).context("Audio capture unavailable")?;
            (Some(info), Some(rx))
        } else {
            (None, None)
        };

        let mut process = ProcessStage::new(
            config_rx,
            FrameSink::new(options.surface),
            options.output_dir,
            audio_info,
            health.clone(),
            cancel.clone(),
        );
        process.set_input(ticks);
        let commands = process.take_commands();
        let recorder_state = process.recorder_state();
        let session_slot = process.session_slot();

        let capture = CaptureStage::new(source, cancel.clone(), color_tx, depth_tx, face_tx);

        let tasks = vec![
            drive(capture),
            drive(synchronizer),
            drive(process),
        ];
        let mut aux = Vec::new();

        // Audio forwarder: chunks flow into whichever session is live,
        // silently discarded while nothing records
        if let Some(mut audio_rx) = audio_rx {
            let slot = session_slot;
            aux.push(tokio::spawn(async move {
                while let Some(chunk) = audio_rx.recv().await {
                    let session = slot.lock().unwrap().clone();
                    if let Some(session) = session {
                        session.enqueue_audio(chunk);
                    }
                }
            }));
        }

        let reporter = HealthReporter::new(health.clone());
        aux.push(tokio::spawn(reporter.run(cancel.clone())));

        info!("Pipeline launched");
        Ok(Self {
            cancel,
            health,
            config_tx,
            commands,
            recorder_state,
            tasks,
            aux,
        })
    }

    /// Capture a still photo; resolves with the written file path.
    pub async fn capture_photo(&self) -> Result<PathBuf> {
        self.request(|done| PipelineCommand::CapturePhoto { done })
            .await
    }

    /// Start recording; resolves with the target file path once the writer
    /// is open and frames are flowing into it.
    pub async fn start_recording(&self) -> Result<PathBuf> {
        self.request(|done| PipelineCommand::StartRecording { done })
            .await
    }

    /// Stop recording; resolves with the finished file path after the
    /// queue drained and the container was sealed.
    pub async fn stop_recording(&self) -> Result<PathBuf> {
        self.request(|done| PipelineCommand::StopRecording { done })
            .await
    }

    async fn request<F>(&self, make: F) -> Result<PathBuf>
    where
        F: FnOnce(oneshot::Sender<Result<PathBuf>>) -> PipelineCommand,
    {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(make(done))
            .await
            .map_err(|_| anyhow!("Pipeline is not running"))?;
        rx.await.map_err(|_| anyhow!("Pipeline dropped the request"))?
    }

    /// Apply a change to the live configuration.
    pub fn update_config(&self, apply: impl FnOnce(&mut PipelineConfig)) {
        self.config_tx.send_modify(apply);
    }

    pub fn config(&self) -> PipelineConfig {
        self.config_tx.borrow().clone()
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        self.health.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder_state.lock().unwrap().is_recording()
    }

    /// Request shutdown. Idempotent; safe to call from signal handlers via
    /// a cloned token.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for every stage to finish. Returns the first stage error, if
    /// any stage failed.
    pub async fn wait(self) -> Result<()> {
        let mut first_error = None;
        for result in futures_util::future::join_all(self.tasks).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Pipeline stage failed: {e:#}");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!("Pipeline task panicked: {e}");
                    first_error.get_or_insert_with(|| anyhow!("Stage panicked: {e}"));
                }
            }
        }
        // A source running dry ends the stages without a cancel; release
        // the support tasks so they wind down too
        self.cancel.cancel();
        let _ = futures_util::future::join_all(self.aux).await;
        info!("Pipeline finished: {}", self.health.summary());
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

fn drive<S: PipelineStage + 'static>(mut stage: S) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let result = stage.run().await;
        if let Err(e) = &result {
            error!("{} failed: {e:#}", stage.name());
        }
        stage.shutdown().await?;
        result
    })
}
