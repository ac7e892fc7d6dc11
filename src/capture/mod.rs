//! Capture side of the pipeline: sources, audio input and the per-tick
//! stream synchronizer.

pub mod audio;
pub mod source;
pub mod synchronizer;

pub use audio::{AudioCapture, AudioStreamInfo};
pub use source::{CaptureSource, CaptureStage, SyntheticSource, TickSamples};
pub use synchronizer::{
    ColorSample, DepthSample, FaceSample, FrameSynchronizer, SyncCore, SyncedTick,
};
