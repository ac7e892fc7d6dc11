//! Persistence: MP4 recording sessions and still-photo export.

pub mod frame_pool;
pub mod photo;
pub mod session;
pub mod writer;

use std::path::PathBuf;

use crate::capture::AudioStreamInfo;

pub use photo::save_png;
pub use session::{RecordingSession, WRITER_STALL_TIMEOUT};
pub use writer::{FrameWriter, MuxWriter};

/// Everything needed to open an output container.
#[derive(Debug, Clone)]
pub struct RecordSettings {
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub fps: u32,
    /// `None` records video only.
    pub audio: Option<AudioStreamInfo>,
}
