//! Pipeline orchestration: stages, timing, recording state and health.

pub mod clock;
pub mod coordinator;
pub mod health;
pub mod process_stage;
pub mod stage;
pub mod state;
pub mod types;

pub use clock::SessionClock;
pub use coordinator::{PipelineCoordinator, PipelineOptions};
pub use health::PipelineHealth;
pub use process_stage::{PipelineCommand, ProcessStage};
pub use stage::PipelineStage;
pub use state::RecorderState;
pub use types::{AudioChunk, MediaTime, TIMESCALE};
