//! Presentation side: render surfaces and the in-flight frame gate.

pub mod sink;

pub use sink::{FrameSink, MAX_FRAMES_IN_FLIGHT, NullSurface, RenderSurface};
