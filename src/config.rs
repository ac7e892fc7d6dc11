//! Runtime configuration
//!
//! [`PipelineConfig`] holds the options a user can flip while the pipeline
//! runs; the coordinator publishes updates over a `watch` channel so the
//! processing stage always sees the latest value without locking.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::compose::DisplayMode;

/// What a capture request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Foreground still with transparent background
    #[default]
    Photo,
    /// Chroma-keyed MP4 recording
    Video,
}

/// Which camera the capture source opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

/// Live-tunable pipeline options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Depth-based foreground segmentation on/off. Off shows the raw feed.
    pub segmentation: bool,

    /// Threshold the depth map into a hard foreground/background mask.
    /// Off feeds the raw depth values through as mask weights and leaves
    /// the recorded cut offsets untouched.
    pub binarize: bool,

    /// Soften the binary mask before compositing (blur + gamma).
    pub smoothing: bool,

    pub display_mode: DisplayMode,
    pub capture_mode: CaptureMode,
    pub facing: CameraFacing,

    /// Background images cycled round-robin, one advance per composite.
    pub backgrounds: Vec<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segmentation: true,
            binarize: true,
            smoothing: true,
            display_mode: DisplayMode::Blended,
            capture_mode: CaptureMode::default(),
            facing: CameraFacing::default(),
            backgrounds: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let config = PipelineConfig {
            segmentation: false,
            binarize: true,
            smoothing: true,
            display_mode: DisplayMode::Original,
            capture_mode: CaptureMode::Video,
            facing: CameraFacing::Back,
            backgrounds: vec![PathBuf::from("bg/beach.png")],
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let back: PipelineConfig = serde_json::from_str(r#"{"segmentation": false}"#).unwrap();
        assert!(!back.segmentation);
        assert!(back.smoothing);
        assert_eq!(back.display_mode, DisplayMode::Blended);
        assert_eq!(back.capture_mode, CaptureMode::Photo);
    }
}
