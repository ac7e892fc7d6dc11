//! Pipeline stage trait
//!
//! Defines the interface implemented by the synchronizer and processing
//! stages; each stage runs as its own task and owns its channel endpoints.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for pipeline stages that process capture data
#[async_trait]
pub trait PipelineStage: Send {
    /// Run the stage, processing data until the input closes or the
    /// cancellation token fires
    async fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;

    /// Gracefully shutdown the stage
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
