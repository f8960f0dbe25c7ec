use thiserror::Error;

use crate::types::SurfaceSize;

/// Failures surfaced by the render orchestration layer.
///
/// Surface, memory and configuration failures are fatal; the orchestrator
/// recovers from the rest within the frame that raised them.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render surface unavailable: {0}")]
    SurfaceUnavailable(String),
    #[error("render target is {actual} but the surface is {expected}")]
    InvalidTargetSize {
        expected: SurfaceSize,
        actual: SurfaceSize,
    },
    #[error("luminance readback failed: {0}")]
    SampleReadbackFailure(String),
    #[error("session transition rejected: {0}")]
    SessionTransition(String),
    #[error("render surface lost")]
    SurfaceLost,
    #[error("GPU out of memory")]
    OutOfMemory,
    #[error("invalid pass pipeline: {0}")]
    InvalidPipeline(String),
    #[error("invalid renderer configuration: {0}")]
    InvalidConfig(String),
}

impl RenderError {
    /// Whether the frame loop should keep running after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RenderError::InvalidTargetSize { .. }
                | RenderError::SampleReadbackFailure(_)
                | RenderError::SessionTransition(_)
                | RenderError::SurfaceLost
        )
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
