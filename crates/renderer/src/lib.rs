//! Renderer crate for Roomview, a room viewer with optional stereo output.
//!
//! Each frame flows through a small set of cooperating parts:
//!
//! ```text
//!   roomview CLI
//!          │ RendererConfig
//!          ▼
//!   Renderer::run ──▶ winit event loop ──▶ RenderOrchestrator::update(delta)
//!                                               │
//!            ┌──────────────────────────────────┼───────────────────────┐
//!            ▼                                  ▼                       ▼
//!     StereoPresenter ──▶ PassPipeline ──▶ RenderBackend      FrameSampler
//!      (per-eye views)   (scene, tone map,   (wgpu)                │
//!                          encoding)                               ▼
//!                                                        ExposureController
//! ```
//!
//! The orchestrator owns the backend, the scene provider and the presentation
//! device. Exposure is a closed loop: every frame renders with the current
//! value, a downsampled luminance grid is read back, and the controller nudges
//! the exposure towards the target brightness for the next frame.
//!
//! Everything above `RenderBackend` is GPU-agnostic and tested with mock
//! backends; `gpu` holds the wgpu implementation.

use anyhow::Result;

pub mod backend;
pub mod camera;
pub mod error;
pub mod exposure;
mod gpu;
pub mod orchestrator;
pub mod pipeline;
pub mod runtime;
pub mod sampler;
pub mod scene;
pub mod stereo;
pub mod types;
mod window;

pub use backend::{PassInput, PassInvocation, PassOutput, RenderBackend, RenderTarget, TargetDescriptor};
pub use camera::{Camera, Projection};
pub use error::{RenderError, RenderResult};
pub use exposure::{ExposureController, ExposureSettings, ExposureState, ExposureStep};
pub use gpu::{GpuTarget, WgpuBackend};
pub use orchestrator::{FrameOutcome, FrameStats, RenderOrchestrator, SkipReason};
pub use pipeline::{Pass, PassOp, PassPipeline, PassRun, PipelineSet};
pub use runtime::{
    BoxedTimeSource, FixedTimeSource, SystemTimeSource, TimeSample, TimeSource, DEFAULT_MAX_DELTA,
    DEFAULT_MIN_DELTA,
};
pub use sampler::{
    CropSettings, FrameSampler, LuminanceSample, Readback, ReadbackStrategy, SampleRequest,
    SamplerSettings,
};
pub use scene::{Material, Mesh, MeshId, PointLight, Scene, SceneNode, SceneProvider, StaticScene, Vertex, MAX_LIGHTS};
pub use stereo::{
    Eye, EyeFrame, EyePose, EyeView, NoPresentationDevice, PresentationDevice, PresenterState,
    SessionEvent, SessionEventSink, SideBySideDevice, StereoPresenter, DEFAULT_IPD,
};
pub use types::{
    AdaptationSettings, Antialiasing, OutputEncoding, PipelineMode, PipelineSelection, RenderSurface,
    RendererConfig, SurfaceDescriptor, SurfaceSize, TargetFormat, ToneMapStrategy, Viewport,
    DEFAULT_PIXEL_RATIO_CAP,
};
pub use window::{Locomotion, Stationary};

/// High-level entry point that owns the chosen configuration.
///
/// The heavy lifting lives in [`RenderOrchestrator`]; `Renderer` opens the
/// window, builds the wgpu backend and hands both to the event loop.
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Opens the viewer window and renders until it closes.
    ///
    /// Returns an error when the window or GPU cannot be initialised, or when
    /// a frame fails in a way that cannot be retried.
    pub fn run<P, D, L>(&self, provider: P, device: D, locomotion: L, time_source: BoxedTimeSource) -> Result<()>
    where
        P: SceneProvider,
        D: PresentationDevice,
        L: Locomotion,
    {
        window::run_window(&self.config, provider, device, locomotion, time_source)
    }
}
