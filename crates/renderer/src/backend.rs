//! Seam between the orchestration logic and a GPU implementation.

use crate::camera::Camera;
use crate::error::RenderResult;
use crate::pipeline::Pass;
use crate::sampler::{Readback, SampleRequest};
use crate::scene::Scene;
use crate::types::{SurfaceSize, TargetFormat, Viewport};

/// Offscreen buffer created by a backend.
pub trait RenderTarget {
    fn size(&self) -> SurfaceSize;
    fn format(&self) -> TargetFormat;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetDescriptor {
    pub label: String,
    pub size: SurfaceSize,
    pub format: TargetFormat,
}

/// What a pass reads.
pub enum PassInput<'a, T> {
    Scene { scene: &'a Scene, camera: &'a Camera },
    Target(&'a T),
}

/// Where a pass writes.
pub enum PassOutput<'a, T> {
    Target(&'a T),
    Surface,
}

impl<T> PassOutput<'_, T> {
    pub fn is_surface(&self) -> bool {
        matches!(self, PassOutput::Surface)
    }
}

/// One encoded pass of a pipeline run.
pub struct PassInvocation<'a, T> {
    pub pipeline: &'a str,
    pub pass: &'a Pass,
    pub input: PassInput<'a, T>,
    pub output: PassOutput<'a, T>,
    /// Region of the output (and of target inputs) the pass covers.
    pub viewport: Viewport,
    /// Clear colour for the attachment, `None` to keep its contents.
    pub clear: Option<[f32; 4]>,
    pub exposure: f32,
    /// Seconds since the previous frame; zero for every eye after the first.
    pub delta: f32,
}

/// GPU implementation driven by the orchestrator, one frame at a time.
pub trait RenderBackend {
    type Target: RenderTarget;

    /// Size the presentable surface is currently configured with.
    fn surface_size(&self) -> SurfaceSize;

    fn configure_surface(&mut self, size: SurfaceSize) -> RenderResult<()>;

    fn create_target(&mut self, descriptor: &TargetDescriptor) -> RenderResult<Self::Target>;

    /// Lets stateful passes rebuild private resources after a resize.
    fn pass_resized(&mut self, _pipeline: &str, _pass: &Pass, _size: SurfaceSize) {}

    fn begin_frame(&mut self) -> RenderResult<()>;

    fn encode_pass(&mut self, invocation: &PassInvocation<'_, Self::Target>) -> RenderResult<()>;

    /// Schedules a capture of the frame being built and returns the newest
    /// completed capture, if any.
    fn capture(&mut self, request: &SampleRequest) -> RenderResult<Option<Readback>>;

    /// Submits and presents the frame.
    fn finish_frame(&mut self) -> RenderResult<()>;

    /// Drops the frame being built without presenting it.
    fn abandon_frame(&mut self) {}
}
