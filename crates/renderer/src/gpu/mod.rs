//! wgpu backend for the render orchestrator.
//!
//! - `context` owns the wgpu instance, device and surface and reconfigures
//!   the swapchain on resize.
//! - `shaders` holds the GLSL for the scene and every fullscreen pass.
//! - `pipeline` builds bind group layouts and caches render pipelines per
//!   output format.
//! - `targets` creates offscreen targets and the scene's depth and MSAA
//!   attachments.
//! - `meshes` uploads scene geometry and releases meshes that go unused.
//! - `readback` runs the asynchronous luminance capture ring.
//! - `state` implements `RenderBackend` on top of all of the above.

mod context;
mod meshes;
mod pipeline;
mod readback;
mod shaders;
mod state;
mod targets;
mod uniforms;

pub use state::WgpuBackend;
pub use targets::GpuTarget;
