use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::camera::Camera;
use crate::scene::{Material, Scene, MAX_LIGHTS};
use crate::types::{OutputEncoding, SurfaceSize, Viewport};

/// Per-invocation camera, lighting and inline tone parameters for the scene pass.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct FrameUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    /// RGB ambient radiance, light count in `w`.
    pub ambient: [f32; 4],
    /// Exposure, inline flag, output exponent, unused.
    pub tone: [f32; 4],
    /// Position in `xyz`, intensity in `w`.
    pub light_position: [[f32; 4]; MAX_LIGHTS],
    pub light_color: [[f32; 4]; MAX_LIGHTS],
}

impl FrameUniforms {
    pub fn new(scene: &Scene, camera: &Camera, exposure: f32, inline: Option<OutputEncoding>) -> Self {
        let mut uniforms = Self::zeroed();
        uniforms.view_proj = camera.view_projection().to_cols_array_2d();
        uniforms.camera_position = camera.position.extend(1.0).to_array();

        let lights = &scene.lights[..scene.lights.len().min(MAX_LIGHTS)];
        uniforms.ambient = scene.ambient.extend(lights.len() as f32).to_array();
        for (index, light) in lights.iter().enumerate() {
            uniforms.light_position[index] = light.position.extend(light.intensity).to_array();
            uniforms.light_color[index] = light.color.extend(1.0).to_array();
        }

        uniforms.tone = match inline {
            Some(encoding) => [exposure, 1.0, encoding.exponent(), 0.0],
            None => [exposure, 0.0, 1.0, 0.0],
        };
        uniforms
    }
}

/// Per-node transform and material, addressed with dynamic offsets.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct NodeUniforms {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub base_color: [f32; 4],
    pub emissive: [f32; 4],
}

impl NodeUniforms {
    pub fn new(transform: Mat4, material: &Material) -> Self {
        Self {
            model: transform.to_cols_array_2d(),
            normal_matrix: transform.inverse().transpose().to_cols_array_2d(),
            base_color: material.base_color.extend(1.0).to_array(),
            emissive: material.emissive.extend(1.0).to_array(),
        }
    }
}

/// Rounds `size` up to the device's dynamic offset alignment.
pub(crate) fn aligned_stride(size: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    size.div_ceil(alignment) * alignment
}

/// Parameters for fullscreen passes.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct PostParams {
    /// Normalised sampling region `[x, y, width, height]`.
    pub region: [f32; 4],
    /// Source texture size in texels, reciprocal in `zw`.
    pub source_size: [f32; 4],
    pub exposure: f32,
    /// 0 scales by `exposure`, 1 maps against adapted luminance.
    pub mode: u32,
    pub middle_grey: f32,
    pub gamma_exponent: f32,
    pub min_luminance: f32,
    pub max_luminance: f32,
    pub blend: f32,
    pub grid: f32,
}

impl PostParams {
    pub fn new(source: SurfaceSize) -> Self {
        let width = source.width.max(1) as f32;
        let height = source.height.max(1) as f32;
        Self {
            region: [0.0, 0.0, 1.0, 1.0],
            source_size: [width, height, 1.0 / width, 1.0 / height],
            exposure: 1.0,
            mode: 0,
            middle_grey: 0.6,
            gamma_exponent: 1.0,
            min_luminance: 0.01,
            max_luminance: 16.0,
            blend: 0.0,
            grid: 1.0,
        }
    }

    /// Restricts sampling to `viewport` within a source of `source` texels.
    pub fn with_viewport(mut self, viewport: Viewport, source: SurfaceSize) -> Self {
        let width = source.width.max(1) as f32;
        let height = source.height.max(1) as f32;
        self.region = [
            viewport.x as f32 / width,
            viewport.y as f32 / height,
            viewport.width as f32 / width,
            viewport.height as f32 / height,
        ];
        self
    }
}
