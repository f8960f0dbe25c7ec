use std::collections::HashMap;

use crate::scene::Vertex;

use super::shaders::ShaderModules;
use super::targets::DEPTH_FORMAT;

/// Fullscreen shaders available to post passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PostKind {
    ToneMap,
    Encode,
    Luminance,
    Adapt,
    Sample,
    Blit,
}

pub(crate) struct PipelineLayouts {
    pub frame_layout: wgpu::BindGroupLayout,
    pub node_layout: wgpu::BindGroupLayout,
    pub post_layout: wgpu::BindGroupLayout,
    scene_pipeline_layout: wgpu::PipelineLayout,
    post_pipeline_layout: wgpu::PipelineLayout,
}

impl PipelineLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform_entry = |binding, has_dynamic_offset| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset,
                min_binding_size: None,
            },
            count: None,
        };
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame uniform layout"),
            entries: &[uniform_entry(0, false)],
        });
        let node_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("node uniform layout"),
            entries: &[uniform_entry(0, true)],
        });
        let post_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("post pass layout"),
            entries: &[
                texture_entry(0),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                uniform_entry(2, false),
                texture_entry(3),
            ],
        });

        let scene_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scene pipeline layout"),
            bind_group_layouts: &[&frame_layout, &node_layout],
            push_constant_ranges: &[],
        });
        let post_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("post pipeline layout"),
            bind_group_layouts: &[&post_layout],
            push_constant_ranges: &[],
        });

        Self {
            frame_layout,
            node_layout,
            post_layout,
            scene_pipeline_layout,
            post_pipeline_layout,
        }
    }
}

/// Render pipelines built on first use, keyed by output format.
pub(crate) struct PipelineCache {
    pub layouts: PipelineLayouts,
    shaders: ShaderModules,
    scene: HashMap<(wgpu::TextureFormat, u32), wgpu::RenderPipeline>,
    post: HashMap<(PostKind, wgpu::TextureFormat), wgpu::RenderPipeline>,
}

impl PipelineCache {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            layouts: PipelineLayouts::new(device),
            shaders: ShaderModules::new(device),
            scene: HashMap::new(),
            post: HashMap::new(),
        }
    }

    pub fn scene(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat, sample_count: u32) -> &wgpu::RenderPipeline {
        let layouts = &self.layouts;
        let shaders = &self.shaders;
        self.scene.entry((format, sample_count)).or_insert_with(|| {
            tracing::debug!(?format, sample_count, "building scene pipeline");
            create_scene_pipeline(device, layouts, shaders, format, sample_count)
        })
    }

    pub fn post(&mut self, device: &wgpu::Device, kind: PostKind, format: wgpu::TextureFormat) -> &wgpu::RenderPipeline {
        let layouts = &self.layouts;
        let shaders = &self.shaders;
        self.post.entry((kind, format)).or_insert_with(|| {
            tracing::debug!(?kind, ?format, "building post pipeline");
            create_post_pipeline(device, layouts, shaders, kind, format)
        })
    }
}

fn primitive_state() -> wgpu::PrimitiveState {
    wgpu::PrimitiveState {
        topology: wgpu::PrimitiveTopology::TriangleList,
        strip_index_format: None,
        front_face: wgpu::FrontFace::Ccw,
        cull_mode: None,
        polygon_mode: wgpu::PolygonMode::Fill,
        unclipped_depth: false,
        conservative: false,
    }
}

fn create_scene_pipeline(
    device: &wgpu::Device,
    layouts: &PipelineLayouts,
    shaders: &ShaderModules,
    format: wgpu::TextureFormat,
    sample_count: u32,
) -> wgpu::RenderPipeline {
    let attributes = wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("scene pipeline"),
        layout: Some(&layouts.scene_pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shaders.scene_vertex,
            entry_point: Some("main"),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: primitive_state(),
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: sample_count,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        fragment: Some(wgpu::FragmentState {
            module: &shaders.scene_fragment,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}

fn create_post_pipeline(
    device: &wgpu::Device,
    layouts: &PipelineLayouts,
    shaders: &ShaderModules,
    kind: PostKind,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let (label, module) = match kind {
        PostKind::ToneMap => ("tone map pipeline", &shaders.tone_map),
        PostKind::Encode => ("output encoding pipeline", &shaders.encode),
        PostKind::Luminance => ("luminance measure pipeline", &shaders.luminance),
        PostKind::Adapt => ("luminance adapt pipeline", &shaders.adapt),
        PostKind::Sample => ("luminance sample pipeline", &shaders.sample),
        PostKind::Blit => ("blit pipeline", &shaders.blit),
    };
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layouts.post_pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shaders.fullscreen,
            entry_point: Some("main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: primitive_state(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}
