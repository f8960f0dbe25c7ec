use std::collections::HashMap;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use wgpu::util::DeviceExt;

use crate::backend::{PassInput, PassInvocation, PassOutput, RenderBackend, RenderTarget, TargetDescriptor};
use crate::camera::Camera;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{Pass, PassOp};
use crate::sampler::{Readback, ReadbackStrategy, SampleRequest};
use crate::scene::Scene;
use crate::types::{AdaptationSettings, OutputEncoding, RendererConfig, SurfaceSize, ToneMapStrategy, Viewport};

use super::context::GpuContext;
use super::meshes::MeshCache;
use super::pipeline::{PipelineCache, PostKind};
use super::readback::{CaptureKind, ReadbackRing};
use super::targets::{texture_format, ColorTexture, GpuTarget, SceneAttachments, FRAME_FORMAT};
use super::uniforms::{aligned_stride, FrameUniforms, NodeUniforms, PostParams};

const LUMINANCE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

struct FrameInFlight {
    encoder: wgpu::CommandEncoder,
    surface_texture: wgpu::SurfaceTexture,
}

/// Measured and adapted luminance for one adaptive tone-mapping pass.
struct AdaptationState {
    measured: ColorTexture,
    adapted: [ColorTexture; 2],
    current: usize,
    primed: bool,
}

impl AdaptationState {
    fn new(device: &wgpu::Device, key: &str) -> Self {
        let one = SurfaceSize::new(1, 1);
        tracing::debug!(pass = key, "allocating luminance adaptation state");
        Self {
            measured: ColorTexture::new(device, "measured luminance", one, LUMINANCE_FORMAT),
            adapted: [
                ColorTexture::new(device, "adapted luminance a", one, LUMINANCE_FORMAT),
                ColorTexture::new(device, "adapted luminance b", one, LUMINANCE_FORMAT),
            ],
            current: 0,
            primed: false,
        }
    }
}

/// Shared inputs for fullscreen passes.
struct PostResources<'a> {
    device: &'a wgpu::Device,
    pipelines: &'a mut PipelineCache,
    sampler: &'a wgpu::Sampler,
    fallback: &'a wgpu::TextureView,
}

struct FullscreenPass<'a> {
    label: &'a str,
    kind: PostKind,
    source: &'a wgpu::TextureView,
    secondary: Option<&'a wgpu::TextureView>,
    params: PostParams,
    target: &'a wgpu::TextureView,
    format: wgpu::TextureFormat,
    clear: Option<[f32; 4]>,
    viewport: Option<Viewport>,
}

fn load_op(clear: Option<[f32; 4]>) -> wgpu::LoadOp<wgpu::Color> {
    match clear {
        Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
            r: f64::from(r),
            g: f64::from(g),
            b: f64::from(b),
            a: f64::from(a),
        }),
        None => wgpu::LoadOp::Load,
    }
}

fn restrict(pass: &mut wgpu::RenderPass<'_>, viewport: Viewport) {
    pass.set_viewport(
        viewport.x as f32,
        viewport.y as f32,
        viewport.width as f32,
        viewport.height as f32,
        0.0,
        1.0,
    );
    pass.set_scissor_rect(viewport.x, viewport.y, viewport.width, viewport.height);
}

fn encode_fullscreen(resources: &mut PostResources<'_>, encoder: &mut wgpu::CommandEncoder, pass: FullscreenPass<'_>) {
    let params = resources
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("post params"),
            contents: bytemuck::bytes_of(&pass.params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
    let bind_group = resources.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(pass.label),
        layout: &resources.pipelines.layouts.post_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(pass.source),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(resources.sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: params.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(
                    pass.secondary.unwrap_or(resources.fallback),
                ),
            },
        ],
    });
    let pipeline = resources
        .pipelines
        .post(resources.device, pass.kind, pass.format);

    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(pass.label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: pass.target,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: load_op(pass.clear),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    });
    if let Some(viewport) = pass.viewport {
        restrict(&mut render_pass, viewport);
    }
    render_pass.set_pipeline(pipeline);
    render_pass.set_bind_group(0, &bind_group, &[]);
    render_pass.draw(0..3, 0..1);
}

/// wgpu implementation of [`RenderBackend`] drawing into a window surface.
///
/// Passes that target the surface write an intermediate frame texture which
/// is captured for luminance sampling and blitted to the swapchain on
/// `finish_frame`.
pub struct WgpuBackend {
    context: GpuContext,
    pipelines: PipelineCache,
    meshes: MeshCache,
    attachments: SceneAttachments,
    frame: ColorTexture,
    sample_target: Option<ColorTexture>,
    fallback: ColorTexture,
    sampler: wgpu::Sampler,
    adaptation: HashMap<String, AdaptationState>,
    readback: ReadbackRing,
    current: Option<FrameInFlight>,
    node_stride: u64,
}

impl WgpuBackend {
    /// Creates the device and surface for `target`. The window behind
    /// `target` must outlive the backend.
    pub fn new<T>(target: &T, size: SurfaceSize, config: &RendererConfig) -> RenderResult<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let context = GpuContext::new(target, size, config.antialiasing)
            .map_err(|err| RenderError::SurfaceUnavailable(format!("{err:#}")))?;
        let device = &context.device;

        let pipelines = PipelineCache::new(device);
        let attachments = SceneAttachments::new(device, context.size, context.sample_count);
        let frame = ColorTexture::new(device, "frame", context.size, FRAME_FORMAT);
        let fallback = ColorTexture::new(device, "fallback", SurfaceSize::new(1, 1), LUMINANCE_FORMAT);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("post sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let node_stride = aligned_stride(
            std::mem::size_of::<NodeUniforms>() as u64,
            u64::from(device.limits().min_uniform_buffer_offset_alignment),
        );

        tracing::info!(
            width = context.size.width,
            height = context.size.height,
            sample_count = context.sample_count,
            surface_format = ?context.surface_format,
            "wgpu backend ready"
        );

        Ok(Self {
            context,
            pipelines,
            meshes: MeshCache::new(),
            attachments,
            frame,
            sample_target: None,
            fallback,
            sampler,
            adaptation: HashMap::new(),
            readback: ReadbackRing::new(),
            current: None,
            node_stride,
        })
    }

    pub fn sample_count(&self) -> u32 {
        self.context.sample_count
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.context.surface_format
    }

    fn check_dimensions(&self, size: SurfaceSize) -> RenderResult<()> {
        let max = self.context.max_dimension;
        if size.width > max || size.height > max {
            return Err(RenderError::SurfaceUnavailable(format!(
                "{size} exceeds the GPU texture limit of {max}"
            )));
        }
        Ok(())
    }

    fn ensure_attachments(&mut self, size: SurfaceSize) {
        let device = &self.context.device;
        if !self.attachments.matches(size, self.context.sample_count) {
            self.attachments = SceneAttachments::new(device, size, self.context.sample_count);
        }
        if self.frame.size != size {
            self.frame = ColorTexture::new(device, "frame", size, FRAME_FORMAT);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_scene(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        scene: &Scene,
        camera: &Camera,
        inline: Option<OutputEncoding>,
        target: &wgpu::TextureView,
        format: wgpu::TextureFormat,
        invocation: &PassInvocation<'_, GpuTarget>,
    ) {
        let device = &self.context.device;
        self.meshes.prepare(device, scene);

        let frame_uniforms = FrameUniforms::new(scene, camera, invocation.exposure, inline);
        let frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("frame uniforms"),
            contents: bytemuck::bytes_of(&frame_uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let frame_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame uniforms"),
            layout: &self.pipelines.layouts.frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        let stride = self.node_stride as usize;
        let mut node_bytes = vec![0u8; stride * scene.nodes.len().max(1)];
        for (index, node) in scene.nodes.iter().enumerate() {
            let uniforms = NodeUniforms::new(node.transform, &node.material);
            let offset = index * stride;
            node_bytes[offset..offset + std::mem::size_of::<NodeUniforms>()]
                .copy_from_slice(bytemuck::bytes_of(&uniforms));
        }
        let node_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("node uniforms"),
            contents: &node_bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let node_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("node uniforms"),
            layout: &self.pipelines.layouts.node_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &node_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<NodeUniforms>() as u64),
                }),
            }],
        });

        let sample_count = self.context.sample_count;
        let pipeline = self.pipelines.scene(device, format, sample_count);
        self.attachments.prepare_multisample(device, format);
        let (view, resolve_target) = match self.attachments.multisample_view(format) {
            Some(multisample) => (multisample, Some(target)),
            None => (target, None),
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("scene pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target,
                ops: wgpu::Operations {
                    load: load_op(invocation.clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.attachments.depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Discard,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        restrict(&mut render_pass, invocation.viewport);
        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, &frame_group, &[]);

        for (index, node) in scene.nodes.iter().enumerate() {
            let Some(mesh) = self.meshes.get(node.mesh.id()) else {
                continue;
            };
            render_pass.set_bind_group(1, &node_group, &[(index * stride) as u32]);
            render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            render_pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_tone_map(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        strategy: ToneMapStrategy,
        source: &GpuTarget,
        target: &wgpu::TextureView,
        format: wgpu::TextureFormat,
        key: String,
        invocation: &PassInvocation<'_, GpuTarget>,
    ) {
        let mut params = PostParams::new(source.size());
        params.exposure = invocation.exposure;

        let Self {
            context,
            pipelines,
            sampler,
            fallback,
            adaptation,
            ..
        } = self;
        let mut resources = PostResources {
            device: &context.device,
            pipelines,
            sampler,
            fallback: &fallback.view,
        };

        let adapted = match strategy {
            ToneMapStrategy::SampledExposure => None,
            ToneMapStrategy::Adaptive(settings) => {
                let state = adaptation
                    .entry(key)
                    .or_insert_with_key(|key| AdaptationState::new(resources.device, key));
                adapt_luminance(&mut resources, encoder, state, settings, source, invocation);
                params.mode = 1;
                params.middle_grey = settings.middle_grey;
                params.min_luminance = settings.min_luminance;
                params.max_luminance = settings.max_luminance;
                Some(&state.adapted[state.current].view)
            }
        };

        encode_fullscreen(
            &mut resources,
            encoder,
            FullscreenPass {
                label: "tone map pass",
                kind: PostKind::ToneMap,
                source: source.view(),
                secondary: adapted,
                params,
                target,
                format,
                clear: invocation.clear,
                viewport: Some(invocation.viewport),
            },
        );
    }

    /// Schedules the luminance capture of the current frame texture.
    fn schedule_capture(&mut self, request: &SampleRequest) {
        if !self.readback.has_idle_slot() {
            tracing::trace!("readback slots busy; capture deferred");
            return;
        }
        let Some(frame) = self.current.as_mut() else {
            return;
        };
        let device = &self.context.device;
        let region = request.region.clamp_to(self.frame.size);
        if region.is_empty() {
            tracing::trace!(?region, "empty sample region; capture skipped");
            return;
        }

        match request.strategy {
            ReadbackStrategy::FullFrame => {
                self.readback.encode_copy(
                    device,
                    &mut frame.encoder,
                    &self.frame.texture,
                    region,
                    CaptureKind::Pixels,
                );
            }
            ReadbackStrategy::GpuDownsample => {
                let grid = request.grid.max(1);
                let grid_size = SurfaceSize::new(grid, grid);
                if self.sample_target.as_ref().map(|target| target.size) != Some(grid_size) {
                    self.sample_target = Some(ColorTexture::new(device, "luminance sample", grid_size, FRAME_FORMAT));
                }
                let Some(sample_target) = self.sample_target.as_ref() else {
                    return;
                };

                let mut params = PostParams::new(self.frame.size);
                params.region = request.crop.normalized_within(region, self.frame.size);
                params.grid = grid as f32;
                let mut resources = PostResources {
                    device,
                    pipelines: &mut self.pipelines,
                    sampler: &self.sampler,
                    fallback: &self.fallback.view,
                };
                encode_fullscreen(
                    &mut resources,
                    &mut frame.encoder,
                    FullscreenPass {
                        label: "luminance sample pass",
                        kind: PostKind::Sample,
                        source: &self.frame.view,
                        secondary: None,
                        params,
                        target: &sample_target.view,
                        format: FRAME_FORMAT,
                        clear: None,
                        viewport: None,
                    },
                );
                self.readback.encode_copy(
                    device,
                    &mut frame.encoder,
                    &sample_target.texture,
                    Viewport::full(grid_size),
                    CaptureKind::Sample { grid },
                );
            }
        }
    }
}

/// Measures the input and moves the adapted luminance towards it. Skipped
/// for zero deltas so repeated eyes do not adapt twice per frame.
fn adapt_luminance(
    resources: &mut PostResources<'_>,
    encoder: &mut wgpu::CommandEncoder,
    state: &mut AdaptationState,
    settings: AdaptationSettings,
    source: &GpuTarget,
    invocation: &PassInvocation<'_, GpuTarget>,
) {
    if state.primed && settings.blend(invocation.delta) <= 0.0 {
        return;
    }

    let mut params = PostParams::new(source.size()).with_viewport(invocation.viewport, source.size());
    params.min_luminance = settings.min_luminance;
    params.max_luminance = settings.max_luminance;
    encode_fullscreen(
        resources,
        encoder,
        FullscreenPass {
            label: "luminance measure pass",
            kind: PostKind::Luminance,
            source: source.view(),
            secondary: None,
            params,
            target: &state.measured.view,
            format: LUMINANCE_FORMAT,
            clear: None,
            viewport: None,
        },
    );

    params.blend = if state.primed {
        settings.blend(invocation.delta)
    } else {
        1.0
    };
    let next = 1 - state.current;
    encode_fullscreen(
        resources,
        encoder,
        FullscreenPass {
            label: "luminance adapt pass",
            kind: PostKind::Adapt,
            source: &state.measured.view,
            secondary: Some(&state.adapted[state.current].view),
            params,
            target: &state.adapted[next].view,
            format: LUMINANCE_FORMAT,
            clear: None,
            viewport: None,
        },
    );
    state.current = next;
    state.primed = true;
}

impl RenderBackend for WgpuBackend {
    type Target = GpuTarget;

    fn surface_size(&self) -> SurfaceSize {
        self.context.size
    }

    fn configure_surface(&mut self, size: SurfaceSize) -> RenderResult<()> {
        if size.is_empty() {
            return Err(RenderError::SurfaceUnavailable(format!(
                "cannot configure a {size} surface"
            )));
        }
        self.check_dimensions(size)?;
        if size == self.context.size {
            self.context.reconfigure();
        } else {
            self.context.resize(size);
        }
        self.ensure_attachments(size);
        tracing::debug!(width = size.width, height = size.height, "surface configured");
        Ok(())
    }

    fn create_target(&mut self, descriptor: &TargetDescriptor) -> RenderResult<GpuTarget> {
        self.check_dimensions(descriptor.size)?;
        Ok(GpuTarget::new(
            &self.context.device,
            &descriptor.label,
            descriptor.size,
            descriptor.format,
        ))
    }

    fn pass_resized(&mut self, pipeline: &str, pass: &Pass, size: SurfaceSize) {
        self.ensure_attachments(size);
        if pass.is_stateful() {
            let device = &self.context.device;
            self.adaptation
                .entry(format!("{pipeline}/{}", pass.name()))
                .or_insert_with_key(|key| AdaptationState::new(device, key));
        }
    }

    fn begin_frame(&mut self) -> RenderResult<()> {
        self.abandon_frame();
        let surface_texture = match self.context.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(RenderError::OutOfMemory),
            Err(err) => {
                tracing::warn!(error = %err, "failed to acquire surface texture");
                return Err(RenderError::SurfaceLost);
            }
        };
        let encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });
        self.current = Some(FrameInFlight {
            encoder,
            surface_texture,
        });
        Ok(())
    }

    fn encode_pass(&mut self, invocation: &PassInvocation<'_, GpuTarget>) -> RenderResult<()> {
        let Some(mut frame) = self.current.take() else {
            return Err(RenderError::SurfaceLost);
        };

        let (target, format) = match invocation.output {
            PassOutput::Surface => (self.frame.view.clone(), FRAME_FORMAT),
            PassOutput::Target(target) => (target.view().clone(), texture_format(target.format())),
        };

        match (invocation.pass.op(), &invocation.input) {
            (PassOp::Scene { inline }, PassInput::Scene { scene, camera }) => {
                self.encode_scene(&mut frame.encoder, scene, camera, *inline, &target, format, invocation);
            }
            (PassOp::ToneMap(strategy), PassInput::Target(source)) => {
                let key = format!("{}/{}", invocation.pipeline, invocation.pass.name());
                self.encode_tone_map(&mut frame.encoder, *strategy, source, &target, format, key, invocation);
            }
            (PassOp::Encode(encoding), PassInput::Target(source)) => {
                let mut params = PostParams::new(source.size());
                params.gamma_exponent = encoding.exponent();
                let mut resources = PostResources {
                    device: &self.context.device,
                    pipelines: &mut self.pipelines,
                    sampler: &self.sampler,
                    fallback: &self.fallback.view,
                };
                encode_fullscreen(
                    &mut resources,
                    &mut frame.encoder,
                    FullscreenPass {
                        label: "output encoding pass",
                        kind: PostKind::Encode,
                        source: source.view(),
                        secondary: None,
                        params,
                        target: &target,
                        format,
                        clear: invocation.clear,
                        viewport: Some(invocation.viewport),
                    },
                );
            }
            (op, _) => {
                self.current = Some(frame);
                return Err(RenderError::InvalidPipeline(format!(
                    "pass '{}' ({op:?}) received an input it cannot read",
                    invocation.pass.name()
                )));
            }
        }

        self.current = Some(frame);
        Ok(())
    }

    fn capture(&mut self, request: &SampleRequest) -> RenderResult<Option<Readback>> {
        let completed = self.readback.collect(&self.context.device);
        self.schedule_capture(request);
        completed
    }

    fn finish_frame(&mut self) -> RenderResult<()> {
        let Some(FrameInFlight {
            mut encoder,
            surface_texture,
        }) = self.current.take()
        else {
            tracing::debug!("finish_frame called without a frame in flight");
            return Ok(());
        };

        let surface_view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut resources = PostResources {
            device: &self.context.device,
            pipelines: &mut self.pipelines,
            sampler: &self.sampler,
            fallback: &self.fallback.view,
        };
        encode_fullscreen(
            &mut resources,
            &mut encoder,
            FullscreenPass {
                label: "present blit",
                kind: PostKind::Blit,
                source: &self.frame.view,
                secondary: None,
                params: PostParams::new(self.frame.size),
                target: &surface_view,
                format: self.context.surface_format,
                clear: None,
                viewport: None,
            },
        );

        self.context.queue.submit(std::iter::once(encoder.finish()));
        self.readback.submitted();
        surface_texture.present();
        self.meshes.end_frame();
        Ok(())
    }

    fn abandon_frame(&mut self) {
        if self.current.take().is_some() {
            tracing::debug!("abandoning frame in flight");
        }
        self.readback.abandon();
    }
}
