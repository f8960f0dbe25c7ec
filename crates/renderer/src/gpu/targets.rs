use crate::backend::RenderTarget;
use crate::types::{SurfaceSize, TargetFormat};

pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Format of the composed frame that is sampled and blitted to the swapchain.
pub(crate) const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub(crate) fn texture_format(format: TargetFormat) -> wgpu::TextureFormat {
    match format {
        TargetFormat::Standard => wgpu::TextureFormat::Rgba8Unorm,
        TargetFormat::Extended => wgpu::TextureFormat::Rgba16Float,
    }
}

fn extent(size: SurfaceSize) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width.max(1),
        height: size.height.max(1),
        depth_or_array_layers: 1,
    }
}

/// Single-sample colour texture usable as attachment, binding and copy source.
pub(crate) struct ColorTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: SurfaceSize,
}

impl ColorTexture {
    pub fn new(device: &wgpu::Device, label: &str, size: SurfaceSize, format: wgpu::TextureFormat) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view, size }
    }
}

/// Offscreen pipeline target handed to `PassPipeline`.
pub struct GpuTarget {
    format: TargetFormat,
    color: ColorTexture,
}

impl GpuTarget {
    pub(crate) fn new(device: &wgpu::Device, label: &str, size: SurfaceSize, format: TargetFormat) -> Self {
        Self {
            format,
            color: ColorTexture::new(device, label, size, texture_format(format)),
        }
    }

    pub(crate) fn view(&self) -> &wgpu::TextureView {
        &self.color.view
    }
}

impl RenderTarget for GpuTarget {
    fn size(&self) -> SurfaceSize {
        self.color.size
    }

    fn format(&self) -> TargetFormat {
        self.format
    }
}

/// Scene attachments that depend on the surface size and sample count.
pub(crate) struct SceneAttachments {
    pub size: SurfaceSize,
    pub sample_count: u32,
    pub depth: wgpu::TextureView,
    /// Multisampled colour per target format, resolved into the pass output.
    multisample: Vec<(wgpu::TextureFormat, wgpu::TextureView)>,
}

impl SceneAttachments {
    pub fn new(device: &wgpu::Device, size: SurfaceSize, sample_count: u32) -> Self {
        let depth = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("scene depth"),
                size: extent(size),
                mip_level_count: 1,
                sample_count,
                dimension: wgpu::TextureDimension::D2,
                format: DEPTH_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            size,
            sample_count,
            depth,
            multisample: Vec::new(),
        }
    }

    pub fn matches(&self, size: SurfaceSize, sample_count: u32) -> bool {
        self.size == size && self.sample_count == sample_count
    }

    /// Creates the multisampled colour texture for `format` if missing.
    pub fn prepare_multisample(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) {
        if self.sample_count <= 1 || self.multisample.iter().any(|(existing, _)| *existing == format) {
            return;
        }
        let view = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("scene multisample colour"),
                size: extent(self.size),
                mip_level_count: 1,
                sample_count: self.sample_count,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.multisample.push((format, view));
    }

    /// `None` when rendering single-sampled.
    pub fn multisample_view(&self, format: wgpu::TextureFormat) -> Option<&wgpu::TextureView> {
        self.multisample
            .iter()
            .find(|(existing, _)| *existing == format)
            .map(|(_, view)| view)
    }
}
