use std::fmt;

use crate::exposure::ExposureSettings;
use crate::sampler::SamplerSettings;

/// Highest device-pixel ratio honoured unless the caller overrides it.
pub const DEFAULT_PIXEL_RATIO_CAP: f32 = 2.0;

/// Size of a surface or render target in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width over height, or 1.0 for degenerate sizes.
    pub fn aspect(&self) -> f32 {
        if self.is_empty() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

impl fmt::Display for SurfaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for SurfaceSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

/// Destination rectangle within the surface, in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Viewport covering the whole surface.
    pub fn full(size: SurfaceSize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn size(&self) -> SurfaceSize {
        SurfaceSize::new(self.width, self.height)
    }

    pub fn aspect(&self) -> f32 {
        self.size().aspect()
    }

    /// Intersects the rectangle with the surface bounds.
    pub fn clamp_to(&self, size: SurfaceSize) -> Self {
        let x = self.x.min(size.width);
        let y = self.y.min(size.height);
        let width = self.width.min(size.width - x);
        let height = self.height.min(size.height - y);
        Self::new(x, y, width, height)
    }
}

/// Caller-supplied description of the on-screen surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceDescriptor {
    /// Logical width before the pixel ratio is applied.
    pub width: u32,
    /// Logical height before the pixel ratio is applied.
    pub height: u32,
    /// Device-pixel ratio reported by the host window.
    pub pixel_ratio: f32,
    /// Linear RGBA colour the first pass clears to.
    pub clear_color: [f32; 4],
}

impl SurfaceDescriptor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }
}

impl Default for SurfaceDescriptor {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            pixel_ratio: 1.0,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Destination for pixels: logical size, effective pixel ratio and the current
/// viewport. Recreated only through explicit resize calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSurface {
    descriptor: SurfaceDescriptor,
    pixel_ratio_cap: f32,
    physical: SurfaceSize,
    viewport: Viewport,
}

impl RenderSurface {
    pub fn new(descriptor: SurfaceDescriptor, pixel_ratio_cap: f32) -> Self {
        let physical = physical_size(&descriptor, pixel_ratio_cap);
        Self {
            descriptor,
            pixel_ratio_cap,
            physical,
            viewport: Viewport::full(physical),
        }
    }

    pub fn descriptor(&self) -> &SurfaceDescriptor {
        &self.descriptor
    }

    /// Size of the backing surface in physical pixels.
    pub fn size(&self) -> SurfaceSize {
        self.physical
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.descriptor.clear_color
    }

    /// Pixel ratio after the cap has been applied.
    pub fn effective_pixel_ratio(&self) -> f32 {
        effective_ratio(self.descriptor.pixel_ratio, self.pixel_ratio_cap)
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport.clamp_to(self.physical);
    }

    pub fn reset_viewport(&mut self) {
        self.viewport = Viewport::full(self.physical);
    }

    /// Applies a new logical size. Returns whether the physical size changed.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        self.descriptor.width = width;
        self.descriptor.height = height;
        self.refresh()
    }

    /// Applies a new device-pixel ratio. Returns whether the physical size changed.
    pub fn set_pixel_ratio(&mut self, ratio: f32) -> bool {
        self.descriptor.pixel_ratio = ratio;
        self.refresh()
    }

    fn refresh(&mut self) -> bool {
        let physical = physical_size(&self.descriptor, self.pixel_ratio_cap);
        let changed = physical != self.physical;
        self.physical = physical;
        self.viewport = Viewport::full(physical);
        changed
    }
}

fn effective_ratio(requested: f32, cap: f32) -> f32 {
    if requested.is_finite() && requested > 0.0 {
        requested.min(cap)
    } else {
        1.0
    }
}

fn physical_size(descriptor: &SurfaceDescriptor, cap: f32) -> SurfaceSize {
    let ratio = effective_ratio(descriptor.pixel_ratio, cap);
    let scale = |value: u32| ((value as f32 * ratio).round() as u32).max(1);
    SurfaceSize::new(scale(descriptor.width), scale(descriptor.height))
}

/// Anti-aliasing policy for the scene pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Antialiasing {
    /// Pick the highest sample count supported by the target format.
    #[default]
    Auto,
    /// Disable MSAA and render directly into the destination.
    Off,
    /// Request a specific MSAA sample count (clamped to what the device supports).
    Samples(u32),
}

/// Which pipeline instance produces a presented frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    /// Single scene pass straight to the surface with inline tone mapping.
    #[default]
    Direct,
    /// Scene, tone-mapping and output-encoding passes over extended-range targets.
    Composited,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMode::Direct => f.write_str("direct"),
            PipelineMode::Composited => f.write_str("composited"),
        }
    }
}

/// Pipeline choice per presentation mode, fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSelection {
    pub flat: PipelineMode,
    pub stereo: PipelineMode,
    /// Run the unselected pipeline's stateful passes every frame so switching is seamless.
    pub keep_warm: bool,
}

impl PipelineSelection {
    pub fn mode(&self, stereo: bool) -> PipelineMode {
        if stereo {
            self.stereo
        } else {
            self.flat
        }
    }
}

impl Default for PipelineSelection {
    fn default() -> Self {
        Self {
            flat: PipelineMode::Direct,
            stereo: PipelineMode::Direct,
            keep_warm: false,
        }
    }
}

/// Pixel format class of an offscreen target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    /// 8 bits per channel, display range.
    Standard,
    /// 16-bit float per channel for scene radiance beyond 1.0.
    Extended,
}

/// Parameters for the self-adapting tone-mapping strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptationSettings {
    /// Adaptation speed; the blend towards measured luminance is `1 - exp(-delta * rate)`.
    pub rate: f32,
    /// Scene key the adapted luminance is mapped to.
    pub middle_grey: f32,
    pub min_luminance: f32,
    pub max_luminance: f32,
}

impl AdaptationSettings {
    /// Fraction of the distance to the measured luminance covered this frame.
    pub fn blend(&self, delta: f32) -> f32 {
        if delta.is_finite() && delta > 0.0 {
            1.0 - (-delta * self.rate).exp()
        } else {
            0.0
        }
    }
}

impl Default for AdaptationSettings {
    fn default() -> Self {
        Self {
            rate: 1.0,
            middle_grey: 0.6,
            min_luminance: 0.01,
            max_luminance: 16.0,
        }
    }
}

/// How the composited pipeline maps scene radiance to display range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToneMapStrategy {
    /// Linear scale by the closed-loop exposure from the frame sampler.
    SampledExposure,
    /// GPU-side luminance measurement and temporal adaptation, Reinhard curve.
    Adaptive(AdaptationSettings),
}

impl Default for ToneMapStrategy {
    fn default() -> Self {
        Self::SampledExposure
    }
}

/// Final transfer applied before pixels reach the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputEncoding {
    Linear,
    Gamma(f32),
}

impl OutputEncoding {
    /// Exponent applied to each channel, 1.0 when linear.
    pub fn exponent(&self) -> f32 {
        match self {
            OutputEncoding::Linear => 1.0,
            OutputEncoding::Gamma(gamma) if *gamma > 0.0 => 1.0 / gamma,
            OutputEncoding::Gamma(_) => 1.0,
        }
    }
}

impl Default for OutputEncoding {
    fn default() -> Self {
        Self::Linear
    }
}

/// Immutable configuration passed to the orchestrator at start-up.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Window title shown by the interactive runner.
    pub title: String,
    /// Initial logical window size.
    pub surface_size: (u32, u32),
    pub clear_color: [f32; 4],
    pub pixel_ratio_cap: f32,
    pub antialiasing: Antialiasing,
    pub pipelines: PipelineSelection,
    pub tone_mapping: ToneMapStrategy,
    /// Encoding used by the direct pipeline.
    pub direct_encoding: OutputEncoding,
    /// Encoding used by the final pass of the composited pipeline.
    pub composited_encoding: OutputEncoding,
    pub exposure: ExposureSettings,
    pub sampler: SamplerSettings,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: String::from("Roomview"),
            surface_size: (1280, 720),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            pixel_ratio_cap: DEFAULT_PIXEL_RATIO_CAP,
            antialiasing: Antialiasing::default(),
            pipelines: PipelineSelection::default(),
            tone_mapping: ToneMapStrategy::default(),
            direct_encoding: OutputEncoding::Linear,
            composited_encoding: OutputEncoding::Gamma(2.2),
            exposure: ExposureSettings::default(),
            sampler: SamplerSettings::default(),
        }
    }
}
