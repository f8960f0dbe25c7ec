//! Downsampled luminance samples taken from the centre of the rendered frame.

use image::{imageops, imageops::FilterType, ImageBuffer, Rgba};

use crate::error::{RenderError, RenderResult};
use crate::types::{SurfaceSize, Viewport};

/// Rec. 709 luma weights.
pub const LUMA_WEIGHTS: [f32; 3] = [0.2126, 0.7152, 0.0722];

fn pixel_count(grid: u32) -> RenderResult<usize> {
    grid.checked_mul(grid)
        .filter(|count| *count > 0)
        .and_then(|count| usize::try_from(count).ok())
        .ok_or_else(|| RenderError::SampleReadbackFailure(format!("invalid sample grid {grid}")))
}

/// Fixed-size grid of RGB values covering the cropped frame centre.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuminanceSample {
    grid: u32,
    pixels: Vec<[u8; 3]>,
}

impl LuminanceSample {
    /// Wraps `grid * grid` pixels in row-major order.
    pub fn new(grid: u32, pixels: Vec<[u8; 3]>) -> RenderResult<Self> {
        let expected = pixel_count(grid)?;
        if pixels.len() != expected {
            return Err(RenderError::SampleReadbackFailure(format!(
                "expected {expected} sample pixels for a {grid}x{grid} grid, got {}",
                pixels.len()
            )));
        }
        Ok(Self { grid, pixels })
    }

    /// Builds a sample from tightly packed RGBA bytes, dropping alpha.
    pub fn from_rgba(grid: u32, rgba: &[u8]) -> RenderResult<Self> {
        let pixels = rgba
            .chunks_exact(4)
            .map(|texel| [texel[0], texel[1], texel[2]])
            .collect();
        Self::new(grid, pixels)
    }

    pub fn uniform(grid: u32, rgb: [u8; 3]) -> RenderResult<Self> {
        Ok(Self {
            grid,
            pixels: vec![rgb; pixel_count(grid)?],
        })
    }

    pub fn grid(&self) -> u32 {
        self.grid
    }

    pub fn pixels(&self) -> &[[u8; 3]] {
        &self.pixels
    }

    /// Mean luma normalised to `[0, 1]`.
    pub fn average_luma(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .pixels
            .iter()
            .map(|[r, g, b]| {
                LUMA_WEIGHTS[0] * *r as f32 + LUMA_WEIGHTS[1] * *g as f32 + LUMA_WEIGHTS[2] * *b as f32
            })
            .sum();
        sum / (self.pixels.len() as f32 * 255.0)
    }
}

/// Fractions of the frame excluded from the sample on each edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropSettings {
    /// Applied to both the left and the right edge.
    pub horizontal: f32,
    pub top: f32,
    pub bottom: f32,
}

impl Default for CropSettings {
    fn default() -> Self {
        Self {
            horizontal: 0.3,
            top: 0.3,
            bottom: 0.3,
        }
    }
}

impl CropSettings {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("horizontal", self.horizontal),
            ("top", self.top),
            ("bottom", self.bottom),
        ] {
            if !(0.0..0.5).contains(&value) {
                return Err(format!("{name} border must be within [0, 0.5) (got {value})"));
            }
        }
        if self.top + self.bottom >= 1.0 {
            return Err("top and bottom borders leave no rows to sample".into());
        }
        Ok(())
    }

    /// Normalised crop rectangle as `[x, y, width, height]`.
    pub fn normalized(&self) -> [f32; 4] {
        [
            self.horizontal,
            self.top,
            1.0 - 2.0 * self.horizontal,
            1.0 - self.top - self.bottom,
        ]
    }

    /// Crop of `region` expressed in normalised coordinates of the whole surface.
    pub fn normalized_within(&self, region: Viewport, surface: SurfaceSize) -> [f32; 4] {
        let region = region.clamp_to(surface);
        if region.is_empty() || surface.width == 0 || surface.height == 0 {
            return self.normalized();
        }
        let [x, y, width, height] = self.normalized();
        let (surface_width, surface_height) = (surface.width as f32, surface.height as f32);
        let scale_x = region.width as f32 / surface_width;
        let scale_y = region.height as f32 / surface_height;
        [
            region.x as f32 / surface_width + x * scale_x,
            region.y as f32 / surface_height + y * scale_y,
            width * scale_x,
            height * scale_y,
        ]
    }

    /// Crop rectangle in pixels for a frame of the given size, at least 1x1.
    pub fn pixel_rect(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let span = |extent: u32, start: f32, end: f32| {
            let first = ((extent as f32 * start).round() as u32).min(extent.saturating_sub(1));
            let last = ((extent as f32 * end).round() as u32).clamp(first + 1, extent.max(1));
            (first, last - first)
        };
        let (x, w) = span(width, self.horizontal, 1.0 - self.horizontal);
        let (y, h) = span(height, self.top, 1.0 - self.bottom);
        (x, y, w, h)
    }
}

/// Where the crop-and-downsample work happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadbackStrategy {
    /// Reduce on the GPU and read back only the sample grid.
    #[default]
    GpuDownsample,
    /// Read back the whole frame and reduce on the CPU.
    FullFrame,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    pub grid: u32,
    pub crop: CropSettings,
    pub readback: ReadbackStrategy,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            grid: 10,
            crop: CropSettings::default(),
            readback: ReadbackStrategy::default(),
        }
    }
}

impl SamplerSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.grid == 0 || self.grid > 64 {
            return Err(format!("sample grid must be within 1..=64 (got {})", self.grid));
        }
        self.crop.validate()
    }
}

/// What a backend is asked to capture from the presented frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRequest {
    pub grid: u32,
    pub crop: CropSettings,
    pub strategy: ReadbackStrategy,
    /// Part of the surface the crop applies to: the whole surface for flat
    /// frames, the first eye's viewport in stereo.
    pub region: Viewport,
}

/// Data handed back by a backend capture.
#[derive(Debug, Clone, PartialEq)]
pub enum Readback {
    /// Already reduced to the sample grid.
    Sample(LuminanceSample),
    /// The requested region of the frame, tightly packed RGBA8.
    Pixels {
        width: u32,
        height: u32,
        rgba: Vec<u8>,
    },
}

/// Turns readbacks into fixed-size luminance samples.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    settings: SamplerSettings,
}

impl FrameSampler {
    pub fn new(settings: SamplerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    pub fn request(&self, region: Viewport) -> SampleRequest {
        SampleRequest {
            grid: self.settings.grid,
            crop: self.settings.crop,
            strategy: self.settings.readback,
            region,
        }
    }

    pub fn extract(&self, readback: Readback) -> RenderResult<LuminanceSample> {
        match readback {
            Readback::Sample(sample) => {
                if sample.grid() != self.settings.grid {
                    return Err(RenderError::SampleReadbackFailure(format!(
                        "backend returned a {0}x{0} sample, expected {1}x{1}",
                        sample.grid(),
                        self.settings.grid
                    )));
                }
                Ok(sample)
            }
            Readback::Pixels {
                width,
                height,
                rgba,
            } => self.sample_rgba(width, height, rgba),
        }
    }

    /// Crops the frame centre and resamples it onto the grid with a triangle
    /// filter so every cell averages its whole area.
    pub fn sample_rgba(&self, width: u32, height: u32, rgba: Vec<u8>) -> RenderResult<LuminanceSample> {
        if width == 0 || height == 0 {
            return Err(RenderError::SampleReadbackFailure(
                "cannot sample an empty frame".into(),
            ));
        }
        let frame: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_raw(width, height, rgba)
            .ok_or_else(|| {
                RenderError::SampleReadbackFailure(format!(
                    "pixel buffer too small for a {width}x{height} frame"
                ))
            })?;

        let (x, y, crop_width, crop_height) = self.settings.crop.pixel_rect(width, height);
        let centre = imageops::crop_imm(&frame, x, y, crop_width, crop_height).to_image();
        let grid = self.settings.grid;
        let reduced = imageops::resize(&centre, grid, grid, FilterType::Triangle);
        LuminanceSample::from_rgba(grid, reduced.as_raw())
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(SamplerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        (0..width * height)
            .flat_map(|_| [rgb[0], rgb[1], rgb[2], 255])
            .collect()
    }

    #[test]
    fn luma_weights_match_rec709() {
        let white = LuminanceSample::uniform(10, [255, 255, 255]).unwrap();
        assert!((white.average_luma() - 1.0).abs() < 1e-5);
        let green = LuminanceSample::uniform(10, [0, 255, 0]).unwrap();
        assert!((green.average_luma() - 0.7152).abs() < 1e-5);
    }

    #[test]
    fn small_source_still_yields_full_grid() {
        let sampler = FrameSampler::default();
        let sample = sampler
            .sample_rgba(5, 5, solid(5, 5, [128, 128, 128]))
            .expect("sample");
        assert_eq!(sample.grid(), 10);
        assert_eq!(sample.pixels().len(), 100);
        assert!(sample.pixels().iter().all(|px| *px == [128, 128, 128]));
    }

    #[test]
    fn border_is_excluded_from_sample() {
        // Bright frame with a dark centre: the sample must only see the centre.
        let (width, height) = (100u32, 100u32);
        let mut rgba = solid(width, height, [255, 255, 255]);
        for y in 30..70 {
            for x in 30..70 {
                let offset = ((y * width + x) * 4) as usize;
                rgba[offset..offset + 3].copy_from_slice(&[0, 0, 0]);
            }
        }
        let sample = FrameSampler::default()
            .sample_rgba(width, height, rgba)
            .expect("sample");
        assert!(sample.average_luma() < 0.05, "got {}", sample.average_luma());
    }

    #[test]
    fn pixel_rect_respects_borders() {
        let crop = CropSettings::default();
        assert_eq!(crop.pixel_rect(100, 50), (30, 15, 40, 20));
        assert_eq!(crop.pixel_rect(1, 1), (0, 0, 1, 1));
    }

    #[test]
    fn crop_within_an_eye_stays_inside_that_eye() {
        let crop = CropSettings::default();
        let surface = SurfaceSize::new(800, 600);
        assert_eq!(crop.normalized_within(Viewport::full(surface), surface), crop.normalized());

        let [x, y, width, height] = crop.normalized_within(Viewport::new(0, 0, 400, 600), surface);
        assert!((x - 0.15).abs() < 1e-6);
        assert!((y - 0.3).abs() < 1e-6);
        assert!((width - 0.2).abs() < 1e-6);
        assert!((height - 0.4).abs() < 1e-6);
        assert!(x + width <= 0.5);
    }

    #[test]
    fn mismatched_grid_is_a_readback_failure() {
        let sampler = FrameSampler::default();
        let result = sampler.extract(Readback::Sample(LuminanceSample::uniform(4, [0; 3]).unwrap()));
        assert!(matches!(result, Err(RenderError::SampleReadbackFailure(_))));
    }

    #[test]
    fn oversized_or_empty_grids_are_rejected() {
        assert!(matches!(
            LuminanceSample::uniform(70_000, [0; 3]),
            Err(RenderError::SampleReadbackFailure(_))
        ));
        assert!(matches!(
            LuminanceSample::new(u32::MAX, Vec::new()),
            Err(RenderError::SampleReadbackFailure(_))
        ));
        assert!(LuminanceSample::new(0, Vec::new()).is_err());
    }

    #[test]
    fn truncated_pixels_are_rejected() {
        let sampler = FrameSampler::default();
        let result = sampler.extract(Readback::Pixels {
            width: 8,
            height: 8,
            rgba: vec![0; 16],
        });
        assert!(matches!(result, Err(RenderError::SampleReadbackFailure(_))));
    }

    #[test]
    fn crop_validation() {
        assert!(CropSettings::default().validate().is_ok());
        let crop = CropSettings {
            horizontal: 0.6,
            ..CropSettings::default()
        };
        assert!(crop.validate().is_err());
    }
}
