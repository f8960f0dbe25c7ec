use crossbeam_channel::Receiver;

use crate::backend::RenderBackend;
use crate::error::{RenderError, RenderResult};
use crate::exposure::{ExposureController, ExposureState};
use crate::pipeline::{PassRun, PipelineSet};
use crate::sampler::FrameSampler;
use crate::scene::SceneProvider;
use crate::stereo::{PresentationDevice, PresenterState, SessionEvent, SessionEventSink, StereoPresenter};
use crate::types::{RenderSurface, RendererConfig, SurfaceDescriptor, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SceneNotReady,
    SurfaceLost,
    InvalidTargets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { eyes: usize },
    Skipped(SkipReason),
}

/// Frame counters plus an FPS estimate refreshed once per second of frame time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub fps: f32,
    window_frames: u32,
    window_elapsed: f32,
}

impl FrameStats {
    fn record_presented(&mut self, delta: f32, eyes: usize, exposure: f32) {
        self.presented += 1;
        self.window_frames += 1;
        if delta.is_finite() && delta > 0.0 {
            self.window_elapsed += delta;
        }
        if self.window_elapsed >= 1.0 {
            self.fps = self.window_frames as f32 / self.window_elapsed;
            self.window_frames = 0;
            self.window_elapsed = 0.0;
            tracing::debug!(
                fps = self.fps.round(),
                presented = self.presented,
                skipped = self.skipped,
                eyes,
                exposure,
                "render stats"
            );
        }
    }
}

/// Top-level per-frame driver: pipelines, stereo presentation and the
/// exposure feedback loop over a backend, scene provider and device.
pub struct RenderOrchestrator<B: RenderBackend, P, D> {
    backend: B,
    provider: P,
    device: D,
    surface: RenderSurface,
    pipelines: PipelineSet<B::Target>,
    presenter: StereoPresenter,
    sampler: FrameSampler,
    exposure: ExposureController,
    events: Receiver<SessionEvent>,
    stats: FrameStats,
    /// Frame time presented since the controller last consumed a sample.
    unsampled: f32,
}

impl<B, P, D> RenderOrchestrator<B, P, D>
where
    B: RenderBackend,
    P: SceneProvider,
    D: PresentationDevice,
{
    /// Configures the surface, builds both pipelines and subscribes to device
    /// session events.
    pub fn initialize(
        mut backend: B,
        descriptor: SurfaceDescriptor,
        provider: P,
        mut device: D,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        config
            .exposure
            .validate()
            .map_err(RenderError::InvalidConfig)?;
        config.sampler.validate().map_err(RenderError::InvalidConfig)?;

        let surface = RenderSurface::new(descriptor, config.pixel_ratio_cap);
        backend
            .configure_surface(surface.size())
            .map_err(|err| match err {
                RenderError::SurfaceUnavailable(_) | RenderError::OutOfMemory => err,
                other => RenderError::SurfaceUnavailable(other.to_string()),
            })?;

        let mut pipelines = PipelineSet::new(config)?;
        pipelines.resize(&mut backend, surface.size())?;

        let (sink, events) = SessionEventSink::channel();
        device.subscribe(sink);
        let presenter = StereoPresenter::new(device.is_connected());

        tracing::info!(
            width = surface.size().width,
            height = surface.size().height,
            pixel_ratio = surface.effective_pixel_ratio(),
            flat = %config.pipelines.flat,
            stereo = %config.pipelines.stereo,
            keep_warm = config.pipelines.keep_warm,
            "render orchestrator initialised"
        );

        Ok(Self {
            backend,
            provider,
            device,
            surface,
            pipelines,
            presenter,
            sampler: FrameSampler::new(config.sampler),
            exposure: ExposureController::new(config.exposure),
            events,
            stats: FrameStats::default(),
            unsampled: 0.0,
        })
    }

    /// Renders one frame and feeds its luminance back into the exposure.
    pub fn update(&mut self, delta: f32) -> RenderResult<FrameOutcome> {
        if !self.provider.is_ready() {
            tracing::trace!("scene not ready; skipping frame");
            return Ok(self.skip(SkipReason::SceneNotReady));
        }
        self.drain_session_events();

        if let Some(reason) = self.ensure_targets()? {
            return Ok(self.skip(reason));
        }

        match self.backend.begin_frame() {
            Ok(()) => {}
            Err(RenderError::SurfaceLost) => return self.recover_surface(),
            Err(err) => return Err(err),
        }

        // Passes use the exposure settled by the previous frame's sample.
        let exposure = self.exposure.exposure();
        let (eyes, sample_region) = match self.render(delta, exposure) {
            Ok(rendered) => rendered,
            Err(err) => {
                self.backend.abandon_frame();
                return match err {
                    RenderError::SurfaceLost => self.recover_surface(),
                    RenderError::InvalidTargetSize { .. } => {
                        tracing::warn!(error = %err, "render targets invalid mid-frame; skipping frame");
                        Ok(self.skip(SkipReason::InvalidTargets))
                    }
                    other => Err(other),
                };
            }
        };

        self.sample_exposure(delta, sample_region)?;

        match self.backend.finish_frame() {
            Ok(()) => {}
            Err(RenderError::SurfaceLost) => return self.recover_surface(),
            Err(err) => return Err(err),
        }

        self.stats.record_presented(delta, eyes, exposure);
        Ok(FrameOutcome::Presented { eyes })
    }

    /// Applies a new logical size; unchanged or zero sizes are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            tracing::debug!(width, height, "ignoring zero-sized resize");
            return Ok(());
        }
        let mut resized = self.surface.clone();
        if !resized.resize(width, height) {
            self.surface = resized;
            return Ok(());
        }
        self.apply_surface(resized)
    }

    /// Applies a new device-pixel ratio through the resize path.
    pub fn set_pixel_ratio(&mut self, ratio: f32) -> RenderResult<()> {
        let mut resized = self.surface.clone();
        if !resized.set_pixel_ratio(ratio) {
            self.surface = resized;
            return Ok(());
        }
        self.apply_surface(resized)
    }

    pub fn on_session_start(&mut self) -> RenderResult<()> {
        self.presenter.start(&mut self.surface)
    }

    pub fn on_session_end(&mut self) -> RenderResult<()> {
        self.presenter.end(&mut self.surface)
    }

    /// Requests a device session when idle, ends it when presenting.
    pub fn toggle_session(&mut self) -> RenderResult<()> {
        let result = if self.device.is_presenting() {
            self.device.end_session()
        } else {
            self.device.request_session()
        };
        if let Err(err) = &result {
            tracing::warn!(error = %err, "presentation session toggle failed");
        }
        result
    }

    pub fn exposure(&self) -> f32 {
        self.exposure.exposure()
    }

    pub fn exposure_state(&self) -> ExposureState {
        self.exposure.state()
    }

    pub fn presenter_state(&self) -> PresenterState {
        self.presenter.state()
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    pub fn pipelines(&self) -> &PipelineSet<B::Target> {
        &self.pipelines
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn skip(&mut self, reason: SkipReason) -> FrameOutcome {
        self.stats.skipped += 1;
        FrameOutcome::Skipped(reason)
    }

    fn drain_session_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            tracing::debug!(?event, "session event");
            if let Err(err) = self.presenter.handle_event(event, &mut self.surface) {
                tracing::warn!(?event, error = %err, "session event rejected");
                if self.device.is_presenting() {
                    if let Err(err) = self.device.end_session() {
                        tracing::warn!(error = %err, "failed to end device session");
                    }
                }
            }
        }
    }

    /// Commits `resized` once the backend accepts its size; a rejected size
    /// leaves the previous surface in place.
    fn apply_surface(&mut self, resized: RenderSurface) -> RenderResult<()> {
        let size = resized.size();
        if let Err(err) = self.backend.configure_surface(size) {
            tracing::warn!(
                error = %err,
                requested = %size,
                current = %self.surface.size(),
                "surface rejected new size; keeping the current one"
            );
            return Err(err);
        }
        self.surface = resized;
        self.pipelines.resize(&mut self.backend, size)?;
        tracing::info!(width = size.width, height = size.height, "render surface resized");
        Ok(())
    }

    /// Brings the backend surface and pipeline targets in line with the
    /// render surface, recreating stale targets once.
    fn ensure_targets(&mut self) -> RenderResult<Option<SkipReason>> {
        let size = self.surface.size();
        if self.backend.surface_size() != size {
            tracing::debug!(
                backend = %self.backend.surface_size(),
                surface = %size,
                "backend surface out of date; reconfiguring"
            );
            match self.backend.configure_surface(size) {
                Ok(()) => {}
                Err(RenderError::OutOfMemory) => return Err(RenderError::OutOfMemory),
                Err(err) => {
                    tracing::warn!(error = %err, surface = %size, "surface reconfiguration failed; skipping frame");
                    return Ok(Some(SkipReason::SurfaceLost));
                }
            }
        }
        let Err(err) = self.pipelines.validate(size) else {
            return Ok(None);
        };
        tracing::warn!(error = %err, "render targets out of date; recreating");
        self.pipelines.recreate(&mut self.backend, size)?;
        match self.pipelines.validate(size) {
            Ok(()) => Ok(None),
            Err(err) => {
                tracing::warn!(error = %err, "render targets still invalid; skipping frame");
                Ok(Some(SkipReason::InvalidTargets))
            }
        }
    }

    fn recover_surface(&mut self) -> RenderResult<FrameOutcome> {
        tracing::warn!("render surface lost; reconfiguring");
        self.backend.configure_surface(self.surface.size())?;
        Ok(self.skip(SkipReason::SurfaceLost))
    }

    /// Returns the eye count and the region the luminance sample covers.
    fn render(&mut self, delta: f32, exposure: f32) -> RenderResult<(usize, Viewport)> {
        if self.presenter.is_presenting() {
            match self.render_stereo(delta, exposure) {
                Ok(rendered) => return Ok(rendered),
                Err(RenderError::SessionTransition(reason)) => {
                    tracing::warn!(%reason, "stereo frame abandoned; rendering flat");
                    if let Err(err) = self.device.end_session() {
                        tracing::warn!(error = %err, "failed to end device session");
                    }
                }
                Err(err) => return Err(err),
            }
        }
        self.render_flat(delta, exposure)?;
        Ok((1, self.surface.viewport()))
    }

    fn render_flat(&mut self, delta: f32, exposure: f32) -> RenderResult<()> {
        let Self {
            backend,
            provider,
            surface,
            pipelines,
            ..
        } = self;
        let viewport = surface.viewport();
        let camera = provider.camera().with_aspect(viewport.aspect());
        let run = PassRun {
            scene: provider.scene(),
            camera: &camera,
            viewport,
            surface_size: surface.size(),
            clear: Some(surface.clear_color()),
            exposure,
            delta,
        };
        let pipeline = pipelines.presenting(false);
        pipeline.run(backend, &run)?;
        pipelines.warm_others(backend, pipeline.mode(), &run)
    }

    fn render_stereo(&mut self, delta: f32, exposure: f32) -> RenderResult<(usize, Viewport)> {
        let Self {
            backend,
            provider,
            device,
            surface,
            pipelines,
            presenter,
            ..
        } = self;
        let pipeline = pipelines.presenting(true);
        let scene = provider.scene();
        let size = surface.size();
        let clear = surface.clear_color();
        let mut sample_region = Viewport::full(size);

        let eyes = presenter.render_frame(device, surface, provider.camera(), |frame| {
            if frame.first {
                // Sample the centre of one eye rather than the seam between them.
                sample_region = frame.viewport;
            }
            let run = PassRun {
                scene,
                camera: &frame.camera,
                viewport: frame.viewport,
                surface_size: size,
                clear: frame.first.then_some(clear),
                exposure,
                // Later eyes must not advance time-dependent passes again.
                delta: if frame.first { delta } else { 0.0 },
            };
            pipeline.run(backend, &run)
        })?;

        let camera = provider.camera().with_aspect(size.aspect());
        let warm_run = PassRun {
            scene,
            camera: &camera,
            viewport: surface.viewport(),
            surface_size: size,
            clear: Some(clear),
            exposure,
            delta,
        };
        pipelines.warm_others(backend, pipeline.mode(), &warm_run)?;
        Ok((eyes, sample_region))
    }

    /// Feeds the latest completed readback to the controller. Frames whose
    /// capture is still in flight count towards the next consumed sample.
    fn sample_exposure(&mut self, delta: f32, region: Viewport) -> RenderResult<()> {
        if delta.is_finite() && delta > 0.0 {
            self.unsampled += delta;
        }
        let request = self.sampler.request(region);
        let readback = match self.backend.capture(&request) {
            Ok(Some(readback)) => readback,
            Ok(None) => return Ok(()),
            Err(err) if err.is_recoverable() => {
                tracing::warn!(error = %err, exposure = self.exposure.exposure(), "luminance readback failed; keeping exposure");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        match self.sampler.extract(readback) {
            Ok(sample) => {
                self.exposure.update(&sample, std::mem::take(&mut self.unsampled));
            }
            Err(err) => {
                tracing::warn!(error = %err, exposure = self.exposure.exposure(), "luminance sample rejected; keeping exposure");
            }
        }
        Ok(())
    }
}
