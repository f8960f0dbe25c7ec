use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use tracing::{debug, error, info, trace, warn};

use crate::camera::Camera;
use crate::gpu::WgpuBackend;
use crate::orchestrator::{FrameOutcome, RenderOrchestrator};
use crate::runtime::BoxedTimeSource;
use crate::scene::SceneProvider;
use crate::stereo::PresentationDevice;
use crate::types::{RenderSurface, RendererConfig, SurfaceDescriptor};

/// Seconds between window title refreshes.
const TITLE_REFRESH: f32 = 1.0;

/// Moves the camera in response to window input. Runs before every frame.
pub trait Locomotion {
    /// Returns true when the event was consumed.
    fn handle_window_event(&mut self, event: &WindowEvent) -> bool;

    fn advance(&mut self, camera: &mut Camera, delta: f32);
}

/// Locomotion that never moves the camera.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stationary;

impl Locomotion for Stationary {
    fn handle_window_event(&mut self, _event: &WindowEvent) -> bool {
        false
    }

    fn advance(&mut self, _camera: &mut Camera, _delta: f32) {}
}

/// Everything the event loop drives. The orchestrator owns the surface, so it
/// is declared before the window it renders into and dropped first.
struct ViewerState<P, D, L> {
    orchestrator: RenderOrchestrator<WgpuBackend, P, D>,
    window: Arc<Window>,
    locomotion: L,
    time_source: BoxedTimeSource,
    title: String,
    since_title: f32,
}

impl<P, D, L> ViewerState<P, D, L>
where
    P: SceneProvider,
    D: PresentationDevice,
    L: Locomotion,
{
    fn resize(&mut self, size: PhysicalSize<u32>) {
        let logical = size.to_logical::<f64>(self.window.scale_factor());
        let (width, height) = (logical.width.round() as u32, logical.height.round() as u32);
        if let Err(err) = self.orchestrator.resize(width, height) {
            error!(error = %err, width, height, "failed to resize render surface");
        }
    }

    fn toggle_session(&mut self) {
        // Failures are already logged by the orchestrator.
        let _ = self.orchestrator.toggle_session();
    }

    /// Renders one frame. Returns an error only when rendering cannot go on.
    fn redraw(&mut self) -> Result<()> {
        let sample = self.time_source.sample();
        self.locomotion
            .advance(self.orchestrator.provider_mut().camera_mut(), sample.delta);

        match self.orchestrator.update(sample.delta) {
            Ok(FrameOutcome::Presented { .. }) => self.refresh_title(sample.delta),
            Ok(FrameOutcome::Skipped(reason)) => {
                trace!(?reason, frame = sample.frame_index, "frame skipped");
            }
            Err(err) if err.is_recoverable() => {
                warn!(error = %err, "frame failed; retrying next frame");
            }
            Err(err) => return Err(anyhow!(err).context("rendering failed")),
        }
        Ok(())
    }

    fn refresh_title(&mut self, delta: f32) {
        self.since_title += delta;
        if self.since_title < TITLE_REFRESH {
            return;
        }
        self.since_title = 0.0;
        let stats = self.orchestrator.frame_stats();
        self.window.set_title(&format!(
            "{} | exposure {:.2} | {:.0} fps",
            self.title,
            self.orchestrator.exposure(),
            stats.fps
        ));
    }
}

/// Opens the viewer window and drives the `winit` event loop until the
/// window closes or rendering fails.
pub(crate) fn run_window<P, D, L>(
    config: &RendererConfig,
    provider: P,
    device: D,
    locomotion: L,
    mut time_source: BoxedTimeSource,
) -> Result<()>
where
    P: SceneProvider,
    D: PresentationDevice,
    L: Locomotion,
{
    let event_loop = EventLoop::new().context("failed to initialize event loop")?;
    let requested = PhysicalSize::new(config.surface_size.0, config.surface_size.1);
    let window = WindowBuilder::new()
        .with_title(config.title.as_str())
        .with_inner_size(requested)
        .build(&event_loop)
        .context("failed to create viewer window")?;
    let window = Arc::new(window);

    let scale_factor = window.scale_factor();
    let logical = window.inner_size().to_logical::<f64>(scale_factor);
    let mut descriptor = SurfaceDescriptor::new(
        logical.width.round() as u32,
        logical.height.round() as u32,
    );
    descriptor.pixel_ratio = scale_factor as f32;
    descriptor.clear_color = config.clear_color;

    let initial = RenderSurface::new(descriptor, config.pixel_ratio_cap).size();
    let backend = WgpuBackend::new(window.as_ref(), initial, config)?;
    let orchestrator = RenderOrchestrator::initialize(backend, descriptor, provider, device, config)
        .context("failed to initialise render orchestrator")?;
    info!(
        width = initial.width,
        height = initial.height,
        scale_factor,
        "viewer window ready"
    );

    time_source.reset();
    let mut state = ViewerState {
        orchestrator,
        window,
        locomotion,
        time_source,
        title: config.title.clone(),
        since_title: 0.0,
    };
    state.window.request_redraw();

    let mut fatal = None;
    event_loop
        .run(|event, elwt| {
            elwt.set_control_flow(ControlFlow::Wait);

            match event {
                Event::WindowEvent { window_id, event } if window_id == state.window.id() => {
                    if state.locomotion.handle_window_event(&event) {
                        return;
                    }
                    match event {
                        WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                            elwt.exit();
                        }
                        WindowEvent::KeyboardInput { event, .. }
                            if event.state == ElementState::Pressed && !event.repeat =>
                        {
                            match event.logical_key {
                                Key::Named(NamedKey::Escape) => elwt.exit(),
                                Key::Character(ref value) if value.eq_ignore_ascii_case("v") => {
                                    state.toggle_session();
                                }
                                _ => {}
                            }
                        }
                        WindowEvent::Resized(new_size) => {
                            state.resize(new_size);
                        }
                        WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                            debug!(scale_factor, "scale factor changed");
                            if let Err(err) = state.orchestrator.set_pixel_ratio(scale_factor as f32) {
                                error!(error = %err, "failed to apply pixel ratio");
                            }
                        }
                        WindowEvent::RedrawRequested => {
                            if let Err(err) = state.redraw() {
                                error!("{err:#}");
                                fatal = Some(err);
                                elwt.exit();
                            }
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => {
                    state.window.request_redraw();
                }
                _ => {}
            }
        })
        .map_err(|err| anyhow!("window event loop error: {err}"))?;

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
