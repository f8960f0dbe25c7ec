use crate::camera::Camera;
use crate::error::{RenderError, RenderResult};
use crate::stereo::{Eye, EyeView, PresentationDevice, SessionEvent};
use crate::types::{RenderSurface, Viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterState {
    Inactive,
    Presenting {
        /// Stereo frames rendered during the current session.
        frames: u64,
    },
}

/// Everything a pipeline run needs for one eye.
#[derive(Debug, Clone, Copy)]
pub struct EyeFrame {
    pub eye: Eye,
    pub camera: Camera,
    pub viewport: Viewport,
    /// Set for the first eye of the frame only; it clears and advances time.
    pub first: bool,
}

/// Session state machine and per-eye render loop.
#[derive(Debug)]
pub struct StereoPresenter {
    state: PresenterState,
    device_connected: bool,
}

impl StereoPresenter {
    pub fn new(device_connected: bool) -> Self {
        Self {
            state: PresenterState::Inactive,
            device_connected,
        }
    }

    pub fn state(&self) -> PresenterState {
        self.state
    }

    pub fn is_presenting(&self) -> bool {
        matches!(self.state, PresenterState::Presenting { .. })
    }

    pub fn device_connected(&self) -> bool {
        self.device_connected
    }

    /// Applies a device notification.
    pub fn handle_event(
        &mut self,
        event: SessionEvent,
        surface: &mut RenderSurface,
    ) -> RenderResult<()> {
        match event {
            SessionEvent::DeviceConnected => {
                tracing::info!("presentation device connected");
                self.device_connected = true;
                Ok(())
            }
            SessionEvent::DeviceDisconnected => {
                tracing::info!("presentation device disconnected");
                self.device_connected = false;
                if self.is_presenting() {
                    self.end(surface)
                } else {
                    Ok(())
                }
            }
            SessionEvent::SessionStarted => self.start(surface),
            SessionEvent::SessionEnded => self.end(surface),
        }
    }

    /// Inactive -> Presenting.
    pub fn start(&mut self, surface: &mut RenderSurface) -> RenderResult<()> {
        surface.reset_viewport();
        if self.is_presenting() {
            return Err(self.fall_back(surface, "session already presenting"));
        }
        if !self.device_connected {
            return Err(self.fall_back(surface, "no presentation device connected"));
        }
        tracing::info!("stereo session started");
        self.state = PresenterState::Presenting { frames: 0 };
        Ok(())
    }

    /// Presenting -> Inactive. Ending an inactive presenter is a no-op.
    pub fn end(&mut self, surface: &mut RenderSurface) -> RenderResult<()> {
        surface.reset_viewport();
        match self.state {
            PresenterState::Presenting { frames } => {
                tracing::info!(frames, "stereo session ended");
                self.state = PresenterState::Inactive;
            }
            PresenterState::Inactive => {
                tracing::debug!("session end ignored; presenter inactive");
            }
        }
        Ok(())
    }

    /// Drops back to Inactive with the full viewport after a failed transition.
    pub fn fall_back(&mut self, surface: &mut RenderSurface, reason: &str) -> RenderError {
        tracing::warn!(reason, "stereo presenter falling back to flat rendering");
        self.state = PresenterState::Inactive;
        surface.reset_viewport();
        RenderError::SessionTransition(reason.to_string())
    }

    /// Renders one stereo frame through `render_eye`, left eye first.
    ///
    /// The eye set is queried from the device once. The surface viewport is
    /// restored to the full surface before returning, on success or error.
    /// Returns the number of eyes rendered.
    pub fn render_frame<D, F>(
        &mut self,
        device: &mut D,
        surface: &mut RenderSurface,
        camera: &Camera,
        mut render_eye: F,
    ) -> RenderResult<usize>
    where
        D: PresentationDevice + ?Sized,
        F: FnMut(&EyeFrame) -> RenderResult<()>,
    {
        let PresenterState::Presenting { frames } = self.state else {
            return Err(RenderError::SessionTransition(
                "stereo frame requested while inactive".into(),
            ));
        };

        let mut eyes: Vec<EyeView> = device.eyes(surface.size());
        if eyes.is_empty() {
            return Err(self.fall_back(surface, "device reported no eyes"));
        }
        eyes.sort_by_key(|view| view.eye.order());

        let mut rendered = 0;
        let mut result = Ok(());
        for view in &eyes {
            let viewport = view.viewport.clamp_to(surface.size());
            if viewport.is_empty() {
                tracing::warn!(eye = ?view.eye, ?viewport, "skipping eye with empty viewport");
                continue;
            }
            surface.set_viewport(viewport);
            let frame = EyeFrame {
                eye: view.eye,
                camera: camera.for_eye(&view.pose, view.projection),
                viewport,
                first: rendered == 0,
            };
            if let Err(err) = render_eye(&frame) {
                result = Err(err);
                break;
            }
            rendered += 1;
        }
        surface.reset_viewport();

        result?;
        self.state = PresenterState::Presenting {
            frames: frames.saturating_add(1),
        };
        Ok(rendered)
    }
}
