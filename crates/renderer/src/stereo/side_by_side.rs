use glam::{Mat4, Quat, Vec3};

use crate::error::{RenderError, RenderResult};
use crate::stereo::{Eye, EyePose, EyeView, PresentationDevice, SessionEvent, SessionEventSink};
use crate::types::{SurfaceSize, Viewport};

/// Average adult interpupillary distance in metres.
pub const DEFAULT_IPD: f32 = 0.064;

/// Simulated headset that presents both eyes side by side on the window surface.
#[derive(Debug)]
pub struct SideBySideDevice {
    ipd: f32,
    fov_y: f32,
    connected: bool,
    presenting: bool,
    /// Start a session as soon as a sink subscribes.
    autostart: bool,
    sink: Option<SessionEventSink>,
}

impl SideBySideDevice {
    pub fn new(ipd: f32) -> Self {
        Self {
            ipd,
            fov_y: 50f32.to_radians(),
            connected: true,
            presenting: false,
            autostart: false,
            sink: None,
        }
    }

    /// Requests a session on subscription, so the first frame is already stereo.
    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn ipd(&self) -> f32 {
        self.ipd
    }

    pub fn connect(&mut self) {
        if !self.connected {
            self.connected = true;
            self.emit(SessionEvent::DeviceConnected);
        }
    }

    /// Unplugging ends any running session.
    pub fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.presenting = false;
            self.emit(SessionEvent::DeviceDisconnected);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    fn eye(&self, eye: Eye, viewport: Viewport) -> EyeView {
        let side = match eye {
            Eye::Left => -0.5,
            Eye::Right => 0.5,
        };
        EyeView {
            eye,
            viewport,
            pose: EyePose {
                offset: Vec3::new(side * self.ipd, 0.0, 0.0),
                orientation: Quat::IDENTITY,
            },
            projection: Mat4::perspective_rh(self.fov_y, viewport.aspect(), 0.1, 1000.0),
        }
    }
}

impl Default for SideBySideDevice {
    fn default() -> Self {
        Self::new(DEFAULT_IPD)
    }
}

impl PresentationDevice for SideBySideDevice {
    fn subscribe(&mut self, sink: SessionEventSink) {
        self.sink = Some(sink);
        if self.autostart && !self.presenting {
            if let Err(err) = self.request_session() {
                tracing::warn!(error = %err, "side-by-side autostart failed");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn request_session(&mut self) -> RenderResult<()> {
        if !self.connected {
            return Err(RenderError::SessionTransition(
                "side-by-side device is disconnected".into(),
            ));
        }
        if self.presenting {
            return Err(RenderError::SessionTransition(
                "side-by-side session already running".into(),
            ));
        }
        self.presenting = true;
        self.emit(SessionEvent::SessionStarted);
        Ok(())
    }

    fn end_session(&mut self) -> RenderResult<()> {
        if self.presenting {
            self.presenting = false;
            self.emit(SessionEvent::SessionEnded);
        }
        Ok(())
    }

    fn is_presenting(&self) -> bool {
        self.presenting
    }

    fn eyes(&mut self, surface: SurfaceSize) -> Vec<EyeView> {
        let left_width = surface.width / 2;
        vec![
            self.eye(Eye::Left, Viewport::new(0, 0, left_width, surface.height)),
            self.eye(
                Eye::Right,
                Viewport::new(left_width, 0, surface.width - left_width, surface.height),
            ),
        ]
    }
}
