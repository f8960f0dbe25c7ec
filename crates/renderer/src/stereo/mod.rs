//! Stereo presentation: devices, session events and per-eye iteration.

mod presenter;
mod side_by_side;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use glam::{Mat4, Quat, Vec3};

use crate::error::RenderResult;
use crate::types::{SurfaceSize, Viewport};

pub use presenter::{EyeFrame, PresenterState, StereoPresenter};
pub use side_by_side::{SideBySideDevice, DEFAULT_IPD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    /// Render order: left before right.
    pub fn order(&self) -> u8 {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }
}

/// Eye transform relative to the logical camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyePose {
    /// Offset in camera space, metres.
    pub offset: Vec3,
    pub orientation: Quat,
}

impl Default for EyePose {
    fn default() -> Self {
        Self {
            offset: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

/// One eye as reported by the device for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeView {
    pub eye: Eye,
    pub viewport: Viewport,
    pub pose: EyePose,
    pub projection: Mat4,
}

/// Lifecycle notifications published by a presentation device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    DeviceConnected,
    DeviceDisconnected,
    SessionStarted,
    SessionEnded,
}

/// Registered callback end handed to devices at initialization.
#[derive(Debug, Clone)]
pub struct SessionEventSink {
    sender: Sender<SessionEvent>,
}

impl SessionEventSink {
    /// Creates a sink and the receiving end the orchestrator drains each frame.
    pub fn channel() -> (Self, Receiver<SessionEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: SessionEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!(?event, "session event dropped; orchestrator gone");
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(?event, "session event queue full");
            }
        }
    }
}

/// Head-mounted or simulated display that can host a stereo session.
pub trait PresentationDevice {
    /// Stores the sink the device reports lifecycle changes through.
    fn subscribe(&mut self, sink: SessionEventSink);
    fn is_connected(&self) -> bool;
    /// Asks the device to begin a session; `SessionStarted` follows through the sink.
    fn request_session(&mut self) -> RenderResult<()>;
    /// Asks the device to end its session; `SessionEnded` follows through the sink.
    fn end_session(&mut self) -> RenderResult<()>;
    fn is_presenting(&self) -> bool;
    /// Eye set for the current frame. Called once per frame while presenting.
    fn eyes(&mut self, surface: SurfaceSize) -> Vec<EyeView>;
}

/// Stand-in used when no headset is attached.
#[derive(Debug, Default)]
pub struct NoPresentationDevice;

impl PresentationDevice for NoPresentationDevice {
    fn subscribe(&mut self, _sink: SessionEventSink) {}

    fn is_connected(&self) -> bool {
        false
    }

    fn request_session(&mut self) -> RenderResult<()> {
        Err(crate::error::RenderError::SessionTransition(
            "no presentation device attached".into(),
        ))
    }

    fn end_session(&mut self) -> RenderResult<()> {
        Ok(())
    }

    fn is_presenting(&self) -> bool {
        false
    }

    fn eyes(&mut self, _surface: SurfaceSize) -> Vec<EyeView> {
        Vec::new()
    }
}
