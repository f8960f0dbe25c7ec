use std::f32::consts::{FRAC_PI_2, TAU};

use glam::{EulerRot, Quat, Vec3};
use renderer::{Camera, Locomotion};
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Walking speed in metres per second.
pub const MOVEMENT_SPEED: f32 = 3.0;
/// Turns per second while a look key is held.
pub const LOOK_SPEED: f32 = 0.1;
const PITCH_LIMIT: f32 = FRAC_PI_2 - 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
    TurnLeft,
    TurnRight,
    LookUp,
    LookDown,
}

impl Action {
    fn from_key(code: KeyCode) -> Option<Self> {
        let action = match code {
            KeyCode::KeyW | KeyCode::ArrowUp => Action::Forward,
            KeyCode::KeyS | KeyCode::ArrowDown => Action::Backward,
            KeyCode::KeyA => Action::Left,
            KeyCode::KeyD => Action::Right,
            KeyCode::KeyR => Action::Up,
            KeyCode::KeyF => Action::Down,
            KeyCode::ArrowLeft | KeyCode::KeyQ => Action::TurnLeft,
            KeyCode::ArrowRight | KeyCode::KeyE => Action::TurnRight,
            KeyCode::PageUp => Action::LookUp,
            KeyCode::PageDown => Action::LookDown,
            _ => return None,
        };
        Some(action)
    }

    fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// First-person keyboard controller: WASD or arrows to walk, Q/E or
/// left/right to turn, R/F to rise and sink, PageUp/PageDown to look.
#[derive(Debug, Clone, Default)]
pub struct KeyboardLocomotion {
    held: u16,
    yaw: f32,
    pitch: f32,
}

impl KeyboardLocomotion {
    /// Returns true when the key drives the camera.
    fn handle_key(&mut self, code: KeyCode, state: ElementState) -> bool {
        let Some(action) = Action::from_key(code) else {
            return false;
        };
        match state {
            ElementState::Pressed => self.held |= action.bit(),
            ElementState::Released => self.held &= !action.bit(),
        }
        true
    }

    fn axis(&self, positive: Action, negative: Action) -> f32 {
        let held = |action: Action| self.held & action.bit() != 0;
        match (held(positive), held(negative)) {
            (true, false) => 1.0,
            (false, true) => -1.0,
            _ => 0.0,
        }
    }
}

impl Locomotion for KeyboardLocomotion {
    fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } => match event.physical_key {
                PhysicalKey::Code(code) => self.handle_key(code, event.state),
                PhysicalKey::Unidentified(_) => false,
            },
            WindowEvent::Focused(false) => {
                self.held = 0;
                false
            }
            _ => false,
        }
    }

    fn advance(&mut self, camera: &mut Camera, delta: f32) {
        if !(delta.is_finite() && delta > 0.0) || self.held == 0 {
            return;
        }

        let turn = LOOK_SPEED * TAU * delta;
        self.yaw += self.axis(Action::TurnLeft, Action::TurnRight) * turn;
        self.pitch = (self.pitch + self.axis(Action::LookUp, Action::LookDown) * turn)
            .clamp(-PITCH_LIMIT, PITCH_LIMIT);
        camera.orientation = Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0);

        // Walk on the ground plane regardless of pitch.
        let heading = Quat::from_rotation_y(self.yaw);
        let forward = heading * Vec3::NEG_Z;
        let right = heading * Vec3::X;
        let step = forward * self.axis(Action::Forward, Action::Backward)
            + right * self.axis(Action::Right, Action::Left)
            + Vec3::Y * self.axis(Action::Up, Action::Down);
        camera.position += step.normalize_or_zero() * MOVEMENT_SPEED * delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(keys: &[KeyCode]) -> KeyboardLocomotion {
        let mut locomotion = KeyboardLocomotion::default();
        for key in keys {
            assert!(locomotion.handle_key(*key, ElementState::Pressed));
        }
        locomotion
    }

    #[test]
    fn forward_walks_at_movement_speed() {
        let mut locomotion = held(&[KeyCode::KeyW]);
        let mut camera = Camera::default();
        let start = camera.position;
        locomotion.advance(&mut camera, 0.5);
        let moved = camera.position - start;
        assert!((moved.z + MOVEMENT_SPEED * 0.5).abs() < 1e-5);
        assert!(moved.x.abs() < 1e-5);
    }

    #[test]
    fn diagonal_movement_is_not_faster() {
        let mut locomotion = held(&[KeyCode::KeyW, KeyCode::KeyD]);
        let mut camera = Camera::default();
        let start = camera.position;
        locomotion.advance(&mut camera, 1.0);
        assert!(((camera.position - start).length() - MOVEMENT_SPEED).abs() < 1e-4);
    }

    #[test]
    fn released_keys_stop_movement() {
        let mut locomotion = held(&[KeyCode::ArrowUp]);
        locomotion.handle_key(KeyCode::ArrowUp, ElementState::Released);
        let mut camera = Camera::default();
        let before = camera;
        locomotion.advance(&mut camera, 1.0);
        assert_eq!(camera, before);
    }

    #[test]
    fn turning_rotates_the_heading() {
        let mut locomotion = held(&[KeyCode::ArrowLeft]);
        let mut camera = Camera::default();
        locomotion.advance(&mut camera, 1.0);
        assert!((locomotion.yaw - LOOK_SPEED * TAU).abs() < 1e-5);
        assert_eq!(camera.position, Camera::default().position);
        assert_ne!(camera.orientation, Quat::IDENTITY);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut locomotion = held(&[KeyCode::PageUp]);
        let mut camera = Camera::default();
        for _ in 0..100 {
            locomotion.advance(&mut camera, 0.25);
        }
        assert!(locomotion.pitch <= PITCH_LIMIT);
    }

    #[test]
    fn unrelated_keys_pass_through() {
        let mut locomotion = KeyboardLocomotion::default();
        assert!(!locomotion.handle_key(KeyCode::KeyV, ElementState::Pressed));
        assert!(!locomotion.handle_key(KeyCode::Escape, ElementState::Pressed));
    }
}
