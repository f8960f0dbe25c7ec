use glam::{Mat4, Quat, Vec3};

use crate::stereo::EyePose;

/// Projection model of a camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in radians.
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    /// Projection supplied verbatim, e.g. by a presentation device per eye.
    Matrix(Mat4),
}

impl Projection {
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect.max(f32::EPSILON), near, far),
            Projection::Matrix(matrix) => matrix,
        }
    }
}

/// Logical camera shared between the scene provider and the locomotion controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub orientation: Quat,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.0, 3.0),
            orientation: Quat::IDENTITY,
            projection: Projection::Perspective {
                fov_y: 50f32.to_radians(),
                aspect: 16.0 / 9.0,
                near: 0.1,
                far: 1000.0,
            },
        }
    }
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position).inverse()
    }

    pub fn projection(&self) -> Mat4 {
        self.projection.matrix()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Direction the camera looks along (-Z in camera space).
    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.orientation * Vec3::X
    }

    /// Copy with the perspective aspect replaced; explicit matrices are kept.
    pub fn with_aspect(&self, aspect: f32) -> Self {
        let mut camera = *self;
        if let Projection::Perspective { aspect: current, .. } = &mut camera.projection {
            *current = aspect;
        }
        camera
    }

    /// Scratch camera for one eye: the pose is applied relative to the logical
    /// camera and the eye's projection replaces the logical one.
    pub fn for_eye(&self, pose: &EyePose, projection: Mat4) -> Self {
        Self {
            position: self.position + self.orientation * pose.offset,
            orientation: (self.orientation * pose.orientation).normalize(),
            projection: Projection::Matrix(projection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn view_moves_world_into_camera_space() {
        let camera = Camera::default();
        let eye_space = camera.view().transform_point3(camera.position);
        assert!(approx(eye_space, Vec3::ZERO));
        let ahead = camera.position + camera.forward() * 2.0;
        assert!(approx(camera.view().transform_point3(ahead), Vec3::new(0.0, 0.0, -2.0)));
    }

    #[test]
    fn eye_offset_follows_camera_orientation() {
        let camera = Camera {
            orientation: Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            ..Camera::default()
        };
        let pose = EyePose {
            offset: Vec3::new(0.032, 0.0, 0.0),
            orientation: Quat::IDENTITY,
        };
        let eye = camera.for_eye(&pose, Mat4::IDENTITY);
        // Turned left by 90 degrees, camera-space +X points along world -Z.
        assert!(approx(eye.position, camera.position + Vec3::new(0.0, 0.0, -0.032)));
        assert_eq!(eye.projection(), Mat4::IDENTITY);
    }

    #[test]
    fn with_aspect_only_touches_perspective() {
        let camera = Camera::default().with_aspect(2.0);
        match camera.projection {
            Projection::Perspective { aspect, .. } => assert_eq!(aspect, 2.0),
            Projection::Matrix(_) => panic!("expected perspective"),
        }
        let fixed = Camera {
            projection: Projection::Matrix(Mat4::IDENTITY),
            ..Camera::default()
        };
        assert_eq!(fixed.with_aspect(4.0).projection, Projection::Matrix(Mat4::IDENTITY));
    }
}
