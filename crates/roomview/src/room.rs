//! Procedural room scene built off the render thread.

use std::f32::consts::{PI, TAU};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use renderer::{Camera, Material, Mesh, PointLight, Scene, SceneNode, SceneProvider, Vertex};
use tracing::{debug, error, info};

const SKY_RADIUS: f32 = 500.0;
const SKY_SEGMENTS: (u32, u32) = (60, 40);
/// sRGB grey the sky dome is tinted with.
const SKY_TINT: u8 = 0x88;

/// Room dimensions in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomLayout {
    pub width: f32,
    pub depth: f32,
    pub height: f32,
    pub wall_thickness: f32,
}

impl Default for RoomLayout {
    fn default() -> Self {
        Self {
            width: 8.0,
            depth: 8.0,
            height: 3.0,
            wall_thickness: 0.1,
        }
    }
}

/// Scene provider whose room becomes available once the builder thread is done.
pub struct RoomProvider {
    built: Arc<OnceLock<Scene>>,
    loading: Scene,
    camera: Camera,
}

impl RoomProvider {
    pub fn spawn(layout: RoomLayout) -> Result<Self> {
        let built = Arc::new(OnceLock::new());
        let slot = Arc::clone(&built);
        thread::Builder::new()
            .name("room-builder".into())
            .spawn(move || {
                let started = Instant::now();
                match build_room(&layout) {
                    Ok(scene) => {
                        let nodes = scene.nodes.len();
                        if slot.set(scene).is_ok() {
                            info!(nodes, elapsed = ?started.elapsed(), "room scene ready");
                        }
                    }
                    Err(err) => error!("failed to build room scene: {err:#}"),
                }
            })
            .context("failed to spawn room builder thread")?;
        Ok(Self::pending(built))
    }

    #[cfg(test)]
    fn built(layout: RoomLayout) -> Result<Self> {
        let built = Arc::new(OnceLock::new());
        let _ = built.set(build_room(&layout)?);
        Ok(Self::pending(built))
    }

    fn pending(built: Arc<OnceLock<Scene>>) -> Self {
        Self {
            built,
            loading: Scene::new(),
            camera: Camera::default(),
        }
    }
}

impl SceneProvider for RoomProvider {
    fn scene(&self) -> &Scene {
        self.built.get().unwrap_or(&self.loading)
    }

    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    fn is_ready(&self) -> bool {
        self.built.get().is_some()
    }
}

fn build_room(layout: &RoomLayout) -> Result<Scene> {
    let mut scene = Scene::new();
    scene.ambient = Vec3::splat(0.03);

    let half_w = layout.width / 2.0;
    let half_d = layout.depth / 2.0;
    let half_t = layout.wall_thickness / 2.0;
    let plaster = Material {
        base_color: Vec3::new(0.82, 0.8, 0.76),
        ..Material::default()
    };
    let oak = Material {
        base_color: Vec3::new(0.45, 0.3, 0.18),
        ..Material::default()
    };

    let slab = Arc::new(cuboid(Vec3::new(half_w, half_t, half_d))?);
    scene.add_node(node("floor", &slab, Vec3::new(0.0, -half_t, 0.0), oak));
    scene.add_node(node(
        "ceiling",
        &slab,
        Vec3::new(0.0, layout.height + half_t, 0.0),
        plaster,
    ));

    let long_wall = Arc::new(cuboid(Vec3::new(half_w, layout.height / 2.0, half_t))?);
    let short_wall = Arc::new(cuboid(Vec3::new(half_t, layout.height / 2.0, half_d))?);
    let mid = layout.height / 2.0;
    scene.add_node(node("wall north", &long_wall, Vec3::new(0.0, mid, -half_d - half_t), plaster));
    scene.add_node(node("wall south", &long_wall, Vec3::new(0.0, mid, half_d + half_t), plaster));
    scene.add_node(node("wall west", &short_wall, Vec3::new(-half_w - half_t, mid, 0.0), plaster));
    scene.add_node(node("wall east", &short_wall, Vec3::new(half_w + half_t, mid, 0.0), plaster));

    let table_top = Arc::new(cuboid(Vec3::new(0.8, 0.025, 0.45))?);
    scene.add_node(node("table", &table_top, Vec3::new(0.0, 0.75, -1.0), oak));
    let leg = Arc::new(cuboid(Vec3::new(0.03, 0.36, 0.03))?);
    for (index, (x, z)) in [(-0.72, -0.38), (0.72, -0.38), (-0.72, 0.38), (0.72, 0.38)]
        .into_iter()
        .enumerate()
    {
        scene.add_node(node(
            &format!("table leg {index}"),
            &leg,
            Vec3::new(x, 0.36, -1.0 + z),
            oak,
        ));
    }

    let lamp = Arc::new(cuboid(Vec3::new(0.4, 0.02, 0.4))?);
    scene.add_node(node(
        "lamp",
        &lamp,
        Vec3::new(0.0, layout.height - 0.02, -1.0),
        Material {
            base_color: Vec3::ONE,
            emissive: Vec3::new(6.0, 5.6, 4.8),
        },
    ));
    let mirror = Arc::new(cuboid(Vec3::new(0.6, 0.9, 0.01))?);
    scene.add_node(node(
        "mirror",
        &mirror,
        Vec3::new(1.8, 1.5, -half_d + 0.01),
        Material {
            base_color: Vec3::splat(0.95),
            emissive: Vec3::splat(0.05),
        },
    ));

    let sky = Arc::new(inward_sphere(SKY_RADIUS, SKY_SEGMENTS.0, SKY_SEGMENTS.1)?);
    scene.add_node(node(
        "sky",
        &sky,
        Vec3::ZERO,
        Material {
            base_color: Vec3::ZERO,
            emissive: Vec3::splat(srgb_to_linear(SKY_TINT)),
        },
    ));

    scene.add_light(PointLight {
        position: Vec3::new(0.0, layout.height - 0.2, -1.0),
        color: Vec3::new(1.0, 0.93, 0.82),
        intensity: 9.0,
    });
    scene.add_light(PointLight {
        position: Vec3::new(-half_w + 0.5, 2.2, half_d - 0.5),
        color: Vec3::new(0.75, 0.85, 1.0),
        intensity: 3.0,
    });

    debug!(
        nodes = scene.nodes.len(),
        lights = scene.lights.len(),
        "room geometry generated"
    );
    Ok(scene)
}

fn node(name: &str, mesh: &Arc<Mesh>, position: Vec3, material: Material) -> SceneNode {
    SceneNode {
        name: name.to_string(),
        mesh: Arc::clone(mesh),
        transform: Mat4::from_translation(position),
        material,
    }
}

/// Axis-aligned box centred on the origin, one flat-shaded quad per face.
fn cuboid(half: Vec3) -> Result<Mesh> {
    let faces = [
        (Vec3::X, Vec3::Y),
        (Vec3::NEG_X, Vec3::Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::Z),
        (Vec3::Z, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, up) in faces {
        let side = normal.cross(up);
        let base = vertices.len() as u32;
        for (s, u) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let corner = normal + side * s + up * u;
            vertices.push(Vertex::new(corner * half, normal));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    Mesh::new(vertices, indices).context("cuboid indices out of range")
}

/// Latitude/longitude sphere with normals facing the centre.
fn inward_sphere(radius: f32, segments: u32, rings: u32) -> Result<Mesh> {
    let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
    for ring in 0..=rings {
        let polar = PI * ring as f32 / rings as f32;
        for segment in 0..=segments {
            let azimuth = TAU * segment as f32 / segments as f32;
            let direction = Vec3::new(
                polar.sin() * azimuth.cos(),
                polar.cos(),
                polar.sin() * azimuth.sin(),
            );
            vertices.push(Vertex::new(direction * radius, -direction));
        }
    }

    let stride = segments + 1;
    let mut indices = Vec::with_capacity((segments * rings * 6) as usize);
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            indices.extend_from_slice(&[a, a + 1, b, b, a + 1, b + 1]);
        }
    }
    Mesh::new(vertices, indices).context("sphere indices out of range")
}

fn srgb_to_linear(value: u8) -> f32 {
    let c = value as f32 / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cuboid_spans_its_half_extents() {
        let mesh = cuboid(Vec3::new(1.0, 2.0, 3.0)).expect("mesh");
        assert_eq!(mesh.vertices().len(), 24);
        assert_eq!(mesh.indices().len(), 36);
        let max_z = mesh
            .vertices()
            .iter()
            .map(|vertex| vertex.position[2])
            .fold(f32::MIN, f32::max);
        assert_eq!(max_z, 3.0);
    }

    #[test]
    fn sky_normals_point_inwards() {
        let mesh = inward_sphere(10.0, 8, 4).expect("mesh");
        for vertex in mesh.vertices() {
            let position = Vec3::from(vertex.position);
            let normal = Vec3::from(vertex.normal);
            assert!(position.dot(normal) < 0.0);
        }
    }

    #[test]
    fn sky_tint_matches_mid_grey() {
        assert!((srgb_to_linear(SKY_TINT) - 0.246).abs() < 1e-3);
    }

    #[test]
    fn built_room_is_ready_with_camera_inside() {
        let layout = RoomLayout::default();
        let provider = RoomProvider::built(layout).expect("room");
        assert!(provider.is_ready());
        assert!(provider.scene().nodes.iter().any(|node| node.name == "sky"));
        assert_eq!(provider.scene().lights.len(), 2);
        let position = provider.camera().position;
        assert!(position.x.abs() < layout.width / 2.0);
        assert!(position.z.abs() < layout.depth / 2.0);
    }

    #[test]
    fn spawned_room_becomes_ready() {
        let provider = RoomProvider::spawn(RoomLayout::default()).expect("spawn");
        let deadline = Instant::now() + Duration::from_secs(10);
        while !provider.is_ready() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(provider.is_ready());
        assert!(!provider.scene().nodes.is_empty());
    }
}
