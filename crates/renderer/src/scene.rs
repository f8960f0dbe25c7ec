use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::camera::Camera;

/// Lights beyond this count are ignored by the scene pass.
pub const MAX_LIGHTS: usize = 8;

static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity used by backends to cache uploaded geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(u64);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
        }
    }
}

/// Immutable indexed triangle list.
#[derive(Debug)]
pub struct Mesh {
    id: MeshId,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl Mesh {
    /// Returns `None` when an index points past the vertex list or the
    /// index count is not a multiple of three.
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Option<Self> {
        let in_range = indices.iter().all(|&index| (index as usize) < vertices.len());
        if !in_range || indices.len() % 3 != 0 {
            return None;
        }
        Some(Self {
            id: MeshId(NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed)),
            vertices,
            indices,
        })
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }
}

/// Surface response of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Linear diffuse albedo.
    pub base_color: Vec3,
    /// Emitted radiance; may exceed 1.0.
    pub emissive: Vec3,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec3::splat(0.8),
            emissive: Vec3::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub mesh: Arc<Mesh>,
    pub transform: Mat4,
    pub material: Material,
}

/// Point light with inverse-square falloff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    /// Radiant intensity multiplier.
    pub intensity: f32,
}

/// Drawable nodes and lights. Owned by the scene provider.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub nodes: Vec<SceneNode>,
    pub lights: Vec<PointLight>,
    pub ambient: Vec3,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: SceneNode) {
        self.nodes.push(node);
    }

    pub fn add_light(&mut self, light: PointLight) {
        if self.lights.len() >= MAX_LIGHTS {
            tracing::warn!(max = MAX_LIGHTS, "scene light limit reached; ignoring light");
            return;
        }
        self.lights.push(light);
    }
}

/// Source of the scene and camera rendered each frame.
pub trait SceneProvider {
    fn scene(&self) -> &Scene;
    fn camera(&self) -> &Camera;
    /// Mutable camera for the locomotion controller; the orchestrator never writes it.
    fn camera_mut(&mut self) -> &mut Camera;
    /// Frames are skipped until this reports true.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Provider over an already built scene.
#[derive(Debug, Clone, Default)]
pub struct StaticScene {
    pub scene: Scene,
    pub camera: Camera,
}

impl StaticScene {
    pub fn new(scene: Scene, camera: Camera) -> Self {
        Self { scene, camera }
    }
}

impl SceneProvider for StaticScene {
    fn scene(&self) -> &Scene {
        &self.scene
    }

    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }
}
