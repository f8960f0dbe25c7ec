use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::scene::{MeshId, Scene};

/// Frames a mesh may go unused before its buffers are released.
const MESH_RETENTION_FRAMES: u64 = 120;

pub(crate) struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
    last_used: u64,
}

/// Vertex and index buffers for every mesh the scene references.
#[derive(Default)]
pub(crate) struct MeshCache {
    meshes: HashMap<MeshId, GpuMesh>,
    frame: u64,
}

impl MeshCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads meshes seen for the first time and marks all of them used.
    pub fn prepare(&mut self, device: &wgpu::Device, scene: &Scene) {
        let frame = self.frame;
        for node in &scene.nodes {
            let mesh = &node.mesh;
            let entry = self.meshes.entry(mesh.id()).or_insert_with(|| {
                tracing::trace!(id = ?mesh.id(), vertices = mesh.vertices().len(), "uploading mesh");
                GpuMesh {
                    vertex_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("mesh vertices"),
                        contents: bytemuck::cast_slice(mesh.vertices()),
                        usage: wgpu::BufferUsages::VERTEX,
                    }),
                    index_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("mesh indices"),
                        contents: bytemuck::cast_slice(mesh.indices()),
                        usage: wgpu::BufferUsages::INDEX,
                    }),
                    index_count: mesh.indices().len() as u32,
                    last_used: frame,
                }
            });
            entry.last_used = frame;
        }
    }

    pub fn get(&self, id: MeshId) -> Option<&GpuMesh> {
        self.meshes.get(&id)
    }

    pub fn end_frame(&mut self) {
        let frame = self.frame;
        let before = self.meshes.len();
        self.meshes
            .retain(|_, mesh| !is_stale(mesh.last_used, frame));
        let released = before - self.meshes.len();
        if released > 0 {
            tracing::debug!(released, "released unused meshes");
        }
        self.frame = frame.wrapping_add(1);
    }
}

fn is_stale(last_used: u64, frame: u64) -> bool {
    frame.saturating_sub(last_used) > MESH_RETENTION_FRAMES
}
