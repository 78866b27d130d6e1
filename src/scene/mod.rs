//! Scene management
//!
//! A seeded field of model instances on a ground plane, lit by one orbiting
//! point light. GPU upload lives in [`SceneBuffers`]; the gbuffer pass only
//! sees the resulting [`DrawBatch`] list.

mod camera;
mod camera_controller;
mod light;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use light::*;
pub use transform::*;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::Mesh;

/// Number of models placed by [`Scene::generate`] by default
pub const DEFAULT_MODEL_COUNT: usize = 100;

/// Mesh shapes available to model instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshKind {
    Sphere,
    Column,
    Tree,
    HollowCube,
    Bunny,
}

impl MeshKind {
    pub const ALL: [MeshKind; 5] = [
        MeshKind::Sphere,
        MeshKind::Column,
        MeshKind::Tree,
        MeshKind::HollowCube,
        MeshKind::Bunny,
    ];

    pub fn index(&self) -> usize {
        match self {
            MeshKind::Sphere => 0,
            MeshKind::Column => 1,
            MeshKind::Tree => 2,
            MeshKind::HollowCube => 3,
            MeshKind::Bunny => 4,
        }
    }

    /// Uniform scale applied to every instance of this kind
    pub fn scale(&self) -> f32 {
        match self {
            MeshKind::Sphere => 0.25,
            MeshKind::Column => 0.05,
            MeshKind::Tree => 0.15,
            MeshKind::HollowCube => 0.25,
            MeshKind::Bunny => 0.25,
        }
    }

    pub fn build_mesh(&self) -> Mesh {
        match self {
            MeshKind::Sphere => Mesh::sphere(24, 16),
            MeshKind::Column => Mesh::column(),
            MeshKind::Tree => Mesh::tree(),
            MeshKind::HollowCube => Mesh::hollow_cube(),
            MeshKind::Bunny => Mesh::bunny(),
        }
    }
}

/// One placed model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelInstance {
    pub mesh: MeshKind,
    pub position: Vec3,
}

impl ModelInstance {
    pub fn transform(&self) -> Transform {
        Transform::from_position_scale(self.position, Vec3::splat(self.mesh.scale()))
    }
}

/// Per-instance vertex data: model matrix columns and albedo. `albedo.w` is 1
/// for lit geometry and 0 for unlit markers.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct InstanceData {
    pub model: Mat4,
    pub albedo: Vec4,
}

impl InstanceData {
    pub fn new(model: Mat4, albedo: Vec3, lit: bool) -> Self {
        Self {
            model,
            albedo: albedo.extend(if lit { 1.0 } else { 0.0 }),
        }
    }

    pub fn layout() -> VertexBufferLayout {
        let attribute = |i: u32| VertexAttribute {
            location: 3 + i,
            format: VertexFormat::Float32x4,
            offset: 16 * i as u64,
        };
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            step_mode: VertexStepMode::Instance,
            attributes: (0..5).map(attribute).collect(),
        }
    }
}

/// One instanced indexed draw against buffers owned by [`SceneBuffers`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawBatch {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub instance_buffer: BufferHandle,
    /// First instance in `instance_buffer`
    pub instance_offset: u32,
    pub instance_count: u32,
}

const GROUND_ALBEDO: Vec3 = Vec3::new(0.55, 0.52, 0.48);
const LIGHT_MARKER_ALBEDO: Vec3 = Vec3::new(1.0, 0.95, 0.7);

/// The scene containing all renderable content
#[derive(Debug, Clone)]
pub struct Scene {
    pub camera: Camera,
    pub light: OrbitingLight,
    pub models: Vec<ModelInstance>,
    /// Half extent of the square ground plane at y = 0
    pub ground_half_extent: f32,
}

impl Scene {
    /// Place `count` models with a deterministic generator
    pub fn generate(count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let models = (0..count)
            .map(|_| {
                let mesh = MeshKind::ALL[rng.gen_range(0..MeshKind::ALL.len())];
                let x = (rng.gen_range(0..256) as f32 - 128.0) / 20.0;
                let z = (rng.gen_range(0..256) as f32 - 128.0) / 20.0;
                ModelInstance {
                    mesh,
                    position: Vec3::new(x, 0.0, z),
                }
            })
            .collect();

        Self {
            camera: Camera::default(),
            light: OrbitingLight::default(),
            models,
            ground_half_extent: 10.0,
        }
    }

    pub fn update(&mut self, dt: f32, move_light: bool) {
        self.light.update(dt, move_light);
    }

    /// Albedo of a model, derived from its position so neighbours differ
    pub fn model_albedo(model: &ModelInstance) -> Vec3 {
        let hash = (model.position.x * 12.9898 + model.position.z * 78.233).sin() * 43758.547;
        let t = hash - hash.floor();
        Vec3::new(0.9, 0.6, 0.3).lerp(Vec3::new(0.35, 0.6, 0.9), t)
    }

    /// Instance data grouped by mesh kind, in [`MeshKind::ALL`] order
    pub fn instances_by_kind(&self) -> Vec<Vec<InstanceData>> {
        let mut groups = vec![Vec::new(); MeshKind::ALL.len()];
        for model in &self.models {
            groups[model.mesh.index()].push(InstanceData::new(
                model.transform().matrix(),
                Self::model_albedo(model),
                true,
            ));
        }
        groups
    }

    pub fn ground_instance(&self) -> InstanceData {
        InstanceData::new(Mat4::IDENTITY, GROUND_ALBEDO, true)
    }

    /// The light marker sphere; drawn unlit so it never receives shadows
    pub fn light_marker_instance(&self) -> InstanceData {
        let model = Transform::from_position_scale(
            self.light.position(),
            Vec3::splat(MeshKind::Sphere.scale() * 0.4),
        );
        InstanceData::new(model.matrix(), LIGHT_MARKER_ALBEDO, false)
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::generate(DEFAULT_MODEL_COUNT, 0)
    }
}

struct MeshBuffers {
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    index_count: u32,
}

impl MeshBuffers {
    fn upload(backend: &mut dyn GraphicsBackend, mesh: &Mesh) -> BackendResult<Self> {
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} vertices", mesh.name)),
                size: mesh.vertex_bytes().len() as u64,
                usage: BufferUsage::VERTEX,
            },
            mesh.vertex_bytes(),
        )?;
        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} indices", mesh.name)),
                size: mesh.index_bytes().len() as u64,
                usage: BufferUsage::INDEX,
            },
            mesh.index_bytes(),
        )?;
        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count() as u32,
        })
    }

    fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
    }
}

/// GPU copies of the scene meshes plus one instance buffer rewritten every
/// frame. Instance layout: models grouped by kind, then the ground, then the
/// light marker.
pub struct SceneBuffers {
    kinds: Vec<MeshBuffers>,
    ground: MeshBuffers,
    instance_buffer: BufferHandle,
    instance_capacity: usize,
}

impl SceneBuffers {
    pub fn new(backend: &mut dyn GraphicsBackend, scene: &Scene) -> BackendResult<Self> {
        let mut kinds = Vec::with_capacity(MeshKind::ALL.len());
        for kind in MeshKind::ALL {
            kinds.push(MeshBuffers::upload(backend, &kind.build_mesh())?);
        }
        let ground_extent = scene.ground_half_extent * 2.0;
        let ground = MeshBuffers::upload(backend, &Mesh::plane(ground_extent, ground_extent, 1))?;

        let instance_capacity = scene.models.len() + 2;
        let instance_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("scene instances".into()),
            size: (instance_capacity * std::mem::size_of::<InstanceData>()) as u64,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        })?;

        log::info!(
            "Uploaded {} mesh kinds and {} instance slots",
            kinds.len(),
            instance_capacity
        );

        Ok(Self {
            kinds,
            ground,
            instance_buffer,
            instance_capacity,
        })
    }

    /// Write this frame's instance data and return the draws covering it
    pub fn update(&self, backend: &mut dyn GraphicsBackend, scene: &Scene) -> Vec<DrawBatch> {
        let groups = scene.instances_by_kind();
        let mut instances: Vec<InstanceData> = Vec::with_capacity(self.instance_capacity);
        let mut draws = Vec::with_capacity(self.kinds.len() + 2);

        let mut push = |instances: &mut Vec<InstanceData>, mesh: &MeshBuffers, data: &[InstanceData]| {
            if data.is_empty() {
                return;
            }
            draws.push(DrawBatch {
                vertex_buffer: mesh.vertex_buffer,
                index_buffer: mesh.index_buffer,
                index_count: mesh.index_count,
                instance_buffer: self.instance_buffer,
                instance_offset: instances.len() as u32,
                instance_count: data.len() as u32,
            });
            instances.extend_from_slice(data);
        };

        for (mesh, group) in self.kinds.iter().zip(&groups) {
            push(&mut instances, mesh, group);
        }
        push(&mut instances, &self.ground, &[scene.ground_instance()]);
        push(
            &mut instances,
            &self.kinds[MeshKind::Sphere.index()],
            &[scene.light_marker_instance()],
        );

        instances.truncate(self.instance_capacity);
        backend.write_buffer(self.instance_buffer, 0, bytemuck::cast_slice(&instances));
        draws
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        for mesh in self.kinds {
            mesh.destroy(backend);
        }
        self.ground.destroy(backend);
        backend.destroy_buffer(self.instance_buffer);
    }
}
