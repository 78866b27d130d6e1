//! Mesh data structures and procedural generation

use crate::backend::types::Vertex;
use glam::{Mat3, Mat4, Vec2, Vec3};

/// A mesh with vertex and index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get vertex data as bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Get index data as bytes
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Append `other` transformed by `transform`; normals follow the inverse
    /// transpose.
    pub fn append(&mut self, other: &Mesh, transform: Mat4) {
        let base = self.vertices.len() as u32;
        let normal_matrix = Mat3::from_mat4(transform).inverse().transpose();
        self.vertices.extend(other.vertices.iter().map(|v| Vertex {
            position: transform.transform_point3(v.position),
            normal: (normal_matrix * v.normal).normalize_or_zero(),
            uv: v.uv,
        }));
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    /// Axis-aligned bounds of the vertex positions
    pub fn bounds(&self) -> (Vec3, Vec3) {
        self.vertices.iter().fold(
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            |(lo, hi), v| (lo.min(v.position), hi.max(v.position)),
        )
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");

        let faces = [
            (Vec3::Z, Vec3::X),
            (-Vec3::Z, -Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (-Vec3::Y, Vec3::X),
        ];

        for (normal, right) in faces {
            let up = normal.cross(right);
            let base = mesh.vertices.len() as u32;
            let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];
            for (x, y) in corners {
                mesh.vertices.push(Vertex {
                    position: normal * 0.5 + right * x + up * y,
                    normal,
                    uv: Vec2::new(x + 0.5, 0.5 - y),
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// Create a UV sphere of radius 1
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");

        let segment_angle = 2.0 * std::f32::consts::PI / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let normal = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());

                mesh.vertices.push(Vertex {
                    position: normal,
                    normal,
                    uv: Vec2::new(segment as f32 / segments as f32, ring as f32 / rings as f32),
                });
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;

                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }

        mesh
    }

    /// Create a plane on the XZ axis facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Mesh::new("plane");
        let subdivisions = subdivisions.max(1);

        let half_width = width / 2.0;
        let half_depth = depth / 2.0;
        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                mesh.vertices.push(Vertex {
                    position: Vec3::new(
                        -half_width + x as f32 * step_x,
                        0.0,
                        -half_depth + z as f32 * step_z,
                    ),
                    normal: Vec3::Y,
                    uv: Vec2::new(x as f32 / subdivisions as f32, z as f32 / subdivisions as f32),
                });
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;

                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        mesh
    }

    /// Create a capped cylinder standing on y = 0
    pub fn cylinder(radius: f32, height: f32, segments: u32) -> Self {
        Self::frustum("cylinder", radius, radius, height, segments)
    }

    /// Create a capped cone standing on y = 0
    pub fn cone(radius: f32, height: f32, segments: u32) -> Self {
        Self::frustum("cone", radius, 0.0, height, segments)
    }

    fn frustum(name: &str, bottom_radius: f32, top_radius: f32, height: f32, segments: u32) -> Self {
        let mut mesh = Mesh::new(name);
        let angle_step = 2.0 * std::f32::consts::PI / segments as f32;
        let slope = (bottom_radius - top_radius) / height;

        for i in 0..=segments {
            let angle = i as f32 * angle_step;
            let (sin, cos) = angle.sin_cos();
            let normal = Vec3::new(cos, slope, sin).normalize();
            let u = i as f32 / segments as f32;

            mesh.vertices.push(Vertex {
                position: Vec3::new(cos * bottom_radius, 0.0, sin * bottom_radius),
                normal,
                uv: Vec2::new(u, 1.0),
            });
            mesh.vertices.push(Vertex {
                position: Vec3::new(cos * top_radius, height, sin * top_radius),
                normal,
                uv: Vec2::new(u, 0.0),
            });
        }

        for i in 0..segments {
            let base = i * 2;
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 1, base + 3, base + 2]);
        }

        let mut cap = |y: f32, radius: f32, normal: Vec3| {
            if radius <= 0.0 {
                return;
            }
            let center = mesh.vertices.len() as u32;
            mesh.vertices.push(Vertex {
                position: Vec3::new(0.0, y, 0.0),
                normal,
                uv: Vec2::splat(0.5),
            });
            for i in 0..=segments {
                let (sin, cos) = (i as f32 * angle_step).sin_cos();
                mesh.vertices.push(Vertex {
                    position: Vec3::new(cos * radius, y, sin * radius),
                    normal,
                    uv: Vec2::new(0.5 + cos * 0.5, 0.5 + sin * 0.5),
                });
            }
            for i in 0..segments {
                let a = center + 1 + i;
                if normal.y > 0.0 {
                    mesh.indices.extend_from_slice(&[center, a + 1, a]);
                } else {
                    mesh.indices.extend_from_slice(&[center, a, a + 1]);
                }
            }
        };
        cap(height, top_radius, Vec3::Y);
        cap(0.0, bottom_radius, -Vec3::Y);

        mesh
    }

    /// Open cube frame: twelve square bars along the edges of a cube of
    /// half-size 1 resting on y = 0
    pub fn hollow_cube() -> Self {
        let mut mesh = Mesh::new("hollow_cube");
        let bar = Mesh::cube();
        let thickness = 0.2;
        let center = Vec3::new(0.0, 1.0, 0.0);

        for axis in 0..3 {
            for a in [-1.0f32, 1.0] {
                for b in [-1.0f32, 1.0] {
                    let (offset, scale) = match axis {
                        0 => (Vec3::new(0.0, a, b), Vec3::new(2.0, thickness, thickness)),
                        1 => (Vec3::new(a, 0.0, b), Vec3::new(thickness, 2.0, thickness)),
                        _ => (Vec3::new(a, b, 0.0), Vec3::new(thickness, thickness, 2.0)),
                    };
                    let offset = center + offset * (1.0 - thickness * 0.5);
                    mesh.append(&bar, Mat4::from_scale_rotation_translation(scale, glam::Quat::IDENTITY, offset));
                }
            }
        }

        mesh
    }

    /// Trunk with a conical canopy
    pub fn tree() -> Self {
        let mut mesh = Mesh::new("tree");
        mesh.append(&Mesh::cylinder(0.5, 3.0, 12), Mat4::IDENTITY);
        mesh.append(
            &Mesh::cone(2.5, 5.0, 16),
            Mat4::from_translation(Vec3::new(0.0, 2.5, 0.0)),
        );
        mesh
    }

    /// Tall column with a square plinth and capital
    pub fn column() -> Self {
        let mut mesh = Mesh::new("column");
        let slab = Mesh::cube();
        mesh.append(
            &slab,
            Mat4::from_scale_rotation_translation(Vec3::new(5.0, 1.5, 5.0), glam::Quat::IDENTITY, Vec3::new(0.0, 0.75, 0.0)),
        );
        mesh.append(
            &Mesh::cylinder(2.0, 17.0, 16),
            Mat4::from_translation(Vec3::new(0.0, 1.5, 0.0)),
        );
        mesh.append(
            &slab,
            Mat4::from_scale_rotation_translation(Vec3::new(5.0, 1.5, 5.0), glam::Quat::IDENTITY, Vec3::new(0.0, 19.25, 0.0)),
        );
        mesh
    }

    /// Rabbit-like blob: ellipsoid body, head and two ears
    pub fn bunny() -> Self {
        let mut mesh = Mesh::new("bunny");
        let sphere = Mesh::sphere(16, 12);
        mesh.append(
            &sphere,
            Mat4::from_scale_rotation_translation(Vec3::new(1.2, 0.9, 0.9), glam::Quat::IDENTITY, Vec3::new(0.0, 0.9, 0.0)),
        );
        mesh.append(
            &sphere,
            Mat4::from_scale_rotation_translation(Vec3::splat(0.55), glam::Quat::IDENTITY, Vec3::new(1.1, 1.7, 0.0)),
        );
        for z in [-0.2f32, 0.2] {
            mesh.append(
                &Mesh::cylinder(0.12, 0.9, 8),
                Mat4::from_rotation_translation(
                    glam::Quat::from_rotation_z(-0.3),
                    Vec3::new(1.05, 2.1, z),
                ),
            );
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_in_bounds() {
        for mesh in [
            Mesh::cube(),
            Mesh::sphere(8, 6),
            Mesh::plane(2.0, 2.0, 3),
            Mesh::cylinder(1.0, 2.0, 8),
            Mesh::cone(1.0, 2.0, 8),
            Mesh::hollow_cube(),
            Mesh::tree(),
            Mesh::column(),
            Mesh::bunny(),
        ] {
            assert_eq!(mesh.index_count() % 3, 0, "{}", mesh.name);
            assert!(
                mesh.indices.iter().all(|&i| (i as usize) < mesh.vertex_count()),
                "{}",
                mesh.name
            );
        }
    }

    #[test]
    fn test_composite_meshes_rest_on_ground() {
        for mesh in [Mesh::hollow_cube(), Mesh::tree(), Mesh::column()] {
            let (lo, _) = mesh.bounds();
            assert!(lo.y.abs() < 1e-4, "{} starts at {}", mesh.name, lo.y);
        }
    }

    #[test]
    fn test_append_offsets_indices() {
        let mut mesh = Mesh::cube();
        let count = mesh.vertex_count() as u32;
        mesh.append(&Mesh::cube(), Mat4::from_translation(Vec3::X));
        assert_eq!(mesh.indices[36], count);
        assert_eq!(mesh.vertex_count(), 48);
    }

    #[test]
    fn test_sphere_normals_point_outward() {
        let mesh = Mesh::sphere(8, 6);
        for v in &mesh.vertices {
            assert!((v.position.length() - 1.0).abs() < 1e-5);
            assert!(v.position.dot(v.normal) > 0.99);
        }
    }
}
