//! Procedural meshes for scenes built without an asset importer.

use glam::{Vec2, Vec3};

use super::{MeshData, TextureIndices, Vertex};

/// Axis-aligned box, four vertices per face so normals stay flat.
pub fn cuboid(name: &str, center: Vec3, half_extents: Vec3, textures: TextureIndices) -> MeshData {
    // (normal, tangent) per face; bitangent = normal x tangent.
    let faces = [
        (Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_X, Vec3::Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, tangent) in faces {
        let bitangent = normal.cross(tangent);
        let base = vertices.len() as u32;
        for (u, v) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let local = normal + tangent * u + bitangent * v;
            vertices.push(Vertex::new(
                center + local * half_extents,
                Vec2::new(0.5 * (u + 1.0), 0.5 * (1.0 - v)),
                normal,
                tangent,
            ));
        }
        // Counter-clockwise seen from outside.
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    MeshData {
        name: name.to_string(),
        vertices,
        indices,
        textures,
    }
}

/// Horizontal square facing +Y.
pub fn plane(name: &str, center: Vec3, half_size: f32, textures: TextureIndices) -> MeshData {
    let normal = Vec3::Y;
    let tangent = Vec3::X;
    let corners = [(-1.0, 1.0), (1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)];
    let vertices = corners
        .iter()
        .map(|&(x, z)| {
            Vertex::new(
                center + Vec3::new(x, 0.0, z) * half_size,
                Vec2::new(0.5 * (x + 1.0), 0.5 * (z + 1.0)),
                normal,
                tangent,
            )
        })
        .collect();

    MeshData {
        name: name.to_string(),
        vertices,
        indices: vec![0, 1, 2, 0, 2, 3],
        textures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn winding_normal(mesh: &MeshData, tri: usize) -> Vec3 {
        let i = &mesh.indices[tri * 3..tri * 3 + 3];
        let p = |k: usize| mesh.vertices[i[k] as usize].position;
        (p(1) - p(0)).cross(p(2) - p(0)).normalize()
    }

    #[test]
    fn test_cuboid_faces_wind_outward() {
        let mesh = cuboid("box", Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.5, 1.0, 2.0), TextureIndices::default());
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        for tri in 0..12 {
            let n = winding_normal(&mesh, tri);
            let expected = mesh.vertices[mesh.indices[tri * 3] as usize].normal;
            assert!(n.dot(expected) > 0.99, "triangle {tri}: {n} vs {expected}");
        }
    }

    #[test]
    fn test_cuboid_bounds() {
        let mesh = cuboid("box", Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0), TextureIndices::default());
        let aabb = super::super::Aabb::from_points(mesh.vertices.iter().map(|v| v.position)).unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, -3.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_plane_faces_up() {
        let mesh = plane("floor", Vec3::ZERO, 10.0, TextureIndices::default());
        for tri in 0..2 {
            assert!(winding_normal(&mesh, tri).dot(Vec3::Y) > 0.99);
        }
    }
}
