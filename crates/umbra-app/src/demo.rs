//! The scene shown by the binary: a floor, a few boxes and three lights.

use glam::Vec3;
use umbra_renderer::scene::shapes::{cuboid, plane};
use umbra_renderer::{Light, SceneBuilder, TextureIndices};

pub fn build() -> SceneBuilder {
    let mut scene = SceneBuilder::new();

    // Normal maps store tangent space; roughness is read from green, metalness from blue.
    let flat_normal = scene.add_solid_texture("flat normal", [128, 128, 255, 255]).0;
    let dielectric = scene.add_solid_texture("dielectric", [0, 0, 0, 255]).0;
    let metal = scene.add_solid_texture("metal", [0, 0, 255, 255]).0;
    let rough = scene.add_solid_texture("rough", [0, 200, 0, 255]).0;
    let polished = scene.add_solid_texture("polished", [0, 60, 0, 255]).0;

    let mut material = |name: &str, rgba: [u8; 4], metallic: bool| TextureIndices {
        diffuse: scene.add_solid_texture(name, rgba).0,
        normals: flat_normal,
        metalness: if metallic { metal } else { dielectric },
        roughness: if metallic { polished } else { rough },
    };
    let floor = material("floor", [180, 180, 170, 255], false);
    let brick = material("brick", [170, 70, 50, 255], false);
    let brass = material("brass", [220, 180, 90, 255], true);
    let slate = material("slate", [70, 80, 95, 255], false);

    scene.add_mesh(plane("floor", Vec3::ZERO, 20.0, floor));
    scene.add_mesh(cuboid("pillar", Vec3::new(-3.0, 2.0, -2.0), Vec3::new(0.75, 2.0, 0.75), brick));
    scene.add_mesh(cuboid("crate", Vec3::new(2.5, 1.0, 1.0), Vec3::splat(1.0), brass));
    scene.add_mesh(cuboid("slab", Vec3::new(0.0, 0.25, 4.0), Vec3::new(3.0, 0.25, 1.0), slate));

    scene.add_light(Light::directional(Vec3::new(-0.4, -1.0, -0.3), Vec3::new(1.0, 0.95, 0.85), 2.5));
    scene.add_light(Light::point(Vec3::new(0.0, 3.0, 0.0), Vec3::new(1.0, 0.6, 0.3), 20.0));
    scene.add_light(Light::point(Vec3::new(4.0, 2.0, -3.0), Vec3::new(0.3, 0.5, 1.0), 15.0));

    scene
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_scene_lights() {
        let scene = build();
        assert_eq!(scene.lights().directional_count(), 1);
        assert_eq!(scene.lights().point_count(), 2);
    }
}
