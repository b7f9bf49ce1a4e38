//! Scene lights and their packed GPU layout.
//!
//! The lighting shader walks `lights[0..directional_count]` as directional
//! lights and the rest as point lights, so the list is kept sorted with
//! every directional light ahead of every point light.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use super::light_space::directional_light_matrix;
use super::Aabb;

/// No shadow map linked yet.
pub const NO_SHADOW_MAP: u32 = u32::MAX;

/// One light as stored in the per-frame light buffer (std430).
///
/// `position.w` is 0 for a directional light, whose `xyz` is the direction
/// light travels, and 1 for a point light.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Light {
    pub position: Vec4,
    pub color: Vec3,
    pub intensity: f32,
    /// Bindless index of the light's shadow map.
    pub shadow_map_index: u32,
    /// Dense per-type index; selects the light-space matrix of a
    /// directional light and the cube map slot of a point light.
    pub matrix_index: u32,
    pub _pad: [u32; 2],
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self::with_position(direction.normalize_or(Vec3::NEG_Y).extend(0.0), color, intensity)
    }

    pub fn point(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self::with_position(position.extend(1.0), color, intensity)
    }

    fn with_position(position: Vec4, color: Vec3, intensity: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            shadow_map_index: NO_SHADOW_MAP,
            matrix_index: 0,
            _pad: [0; 2],
        }
    }

    pub fn is_directional(&self) -> bool {
        self.position.w == 0.0
    }

    pub fn is_point(&self) -> bool {
        !self.is_directional()
    }

    /// Direction of travel (directional) or world position (point).
    pub fn xyz(&self) -> Vec3 {
        self.position.truncate()
    }

    pub fn has_shadow_map(&self) -> bool {
        self.shadow_map_index != NO_SHADOW_MAP
    }
}

/// Ordered light list: directional lights first, each type densely indexed.
#[derive(Debug, Clone, Default)]
pub struct LightList {
    lights: Vec<Light>,
    directional_count: u32,
    point_count: u32,
}

impl LightList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next per-type index, append, and restore the ordering.
    /// Returns the assigned matrix index.
    pub fn add_light(&mut self, mut light: Light) -> u32 {
        let counter = if light.is_directional() {
            &mut self.directional_count
        } else {
            &mut self.point_count
        };
        light.matrix_index = *counter;
        *counter += 1;

        self.lights.push(light);
        // Keys are unique: matrix indices never repeat within a type.
        self.lights.sort_by(|a, b| {
            a.position
                .w
                .total_cmp(&b.position.w)
                .then(a.matrix_index.cmp(&b.matrix_index))
        });
        light.matrix_index
    }

    /// Store the bindless index of `light_index`'s shadow map.
    pub fn link_shadow_map_index(&mut self, light_index: usize, shadow_map_index: u32) {
        self.lights[light_index].shadow_map_index = shadow_map_index;
    }

    pub fn directional_count(&self) -> u32 {
        self.directional_count
    }

    pub fn point_count(&self) -> u32 {
        self.point_count
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn as_slice(&self) -> &[Light] {
        &self.lights
    }

    pub fn iter(&self) -> impl Iterator<Item = &Light> {
        self.lights.iter()
    }

    /// Orthographic light-space matrix of every directional light, indexed
    /// by its matrix index.
    pub fn light_space_matrices(&self, aabb: &Aabb) -> Vec<Mat4> {
        let mut matrices = vec![Mat4::IDENTITY; self.directional_count as usize];
        for light in self.lights.iter().filter(|l| l.is_directional()) {
            matrices[light.matrix_index as usize] = directional_light_matrix(light.xyz(), aabb);
        }
        matrices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_list(seed: u32, count: usize) -> LightList {
        let mut list = LightList::new();
        let mut state = seed;
        for i in 0..count {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let light = if state >> 31 == 0 {
                Light::directional(Vec3::new(0.3, -1.0, i as f32 * 0.1), Vec3::ONE, 1.0)
            } else {
                Light::point(Vec3::splat(i as f32), Vec3::ONE, 10.0)
            };
            list.add_light(light);
        }
        list
    }

    // ============================================================
    // Ordering
    // ============================================================

    #[test]
    fn test_light_size_is_std430() {
        assert_eq!(std::mem::size_of::<Light>(), 48);
    }

    #[test]
    fn test_directional_lights_precede_point_lights() {
        for seed in 0..32 {
            let list = random_list(seed, 1 + seed as usize % 12);
            let first_point = list
                .iter()
                .position(Light::is_point)
                .unwrap_or(list.len());
            assert!(
                list.as_slice()[first_point..].iter().all(Light::is_point),
                "seed {seed}: directional light after a point light"
            );
            assert_eq!(first_point as u32, list.directional_count());
        }
    }

    #[test]
    fn test_matrix_indices_are_dense_per_type() {
        for seed in 0..32 {
            let list = random_list(seed, 16);
            let mut directional: Vec<u32> = list
                .iter()
                .filter(|l| l.is_directional())
                .map(|l| l.matrix_index)
                .collect();
            let mut point: Vec<u32> = list.iter().filter(|l| l.is_point()).map(|l| l.matrix_index).collect();
            directional.sort_unstable();
            point.sort_unstable();
            assert_eq!(directional, (0..list.directional_count()).collect::<Vec<_>>());
            assert_eq!(point, (0..list.point_count()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_insertion_order_kept_within_type() {
        let mut list = LightList::new();
        list.add_light(Light::point(Vec3::X, Vec3::ONE, 1.0));
        list.add_light(Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0));
        list.add_light(Light::point(Vec3::Y, Vec3::ONE, 1.0));
        list.add_light(Light::directional(Vec3::NEG_Z, Vec3::ONE, 1.0));

        let kinds: Vec<(bool, u32)> = list.iter().map(|l| (l.is_directional(), l.matrix_index)).collect();
        assert_eq!(kinds, vec![(true, 0), (true, 1), (false, 0), (false, 1)]);
        assert_eq!(list.as_slice()[2].xyz(), Vec3::X);
    }

    #[test]
    fn test_shadow_map_index_unset_until_linked() {
        let mut list = LightList::new();
        list.add_light(Light::point(Vec3::ZERO, Vec3::ONE, 1.0));
        assert!(!list.as_slice()[0].has_shadow_map());
        list.link_shadow_map_index(0, 7);
        assert_eq!(list.as_slice()[0].shadow_map_index, 7);
    }

    #[test]
    fn test_light_space_matrices_indexed_by_matrix_index() {
        let mut list = LightList::new();
        list.add_light(Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0));
        list.add_light(Light::point(Vec3::ZERO, Vec3::ONE, 1.0));
        list.add_light(Light::directional(Vec3::new(1.0, -1.0, 0.0), Vec3::ONE, 1.0));

        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let matrices = list.light_space_matrices(&aabb);
        assert_eq!(matrices.len(), 2);
        assert_eq!(matrices[0], directional_light_matrix(Vec3::NEG_Y, &aabb));
        assert_eq!(
            matrices[1],
            directional_light_matrix(Vec3::new(1.0, -1.0, 0.0).normalize(), &aabb)
        );
    }
}
