//! Light-space transforms for shadow rendering.

use glam::{Mat4, Vec3};

use super::Aabb;

/// Smallest extent an orthographic box may have along any axis.
const MIN_EXTENT: f32 = 1e-3;

/// Near plane of a point light's cube projection.
pub const POINT_LIGHT_NEAR: f32 = 0.1;

/// View direction and up vector of each cube face, in layer order
/// (+X, -X, +Y, -Y, +Z, -Z).
pub const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// Orthographic projection * view of a directional light, fitted tightly
/// around `aabb`.
///
/// The light camera sits upstream of the box center at the distance of the
/// farthest corner along `direction`; the projection box is the corners'
/// view-space bounds with the near plane at the camera.
pub fn directional_light_matrix(direction: Vec3, aabb: &Aabb) -> Mat4 {
    let dir = direction.normalize_or(Vec3::NEG_Y);
    let center = aabb.center();
    let corners = aabb.corners();

    let reach = corners
        .iter()
        .map(|&c| (center - c).dot(dir))
        .fold(0.0_f32, f32::max)
        .max(MIN_EXTENT);
    let eye = center - dir * reach;

    // Looking straight up or down makes +Y parallel to the view axis.
    let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let view = Mat4::look_at_rh(eye, center, up);

    let mut min = Vec3::splat(f32::INFINITY);
    let mut max = Vec3::splat(f32::NEG_INFINITY);
    for corner in corners {
        let p = view.transform_point3(corner);
        min = min.min(p);
        max = max.max(p);
    }
    let (left, right) = widen(min.x, max.x);
    let (bottom, top) = widen(min.y, max.y);
    // Right-handed view space looks down -Z.
    let far = (-min.z).max(MIN_EXTENT);

    let mut projection = Mat4::orthographic_rh(left, right, bottom, top, 0.0, far);
    projection.y_axis.y *= -1.0;
    projection * view
}

fn widen(lo: f32, hi: f32) -> (f32, f32) {
    if hi - lo < MIN_EXTENT {
        let mid = 0.5 * (lo + hi);
        (mid - 0.5 * MIN_EXTENT, mid + 0.5 * MIN_EXTENT)
    } else {
        (lo, hi)
    }
}

/// 90 degree square projection shared by all six cube faces.
pub fn point_light_projection(far: f32) -> Mat4 {
    Mat4::perspective_rh(90f32.to_radians(), 1.0, POINT_LIGHT_NEAR, far)
}

/// View matrix of every cube face around `position`, in layer order.
pub fn cube_face_views(position: Vec3) -> [Mat4; 6] {
    CUBE_FACES.map(|(dir, up)| Mat4::look_at_rh(position, position + dir, up))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    fn assert_contained(matrix: Mat4, aabb: &Aabb) {
        for corner in aabb.corners() {
            let clip = matrix.project_point3(corner);
            assert!(
                clip.x.abs() <= 1.0 + EPS && clip.y.abs() <= 1.0 + EPS,
                "{corner} maps outside x/y: {clip}"
            );
            assert!(clip.z >= -EPS && clip.z <= 1.0 + EPS, "{corner} maps outside depth: {clip}");
        }
    }

    // ============================================================
    // Directional
    // ============================================================

    #[test]
    fn test_unit_box_straight_down_is_contained() {
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        assert_contained(directional_light_matrix(Vec3::NEG_Y, &aabb), &aabb);
    }

    #[test]
    fn test_oblique_lights_are_contained() {
        let aabb = Aabb::new(Vec3::new(-20.0, -0.5, -8.0), Vec3::new(15.0, 12.0, 30.0));
        for dir in [
            Vec3::new(1.0, -1.0, 0.5),
            Vec3::new(-0.2, -0.9, -0.4),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::X,
        ] {
            assert_contained(directional_light_matrix(dir, &aabb), &aabb);
        }
    }

    #[test]
    fn test_fit_is_tight() {
        // Straight down onto a unit box: the top face lands on depth 0, the
        // bottom face on depth 1.
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let m = directional_light_matrix(Vec3::NEG_Y, &aabb);
        assert!(m.project_point3(Vec3::new(0.0, 1.0, 0.0)).z.abs() < EPS);
        assert!((m.project_point3(Vec3::new(0.0, -1.0, 0.0)).z - 1.0).abs() < EPS);
        assert!((m.project_point3(Vec3::new(1.0, 0.0, 1.0)).x.abs() - 1.0).abs() < EPS);
    }

    #[test]
    fn test_flat_box_does_not_degenerate() {
        let aabb = Aabb::new(Vec3::new(-5.0, 0.0, -5.0), Vec3::new(5.0, 0.0, 5.0));
        let m = directional_light_matrix(Vec3::NEG_Y, &aabb);
        assert!(m.is_finite());
        assert_contained(m, &aabb);
    }

    // ============================================================
    // Point
    // ============================================================

    #[test]
    fn test_cube_faces_look_along_their_axis() {
        let position = Vec3::new(2.0, 3.0, -1.0);
        let views = cube_face_views(position);
        for (view, (dir, _)) in views.iter().zip(CUBE_FACES) {
            let p = view.transform_point3(position + dir * 5.0);
            assert!(p.truncate().length() < EPS, "{dir}: {p}");
            assert!((p.z + 5.0).abs() < EPS, "{dir}: {p}");
        }
    }

    #[test]
    fn test_point_projection_depth_range() {
        let projection = point_light_projection(100.0);
        let near = projection.project_point3(Vec3::new(0.0, 0.0, -POINT_LIGHT_NEAR));
        let far = projection.project_point3(Vec3::new(0.0, 0.0, -100.0));
        assert!(near.z.abs() < EPS);
        assert!((far.z - 1.0).abs() < EPS);
    }
}
