use crate::frustum::Frustum;
use glam::{Mat4, Vec2, Vec3};
use winit::dpi::PhysicalSize;

const DEFAULT_UP: Vec3 = Vec3::Y;

/// Perspective camera feeding both the render passes and the culling
/// pipeline. Projection uses wgpu's 0..1 clip depth so the occlusion test can
/// compare against the real depth buffer.
#[derive(Debug, Clone)]
pub struct Camera3D {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera3D {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        Self { position, target, up: DEFAULT_UP, fov_y_radians, near, far }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, aspect.max(0.0001), self.near, self.far)
    }

    pub fn view_projection(&self, viewport: PhysicalSize<u32>) -> Mat4 {
        let aspect = if viewport.height > 0 { viewport.width as f32 / viewport.height as f32 } else { 1.0 };
        self.projection_matrix(aspect) * self.view_matrix()
    }

    pub fn frustum(&self, viewport: PhysicalSize<u32>) -> Frustum {
        Frustum::from_view_projection(&self.view_projection(viewport))
    }
}

/// Free-fly controller for the demo: yaw/pitch from mouse deltas, planar
/// movement along the view direction.
#[derive(Debug, Clone)]
pub struct FlyCamera {
    pub position: Vec3,
    pub yaw_radians: f32,
    pub pitch_radians: f32,
    pub speed: f32,
}

impl FlyCamera {
    pub fn new(position: Vec3, speed: f32) -> Self {
        Self { position, yaw_radians: 0.0, pitch_radians: 0.0, speed }
    }

    pub fn look(&mut self, delta: Vec2) {
        self.yaw_radians -= delta.x;
        self.pitch_radians = (self.pitch_radians - delta.y)
            .clamp(-std::f32::consts::FRAC_PI_2 + 0.01, std::f32::consts::FRAC_PI_2 - 0.01);
    }

    pub fn forward(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw_radians.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch_radians.sin_cos();
        Vec3::new(cos_pitch * sin_yaw, sin_pitch, -cos_pitch * cos_yaw).normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(DEFAULT_UP).normalize_or_zero()
    }

    /// Applies movement for the frame. `axes` is (right, up, forward) in -1..1.
    pub fn advance(&mut self, axes: Vec3, dt: f32, boost: bool) {
        let speed = if boost { self.speed * 4.0 } else { self.speed };
        let delta = self.right() * axes.x + DEFAULT_UP * axes.y + self.forward() * axes.z;
        self.position += delta.normalize_or_zero() * speed * dt;
    }

    pub fn to_camera(&self, fov_y_radians: f32, near: f32, far: f32) -> Camera3D {
        Camera3D::new(self.position, self.position + self.forward(), fov_y_radians, near, far)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera3d_view_projection_is_finite() {
        let camera = Camera3D::new(Vec3::new(0.0, 1.0, 5.0), Vec3::ZERO, 60.0_f32.to_radians(), 0.1, 1000.0);
        let vp = camera.view_projection(PhysicalSize::new(1280, 720));
        assert!(!vp.to_cols_array().iter().any(|v| v.is_nan() || v.is_infinite()));
    }

    #[test]
    fn projection_maps_depth_to_zero_one() {
        let camera = Camera3D::new(Vec3::ZERO, Vec3::NEG_Z, 60.0_f32.to_radians(), 1.0, 100.0);
        let proj = camera.projection_matrix(1.0);
        let near = proj * Vec3::new(0.0, 0.0, -1.0).extend(1.0);
        let far = proj * Vec3::new(0.0, 0.0, -100.0).extend(1.0);
        assert!((near.z / near.w).abs() < 1e-5, "near plane lands on 0");
        assert!((far.z / far.w - 1.0).abs() < 1e-5, "far plane lands on 1");
    }

    #[test]
    fn fly_camera_moves_along_view_direction() {
        let mut fly = FlyCamera::new(Vec3::ZERO, 10.0);
        fly.advance(Vec3::new(0.0, 0.0, 1.0), 1.0, false);
        assert!((fly.position - Vec3::new(0.0, 0.0, -10.0)).length() < 1e-4);
        fly.look(Vec2::new(std::f32::consts::FRAC_PI_2, 0.0));
        fly.advance(Vec3::new(0.0, 0.0, 1.0), 1.0, false);
        assert!(fly.position.x < -9.0, "after a quarter yaw the camera heads down -x");
    }

    #[test]
    fn pitch_stays_clamped() {
        let mut fly = FlyCamera::new(Vec3::ZERO, 1.0);
        fly.look(Vec2::new(0.0, -10.0));
        assert!(fly.pitch_radians < std::f32::consts::FRAC_PI_2);
        fly.look(Vec2::new(0.0, 20.0));
        assert!(fly.pitch_radians > -std::f32::consts::FRAC_PI_2);
    }
}
