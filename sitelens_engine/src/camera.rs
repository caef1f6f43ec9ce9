//! Orbit camera with damped input.
//!
//! Input handlers only accumulate deltas; `integrate` applies a share of the
//! outstanding motion each frame so orbiting eases out instead of snapping.

use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::Serialize;

use crate::geometry::{Aabb, Ray};

const PITCH_LIMIT: f32 = 1.5;
const MIN_DISTANCE: f32 = 0.5;
const MAX_DISTANCE: f32 = 5_000.0;
/// Fraction of the outstanding motion left after one second.
const DAMPING: f32 = 1e-4;

#[derive(Debug, Clone, Serialize)]
pub struct OrbitCamera {
    pub yaw: f32,
    pub pitch: f32,
    pub distance: f32,
    pub target: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    /// Radius of the framed model; drives the clip planes.
    pub radius: f32,
    pending_orbit: Vec2,
    pending_pan: Vec2,
    pending_zoom: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        OrbitCamera {
            yaw: 0.6,
            pitch: 0.4,
            distance: 20.0,
            target: Vec3::ZERO,
            fov: 45f32.to_radians(),
            radius: 10.0,
            pending_orbit: Vec2::ZERO,
            pending_pan: Vec2::ZERO,
            pending_zoom: 0.0,
        }
    }
}

impl OrbitCamera {
    /// Radians of yaw/pitch to add.
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        self.pending_orbit += Vec2::new(dx, dy);
    }

    /// Screen-space pan in units of the current distance.
    pub fn pan(&mut self, dx: f32, dy: f32) {
        self.pending_pan += Vec2::new(dx, dy);
    }

    /// Positive zooms in. One unit halves the distance.
    pub fn zoom(&mut self, delta: f32) {
        self.pending_zoom += delta;
    }

    pub fn is_settled(&self) -> bool {
        self.pending_orbit.length_squared() < 1e-10
            && self.pending_pan.length_squared() < 1e-10
            && self.pending_zoom.abs() < 1e-5
    }

    /// Apply the share of queued motion due after `dt` seconds. Returns true
    /// when the camera moved.
    pub fn integrate(&mut self, dt: f32) -> bool {
        if self.is_settled() || dt <= 0.0 {
            return false;
        }
        let share = 1.0 - DAMPING.powf(dt.min(1.0));

        let orbit = self.pending_orbit * share;
        self.pending_orbit -= orbit;
        self.yaw += orbit.x;
        self.pitch = (self.pitch + orbit.y).clamp(-PITCH_LIMIT, PITCH_LIMIT);

        let pan = self.pending_pan * share;
        self.pending_pan -= pan;
        let offset = (self.right_vector() * pan.x + self.up_vector() * pan.y) * self.distance;
        self.target += offset;

        let zoom = self.pending_zoom * share;
        self.pending_zoom -= zoom;
        self.distance = (self.distance * 0.5f32.powf(zoom)).clamp(MIN_DISTANCE, MAX_DISTANCE);
        true
    }

    /// Aim at `bounds` and back off until it fits the vertical field of view.
    pub fn frame_bounds(&mut self, bounds: &Aabb) {
        if !bounds.is_valid() {
            return;
        }
        let radius = (bounds.size().length() * 0.5).max(MIN_DISTANCE);
        self.target = bounds.center();
        self.distance = (radius / (self.fov * 0.5).sin()).clamp(MIN_DISTANCE, MAX_DISTANCE);
        self.radius = radius;
        self.pending_orbit = Vec2::ZERO;
        self.pending_pan = Vec2::ZERO;
        self.pending_zoom = 0.0;
    }

    pub fn eye_position(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        self.target + Vec3::new(cp * sy, sp, cp * cy) * self.distance
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye_position(), self.target, Vec3::Y)
    }

    /// Near and far planes around the framed model at the current distance.
    /// Far leaves room for exploded layouts.
    pub fn clip_planes(&self) -> (f32, f32) {
        let near = ((self.distance - 2.0 * self.radius) * 0.9)
            .max(self.distance * 1e-3)
            .max(0.01);
        let far = self.distance + self.radius * 6.0;
        (near, far.max(near * 2.0))
    }

    /// wgpu-style projection with a 0..1 depth range.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let (near, far) = self.clip_planes();
        Mat4::perspective_rh(self.fov, aspect.max(1e-3), near, far)
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    fn right_vector(&self) -> Vec3 {
        let forward = (self.target - self.eye_position()).normalize_or_zero();
        forward.cross(Vec3::Y).normalize_or_zero()
    }

    fn up_vector(&self) -> Vec3 {
        let forward = (self.target - self.eye_position()).normalize_or_zero();
        self.right_vector().cross(forward).normalize_or_zero()
    }

    /// World ray through a normalised viewport position (top-left origin).
    pub fn ray_from_screen(&self, at: Vec2, aspect: f32) -> Ray {
        let ndc = Vec2::new(at.x * 2.0 - 1.0, 1.0 - at.y * 2.0);
        let inverse = self.view_projection(aspect).inverse();
        let near = inverse * Vec4::new(ndc.x, ndc.y, 0.0, 1.0);
        let far = inverse * Vec4::new(ndc.x, ndc.y, 1.0, 1.0);
        let near = near.truncate() / near.w;
        let far = far.truncate() / far.w;
        Ray::new(near, (far - near).normalize_or_zero())
    }
}
