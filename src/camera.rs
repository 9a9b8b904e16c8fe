//! A free-flying camera with simple velocity physics.
//!
//! [`Camera`] stores its orientation as the world-to-view rotation, so
//! [`Camera::view`] is that rotation composed with a translation by the
//! negated position. Movement is acceleration based: held keys push along the
//! camera's local axes, velocity carries over between frames and bleeds off
//! through a fixed drag.
//!
//! # Controls
//!
//! - **W/S**: forward/backward
//! - **A/D**: strafe left/right
//! - **E/Q**: up/down
//! - **Mouse**: pitch around the camera's right axis, yaw around world +Y
//!
//! # Example
//!
//! ```ignore
//! let mut camera = Camera::new(1200, 900);
//! camera.handle_event(&InputEvent::KeyDown(KeyCode::KeyW));
//! camera.integrate();
//! let proj_view = camera.proj() * camera.view();
//! ```

use std::collections::HashSet;

use glam::{Mat4, Quat, Vec2, Vec3};
use winit::keyboard::KeyCode;

use crate::input::InputEvent;

/// Acceleration applied per integration step for each held movement key.
pub const DEFAULT_SPEED: f32 = 0.5;
/// Fraction of velocity removed per integration step.
pub const DRAG: f32 = 0.1;
/// Velocity components smaller than this (and nonzero) snap to zero.
pub const VELOCITY_EPSILON: f32 = 0.01;
/// Radians of rotation per unit of raw mouse motion.
pub const MOUSE_SENSITIVITY: f32 = 0.001;
/// Vertical field of view in radians.
pub const FOV_Y: f32 = std::f32::consts::FRAC_PI_4;

#[derive(Clone, Debug)]
pub struct Camera {
    /// World-space position.
    pub position: Vec3,
    /// World-to-view rotation.
    pub rotation: Quat,
    /// World-space velocity, in units per integration step.
    pub velocity: Vec3,
    /// Viewport size in pixels. Only the aspect ratio matters.
    pub viewport: Vec2,
    pub near: f32,
    pub far: f32,
    pub speed: f32,
    held: HashSet<KeyCode>,
}

impl Camera {
    /// A camera at the origin looking down +X, sized for the given viewport.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::from_mat4(&Mat4::look_at_rh(Vec3::ZERO, Vec3::X, Vec3::Y)),
            velocity: Vec3::ZERO,
            viewport: Vec2::new(width as f32, height as f32),
            near: 0.1,
            far: 1000.0,
            speed: DEFAULT_SPEED,
            held: HashSet::new(),
        }
    }

    /// Set the starting position.
    pub fn position(mut self, position: impl Into<Vec3>) -> Self {
        self.position = position.into();
        self
    }

    /// Set near and far clipping planes.
    pub fn clip_planes(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn near_far(&self) -> [f32; 2] {
        [self.near, self.far]
    }

    pub fn aspect(&self) -> f32 {
        self.viewport.x / self.viewport.y
    }

    /// Returns true if `key` is currently held.
    pub fn is_held(&self, key: KeyCode) -> bool {
        self.held.contains(&key)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation.conjugate() * Vec3::NEG_Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation.conjugate() * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.rotation.conjugate() * Vec3::X
    }

    /// World-to-view matrix.
    pub fn view(&self) -> Mat4 {
        Mat4::from_quat(self.rotation) * Mat4::from_translation(-self.position)
    }

    /// Right-handed perspective projection with a 0..1 depth range.
    pub fn proj(&self) -> Mat4 {
        Mat4::perspective_rh(FOV_Y, self.aspect(), self.near, self.far)
    }

    /// Feed one input event into the camera.
    pub fn handle_event(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::KeyDown(key) => {
                self.held.insert(key);
            }
            InputEvent::KeyUp(key) => {
                self.held.remove(&key);
            }
            InputEvent::MouseMotion { dx, dy } => {
                let pitch = dy * MOUSE_SENSITIVITY;
                let yaw = dx * MOUSE_SENSITIVITY;
                self.rotation *= Quat::from_axis_angle(self.right().normalize(), pitch);
                self.rotation *= Quat::from_axis_angle(Vec3::Y, yaw);
                self.rotation = self.rotation.normalize();
            }
            InputEvent::Resized { width, height } => {
                if width > 0 && height > 0 {
                    self.viewport = Vec2::new(width as f32, height as f32);
                }
            }
            InputEvent::CloseRequested => {}
        }
    }

    /// Advance the camera by one step.
    pub fn integrate(&mut self) {
        let axes = [
            (KeyCode::KeyW, self.forward()),
            (KeyCode::KeyS, -self.forward()),
            (KeyCode::KeyA, -self.right()),
            (KeyCode::KeyD, self.right()),
            (KeyCode::KeyE, self.up()),
            (KeyCode::KeyQ, -self.up()),
        ];
        let acceleration: Vec3 = axes
            .iter()
            .filter(|(key, _)| self.held.contains(key))
            .map(|(_, axis)| self.speed * *axis)
            .sum();

        self.velocity += acceleration;
        self.position += self.velocity;
        self.velocity -= DRAG * self.velocity;
        self.velocity = Vec3::from_array(self.velocity.to_array().map(snap_to_zero));
    }
}

fn snap_to_zero(v: f32) -> f32 {
    if v != 0.0 && v.abs() < VELOCITY_EPSILON {
        0.0
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn starts_looking_down_positive_x() {
        let camera = Camera::new(1200, 900);
        assert!(camera.forward().abs_diff_eq(Vec3::X, EPS));
        assert!(camera.up().abs_diff_eq(Vec3::Y, EPS));
        assert!(camera.right().abs_diff_eq(Vec3::Z, EPS));
    }

    #[test]
    fn small_velocity_snaps_to_zero() {
        let mut camera = Camera::new(800, 600);
        camera.velocity = Vec3::new(0.005, 0.0, 0.0);
        camera.integrate();
        assert_eq!(camera.velocity, Vec3::ZERO);
        assert!((camera.position.x - 0.005).abs() < EPS);
    }

    #[test]
    fn held_forward_key_accelerates_along_forward() {
        let mut camera = Camera::new(800, 600);
        camera.handle_event(&InputEvent::KeyDown(KeyCode::KeyW));
        camera.integrate();

        // vel = 0.5 * X, pos += vel, then 10% drag.
        assert!(camera.position.abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), EPS));
        assert!(camera.velocity.abs_diff_eq(Vec3::new(0.45, 0.0, 0.0), EPS));
    }

    #[test]
    fn opposing_keys_cancel() {
        let mut camera = Camera::new(800, 600);
        camera.handle_event(&InputEvent::KeyDown(KeyCode::KeyE));
        camera.handle_event(&InputEvent::KeyDown(KeyCode::KeyQ));
        camera.integrate();
        assert_eq!(camera.position, Vec3::ZERO);
    }

    #[test]
    fn key_up_stops_acceleration() {
        let mut camera = Camera::new(800, 600);
        camera.handle_event(&InputEvent::KeyDown(KeyCode::KeyD));
        assert!(camera.is_held(KeyCode::KeyD));
        camera.handle_event(&InputEvent::KeyUp(KeyCode::KeyD));
        assert!(!camera.is_held(KeyCode::KeyD));
        camera.integrate();
        assert_eq!(camera.position, Vec3::ZERO);
    }

    #[test]
    fn velocity_decays_under_drag() {
        let mut camera = Camera::new(800, 600);
        camera.velocity = Vec3::new(0.0, 1.0, 0.0);
        camera.integrate();
        assert!((camera.velocity.y - 0.9).abs() < EPS);
        assert!((camera.position.y - 1.0).abs() < EPS);
    }

    #[test]
    fn view_maps_position_to_origin() {
        let camera = Camera::new(800, 600).position([3.0, -2.0, 7.0]);
        let p = camera.view().transform_point3(Vec3::new(3.0, -2.0, 7.0));
        assert!(p.abs_diff_eq(Vec3::ZERO, EPS));
    }

    #[test]
    fn view_puts_forward_on_negative_z() {
        let camera = Camera::new(800, 600);
        let ahead = camera.view().transform_point3(camera.forward() * 5.0);
        assert!(ahead.abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), EPS));
    }

    #[test]
    fn resize_updates_aspect_only() {
        let mut camera = Camera::new(800, 600);
        let before = camera.position;
        camera.handle_event(&InputEvent::Resized {
            width: 1000,
            height: 500,
        });
        assert!((camera.aspect() - 2.0).abs() < EPS);
        assert_eq!(camera.position, before);
    }

    #[test]
    fn zero_resize_is_ignored() {
        let mut camera = Camera::new(800, 600);
        camera.handle_event(&InputEvent::Resized {
            width: 0,
            height: 0,
        });
        assert_eq!(camera.viewport, Vec2::new(800.0, 600.0));
    }

    #[test]
    fn horizontal_mouse_motion_yaws_about_world_up() {
        let mut camera = Camera::new(800, 600);
        camera.handle_event(&InputEvent::MouseMotion { dx: 100.0, dy: 0.0 });
        let forward = camera.forward();
        assert!(forward.y.abs() < EPS);
        assert!((forward.length() - 1.0).abs() < EPS);
        assert!(!forward.abs_diff_eq(Vec3::X, 1e-3));
    }

    #[test]
    fn projection_maps_near_and_far_to_unit_depth() {
        let camera = Camera::new(800, 600);
        let proj = camera.proj();
        let near = proj.project_point3(Vec3::new(0.0, 0.0, -camera.near));
        let far = proj.project_point3(Vec3::new(0.0, 0.0, -camera.far));
        assert!(near.z.abs() < 1e-4);
        assert!((far.z - 1.0).abs() < 1e-4);
    }
}
