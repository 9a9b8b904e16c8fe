//! The loaded scene: placed mesh instances plus the shared geometry buffers
//! they index into.
//!
//! A [`Scene`] is replaced whole on reload. Nothing edits an instance list in
//! place, so a frame always sees either the complete old scene or the
//! complete new one.

use std::path::PathBuf;

use glam::{Mat4, Quat, Vec3};

use crate::resource::{GpuResource, ResourceError};

/// One drawable node: a placement plus the index range it draws.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshInstance {
    pub position: Vec3,
    pub scale: Vec3,
    /// Unit quaternion.
    pub rotation: Quat,
    pub num_indices: u32,
    /// First index of this instance within the shared index buffer.
    pub first_index: u32,
    /// Element offset of this instance's first vertex in the position and
    /// normal buffers. Its indices are stored relative to this vertex.
    pub base_vertex: i32,
}

impl Default for MeshInstance {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Quat::IDENTITY,
            num_indices: 0,
            first_index: 0,
            base_vertex: 0,
        }
    }
}

impl MeshInstance {
    /// Model matrix: translate, then scale, then rotate.
    ///
    /// Applied to a point, rotation happens first, then scale along the world
    /// axes, then translation.
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position)
            * Mat4::from_scale(self.scale)
            * Mat4::from_quat(self.rotation)
    }

    /// Index range of this instance within the shared index buffer.
    pub fn index_range(&self) -> std::ops::Range<u32> {
        self.first_index..self.first_index + self.num_indices
    }
}

/// Shared device-side geometry for every instance of a scene.
///
/// Positions and normals are parallel arrays. Buffer byte sizes may be padded
/// past the exact element counts to satisfy copy alignment.
#[derive(Debug, Default)]
pub struct SceneGeometry {
    pub indices: GpuResource<wgpu::Buffer>,
    pub positions: GpuResource<wgpu::Buffer>,
    pub normals: GpuResource<wgpu::Buffer>,
    pub index_count: u32,
    pub vertex_count: u32,
}

impl SceneGeometry {
    /// Borrow all three buffers, or `None` if any of them is absent.
    pub fn buffers(&self) -> Option<(&wgpu::Buffer, &wgpu::Buffer, &wgpu::Buffer)> {
        Some((
            self.indices.get()?,
            self.positions.get()?,
            self.normals.get()?,
        ))
    }

    /// Release every created buffer. Absent buffers are skipped.
    pub fn release(&mut self) -> Result<(), ResourceError> {
        for buffer in [&mut self.indices, &mut self.positions, &mut self.normals] {
            if buffer.is_created() {
                buffer.release()?;
            }
        }
        self.index_count = 0;
        self.vertex_count = 0;
        Ok(())
    }
}

/// Everything the frame orchestrator needs to draw one asset.
#[derive(Debug, Default)]
pub struct Scene {
    pub instances: Vec<MeshInstance>,
    pub geometry: Option<SceneGeometry>,
    /// Path the scene was loaded from.
    pub source: Option<PathBuf>,
}

impl Scene {
    /// An empty scene: nothing to draw, frames still clear and present.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() || self.geometry.is_none()
    }

    /// Swap in `next` and release the geometry of the scene it replaces.
    ///
    /// The swap itself cannot fail. A release error is logged; the old buffers
    /// are gone either way.
    pub fn replace(&mut self, next: Scene) {
        let mut previous = std::mem::replace(self, next);
        previous.release();
    }

    /// Release this scene's geometry, leaving it empty.
    pub fn release(&mut self) {
        if let Some(mut geometry) = self.geometry.take() {
            if let Err(e) = geometry.release() {
                log::error!("Releasing scene geometry failed: {e}");
            }
        }
        self.instances.clear();
    }
}

/// Indices into `instances` ordered back to front: farthest from `eye`
/// first.
///
/// The sort is stable over a total order, so instances at equal distance keep
/// their relative order from the instance list.
pub fn draw_order(instances: &[MeshInstance], eye: Vec3) -> Vec<usize> {
    let distances: Vec<f32> = instances.iter().map(|m| m.position.distance(eye)).collect();
    let mut order: Vec<usize> = (0..instances.len()).collect();
    order.sort_by(|&a, &b| distances[b].total_cmp(&distances[a]));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const EPS: f32 = 1e-5;

    fn at(x: f32) -> MeshInstance {
        MeshInstance {
            position: Vec3::new(x, 0.0, 0.0),
            ..Default::default()
        }
    }

    #[test]
    fn model_matrix_scales_then_translates() {
        let mesh = MeshInstance {
            position: Vec3::new(1.0, 0.0, 0.0),
            scale: Vec3::splat(2.0),
            ..Default::default()
        };
        let p = mesh.model_matrix().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(3.0, 0.0, 0.0), EPS));
    }

    #[test]
    fn model_matrix_rotates_before_scaling() {
        // Rotating X onto -Z first means the X-only scale leaves it alone.
        let mesh = MeshInstance {
            position: Vec3::new(0.0, 1.0, 0.0),
            scale: Vec3::new(4.0, 1.0, 1.0),
            rotation: Quat::from_rotation_y(FRAC_PI_2),
            ..Default::default()
        };
        let p = mesh.model_matrix().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(0.0, 1.0, -1.0), EPS));
    }

    #[test]
    fn index_range_spans_instance() {
        let mesh = MeshInstance {
            first_index: 6,
            num_indices: 3,
            ..Default::default()
        };
        assert_eq!(mesh.index_range(), 6..9);
    }

    #[test]
    fn draw_order_is_farthest_first() {
        let instances = [at(1.0), at(10.0), at(5.0)];
        assert_eq!(draw_order(&instances, Vec3::ZERO), vec![1, 2, 0]);
    }

    #[test]
    fn draw_order_ties_keep_list_order() {
        let instances = [at(2.0), at(-2.0), at(7.0), at(2.0)];
        assert_eq!(draw_order(&instances, Vec3::ZERO), vec![2, 0, 1, 3]);
    }

    #[test]
    fn draw_order_of_nothing_is_empty() {
        assert!(draw_order(&[], Vec3::ONE).is_empty());
    }

    #[test]
    fn empty_scene_has_nothing_to_draw() {
        let scene = Scene::empty();
        assert!(scene.is_empty());
        assert!(scene.source.is_none());
    }

    #[test]
    fn replace_swaps_whole_scene() {
        let mut scene = Scene {
            instances: vec![at(1.0)],
            geometry: None,
            source: Some(PathBuf::from("old.glb")),
        };
        scene.replace(Scene {
            instances: vec![at(2.0), at(3.0)],
            geometry: None,
            source: Some(PathBuf::from("new.gltf")),
        });
        assert_eq!(scene.instances.len(), 2);
        assert_eq!(scene.source.as_deref(), Some(std::path::Path::new("new.gltf")));
    }
}
