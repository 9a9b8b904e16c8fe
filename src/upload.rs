//! Moves planned geometry into device buffers.
//!
//! Every primitive gets its own mapped staging buffer holding its index
//! window, positions and normals. The staging contents are copied into the
//! shared destination buffers at the offsets the plan assigned. All copies are
//! recorded into one encoder and submitted once, and only after every staging
//! buffer was created successfully: an upload either lands completely or not
//! at all.
//!
//! wgpu copies must start and end on 4-byte boundaries. A primitive's 16-bit
//! index range generally does not, so each copy is widened to the enclosing
//! 4-byte window and filled from the packed index stream of the whole scene.
//! Neighbouring windows that overlap therefore write identical bytes.

use std::ops::Range;

use thiserror::Error;

use crate::asset::DecodedScene;
use crate::planner::{GeometryPlan, INDEX_SIZE, PrimitiveRegion};
use crate::resource::{GpuResource, ResourceError};
use crate::scene::SceneGeometry;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("allocating scene buffers failed: {0}")]
    Allocation(#[source] ResourceError),
    #[error("staging node {node} primitive {primitive} failed: {source}")]
    Staging {
        node: usize,
        primitive: usize,
        #[source]
        source: ResourceError,
    },
    #[error("planned node {node} primitive {primitive} is missing from the decoded scene")]
    PlanMismatch { node: usize, primitive: usize },
}

/// Round `bytes` up to the wgpu copy alignment.
pub fn align_copy(bytes: u64) -> u64 {
    bytes.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}

/// Byte range of the index buffer that has to be written to cover
/// `count` indices starting at element `first`, widened to 4-byte alignment.
pub fn index_window(first: u32, count: u32) -> Range<u64> {
    let start = u64::from(first) * INDEX_SIZE;
    let end = start + u64::from(count) * INDEX_SIZE;
    let start = start - start % wgpu::COPY_BUFFER_ALIGNMENT;
    start..align_copy(end)
}

/// The scene's complete index stream, rebased per node and padded to the
/// destination buffer's size.
pub fn packed_indices(scene: &DecodedScene, plan: &GeometryPlan) -> Result<Vec<u16>, UploadError> {
    let padded = align_copy(plan.totals.indices.bytes) / INDEX_SIZE;
    let mut packed = vec![0u16; padded as usize];
    for region in &plan.regions {
        let mismatch = UploadError::PlanMismatch {
            node: region.node,
            primitive: region.primitive,
        };
        let indices = match lookup(scene, region)?.indices.as_deref() {
            Some(indices) if indices.len() == region.size.indices.count as usize => indices,
            _ => return Err(mismatch),
        };
        let start = region.offset.indices.count as usize;
        for (slot, &index) in packed[start..start + indices.len()].iter_mut().zip(indices) {
            // The planner bounded every node to 16-bit addressable vertices.
            *slot = (index + region.index_bias) as u16;
        }
    }
    Ok(packed)
}

fn lookup<'a>(
    scene: &'a DecodedScene,
    region: &PrimitiveRegion,
) -> Result<&'a crate::asset::DecodedPrimitive, UploadError> {
    scene
        .nodes
        .get(region.node)
        .and_then(|node| node.primitives.as_ref())
        .and_then(|primitives| primitives.get(region.primitive))
        .ok_or(UploadError::PlanMismatch {
            node: region.node,
            primitive: region.primitive,
        })
}

fn destination(
    device: &wgpu::Device,
    buffer: &mut GpuResource<wgpu::Buffer>,
    label: &'static str,
    bytes: u64,
    usage: wgpu::BufferUsages,
) -> Result<(), UploadError> {
    buffer
        .create(
            device,
            wgpu::BufferDescriptor {
                label: Some(label),
                size: align_copy(bytes),
                usage: usage | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            },
        )
        .map(|_| ())
        .map_err(UploadError::Allocation)
}

/// Upload `scene` according to `plan`.
///
/// Returns `Ok(None)` when the plan holds no indices. On error nothing has
/// been submitted and every buffer created along the way has been released.
pub fn upload(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    scene: &DecodedScene,
    plan: &GeometryPlan,
) -> Result<Option<SceneGeometry>, UploadError> {
    if plan.totals.indices.count == 0 {
        log::info!("Scene has no drawable geometry");
        return Ok(None);
    }

    let mut geometry = SceneGeometry::default();
    match record(device, scene, plan, &mut geometry) {
        Ok(encoder) => {
            queue.submit(Some(encoder.finish()));
            geometry.index_count = plan.totals.indices.count;
            geometry.vertex_count = plan.totals.positions.count;
            log::info!(
                "Uploaded {} indices and {} vertices in {} primitives",
                geometry.index_count,
                geometry.vertex_count,
                plan.regions.len()
            );
            Ok(Some(geometry))
        }
        Err(e) => {
            if let Err(release) = geometry.release() {
                log::error!("Releasing partial scene geometry failed: {release}");
            }
            Err(e)
        }
    }
}

fn record(
    device: &wgpu::Device,
    scene: &DecodedScene,
    plan: &GeometryPlan,
    geometry: &mut SceneGeometry,
) -> Result<wgpu::CommandEncoder, UploadError> {
    let packed = packed_indices(scene, plan)?;
    let packed_bytes: &[u8] = bytemuck::cast_slice(&packed);

    let totals = plan.totals;
    let index_usage = wgpu::BufferUsages::INDEX;
    let vertex_usage = wgpu::BufferUsages::VERTEX;
    destination(device, &mut geometry.indices, "Scene Indices", totals.indices.bytes, index_usage)?;
    destination(
        device,
        &mut geometry.positions,
        "Scene Positions",
        totals.positions.bytes,
        vertex_usage,
    )?;
    destination(device, &mut geometry.normals, "Scene Normals", totals.normals.bytes, vertex_usage)?;
    let (index_buffer, position_buffer, normal_buffer) =
        geometry.buffers().ok_or(UploadError::Allocation(ResourceError::NotCreated {
            kind: "Buffer",
        }))?;

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Geometry Upload Encoder"),
    });

    for region in &plan.regions {
        let primitive = lookup(scene, region)?;
        let mismatch = || UploadError::PlanMismatch {
            node: region.node,
            primitive: region.primitive,
        };
        let positions = primitive.positions.as_deref().ok_or_else(mismatch)?;
        let normals = primitive.normals.as_deref().ok_or_else(mismatch)?;

        let window = index_window(region.offset.indices.count, region.size.indices.count);
        let window_len = window.end - window.start;
        let position_bytes: &[u8] = bytemuck::cast_slice(positions);
        let normal_bytes: &[u8] = bytemuck::cast_slice(normals);

        let mut contents =
            Vec::with_capacity(window_len as usize + position_bytes.len() + normal_bytes.len());
        contents.extend_from_slice(&packed_bytes[window.start as usize..window.end as usize]);
        contents.extend_from_slice(position_bytes);
        contents.extend_from_slice(normal_bytes);
        if contents.is_empty() {
            continue;
        }

        let mut staging = GpuResource::<wgpu::Buffer>::new();
        let buffer = staging
            .create(
                device,
                wgpu::BufferDescriptor {
                    label: Some("Geometry Staging"),
                    size: contents.len() as u64,
                    usage: wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: true,
                },
            )
            .map_err(|source| UploadError::Staging {
                node: region.node,
                primitive: region.primitive,
                source,
            })?;

        {
            let mut view = buffer.slice(..).get_mapped_range_mut();
            view.copy_from_slice(&contents);
        }
        buffer.unmap();

        let mut src = 0;
        for (dst, dst_offset, len) in [
            (index_buffer, window.start, window_len),
            (position_buffer, region.offset.positions.bytes, position_bytes.len() as u64),
            (normal_buffer, region.offset.normals.bytes, normal_bytes.len() as u64),
        ] {
            if len > 0 {
                encoder.copy_buffer_to_buffer(buffer, src, dst, dst_offset, len);
            }
            src += len;
        }

        // Dropped here; wgpu keeps it alive until the copies execute.
        staging.release().map_err(|source| UploadError::Staging {
            node: region.node,
            primitive: region.primitive,
            source,
        })?;
    }

    Ok(encoder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{DecodedNode, DecodedPrimitive};
    use crate::planner::plan_scene;
    use crate::test_support;
    use glam::{Quat, Vec3};

    fn mesh_node(primitives: Vec<DecodedPrimitive>) -> DecodedNode {
        DecodedNode {
            name: None,
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            primitives: Some(primitives),
        }
    }

    fn triangle() -> DecodedPrimitive {
        DecodedPrimitive::triangles(vec![0, 1, 2], vec![[0.0; 3]; 3], vec![[0.0, 0.0, 1.0]; 3])
    }

    #[test]
    fn aligned_window_is_unchanged() {
        assert_eq!(index_window(0, 2), 0..4);
        assert_eq!(index_window(4, 4), 8..16);
    }

    #[test]
    fn unaligned_window_is_widened_both_ways() {
        // Indices 3..6 occupy bytes 6..12.
        assert_eq!(index_window(3, 3), 4..12);
        // Indices 0..3 occupy bytes 0..6.
        assert_eq!(index_window(0, 3), 0..8);
    }

    #[test]
    fn empty_window_is_empty() {
        assert!(index_window(4, 0).is_empty());
    }

    #[test]
    fn packed_indices_rebase_within_node() {
        let scene = DecodedScene {
            nodes: vec![
                mesh_node(vec![triangle()]),
                mesh_node(vec![triangle(), triangle()]),
            ],
        };
        let plan = plan_scene(&scene).unwrap();
        let packed = packed_indices(&scene, &plan).unwrap();

        // 9 indices padded to 10 so the buffer is a whole number of words.
        assert_eq!(packed, vec![0, 1, 2, 0, 1, 2, 3, 4, 5, 0]);
    }

    #[test]
    fn plan_for_another_scene_is_a_mismatch() {
        let scene = DecodedScene {
            nodes: vec![mesh_node(vec![triangle(), triangle()])],
        };
        let plan = plan_scene(&scene).unwrap();
        let smaller = DecodedScene {
            nodes: vec![mesh_node(vec![triangle()])],
        };
        assert!(matches!(
            packed_indices(&smaller, &plan),
            Err(UploadError::PlanMismatch { node: 0, primitive: 1 })
        ));
    }

    #[test]
    fn empty_plan_uploads_nothing() {
        let Some((device, queue)) = test_support::device() else {
            return;
        };
        let scene = DecodedScene::default();
        let plan = plan_scene(&scene).unwrap();
        assert!(upload(&device, &queue, &scene, &plan).unwrap().is_none());
    }

    #[test]
    fn upload_sizes_buffers_from_totals() {
        let Some((device, queue)) = test_support::device() else {
            return;
        };
        let scene = DecodedScene {
            nodes: vec![mesh_node(vec![triangle()]), mesh_node(vec![triangle()])],
        };
        let plan = plan_scene(&scene).unwrap();
        let mut geometry = upload(&device, &queue, &scene, &plan).unwrap().unwrap();

        assert_eq!(geometry.index_count, 6);
        assert_eq!(geometry.vertex_count, 6);
        let (indices, positions, normals) = geometry.buffers().unwrap();
        assert_eq!(indices.size(), 12);
        assert_eq!(positions.size(), 72);
        assert_eq!(normals.size(), 72);
        geometry.release().unwrap();
    }

    #[test]
    fn uploaded_buffers_hold_rebased_stream() {
        let Some((device, queue)) = test_support::device() else {
            return;
        };
        let vertex = |i: u32| [i as f32, 0.0, 0.0];
        let normal = |i: u32| [0.0, i as f32, 1.0];
        let primitive = |indices: Vec<u32>, first: u32| {
            DecodedPrimitive::triangles(
                indices,
                (first..first + 3).map(vertex).collect(),
                (first..first + 3).map(normal).collect(),
            )
        };
        // Three-index primitives end on half words, so every window after the
        // first overlaps its neighbour.
        let scene = DecodedScene {
            nodes: vec![
                mesh_node(vec![primitive(vec![2, 1, 0], 0)]),
                mesh_node(vec![primitive(vec![0, 2, 1], 3), primitive(vec![1, 0, 2], 6)]),
                mesh_node(vec![primitive(vec![0, 1, 2], 9)]),
            ],
        };
        let plan = plan_scene(&scene).unwrap();
        let mut geometry = upload(&device, &queue, &scene, &plan).unwrap().unwrap();
        let (indices, positions, normals) = geometry.buffers().unwrap();

        let index_bytes = test_support::read_buffer(&device, &queue, indices);
        let index_stream: Vec<u16> = bytemuck::pod_collect_to_vec(&index_bytes);
        assert_eq!(index_stream, [2, 1, 0, 0, 2, 1, 4, 3, 5, 0, 1, 2]);

        let position_bytes = test_support::read_buffer(&device, &queue, positions);
        let normal_bytes = test_support::read_buffer(&device, &queue, normals);
        let expected_positions: Vec<[f32; 3]> = (0..12).map(vertex).collect();
        let expected_normals: Vec<[f32; 3]> = (0..12).map(normal).collect();
        let read_positions: Vec<[f32; 3]> = bytemuck::pod_collect_to_vec(&position_bytes);
        let read_normals: Vec<[f32; 3]> = bytemuck::pod_collect_to_vec(&normal_bytes);
        assert_eq!(read_positions, expected_positions);
        assert_eq!(read_normals, expected_normals);

        geometry.release().unwrap();
    }
}
