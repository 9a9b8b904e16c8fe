//! Sizing and placement of scene geometry before anything touches the GPU.
//!
//! Planning runs in two steps over a [`DecodedScene`]:
//!
//! 1. [`measure`] visits every node and records how many indices, positions
//!    and normals each usable primitive contributes. All validation happens
//!    here, so an unusable asset is rejected before any allocation.
//! 2. [`plan`] is a pure prefix-sum over those records. It assigns each mesh
//!    node its [`MeshInstance`] and each primitive its destination
//!    [`PrimitiveRegion`], and totals the buffer sizes.
//!
//! Indices stay 16-bit on the device. Each node's indices are rebased so they
//! are relative to the node's first vertex, which means a single node may
//! reference at most 65536 vertices while the scene as a whole may hold more.

use std::ops::AddAssign;

use glam::{Quat, Vec3};
use gltf::mesh::Mode;
use thiserror::Error;

use crate::asset::{DecodedPrimitive, DecodedScene};
use crate::scene::MeshInstance;

/// Bytes per device index.
pub const INDEX_SIZE: u64 = std::mem::size_of::<u16>() as u64;
/// Bytes per position or normal.
pub const VERTEX_ATTRIBUTE_SIZE: u64 = std::mem::size_of::<[f32; 3]>() as u64;
/// Largest vertex count a single node may reference with 16-bit indices.
pub const MAX_NODE_VERTICES: u64 = u16::MAX as u64 + 1;

/// Asset content the renderer cannot draw. Rejects the whole asset.
#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("node {node} primitive {primitive} has no indices")]
    MissingIndices { node: usize, primitive: usize },
    #[error("node {node} primitive {primitive} has no {attribute} attribute")]
    MissingAttribute {
        node: usize,
        primitive: usize,
        attribute: &'static str,
    },
    #[error(
        "node {node} primitive {primitive} has {normals} normals for {positions} positions"
    )]
    NormalCountMismatch {
        node: usize,
        primitive: usize,
        positions: usize,
        normals: usize,
    },
    #[error("node {node} primitive {primitive} references vertex {index} of {vertices}")]
    IndexOutOfRange {
        node: usize,
        primitive: usize,
        index: u32,
        vertices: usize,
    },
    #[error("node {node} has {vertices} vertices, more than 16-bit indices can address")]
    TooManyVertices { node: usize, vertices: u64 },
    #[error("scene holds more than {} elements in one stream", u32::MAX)]
    TooLarge,
}

/// Size of one attribute stream: bytes on the device and element count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryCounts {
    pub bytes: u64,
    pub count: u32,
}

impl GeometryCounts {
    fn of(count: usize, element_size: u64) -> Result<Self, PlanError> {
        let count = u32::try_from(count).map_err(|_| PlanError::TooLarge)?;
        Ok(Self {
            bytes: u64::from(count) * element_size,
            count,
        })
    }
}

impl AddAssign for GeometryCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.bytes += rhs.bytes;
        self.count += rhs.count;
    }
}

/// Index, position and normal counts for one primitive, node or scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrimitiveCounts {
    pub indices: GeometryCounts,
    pub positions: GeometryCounts,
    pub normals: GeometryCounts,
}

impl AddAssign for PrimitiveCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.indices += rhs.indices;
        self.positions += rhs.positions;
        self.normals += rhs.normals;
    }
}

/// A primitive that will be uploaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrimitiveRecord {
    /// Position of the primitive within its node's primitive list.
    pub primitive: usize,
    pub counts: PrimitiveCounts,
}

/// A mesh node and the primitives it contributes.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRecord {
    /// Position of the node within [`DecodedScene::nodes`].
    pub node: usize,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub primitives: Vec<PrimitiveRecord>,
}

/// Where one primitive lands in the shared buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrimitiveRegion {
    pub node: usize,
    pub primitive: usize,
    /// Destination offsets (bytes and elements) in each stream.
    pub offset: PrimitiveCounts,
    pub size: PrimitiveCounts,
    /// Added to every index so it is relative to the node's first vertex.
    pub index_bias: u32,
}

/// Everything the uploader needs: instances to draw, where each primitive
/// goes, and how large the buffers must be.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeometryPlan {
    pub instances: Vec<MeshInstance>,
    pub regions: Vec<PrimitiveRegion>,
    pub totals: PrimitiveCounts,
}

/// Validate and measure every node of `scene`.
///
/// Returns one record per node that has a mesh, in traversal order.
/// Non-triangle-list primitives are logged and skipped.
pub fn measure(scene: &DecodedScene) -> Result<Vec<NodeRecord>, PlanError> {
    let mut records = Vec::new();
    for (node_index, node) in scene.nodes.iter().enumerate() {
        let Some(primitives) = &node.primitives else {
            continue;
        };

        let mut kept = Vec::with_capacity(primitives.len());
        let mut node_vertices = 0u64;
        for (primitive_index, primitive) in primitives.iter().enumerate() {
            if primitive.mode != Mode::Triangles {
                log::warn!(
                    "Node {node_index} primitive {primitive_index}: {:?} primitives are not supported, skipping",
                    primitive.mode
                );
                continue;
            }
            let counts = measure_primitive(node_index, primitive_index, primitive)?;
            node_vertices += u64::from(counts.positions.count);
            kept.push(PrimitiveRecord {
                primitive: primitive_index,
                counts,
            });
        }

        if node_vertices > MAX_NODE_VERTICES {
            return Err(PlanError::TooManyVertices {
                node: node_index,
                vertices: node_vertices,
            });
        }

        records.push(NodeRecord {
            node: node_index,
            translation: node.translation,
            rotation: node.rotation,
            scale: node.scale,
            primitives: kept,
        });
    }
    Ok(records)
}

fn measure_primitive(
    node: usize,
    primitive: usize,
    data: &DecodedPrimitive,
) -> Result<PrimitiveCounts, PlanError> {
    let indices = data
        .indices
        .as_ref()
        .ok_or(PlanError::MissingIndices { node, primitive })?;
    let positions = data.positions.as_ref().ok_or(PlanError::MissingAttribute {
        node,
        primitive,
        attribute: "POSITION",
    })?;
    let normals = data.normals.as_ref().ok_or(PlanError::MissingAttribute {
        node,
        primitive,
        attribute: "NORMAL",
    })?;

    if normals.len() != positions.len() {
        return Err(PlanError::NormalCountMismatch {
            node,
            primitive,
            positions: positions.len(),
            normals: normals.len(),
        });
    }
    if let Some(&index) = indices.iter().find(|&&i| i as usize >= positions.len()) {
        return Err(PlanError::IndexOutOfRange {
            node,
            primitive,
            index,
            vertices: positions.len(),
        });
    }

    Ok(PrimitiveCounts {
        indices: GeometryCounts::of(indices.len(), INDEX_SIZE)?,
        positions: GeometryCounts::of(positions.len(), VERTEX_ATTRIBUTE_SIZE)?,
        normals: GeometryCounts::of(normals.len(), VERTEX_ATTRIBUTE_SIZE)?,
    })
}

/// Lay out measured records back to back.
pub fn plan(records: &[NodeRecord]) -> Result<GeometryPlan, PlanError> {
    let mut out = GeometryPlan::default();
    for record in records {
        let node_start = out.totals;
        for primitive in &record.primitives {
            out.regions.push(PrimitiveRegion {
                node: record.node,
                primitive: primitive.primitive,
                offset: out.totals,
                size: primitive.counts,
                index_bias: out.totals.positions.count - node_start.positions.count,
            });
            let next = u64::from(out.totals.positions.count)
                + u64::from(primitive.counts.positions.count);
            let next_index = u64::from(out.totals.indices.count)
                + u64::from(primitive.counts.indices.count);
            if next > u64::from(u32::MAX) || next_index > u64::from(u32::MAX) {
                return Err(PlanError::TooLarge);
            }
            out.totals += primitive.counts;
        }

        let base_vertex =
            i32::try_from(node_start.positions.count).map_err(|_| PlanError::TooLarge)?;
        out.instances.push(MeshInstance {
            position: record.translation,
            scale: record.scale,
            rotation: record.rotation,
            num_indices: out.totals.indices.count - node_start.indices.count,
            first_index: node_start.indices.count,
            base_vertex,
        });
    }
    Ok(out)
}

/// [`measure`] followed by [`plan`].
pub fn plan_scene(scene: &DecodedScene) -> Result<GeometryPlan, PlanError> {
    plan(&measure(scene)?)
}
