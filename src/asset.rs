//! glTF decoding into a flat, renderer-neutral node list.
//!
//! The decoder walks the default scene depth-first (parents before children,
//! children in document order) and records every visited node with its
//! world-space transform decomposed into translation, rotation and scale.
//! Nodes without a mesh are kept as transform containers with no primitives.

use std::path::{Path, PathBuf};

use glam::{Mat4, Quat, Vec3};
use gltf::mesh::Mode;
use thiserror::Error;

/// Errors produced while turning a file into a [`DecodedScene`].
#[derive(Debug, Error)]
pub enum AssetError {
    /// The file could not be found or opened.
    #[error("invalid path {}: {source}", path.display())]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: gltf::Error,
    },
    /// The file was read but its contents are not a valid glTF asset.
    #[error("invalid glTF data in {}: {source}", path.display())]
    InvalidData {
        path: PathBuf,
        #[source]
        source: gltf::Error,
    },
    /// The path does not end in `.gltf` or `.glb`.
    #[error("unsupported asset extension: {}", path.display())]
    UnsupportedExtension { path: PathBuf },
    #[error("failed to load {}: {source}", path.display())]
    Other {
        path: PathBuf,
        #[source]
        source: gltf::Error,
    },
}

impl AssetError {
    fn classify(path: &Path, source: gltf::Error) -> Self {
        let path = path.to_path_buf();
        match source {
            gltf::Error::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::InvalidPath { path, source }
            }
            gltf::Error::Io(ref e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Self::InvalidPath { path, source }
            }
            gltf::Error::Deserialize(_)
            | gltf::Error::Validation(_)
            | gltf::Error::Binary(_)
            | gltf::Error::MissingBlob
            | gltf::Error::BufferLength { .. } => Self::InvalidData { path, source },
            _ => Self::Other { path, source },
        }
    }
}

/// One primitive as stored in the asset. Attribute streams are optional;
/// deciding what a missing stream means is left to the planner.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedPrimitive {
    pub mode: Mode,
    pub indices: Option<Vec<u32>>,
    pub positions: Option<Vec<[f32; 3]>>,
    pub normals: Option<Vec<[f32; 3]>>,
}

impl DecodedPrimitive {
    /// An indexed triangle list.
    pub fn triangles(indices: Vec<u32>, positions: Vec<[f32; 3]>, normals: Vec<[f32; 3]>) -> Self {
        Self {
            mode: Mode::Triangles,
            indices: Some(indices),
            positions: Some(positions),
            normals: Some(normals),
        }
    }
}

/// A visited node with its world transform.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedNode {
    pub name: Option<String>,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    /// `None` for nodes without a mesh.
    pub primitives: Option<Vec<DecodedPrimitive>>,
}

/// Every node of one glTF scene in traversal order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedScene {
    pub nodes: Vec<DecodedNode>,
}

/// Returns true if `path` names a `.gltf` or `.glb` file.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gltf") || ext.eq_ignore_ascii_case("glb"))
}

/// Decode the asset at `path`. External buffers resolve relative to the
/// file's directory.
pub fn load(path: &Path) -> Result<DecodedScene, AssetError> {
    if !is_supported(path) {
        return Err(AssetError::UnsupportedExtension {
            path: path.to_path_buf(),
        });
    }
    log::info!("Loading glTF file: {}", path.display());

    let gltf = gltf::Gltf::open(path).map_err(|e| AssetError::classify(path, e))?;
    let base = path.parent();
    let buffers = gltf::import_buffers(&gltf.document, base, gltf.blob)
        .map_err(|e| AssetError::classify(path, e))?;
    Ok(decode_document(&gltf.document, &buffers))
}

/// Decode an in-memory `.glb` or self-contained `.gltf`.
pub fn load_slice(bytes: &[u8]) -> Result<DecodedScene, AssetError> {
    let origin = Path::new("<memory>");
    let gltf = gltf::Gltf::from_slice(bytes).map_err(|e| AssetError::classify(origin, e))?;
    let buffers = gltf::import_buffers(&gltf.document, None, gltf.blob)
        .map_err(|e| AssetError::classify(origin, e))?;
    Ok(decode_document(&gltf.document, &buffers))
}

fn decode_document(document: &gltf::Document, buffers: &[gltf::buffer::Data]) -> DecodedScene {
    let Some(scene) = document.default_scene().or_else(|| document.scenes().next()) else {
        log::warn!("glTF document has no scenes");
        return DecodedScene::default();
    };

    let mut visited = vec![false; document.nodes().len()];
    let mut nodes = Vec::new();
    // Reversed so the first root is popped first.
    let roots: Vec<_> = scene.nodes().collect();
    let mut stack: Vec<(gltf::Node, Option<Mat4>)> =
        roots.into_iter().rev().map(|node| (node, None)).collect();

    while let Some((node, parent)) = stack.pop() {
        if std::mem::replace(&mut visited[node.index()], true) {
            log::warn!("Node {} reached twice, skipping", node.index());
            continue;
        }

        let (translation, rotation, scale, world) = match parent {
            None => {
                let (t, r, s) = node.transform().decomposed();
                let world = Mat4::from_cols_array_2d(&node.transform().matrix());
                (Vec3::from(t), Quat::from_array(r), Vec3::from(s), world)
            }
            Some(parent) => {
                let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
                let (s, r, t) = world.to_scale_rotation_translation();
                (t, r, s, world)
            }
        };

        let primitives = node
            .mesh()
            .map(|mesh| mesh.primitives().map(|p| decode_primitive(&p, buffers)).collect());

        nodes.push(DecodedNode {
            name: node.name().map(str::to_owned),
            translation,
            rotation,
            scale,
            primitives,
        });

        let children: Vec<_> = node.children().collect();
        stack.extend(children.into_iter().rev().map(|child| (child, Some(world))));
    }

    DecodedScene { nodes }
}

fn decode_primitive(primitive: &gltf::Primitive, buffers: &[gltf::buffer::Data]) -> DecodedPrimitive {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));
    DecodedPrimitive {
        mode: primitive.mode(),
        indices: reader.read_indices().map(|i| i.into_u32().collect()),
        positions: reader.read_positions().map(|p| p.collect()),
        normals: reader.read_normals().map(|n| n.collect()),
    }
}
