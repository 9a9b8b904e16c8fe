//! Shader loading with per-stage binding layouts.
//!
//! A shader is requested by name, e.g. `position_transform.vert`. The `.vert`
//! or `.frag` marker picks the stage; the library then searches
//! `<shader_dir>/<format>/<name>.<ext>` for every format the backend accepts,
//! in preference order, and compiles the first file it finds.
//!
//! Each stage owns one bind group: group 0 for the vertex stage, group 1 for
//! the fragment stage. Within a group, bindings are numbered in a fixed order:
//! sampled textures, samplers, storage textures, storage buffers, then uniform
//! buffers. Uniform buffers always take a dynamic offset so per-draw data can
//! live in slots of one buffer.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::resource::{GpuResource, ResourceError};

/// Entry point every shader file must export.
pub const ENTRY_POINT: &str = "main";

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader name {name:?} has no .vert or .frag stage marker")]
    UnknownStage { name: String },
    #[error("no shader file for {name:?}, searched {searched:?}")]
    NotFound { name: String, searched: Vec<PathBuf> },
    #[error("reading shader {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("compiling shader {name:?}: {source}")]
    Compile {
        name: String,
        #[source]
        source: ResourceError,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Infer the stage from a `.vert` / `.frag` marker anywhere in `name`.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.contains(".vert") {
            Some(Self::Vertex)
        } else if name.contains(".frag") {
            Some(Self::Fragment)
        } else {
            None
        }
    }

    /// Bind group index this stage's resources live in.
    pub fn group(self) -> u32 {
        match self {
            Self::Vertex => 0,
            Self::Fragment => 1,
        }
    }

    pub fn visibility(self) -> wgpu::ShaderStages {
        match self {
            Self::Vertex => wgpu::ShaderStages::VERTEX,
            Self::Fragment => wgpu::ShaderStages::FRAGMENT,
        }
    }
}

/// On-disk shader encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderFormat {
    SpirV,
    Wgsl,
}

impl ShaderFormat {
    /// Formats to try for `backend`, most preferred first.
    pub fn preferred_for(backend: wgpu::Backend) -> Vec<Self> {
        match backend {
            wgpu::Backend::Vulkan => vec![Self::SpirV, Self::Wgsl],
            _ => vec![Self::Wgsl],
        }
    }

    pub fn directory(self) -> &'static str {
        match self {
            Self::SpirV => "spirv",
            Self::Wgsl => "wgsl",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::SpirV => "spv",
            Self::Wgsl => "wgsl",
        }
    }
}

impl fmt::Display for ShaderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directory())
    }
}

/// Resource counts a shader stage declares.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderBindings {
    /// Sample type of each sampled texture, in binding order.
    pub textures: Vec<wgpu::TextureSampleType>,
    pub samplers: u32,
    pub storage_textures: u32,
    pub storage_buffers: u32,
    pub uniform_buffers: u32,
}

impl ShaderBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(mut self, sample_type: wgpu::TextureSampleType) -> Self {
        self.textures.push(sample_type);
        self
    }

    pub fn samplers(mut self, count: u32) -> Self {
        self.samplers = count;
        self
    }

    pub fn storage_textures(mut self, count: u32) -> Self {
        self.storage_textures = count;
        self
    }

    pub fn storage_buffers(mut self, count: u32) -> Self {
        self.storage_buffers = count;
        self
    }

    pub fn uniform_buffers(mut self, count: u32) -> Self {
        self.uniform_buffers = count;
        self
    }

    /// Layout entries for `stage`, numbered in the fixed binding order.
    pub fn layout_entries(&self, stage: ShaderStage) -> Vec<wgpu::BindGroupLayoutEntry> {
        let visibility = stage.visibility();
        let textures = self.textures.iter().map(|&sample_type| wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        });
        let samplers = (0..self.samplers)
            .map(|_| wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering));
        let storage_textures =
            (0..self.storage_textures).map(|_| wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::Rgba8Unorm,
                view_dimension: wgpu::TextureViewDimension::D2,
            });
        let storage_buffers = (0..self.storage_buffers).map(|_| wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        });
        let uniform_buffers = (0..self.uniform_buffers).map(|_| wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: None,
        });

        textures
            .chain(samplers)
            .chain(storage_textures)
            .chain(storage_buffers)
            .chain(uniform_buffers)
            .enumerate()
            .map(|(binding, ty)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility,
                ty,
                count: None,
            })
            .collect()
    }
}

/// What to load: a stage-marked name plus the stage's binding counts.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderRequest {
    pub name: String,
    pub bindings: ShaderBindings,
}

impl ShaderRequest {
    pub fn new(name: impl Into<String>, bindings: ShaderBindings) -> Self {
        Self {
            name: name.into(),
            bindings,
        }
    }
}

/// A compiled stage and the bind group layout it expects.
#[derive(Debug)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub module: GpuResource<wgpu::ShaderModule>,
    pub layout: wgpu::BindGroupLayout,
}

impl CompiledShader {
    /// Release the module. Pipelines built from it stay valid.
    pub fn release(mut self) -> Result<(), ResourceError> {
        self.module.release()
    }
}

/// Bind group layouts of `shaders` ordered so each sits at its stage's group
/// index, ready for a pipeline layout.
pub fn group_layouts<'a>(shaders: &[&'a CompiledShader]) -> Vec<&'a wgpu::BindGroupLayout> {
    let mut ordered = shaders.to_vec();
    ordered.sort_by_key(|shader| shader.stage.group());
    ordered.into_iter().map(|shader| &shader.layout).collect()
}

/// Finds and compiles shaders under one root directory.
#[derive(Clone, Debug)]
pub struct ShaderLibrary {
    root: PathBuf,
    formats: Vec<ShaderFormat>,
}

impl ShaderLibrary {
    pub fn new(root: impl Into<PathBuf>, formats: Vec<ShaderFormat>) -> Self {
        Self {
            root: root.into(),
            formats,
        }
    }

    /// A library accepting whatever `backend` can consume.
    pub fn for_backend(root: impl Into<PathBuf>, backend: wgpu::Backend) -> Self {
        Self::new(root, ShaderFormat::preferred_for(backend))
    }

    /// Locate the file for `name`: the first supported format that exists.
    pub fn resolve(&self, name: &str) -> Result<(ShaderFormat, PathBuf), ShaderError> {
        let searched: Vec<(ShaderFormat, PathBuf)> = self
            .formats
            .iter()
            .map(|&format| {
                let file = format!("{name}.{}", format.extension());
                (format, self.root.join(format.directory()).join(file))
            })
            .collect();

        if let Some(found) = searched.iter().find(|(_, path)| path.is_file()) {
            return Ok(found.clone());
        }
        Err(ShaderError::NotFound {
            name: name.to_owned(),
            searched: searched.into_iter().map(|(_, path)| path).collect(),
        })
    }

    /// Load, compile and lay out one shader stage.
    pub fn load(
        &self,
        device: &wgpu::Device,
        request: &ShaderRequest,
    ) -> Result<CompiledShader, ShaderError> {
        let name = request.name.as_str();
        let stage = ShaderStage::from_name(name).ok_or_else(|| ShaderError::UnknownStage {
            name: name.to_owned(),
        })?;
        let (format, path) = self.resolve(name)?;
        log::debug!("Loading {format} shader {}", path.display());

        let io = |source| ShaderError::Io {
            path: path.clone(),
            source,
        };
        let mut module = GpuResource::<wgpu::ShaderModule>::new();
        let compiled = match format {
            ShaderFormat::Wgsl => {
                let text = std::fs::read_to_string(&path).map_err(io)?;
                module.create(
                    device,
                    wgpu::ShaderModuleDescriptor {
                        label: Some(name),
                        source: wgpu::ShaderSource::Wgsl(Cow::Owned(text)),
                    },
                )
            }
            ShaderFormat::SpirV => {
                let bytes = std::fs::read(&path).map_err(io)?;
                module.create(
                    device,
                    wgpu::ShaderModuleDescriptor {
                        label: Some(name),
                        source: wgpu::util::make_spirv(&bytes),
                    },
                )
            }
        };
        compiled.map_err(|source| ShaderError::Compile {
            name: name.to_owned(),
            source,
        })?;

        let entries = request.bindings.layout_entries(stage);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(name),
            entries: &entries,
        });

        Ok(CompiledShader {
            stage,
            module,
            layout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use crate::test_support;

    fn shader_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders")
    }

    #[test]
    fn stage_comes_from_marker() {
        assert_eq!(
            ShaderStage::from_name("position_transform.vert"),
            Some(ShaderStage::Vertex)
        );
        assert_eq!(
            ShaderStage::from_name("depth_outline.frag"),
            Some(ShaderStage::Fragment)
        );
        assert_eq!(ShaderStage::from_name("depth_outline"), None);
    }

    #[test]
    fn stages_use_separate_groups() {
        assert_eq!(ShaderStage::Vertex.group(), 0);
        assert_eq!(ShaderStage::Fragment.group(), 1);
    }

    #[test]
    fn vulkan_prefers_spirv() {
        assert_eq!(
            ShaderFormat::preferred_for(wgpu::Backend::Vulkan),
            vec![ShaderFormat::SpirV, ShaderFormat::Wgsl]
        );
        assert_eq!(
            ShaderFormat::preferred_for(wgpu::Backend::Metal),
            vec![ShaderFormat::Wgsl]
        );
    }

    #[test]
    fn bindings_follow_fixed_order() {
        let bindings = ShaderBindings::new()
            .texture(wgpu::TextureSampleType::Depth)
            .samplers(1)
            .storage_buffers(1)
            .uniform_buffers(2);
        let entries = bindings.layout_entries(ShaderStage::Fragment);

        assert_eq!(entries.len(), 5);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.binding, i as u32);
            assert_eq!(entry.visibility, wgpu::ShaderStages::FRAGMENT);
        }
        assert!(matches!(entries[0].ty, wgpu::BindingType::Texture { .. }));
        assert!(matches!(entries[1].ty, wgpu::BindingType::Sampler(_)));
        assert!(matches!(
            entries[2].ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { .. },
                ..
            }
        ));
        assert!(matches!(
            entries[4].ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                ..
            }
        ));
    }

    #[test]
    fn empty_bindings_make_empty_layout() {
        assert!(ShaderBindings::new().layout_entries(ShaderStage::Vertex).is_empty());
    }

    #[test]
    fn resolve_falls_back_to_wgsl() {
        let library = ShaderLibrary::for_backend(shader_root(), wgpu::Backend::Vulkan);
        let (format, path) = library.resolve("fullscreen.vert").unwrap();
        assert_eq!(format, ShaderFormat::Wgsl);
        assert!(path.ends_with("wgsl/fullscreen.vert.wgsl"));
    }

    #[test]
    fn resolve_reports_every_searched_path() {
        let library = ShaderLibrary::for_backend(shader_root(), wgpu::Backend::Vulkan);
        match library.resolve("missing.frag") {
            Err(ShaderError::NotFound { searched, .. }) => assert_eq!(searched.len(), 2),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn unmarked_name_is_rejected_before_io() {
        let Some((device, _queue)) = test_support::device() else {
            return;
        };
        let library = ShaderLibrary::new(shader_root(), vec![ShaderFormat::Wgsl]);
        let err = library
            .load(&device, &ShaderRequest::new("fullscreen", ShaderBindings::new()))
            .unwrap_err();
        assert!(matches!(err, ShaderError::UnknownStage { .. }));
    }

    #[test]
    fn bundled_shaders_compile() {
        let Some((device, _queue)) = test_support::device() else {
            return;
        };
        let library = ShaderLibrary::new(shader_root(), vec![ShaderFormat::Wgsl]);
        for name in [
            "position_transform.vert",
            "solid_color_depth.frag",
            "fullscreen.vert",
            "depth_outline.frag",
        ] {
            let shader = library
                .load(&device, &ShaderRequest::new(name, ShaderBindings::new()))
                .unwrap_or_else(|e| panic!("{name}: {e}"));
            shader.release().unwrap();
        }
    }

    #[test]
    fn layouts_are_ordered_by_stage_group() {
        let Some((device, _queue)) = test_support::device() else {
            return;
        };
        let library = ShaderLibrary::new(shader_root(), vec![ShaderFormat::Wgsl]);
        let vertex = library
            .load(&device, &ShaderRequest::new("fullscreen.vert", ShaderBindings::new()))
            .unwrap();
        let fragment = library
            .load(&device, &ShaderRequest::new("depth_outline.frag", ShaderBindings::new()))
            .unwrap();
        assert_eq!(vertex.stage, ShaderStage::Vertex);
        assert_eq!(fragment.stage, ShaderStage::Fragment);

        let layouts = group_layouts(&[&fragment, &vertex]);
        assert!(std::ptr::eq(layouts[0], &vertex.layout));
        assert!(std::ptr::eq(layouts[1], &fragment.layout));

        vertex.release().unwrap();
        fragment.release().unwrap();
    }
}
