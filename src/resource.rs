//! Explicitly owned GPU objects.
//!
//! [`GpuResource`] wraps exactly one device-owned object (texture, sampler,
//! buffer, shader module or render pipeline) and gives it an explicit
//! lifecycle: it starts absent, becomes present through [`GpuResource::create`]
//! and goes back to absent through [`GpuResource::release`].
//!
//! Creation goes through wgpu error scopes, so a descriptor the device rejects
//! or a shader the backend fails to compile comes back as a [`ResourceError`]
//! instead of reaching the uncaptured error handler. A failed create never
//! touches the handle's previous contents.
//!
//! # Example
//!
//! ```ignore
//! use strata::GpuResource;
//!
//! let mut sampler = GpuResource::<wgpu::Sampler>::new();
//! sampler.create(&device, wgpu::SamplerDescriptor::default())?;
//! assert!(sampler.is_created());
//! sampler.release()?;
//! ```
//!
//! Releasing drops the wgpu handle rather than calling `destroy()`. wgpu keeps
//! the underlying object alive until every submission that references it has
//! finished, which is what lets a reload or resize release objects an
//! in-flight frame was recorded against.

use std::fmt;

use thiserror::Error;

/// Errors produced by the [`GpuResource`] lifecycle.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The device rejected the descriptor (validation or out-of-memory).
    #[error("creating {kind} failed: {reason}")]
    CreationFailed { kind: &'static str, reason: String },
    /// `release` was called on a handle that holds nothing.
    #[error("{kind} released without a successful create")]
    NotCreated { kind: &'static str },
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for wgpu::Texture {}
    impl Sealed for wgpu::Sampler {}
    impl Sealed for wgpu::Buffer {}
    impl Sealed for wgpu::ShaderModule {}
    impl Sealed for wgpu::RenderPipeline {}
}

/// The closed set of object kinds a [`GpuResource`] can own.
///
/// Each kind names its wgpu descriptor type and how the device builds one.
pub trait ResourceKind: sealed::Sealed + Sized {
    /// Human-readable kind name used in logs and errors.
    const NAME: &'static str;

    /// Descriptor consumed by [`GpuResource::create`].
    type Descriptor<'a>;

    /// Ask the device for a new object. Failures surface through error scopes.
    fn create_raw(device: &wgpu::Device, desc: Self::Descriptor<'_>) -> Self;
}

impl ResourceKind for wgpu::Texture {
    const NAME: &'static str = "Texture";
    type Descriptor<'a> = wgpu::TextureDescriptor<'a>;

    fn create_raw(device: &wgpu::Device, desc: Self::Descriptor<'_>) -> Self {
        device.create_texture(&desc)
    }
}

impl ResourceKind for wgpu::Sampler {
    const NAME: &'static str = "Sampler";
    type Descriptor<'a> = wgpu::SamplerDescriptor<'a>;

    fn create_raw(device: &wgpu::Device, desc: Self::Descriptor<'_>) -> Self {
        device.create_sampler(&desc)
    }
}

impl ResourceKind for wgpu::Buffer {
    const NAME: &'static str = "Buffer";
    type Descriptor<'a> = wgpu::BufferDescriptor<'a>;

    fn create_raw(device: &wgpu::Device, desc: Self::Descriptor<'_>) -> Self {
        device.create_buffer(&desc)
    }
}

impl ResourceKind for wgpu::ShaderModule {
    const NAME: &'static str = "Shader";
    type Descriptor<'a> = wgpu::ShaderModuleDescriptor<'a>;

    fn create_raw(device: &wgpu::Device, desc: Self::Descriptor<'_>) -> Self {
        device.create_shader_module(desc)
    }
}

impl ResourceKind for wgpu::RenderPipeline {
    const NAME: &'static str = "Graphics Pipeline";
    type Descriptor<'a> = wgpu::RenderPipelineDescriptor<'a>;

    fn create_raw(device: &wgpu::Device, desc: Self::Descriptor<'_>) -> Self {
        device.create_render_pipeline(&desc)
    }
}

/// Scopes pushed around every creation, outermost first. Backend shader and
/// pipeline compilation failures arrive as `Internal`.
const CAPTURED: [wgpu::ErrorFilter; 3] = [
    wgpu::ErrorFilter::Internal,
    wgpu::ErrorFilter::OutOfMemory,
    wgpu::ErrorFilter::Validation,
];

/// Run `f` inside validation, out-of-memory and internal error scopes.
///
/// Returns whatever `f` produced together with the first error the device
/// reported while it ran.
pub(crate) fn capture_errors<T>(
    device: &wgpu::Device,
    f: impl FnOnce() -> T,
) -> (T, Option<wgpu::Error>) {
    for filter in CAPTURED {
        device.push_error_scope(filter);
    }
    let value = f();
    let mut first = None;
    for _ in CAPTURED {
        let popped = pollster::block_on(device.pop_error_scope());
        first = first.or(popped);
    }
    (value, first)
}

/// Singular owner of one GPU object of kind `K`.
///
/// Not `Clone`: ownership of a created object moves only through
/// [`take`](Self::take).
pub struct GpuResource<K: ResourceKind> {
    raw: Option<K>,
}

impl<K: ResourceKind> GpuResource<K> {
    /// An absent handle.
    pub const fn new() -> Self {
        Self { raw: None }
    }

    /// Create the object from `desc`.
    ///
    /// On success any object previously held is released and replaced. On
    /// failure the handle keeps exactly what it held before the call.
    pub fn create(
        &mut self,
        device: &wgpu::Device,
        desc: K::Descriptor<'_>,
    ) -> Result<&K, ResourceError> {
        let (raw, error) = capture_errors(device, || K::create_raw(device, desc));
        if let Some(error) = error {
            log::error!("Creating {} - failed: {error}", K::NAME);
            return Err(ResourceError::CreationFailed {
                kind: K::NAME,
                reason: error.to_string(),
            });
        }

        if self.raw.take().is_some() {
            log::debug!("Replaced existing {}", K::NAME);
        }
        log::debug!("Creating {} - success", K::NAME);
        Ok(self.raw.insert(raw))
    }

    /// Release the held object.
    ///
    /// Calling this on an absent handle is an error: it is logged and
    /// reported, and the handle is left untouched.
    pub fn release(&mut self) -> Result<(), ResourceError> {
        match self.raw.take() {
            Some(raw) => {
                drop(raw);
                log::debug!("Released {}", K::NAME);
                Ok(())
            }
            None => {
                log::error!("Release of {} requested, but it was never created", K::NAME);
                Err(ResourceError::NotCreated { kind: K::NAME })
            }
        }
    }

    /// The held object, if any.
    pub fn get(&self) -> Option<&K> {
        self.raw.as_ref()
    }

    pub fn is_created(&self) -> bool {
        self.raw.is_some()
    }

    /// Move the held object out, leaving the handle absent.
    pub fn take(&mut self) -> Option<K> {
        self.raw.take()
    }
}

impl<K: ResourceKind> Default for GpuResource<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ResourceKind> fmt::Debug for GpuResource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuResource")
            .field("kind", &K::NAME)
            .field("created", &self.is_created())
            .finish()
    }
}

impl<K: ResourceKind> Drop for GpuResource<K> {
    fn drop(&mut self) {
        if self.raw.is_some() {
            log::warn!("{} dropped without an explicit release", K::NAME);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn texture_desc(width: u32, height: u32) -> wgpu::TextureDescriptor<'static> {
        wgpu::TextureDescriptor {
            label: Some("Test Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        }
    }

    #[test]
    fn release_without_create_reports_error() {
        let mut texture = GpuResource::<wgpu::Texture>::new();
        let err = texture.release().unwrap_err();
        assert!(matches!(err, ResourceError::NotCreated { kind: "Texture" }));
        assert!(!texture.is_created());
    }

    #[test]
    fn double_release_reports_error() {
        let Some((device, _queue)) = test_support::device() else {
            return;
        };
        let mut sampler = GpuResource::<wgpu::Sampler>::new();
        sampler
            .create(&device, wgpu::SamplerDescriptor::default())
            .unwrap();
        assert!(sampler.release().is_ok());
        assert!(matches!(
            sampler.release(),
            Err(ResourceError::NotCreated { .. })
        ));
    }

    #[test]
    fn second_create_replaces_first() {
        let Some((device, _queue)) = test_support::device() else {
            return;
        };
        let mut texture = GpuResource::<wgpu::Texture>::new();
        texture.create(&device, texture_desc(4, 4)).unwrap();
        texture.create(&device, texture_desc(8, 2)).unwrap();

        let held = texture.get().unwrap();
        assert_eq!((held.width(), held.height()), (8, 2));
        texture.release().unwrap();
    }

    #[test]
    fn failed_create_keeps_previous_handle() {
        let Some((device, _queue)) = test_support::device() else {
            return;
        };
        let mut texture = GpuResource::<wgpu::Texture>::new();
        texture.create(&device, texture_desc(16, 16)).unwrap();

        let result = texture.create(&device, texture_desc(0, 16));
        assert!(matches!(result, Err(ResourceError::CreationFailed { .. })));

        let held = texture.get().unwrap();
        assert_eq!(held.width(), 16);
        texture.release().unwrap();
    }

    #[test]
    fn rejected_shader_is_an_error_not_a_panic() {
        let Some((device, _queue)) = test_support::device() else {
            return;
        };
        let mut module = GpuResource::<wgpu::ShaderModule>::new();
        let result = module.create(
            &device,
            wgpu::ShaderModuleDescriptor {
                label: Some("Broken Shader"),
                source: wgpu::ShaderSource::Wgsl("@fragment fn main() -> vec4<f32> {".into()),
            },
        );
        assert!(matches!(
            result,
            Err(ResourceError::CreationFailed { kind: "Shader", .. })
        ));
        assert!(!module.is_created());
    }

    #[test]
    fn captures_internal_errors_too() {
        assert!(CAPTURED.contains(&wgpu::ErrorFilter::Internal));
        assert!(CAPTURED.contains(&wgpu::ErrorFilter::Validation));
        assert!(CAPTURED.contains(&wgpu::ErrorFilter::OutOfMemory));
    }

    #[test]
    fn take_transfers_ownership() {
        let Some((device, _queue)) = test_support::device() else {
            return;
        };
        let mut buffer = GpuResource::<wgpu::Buffer>::new();
        buffer
            .create(
                &device,
                wgpu::BufferDescriptor {
                    label: Some("Test Buffer"),
                    size: 64,
                    usage: wgpu::BufferUsages::VERTEX,
                    mapped_at_creation: false,
                },
            )
            .unwrap();

        let owned = buffer.take().unwrap();
        assert_eq!(owned.size(), 64);
        assert!(!buffer.is_created());
    }
}
