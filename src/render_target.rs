//! The offscreen color and depth targets the geometry pass renders into.

use crate::resource::{GpuResource, ResourceError};

/// Format of the offscreen color target.
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
/// Format of the offscreen depth target.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// A color and depth texture of identical size.
///
/// Both textures are rendered to by the geometry pass and sampled by the
/// outline pass. They are only ever replaced as a pair: [`resize`] builds a
/// complete new pair before the old one is released, so a failed resize
/// leaves the previous pair in place.
///
/// [`resize`]: RenderTargets::resize
#[derive(Debug, Default)]
pub struct RenderTargets {
    color: GpuResource<wgpu::Texture>,
    depth: GpuResource<wgpu::Texture>,
    views: Option<(wgpu::TextureView, wgpu::TextureView)>,
    size: (u32, u32),
}

fn descriptor(
    label: &'static str,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
) -> wgpu::TextureDescriptor<'static> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    }
}

impl RenderTargets {
    /// An empty pair. Call [`resize`](Self::resize) to allocate it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recreate both targets at `width` x `height`.
    ///
    /// Zero sizes are ignored (minimized window). Calling this with the
    /// current size still rebuilds the pair.
    pub fn resize(
        &mut self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> Result<(), ResourceError> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring zero-sized render target resize {width}x{height}");
            return Ok(());
        }

        let mut color = GpuResource::<wgpu::Texture>::new();
        color.create(device, descriptor("Offscreen Color", COLOR_FORMAT, width, height))?;
        let mut depth = GpuResource::<wgpu::Texture>::new();
        let depth_desc = descriptor("Offscreen Depth", DEPTH_FORMAT, width, height);
        if let Err(e) = depth.create(device, depth_desc) {
            color.release()?;
            return Err(e);
        }

        let views = match (color.get(), depth.get()) {
            (Some(c), Some(d)) => (
                c.create_view(&wgpu::TextureViewDescriptor::default()),
                d.create_view(&wgpu::TextureViewDescriptor::default()),
            ),
            _ => return Err(ResourceError::NotCreated { kind: "Texture" }),
        };

        self.release_textures()?;
        self.color = color;
        self.depth = depth;
        self.views = Some(views);
        self.size = (width, height);
        log::debug!("Render targets resized to {width}x{height}");
        Ok(())
    }

    /// Color and depth views, if the pair exists.
    pub fn views(&self) -> Option<(&wgpu::TextureView, &wgpu::TextureView)> {
        self.views.as_ref().map(|(c, d)| (c, d))
    }

    pub fn color(&self) -> Option<&wgpu::Texture> {
        self.color.get()
    }

    pub fn depth(&self) -> Option<&wgpu::Texture> {
        self.depth.get()
    }

    pub fn is_created(&self) -> bool {
        self.views.is_some()
    }

    /// Size of the current pair, `(0, 0)` before the first resize.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Size of one texel in UV units.
    pub fn texel_size(&self) -> [f32; 2] {
        let (w, h) = self.size;
        [1.0 / w.max(1) as f32, 1.0 / h.max(1) as f32]
    }

    /// Release both targets.
    pub fn release(&mut self) -> Result<(), ResourceError> {
        if !self.is_created() {
            log::error!("Render targets released before they were created");
            return Err(ResourceError::NotCreated { kind: "Texture" });
        }
        self.release_textures()
    }

    fn release_textures(&mut self) -> Result<(), ResourceError> {
        self.views = None;
        for texture in [&mut self.color, &mut self.depth] {
            if texture.is_created() {
                texture.release()?;
            }
        }
        self.size = (0, 0);
        Ok(())
    }
}
