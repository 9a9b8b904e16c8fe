//! Device and swapchain session.
//!
//! [`Session`] owns everything tied to the window's GPU connection: the
//! surface, the logical device and queue, the surface configuration and the
//! offscreen [`RenderTargets`]. It is created once at startup and torn down
//! with [`Session::shutdown`] before the event loop exits.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(window, wgpu::PresentMode::Fifo)?;
//! session.capture_mouse()?;
//! session.create_targets()?;
//!
//! // On window resize
//! session.resize(new_width, new_height)?;
//! ```

use std::sync::Arc;

use winit::window::{CursorGrabMode, Window};

use crate::error::StartupError;
use crate::render_target::RenderTargets;
use crate::resource::ResourceError;

/// Recreate `targets` at the new size, then apply it to `config` and hand
/// that to `configure`. A failed allocation leaves both at the old size.
fn resize_targets_first(
    device: &wgpu::Device,
    targets: &mut RenderTargets,
    config: &mut wgpu::SurfaceConfiguration,
    (width, height): (u32, u32),
    configure: impl FnOnce(&wgpu::SurfaceConfiguration),
) -> Result<(), ResourceError> {
    if width == 0 || height == 0 {
        return Ok(());
    }
    targets.resize(device, width, height)?;
    config.width = width;
    config.height = height;
    configure(config);
    Ok(())
}

/// Pick the swapchain format. Linear formats are preferred so the offscreen
/// color values reach the screen unchanged.
pub(crate) fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .find(|f| !f.is_srgb())
        .or_else(|| formats.first())
        .copied()
}

/// GPU state bound to one window.
pub struct Session {
    pub window: Arc<Window>,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Current surface configuration (format, size, present mode).
    pub config: wgpu::SurfaceConfiguration,
    /// Backend the adapter runs on. Decides which shader formats load.
    pub backend: wgpu::Backend,
    pub targets: RenderTargets,
}

impl Session {
    /// Create the device for `window` and bind its surface.
    ///
    /// Render targets are not allocated yet; see [`create_targets`].
    ///
    /// [`create_targets`]: Session::create_targets
    pub fn new(window: Arc<Window>, present_mode: wgpu::PresentMode) -> Result<Self, StartupError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))?;
        let info = adapter.get_info();
        log::info!("Using {} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Strata Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format =
            choose_surface_format(&surface_caps.formats).ok_or(StartupError::SurfaceUnsupported)?;
        let present_mode = if surface_caps.present_modes.contains(&present_mode) {
            present_mode
        } else {
            log::warn!("Present mode {present_mode:?} unsupported, falling back to Fifo");
            wgpu::PresentMode::Fifo
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::debug!("Surface configured: {format:?} {}x{}", config.width, config.height);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            backend: info.backend,
            targets: RenderTargets::new(),
        })
    }

    /// Lock the cursor to the window and hide it, for relative mouse look.
    ///
    /// Falls back to confining the cursor where locking is unsupported.
    pub fn capture_mouse(&self) -> Result<(), StartupError> {
        self.window
            .set_cursor_grab(CursorGrabMode::Locked)
            .or_else(|_| self.window.set_cursor_grab(CursorGrabMode::Confined))
            .map_err(StartupError::MouseCapture)?;
        self.window.set_cursor_visible(false);
        Ok(())
    }

    /// Allocate the offscreen pair at the current surface size.
    pub fn create_targets(&mut self) -> Result<(), ResourceError> {
        self.targets
            .resize(&self.device, self.config.width, self.config.height)
    }

    /// Resize the surface and recreate the offscreen pair.
    ///
    /// Zero sizes are ignored (minimized window).
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), ResourceError> {
        let (surface, device) = (&self.surface, &self.device);
        resize_targets_first(
            device,
            &mut self.targets,
            &mut self.config,
            (width, height),
            |config| surface.configure(device, config),
        )
    }

    /// Reapply the current configuration after the surface was lost or
    /// became outdated.
    pub fn reconfigure(&self) {
        if self.config.width > 0 && self.config.height > 0 {
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Release the offscreen pair.
    pub fn shutdown(&mut self) {
        if self.targets.is_created() {
            if let Err(e) = self.targets.release() {
                log::error!("Releasing render targets failed: {e}");
            }
        }
    }
}
