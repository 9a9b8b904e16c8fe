//! Per-frame orchestration of the two passes.
//!
//! A frame walks `Idle -> FrameBegin -> GeometryPass -> Present -> Idle`.
//! Any failing step moves the orchestrator to [`FrameState::Failed`] and the
//! error is handed back to the caller, which decides whether it is fatal
//! ([`FrameError::is_fatal`]). `Failed` lasts until the next frame begins.
//!
//! Acquiring the swapchain image is the only blocking point, and it happens
//! after the geometry pass is recorded so the CPU work overlaps the wait.

use thiserror::Error;

use crate::camera::Camera;
use crate::error::StartupError;
use crate::geometry_pass::GeometryPass;
use crate::gpu::Session;
use crate::outline_pass::{OutlinePass, OutlineUniforms};
use crate::resource::ResourceError;
use crate::scene::{Scene, draw_order};
use crate::shader::ShaderLibrary;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    FrameBegin,
    GeometryPass,
    Present,
    Failed,
}

impl FrameState {
    /// The state a successful step leads to.
    pub fn advance(self) -> Self {
        match self {
            Self::Idle | Self::Failed => Self::FrameBegin,
            Self::FrameBegin => Self::GeometryPass,
            Self::GeometryPass => Self::Present,
            Self::Present => Self::Idle,
        }
    }
}

/// What to do about a surface acquisition failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceAction {
    /// Reconfigure the surface, then skip this frame.
    Reconfigure,
    /// Skip this frame and try again next time.
    Skip,
    /// Stop rendering.
    Fatal,
}

pub fn classify_surface_error(error: &wgpu::SurfaceError) -> SurfaceAction {
    match error {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => SurfaceAction::Reconfigure,
        wgpu::SurfaceError::OutOfMemory => SurfaceAction::Fatal,
        _ => SurfaceAction::Skip,
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("offscreen render targets are missing")]
    MissingTargets,
    #[error("acquiring the swapchain image failed")]
    Surface(#[source] wgpu::SurfaceError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl FrameError {
    /// Whether rendering cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Surface(e) => classify_surface_error(e) == SurfaceAction::Fatal,
            Self::MissingTargets | Self::Resource(_) => false,
        }
    }
}

/// Owns both pass pipelines and drives one frame at a time.
pub struct FrameOrchestrator {
    geometry: GeometryPass,
    outline: OutlinePass,
    state: FrameState,
}

impl FrameOrchestrator {
    /// Compile both passes for `session`'s device and swapchain format.
    pub fn new(session: &Session, shaders: &ShaderLibrary) -> Result<Self, StartupError> {
        let geometry = GeometryPass::new(&session.device, shaders)?;
        let outline = OutlinePass::new(&session.device, shaders, session.surface_format())?;
        Ok(Self {
            geometry,
            outline,
            state: FrameState::Idle,
        })
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    fn enter(&mut self, state: FrameState) {
        log::trace!("Frame {:?} -> {state:?}", self.state);
        self.state = state;
    }

    fn step(&mut self) {
        self.enter(self.state.advance());
    }

    /// Render and present one frame.
    ///
    /// Integrates the camera, draws `scene` farthest first into the
    /// offscreen pair, then composites the outline onto the swapchain.
    pub fn render_frame(
        &mut self,
        session: &Session,
        camera: &mut Camera,
        scene: &Scene,
    ) -> Result<(), FrameError> {
        match self.run(session, camera, scene) {
            Ok(()) => {
                self.step();
                Ok(())
            }
            Err(e) => {
                self.enter(FrameState::Failed);
                Err(e)
            }
        }
    }

    fn run(&mut self, session: &Session, camera: &mut Camera, scene: &Scene) -> Result<(), FrameError> {
        self.step();
        camera.integrate();
        let views = session.targets.views().ok_or(FrameError::MissingTargets)?;
        let order = draw_order(&scene.instances, camera.position);
        let mut encoder = session
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        self.step();
        self.geometry.record(
            &session.device,
            &session.queue,
            &mut encoder,
            views,
            camera,
            scene,
            &order,
        )?;

        let output = match session.surface.get_current_texture() {
            Ok(output) => output,
            Err(e) => {
                if classify_surface_error(&e) == SurfaceAction::Reconfigure {
                    session.reconfigure();
                }
                return Err(FrameError::Surface(e));
            }
        };

        self.step();
        let target = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let uniforms = OutlineUniforms {
            near_far: camera.near_far(),
            texel_size: session.targets.texel_size(),
        };
        self.outline
            .record(&session.device, &session.queue, &mut encoder, &target, views, uniforms)?;

        session.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    /// Release both pipelines and their buffers.
    pub fn release(&mut self) {
        if let Err(e) = self.geometry.release() {
            log::error!("Releasing geometry pass failed: {e}");
        }
        if let Err(e) = self.outline.release() {
            log::error!("Releasing outline pass failed: {e}");
        }
    }
}
