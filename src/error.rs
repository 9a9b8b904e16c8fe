use thiserror::Error;

use crate::asset::AssetError;
use crate::planner::PlanError;
use crate::resource::ResourceError;
use crate::shader::ShaderError;
use crate::upload::UploadError;

/// Failures that stop the viewer before the first frame.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("creating the event loop failed")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("creating the window failed")]
    Window(#[from] winit::error::OsError),
    #[error("creating the window surface failed")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("no suitable GPU adapter")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("creating the GPU device failed")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("the surface reports no supported formats for this adapter")]
    SurfaceUnsupported,
    #[error("capturing the mouse failed")]
    MouseCapture(#[source] winit::error::ExternalError),
    #[error("loading shaders failed")]
    Shader(#[from] ShaderError),
    #[error("creating {what} failed")]
    Resource {
        what: &'static str,
        #[source]
        source: ResourceError,
    },
}

impl StartupError {
    /// Adapter for `map_err` on resource creation during startup.
    pub(crate) fn resource(what: &'static str) -> impl FnOnce(ResourceError) -> Self {
        move |source| Self::Resource { what, source }
    }
}

/// Failures on the asset reload path. The previous scene stays active.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error("asset cannot be drawn")]
    Plan(#[from] PlanError),
    #[error("uploading geometry failed")]
    Upload(#[from] UploadError),
}
