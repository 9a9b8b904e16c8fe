//! # Strata
//!
//! **A two-pass real-time glTF viewer.**
//!
//! Strata loads a `.gltf` or `.glb` scene, uploads its geometry to the GPU and
//! renders it in two fixed passes: an opaque geometry pass into offscreen
//! color and depth targets, then a full-screen outline pass that composites
//! the result onto the window.
//!
//! ## Quick Start
//!
//! ```no_run
//! use strata::ViewerConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     strata::run(ViewerConfig::new().asset("assets/cubes.gltf"))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Building blocks
//!
//! - [`GpuResource`] gives every texture, buffer, sampler, shader module and
//!   pipeline an explicit create / release lifecycle.
//! - [`planner`] measures a decoded scene and lays out its shared index and
//!   vertex buffers before anything touches the GPU.
//! - [`upload`] fills those buffers through mapped staging buffers.
//! - [`FrameOrchestrator`] drives one frame through both passes.

mod app;
pub mod asset;
mod camera;
mod config;
mod error;
mod frame;
mod geometry_pass;
mod gpu;
mod input;
mod logging;
mod outline_pass;
pub mod planner;
mod render_target;
mod resource;
mod scene;
mod shader;
pub mod upload;

pub use app::{UserEvent, load_scene, run};
pub use asset::{AssetError, DecodedNode, DecodedPrimitive, DecodedScene};
pub use camera::Camera;
pub use config::ViewerConfig;
pub use error::{LoadError, StartupError};
pub use frame::{FrameError, FrameOrchestrator, FrameState, SurfaceAction, classify_surface_error};
pub use geometry_pass::{FragmentUniforms, GeometryPass, VertexUniforms};
pub use gpu::Session;
pub use input::InputEvent;
pub use logging::{LoggingConfig, init_logging};
pub use outline_pass::{OutlinePass, OutlineUniforms};
pub use planner::{GeometryPlan, PlanError};
pub use render_target::{COLOR_FORMAT, DEPTH_FORMAT, RenderTargets};
pub use resource::{GpuResource, ResourceError, ResourceKind};
pub use scene::{MeshInstance, Scene, SceneGeometry, draw_order};
pub use shader::{
    CompiledShader, ShaderBindings, ShaderError, ShaderFormat, ShaderLibrary, ShaderRequest,
    ShaderStage,
};
pub use upload::UploadError;

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3};
