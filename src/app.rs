//! Window, event loop and the asset reload path.
//!
//! [`run`] opens the viewer window and blocks until it closes. Startup goes
//! through a fixed order, each step depending on the one before it:
//!
//! 1. window
//! 2. device and surface ([`Session::new`])
//! 3. relative mouse capture
//! 4. pipeline compilation ([`FrameOrchestrator::new`])
//! 5. offscreen target creation
//! 6. initial asset, if configured
//!
//! A failure in steps 1 to 5 ends the event loop and is returned from
//! [`run`]. A failed asset load only logs; the viewer keeps running with the
//! scene it had.
//!
//! # Controls
//!
//! | Input | Action |
//! |-------|--------|
//! | W/A/S/D | Move forward / left / back / right |
//! | E/Q | Move up / down |
//! | Mouse | Look around |
//! | R | Open an asset |
//! | Drop a file | Open that asset |
//! | Escape | Quit |

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy};
use winit::keyboard::KeyCode;
use winit::window::{Window, WindowId};

use crate::asset;
use crate::camera::Camera;
use crate::config::ViewerConfig;
use crate::error::{LoadError, StartupError};
use crate::frame::FrameOrchestrator;
use crate::gpu::Session;
use crate::input::InputEvent;
use crate::logging::init_logging;
use crate::planner;
use crate::scene::Scene;
use crate::shader::ShaderLibrary;
use crate::upload;

/// Events posted to the event loop from other threads.
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    /// The file dialog returned a path.
    AssetChosen(PathBuf),
}

/// Run the viewer until its window closes.
///
/// # Example
/// ```ignore
/// strata::run(ViewerConfig::new().asset("assets/cubes.gltf"))?;
/// ```
pub fn run(config: ViewerConfig) -> Result<(), StartupError> {
    init_logging(config.logging.clone());

    let event_loop = EventLoop::<UserEvent>::with_user_event().build()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let proxy = event_loop.create_proxy();

    let mut app = ViewerApp::Pending { config, proxy };
    event_loop.run_app(&mut app)?;

    match app {
        ViewerApp::Failed(e) => Err(e),
        _ => Ok(()),
    }
}

/// Decode, plan and upload the asset at `path` into a fresh [`Scene`].
///
/// Nothing is swapped here; the caller decides what to do with the result.
pub fn load_scene(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    path: &Path,
) -> Result<Scene, LoadError> {
    let decoded = asset::load(path)?;
    let plan = planner::plan_scene(&decoded)?;
    let geometry = upload::upload(device, queue, &decoded, &plan)?;
    Ok(Scene {
        instances: plan.instances,
        geometry,
        source: Some(path.to_path_buf()),
    })
}

/// `error` followed by each of its causes, separated by `": "`.
pub(crate) fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

enum ViewerApp {
    Pending {
        config: ViewerConfig,
        proxy: EventLoopProxy<UserEvent>,
    },
    Running(Box<Viewer>),
    Failed(StartupError),
    Exited,
}

struct Viewer {
    session: Session,
    frames: FrameOrchestrator,
    camera: Camera,
    scene: Scene,
    asset_dir: PathBuf,
    proxy: EventLoopProxy<UserEvent>,
}

impl Viewer {
    fn start(
        event_loop: &ActiveEventLoop,
        config: ViewerConfig,
        proxy: EventLoopProxy<UserEvent>,
    ) -> Result<Self, StartupError> {
        let window_attrs = Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(LogicalSize::new(config.width, config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let mut session = Session::new(window, config.present_mode)?;
        session.capture_mouse()?;

        let shaders = ShaderLibrary::for_backend(&config.shader_dir, session.backend);
        let frames = FrameOrchestrator::new(&session, &shaders)?;

        session
            .create_targets()
            .map_err(StartupError::resource("render targets"))?;

        let camera = Camera::new(session.width(), session.height());
        let mut viewer = Self {
            session,
            frames,
            camera,
            scene: Scene::empty(),
            asset_dir: config.asset_dir,
            proxy,
        };
        if let Some(path) = &config.initial_asset {
            viewer.reload(path);
        }
        log::info!("Viewer started");
        Ok(viewer)
    }

    /// Replace the scene with the asset at `path`, or keep the current one
    /// if anything fails.
    fn reload(&mut self, path: &Path) {
        match load_scene(&self.session.device, &self.session.queue, path) {
            Ok(scene) => {
                log::info!(
                    "Loaded {} with {} mesh instances",
                    path.display(),
                    scene.instances.len()
                );
                self.scene.replace(scene);
            }
            Err(e) => {
                log::error!("Loading {} failed: {}", path.display(), error_chain(&e));
            }
        }
    }

    /// Ask for an asset on a helper thread. The answer comes back as
    /// [`UserEvent::AssetChosen`].
    fn open_dialog(&self) {
        let proxy = self.proxy.clone();
        let directory = self.asset_dir.clone();
        let spawned = std::thread::Builder::new()
            .name("asset-dialog".to_string())
            .spawn(move || {
                let picked = pollster::block_on(
                    rfd::AsyncFileDialog::new()
                        .add_filter("GLB", &["glb"])
                        .add_filter("GLTF", &["gltf"])
                        .set_directory(&directory)
                        .pick_file(),
                );
                let Some(file) = picked else {
                    log::info!("Asset dialog cancelled");
                    return;
                };
                if proxy
                    .send_event(UserEvent::AssetChosen(file.path().to_path_buf()))
                    .is_err()
                {
                    log::warn!("Event loop closed before the chosen asset arrived");
                }
            });
        if let Err(e) = spawned {
            log::error!("Starting the asset dialog failed: {e}");
        }
    }

    fn handle_input(&mut self, event_loop: &ActiveEventLoop, input: InputEvent) {
        match input {
            InputEvent::CloseRequested | InputEvent::KeyDown(KeyCode::Escape) => {
                event_loop.exit();
                return;
            }
            InputEvent::KeyDown(KeyCode::KeyR) => self.open_dialog(),
            InputEvent::Resized { width, height } => {
                if let Err(e) = self.session.resize(width, height) {
                    log::error!("Resizing render targets failed: {e}");
                }
            }
            _ => {}
        }
        self.camera.handle_event(&input);
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        match self
            .frames
            .render_frame(&self.session, &mut self.camera, &self.scene)
        {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                log::error!("Rendering stopped: {}", error_chain(&e));
                event_loop.exit();
                return;
            }
            Err(e) => log::warn!("Frame skipped: {}", error_chain(&e)),
        }
        self.session.window.request_redraw();
    }

    fn shutdown(&mut self) {
        self.scene.release();
        self.frames.release();
        self.session.shutdown();
        log::info!("Viewer shut down");
    }
}

impl ApplicationHandler<UserEvent> for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if !matches!(self, ViewerApp::Pending { .. }) {
            return;
        }
        let ViewerApp::Pending { config, proxy } = std::mem::replace(self, ViewerApp::Exited)
        else {
            return;
        };

        match Viewer::start(event_loop, config, proxy) {
            Ok(viewer) => {
                viewer.session.window.request_redraw();
                *self = ViewerApp::Running(Box::new(viewer));
            }
            Err(e) => {
                log::error!("Startup failed: {}", error_chain(&e));
                *self = ViewerApp::Failed(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let ViewerApp::Running(viewer) = self else {
            return;
        };

        if let Some(input) = InputEvent::from_window_event(&event) {
            viewer.handle_input(event_loop, input);
        }

        match event {
            WindowEvent::RedrawRequested => viewer.redraw(event_loop),
            WindowEvent::DroppedFile(path) => viewer.reload(&path),
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        let ViewerApp::Running(viewer) = self else {
            return;
        };
        if let Some(input) = InputEvent::from_device_event(&event) {
            viewer.camera.handle_event(&input);
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: UserEvent) {
        let ViewerApp::Running(viewer) = self else {
            return;
        };
        match event {
            UserEvent::AssetChosen(path) => viewer.reload(&path),
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let ViewerApp::Running(viewer) = self {
            viewer.shutdown();
            *self = ViewerApp::Exited;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::tests::{NESTED_TRIANGLE, glb, triangle_bin};
    use crate::test_support;

    #[test]
    fn error_chain_lists_every_cause() {
        let err = LoadError::from(planner::PlanError::MissingIndices {
            node: 0,
            primitive: 1,
        });
        assert_eq!(
            error_chain(&err),
            "asset cannot be drawn: node 0 primitive 1 has no indices"
        );
    }

    #[test]
    fn unsupported_extension_is_rejected_before_io() {
        let Some((device, queue)) = test_support::device() else {
            return;
        };
        let err = load_scene(&device, &queue, Path::new("model.obj")).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Asset(asset::AssetError::UnsupportedExtension { .. })
        ));
    }

    #[test]
    fn failed_reload_keeps_previous_scene() {
        let Some((device, queue)) = test_support::device() else {
            return;
        };
        let dir = std::env::temp_dir().join(format!("strata-reload-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let good = dir.join("triangle.glb");
        std::fs::write(&good, glb(NESTED_TRIANGLE, &triangle_bin())).unwrap();
        let broken = dir.join("broken.glb");
        std::fs::write(&broken, b"not a glb").unwrap();

        let mut scene = Scene::empty();
        scene.replace(load_scene(&device, &queue, &good).unwrap());
        assert!(!scene.is_empty());

        assert!(load_scene(&device, &queue, &broken).is_err());
        assert_eq!(scene.source.as_deref(), Some(good.as_path()));
        assert!(!scene.is_empty());

        scene.release();
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
