//! Viewer configuration.
//!
//! [`ViewerConfig`] follows the builder style used for the window settings:
//!
//! ```ignore
//! let config = ViewerConfig::new()
//!     .title("Sponza")
//!     .size(1600, 900)
//!     .asset("assets/sponza.glb");
//! strata::run(config)?;
//! ```

use std::path::PathBuf;

use crate::logging::LoggingConfig;

/// Startup settings for the viewer window and its resource directories.
#[derive(Clone, Debug)]
pub struct ViewerConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Asset loaded right after startup, if any.
    pub initial_asset: Option<PathBuf>,
    /// Directory the file dialog opens in.
    pub asset_dir: PathBuf,
    /// Root of the `<format>/<name>.<ext>` shader tree.
    pub shader_dir: PathBuf,
    pub present_mode: wgpu::PresentMode,
    pub logging: LoggingConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        Self {
            title: "strata".to_string(),
            width: 1200,
            height: 900,
            initial_asset: None,
            asset_dir: root.join("assets"),
            shader_dir: root.join("shaders"),
            present_mode: wgpu::PresentMode::Fifo,
            logging: LoggingConfig::default(),
        }
    }
}

impl ViewerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Load `path` once the renderer is up.
    pub fn asset(mut self, path: impl Into<PathBuf>) -> Self {
        self.initial_asset = Some(path.into());
        self
    }

    pub fn asset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.asset_dir = dir.into();
        self
    }

    pub fn shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    pub fn present_mode(mut self, mode: wgpu::PresentMode) -> Self {
        self.present_mode = mode;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stock_window() {
        let config = ViewerConfig::default();
        assert_eq!((config.width, config.height), (1200, 900));
        assert!(config.initial_asset.is_none());
        assert!(config.shader_dir.ends_with("shaders"));
        assert_eq!(config.present_mode, wgpu::PresentMode::Fifo);
    }

    #[test]
    fn builder_overrides() {
        let config = ViewerConfig::new()
            .title("test")
            .size(640, 480)
            .asset("scene.glb")
            .asset_dir("/tmp/assets")
            .present_mode(wgpu::PresentMode::Mailbox);
        assert_eq!(config.title, "test");
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.initial_asset, Some(PathBuf::from("scene.glb")));
        assert_eq!(config.asset_dir, PathBuf::from("/tmp/assets"));
        assert_eq!(config.present_mode, wgpu::PresentMode::Mailbox);
    }
}
