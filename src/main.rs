use anyhow::Context;
use strata::ViewerConfig;

/// Shown when no asset is named on the command line.
const DEFAULT_ASSET: &str = "cubes.gltf";

fn main() -> anyhow::Result<()> {
    let config = ViewerConfig::new();
    let asset = match std::env::args_os().nth(1) {
        Some(path) => path.into(),
        None => config.asset_dir.join(DEFAULT_ASSET),
    };

    strata::run(config.asset(asset)).context("strata viewer failed to start")
}
