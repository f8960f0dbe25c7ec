use anyhow::{Context, Result};
use renderer::{Renderer, SideBySideDevice, DEFAULT_IPD};
use tracing_subscriber::EnvFilter;

use crate::bootstrap;
use crate::cli::Args;
use crate::locomotion::KeyboardLocomotion;
use crate::paths::AppPaths;
use crate::room::{RoomLayout, RoomProvider};

pub fn run(args: Args) -> Result<()> {
    initialise_tracing();

    let paths = AppPaths::discover()?;
    tracing::debug!(config = %paths.config_dir().display(), "resolved roomview paths");

    let mut config = bootstrap::load_config(&args, &paths)?;
    bootstrap::apply_overrides(&mut config, &args);
    config
        .validate()
        .context("invalid configuration after command-line overrides")?;
    let renderer_config = bootstrap::renderer_config(&config)?;
    let time_source = bootstrap::time_source(&config.frame);

    let device = SideBySideDevice::new(config.stereo.ipd.unwrap_or(DEFAULT_IPD))
        .with_autostart(config.stereo.autostart);
    let room = RoomProvider::spawn(RoomLayout::default())?;

    tracing::info!(
        width = renderer_config.surface_size.0,
        height = renderer_config.surface_size.1,
        flat = %renderer_config.pipelines.flat,
        stereo = %renderer_config.pipelines.stereo,
        autostart = config.stereo.autostart,
        "starting roomview"
    );
    Renderer::new(renderer_config).run(room, device, KeyboardLocomotion::default(), time_source)
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
