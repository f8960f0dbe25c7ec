use anyhow::{anyhow, Context, Result};
use renderer::{
    AdaptationSettings, Antialiasing, BoxedTimeSource, CropSettings, ExposureSettings,
    FixedTimeSource, OutputEncoding, PipelineMode, PipelineSelection, ReadbackStrategy,
    RendererConfig, SamplerSettings, SystemTimeSource, ToneMapStrategy, DEFAULT_MAX_DELTA,
    DEFAULT_MIN_DELTA,
};
use tracing::{debug, info, warn};
use viewconfig::{
    AdaptationSection, AntialiasSetting, EncodingSetting, ExposureSection, FrameSection,
    PipelineSetting, ReadbackSetting, SamplerSection, ToneMappingSetting, ViewerConfig,
};

use crate::cli::Args;
use crate::paths::AppPaths;

const DEFAULT_GAMMA: f32 = 2.2;

/// Loads `--config`, or the discovered config file when it exists.
pub fn load_config(args: &Args, paths: &AppPaths) -> Result<ViewerConfig> {
    if let Some(path) = args.config.as_deref() {
        let config = ViewerConfig::load(path)
            .with_context(|| format!("failed to load viewer config {}", path.display()))?;
        info!(path = %path.display(), "loaded viewer config");
        return Ok(config);
    }

    let path = paths.config_file();
    if !path.exists() {
        debug!(path = %path.display(), "no viewer config found; using defaults");
        return Ok(ViewerConfig::empty());
    }
    let config = ViewerConfig::load(&path)
        .with_context(|| format!("failed to load viewer config {}", path.display()))?;
    info!(path = %path.display(), "loaded viewer config");
    Ok(config)
}

/// Layers command-line flags over the file settings.
pub fn apply_overrides(config: &mut ViewerConfig, args: &Args) {
    if let Some((width, height)) = args.size {
        config.window.width = Some(width);
        config.window.height = Some(height);
    }
    if let Some(pipeline) = args.pipeline {
        config.render.pipeline = Some(pipeline);
    }
    if let Some(tone_mapping) = args.tone_mapping {
        config.render.tone_mapping = Some(tone_mapping);
    }
    if let Some(antialias) = args.antialias {
        config.render.antialias = Some(antialias);
    }
    if args.stereo {
        config.stereo.autostart = true;
    }
    if let Some(step) = args.fixed_delta {
        config.frame.fixed_delta = Some(step);
    }
}

pub fn renderer_config(config: &ViewerConfig) -> Result<RendererConfig> {
    let defaults = RendererConfig::default();
    let render = &config.render;
    let gamma = render.gamma.unwrap_or(DEFAULT_GAMMA);

    let pipelines = PipelineSelection {
        flat: render.pipeline.map_or(defaults.pipelines.flat, pipeline_mode),
        stereo: render
            .stereo_pipeline
            .map_or(defaults.pipelines.stereo, pipeline_mode),
        keep_warm: render.keep_warm,
    };
    let composited = [pipelines.flat, pipelines.stereo].contains(&PipelineMode::Composited);
    if render.tone_mapping.is_some() && !composited {
        warn!("tone mapping only applies to the composited pipeline; ignoring it");
    }

    let renderer = RendererConfig {
        title: config.window.title.clone().unwrap_or(defaults.title),
        surface_size: config.window_size().unwrap_or(defaults.surface_size),
        clear_color: config.window.clear_color.unwrap_or(defaults.clear_color),
        pixel_ratio_cap: config
            .window
            .pixel_ratio_cap
            .unwrap_or(defaults.pixel_ratio_cap),
        antialiasing: render.antialias.map_or(defaults.antialiasing, antialiasing),
        pipelines,
        tone_mapping: match render.tone_mapping {
            None | Some(ToneMappingSetting::Sampled) => ToneMapStrategy::SampledExposure,
            Some(ToneMappingSetting::Adaptive) => {
                ToneMapStrategy::Adaptive(adaptation(&config.adaptation))
            }
        },
        direct_encoding: render
            .direct_encoding
            .map_or(defaults.direct_encoding, |encoding| output_encoding(encoding, gamma)),
        composited_encoding: render
            .composited_encoding
            .map_or(defaults.composited_encoding, |encoding| {
                output_encoding(encoding, gamma)
            }),
        exposure: exposure(&config.exposure),
        sampler: sampler(&config.sampler),
    };

    // Reject before a window opens.
    renderer
        .exposure
        .validate()
        .map_err(|reason| anyhow!("invalid exposure settings: {reason}"))?;
    renderer
        .sampler
        .validate()
        .map_err(|reason| anyhow!("invalid sampler settings: {reason}"))?;
    Ok(renderer)
}

pub fn time_source(frame: &FrameSection) -> BoxedTimeSource {
    match frame.fixed_delta {
        Some(step) => {
            info!(step = %humantime::format_duration(step), "using fixed frame step");
            Box::new(FixedTimeSource::new(step.as_secs_f32()))
        }
        None => Box::new(SystemTimeSource::with_clamps(
            frame.min_delta.unwrap_or(DEFAULT_MIN_DELTA),
            frame.max_delta.unwrap_or(DEFAULT_MAX_DELTA),
        )),
    }
}

fn pipeline_mode(setting: PipelineSetting) -> PipelineMode {
    match setting {
        PipelineSetting::Direct => PipelineMode::Direct,
        PipelineSetting::Composited => PipelineMode::Composited,
    }
}

fn antialiasing(setting: AntialiasSetting) -> Antialiasing {
    match setting {
        AntialiasSetting::Auto => Antialiasing::Auto,
        AntialiasSetting::Off => Antialiasing::Off,
        explicit => explicit
            .samples()
            .map_or(Antialiasing::Auto, Antialiasing::Samples),
    }
}

fn output_encoding(setting: EncodingSetting, gamma: f32) -> OutputEncoding {
    match setting {
        EncodingSetting::Linear => OutputEncoding::Linear,
        EncodingSetting::Gamma => OutputEncoding::Gamma(gamma),
    }
}

fn exposure(section: &ExposureSection) -> ExposureSettings {
    let defaults = ExposureSettings::default();
    ExposureSettings {
        initial: section.initial.unwrap_or(defaults.initial),
        min: section.min.unwrap_or(defaults.min),
        max: section.max.unwrap_or(defaults.max),
        target: section.target.unwrap_or(defaults.target),
        gain: section.gain.unwrap_or(defaults.gain),
        max_step: section.max_step.unwrap_or(defaults.max_step),
    }
}

fn sampler(section: &SamplerSection) -> SamplerSettings {
    let defaults = SamplerSettings::default();
    SamplerSettings {
        grid: section.grid.unwrap_or(defaults.grid),
        crop: CropSettings {
            horizontal: section.border.unwrap_or(defaults.crop.horizontal),
            top: section.top.unwrap_or(defaults.crop.top),
            bottom: section.bottom.unwrap_or(defaults.crop.bottom),
        },
        readback: match section.readback {
            None => defaults.readback,
            Some(ReadbackSetting::GpuDownsample) => ReadbackStrategy::GpuDownsample,
            Some(ReadbackSetting::FullFrame) => ReadbackStrategy::FullFrame,
        },
    }
}

fn adaptation(section: &AdaptationSection) -> AdaptationSettings {
    let defaults = AdaptationSettings::default();
    AdaptationSettings {
        rate: section.rate.unwrap_or(defaults.rate),
        middle_grey: section.middle_grey.unwrap_or(defaults.middle_grey),
        min_luminance: section.min_luminance.unwrap_or(defaults.min_luminance),
        max_luminance: section.max_luminance.unwrap_or(defaults.max_luminance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["roomview"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).expect("parse args")
    }

    #[test]
    fn empty_config_maps_to_renderer_defaults() {
        let config = renderer_config(&ViewerConfig::empty()).expect("config");
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn flags_override_file_settings() {
        let mut config = ViewerConfig::from_toml_str(
            r#"
version = 1

[window]
width = 640
height = 480

[render]
pipeline = "direct"
antialias = 8
"#,
        )
        .expect("parse config");
        apply_overrides(
            &mut config,
            &args(&["--size", "1024x768", "--pipeline", "composited", "--stereo"]),
        );

        let renderer = renderer_config(&config).expect("config");
        assert_eq!(renderer.surface_size, (1024, 768));
        assert_eq!(renderer.pipelines.flat, PipelineMode::Composited);
        assert_eq!(renderer.antialiasing, Antialiasing::Samples(8));
        assert!(config.stereo.autostart);
    }

    #[test]
    fn adaptive_tone_mapping_reads_adaptation_section() {
        let config = ViewerConfig::from_toml_str(
            r#"
version = 1

[render]
pipeline = "composited"
tone_mapping = "adaptive"
composited_encoding = "gamma"
gamma = 2.4

[adaptation]
rate = 0.25
"#,
        )
        .expect("parse config");
        let renderer = renderer_config(&config).expect("config");
        match renderer.tone_mapping {
            ToneMapStrategy::Adaptive(settings) => {
                assert_eq!(settings.rate, 0.25);
                assert_eq!(settings.middle_grey, AdaptationSettings::default().middle_grey);
            }
            other => panic!("unexpected tone mapping {other:?}"),
        }
        assert_eq!(renderer.composited_encoding, OutputEncoding::Gamma(2.4));
    }

    #[test]
    fn exposure_outside_renderer_limits_is_rejected() {
        let config = ViewerConfig::from_toml_str(
            r#"
version = 1

[exposure]
min = 0.0
"#,
        )
        .expect("parse config");
        let err = renderer_config(&config).unwrap_err();
        assert!(err.to_string().contains("exposure"));
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let root = TempDir::new().unwrap();
        let paths = AppPaths::from_raw(root.path().to_path_buf());
        let config = load_config(&args(&[]), &paths).expect("load");
        assert_eq!(config.version, ViewerConfig::VERSION);
        assert_eq!(config.window_size(), None);
    }

    #[test]
    fn discovered_config_file_is_loaded() {
        let root = TempDir::new().unwrap();
        fs::write(
            root.path().join("config.toml"),
            "version = 1\n[window]\ntitle = \"Studio\"\n",
        )
        .unwrap();
        let paths = AppPaths::from_raw(root.path().to_path_buf());
        let config = load_config(&args(&[]), &paths).expect("load");
        assert_eq!(config.window.title.as_deref(), Some("Studio"));
    }

    #[test]
    fn explicit_config_must_exist() {
        let root = TempDir::new().unwrap();
        let paths = AppPaths::from_raw(root.path().to_path_buf());
        let missing = root.path().join("missing.toml");
        let missing = missing.to_string_lossy().into_owned();
        assert!(load_config(&args(&["--config", &missing]), &paths).is_err());
    }

    #[test]
    fn fixed_delta_selects_fixed_clock() {
        let frame = FrameSection {
            fixed_delta: Some(Duration::from_millis(20)),
            ..FrameSection::default()
        };
        let mut source = time_source(&frame);
        let first = source.sample();
        let second = source.sample();
        assert!((first.delta - 0.02).abs() < 1e-6);
        assert_eq!(second.frame_index, 1);
    }
}
