use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use viewconfig::{AntialiasSetting, PipelineSetting, ToneMappingSetting};

#[derive(Parser, Debug)]
#[command(
    name = "roomview",
    author,
    version,
    about = "Walk-through room viewer with closed-loop exposure and side-by-side stereo"
)]
pub struct Args {
    /// Viewer configuration file; defaults to `config.toml` in the config directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Initial window size in logical pixels (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size)]
    pub size: Option<(u32, u32)>,

    /// Pipeline for flat frames: `direct` or `composited`.
    #[arg(long, value_name = "PIPELINE", value_parser = parse_pipeline)]
    pub pipeline: Option<PipelineSetting>,

    /// Composited tone mapping: `sampled` or `adaptive`.
    #[arg(long, value_name = "MODE", value_parser = parse_tone_mapping)]
    pub tone_mapping: Option<ToneMappingSetting>,

    /// Anti-aliasing policy: `auto`, `off`, or an explicit MSAA sample count (e.g. `4`).
    #[arg(long, value_name = "MODE", value_parser = parse_antialias)]
    pub antialias: Option<AntialiasSetting>,

    /// Enter a side-by-side stereo session at start-up (toggle later with `v`).
    #[arg(long)]
    pub stereo: bool,

    /// Advance every frame by a fixed step (e.g. `16ms` or `0.016`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub fixed_delta: Option<Duration>,
}

pub fn parse() -> Args {
    Args::parse()
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .trim()
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 1280x720".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width '{}' in size", width.trim()))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height '{}' in size", height.trim()))?;

    if width == 0 || height == 0 {
        return Err("window dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

pub fn parse_pipeline(value: &str) -> Result<PipelineSetting, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "direct" => Ok(PipelineSetting::Direct),
        "composited" | "composer" => Ok(PipelineSetting::Composited),
        other => Err(format!(
            "unknown pipeline '{other}'; expected direct or composited"
        )),
    }
}

pub fn parse_tone_mapping(value: &str) -> Result<ToneMappingSetting, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "sampled" | "exposure" => Ok(ToneMappingSetting::Sampled),
        "adaptive" => Ok(ToneMappingSetting::Adaptive),
        other => Err(format!(
            "unknown tone mapping '{other}'; expected sampled or adaptive"
        )),
    }
}

pub fn parse_antialias(value: &str) -> Result<AntialiasSetting, String> {
    if value.trim().is_empty() {
        return Err("anti-alias mode must not be empty".to_string());
    }
    viewconfig::parse_antialias(value)
}

/// Accepts human-readable durations or plain seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    let duration = match trimmed.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Duration::from_secs_f64(seconds),
        Ok(_) => return Err(format!("invalid duration '{trimmed}'")),
        Err(_) => humantime::parse_duration(trimmed)
            .map_err(|err| format!("invalid duration '{trimmed}': {err}"))?,
    };
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_accept_common_separators() {
        assert_eq!(parse_surface_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_surface_size(" 800 X 600 "), Ok((800, 600)));
        assert_eq!(parse_surface_size("640×480"), Ok((640, 480)));
        assert!(parse_surface_size("0x720").is_err());
        assert!(parse_surface_size("1280").is_err());
    }

    #[test]
    fn pipeline_names_are_case_insensitive() {
        assert_eq!(parse_pipeline("Composited"), Ok(PipelineSetting::Composited));
        assert_eq!(parse_pipeline("direct"), Ok(PipelineSetting::Direct));
        assert!(parse_pipeline("deferred").is_err());
    }

    #[test]
    fn durations_accept_seconds_and_units() {
        assert_eq!(parse_duration("0.5"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("16ms"), Ok(Duration::from_millis(16)));
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("-1").is_err());
    }

    #[test]
    fn flags_parse_together() {
        let args = Args::try_parse_from([
            "roomview",
            "--size",
            "1024x768",
            "--pipeline",
            "composited",
            "--tone-mapping",
            "adaptive",
            "--antialias",
            "off",
            "--stereo",
            "--fixed-delta",
            "20ms",
        ])
        .expect("parse args");
        assert_eq!(args.size, Some((1024, 768)));
        assert_eq!(args.pipeline, Some(PipelineSetting::Composited));
        assert_eq!(args.tone_mapping, Some(ToneMappingSetting::Adaptive));
        assert_eq!(args.antialias, Some(AntialiasSetting::Off));
        assert!(args.stereo);
        assert_eq!(args.fixed_delta, Some(Duration::from_millis(20)));
        assert!(args.config.is_none());
    }
}
