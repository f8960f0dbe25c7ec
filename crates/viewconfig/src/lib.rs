use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Viewer settings file. Every field is optional; unset values fall back to
/// the renderer defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ViewerConfig {
    pub version: u32,
    #[serde(default)]
    pub window: WindowSection,
    #[serde(default)]
    pub render: RenderSection,
    #[serde(default)]
    pub exposure: ExposureSection,
    #[serde(default)]
    pub sampler: SamplerSection,
    #[serde(default)]
    pub adaptation: AdaptationSection,
    #[serde(default)]
    pub stereo: StereoSection,
    #[serde(default)]
    pub frame: FrameSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WindowSection {
    pub title: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pixel_ratio_cap: Option<f32>,
    /// Linear RGBA.
    pub clear_color: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RenderSection {
    pub pipeline: Option<PipelineSetting>,
    pub stereo_pipeline: Option<PipelineSetting>,
    #[serde(default)]
    pub keep_warm: bool,
    #[serde(default, deserialize_with = "deserialize_antialias_opt")]
    pub antialias: Option<AntialiasSetting>,
    pub tone_mapping: Option<ToneMappingSetting>,
    pub direct_encoding: Option<EncodingSetting>,
    pub composited_encoding: Option<EncodingSetting>,
    /// Exponent used by every `gamma` encoding.
    pub gamma: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct ExposureSection {
    pub initial: Option<f32>,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub target: Option<f32>,
    pub gain: Option<f32>,
    pub max_step: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct SamplerSection {
    pub grid: Option<u32>,
    /// Left and right border fraction.
    pub border: Option<f32>,
    pub top: Option<f32>,
    pub bottom: Option<f32>,
    pub readback: Option<ReadbackSetting>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct AdaptationSection {
    pub rate: Option<f32>,
    pub middle_grey: Option<f32>,
    pub min_luminance: Option<f32>,
    pub max_luminance: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct StereoSection {
    /// Interpupillary distance of the side-by-side headset, metres.
    pub ipd: Option<f32>,
    /// Enter a stereo session at start-up.
    #[serde(default)]
    pub autostart: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct FrameSection {
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub min_delta: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub max_delta: Option<Duration>,
    /// Advance every frame by this step instead of wall-clock time.
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub fixed_delta: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineSetting {
    Direct,
    Composited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToneMappingSetting {
    /// Closed-loop exposure from the frame sampler.
    Sampled,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingSetting {
    Linear,
    Gamma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadbackSetting {
    GpuDownsample,
    FullFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntialiasSetting {
    Auto,
    Off,
    Samples2,
    Samples4,
    Samples8,
    Samples16,
}

impl AntialiasSetting {
    pub fn from_samples(samples: u32) -> Option<Self> {
        match samples {
            0 | 1 => Some(Self::Off),
            2 => Some(Self::Samples2),
            4 => Some(Self::Samples4),
            8 => Some(Self::Samples8),
            16 => Some(Self::Samples16),
            _ => None,
        }
    }

    /// Explicit MSAA sample count, `None` for `auto` and `off`.
    pub fn samples(&self) -> Option<u32> {
        match self {
            Self::Auto | Self::Off => None,
            Self::Samples2 => Some(2),
            Self::Samples4 => Some(4),
            Self::Samples8 => Some(8),
            Self::Samples16 => Some(16),
        }
    }
}

pub fn parse_antialias(raw: &str) -> Result<AntialiasSetting, String> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "auto" | "max" | "default" => Ok(AntialiasSetting::Auto),
        "off" | "none" | "disable" | "disabled" | "0" => Ok(AntialiasSetting::Off),
        other => other
            .parse::<u32>()
            .ok()
            .and_then(AntialiasSetting::from_samples)
            .ok_or_else(|| {
                format!("invalid antialias setting '{other}'; use auto/off or 2/4/8/16")
            }),
    }
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn deserialize_antialias_opt<'de, D>(deserializer: D) -> Result<Option<AntialiasSetting>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Num(i64),
    }

    let helper: Option<Helper> = Option::deserialize(deserializer)?;
    let result = match helper {
        None => None,
        Some(Helper::Str(raw)) => Some(parse_antialias(&raw).map_err(de::Error::custom)?),
        Some(Helper::Num(value)) => {
            if value < 0 {
                return Err(de::Error::custom("antialias value must be non-negative"));
            }
            Some(parse_antialias(&value.to_string()).map_err(de::Error::custom)?)
        }
    };
    Ok(result)
}

impl ViewerConfig {
    pub const VERSION: u32 = 1;

    /// Configuration with nothing set, used when no file exists.
    pub fn empty() -> Self {
        Self {
            version: Self::VERSION,
            ..Self::default()
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: ViewerConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Initial logical window size, if both dimensions are set.
    pub fn window_size(&self) -> Option<(u32, u32)> {
        Some((self.window.width?, self.window.height?))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != Self::VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected {}",
                self.version,
                Self::VERSION
            )));
        }

        self.validate_window()?;
        self.validate_render()?;
        self.validate_exposure()?;
        self.validate_sampler()?;
        self.validate_adaptation()?;

        if let Some(ipd) = self.stereo.ipd {
            if !ipd.is_finite() || ipd < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "stereo.ipd must be a non-negative distance (got {ipd})"
                )));
            }
        }

        self.validate_frame()
    }

    fn validate_window(&self) -> Result<(), ConfigError> {
        let window = &self.window;
        if window.width.is_some() != window.height.is_some() {
            return Err(ConfigError::Invalid(
                "window.width and window.height must be set together".into(),
            ));
        }
        if let Some((width, height)) = self.window_size() {
            if width == 0 || height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "window size must be non-zero (got {width}x{height})"
                )));
            }
        }
        if let Some(cap) = window.pixel_ratio_cap {
            if !cap.is_finite() || cap <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "window.pixel_ratio_cap must be positive (got {cap})"
                )));
            }
        }
        if let Some(color) = window.clear_color {
            if color.iter().any(|channel| !(0.0..=1.0).contains(channel)) {
                return Err(ConfigError::Invalid(
                    "window.clear_color channels must be within [0, 1]".into(),
                ));
            }
        }
        Ok(())
    }

    fn validate_render(&self) -> Result<(), ConfigError> {
        if let Some(gamma) = self.render.gamma {
            if !gamma.is_finite() || gamma <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "render.gamma must be positive (got {gamma})"
                )));
            }
        }
        Ok(())
    }

    fn validate_exposure(&self) -> Result<(), ConfigError> {
        let exposure = &self.exposure;
        check_finite(
            "exposure",
            [
                ("initial", exposure.initial),
                ("min", exposure.min),
                ("max", exposure.max),
                ("target", exposure.target),
                ("gain", exposure.gain),
                ("max_step", exposure.max_step),
            ],
        )?;
        if let (Some(min), Some(max)) = (exposure.min, exposure.max) {
            if max < min {
                return Err(ConfigError::Invalid(format!(
                    "exposure.max {max} is below exposure.min {min}"
                )));
            }
        }
        if let Some(target) = exposure.target {
            if !(target > 0.0 && target <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "exposure.target must be within (0, 1] (got {target})"
                )));
            }
        }
        Ok(())
    }

    fn validate_sampler(&self) -> Result<(), ConfigError> {
        let sampler = &self.sampler;
        if let Some(grid) = sampler.grid {
            if grid == 0 || grid > 64 {
                return Err(ConfigError::Invalid(format!(
                    "sampler.grid must be within 1..=64 (got {grid})"
                )));
            }
        }
        for (name, value) in [
            ("border", sampler.border),
            ("top", sampler.top),
            ("bottom", sampler.bottom),
        ] {
            if let Some(value) = value {
                if !(0.0..0.5).contains(&value) {
                    return Err(ConfigError::Invalid(format!(
                        "sampler.{name} must be within [0, 0.5) (got {value})"
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_adaptation(&self) -> Result<(), ConfigError> {
        let adaptation = &self.adaptation;
        check_finite(
            "adaptation",
            [
                ("rate", adaptation.rate),
                ("middle_grey", adaptation.middle_grey),
                ("min_luminance", adaptation.min_luminance),
                ("max_luminance", adaptation.max_luminance),
            ],
        )?;
        if let Some(rate) = adaptation.rate {
            if rate < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "adaptation.rate must not be negative (got {rate})"
                )));
            }
        }
        if let (Some(min), Some(max)) = (adaptation.min_luminance, adaptation.max_luminance) {
            if min <= 0.0 || max < min {
                return Err(ConfigError::Invalid(format!(
                    "adaptation luminance range [{min}, {max}] is invalid"
                )));
            }
        }
        Ok(())
    }

    fn validate_frame(&self) -> Result<(), ConfigError> {
        let frame = &self.frame;
        if let (Some(min), Some(max)) = (frame.min_delta, frame.max_delta) {
            if max < min {
                return Err(ConfigError::Invalid(format!(
                    "frame.max_delta {} is below frame.min_delta {}",
                    humantime::format_duration(max),
                    humantime::format_duration(min)
                )));
            }
        }
        if frame.fixed_delta.is_some_and(|step| step.is_zero()) {
            return Err(ConfigError::Invalid(
                "frame.fixed_delta must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn check_finite<const N: usize>(
    section: &str,
    values: [(&str, Option<f32>); N],
) -> Result<(), ConfigError> {
    for (name, value) in values {
        if let Some(value) = value {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "{section}.{name} must be a finite number"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[window]
title = "Lobby"
width = 1600
height = 900
pixel_ratio_cap = 1.5
clear_color = [0.05, 0.05, 0.08, 1.0]

[render]
pipeline = "composited"
stereo_pipeline = "direct"
keep_warm = true
antialias = 4
tone_mapping = "adaptive"
composited_encoding = "gamma"
gamma = 2.4

[exposure]
initial = 1.0
min = 0.25
max = 4.0

[sampler]
grid = 16
border = 0.2
readback = "full-frame"

[adaptation]
rate = 0.5

[stereo]
ipd = 0.07
autostart = true

[frame]
min_delta = "1ms"
max_delta = "100ms"
"#;

    #[test]
    fn parses_sample_config() {
        let config = ViewerConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.window.title.as_deref(), Some("Lobby"));
        assert_eq!(config.window_size(), Some((1600, 900)));
        assert_eq!(config.render.pipeline, Some(PipelineSetting::Composited));
        assert_eq!(config.render.antialias, Some(AntialiasSetting::Samples4));
        assert_eq!(config.render.tone_mapping, Some(ToneMappingSetting::Adaptive));
        assert_eq!(config.render.direct_encoding, None);
        assert_eq!(config.sampler.readback, Some(ReadbackSetting::FullFrame));
        assert_eq!(config.exposure.target, None);
        assert!(config.stereo.autostart);
        assert_eq!(config.frame.min_delta, Some(Duration::from_millis(1)));
        assert_eq!(config.frame.max_delta, Some(Duration::from_millis(100)));
        assert_eq!(config.frame.fixed_delta, None);
    }

    #[test]
    fn version_only_is_enough() {
        let config = ViewerConfig::from_toml_str("version = 1").expect("parse config");
        assert_eq!(config.window_size(), None);
        assert!(!config.render.keep_warm);
        assert_eq!(config.render.antialias, None);
    }

    #[test]
    fn rejects_unknown_version() {
        let err = ViewerConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_exposure_bounds() {
        let err = ViewerConfig::from_toml_str(
            r#"
version = 1

[exposure]
min = 2.0
max = 1.0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exposure.max"));
    }

    #[test]
    fn rejects_half_specified_window_size() {
        let err = ViewerConfig::from_toml_str(
            r#"
version = 1

[window]
width = 800
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_oversized_sampler_border() {
        let err = ViewerConfig::from_toml_str(
            r#"
version = 1

[sampler]
top = 0.5
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("sampler.top"));
    }

    #[test]
    fn rejects_unknown_pipeline_names() {
        let err = ViewerConfig::from_toml_str(
            r#"
version = 1

[render]
pipeline = "deferred"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn numeric_durations_are_seconds() {
        let config = ViewerConfig::from_toml_str(
            r#"
version = 1

[frame]
max_delta = 0.5
fixed_delta = "16ms"
"#,
        )
        .expect("parse config");
        assert_eq!(config.frame.max_delta, Some(Duration::from_millis(500)));
        assert_eq!(config.frame.fixed_delta, Some(Duration::from_millis(16)));
    }

    #[test]
    fn rejects_inverted_delta_clamps() {
        let err = ViewerConfig::from_toml_str(
            r#"
version = 1

[frame]
min_delta = "50ms"
max_delta = "10ms"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn antialias_accepts_words_and_counts() {
        assert_eq!(parse_antialias("Auto"), Ok(AntialiasSetting::Auto));
        assert_eq!(parse_antialias("none"), Ok(AntialiasSetting::Off));
        assert_eq!(parse_antialias("1"), Ok(AntialiasSetting::Off));
        assert_eq!(parse_antialias("8"), Ok(AntialiasSetting::Samples8));
        assert!(parse_antialias("3").is_err());
        assert_eq!(AntialiasSetting::Samples16.samples(), Some(16));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let path = Path::new("/nonexistent/roomview/config.toml");
        let err = ViewerConfig::load(path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/roomview/config.toml"));
    }
}
