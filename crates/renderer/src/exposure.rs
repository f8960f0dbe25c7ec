//! Closed-loop exposure control driven by sampled frame luminance.

use crate::sampler::LuminanceSample;

/// Tuning for the brightness feedback loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureSettings {
    /// Exposure applied to the first frame.
    pub initial: f32,
    pub min: f32,
    pub max: f32,
    /// Average luma (0..1) the loop steers towards.
    pub target: f32,
    /// Proportional gain per second of frame time.
    pub gain: f32,
    /// Largest relative change in one frame.
    pub max_step: f32,
}

impl Default for ExposureSettings {
    fn default() -> Self {
        Self {
            initial: 1.3,
            min: 0.5,
            max: 3.0,
            target: 0.25,
            gain: 2.0,
            max_step: 0.1,
        }
    }
}

impl ExposureSettings {
    /// Checks that the bounds are ordered and the loop parameters usable.
    pub fn validate(&self) -> Result<(), String> {
        let finite = [
            self.initial,
            self.min,
            self.max,
            self.target,
            self.gain,
            self.max_step,
        ]
        .iter()
        .all(|value| value.is_finite());
        if !finite {
            return Err("exposure settings must be finite numbers".into());
        }
        if self.min <= 0.0 {
            return Err(format!("minimum exposure must be positive (got {})", self.min));
        }
        if self.max < self.min {
            return Err(format!(
                "maximum exposure {} is below minimum {}",
                self.max, self.min
            ));
        }
        if !(self.target > 0.0 && self.target <= 1.0) {
            return Err(format!(
                "exposure target must be within (0, 1] (got {})",
                self.target
            ));
        }
        if self.gain < 0.0 {
            return Err(format!("exposure gain must not be negative (got {})", self.gain));
        }
        if !(0.0..1.0).contains(&self.max_step) {
            return Err(format!(
                "exposure max step must be within [0, 1) (got {})",
                self.max_step
            ));
        }
        Ok(())
    }
}

/// Exposure scalar together with the luminance that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureState {
    pub exposure: f32,
    /// Average luma of the last consumed sample, if any.
    pub average_luminance: Option<f32>,
}

/// Outcome of a single controller step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureStep {
    pub average_luminance: f32,
    pub factor: f32,
    pub exposure: f32,
}

/// Proportional controller on a ratio scale keeping perceived brightness stable.
#[derive(Debug, Clone)]
pub struct ExposureController {
    settings: ExposureSettings,
    state: ExposureState,
}

impl ExposureController {
    pub fn new(settings: ExposureSettings) -> Self {
        let exposure = settings.initial.clamp(settings.min, settings.max);
        Self {
            settings,
            state: ExposureState {
                exposure,
                average_luminance: None,
            },
        }
    }

    pub fn settings(&self) -> &ExposureSettings {
        &self.settings
    }

    pub fn exposure(&self) -> f32 {
        self.state.exposure
    }

    pub fn state(&self) -> ExposureState {
        self.state
    }

    /// Consumes one luminance sample and advances the exposure by `delta` seconds.
    pub fn update(&mut self, sample: &LuminanceSample, delta: f32) -> ExposureStep {
        let average = sample.average_luma();
        let factor = self.factor(average, delta);
        let exposure = (self.state.exposure * factor).clamp(self.settings.min, self.settings.max);

        self.state = ExposureState {
            exposure,
            average_luminance: Some(average),
        };
        tracing::trace!(avg = average, factor, exposure, "exposure step");

        ExposureStep {
            average_luminance: average,
            factor,
            exposure,
        }
    }

    fn factor(&self, average: f32, delta: f32) -> f32 {
        // Negated comparison so NaN deltas leave the exposure untouched too.
        if !(delta > 0.0) || !delta.is_finite() {
            return 1.0;
        }
        let error = self.settings.target - average;
        let step = (error * delta * self.settings.gain)
            .clamp(-self.settings.max_step, self.settings.max_step);
        1.0 + step
    }
}

impl Default for ExposureController {
    fn default() -> Self {
        Self::new(ExposureSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(value: u8) -> LuminanceSample {
        LuminanceSample::uniform(10, [value; 3]).unwrap()
    }

    #[test]
    fn initial_exposure_is_clamped() {
        let controller = ExposureController::new(ExposureSettings {
            initial: 9.0,
            ..ExposureSettings::default()
        });
        assert_eq!(controller.exposure(), 3.0);
    }

    #[test]
    fn exposure_stays_within_bounds() {
        let settings = ExposureSettings::default();
        for value in [0u8, 1, 64, 128, 200, 255] {
            for delta in [0.001f32, 0.016, 0.5, 1.0, 10.0] {
                let mut controller = ExposureController::new(settings);
                for _ in 0..200 {
                    let step = controller.update(&uniform(value), delta);
                    assert!(step.exposure >= settings.min && step.exposure <= settings.max);
                }
            }
        }
    }

    #[test]
    fn non_positive_delta_leaves_exposure_unchanged() {
        let mut controller = ExposureController::default();
        for delta in [0.0, -0.5, f32::NAN, f32::INFINITY] {
            let step = controller.update(&uniform(0), delta);
            assert_eq!(step.factor, 1.0);
            assert_eq!(step.exposure, 1.3);
        }
        assert_eq!(controller.state().average_luminance, Some(0.0));
    }

    #[test]
    fn dark_sample_converges_monotonically_to_max() {
        let mut controller = ExposureController::default();
        let sample = uniform(10);
        let mut previous = controller.exposure();
        for _ in 0..400 {
            let exposure = controller.update(&sample, 0.05).exposure;
            assert!(exposure >= previous);
            previous = exposure;
        }
        assert_eq!(previous, 3.0);
    }

    #[test]
    fn bright_sample_lowers_exposure() {
        let mut controller = ExposureController::default();
        let step = controller.update(&uniform(255), 0.016);
        assert!(step.factor < 1.0);
        assert!(step.exposure < 1.3);
    }

    #[test]
    fn black_frame_for_one_second_limits_per_frame_growth() {
        let mut controller = ExposureController::default();
        let sample = uniform(0);
        let mut elapsed = 0.0;
        let mut previous = controller.exposure();
        while elapsed < 1.0 {
            let delta = 1.0 / 60.0;
            let exposure = controller.update(&sample, delta).exposure;
            assert!(exposure >= previous);
            assert!(exposure <= previous * 1.1 + 1e-6);
            previous = exposure;
            elapsed += delta;
        }
        assert!(previous > 1.3);
    }

    #[test]
    fn large_delta_is_limited_by_max_step() {
        let mut controller = ExposureController::default();
        let step = controller.update(&uniform(0), 5.0);
        assert!((step.factor - 1.1).abs() < 1e-6);
    }

    #[test]
    fn validation_rejects_inverted_bounds() {
        let settings = ExposureSettings {
            min: 2.0,
            max: 1.0,
            ..ExposureSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(ExposureSettings::default().validate().is_ok());
        let bad_step = ExposureSettings {
            max_step: 1.5,
            ..ExposureSettings::default()
        };
        assert!(bad_step.validate().unwrap_err().contains("max step"));
    }
}
