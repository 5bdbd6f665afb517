/// Adaptive threshold controller
///
/// Tracks consecutive noisy and quiet blocks and rescales the RMS threshold
/// when the detector has been triggering for too long (raise the bar) or has
/// heard nothing for too long (lower it again).

use crate::classification::Classification;
use crate::config::DetectorConfig;
use tracing::{debug, info};

/// Bounds and factors for threshold adaptation
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSettings {
    /// Consecutive noisy blocks before the threshold is raised
    pub oversensitive_blocks: u32,

    /// Consecutive quiet blocks before the threshold is lowered
    pub undersensitive_blocks: u32,

    pub raise_factor: f64,
    pub lower_factor: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
}

impl ThresholdSettings {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            oversensitive_blocks: config.oversensitive_blocks(),
            undersensitive_blocks: config.undersensitive_blocks(),
            raise_factor: config.threshold_raise_factor,
            lower_factor: config.threshold_lower_factor,
            min_threshold: config.min_threshold,
            max_threshold: config.max_threshold,
        }
    }
}

/// Long-lived mutable detector state
///
/// At most one of the run counters is non-zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorState {
    pub threshold: f64,
    pub noisy_run_len: u32,
    pub quiet_run_len: u32,
    pub consecutive_error_count: u32,
}

impl DetectorState {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            noisy_run_len: 0,
            quiet_run_len: 0,
            consecutive_error_count: 0,
        }
    }
}

/// A threshold change made by the controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAdjustment {
    Raised { from: f64, to: f64 },
    Lowered { from: f64, to: f64 },
}

pub struct ThresholdController {
    settings: ThresholdSettings,
    initial_threshold: f64,
    state: DetectorState,
}

impl ThresholdController {
    pub fn new(settings: ThresholdSettings, initial_threshold: f64) -> Self {
        let initial_threshold =
            initial_threshold.clamp(settings.min_threshold, settings.max_threshold);

        Self {
            settings,
            initial_threshold,
            state: DetectorState::new(initial_threshold),
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            ThresholdSettings::from_config(config),
            config.initial_threshold,
        )
    }

    /// Apply one block's classification; called exactly once per classified block
    pub fn update(&mut self, classification: Classification) -> Option<ThresholdAdjustment> {
        self.state.consecutive_error_count = 0;

        match classification {
            Classification::Noisy => {
                self.state.quiet_run_len = 0;
                self.state.noisy_run_len = self.state.noisy_run_len.saturating_add(1);

                if self.state.noisy_run_len >= self.settings.oversensitive_blocks {
                    self.state.noisy_run_len = 0;
                    return self.rescale(self.settings.raise_factor);
                }
            }

            Classification::Quiet => {
                self.state.noisy_run_len = 0;
                self.state.quiet_run_len = self.state.quiet_run_len.saturating_add(1);

                if self.state.quiet_run_len >= self.settings.undersensitive_blocks {
                    self.state.quiet_run_len = 0;
                    return self.rescale(self.settings.lower_factor);
                }
            }
        }

        None
    }

    /// Count a capture failure; returns the consecutive failure count
    pub fn record_capture_error(&mut self) -> u32 {
        self.state.consecutive_error_count = self.state.consecutive_error_count.saturating_add(1);
        self.state.consecutive_error_count
    }

    /// Treat the current noisy run as just started (after a capture gap)
    pub fn restart_noisy_run(&mut self) {
        self.state.noisy_run_len = 1;
        self.state.quiet_run_len = 0;
    }

    fn rescale(&mut self, factor: f64) -> Option<ThresholdAdjustment> {
        let from = self.state.threshold;
        let to = (from * factor).clamp(self.settings.min_threshold, self.settings.max_threshold);

        if to == from {
            debug!("Threshold already at its limit ({:.6})", from);
            return None;
        }

        self.state.threshold = to;

        if to > from {
            info!("Too much sustained noise: threshold raised {:.6} -> {:.6}", from, to);
            Some(ThresholdAdjustment::Raised { from, to })
        } else {
            info!("Quiet for a long time: threshold lowered {:.6} -> {:.6}", from, to);
            Some(ThresholdAdjustment::Lowered { from, to })
        }
    }

    pub fn threshold(&self) -> f64 {
        self.state.threshold
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn settings(&self) -> &ThresholdSettings {
        &self.settings
    }

    /// Return to the startup threshold with cleared counters
    pub fn reset(&mut self) {
        self.state = DetectorState::new(self.initial_threshold);
        debug!("Threshold controller reset to {:.6}", self.initial_threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_settings() -> ThresholdSettings {
        ThresholdSettings {
            oversensitive_blocks: 5,
            undersensitive_blocks: 8,
            raise_factor: 2.0,
            lower_factor: 0.5,
            min_threshold: 1e-6,
            max_threshold: 1.0,
        }
    }

    fn assert_counters_exclusive(state: &DetectorState) {
        assert!(
            state.noisy_run_len == 0 || state.quiet_run_len == 0,
            "both run counters live: {:?}",
            state
        );
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = ThresholdSettings::from_config(&DetectorConfig::default());
        assert_eq!(settings.oversensitive_blocks, 150);
        assert_eq!(settings.undersensitive_blocks, 1200);
    }

    #[test]
    fn test_raises_after_exactly_oversensitive_blocks() {
        let mut controller = ThresholdController::new(test_settings(), 0.01);

        for _ in 0..4 {
            assert_eq!(controller.update(Classification::Noisy), None);
            assert_relative_eq!(controller.threshold(), 0.01);
        }

        let adjustment = controller.update(Classification::Noisy);
        assert_eq!(
            adjustment,
            Some(ThresholdAdjustment::Raised { from: 0.01, to: 0.02 })
        );
        assert_relative_eq!(controller.threshold(), 0.02);
        assert_eq!(controller.state().noisy_run_len, 0);
    }

    #[test]
    fn test_lowers_after_exactly_undersensitive_blocks() {
        let mut controller = ThresholdController::new(test_settings(), 0.01);

        for _ in 0..7 {
            assert_eq!(controller.update(Classification::Quiet), None);
        }
        assert_relative_eq!(controller.threshold(), 0.01);

        assert!(matches!(
            controller.update(Classification::Quiet),
            Some(ThresholdAdjustment::Lowered { .. })
        ));
        assert_relative_eq!(controller.threshold(), 0.005);
        assert_eq!(controller.state().quiet_run_len, 0);
    }

    #[test]
    fn test_interrupted_run_does_not_adjust() {
        let mut controller = ThresholdController::new(test_settings(), 0.01);

        for _ in 0..4 {
            controller.update(Classification::Noisy);
        }
        controller.update(Classification::Quiet);
        for _ in 0..4 {
            assert_eq!(controller.update(Classification::Noisy), None);
        }

        assert_relative_eq!(controller.threshold(), 0.01);
        assert_eq!(controller.state().noisy_run_len, 4);
    }

    #[test]
    fn test_run_counters_are_mutually_exclusive() {
        let mut controller = ThresholdController::new(test_settings(), 0.01);
        let pattern = [
            Classification::Noisy,
            Classification::Noisy,
            Classification::Quiet,
            Classification::Noisy,
            Classification::Quiet,
            Classification::Quiet,
        ];

        for classification in pattern.iter().cycle().take(60) {
            controller.update(*classification);
            assert_counters_exclusive(controller.state());
            match classification {
                Classification::Noisy => assert!(controller.state().quiet_run_len == 0),
                Classification::Quiet => assert!(controller.state().noisy_run_len == 0),
            }
        }
    }

    #[test]
    fn test_threshold_never_reaches_zero() {
        let settings = ThresholdSettings {
            undersensitive_blocks: 1,
            ..test_settings()
        };
        let mut controller = ThresholdController::new(settings, 0.01);

        for _ in 0..5000 {
            controller.update(Classification::Quiet);
            assert!(controller.threshold() > 0.0);
        }
        assert_relative_eq!(controller.threshold(), 1e-6);
    }

    #[test]
    fn test_threshold_clamped_at_max() {
        let settings = ThresholdSettings {
            oversensitive_blocks: 1,
            ..test_settings()
        };
        let mut controller = ThresholdController::new(settings, 0.6);

        assert!(controller.update(Classification::Noisy).is_some());
        assert_relative_eq!(controller.threshold(), 1.0);
        assert_eq!(controller.update(Classification::Noisy), None);
        assert_relative_eq!(controller.threshold(), 1.0);
    }

    #[test]
    fn test_capture_errors_counted_until_next_block() {
        let mut controller = ThresholdController::new(test_settings(), 0.01);

        assert_eq!(controller.record_capture_error(), 1);
        assert_eq!(controller.record_capture_error(), 2);
        assert_eq!(controller.state().consecutive_error_count, 2);

        controller.update(Classification::Quiet);
        assert_eq!(controller.state().consecutive_error_count, 0);
    }

    #[test]
    fn test_restarted_run_counts_from_one() {
        let mut controller = ThresholdController::new(test_settings(), 0.01);

        for _ in 0..4 {
            controller.update(Classification::Noisy);
        }
        controller.restart_noisy_run();
        assert_eq!(controller.state().noisy_run_len, 1);
        assert_eq!(controller.state().quiet_run_len, 0);

        // Four more blocks only reach 5 counting the restarted one
        for _ in 0..3 {
            assert_eq!(controller.update(Classification::Noisy), None);
        }
        assert!(controller.update(Classification::Noisy).is_some());
    }

    #[test]
    fn test_restart_clears_quiet_run() {
        let mut controller = ThresholdController::new(test_settings(), 0.01);

        for _ in 0..7 {
            controller.update(Classification::Quiet);
        }
        controller.restart_noisy_run();
        assert_counters_exclusive(controller.state());

        // The quiet run starts over, so no lowering on the next quiet block
        assert_eq!(controller.update(Classification::Quiet), None);
        assert_relative_eq!(controller.threshold(), 0.01);
    }

    #[test]
    fn test_reset() {
        let mut controller = ThresholdController::new(test_settings(), 0.01);
        for _ in 0..5 {
            controller.update(Classification::Noisy);
        }
        assert_relative_eq!(controller.threshold(), 0.02);

        controller.reset();
        assert_eq!(*controller.state(), DetectorState::new(0.01));
    }
}
