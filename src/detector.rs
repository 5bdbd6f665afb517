/// Clap detector main module
///
/// Runs one block through the whole pipeline: feature extraction,
/// classification, threshold adaptation, tap detection and clap clustering.
/// The detector owns all of its state and never blocks, so it can be driven
/// from a live capture loop or from recorded/synthetic blocks alike.

use crate::classification::Classification;
use crate::clustering::ClapClusterer;
use crate::config::{ConfigError, DetectorConfig};
use crate::features::{BlockFeatures, FeatureError, FeatureExtractor};
use crate::tap::TapStateMachine;
use crate::threshold::{ThresholdAdjustment, ThresholdController};
use std::time::Duration;
use tracing::{debug, info};

/// Events emitted while processing blocks, in the order they occur
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorEvent {
    /// A short noisy run ended
    TapDetected {
        /// Stream time of the block that ended the run
        timestamp: Duration,
        peak_frequency_hz: f64,
    },

    /// A tap was counted into the current clap sequence
    ClapObserved {
        timestamp: Duration,
        count: u32,
        peak_frequency_hz: f64,
    },

    /// The clap sequence reached its goal
    ClapSequenceComplete { timestamp: Duration, count: u32 },
}

/// Outcome of processing one block
#[derive(Debug, Clone, PartialEq)]
pub struct BlockReport {
    pub classification: Classification,

    /// `None` when the block was malformed
    pub features: Option<BlockFeatures>,

    pub events: Vec<DetectorEvent>,

    /// Set when the block could not be decoded; the block counts as quiet
    pub error: Option<FeatureError>,

    pub adjustment: Option<ThresholdAdjustment>,
}

/// Detector statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectorStats {
    pub blocks_processed: u64,
    pub noisy_blocks: u64,
    pub malformed_blocks: u64,
    pub capture_errors: u64,
    pub consecutive_capture_errors: u32,
    pub taps_detected: u64,
    pub claps_observed: u64,
    pub sequences_completed: u64,
    pub threshold_raises: u64,
    pub threshold_lowers: u64,

    /// Current RMS threshold
    pub threshold: f64,

    /// Audio time consumed so far, including blocks lost to capture errors
    pub stream_time: Duration,
}

/// Main clap detector
pub struct ClapDetector {
    config: DetectorConfig,
    extractor: FeatureExtractor,
    controller: ThresholdController,
    taps: TapStateMachine,
    clusterer: ClapClusterer,
    block_duration: Duration,
    blocks_consumed: u64,
    stats: DetectorStats,
}

impl ClapDetector {
    /// Create a new clap detector
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        info!("Initializing clap detector");
        info!(
            "Band: {:.0}-{:.0} Hz, magnitude threshold: {:.1}",
            config.clap_band_low_hz, config.clap_band_high_hz, config.clap_magnitude_threshold
        );
        info!(
            "Initial threshold: {}, goal: {} claps within {:.1}s",
            config.initial_threshold, config.clap_count_goal, config.rapid_clap_interval_seconds
        );

        Ok(Self {
            extractor: FeatureExtractor::new(&config),
            controller: ThresholdController::from_config(&config),
            taps: TapStateMachine::new(config.max_tap_blocks()),
            clusterer: ClapClusterer::from_config(&config),
            block_duration: config.block_duration(),
            blocks_consumed: 0,
            stats: DetectorStats::default(),
            config,
        })
    }

    /// Process one raw block of interleaved S16_LE samples
    pub fn process_block(&mut self, block: &[u8]) -> BlockReport {
        let timestamp = self.stream_time();
        self.blocks_consumed += 1;
        self.stats.blocks_processed += 1;

        let (classification, features, error) = match self.extractor.extract(block) {
            Ok(features) => {
                let classification = Classification::classify(
                    &features,
                    self.controller.threshold(),
                    self.config.clap_magnitude_threshold,
                );
                (classification, Some(features), None)
            }
            Err(e) => {
                debug!("Treating malformed block as quiet: {}", e);
                self.stats.malformed_blocks += 1;
                (Classification::Quiet, None, Some(e))
            }
        };

        if classification.is_noisy() {
            self.stats.noisy_blocks += 1;
        }

        let adjustment = self.controller.update(classification);
        match adjustment {
            Some(ThresholdAdjustment::Raised { .. }) => self.stats.threshold_raises += 1,
            Some(ThresholdAdjustment::Lowered { .. }) => self.stats.threshold_lowers += 1,
            None => {}
        }

        let mut events = Vec::new();
        let peak = features.map(|f| f.peak_frequency_hz);

        if let Some(tap) = self.taps.on_block(classification, peak) {
            self.stats.taps_detected += 1;
            events.push(DetectorEvent::TapDetected {
                timestamp,
                peak_frequency_hz: tap.peak_frequency_hz,
            });

            let update = self.clusterer.on_tap(timestamp, tap.peak_frequency_hz);
            self.stats.claps_observed += 1;
            events.push(DetectorEvent::ClapObserved {
                timestamp,
                count: update.count,
                peak_frequency_hz: update.peak_frequency_hz,
            });

            if update.completed {
                self.stats.sequences_completed += 1;
                events.push(DetectorEvent::ClapSequenceComplete {
                    timestamp,
                    count: update.count,
                });
            }
        }

        if self.stats.blocks_processed % 1000 == 0 {
            debug!(
                "Processed {} blocks, {} taps, {} sequences, threshold {:.6}",
                self.stats.blocks_processed,
                self.stats.taps_detected,
                self.stats.sequences_completed,
                self.controller.threshold()
            );
        }

        BlockReport {
            classification,
            features,
            events,
            error,
            adjustment,
        }
    }

    /// Record a failed capture attempt; returns the consecutive failure count
    ///
    /// The lost block still advances stream time, and both the controller's
    /// and the tap machine's noisy runs restart as if just begun.
    pub fn record_capture_error(&mut self) -> u32 {
        self.blocks_consumed += 1;
        self.stats.capture_errors += 1;
        self.taps.restart_run();
        self.controller.restart_noisy_run();
        self.controller.record_capture_error()
    }

    /// Audio time consumed so far
    pub fn stream_time(&self) -> Duration {
        let blocks = u32::try_from(self.blocks_consumed).unwrap_or(u32::MAX);
        self.block_duration.saturating_mul(blocks)
    }

    /// Get current statistics
    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            consecutive_capture_errors: self.controller.state().consecutive_error_count,
            threshold: self.controller.threshold(),
            stream_time: self.stream_time(),
            ..self.stats.clone()
        }
    }

    pub fn threshold(&self) -> f64 {
        self.controller.threshold()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Reset detector state
    pub fn reset(&mut self) {
        self.controller.reset();
        self.taps.reset();
        self.clusterer.reset();
        self.blocks_consumed = 0;
        self.stats = DetectorStats::default();
        info!("Detector reset");
    }
}
