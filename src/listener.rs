/// Clap listener loop
///
/// Pulls blocks from a [`BlockSource`], runs them through a [`ClapDetector`]
/// and publishes every detector event on an unbounded channel. Capture errors
/// never stop the loop; only end of stream or cancellation do.

use crate::capture::BlockSource;
use crate::config::{ConfigError, DetectorConfig};
use crate::detector::{ClapDetector, DetectorEvent, DetectorStats};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ClapListener {
    detector: ClapDetector,
    capture_timeout: Duration,
    retry_delay: Duration,
    event_tx: mpsc::UnboundedSender<DetectorEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<DetectorEvent>>,
}

impl ClapListener {
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        let capture_timeout = config.capture_timeout();
        let retry_delay = config.capture_retry_delay();
        let detector = ClapDetector::new(config)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            detector,
            capture_timeout,
            retry_delay,
            event_tx,
            event_rx: Some(event_rx),
        })
    }

    /// Take the event receiver; returns `None` after the first call
    pub fn take_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<DetectorEvent>> {
        self.event_rx.take()
    }

    pub fn detector(&self) -> &ClapDetector {
        &self.detector
    }

    /// Run until the source ends or `cancel` fires; returns the final statistics
    pub async fn run<S>(&mut self, source: &mut S, cancel: &CancellationToken) -> DetectorStats
    where
        S: BlockSource + ?Sized,
    {
        info!("Clap listener running");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Listener cancelled");
                    break;
                }
                next = source.next_block(self.capture_timeout) => next,
            };

            match next {
                Ok(Some(block)) => {
                    let report = self.detector.process_block(&block);

                    if let Some(e) = report.error {
                        warn!("Skipping malformed block: {}", e);
                    }

                    for event in report.events {
                        if self.event_tx.send(event).is_err() {
                            debug!("No event subscriber, event dropped");
                        }
                    }
                }

                Ok(None) => {
                    info!("Audio stream ended");
                    break;
                }

                Err(e) => {
                    let consecutive = self.detector.record_capture_error();
                    warn!("({}) Error recording: {}", consecutive, e);

                    if !self.retry_delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                info!("Listener cancelled");
                                break;
                            }
                            _ = tokio::time::sleep(self.retry_delay) => {}
                        }
                    }
                }
            }
        }

        let stats = self.detector.stats();
        info!(
            "Listener stopped after {} blocks: {} taps, {} sequences, {} capture errors",
            stats.blocks_processed, stats.taps_detected, stats.sequences_completed, stats.capture_errors
        );
        stats
    }
}
