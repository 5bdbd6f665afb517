/// Tap state machine
///
/// A length-bounded edge detector over the noisy/quiet block sequence: a run
/// of noisy blocks that ends within `max_tap_blocks` is a tap, a longer run is
/// sustained noise and is dropped.

use crate::classification::Classification;
use tracing::debug;

/// Tap detector state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TapState {
    /// No noisy run in progress
    Idle,

    /// Noisy run in progress
    Accumulating {
        run_len: u32,
        /// Peak frequency seen at the most recent noisy block
        last_peak_hz: Option<f64>,
    },
}

/// A detected tap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapEvent {
    pub peak_frequency_hz: f64,

    /// Length of the noisy run that produced the tap, in blocks
    pub run_len: u32,
}

pub struct TapStateMachine {
    max_tap_blocks: u32,
    state: TapState,
    rejected_runs: u64,
}

impl TapStateMachine {
    pub fn new(max_tap_blocks: u32) -> Self {
        Self {
            max_tap_blocks,
            state: TapState::Idle,
            rejected_runs: 0,
        }
    }

    /// Feed one block's classification
    ///
    /// `peak_frequency_hz` is the block's in-band peak, if features were extracted.
    /// Returns a tap when a bounded noisy run has just ended.
    pub fn on_block(
        &mut self,
        classification: Classification,
        peak_frequency_hz: Option<f64>,
    ) -> Option<TapEvent> {
        match (classification, self.state) {
            (Classification::Noisy, TapState::Idle) => {
                self.state = TapState::Accumulating {
                    run_len: 1,
                    last_peak_hz: peak_frequency_hz,
                };
                debug!("Tap: Idle -> Accumulating");
                None
            }

            (
                Classification::Noisy,
                TapState::Accumulating {
                    run_len,
                    last_peak_hz,
                },
            ) => {
                self.state = TapState::Accumulating {
                    run_len: run_len.saturating_add(1),
                    last_peak_hz: peak_frequency_hz.or(last_peak_hz),
                };
                None
            }

            (Classification::Quiet, TapState::Idle) => None,

            (
                Classification::Quiet,
                TapState::Accumulating {
                    run_len,
                    last_peak_hz,
                },
            ) => {
                self.state = TapState::Idle;

                if run_len <= self.max_tap_blocks {
                    debug!("Tap: run of {} blocks ended -> tap", run_len);
                    Some(TapEvent {
                        // A run restarted by a capture error has no noisy peak yet.
                        peak_frequency_hz: last_peak_hz.or(peak_frequency_hz).unwrap_or(0.0),
                        run_len,
                    })
                } else {
                    self.rejected_runs += 1;
                    debug!(
                        "Tap: run of {} blocks exceeds {} -> sustained noise, ignored",
                        run_len, self.max_tap_blocks
                    );
                    None
                }
            }
        }
    }

    /// Restart the current run as "just started" after a capture gap
    pub fn restart_run(&mut self) {
        let last_peak_hz = match self.state {
            TapState::Accumulating { last_peak_hz, .. } => last_peak_hz,
            TapState::Idle => None,
        };

        self.state = TapState::Accumulating {
            run_len: 1,
            last_peak_hz,
        };
        debug!("Tap: run restarted after capture error");
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn max_tap_blocks(&self) -> u32 {
        self.max_tap_blocks
    }

    /// Noisy runs dropped for being too long
    pub fn rejected_runs(&self) -> u64 {
        self.rejected_runs
    }

    pub fn reset(&mut self) {
        self.state = TapState::Idle;
        self.rejected_runs = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn run_of(machine: &mut TapStateMachine, len: u32) -> Vec<TapEvent> {
        let mut taps = Vec::new();
        for i in 0..len {
            taps.extend(machine.on_block(Classification::Noisy, Some(1800.0 + i as f64 * 10.0)));
        }
        taps.extend(machine.on_block(Classification::Quiet, Some(500.0)));
        taps
    }

    #[test_case(0, false ; "empty run never fires")]
    #[test_case(1, true ; "single block")]
    #[test_case(3, true ; "short run")]
    #[test_case(4, true ; "run at the bound")]
    #[test_case(5, false ; "run just over the bound")]
    #[test_case(40, false ; "sustained noise")]
    fn test_run_length_bounds(len: u32, expect_tap: bool) {
        let mut machine = TapStateMachine::new(4);
        let taps = run_of(&mut machine, len);

        assert_eq!(taps.len(), usize::from(expect_tap));
        assert_eq!(machine.state(), TapState::Idle);
        if let Some(tap) = taps.first() {
            assert_eq!(tap.run_len, len);
        }
    }

    #[test]
    fn test_tap_reports_last_noisy_peak() {
        let mut machine = TapStateMachine::new(4);
        let taps = run_of(&mut machine, 3);

        assert_eq!(taps[0].peak_frequency_hz, 1820.0);
    }

    #[test]
    fn test_state_transitions() {
        let mut machine = TapStateMachine::new(4);
        assert_eq!(machine.state(), TapState::Idle);

        assert_eq!(machine.on_block(Classification::Quiet, Some(100.0)), None);
        assert_eq!(machine.state(), TapState::Idle);

        machine.on_block(Classification::Noisy, Some(2000.0));
        assert_eq!(
            machine.state(),
            TapState::Accumulating {
                run_len: 1,
                last_peak_hz: Some(2000.0)
            }
        );

        machine.on_block(Classification::Noisy, None);
        assert_eq!(
            machine.state(),
            TapState::Accumulating {
                run_len: 2,
                last_peak_hz: Some(2000.0)
            }
        );
    }

    #[test]
    fn test_sustained_noise_counts_rejection() {
        let mut machine = TapStateMachine::new(2);
        run_of(&mut machine, 10);
        run_of(&mut machine, 1);

        assert_eq!(machine.rejected_runs(), 1);
    }

    #[test]
    fn test_restart_after_long_run_allows_tap() {
        let mut machine = TapStateMachine::new(4);
        for _ in 0..20 {
            machine.on_block(Classification::Noisy, Some(2000.0));
        }

        machine.restart_run();
        let tap = machine.on_block(Classification::Quiet, Some(1900.0));

        assert_eq!(
            tap,
            Some(TapEvent {
                peak_frequency_hz: 2000.0,
                run_len: 1
            })
        );
    }

    #[test]
    fn test_restart_from_idle_uses_current_peak() {
        let mut machine = TapStateMachine::new(4);
        machine.restart_run();

        let tap = machine.on_block(Classification::Quiet, Some(1900.0)).unwrap();
        assert_eq!(tap.peak_frequency_hz, 1900.0);
    }
}
