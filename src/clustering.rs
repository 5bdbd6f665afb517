/// Clap clustering
///
/// Groups taps that follow each other within the rapid-clap interval into a
/// counted sequence and reports when the sequence reaches its goal.

use crate::config::DetectorConfig;
use std::time::Duration;
use tracing::{debug, info};

/// Clap-sequence session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClapSession {
    /// Stream time of the most recent tap
    pub last_tap_time: Option<Duration>,

    /// Claps in the current rapid sequence
    pub clap_count: u32,
}

/// Result of feeding one tap to the clusterer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClapUpdate {
    /// Count reported for this clap (1-based within the sequence)
    pub count: u32,

    pub peak_frequency_hz: f64,

    /// This clap completed the sequence
    pub completed: bool,
}

pub struct ClapClusterer {
    goal: u32,
    rapid_interval: Duration,
    session: ClapSession,
}

impl ClapClusterer {
    pub fn new(goal: u32, rapid_interval: Duration) -> Self {
        Self {
            goal,
            rapid_interval,
            session: ClapSession::default(),
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(config.clap_count_goal, config.rapid_clap_interval())
    }

    /// Feed one tap observed at `timestamp` (stream time)
    pub fn on_tap(&mut self, timestamp: Duration, peak_frequency_hz: f64) -> ClapUpdate {
        let rapid = match self.session.last_tap_time {
            Some(last) => timestamp.saturating_sub(last) < self.rapid_interval,
            None => false,
        };

        if rapid {
            self.session.clap_count = self.session.clap_count.saturating_add(1);
            debug!("{} Clap Detected", self.session.clap_count);
        } else {
            self.session.clap_count = 1;
            debug!("{} Detected / Reset Count", self.session.clap_count);
        }
        self.session.last_tap_time = Some(timestamp);

        let count = self.session.clap_count;
        let completed = count == self.goal;

        if completed {
            info!("{} rapid claps detected", count);
            self.session.clap_count = 0;
        }

        ClapUpdate {
            count,
            peak_frequency_hz,
            completed,
        }
    }

    pub fn session(&self) -> &ClapSession {
        &self.session
    }

    pub fn goal(&self) -> u32 {
        self.goal
    }

    pub fn reset(&mut self) {
        self.session = ClapSession::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusterer() -> ClapClusterer {
        ClapClusterer::new(4, Duration::from_secs(3))
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_four_rapid_taps_complete_sequence() {
        let mut clusterer = clusterer();

        let updates: Vec<ClapUpdate> = [0.0, 1.0, 2.0, 3.0]
            .iter()
            .map(|&t| clusterer.on_tap(secs(t), 2000.0))
            .collect();

        let counts: Vec<u32> = updates.iter().map(|u| u.count).collect();
        assert_eq!(counts, vec![1, 2, 3, 4]);
        assert_eq!(updates.iter().filter(|u| u.completed).count(), 1);
        assert!(updates[3].completed);

        assert_eq!(clusterer.session().clap_count, 0);
        assert_eq!(clusterer.session().last_tap_time, Some(secs(3.0)));
    }

    #[test]
    fn test_slow_tap_resets_count() {
        let mut clusterer = clusterer();

        assert_eq!(clusterer.on_tap(secs(0.0), 2000.0).count, 1);
        let second = clusterer.on_tap(secs(10.0), 2000.0);

        assert_eq!(second.count, 1);
        assert!(!second.completed);
    }

    #[test]
    fn test_gap_equal_to_interval_is_not_rapid() {
        let mut clusterer = clusterer();

        clusterer.on_tap(secs(0.0), 2000.0);
        assert_eq!(clusterer.on_tap(secs(3.0), 2000.0).count, 1);
        assert_eq!(clusterer.on_tap(secs(5.9), 2000.0).count, 2);
    }

    #[test]
    fn test_rapid_tap_after_completion_counts_from_one() {
        let mut clusterer = clusterer();
        for t in [0.0, 0.5, 1.0, 1.5] {
            clusterer.on_tap(secs(t), 2000.0);
        }

        // Count was reset to 0 but the completing tap's time is kept
        let next = clusterer.on_tap(secs(2.0), 2000.0);
        assert_eq!(next.count, 1);
        assert!(!next.completed);
    }

    #[test]
    fn test_peak_frequency_passed_through() {
        let mut clusterer = clusterer();
        assert_eq!(clusterer.on_tap(secs(0.0), 1987.5).peak_frequency_hz, 1987.5);
    }

    #[test]
    fn test_goal_of_one_completes_every_tap() {
        let mut clusterer = ClapClusterer::new(1, Duration::from_secs(3));

        assert!(clusterer.on_tap(secs(0.0), 2000.0).completed);
        assert!(clusterer.on_tap(secs(0.1), 2000.0).completed);
    }

    #[test]
    fn test_reset() {
        let mut clusterer = clusterer();
        clusterer.on_tap(secs(0.0), 2000.0);
        clusterer.reset();

        assert_eq!(*clusterer.session(), ClapSession::default());
    }
}
