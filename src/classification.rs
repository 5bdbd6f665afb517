/// Per-block noisy/quiet classification

use crate::features::BlockFeatures;

/// Outcome of classifying one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Loud enough and matching the clap band
    Noisy,

    /// Anything else, including loud out-of-band sound
    Quiet,
}

impl Classification {
    /// A block is noisy only when both loudness and band energy clear their thresholds
    pub fn classify(features: &BlockFeatures, threshold: f64, magnitude_threshold: f64) -> Self {
        if features.rms_energy > threshold && features.band_energy_sum > magnitude_threshold {
            Classification::Noisy
        } else {
            Classification::Quiet
        }
    }

    pub fn is_noisy(self) -> bool {
        matches!(self, Classification::Noisy)
    }
}
