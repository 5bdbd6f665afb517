/// Block feature extraction
///
/// Turns one raw block of interleaved 16-bit PCM into the scalars the
/// classifier needs: RMS energy over every sample and the spectral magnitude
/// concentrated in the clap band.

use crate::config::{DetectorConfig, SAMPLE_WIDTH_BYTES};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, trace};

/// Scale that maps a signed 16-bit sample onto [-1.0, 1.0]
pub const SAMPLE_NORMALIZE: f64 = 1.0 / 32768.0;

/// Off-size FFT plans kept before the cache is cleared
const MAX_OFF_SIZE_PLANS: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("Malformed block: {len} bytes is not a multiple of the {width}-byte sample width")]
    MalformedBlock { len: usize, width: usize },

    #[error("Malformed block: no samples")]
    EmptyBlock,
}

/// Features derived from a single block
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BlockFeatures {
    /// Root-mean-square of the normalized samples (0.0 - 1.0)
    pub rms_energy: f64,

    /// Summed FFT magnitude inside the clap band
    pub band_energy_sum: f64,

    /// Frequency of the strongest bin inside the clap band
    pub peak_frequency_hz: f64,
}

/// Decode little-endian signed 16-bit samples
pub fn decode_samples(block: &[u8]) -> Result<Vec<i16>, FeatureError> {
    if block.is_empty() {
        return Err(FeatureError::EmptyBlock);
    }

    if block.len() % SAMPLE_WIDTH_BYTES != 0 {
        return Err(FeatureError::MalformedBlock {
            len: block.len(),
            width: SAMPLE_WIDTH_BYTES,
        });
    }

    Ok(block
        .chunks_exact(SAMPLE_WIDTH_BYTES)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// RMS energy of normalized samples
pub fn rms_energy(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let n = s as f64 * SAMPLE_NORMALIZE;
            n * n
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt()
}

/// Extracts RMS and clap-band features from raw blocks
pub struct FeatureExtractor {
    sample_rate: f64,
    channels: usize,
    band_low_hz: f64,
    band_high_hz: f64,
    frames_per_block: usize,
    fft: Arc<dyn Fft<f64>>,
    off_size_plans: Mutex<HashMap<usize, Arc<dyn Fft<f64>>>>,
}

impl FeatureExtractor {
    pub fn new(config: &DetectorConfig) -> Self {
        let frames_per_block = config.frames_per_block().max(1);
        let fft = FftPlanner::new().plan_fft_forward(frames_per_block);

        debug!(
            "Feature extractor: {} frames/block, bin width {:.2} Hz, band {:.0}-{:.0} Hz",
            frames_per_block,
            config.sample_rate as f64 / frames_per_block as f64,
            config.clap_band_low_hz,
            config.clap_band_high_hz
        );

        Self {
            sample_rate: config.sample_rate as f64,
            channels: config.channels.max(1) as usize,
            band_low_hz: config.clap_band_low_hz,
            band_high_hz: config.clap_band_high_hz,
            frames_per_block,
            fft,
            off_size_plans: Mutex::new(HashMap::new()),
        }
    }

    /// Extract features from one raw block
    pub fn extract(&self, block: &[u8]) -> Result<BlockFeatures, FeatureError> {
        let samples = decode_samples(block)?;
        Ok(self.extract_samples(&samples))
    }

    /// Extract features from already decoded interleaved samples
    pub fn extract_samples(&self, samples: &[i16]) -> BlockFeatures {
        let rms_energy = rms_energy(samples);

        // Channels of one frame are summed; a trailing partial frame is ignored.
        let frames: Vec<f64> = samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().map(|&s| s as f64 * SAMPLE_NORMALIZE).sum())
            .collect();

        if frames.is_empty() {
            return BlockFeatures {
                rms_energy,
                ..Default::default()
            };
        }

        let spectrum = self.magnitude_spectrum(&frames);
        let bin_width = self.sample_rate / frames.len() as f64;
        let (low, high) = self.band_bins(bin_width, spectrum.len());

        let band = &spectrum[low..high];
        let band_energy_sum: f64 = band.iter().sum();

        let mut peak_index = 0;
        for (i, &magnitude) in band.iter().enumerate() {
            if magnitude > band[peak_index] {
                peak_index = i;
            }
        }
        let peak_frequency_hz = (low + peak_index) as f64 * bin_width;

        trace!(
            "Block features: rms={:.5}, band_sum={:.1}, peak={:.1} Hz",
            rms_energy,
            band_energy_sum,
            peak_frequency_hz
        );

        BlockFeatures {
            rms_energy,
            band_energy_sum,
            peak_frequency_hz,
        }
    }

    /// Magnitudes of the non-negative frequency bins
    fn magnitude_spectrum(&self, frames: &[f64]) -> Vec<f64> {
        let mut buffer: Vec<Complex<f64>> =
            frames.iter().map(|&x| Complex::new(x, 0.0)).collect();

        if frames.len() == self.frames_per_block {
            self.fft.process(&mut buffer);
        } else {
            self.off_size_plan(frames.len()).process(&mut buffer);
        }

        buffer[..frames.len() / 2 + 1]
            .iter()
            .map(|c| c.norm())
            .collect()
    }

    fn off_size_plan(&self, len: usize) -> Arc<dyn Fft<f64>> {
        let mut plans = self
            .off_size_plans
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(plan) = plans.get(&len) {
            return Arc::clone(plan);
        }

        if plans.len() >= MAX_OFF_SIZE_PLANS {
            plans.clear();
        }

        debug!("Planning FFT for an off-size block of {} frames", len);
        let plan = FftPlanner::new().plan_fft_forward(len);
        plans.insert(len, Arc::clone(&plan));
        plan
    }

    /// Number of off-size block lengths with a cached FFT plan
    pub fn cached_off_size_plans(&self) -> usize {
        self.off_size_plans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Half-open bin range covering the clap band, never empty
    fn band_bins(&self, bin_width: f64, spectrum_len: usize) -> (usize, usize) {
        let low = ((self.band_low_hz / bin_width).floor() as usize).min(spectrum_len - 1);
        let high = ((self.band_high_hz / bin_width).floor() as usize).min(spectrum_len);

        (low, high.max(low + 1))
    }
}
