/// Clap detector library
///
/// Detects sequences of rapid hand claps in a 16-bit PCM block stream: FFT
/// band matching, an adaptive loudness threshold, a length-bounded tap
/// detector and time-based clap clustering.

pub mod capture;
pub mod classification;
pub mod clustering;
pub mod config;
pub mod detector;
pub mod features;
pub mod listener;
#[cfg(feature = "live")]
pub mod microphone;
pub mod sample_buffer;
pub mod tap;
pub mod threshold;

// Re-export main types
pub use capture::{BlockFormat, BlockSource, CaptureError, RawStreamSource, SyntheticSource, WavSource};
pub use classification::Classification;
pub use clustering::{ClapClusterer, ClapSession, ClapUpdate};
pub use config::{ConfigError, DetectorConfig};
pub use detector::{BlockReport, ClapDetector, DetectorEvent, DetectorStats};
pub use features::{BlockFeatures, FeatureError, FeatureExtractor};
pub use listener::ClapListener;
#[cfg(feature = "live")]
pub use microphone::{list_input_devices, MicrophoneSource};
pub use sample_buffer::{SampleBuffer, SampleBufferError};
pub use tap::{TapEvent, TapState, TapStateMachine};
pub use threshold::{DetectorState, ThresholdAdjustment, ThresholdController, ThresholdSettings};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
