/// Live microphone capture (feature `live`)
///
/// The cpal stream runs on its own thread and feeds a [`SampleBuffer`]; the
/// processing loop pulls whole blocks out of that buffer. Stream errors
/// reported by the audio backend surface as capture errors on the next pull.

use crate::capture::{BlockFormat, BlockSource, CaptureError, samples_to_bytes};
use crate::sample_buffer::SampleBuffer;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name fragments that mark a device as a likely microphone
const DEVICE_KEYWORDS: [&str; 2] = ["mic", "input"];

/// Seconds of audio the capture buffer can hold before dropping old samples
const BUFFER_SECONDS: usize = 2;

/// Poll interval while waiting for a full block
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Names of every available input device
pub fn list_input_devices() -> Result<Vec<String>, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::Device(e.to_string()))?;

    Ok(devices
        .map(|d| d.name().unwrap_or_else(|_| "Unknown Device".to_string()))
        .collect())
}

/// Index of the first device whose name contains a microphone keyword
pub fn find_preferred_device(names: &[String]) -> Option<usize> {
    names.iter().position(|name| {
        let name = name.to_lowercase();
        DEVICE_KEYWORDS.iter().any(|keyword| name.contains(keyword))
    })
}

fn select_device(host: &cpal::Host) -> Result<cpal::Device, CaptureError> {
    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| CaptureError::Device(e.to_string()))?
        .collect();
    let names: Vec<String> = devices
        .iter()
        .map(|d| d.name().unwrap_or_default())
        .collect();

    if let Some(index) = find_preferred_device(&names) {
        info!("Using input device: {}", names[index]);
        if let Some(device) = devices.into_iter().nth(index) {
            return Ok(device);
        }
    }

    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::Device("No input device found".to_string()))?;
    info!(
        "No microphone-like device found, using default input: {}",
        device.name().unwrap_or_default()
    );
    Ok(device)
}

/// Live capture from the preferred input device
pub struct MicrophoneSource {
    buffer: Arc<SampleBuffer>,
    stream_error: Arc<Mutex<Option<String>>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    samples_per_block: usize,
}

impl MicrophoneSource {
    /// Open the device and start streaming
    pub fn start(format: BlockFormat) -> Result<Self, CaptureError> {
        let capacity = (format.sample_rate as usize * format.channels as usize * BUFFER_SECONDS)
            .max(format.samples_per_block() * 2);
        let buffer = Arc::new(
            SampleBuffer::with_capacity(capacity)
                .map_err(|e| CaptureError::Device(e.to_string()))?,
        );
        let stream_error = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let worker = {
            let buffer = Arc::clone(&buffer);
            let stream_error = Arc::clone(&stream_error);
            let shutdown = Arc::clone(&shutdown);

            // cpal streams are not Send on every platform, so the stream lives
            // and dies on this thread.
            std::thread::Builder::new()
                .name("clap-capture".to_string())
                .spawn(move || {
                    let stream = match open_stream(format, buffer, stream_error) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    while !shutdown.load(Ordering::Acquire) {
                        std::thread::park_timeout(Duration::from_millis(50));
                    }

                    if let Err(e) = stream.pause() {
                        debug!("Failed to pause audio stream: {}", e);
                    }
                    debug!("Capture thread stopped");
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(CaptureError::Device(
                    "Capture thread exited during startup".to_string(),
                ));
            }
        }

        info!(
            "Microphone capture started: {} Hz, {} channels",
            format.sample_rate, format.channels
        );

        Ok(Self {
            buffer,
            stream_error,
            shutdown,
            worker: Some(worker),
            samples_per_block: format.samples_per_block(),
        })
    }

    /// Samples lost because the processing loop fell behind
    pub fn dropped_samples(&self) -> u64 {
        self.buffer.dropped_samples()
    }

    fn take_stream_error(&self) -> Option<String> {
        self.stream_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

fn open_stream(
    format: BlockFormat,
    buffer: Arc<SampleBuffer>,
    stream_error: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = select_device(&host)?;

    let sample_format = device
        .default_input_config()
        .map_err(|e| CaptureError::Device(e.to_string()))?
        .sample_format();

    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = move |err: cpal::StreamError| {
        warn!("Audio stream error: {}", err);
        *stream_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                buffer.write(data);
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let samples: Vec<i16> = data
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .collect();
                buffer.write(&samples);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::UnsupportedFormat(format!(
                "device sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| CaptureError::Device(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;

    Ok(stream)
}

#[async_trait]
impl BlockSource for MicrophoneSource {
    async fn next_block(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, CaptureError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(message) = self.take_stream_error() {
                return Err(CaptureError::Stream(message));
            }

            if let Some(samples) = self.buffer.pop_block(self.samples_per_block) {
                return Ok(Some(samples_to_bytes(&samples)));
            }

            if Instant::now() >= deadline {
                return Err(CaptureError::Timeout(timeout));
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prefers_microphone_named_device() {
        let devices = names(&["HDMI Output", "USB Mic (Blue Yeti)", "Line Input"]);
        assert_eq!(find_preferred_device(&devices), Some(1));
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let devices = names(&["default", "Built-in INPUT"]);
        assert_eq!(find_preferred_device(&devices), Some(1));
    }

    #[test]
    fn test_no_keyword_falls_back() {
        let devices = names(&["default", "pulse"]);
        assert_eq!(find_preferred_device(&devices), None);
    }
}
