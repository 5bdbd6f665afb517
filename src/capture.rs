/// Block capture sources
///
/// Everything the processing loop reads audio from implements [`BlockSource`]:
/// WAV files, raw S16_LE byte streams (stdin, an `arecord` pipe) and an
/// in-memory queue for tests. The live microphone source lives in
/// `microphone` behind the `live` feature.

use crate::config::{DetectorConfig, SAMPLE_WIDTH_BYTES};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No audio within {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),
}

/// Shape of the blocks a source must produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_block: usize,
}

impl BlockFormat {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frames_per_block: config.frames_per_block(),
        }
    }

    pub fn samples_per_block(&self) -> usize {
        self.frames_per_block * self.channels as usize
    }

    pub fn block_bytes(&self) -> usize {
        self.samples_per_block() * SAMPLE_WIDTH_BYTES
    }
}

/// A source of raw audio blocks
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockSource: Send {
    /// Wait up to `timeout` for the next block of interleaved S16_LE samples
    ///
    /// `Ok(None)` means the stream has ended.
    async fn next_block(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, CaptureError>;
}

/// Encode samples as little-endian bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Replays a 16-bit PCM WAV file block by block
///
/// File data is always ready, so reads happen inline on the calling task and
/// the `next_block` timeout is ignored.
pub struct WavSource<R: Read> {
    reader: hound::WavReader<R>,
    format: BlockFormat,
    blocks_read: u64,
}

impl WavSource<std::io::BufReader<std::fs::File>> {
    pub fn open(path: &Path, format: BlockFormat) -> Result<Self, CaptureError> {
        info!("Opening WAV file {}", path.display());
        Self::from_reader(hound::WavReader::open(path)?, format)
    }
}

impl<R: Read> WavSource<R> {
    /// Wrap an open reader; its format must match `format`
    pub fn from_reader(reader: hound::WavReader<R>, format: BlockFormat) -> Result<Self, CaptureError> {
        let spec = reader.spec();

        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(CaptureError::UnsupportedFormat(format!(
                "expected 16-bit integer PCM, got {}-bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }

        if spec.channels != format.channels || spec.sample_rate != format.sample_rate {
            return Err(CaptureError::UnsupportedFormat(format!(
                "file is {} Hz / {} channels, detector expects {} Hz / {} channels",
                spec.sample_rate, spec.channels, format.sample_rate, format.channels
            )));
        }

        debug!(
            "WAV source: {} samples, {} per block",
            reader.len(),
            format.samples_per_block()
        );

        Ok(Self {
            reader,
            format,
            blocks_read: 0,
        })
    }

    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    fn read_block(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        let wanted = self.format.samples_per_block();
        let samples = self
            .reader
            .samples::<i16>()
            .take(wanted)
            .collect::<Result<Vec<i16>, _>>()?;

        if samples.len() < wanted {
            if !samples.is_empty() {
                debug!("Discarding trailing partial block of {} samples", samples.len());
            }
            return Ok(None);
        }

        self.blocks_read += 1;
        Ok(Some(samples_to_bytes(&samples)))
    }
}

#[async_trait]
impl<R: Read + Send> BlockSource for WavSource<R> {
    async fn next_block(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, CaptureError> {
        self.read_block()
    }
}

/// Reads raw S16_LE blocks from an async byte stream
pub struct RawStreamSource<R> {
    reader: R,
    block_bytes: usize,
    pending: Vec<u8>,
    finished: bool,
}

impl RawStreamSource<tokio::io::Stdin> {
    pub fn stdin(format: BlockFormat) -> Self {
        Self::new(tokio::io::stdin(), format)
    }
}

impl<R: AsyncRead + Unpin + Send> RawStreamSource<R> {
    pub fn new(reader: R, format: BlockFormat) -> Self {
        Self {
            reader,
            block_bytes: format.block_bytes(),
            pending: Vec::with_capacity(format.block_bytes()),
            finished: false,
        }
    }

    /// Read until a whole block is pending; partial progress survives a timeout
    async fn fill(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        let mut chunk = vec![0u8; self.block_bytes];

        while self.pending.len() < self.block_bytes {
            let wanted = self.block_bytes - self.pending.len();
            let n = self.reader.read(&mut chunk[..wanted]).await?;

            if n == 0 {
                self.finished = true;
                if !self.pending.is_empty() {
                    debug!(
                        "Stream ended mid-block, discarding {} bytes",
                        self.pending.len()
                    );
                    self.pending.clear();
                }
                return Ok(None);
            }

            self.pending.extend_from_slice(&chunk[..n]);
        }

        Ok(Some(std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.block_bytes),
        )))
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> BlockSource for RawStreamSource<R> {
    async fn next_block(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, CaptureError> {
        if self.finished {
            return Ok(None);
        }

        match tokio::time::timeout(timeout, self.fill()).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout(timeout)),
        }
    }
}

/// In-memory queue of blocks and capture failures
#[derive(Debug, Default)]
pub struct SyntheticSource {
    queue: VecDeque<Result<Vec<u8>, CaptureError>>,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks<I>(blocks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            queue: blocks.into_iter().map(Ok).collect(),
        }
    }

    pub fn push_block(&mut self, block: Vec<u8>) {
        self.queue.push_back(Ok(block));
    }

    pub fn push_error(&mut self, error: CaptureError) {
        self.queue.push_back(Err(error));
    }

    /// Entries not yet delivered
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// One block of a sine tone on every channel; `amplitude` is 0.0 - 1.0
    pub fn tone_block(format: &BlockFormat, frequency: f64, amplitude: f64) -> Vec<u8> {
        let samples: Vec<i16> = (0..format.frames_per_block)
            .flat_map(|i| {
                let t = i as f64 / format.sample_rate as f64;
                let value = amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin();
                std::iter::repeat((value * i16::MAX as f64) as i16).take(format.channels as usize)
            })
            .collect();

        samples_to_bytes(&samples)
    }

    pub fn silence_block(format: &BlockFormat) -> Vec<u8> {
        vec![0; format.block_bytes()]
    }
}

#[async_trait]
impl BlockSource for SyntheticSource {
    async fn next_block(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, CaptureError> {
        match self.queue.pop_front() {
            Some(entry) => entry.map(Some),
            None => Ok(None),
        }
    }
}
