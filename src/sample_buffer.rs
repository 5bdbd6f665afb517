/// Sample buffer for live capture
///
/// Bounded ring of 16-bit samples shared between the audio callback thread
/// (producer) and the processing loop (consumer). When the consumer falls
/// behind, the oldest samples are dropped so the loop always sees recent audio.

use cache_padded::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SampleBufferError {
    #[error("Buffer underflow: attempted to read {0} samples, but only {1} available")]
    Underflow(usize, usize),

    #[error("Invalid buffer size: {0}")]
    InvalidSize(usize),
}

/// Ring buffer of interleaved i16 samples
pub struct SampleBuffer {
    ring: CachePadded<Mutex<HeapRb<i16>>>,
    dropped: CachePadded<AtomicU64>,
}

impl SampleBuffer {
    /// Create a buffer holding at most `capacity` samples
    pub fn with_capacity(capacity: usize) -> Result<Self, SampleBufferError> {
        if capacity == 0 {
            return Err(SampleBufferError::InvalidSize(capacity));
        }

        debug!("Creating sample buffer with capacity: {} samples", capacity);

        Ok(Self {
            ring: CachePadded::new(Mutex::new(HeapRb::new(capacity))),
            dropped: CachePadded::new(AtomicU64::new(0)),
        })
    }

    // Poisoning is ignored: the ring only ever holds plain samples.
    fn ring(&self) -> MutexGuard<'_, HeapRb<i16>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write samples, dropping the oldest ones if there is not enough room
    ///
    /// Returns the number of samples now held from this write (at most the capacity).
    pub fn write(&self, samples: &[i16]) -> usize {
        let mut ring = self.ring();
        let capacity = ring.capacity().get();

        let mut dropped = 0;
        let samples = if samples.len() > capacity {
            dropped += samples.len() - capacity;
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        let vacant = ring.vacant_len();
        if samples.len() > vacant {
            dropped += ring.skip(samples.len() - vacant);
        }

        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            trace!("Buffer full, dropped {} oldest samples", dropped);
        }

        ring.push_slice(samples)
    }

    /// Remove exactly `len` samples if that many are buffered
    pub fn pop_block(&self, len: usize) -> Option<Vec<i16>> {
        self.read(len).ok()
    }

    /// Read and remove `count` samples
    pub fn read(&self, count: usize) -> Result<Vec<i16>, SampleBufferError> {
        let mut ring = self.ring();
        let available = ring.occupied_len();

        if count > available {
            return Err(SampleBufferError::Underflow(count, available));
        }

        let mut result = vec![0; count];
        let read = ring.pop_slice(&mut result);
        result.truncate(read);

        Ok(result)
    }

    /// Copy up to `count` of the oldest samples without removing them
    pub fn peek(&self, count: usize) -> Vec<i16> {
        self.ring().iter().take(count).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ring().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring().capacity().get()
    }

    pub fn free_space(&self) -> usize {
        self.ring().vacant_len()
    }

    /// Samples discarded because the consumer fell behind
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        let mut ring = self.ring();
        let occupied = ring.occupied_len();
        ring.skip(occupied);
        debug!("Cleared sample buffer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_buffer_creation() {
        let buffer = SampleBuffer::with_capacity(1000).unwrap();
        assert_eq!(buffer.capacity(), 1000);
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            SampleBuffer::with_capacity(0).err(),
            Some(SampleBufferError::InvalidSize(0))
        );
    }

    #[test]
    fn test_write_and_read() {
        let buffer = SampleBuffer::with_capacity(1000).unwrap();
        let samples: Vec<i16> = (0..100).collect();

        assert_eq!(buffer.write(&samples), 100);
        assert_eq!(buffer.len(), 100);

        let read = buffer.read(50).unwrap();
        assert_eq!(read.len(), 50);
        assert_eq!(buffer.len(), 50);
        assert_eq!(read[0], 0);
        assert_eq!(read[49], 49);
    }

    #[test]
    fn test_overflow_keeps_newest_samples() {
        let buffer = SampleBuffer::with_capacity(10).unwrap();

        buffer.write(&[1; 10]);
        buffer.write(&[2; 5]);

        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.dropped_samples(), 5);
        assert_eq!(buffer.peek(10), [&[1i16; 5][..], &[2i16; 5][..]].concat());
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let buffer = SampleBuffer::with_capacity(100).unwrap();
        let samples: Vec<i16> = (0..150).collect();

        assert_eq!(buffer.write(&samples), 100);
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.peek(1), vec![50]);
        assert_eq!(buffer.dropped_samples(), 50);
    }

    #[test]
    fn test_buffer_underflow() {
        let buffer = SampleBuffer::with_capacity(100).unwrap();
        buffer.write(&[1; 50]);

        assert_eq!(buffer.read(100), Err(SampleBufferError::Underflow(100, 50)));
        assert_eq!(buffer.pop_block(100), None);
        assert_eq!(buffer.len(), 50);
    }

    #[test]
    fn test_pop_block_is_fifo() {
        let buffer = SampleBuffer::with_capacity(64).unwrap();
        buffer.write(&[1, 2, 3]);
        buffer.write(&[4, 5]);

        assert_eq!(buffer.pop_block(4), Some(vec![1, 2, 3, 4]));
        assert_eq!(buffer.pop_block(1), Some(vec![5]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clear_and_free_space() {
        let buffer = SampleBuffer::with_capacity(100).unwrap();
        assert_eq!(buffer.free_space(), 100);

        buffer.write(&[1; 30]);
        assert_eq!(buffer.free_space(), 70);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.free_space(), 100);
    }

    #[test]
    fn test_shared_between_threads() {
        let buffer = Arc::new(SampleBuffer::with_capacity(4096).unwrap());

        let producer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    buffer.write(&[7; 100]);
                }
            })
        };
        producer.join().unwrap();

        assert_eq!(buffer.len(), 1000);
        assert!(buffer.read(1000).unwrap().iter().all(|&s| s == 7));
    }
}
