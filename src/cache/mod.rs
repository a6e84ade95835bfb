//! Sliding-window access to detector magnitudes by absolute sample index.

pub mod producer;
pub mod sliding;

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

pub use producer::{MagnitudeBlock, Producer};
pub use sliding::{SegmentProducer, SlidingBuffer};

/// Magnitudes of every channel of a bank, addressable by `(channel, sample)`.
///
/// All channels share one segment sequence, so a segment always covers the
/// same sample range on every channel. Reading ahead generates segments;
/// reading behind the retained window fails with [`Error::Underflow`].
pub struct DetectorCache {
    buffer: SlidingBuffer<Producer>,
    channels: usize,
    sample_rate: u32,
    frequencies: Vec<f64>,
    end: Option<usize>,
}

impl DetectorCache {
    pub fn new(producer: Producer, num_segments: usize, segment_size: usize) -> Result<Self> {
        let bank = producer.bank();
        let channels = bank.channels();
        let sample_rate = bank.sample_rate();
        let frequencies = (0..channels).filter_map(|c| bank.input_frequency(c)).collect();
        let end = producer.len_hint();
        log::debug!(
            "DetectorCache: {num_segments} segments of {segment_size} samples, {channels} channels"
        );
        Ok(Self {
            buffer: SlidingBuffer::new(producer, num_segments, segment_size)?,
            channels,
            sample_rate,
            frequencies,
            end,
        })
    }

    /// Magnitude of `channel` at absolute sample `index`.
    pub fn get(&mut self, channel: usize, index: usize) -> Result<f64> {
        if channel >= self.channels {
            return Err(Error::InvalidParameter(format!(
                "channel {channel} out of range for {} channels",
                self.channels
            )));
        }
        let (block, offset) = self.buffer.locate(index)?;
        Ok(block[channel][offset])
    }

    /// Up to `count` magnitudes of `channel` ending at `last` inclusive,
    /// oldest first. Fewer are returned when the history starts before
    /// sample 0.
    pub fn history(&mut self, channel: usize, last: usize, count: usize) -> Result<Vec<f64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let first = last.saturating_add(1).saturating_sub(count);
        // Resolve the newest sample first so the window is in place
        self.get(channel, last)?;
        (first..=last).map(|n| self.get(channel, n)).collect()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Requested frequency of `channel` in Hz.
    pub fn frequency(&self, channel: usize) -> Option<f64> {
        self.frequencies.get(channel).copied()
    }

    /// First sample index still retained.
    pub fn oldest_available(&self) -> usize {
        self.buffer.oldest_available()
    }

    /// Total samples of input when known in advance.
    pub fn end(&self) -> Option<usize> {
        self.end
    }

    pub fn segment_size(&self) -> usize {
        self.buffer.segment_size()
    }

    pub fn num_segments(&self) -> usize {
        self.buffer.capacity()
    }
}

/// A [`DetectorCache`] that may be shared between threads. Every access
/// holds one lock across segment generation, eviction and the read.
#[derive(Clone)]
pub struct SharedDetectorCache {
    inner: Arc<Mutex<DetectorCache>>,
}

impl SharedDetectorCache {
    pub fn new(cache: DetectorCache) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    pub fn get(&self, channel: usize, index: usize) -> Result<f64> {
        self.inner.lock().map_err(|_| Error::LockPoisoned)?.get(channel, index)
    }

    pub fn history(&self, channel: usize, last: usize, count: usize) -> Result<Vec<f64>> {
        self.inner
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .history(channel, last, count)
    }

    pub fn channels(&self) -> Result<usize> {
        Ok(self.inner.lock().map_err(|_| Error::LockPoisoned)?.channels())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{normalize::test_tone, DetectorBank, Features};

    fn cache(len: usize, segments: usize, size: usize) -> DetectorCache {
        let input = test_tone(440.0, 48000.0, len, 1.0);
        let bank = DetectorBank::new(
            48000,
            &input,
            0,
            &[(440.0, 0.0), (880.0, 0.0)],
            Features::default().unnormalized_amplitude(),
            1e-4,
            25.0,
        )
        .unwrap();
        DetectorCache::new(Producer::new(bank), segments, size).unwrap()
    }

    #[test]
    fn repeated_reads_agree() {
        let mut c = cache(4000, 3, 500);
        let a = c.get(0, 1234).unwrap();
        let b = c.get(0, 1234).unwrap();
        assert_eq!(a, b);
        assert!(a > 0.0);
    }

    #[test]
    fn history_copies_oldest_first() {
        let mut c = cache(4000, 3, 500);
        let h = c.history(1, 999, 10).unwrap();
        assert_eq!(h.len(), 10);
        assert_eq!(h[9], c.get(1, 999).unwrap());
        assert_eq!(h[0], c.get(1, 990).unwrap());
        assert_eq!(c.history(1, 3, 10).unwrap().len(), 4);
        assert!(matches!(c.history(1, usize::MAX, 3), Err(Error::Exhausted { .. })));
    }

    #[test]
    fn bad_channel_and_end_of_input() {
        let mut c = cache(1000, 2, 300);
        assert!(matches!(c.get(2, 0), Err(Error::InvalidParameter(_))));
        assert!(matches!(c.get(0, 1000), Err(Error::Exhausted { .. })));
        assert!(c.get(0, 999).is_ok());
        assert_eq!(c.end(), Some(1000));
    }

    #[test]
    fn stream_mode_matches_buffer_mode() {
        let input = test_tone(440.0, 48000.0, 3000, 1.0);
        let bytes: Vec<u8> = input.iter().flat_map(|s| s.to_le_bytes()).collect();
        let features = Features::default().unnormalized_amplitude();
        let streamed =
            DetectorBank::new(48000, &[], 0, &[(440.0, 0.0)], features, 1e-4, 25.0).unwrap();
        let mut stream = DetectorCache::new(
            Producer::from_stream(streamed, std::io::Cursor::new(bytes)),
            10,
            1000,
        )
        .unwrap();
        let mut whole = cache(3000, 10, 1000);
        for n in [0, 999, 1000, 2999] {
            assert_eq!(stream.get(0, n).unwrap(), whole.get(0, n).unwrap());
        }
        assert!(matches!(stream.get(0, 3000), Err(Error::Exhausted { .. })));
        assert_eq!(stream.end(), None);
    }

    #[test]
    fn shared_cache_serializes_access() {
        let shared = SharedDetectorCache::new(cache(4000, 8, 500));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let s = shared.clone();
                std::thread::spawn(move || s.get(t % 2, 3000 + t).unwrap())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap() > 0.0);
        }
        assert_eq!(shared.channels().unwrap(), 2);
    }
}
