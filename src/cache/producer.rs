use std::io::Read;

use rustfft::num_complex::Complex64;

use super::sliding::SegmentProducer;
use crate::bank::DetectorBank;
use crate::error::Result;

/// Per-channel magnitudes for one segment, `[channel][sample]`.
pub type MagnitudeBlock = Vec<Vec<f64>>;

/// Drives a [`DetectorBank`] forward one segment at a time and hands out
/// the magnitudes of its output.
///
/// A producer either walks the bank's own input buffer or, in stream mode,
/// reads each segment's samples (little-endian `f32`) from a reader and
/// feeds them to the bank as the continuation of the stream. Stream mode
/// reads the bank's lookahead past each segment, so its output matches
/// buffer mode sample for sample.
pub struct Producer {
    bank: DetectorBank,
    stream: Option<Box<dyn Read + Send>>,
    stream_ended: bool,
    /// Samples read from the stream but not yet handed to the bank.
    pending: Vec<f32>,
}

impl Producer {
    pub fn new(mut bank: DetectorBank) -> Self {
        bank.seek(0);
        Self {
            bank,
            stream: None,
            stream_ended: false,
            pending: Vec::new(),
        }
    }

    pub fn from_stream(bank: DetectorBank, reader: impl Read + Send + 'static) -> Self {
        Self {
            bank,
            stream: Some(Box::new(reader)),
            stream_ended: false,
            pending: Vec::new(),
        }
    }

    pub fn bank(&self) -> &DetectorBank {
        &self.bank
    }

    pub fn into_bank(self) -> DetectorBank {
        self.bank
    }

    /// Total samples, when the whole input is known up front.
    pub fn len_hint(&self) -> Option<usize> {
        self.stream.is_none().then(|| self.bank.buffer_len())
    }

    /// Read until `want` samples are pending or the stream ends.
    fn fill(&mut self, want: usize) -> Result<()> {
        let Some(reader) = self.stream.as_mut() else {
            return Ok(());
        };
        if self.stream_ended || self.pending.len() >= want {
            return Ok(());
        }
        let mut bytes = vec![0u8; (want - self.pending.len()) * 4];
        let mut filled = 0;
        while filled < bytes.len() {
            let n = reader.read(&mut bytes[filled..])?;
            if n == 0 {
                self.stream_ended = true;
                break;
            }
            filled += n;
        }
        if filled % 4 != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("stream ended inside a sample ({} trailing bytes)", filled % 4),
            )
            .into());
        }
        self.pending.extend(
            bytes[..filled]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
        Ok(())
    }
}

impl SegmentProducer for Producer {
    type Segment = MagnitudeBlock;

    fn generate(&mut self, origin: usize, len: usize) -> Result<(MagnitudeBlock, usize)> {
        if self.stream.is_some() {
            let lookahead = self.bank.lookahead();
            self.fill(len + lookahead)?;
            let take = len.min(self.pending.len());
            let (piece, rest) = self.pending.split_at(take);
            let ahead = &rest[..lookahead.min(rest.len())];
            self.bank.continue_input(piece, ahead)?;
            self.pending.drain(..take);
        }

        let channels = self.bank.channels();
        let mut z = vec![vec![Complex64::default(); len]; channels];
        let n = self.bank.get_z(&mut z, len)?;
        z.iter_mut().for_each(|row| row.truncate(n));

        let mut block = vec![vec![0.0; n]; channels];
        let max = self.bank.abs_z(&mut block, &z)?;
        log::debug!("Generated segment at {origin}: {n} samples, peak {max:.4}");
        Ok((block, n))
    }

    fn more(&self) -> bool {
        match self.stream {
            Some(_) => !self.stream_ended || !self.pending.is_empty(),
            None => self.bank.tell() < self.bank.buffer_len(),
        }
    }
}
