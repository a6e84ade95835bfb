//! Onset detection over cached detector magnitudes.

use serde::Serialize;

use crate::bank::DetectorBank;
use crate::cache::{DetectorCache, Producer};
use crate::error::{Error, Result};

/// Onsets closer than this (inclusive) are reported as one event.
pub const SIMULTANEITY_WINDOW: f64 = 0.030;

const SEGMENT_SECONDS: f64 = 0.020;
const RETAINED_SEGMENTS: usize = 1000;
const LOOK_BACK_SECONDS: f64 = 0.250;
const LOOK_AHEAD_SECONDS: f64 = 0.010;
/// Magnitudes at or below this fraction of the threshold count as quiet.
/// The rise behind a crossing is traced back to the last quiet sample.
const QUIET_FRACTION: f64 = 1e-2;
/// Dips smaller than this fraction of the threshold do not end a rise.
const RIPPLE_FRACTION: f64 = 1e-5;
/// Keeps the normalized rise finite when the previous magnitude is zero.
const RISE_FLOOR_FRACTION: f64 = 1e-6;
/// Magnitude at the crossing must be at least this multiple of the
/// magnitude just before the steepest rise for a clean onset.
const CLEAN_RISE: f64 = 2.0;
const TIME_EPSILON: f64 = 1e-9;

/// One detected onset, possibly merged across channels.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Onset {
    /// Seconds from the start of the input.
    pub time: f64,
    pub sample: usize,
    pub channels: Vec<usize>,
    /// Requested frequency of each entry in `channels`.
    pub frequencies: Vec<f64>,
    /// The threshold was crossed but no clear rise could be isolated.
    pub vague: bool,
}

#[derive(Clone, Copy, Debug)]
struct ChannelState {
    armed: bool,
    last_onset: Option<usize>,
}

/// Scans every channel of a [`DetectorCache`] for rises through a threshold.
///
/// The scan resumes where the previous call stopped, so a detector over a
/// stream can be polled repeatedly.
pub struct OnsetDetector {
    cache: DetectorCache,
    states: Vec<ChannelState>,
    next_sample: usize,
}

impl OnsetDetector {
    /// Cache the bank's output in 20 ms segments, keeping the last 20 s.
    pub fn new(bank: DetectorBank) -> Result<Self> {
        let segment = ((bank.sample_rate() as f64 * SEGMENT_SECONDS) as usize).max(1);
        let cache = DetectorCache::new(Producer::new(bank), RETAINED_SEGMENTS, segment)?;
        Ok(Self::with_cache(cache))
    }

    pub fn with_cache(cache: DetectorCache) -> Self {
        let states = vec![
            ChannelState {
                armed: true,
                last_onset: None,
            };
            cache.channels()
        ];
        let next_sample = cache.oldest_available();
        Self {
            cache,
            states,
            next_sample,
        }
    }

    pub fn cache(&self) -> &DetectorCache {
        &self.cache
    }

    /// Append onsets found in the remaining input to `onsets`, sorted by time.
    ///
    /// A crossing happens when a channel's magnitude reaches `threshold`
    /// after being below it. The onset is placed at the steepest normalized
    /// rise near the crossing. Crossings without a clear rise go to `vague`
    /// when it is supplied and are dropped otherwise.
    pub fn find_onsets(
        &mut self,
        onsets: &mut Vec<Onset>,
        threshold: f64,
        mut vague: Option<&mut Vec<Onset>>,
    ) -> Result<()> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "onset threshold must be in (0, 1], got {threshold}"
            )));
        }
        let sr = self.cache.sample_rate() as f64;
        let look_back = (sr * LOOK_BACK_SECONDS) as usize;
        // Never look so far ahead that the current segment would be evicted
        let reach = (self.cache.num_segments() - 1) * self.cache.segment_size();
        let look_ahead = ((sr * LOOK_AHEAD_SECONDS) as usize).min(reach).max(1);

        let mut n = self.next_sample;
        'scan: loop {
            for channel in 0..self.states.len() {
                let m = match self.cache.get(channel, n) {
                    Ok(m) => m,
                    Err(Error::Exhausted { .. }) => break 'scan,
                    Err(e) => return Err(e),
                };
                let state = self.states[channel];
                if state.armed && m >= threshold {
                    self.states[channel].armed = false;
                    let located = self.localize(channel, n, threshold, look_back, look_ahead)?;
                    let frequency = self.cache.frequency(channel).unwrap_or_default();
                    match located {
                        Some(sample) => {
                            log::debug!("Onset on channel {channel} at {sample} (crossing {n})");
                            self.states[channel].last_onset = Some(sample);
                            onsets.push(Onset {
                                time: sample as f64 / sr,
                                sample,
                                channels: vec![channel],
                                frequencies: vec![frequency],
                                vague: false,
                            });
                        }
                        None => {
                            log::debug!("Vague crossing on channel {channel} at sample {n}");
                            self.states[channel].last_onset = Some(n);
                            if let Some(v) = vague.as_deref_mut() {
                                v.push(Onset {
                                    time: n as f64 / sr,
                                    sample: n,
                                    channels: vec![channel],
                                    frequencies: vec![frequency],
                                    vague: true,
                                });
                            }
                        }
                    }
                } else if !state.armed && m < threshold {
                    self.states[channel].armed = true;
                }
            }
            n += 1;
        }
        self.next_sample = n;

        onsets.sort_by(|a, b| a.time.total_cmp(&b.time));
        if let Some(v) = vague {
            v.sort_by(|a, b| a.time.total_cmp(&b.time));
        }
        Ok(())
    }

    /// Sample of steepest normalized rise around a crossing at `n`, or None
    /// when the rise is not clean.
    ///
    /// Only the rise that ends at the crossing is searched: from the crossing
    /// back to the last quiet sample, then on to the trough before it.
    /// Earlier movement, such as crosstalk from a note on a neighbouring
    /// channel, is never a candidate.
    fn localize(
        &mut self,
        channel: usize,
        n: usize,
        threshold: f64,
        look_back: usize,
        look_ahead: usize,
    ) -> Result<Option<usize>> {
        let crossing = self.cache.get(channel, n)?;

        // Extend forward first: this may generate segments and move the window
        let mut end = n + 1;
        while end < n + look_ahead {
            match self.cache.get(channel, end) {
                Ok(_) => end += 1,
                Err(Error::Exhausted { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        let mut start = n.saturating_sub(look_back).max(self.cache.oldest_available() + 1);
        if let Some(previous) = self.states[channel].last_onset {
            start = start.max(previous + 1);
        }
        if start > n {
            return Ok(None);
        }

        // history[j] is the magnitude at sample start - 1 + j
        let history = self.cache.history(channel, end - 1, end - start + 1)?;
        let quiet = threshold * QUIET_FRACTION;
        let ripple = threshold * RIPPLE_FRACTION;
        let floor = threshold * RISE_FLOOR_FRACTION;

        let mut from = n + 1 - start;
        while from > 0 && history[from] > quiet {
            from -= 1;
        }
        while from > 0 && history[from - 1] <= history[from] + ripple {
            from -= 1;
        }

        let mut best: Option<(usize, f64)> = None;
        for j in from + 1..history.len() {
            let rise = (history[j] - history[j - 1]) / (history[j - 1] + floor);
            if best.map_or(true, |(_, r)| rise > r) {
                best = Some((j, rise));
            }
        }
        Ok(best.and_then(|(j, rise)| {
            let before = history[j - 1];
            (rise > 0.0 && crossing >= CLEAN_RISE * before).then_some(start - 1 + j)
        }))
    }

    /// Group onsets lying within [`SIMULTANEITY_WINDOW`] of the first onset
    /// of each group into one record. A channel never appears twice in a
    /// group; a repeat starts a new group.
    pub fn sort_simultaneous(onsets: &[Onset]) -> Vec<Onset> {
        let mut sorted = onsets.to_vec();
        sorted.sort_by(|a, b| a.time.total_cmp(&b.time));

        let mut merged: Vec<Onset> = Vec::new();
        for onset in sorted {
            if let Some(group) = merged.last_mut() {
                let close = onset.time - group.time <= SIMULTANEITY_WINDOW + TIME_EPSILON;
                let clash = onset.channels.iter().any(|c| group.channels.contains(c));
                if close && !clash {
                    group.channels.extend(&onset.channels);
                    group.frequencies.extend(&onset.frequencies);
                    group.vague &= onset.vague;
                    continue;
                }
            }
            merged.push(onset);
        }
        merged
    }
}
