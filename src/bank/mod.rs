//! The detector bank: a set of Hopf oscillators driven by one input signal.

pub mod detector;
pub mod features;
pub mod normalize;
pub mod pitches;

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::ops::Range;

use rayon::prelude::*;
use rayon::ThreadPool;
use rustfft::num_complex::Complex64;

use crate::error::{Error, Result};
use crate::profile::{DetectorProfile, Profile, ProfileStore};
use crate::shift::{FrequencyShifter, HilbertFir, DEFAULT_FIR_LENGTH};

pub use detector::Detector;
pub use features::{AmpNorm, Features, FreqNorm, Solver};
pub use pitches::{EDO12_PIANO, SUPPORTED_SAMPLE_RATES};

pub const DEFAULT_DAMPING: f64 = 0.0001;
pub const DEFAULT_GAIN: f64 = 25.0;

/// Modulated channels land this far above a multiple of the modulation step.
const MODULATION_OFFSET: f64 = 50.0;

/// Per-channel bookkeeping alongside the detector.
#[derive(Clone, Debug)]
struct Component {
    /// Frequency the caller asked for.
    f_in: f64,
    bandwidth: f64,
    /// Index into `DetectorBank::signals`; 0 is the unshifted input.
    signal: usize,
}

/// How detectors get their scaling and final tuning.
enum Calibration<'a> {
    Measure,
    Restore(&'a [DetectorProfile]),
}

/// A bank of independently tuned detectors sharing sample rate, solver,
/// damping and gain.
///
/// The input is held gain-scaled. Channels tuned above the solver's
/// modulation step read a frequency-shifted copy instead, one copy per
/// modulation multiple.
pub struct DetectorBank {
    sample_rate: u32,
    features: Features,
    damping: f64,
    gain: f64,
    threads: usize,
    pool: Option<ThreadPool>,
    detectors: Vec<Detector>,
    components: Vec<Component>,
    /// Modulation multiple -> shift applied for it.
    shifts: BTreeMap<u32, f64>,
    signals: Vec<Vec<f32>>,
    position: usize,
    /// Stream index of `signals[..][0]`.
    origin: usize,
    /// Last gain-scaled samples before `origin`, as FIR context for the next piece.
    history: Vec<f32>,
    fir: HilbertFir,
}

impl DetectorBank {
    /// Build a bank from `(frequency Hz, bandwidth Hz)` channel pairs.
    ///
    /// `threads == 0` processes every channel on the calling thread.
    pub fn new(
        sample_rate: u32,
        input: &[f32],
        threads: usize,
        channels: &[(f64, f64)],
        features: Features,
        damping: f64,
        gain: f64,
    ) -> Result<Self> {
        Self::assemble(
            sample_rate,
            input,
            threads,
            channels,
            features,
            damping,
            gain,
            Calibration::Measure,
        )
    }

    /// An 88-key minimum-bandwidth bank with default features, damping and gain.
    pub fn with_defaults(sample_rate: u32, input: &[f32]) -> Result<Self> {
        let channels: Vec<(f64, f64)> = EDO12_PIANO.iter().map(|&f| (f, 0.0)).collect();
        let threads = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self::new(
            sample_rate,
            input,
            threads,
            &channels,
            Features::default(),
            DEFAULT_DAMPING,
            DEFAULT_GAIN,
        )
    }

    /// Rebuild a bank saved under `name`, restoring tuning and scaling
    /// without repeating the normalization passes.
    pub fn from_profile(store: &dyn ProfileStore, name: &str, input: &[f32]) -> Result<Self> {
        let profile = store.load(name)?;
        Self::from_profile_record(&profile, input)
    }

    pub fn from_profile_record(profile: &Profile, input: &[f32]) -> Result<Self> {
        let channels: Vec<(f64, f64)> = profile
            .detectors
            .iter()
            .map(|d| (d.w_in / (2.0 * PI), d.bw))
            .collect();
        Self::assemble(
            profile.sample_rate,
            input,
            profile.max_threads,
            &channels,
            profile.features,
            profile.damping,
            profile.gain,
            Calibration::Restore(&profile.detectors),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        sample_rate: u32,
        input: &[f32],
        threads: usize,
        channels: &[(f64, f64)],
        features: Features,
        damping: f64,
        gain: f64,
        calibration: Calibration<'_>,
    ) -> Result<Self> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(Error::InvalidParameter(format!(
                "sample rate should be 44100 or 48000, got {sample_rate}"
            )));
        }
        if channels.is_empty() {
            return Err(Error::InvalidParameter("no channels given".into()));
        }
        if !(damping.is_finite() && damping > 0.0) {
            return Err(Error::InvalidParameter(format!("damping must be positive, got {damping}")));
        }
        if !(gain.is_finite() && gain > 0.0) {
            return Err(Error::InvalidParameter(format!("gain must be positive, got {gain}")));
        }

        // Assign each channel to the direct input or a shifted copy
        let step = features.modulation_step();
        let mut shifts = BTreeMap::new();
        let mut components = Vec::with_capacity(channels.len());
        let mut detectors = Vec::with_capacity(channels.len());
        for &(f_in, bandwidth) in channels {
            if !(f_in.is_finite() && f_in > 0.0) {
                return Err(Error::InvalidParameter(format!(
                    "channel frequency must be positive, got {f_in}"
                )));
            }
            let multiple = (f_in / step).floor() as u32;
            let mut f_det = f_in;
            if multiple > 0 {
                let shift = -(multiple as f64) * step + MODULATION_OFFSET;
                shifts.insert(multiple, shift);
                f_det += shift;
            }
            detectors.push(Detector::new(
                f_det,
                bandwidth,
                damping,
                sample_rate as f64,
                gain,
                features.solver,
            )?);
            components.push(Component { f_in, bandwidth, signal: 0 });
        }
        let signal_of: BTreeMap<u32, usize> =
            shifts.keys().enumerate().map(|(i, &m)| (m, i + 1)).collect();
        for component in components.iter_mut() {
            let multiple = (component.f_in / step).floor() as u32;
            component.signal = signal_of.get(&multiple).copied().unwrap_or(0);
        }

        let pool = if threads > 0 {
            Some(rayon::ThreadPoolBuilder::new().num_threads(threads).build()?)
        } else {
            None
        };

        let mut bank = Self {
            sample_rate,
            features,
            damping,
            gain,
            threads,
            pool,
            detectors,
            components,
            shifts,
            signals: Vec::new(),
            position: 0,
            origin: 0,
            history: Vec::new(),
            fir: HilbertFir::new(DEFAULT_FIR_LENGTH)?,
        };

        match calibration {
            Calibration::Measure => bank.normalize(),
            Calibration::Restore(saved) => bank.restore(saved)?,
        }
        bank.set_input(input)?;

        log::info!(
            "DetectorBank: {} channels at {} Hz, {}, damping {}, gain {}, {} threads",
            bank.detectors.len(),
            sample_rate,
            features,
            damping,
            gain,
            threads
        );
        Ok(bank)
    }

    fn normalize(&mut self) {
        let features = self.features;
        if features.freq_norm == FreqNorm::Unnormalized
            && features.amp_norm == AmpNorm::Unnormalized
        {
            return;
        }
        let gain = self.gain;
        let calibrate = move |det: &mut Detector| {
            if features.freq_norm == FreqNorm::SearchNormalized {
                normalize::search_normalize(det, gain);
            }
            if features.amp_norm == AmpNorm::Normalized {
                normalize::amplitude_normalize(det, gain);
            }
        };
        log::info!("Normalizing {} detectors...", self.detectors.len());
        let detectors = &mut self.detectors;
        match &self.pool {
            Some(pool) => pool.install(|| detectors.par_iter_mut().for_each(calibrate)),
            None => detectors.iter_mut().for_each(calibrate),
        }
    }

    fn restore(&mut self, saved: &[DetectorProfile]) -> Result<()> {
        if saved.len() != self.detectors.len() {
            return Err(Error::dimension(self.detectors.len(), saved.len()));
        }
        for (det, s) in self.detectors.iter_mut().zip(saved) {
            det.set_frequency(s.w_adjusted / (2.0 * PI));
            det.set_scaling(Complex64::new(s.a_scale[0], s.a_scale[1]), s.i_scale);
        }
        Ok(())
    }

    /// Replace the input signal and rewind to its start.
    ///
    /// Detector tuning and oscillator state are kept. The new input is
    /// treated as a signal of its own: shifted copies restart their
    /// modulation phase. Use [`continue_input`](Self::continue_input) for
    /// consecutive pieces of one stream.
    pub fn set_input(&mut self, input: &[f32]) -> Result<()> {
        self.origin = 0;
        self.history.clear();
        let scaled = self.scale(input);
        self.install(scaled, &[]);
        Ok(())
    }

    /// Install the next piece of a stream that continues the current input.
    ///
    /// `ahead` holds the samples that follow `input`, at most
    /// [`lookahead`](Self::lookahead) of them are used; pass fewer only at the
    /// end of the stream. Fed this way, a stream produces exactly the output
    /// of the whole signal given at once.
    pub fn continue_input(&mut self, input: &[f32], ahead: &[f32]) -> Result<()> {
        self.origin += self.buffer_len();
        let scaled = self.scale(input);
        let ahead = self.scale(&ahead[..ahead.len().min(self.lookahead())]);
        self.install(scaled, &ahead);
        Ok(())
    }

    /// Samples past the end of a piece that shifted channels depend on.
    pub fn lookahead(&self) -> usize {
        if self.shifts.is_empty() {
            0
        } else {
            self.fir.reach()
        }
    }

    fn scale(&self, input: &[f32]) -> Vec<f32> {
        let gain = self.gain;
        input.iter().map(|&s| (s as f64 * gain) as f32).collect()
    }

    fn install(&mut self, scaled: Vec<f32>, ahead: &[f32]) {
        let mut signals = Vec::with_capacity(self.shifts.len() + 1);
        if !self.shifts.is_empty() {
            let shifter = FrequencyShifter::for_piece(
                &self.history,
                &scaled,
                ahead,
                self.origin,
                self.sample_rate,
                &self.fir,
            );
            for (&multiple, &shift) in &self.shifts {
                log::debug!("Shifting input by {shift} Hz for modulation multiple {multiple}");
                signals.push(shifter.shifted(shift));
            }
            let reach = self.fir.reach();
            self.history.extend_from_slice(&scaled);
            let excess = self.history.len().saturating_sub(reach);
            self.history.drain(..excess);
        }
        signals.insert(0, scaled);
        self.signals = signals;
        self.position = 0;
    }

    /// Integrate the next `frames` samples of every channel into `out`.
    ///
    /// Returns the number of samples produced, which is less than `frames`
    /// near the end of the input and 0 once it is exhausted.
    pub fn get_z(&mut self, out: &mut [Vec<Complex64>], frames: usize) -> Result<usize> {
        if out.len() != self.detectors.len() {
            return Err(Error::dimension(
                format!("{} channels", self.detectors.len()),
                format!("{} channels", out.len()),
            ));
        }
        if let Some(row) = out.iter().find(|row| row.len() < frames) {
            return Err(Error::dimension(
                format!("{frames} samples per channel"),
                format!("{} samples", row.len()),
            ));
        }

        let start = self.position;
        let n = frames.min(self.buffer_len() - start);
        if n == 0 {
            return Ok(0);
        }
        let inputs: Vec<&[f32]> = self
            .components
            .iter()
            .map(|c| &self.signals[c.signal][start..start + n])
            .collect();

        let ranges = partition(self.detectors.len(), self.threads);
        match &self.pool {
            None => integrate(&mut self.detectors, out, &inputs, n),
            Some(pool) => pool.scope(|s| {
                let mut detectors = &mut self.detectors[..];
                let mut rows = &mut out[..];
                let mut inputs = &inputs[..];
                for range in &ranges {
                    let (d, rest_d) = detectors.split_at_mut(range.len());
                    let (r, rest_r) = rows.split_at_mut(range.len());
                    let (i, rest_i) = inputs.split_at(range.len());
                    detectors = rest_d;
                    rows = rest_r;
                    inputs = rest_i;
                    s.spawn(move |_| integrate(d, r, i, n));
                }
            }),
        }

        self.position += n;
        Ok(n)
    }

    /// Rewind and integrate the whole input once. Every row of `out` must be
    /// exactly as long as the input.
    pub fn compute_z(&mut self, out: &mut [Vec<Complex64>]) -> Result<()> {
        let len = self.buffer_len();
        if let Some(row) = out.iter().find(|row| row.len() != len) {
            return Err(Error::dimension(
                format!("{len} samples per channel"),
                format!("{} samples", row.len()),
            ));
        }
        self.seek(0);
        self.get_z(out, len)?;
        Ok(())
    }

    /// Write `|z|` into `out` and return the largest magnitude seen.
    pub fn abs_z(&self, out: &mut [Vec<f64>], z: &[Vec<Complex64>]) -> Result<f64> {
        if out.len() != z.len() {
            return Err(Error::dimension(
                format!("{} channels", z.len()),
                format!("{} channels", out.len()),
            ));
        }
        if let Some((o, zr)) = out.iter().zip(z).find(|(o, zr)| o.len() != zr.len()) {
            return Err(Error::dimension(
                format!("{} samples", zr.len()),
                format!("{} samples", o.len()),
            ));
        }

        let ranges = partition(z.len(), self.threads);
        let mut maxima = vec![0.0f64; ranges.len().max(1)];
        match &self.pool {
            None => maxima[0] = magnitudes(out, z),
            Some(pool) => pool.scope(|s| {
                let mut rows = &mut out[..];
                let mut zs = z;
                for (range, max) in ranges.iter().zip(maxima.iter_mut()) {
                    let (r, rest_r) = rows.split_at_mut(range.len());
                    let (zr, rest_z) = zs.split_at(range.len());
                    rows = rest_r;
                    zs = rest_z;
                    s.spawn(move |_| *max = magnitudes(r, zr));
                }
            }),
        }
        Ok(maxima.into_iter().fold(0.0, f64::max))
    }

    /// Move the read position. Negative offsets count back from the end of
    /// the input; seeking to 0 also resets every detector. Returns false for
    /// an out-of-range offset.
    pub fn seek(&mut self, offset: i64) -> bool {
        let len = self.buffer_len();
        let moved = if offset >= 0 && (offset as usize) < len {
            self.position = offset as usize;
            true
        } else if offset < 0 && offset.unsigned_abs() as usize <= len {
            self.position = len - offset.unsigned_abs() as usize;
            true
        } else {
            false
        };
        if offset == 0 {
            self.position = 0;
            self.detectors.iter_mut().for_each(Detector::reset);
        }
        moved
    }

    pub fn tell(&self) -> usize {
        self.position
    }

    pub fn buffer_len(&self) -> usize {
        self.signals.first().map_or(0, Vec::len)
    }

    pub fn channels(&self) -> usize {
        self.detectors.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn detector(&self, channel: usize) -> Option<&Detector> {
        self.detectors.get(channel)
    }

    /// Angular frequency the channel's detector actually runs at.
    pub fn angular_frequency(&self, channel: usize) -> Option<f64> {
        self.detectors.get(channel).map(Detector::angular_frequency)
    }

    /// Frequency in Hz requested for the channel.
    pub fn input_frequency(&self, channel: usize) -> Option<f64> {
        self.components.get(channel).map(|c| c.f_in)
    }

    pub fn to_profile(&self) -> Profile {
        Profile {
            sample_rate: self.sample_rate,
            damping: self.damping,
            max_threads: self.threads,
            features: self.features,
            gain: self.gain,
            detectors: self
                .detectors
                .iter()
                .zip(&self.components)
                .map(|(det, c)| {
                    let (a_scale, i_scale) = det.scaling();
                    DetectorProfile {
                        w_in: 2.0 * PI * c.f_in,
                        bw: c.bandwidth,
                        w_adjusted: det.angular_frequency(),
                        a_scale: [a_scale.re, a_scale.im],
                        i_scale,
                    }
                })
                .collect(),
        }
    }

    pub fn save_profile(&self, store: &mut dyn ProfileStore, name: &str) -> Result<()> {
        store.save(name, &self.to_profile())
    }
}

/// Contiguous channel ranges, one per worker. The first `channels % threads`
/// ranges hold one extra channel; empty ranges are omitted.
pub fn partition(channels: usize, threads: usize) -> Vec<Range<usize>> {
    let threads = threads.max(1);
    let base = channels / threads;
    let extra = channels % threads;
    let mut ranges = Vec::with_capacity(threads);
    let mut start = 0;
    for t in 0..threads {
        let len = base + usize::from(t < extra);
        if len == 0 {
            break;
        }
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

fn integrate(detectors: &mut [Detector], rows: &mut [Vec<Complex64>], inputs: &[&[f32]], n: usize) {
    for ((det, row), input) in detectors.iter_mut().zip(rows.iter_mut()).zip(inputs) {
        det.process(&mut row[..n], input);
    }
}

fn magnitudes(out: &mut [Vec<f64>], z: &[Vec<Complex64>]) -> f64 {
    let mut max = 0.0f64;
    for (o, zr) in out.iter_mut().zip(z) {
        for (m, c) in o.iter_mut().zip(zr) {
            *m = c.norm();
            max = max.max(*m);
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::MemoryProfileStore;

    fn unnormalized() -> Features {
        Features::new(Solver::RungeKutta, FreqNorm::Unnormalized, AmpNorm::Unnormalized)
    }

    fn tone(freq: f64, sr: u32, len: usize) -> Vec<f32> {
        normalize::test_tone(freq, sr as f64, len, 1.0)
    }

    #[test]
    fn partition_is_contiguous_and_front_loaded() {
        assert_eq!(partition(10, 3), vec![0..4, 4..7, 7..10]);
        assert_eq!(partition(2, 4), vec![0..1, 1..2]);
        assert_eq!(partition(5, 0), vec![0..5]);
        assert!(partition(0, 4).is_empty());
    }

    #[test]
    fn construction_validates_parameters() {
        let input = vec![0.0f32; 100];
        let ch = [(440.0, 0.0)];
        let f = unnormalized();
        assert!(DetectorBank::new(22050, &input, 0, &ch, f, 1e-4, 25.0).is_err());
        assert!(DetectorBank::new(48000, &input, 0, &[], f, 1e-4, 25.0).is_err());
        assert!(DetectorBank::new(48000, &input, 0, &[(0.0, 0.0)], f, 1e-4, 25.0).is_err());
        assert!(DetectorBank::new(48000, &input, 0, &[(-3.0, 0.0)], f, 1e-4, 25.0).is_err());
        assert!(DetectorBank::new(48000, &input, 0, &ch, f, 0.0, 25.0).is_err());
        assert!(DetectorBank::new(48000, &input, 0, &[(440.0, -1.0)], f, 1e-4, 25.0).is_err());
        assert!(matches!(
            DetectorBank::new(48000, &input, 0, &ch, f, 1e-4, 25.0),
            Ok(bank) if bank.channels() == 1 && bank.buffer_len() == 100
        ));
    }

    #[test]
    fn get_z_advances_and_stops_at_end() {
        let input = tone(440.0, 48000, 1000);
        let mut bank =
            DetectorBank::new(48000, &input, 0, &[(440.0, 0.0)], unnormalized(), 1e-4, 25.0)
                .unwrap();
        let mut out = vec![vec![Complex64::default(); 600]];
        assert_eq!(bank.get_z(&mut out, 600).unwrap(), 600);
        assert_eq!(bank.tell(), 600);
        assert_eq!(bank.get_z(&mut out, 600).unwrap(), 400);
        assert_eq!(bank.get_z(&mut out, 600).unwrap(), 0);
    }

    #[test]
    fn get_z_in_pieces_matches_compute_z() {
        let input = tone(300.0, 44100, 5000);
        let ch = [(280.0, 0.0), (300.0, 2.0)];
        let mut bank =
            DetectorBank::new(44100, &input, 2, &ch, unnormalized(), 1e-4, 25.0).unwrap();
        let mut whole = vec![vec![Complex64::default(); 5000]; 2];
        bank.compute_z(&mut whole).unwrap();

        assert!(bank.seek(0));
        let mut piece = vec![vec![Complex64::default(); 1024]; 2];
        let mut joined = vec![Vec::new(); 2];
        loop {
            let n = bank.get_z(&mut piece, 1024).unwrap();
            if n == 0 {
                break;
            }
            for (j, p) in joined.iter_mut().zip(&piece) {
                j.extend_from_slice(&p[..n]);
            }
        }
        assert_eq!(joined, whole);
    }

    #[test]
    fn shape_errors() {
        let input = vec![0.0f32; 64];
        let ch = [(100.0, 0.0), (200.0, 0.0)];
        let mut bank =
            DetectorBank::new(48000, &input, 0, &ch, unnormalized(), 1e-4, 25.0).unwrap();
        let mut wrong_channels = vec![vec![Complex64::default(); 64]];
        assert!(matches!(
            bank.compute_z(&mut wrong_channels),
            Err(Error::DimensionMismatch { .. })
        ));
        let mut short = vec![vec![Complex64::default(); 63]; 2];
        assert!(matches!(bank.compute_z(&mut short), Err(Error::DimensionMismatch { .. })));
        let z = vec![vec![Complex64::default(); 64]; 2];
        let mut r = vec![vec![0.0; 64]; 3];
        assert!(matches!(bank.abs_z(&mut r, &z), Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn seek_from_end_and_out_of_range() {
        let input = vec![0.0f32; 100];
        let mut bank =
            DetectorBank::new(48000, &input, 0, &[(100.0, 0.0)], unnormalized(), 1e-4, 25.0)
                .unwrap();
        assert!(bank.seek(-30));
        assert_eq!(bank.tell(), 70);
        assert!(!bank.seek(100));
        assert!(!bank.seek(-101));
        assert_eq!(bank.tell(), 70);
        assert!(bank.seek(0));
        assert_eq!(bank.tell(), 0);
    }

    #[test]
    fn high_channels_are_modulated() {
        let input = tone(3000.0, 48000, 4800);
        let ch = [(440.0, 0.0), (3000.0, 0.0)];
        let bank =
            DetectorBank::new(48000, &input, 0, &ch, unnormalized(), 1e-4, 25.0).unwrap();
        assert_eq!(bank.input_frequency(1), Some(3000.0));
        // floor(3000 / 1600) = 1, so the detector runs at 3000 - 1600 + 50
        let w = bank.angular_frequency(1).unwrap();
        assert!((w / (2.0 * PI) - 1450.0).abs() < 1e-9);
        assert!((bank.angular_frequency(0).unwrap() - 2.0 * PI * 440.0).abs() < 1e-9);
        assert_eq!(bank.angular_frequency(2), None);
    }

    #[test]
    fn profile_round_trip_restores_output() {
        let input = tone(440.0, 48000, 4800);
        let ch = [(440.0, 0.0), (2000.0, 0.0)];
        let mut bank =
            DetectorBank::new(48000, &input, 2, &ch, Features::default(), 1e-4, 25.0).unwrap();
        let mut store = MemoryProfileStore::new();
        bank.save_profile(&mut store, "test").unwrap();

        let mut loaded = DetectorBank::from_profile(&store, "test", &input).unwrap();
        for ch in 0..2 {
            assert_eq!(loaded.angular_frequency(ch), bank.angular_frequency(ch));
            assert_eq!(
                loaded.detector(ch).unwrap().scaling(),
                bank.detector(ch).unwrap().scaling()
            );
        }
        let mut a = vec![vec![Complex64::default(); 4800]; 2];
        let mut b = a.clone();
        bank.compute_z(&mut a).unwrap();
        loaded.compute_z(&mut b).unwrap();
        assert_eq!(a, b);

        assert!(matches!(
            DetectorBank::from_profile(&store, "absent", &input),
            Err(Error::ProfileNotFound(_))
        ));
    }
}
