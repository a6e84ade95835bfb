//! Per-pitch onset detection over critical bands of detectors.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::bank::pitches::min_bandwidth;
use crate::bank::{AmpNorm, DetectorBank, Features, FreqNorm, Solver};
use crate::error::{Error, Result};
use crate::onset::OnsetDetector;

pub const DEFAULT_NOTE_GAIN: f64 = 50.0;

/// A positional construction argument. Values are matched to parameters
/// in the order bandwidth, features, damping, gain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Arg {
    Number(f64),
    Features(Features),
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Number(v)
    }
}

impl From<Features> for Arg {
    fn from(f: Features) -> Self {
        Arg::Features(f)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Source {
    #[default]
    Default,
    Named,
    Positional,
}

/// One builder field and the path it was last set through.
#[derive(Clone, Copy, Debug)]
struct Field<T> {
    value: T,
    source: Source,
    conflict: bool,
}

impl<T> Field<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            source: Source::Default,
            conflict: false,
        }
    }

    fn set(&mut self, value: T, source: Source) {
        if self.source != Source::Default && self.source != source {
            self.conflict = true;
        }
        self.value = value;
        self.source = source;
    }
}

const POSITIONAL_ORDER: [&str; 4] = ["bandwidth", "features", "damping", "gain"];

/// Collects [`NoteDetector`] parameters. Each parameter may be given by
/// name or by position, never both.
#[derive(Clone, Debug)]
pub struct NoteDetectorBuilder {
    sample_rate: u32,
    input: Vec<f32>,
    frequencies: Vec<f64>,
    edo: u32,
    bandwidth: Field<f64>,
    features: Field<Features>,
    damping: Field<f64>,
    gain: Field<f64>,
    problems: Vec<String>,
}

impl NoteDetectorBuilder {
    pub fn new(sample_rate: u32, input: &[f32], frequencies: &[f64], edo: u32) -> Self {
        Self {
            sample_rate,
            input: input.to_vec(),
            frequencies: frequencies.to_vec(),
            edo,
            bandwidth: Field::new(0.0),
            features: Field::new(Features::new(
                Solver::RungeKutta,
                FreqNorm::Unnormalized,
                AmpNorm::Unnormalized,
            )),
            damping: Field::new(crate::bank::DEFAULT_DAMPING),
            gain: Field::new(DEFAULT_NOTE_GAIN),
            problems: Vec::new(),
        }
    }

    pub fn bandwidth(mut self, bandwidth: f64) -> Self {
        self.bandwidth.set(bandwidth, Source::Named);
        self
    }

    pub fn features(mut self, features: Features) -> Self {
        self.features.set(features, Source::Named);
        self
    }

    pub fn damping(mut self, damping: f64) -> Self {
        self.damping.set(damping, Source::Named);
        self
    }

    pub fn gain(mut self, gain: f64) -> Self {
        self.gain.set(gain, Source::Named);
        self
    }

    pub fn positional(mut self, args: &[Arg]) -> Self {
        if args.len() > POSITIONAL_ORDER.len() {
            self.problems.push(format!(
                "at most {} positional arguments are accepted, got {}",
                POSITIONAL_ORDER.len(),
                args.len()
            ));
        }
        for (i, arg) in args.iter().take(POSITIONAL_ORDER.len()).enumerate() {
            match (i, *arg) {
                (0, Arg::Number(v)) => self.bandwidth.set(v, Source::Positional),
                (1, Arg::Features(f)) => self.features.set(f, Source::Positional),
                (2, Arg::Number(v)) => self.damping.set(v, Source::Positional),
                (3, Arg::Number(v)) => self.gain.set(v, Source::Positional),
                (i, other) => self.problems.push(format!(
                    "positional argument {} ({}) has the wrong kind: {other:?}",
                    i + 1,
                    POSITIONAL_ORDER[i]
                )),
            }
        }
        self
    }

    pub fn build(self) -> Result<NoteDetector> {
        let mut problems = self.problems;
        let conflicts = [
            ("bandwidth", self.bandwidth.conflict),
            ("features", self.features.conflict),
            ("damping", self.damping.conflict),
            ("gain", self.gain.conflict),
        ];
        for (name, conflict) in conflicts {
            if conflict {
                problems.push(format!("{name} given both by position and by name"));
            }
        }
        if !problems.is_empty() {
            return Err(Error::Config(problems.join("; ")));
        }
        if self.edo == 0 {
            return Err(Error::InvalidParameter("edo must be at least 1".into()));
        }

        let bandwidth = self.bandwidth.value;
        let damping = self.damping.value;
        // Spacing inside a band is the effective bandwidth, measured for bw = 0
        let spacing = if bandwidth == 0.0 {
            min_bandwidth(self.sample_rate, damping)?
        } else if bandwidth > 0.0 {
            bandwidth
        } else {
            return Err(Error::InvalidParameter(format!(
                "bandwidth must not be negative, got {bandwidth}"
            )));
        };

        let padding = self.sample_rate as usize / 4;
        let mut input = vec![0.0; padding];
        input.extend_from_slice(&self.input);

        let bands = self
            .frequencies
            .iter()
            .map(|&f| critical_band(f, self.edo, spacing))
            .collect();

        log::info!(
            "NoteDetector: {} pitches, edo {}, band spacing {spacing:.3} Hz",
            self.frequencies.len(),
            self.edo
        );
        Ok(NoteDetector {
            sample_rate: self.sample_rate,
            input,
            padding,
            bands,
            bandwidth,
            features: self.features.value,
            damping,
            gain: self.gain.value,
        })
    }
}

/// Detector frequencies covering half an EDO step either side of `centre`,
/// spaced by `spacing` Hz: lower half, centre, upper half.
pub fn critical_band(centre: f64, edo: u32, spacing: f64) -> Vec<f64> {
    let mut band = half_band(centre, edo, spacing, -1.0);
    band.push(centre);
    band.extend(half_band(centre, edo, spacing, 1.0));
    band
}

fn half_band(centre: f64, edo: u32, spacing: f64, direction: f64) -> Vec<f64> {
    let stop = centre * 2f64.powf(direction / (2.0 * edo as f64));
    let mut f = centre;
    let mut gap = direction * (stop - f);
    let mut out = Vec::new();
    // Step until the next step would overshoot or we are within a quarter
    // spacing of the edge
    while direction * (stop - f) <= gap && direction * (stop - f) > spacing / 4.0 {
        gap = direction * (stop - f);
        f += direction * spacing;
        out.push(f);
    }
    out
}

/// Onset detection for a set of pitches, one critical band of detectors
/// per pitch.
pub struct NoteDetector {
    sample_rate: u32,
    /// Input preceded by a quarter second of silence.
    input: Vec<f32>,
    padding: usize,
    bands: Vec<Vec<f64>>,
    bandwidth: f64,
    features: Features,
    damping: f64,
    gain: f64,
}

impl NoteDetector {
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
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

    pub fn bands(&self) -> &[Vec<f64>] {
        &self.bands
    }

    /// Onset samples, relative to the unpadded input, for every pitch index
    /// that has any.
    pub fn analyse(&self, threshold: f64) -> Result<BTreeMap<usize, Vec<usize>>> {
        let results: Vec<(usize, Vec<usize>)> = self
            .bands
            .par_iter()
            .enumerate()
            .map(|(i, band)| self.analyse_band(band, threshold).map(|onsets| (i, onsets)))
            .collect::<Result<_>>()?;
        Ok(results.into_iter().filter(|(_, onsets)| !onsets.is_empty()).collect())
    }

    fn analyse_band(&self, band: &[f64], threshold: f64) -> Result<Vec<usize>> {
        let channels: Vec<(f64, f64)> = band.iter().map(|&f| (f, self.bandwidth)).collect();
        // Bands already run in parallel
        let bank = DetectorBank::new(
            self.sample_rate,
            &self.input,
            0,
            &channels,
            self.features,
            self.damping,
            self.gain,
        )?;
        let mut detector = OnsetDetector::new(bank)?;
        let mut found = Vec::new();
        detector.find_onsets(&mut found, threshold, None)?;
        Ok(OnsetDetector::sort_simultaneous(&found)
            .iter()
            .filter_map(|o| o.sample.checked_sub(self.padding))
            .collect())
    }
}
