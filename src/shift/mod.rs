//! Single-sideband frequency shifting of a real signal.

pub mod hilbert;

use std::f64::consts::PI;

use rustfft::num_complex::Complex64;

pub use hilbert::{HilbertFft, HilbertFir, HilbertTransform, DEFAULT_FIR_LENGTH};

/// How the analytic signal is obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HilbertMode {
    /// Windowed FIR of the given odd length.
    Fir(usize),
    /// Whole-signal FFT; exact for periodic input but needs the full buffer.
    #[default]
    Fft,
}

/// Moves the spectrum of a real signal up or down by a fixed amount.
///
/// The analytic signal is computed once on construction, so any number of
/// shifts of the same input are cheap. The modulating phase depends only on
/// the absolute sample index, so consecutive pieces of one signal shifted
/// with [`for_piece`](Self::for_piece) join without a phase jump.
pub struct FrequencyShifter {
    analytic: Vec<Complex64>,
    sample_rate: f64,
    /// Index of `analytic[0]` in the whole signal.
    origin: usize,
}

impl FrequencyShifter {
    pub fn new(input: &[f32], sample_rate: u32, mode: HilbertMode) -> crate::Result<Self> {
        let analytic = match mode {
            HilbertMode::Fir(length) => HilbertFir::new(length)?.analytic(input),
            HilbertMode::Fft => HilbertFft.analytic(input),
        };
        Ok(Self {
            analytic,
            sample_rate: sample_rate as f64,
            origin: 0,
        })
    }

    /// Shifter for `input`, one piece of a longer signal starting at sample
    /// `origin`. `before` and `after` hold the neighbouring samples, at
    /// least [`HilbertFir::reach`] of each where they exist, so the FIR sees
    /// the same context it would over the whole signal.
    pub fn for_piece(
        before: &[f32],
        input: &[f32],
        after: &[f32],
        origin: usize,
        sample_rate: u32,
        fir: &HilbertFir,
    ) -> Self {
        let mut extended = Vec::with_capacity(before.len() + input.len() + after.len());
        extended.extend_from_slice(before);
        extended.extend_from_slice(input);
        extended.extend_from_slice(after);
        let mut analytic = fir.analytic(&extended);
        analytic.truncate(before.len() + input.len());
        analytic.drain(..before.len());
        Self {
            analytic,
            sample_rate: sample_rate as f64,
            origin,
        }
    }

    /// Build from any Hilbert transformer.
    pub fn from_transform(
        input: &[f32],
        sample_rate: u32,
        transform: &dyn HilbertTransform,
    ) -> Self {
        Self {
            analytic: transform.analytic(input),
            sample_rate: sample_rate as f64,
            origin: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.analytic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analytic.is_empty()
    }

    /// Write the input shifted by `shift_hz` (may be negative) into `out`.
    /// Only `min(out.len(), input length)` samples are written.
    pub fn shift(&self, shift_hz: f64, out: &mut [f32]) {
        for (n, (o, a)) in out.iter_mut().zip(&self.analytic).enumerate() {
            // Whole cycles dropped before scaling to radians to keep precision
            let cycles = (shift_hz * (self.origin + n) as f64 / self.sample_rate).fract();
            let phasor = Complex64::from_polar(1.0, 2.0 * PI * cycles);
            *o = (a.re * phasor.re - a.im * phasor.im) as f32;
        }
    }

    pub fn shifted(&self, shift_hz: f64) -> Vec<f32> {
        let mut out = vec![0.0; self.analytic.len()];
        self.shift(shift_hz, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::FftPlanner;

    fn sine(freq: f64, sr: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * PI * freq * n as f64 / sr as f64).sin() as f32)
            .collect()
    }

    fn peak_hz(signal: &[f32], sr: u32) -> f64 {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(signal.len());
        let mut buf: Vec<Complex64> =
            signal.iter().map(|&s| Complex64::new(s as f64, 0.0)).collect();
        fft.process(&mut buf);
        let (bin, _) = buf[..signal.len() / 2]
            .iter()
            .enumerate()
            .fold((0, 0.0), |(bi, bm), (i, c)| {
                if c.norm() > bm {
                    (i, c.norm())
                } else {
                    (bi, bm)
                }
            });
        bin as f64 * sr as f64 / signal.len() as f64
    }

    #[test]
    fn fft_shift_moves_tone_down() {
        let sr = 48000;
        let x = sine(3000.0, sr, 48000);
        let fs = FrequencyShifter::new(&x, sr, HilbertMode::Fft).unwrap();
        assert_eq!(peak_hz(&fs.shifted(-1550.0), sr), 1450.0);
        // Reusable for a second shift
        assert_eq!(peak_hz(&fs.shifted(500.0), sr), 3500.0);
    }

    #[test]
    fn fir_shift_moves_tone_down() {
        let sr = 48000;
        let x = sine(12000.0, sr, 48000);
        let fs = FrequencyShifter::new(&x, sr, HilbertMode::Fir(DEFAULT_FIR_LENGTH)).unwrap();
        assert_eq!(peak_hz(&fs.shifted(-6000.0), sr), 6000.0);
    }

    #[test]
    fn shift_writes_at_most_output_length() {
        let x = sine(1000.0, 44100, 100);
        let fs = FrequencyShifter::new(&x, 44100, HilbertMode::default()).unwrap();
        let mut out = vec![9.0f32; 10];
        fs.shift(0.0, &mut out);
        assert!(out.iter().all(|&v| v != 9.0));
        assert_eq!(fs.len(), 100);
    }

    #[test]
    fn pieces_join_like_the_whole_signal() {
        let sr = 48000;
        let x = sine(3000.0, sr, 3000);
        let fir = HilbertFir::default();
        let whole = FrequencyShifter::from_transform(&x, sr, &fir).shifted(-1550.0);

        let reach = fir.reach();
        let mut joined = Vec::new();
        for start in (0..x.len()).step_by(700) {
            let end = (start + 700).min(x.len());
            let before = &x[start.saturating_sub(reach)..start];
            let after = &x[end..(end + reach).min(x.len())];
            let piece = FrequencyShifter::for_piece(before, &x[start..end], after, start, sr, &fir);
            assert_eq!(piece.len(), end - start);
            joined.extend(piece.shifted(-1550.0));
        }
        assert_eq!(joined, whole);
    }
}
