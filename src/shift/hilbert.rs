use std::f64::consts::PI;

use rustfft::{num_complex::Complex64, FftPlanner};

use crate::error::{Error, Result};

pub const DEFAULT_FIR_LENGTH: usize = 19;

/// Produces the analytic signal `x + i·H{x}` of a real input.
pub trait HilbertTransform {
    fn analytic(&self, input: &[f32]) -> Vec<Complex64>;
}

/// Windowed ideal Hilbert kernel applied as a centred (zero delay) FIR.
#[derive(Clone, Debug)]
pub struct HilbertFir {
    /// Taps for odd offsets 1, 3, 5, ...; the kernel is antisymmetric and
    /// zero at even offsets.
    taps: Vec<f64>,
}

impl HilbertFir {
    pub fn new(length: usize) -> Result<Self> {
        if length < 3 || length % 2 == 0 {
            return Err(Error::InvalidParameter(format!(
                "Hilbert FIR length must be odd and at least 3, got {length}"
            )));
        }
        Ok(Self { taps: kernel(length) })
    }

    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    /// How many samples either side of the current one the filter reads.
    pub fn reach(&self) -> usize {
        2 * self.taps.len() - 1
    }
}

impl Default for HilbertFir {
    fn default() -> Self {
        Self { taps: kernel(DEFAULT_FIR_LENGTH) }
    }
}

fn kernel(length: usize) -> Vec<f64> {
    let half = (length - 1) / 2;
    let span = (length - 1) as f64;
    (1..=half)
        .step_by(2)
        .map(|m| {
            let ideal = 2.0 / (PI * m as f64);
            // Blackman window at position half + m of the full kernel
            let alpha = PI * (half + m) as f64 / span;
            ideal * (0.42 - 0.5 * (2.0 * alpha).cos() + 0.08 * (4.0 * alpha).cos())
        })
        .collect()
}

impl HilbertTransform for HilbertFir {
    fn analytic(&self, input: &[f32]) -> Vec<Complex64> {
        let len = input.len();
        (0..len)
            .map(|n| {
                let mut h = 0.0;
                for (t, &tap) in self.taps.iter().enumerate() {
                    let m = 2 * t + 1;
                    // h[m] x[n-m] + h[-m] x[n+m], h[-m] = -h[m]
                    let before = if n >= m { input[n - m] as f64 } else { 0.0 };
                    let after = if n + m < len { input[n + m] as f64 } else { 0.0 };
                    h += tap * (before - after);
                }
                Complex64::new(input[n] as f64, h)
            })
            .collect()
    }
}

/// Analytic signal by zeroing the negative half of the spectrum.
#[derive(Clone, Copy, Debug, Default)]
pub struct HilbertFft;

impl HilbertTransform for HilbertFft {
    fn analytic(&self, input: &[f32]) -> Vec<Complex64> {
        let len = input.len();
        if len == 0 {
            return Vec::new();
        }
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);

        let mut buffer: Vec<Complex64> =
            input.iter().map(|&s| Complex64::new(s as f64, 0.0)).collect();
        forward.process(&mut buffer);

        // Keep DC (and Nyquist for even lengths), double positive bins, drop negative
        let nyquist = if len % 2 == 0 { Some(len / 2) } else { None };
        let positive_end = (len + 1) / 2;
        for (k, bin) in buffer.iter_mut().enumerate() {
            if k == 0 || Some(k) == nyquist {
                continue;
            }
            if k < positive_end {
                *bin *= 2.0;
            } else {
                *bin = Complex64::new(0.0, 0.0);
            }
        }

        inverse.process(&mut buffer);
        let scale = 1.0 / len as f64;
        buffer.iter_mut().for_each(|c| *c *= scale);
        buffer
    }
}
