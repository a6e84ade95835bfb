use std::f64::consts::PI;

use rustfft::num_complex::Complex64;

use super::features::Solver;
use crate::error::{Error, Result};

/// Hopf bifurcation parameter. Detectors sit exactly at the bifurcation.
const MU: f64 = 0.0;

/// First Lyapunov coefficient giving `bandwidth` Hz at the given gain.
///
/// Empirical fit made at gain 25 and scaled by gain².
pub fn lyapunov(bandwidth: f64, gain: f64) -> Result<f64> {
    if bandwidth > 0.0 {
        Ok(-12.5 * bandwidth.powi(3) / gain.powi(2))
    } else if bandwidth == 0.0 {
        Ok(0.0)
    } else {
        Err(Error::InvalidParameter(format!(
            "bandwidth should be non-negative, got {bandwidth}"
        )))
    }
}

/// One Hopf oscillator tuned to a single frequency.
///
/// Integrates `dz/dt = (mu + iw) z + b |z|² z + x` once per input sample
/// where `x` is the already gain-scaled input.
#[derive(Clone, Debug)]
pub struct Detector {
    w: f64,
    b: f64,
    damping: f64,
    sample_rate: f64,
    bandwidth: f64,
    solver: Solver,
    a_scale: Complex64,
    i_scale: f64,
    zp: Complex64,
    zpp: Complex64,
    xp: f64,
    xpp: f64,
}

impl Detector {
    pub fn new(
        frequency: f64,
        bandwidth: f64,
        damping: f64,
        sample_rate: f64,
        gain: f64,
        solver: Solver,
    ) -> Result<Self> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "detector frequency must be positive, got {frequency}"
            )));
        }
        if !(damping.is_finite() && damping > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "damping must be positive, got {damping}"
            )));
        }
        let b = lyapunov(bandwidth, gain)?;
        if solver == Solver::CentralDifference && b != 0.0 {
            return Err(Error::InvalidParameter(
                "central difference detectors only support minimum bandwidth".into(),
            ));
        }
        Ok(Self {
            w: 2.0 * PI * frequency,
            b,
            damping,
            sample_rate,
            bandwidth,
            solver,
            a_scale: Complex64::new(1.0, 0.0),
            i_scale: 1.0,
            zp: Complex64::new(0.0, 0.0),
            zpp: Complex64::new(0.0, 0.0),
            xp: 0.0,
            xpp: 0.0,
        })
    }

    pub fn angular_frequency(&self) -> f64 {
        self.w
    }

    pub fn frequency(&self) -> f64 {
        self.w / (2.0 * PI)
    }

    pub(crate) fn set_frequency(&mut self, frequency: f64) {
        self.w = 2.0 * PI * frequency;
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn solver(&self) -> Solver {
        self.solver
    }

    /// Complex output scale and imaginary-axis correction.
    pub fn scaling(&self) -> (Complex64, f64) {
        (self.a_scale, self.i_scale)
    }

    /// Fresh, unscaled detector with identical parameters at another frequency.
    pub(crate) fn retuned(&self, frequency: f64) -> Self {
        let mut copy = self.clone();
        copy.set_frequency(frequency);
        copy.set_scaling(Complex64::new(1.0, 0.0), 1.0);
        copy.reset();
        copy
    }

    pub(crate) fn set_scaling(&mut self, a_scale: Complex64, i_scale: f64) {
        self.a_scale = a_scale;
        self.i_scale = i_scale;
    }

    /// Clear oscillator history so the next sample starts from rest.
    pub fn reset(&mut self) {
        self.zp = Complex64::new(0.0, 0.0);
        self.zpp = Complex64::new(0.0, 0.0);
        self.xp = 0.0;
        self.xpp = 0.0;
    }

    /// Advance over `input`, writing one scaled output per sample.
    pub fn process(&mut self, out: &mut [Complex64], input: &[f32]) {
        let n = out.len().min(input.len());
        let (out, input) = (&mut out[..n], &input[..n]);
        match self.solver {
            Solver::Euler => self.euler(out, input),
            Solver::CentralDifference => self.central_difference(out, input),
            Solver::RungeKutta => self.runge_kutta(out, input),
        }

        if self.a_scale != Complex64::new(1.0, 0.0) || self.i_scale != 1.0 {
            for z in out.iter_mut() {
                let scaled = *z * self.a_scale;
                *z = Complex64::new(scaled.re, scaled.im * self.i_scale);
            }
        }
    }

    #[inline]
    fn dzdt(&self, z: Complex64, x: f64) -> Complex64 {
        Complex64::new(MU, self.w) * z + self.b * z.norm_sqr() * z + x
    }

    // Leapfrog over two samples; input lags one sample.
    fn central_difference(&mut self, out: &mut [Complex64], input: &[f32]) {
        let decay = 1.0 - self.damping;
        let h = 2.0 / self.sample_rate;
        for (z, &x) in out.iter_mut().zip(input) {
            let next = (self.dzdt(self.zp, self.xp) * h + self.zpp) * decay;
            self.zpp = self.zp;
            self.zp = next;
            *z = next;
            self.xp = x as f64;
        }
    }

    // Classic RK4 spanning zpp -> z with the previous input as midpoint.
    fn runge_kutta(&mut self, out: &mut [Complex64], input: &[f32]) {
        let decay = 1.0 - self.damping;
        let sr = self.sample_rate;
        for (z, &x) in out.iter_mut().zip(input) {
            let x = x as f64;
            let u0 = self.zpp;
            let k0 = self.dzdt(u0, self.xpp);
            let u1 = u0 + k0 / sr;
            let k1 = self.dzdt(u1, self.xp);
            let u2 = u0 + k1 / sr;
            let k2 = self.dzdt(u2, self.xp);
            let u3 = u0 + k2 * 2.0 / sr;
            let k3 = self.dzdt(u3, x);

            let next = (u0 + (k0 + k1 * 2.0 + k2 * 2.0 + k3) / (3.0 * sr)) * decay;
            self.zpp = self.zp;
            self.zp = next;
            *z = next;
            self.xpp = self.xp;
            self.xp = x;
        }
    }

    // Semi-implicit Euler on (re, im): the rotation stays area preserving so
    // damping alone sets the decay. Damping is applied per sample at the rate
    // the two-sample solvers reach.
    fn euler(&mut self, out: &mut [Complex64], input: &[f32]) {
        let decay = (1.0 - self.damping).sqrt();
        let dt = 1.0 / self.sample_rate;
        for (z, &x) in out.iter_mut().zip(input) {
            let (p, q) = (self.zp.re, self.zp.im);
            let r2 = p * p + q * q;
            let p1 = p + dt * (MU * p - self.w * q + self.b * r2 * p + x as f64);
            let r2 = p1 * p1 + q * q;
            let q1 = q + dt * (self.w * p1 + MU * q + self.b * r2 * q);
            let next = Complex64::new(p1, q1) * decay;
            self.zpp = self.zp;
            self.zp = next;
            *z = next;
            self.xpp = self.xp;
            self.xp = x as f64;
        }
    }
}
