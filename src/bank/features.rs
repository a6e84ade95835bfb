use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Integration method used to advance each detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Solver {
    /// Semi-implicit first order step on the (re, im) state.
    Euler,
    /// Two-step leapfrog. Only valid for minimum-bandwidth detectors.
    CentralDifference,
    /// Fourth order scheme spanning two samples.
    RungeKutta,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FreqNorm {
    Unnormalized,
    /// Retune each detector so its response peaks at the requested frequency.
    SearchNormalized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AmpNorm {
    Unnormalized,
    /// Scale output so a pure tone at the detector frequency has unit, circular orbit.
    Normalized,
}

const SOLVER_MASK: u32 = 0xff;
const FREQ_MASK: u32 = 0xff << 8;
const AMP_MASK: u32 = 0xff << 16;

const CENTRAL_DIFFERENCE: u32 = 1;
const RUNGE_KUTTA: u32 = 2;
const EULER: u32 = 3;
const FREQ_UNNORMALIZED: u32 = 1 << 8;
const SEARCH_NORMALIZED: u32 = 2 << 8;
const AMP_UNNORMALIZED: u32 = 1 << 16;
const AMP_NORMALIZED: u32 = 2 << 16;

/// Solver and normalization selection for a bank.
///
/// Encodes to the bit layout `solver | freq << 8 | amp << 16` and to a
/// comma separated list of names, which is what profiles store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Features {
    pub solver: Solver,
    pub freq_norm: FreqNorm,
    pub amp_norm: AmpNorm,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            solver: Solver::RungeKutta,
            freq_norm: FreqNorm::Unnormalized,
            amp_norm: AmpNorm::Normalized,
        }
    }
}

impl Features {
    pub fn new(solver: Solver, freq_norm: FreqNorm, amp_norm: AmpNorm) -> Self {
        Self { solver, freq_norm, amp_norm }
    }

    /// Same solver and frequency handling with amplitude normalization off.
    pub fn unnormalized_amplitude(self) -> Self {
        Self { amp_norm: AmpNorm::Unnormalized, ..self }
    }

    pub fn bits(&self) -> u32 {
        let solver = match self.solver {
            Solver::CentralDifference => CENTRAL_DIFFERENCE,
            Solver::RungeKutta => RUNGE_KUTTA,
            Solver::Euler => EULER,
        };
        let freq = match self.freq_norm {
            FreqNorm::Unnormalized => FREQ_UNNORMALIZED,
            FreqNorm::SearchNormalized => SEARCH_NORMALIZED,
        };
        let amp = match self.amp_norm {
            AmpNorm::Unnormalized => AMP_UNNORMALIZED,
            AmpNorm::Normalized => AMP_NORMALIZED,
        };
        solver | freq | amp
    }

    /// Decode a bit set. A zero field selects that field's default.
    pub fn from_bits(bits: u32) -> Result<Self, Error> {
        if bits & !(SOLVER_MASK | FREQ_MASK | AMP_MASK) != 0 {
            return Err(Error::InvalidParameter(format!("unknown feature bits {bits:#x}")));
        }
        let default = Self::default();
        let solver = match bits & SOLVER_MASK {
            0 => default.solver,
            CENTRAL_DIFFERENCE => Solver::CentralDifference,
            RUNGE_KUTTA => Solver::RungeKutta,
            EULER => Solver::Euler,
            other => return Err(Error::InvalidParameter(format!("unknown solver {other}"))),
        };
        let freq_norm = match bits & FREQ_MASK {
            0 => default.freq_norm,
            FREQ_UNNORMALIZED => FreqNorm::Unnormalized,
            SEARCH_NORMALIZED => FreqNorm::SearchNormalized,
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unknown frequency normalization {:#x}",
                    other >> 8
                )))
            }
        };
        let amp_norm = match bits & AMP_MASK {
            0 => default.amp_norm,
            AMP_UNNORMALIZED => AmpNorm::Unnormalized,
            AMP_NORMALIZED => AmpNorm::Normalized,
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unknown amplitude normalization {:#x}",
                    other >> 16
                )))
            }
        };
        Ok(Self { solver, freq_norm, amp_norm })
    }

    /// Modulation period above which a detector runs on frequency-shifted input.
    ///
    /// Above these frequencies the discrete solvers lose accuracy, so channels
    /// tuned higher are moved down by a multiple of this value.
    pub fn modulation_step(&self) -> f64 {
        match (self.solver, self.freq_norm) {
            (Solver::RungeKutta, FreqNorm::Unnormalized) => 1600.0,
            (Solver::RungeKutta, FreqNorm::SearchNormalized) => 2200.0,
            (_, FreqNorm::Unnormalized) => 500.0,
            (_, FreqNorm::SearchNormalized) => 700.0,
        }
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let solver = match self.solver {
            Solver::Euler => "Euler method",
            Solver::CentralDifference => "Central difference method",
            Solver::RungeKutta => "Runge-Kutta method",
        };
        let freq = match self.freq_norm {
            FreqNorm::Unnormalized => "Frequency unnormalized",
            FreqNorm::SearchNormalized => "Search-normalized",
        };
        let amp = match self.amp_norm {
            AmpNorm::Unnormalized => "Amplitude unnormalized",
            AmpNorm::Normalized => "Amplitude normalized",
        };
        write!(f, "{solver},{freq},{amp}")
    }
}

impl FromStr for Features {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bits = 0;
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            bits |= match name {
                "Euler method" => EULER,
                "Central difference method" => CENTRAL_DIFFERENCE,
                "Runge-Kutta method" => RUNGE_KUTTA,
                "Frequency unnormalized" => FREQ_UNNORMALIZED,
                "Search-normalized" => SEARCH_NORMALIZED,
                "Amplitude unnormalized" => AMP_UNNORMALIZED,
                "Amplitude normalized" => AMP_NORMALIZED,
                other => {
                    return Err(Error::InvalidParameter(format!(
                        "unknown feature \"{other}\""
                    )))
                }
            };
        }
        Self::from_bits(bits)
    }
}

impl TryFrom<String> for Features {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Features> for String {
    fn from(features: Features) -> Self {
        features.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_rk4_unnormalized_frequency_normalized_amplitude() {
        let f = Features::default();
        assert_eq!(f.bits(), RUNGE_KUTTA | FREQ_UNNORMALIZED | AMP_NORMALIZED);
        assert_eq!(
            f.to_string(),
            "Runge-Kutta method,Frequency unnormalized,Amplitude normalized"
        );
    }

    #[test]
    fn zero_fields_select_defaults() {
        let f = Features::from_bits(CENTRAL_DIFFERENCE).unwrap();
        assert_eq!(f.solver, Solver::CentralDifference);
        assert_eq!(f.freq_norm, FreqNorm::Unnormalized);
        assert_eq!(f.amp_norm, AmpNorm::Normalized);
    }

    #[test]
    fn parses_feature_names() {
        let f: Features = "Central difference method,Search-normalized,Amplitude unnormalized"
            .parse()
            .unwrap();
        assert_eq!(
            f,
            Features::new(
                Solver::CentralDifference,
                FreqNorm::SearchNormalized,
                AmpNorm::Unnormalized
            )
        );
        assert!("Runge-Kutta method,Wobbly".parse::<Features>().is_err());
    }

    #[test]
    fn rejects_stray_bits() {
        assert!(Features::from_bits(7).is_err());
        assert!(Features::from_bits(1 << 30).is_err());
    }

    #[test]
    fn modulation_steps() {
        let rk = Features::default();
        assert_eq!(rk.modulation_step(), 1600.0);
        let cd = Features::new(
            Solver::CentralDifference,
            FreqNorm::SearchNormalized,
            AmpNorm::Normalized,
        );
        assert_eq!(cd.modulation_step(), 700.0);
    }
}
