//! Read-only pitch and bandwidth tables.

use crate::error::{Error, Result};

/// 12-EDO frequencies of an 88-key instrument, A0 (27.5 Hz) to C8, A4 = 440 Hz.
pub const EDO12_PIANO: [f64; 88] = [
    27.5000, 29.1352, 30.8677, 32.7032, 34.6478, 36.7081,
    38.8909, 41.2034, 43.6535, 46.2493, 48.9994, 51.9131,
    55.0000, 58.2705, 61.7354, 65.4064, 69.2957, 73.4162,
    77.7817, 82.4069, 87.3071, 92.4986, 97.9989, 103.8262,
    110.0000, 116.5409, 123.4708, 130.8128, 138.5913, 146.8324,
    155.5635, 164.8138, 174.6141, 184.9972, 195.9977, 207.6523,
    220.0000, 233.0819, 246.9417, 261.6256, 277.1826, 293.6648,
    311.1270, 329.6276, 349.2282, 369.9944, 391.9954, 415.3047,
    440.0000, 466.1638, 493.8833, 523.2511, 554.3653, 587.3295,
    622.2540, 659.2551, 698.4565, 739.9888, 783.9909, 830.6094,
    880.0000, 932.3275, 987.7666, 1046.5023, 1108.7305, 1174.6591,
    1244.5079, 1318.5102, 1396.9129, 1479.9777, 1567.9817, 1661.2188,
    1760.0000, 1864.6550, 1975.5332, 2093.0045, 2217.4610, 2349.3181,
    2489.0159, 2637.0205, 2793.8259, 2959.9554, 3135.9635, 3322.4376,
    3520.0000, 3729.3101, 3951.0664, 4186.0090,
];

/// Sample rates the detectors are calibrated for.
pub const SUPPORTED_SAMPLE_RATES: [u32; 2] = [44100, 48000];

// Measured minimum bandwidth (Hz) of a bw = 0 detector at each damping.
const DAMPING_POINTS: [f64; 5] = [1e-4, 2e-4, 3e-4, 4e-4, 5e-4];
const MIN_BANDWIDTH_44100: [f64; 5] = [0.850, 1.688, 2.528, 3.360, 4.200];
const MIN_BANDWIDTH_48000: [f64; 5] = [0.922, 1.832, 2.752, 3.660, 4.860];

/// Equal division of the octave: `edo` steps per octave around `reference`,
/// for step offsets `lo..hi`.
pub fn edo_frequencies(edo: u32, reference: f64, lo: i32, hi: i32) -> Vec<f64> {
    (lo..hi)
        .map(|k| reference * 2f64.powf(k as f64 / edo as f64))
        .collect()
}

/// Effective bandwidth in Hz of a minimum-bandwidth detector, interpolated
/// linearly between the measured damping points.
pub fn min_bandwidth(sample_rate: u32, damping: f64) -> Result<f64> {
    let table = match sample_rate {
        44100 => &MIN_BANDWIDTH_44100,
        48000 => &MIN_BANDWIDTH_48000,
        other => {
            return Err(Error::InvalidParameter(format!(
                "sample rate should be 44100 or 48000, got {other}"
            )))
        }
    };
    let (lo, hi) = (DAMPING_POINTS[0], DAMPING_POINTS[DAMPING_POINTS.len() - 1]);
    if !(lo..=hi).contains(&damping) {
        return Err(Error::InvalidParameter(format!(
            "damping must be between {lo:e} and {hi:e}, got {damping:e}"
        )));
    }
    for i in 0..DAMPING_POINTS.len() - 1 {
        let (d0, d1) = (DAMPING_POINTS[i], DAMPING_POINTS[i + 1]);
        if damping <= d1 {
            let t = (damping - d0) / (d1 - d0);
            return Ok(table[i] + t * (table[i + 1] - table[i]));
        }
    }
    Ok(table[table.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn piano_table_matches_edo_formula() {
        let computed = edo_frequencies(12, 440.0, -48, 40);
        assert_eq!(computed.len(), EDO12_PIANO.len());
        for (table, exact) in EDO12_PIANO.iter().zip(computed) {
            assert_relative_eq!(*table, exact, epsilon = 1e-4);
        }
        assert_eq!(EDO12_PIANO[48], 440.0);
    }

    #[test]
    fn min_bandwidth_hits_table_points_and_interpolates() {
        assert_relative_eq!(min_bandwidth(44100, 1e-4).unwrap(), 0.850);
        assert_relative_eq!(min_bandwidth(48000, 5e-4).unwrap(), 4.860);
        assert_relative_eq!(min_bandwidth(44100, 1.5e-4).unwrap(), 1.269, epsilon = 1e-9);
    }

    #[test]
    fn min_bandwidth_rejects_out_of_range() {
        assert!(min_bandwidth(44100, 6e-4).is_err());
        assert!(min_bandwidth(44100, 5e-5).is_err());
        assert!(min_bandwidth(22050, 1e-4).is_err());
    }
}
