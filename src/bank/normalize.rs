//! Frequency and amplitude normalization by probing detectors with test tones.

use std::f64::consts::PI;

use rustfft::num_complex::Complex64;

use super::detector::Detector;

/// Length of the tone used to measure a detector's steady-state response.
pub const AMPLITUDE_TONE_SECONDS: f64 = 10.0;
const SEARCH_TONE_SECONDS: f64 = 3.0;
const SEARCH_START: f64 = 0.92;
const SEARCH_END: f64 = 1.08;
const MAX_SEARCH_ITERATIONS: usize = 100;
/// Stop once the bracket is narrower than a 240th of an octave.
const SEARCH_CONVERGED: f64 = 1.002_892_287_869_367_1;
/// Oscillations at the end of the tone used to measure orbit eccentricity.
const ECCENTRICITY_OSCILLATIONS: f64 = 5.0;
const CHUNK: usize = 4096;

/// Unit sine at `frequency`, pre-multiplied by `gain`.
pub fn test_tone(frequency: f64, sample_rate: f64, len: usize, gain: f64) -> Vec<f32> {
    let step = 2.0 * PI * frequency / sample_rate;
    let mut theta = 0.0f64;
    (0..len)
        .map(|_| {
            let s = (gain * theta.sin()) as f32;
            theta = (theta + step) % (2.0 * PI);
            s
        })
        .collect()
}

/// Largest output magnitude of `detector` over `window` while driven by `tone`.
fn peak_in_window(mut detector: Detector, tone: &[f32], window: std::ops::Range<usize>) -> f64 {
    let mut out = vec![Complex64::default(); CHUNK];
    let mut peak = 0.0f64;
    for (i, chunk) in tone.chunks(CHUNK).enumerate() {
        let start = i * CHUNK;
        let out = &mut out[..chunk.len()];
        detector.process(out, chunk);
        for (j, z) in out.iter().enumerate() {
            if window.contains(&(start + j)) {
                peak = peak.max(z.norm());
            }
        }
        if start + chunk.len() >= window.end {
            break;
        }
    }
    peak
}

/// Retune `detector` so its response to a tone at its current frequency
/// peaks there. Returns false, leaving the detector untouched, when the
/// initial bracket does not contain the peak.
pub fn search_normalize(detector: &mut Detector, gain: f64) -> bool {
    let sample_rate = detector.sample_rate();
    let target = detector.frequency();
    let samples = (SEARCH_TONE_SECONDS * sample_rate) as usize;
    let tone = test_tone(target, sample_rate, samples, gain);
    let window = 3 * samples / 4..9 * samples / 10;

    let measure = |freq: f64| peak_in_window(detector.retuned(freq), &tone, window.clone());

    let mut lo = SEARCH_START * target;
    let mut hi = SEARCH_END * target;
    let (mut amp_lo, mut amp_hi, amp_centre) = (measure(lo), measure(hi), measure(target));
    if amp_lo > amp_centre || amp_hi > amp_centre {
        log::warn!(
            "Search normalization at {target:.3} Hz: test range does not span maximum response"
        );
        return false;
    }

    // Move the weaker bound half way to the centre of the bracket each step
    let mut best = target;
    let mut iteration = 0;
    while iteration < MAX_SEARCH_ITERATIONS && hi / lo > SEARCH_CONVERGED {
        iteration += 1;
        let centre = 0.5 * (lo + hi);
        if amp_lo < amp_hi {
            lo = 0.5 * (lo + centre);
        } else {
            hi = 0.5 * (hi + centre);
        }
        amp_lo = measure(lo);
        amp_hi = measure(hi);
        best = 0.5 * (lo + hi);
    }
    log::debug!("Search normalization: {target:.3} Hz tuned to {best:.3} Hz in {iteration} steps");
    detector.set_frequency(best);
    true
}

/// Compute the complex output scale and imaginary-axis correction that make a
/// unit tone at the detector frequency trace a unit circle.
pub fn amplitude_normalize(detector: &mut Detector, gain: f64) {
    let sample_rate = detector.sample_rate();
    let frequency = detector.frequency();
    let samples = (AMPLITUDE_TONE_SECONDS * sample_rate) as usize;
    let tone = test_tone(frequency, sample_rate, samples, gain);
    let tail_len = ((sample_rate * ECCENTRICITY_OSCILLATIONS / frequency) as usize).min(samples);
    let tail_start = samples - tail_len;

    let mut trial = detector.retuned(frequency);
    let mut out = vec![Complex64::default(); CHUNK];
    let mut z_max = Complex64::default();
    let mut tail = Vec::with_capacity(tail_len);
    for (i, chunk) in tone.chunks(CHUNK).enumerate() {
        let start = i * CHUNK;
        let out = &mut out[..chunk.len()];
        trial.process(out, chunk);
        for (j, z) in out.iter().enumerate() {
            if z.norm() > z_max.norm() {
                z_max = *z;
            }
            if start + j >= tail_start {
                tail.push(*z);
            }
        }
    }
    if z_max.norm() == 0.0 {
        log::warn!("Amplitude normalization at {frequency:.3} Hz: detector did not respond");
        return;
    }

    let a_scale = z_max.inv();
    // Signed extremes of each axis over the final oscillations
    let (mut max_re, mut max_im) = (0.0f64, 0.0f64);
    for z in tail.iter().map(|z| z * a_scale) {
        if z.re.abs() > max_re.abs() {
            max_re = z.re;
        }
        if z.im.abs() > max_im.abs() {
            max_im = z.im;
        }
    }
    let i_scale = if max_im != 0.0 { max_re / max_im } else { 1.0 };
    detector.set_scaling(a_scale, i_scale);
}
