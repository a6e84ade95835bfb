use detectorbank::bank::normalize::test_tone;
use detectorbank::{
    AmpNorm, DetectorBank, Error, Features, FreqNorm, Onset, OnsetDetector, Solver,
};

const SR: u32 = 48000;
const T0: usize = 24000;

fn normalized() -> Features {
    Features::new(Solver::RungeKutta, FreqNorm::Unnormalized, AmpNorm::Normalized)
}

/// Silence, then tones starting at the given sample offsets.
fn steps(tones: &[(f64, usize)], len: usize) -> Vec<f32> {
    let mut input = vec![0.0f32; len];
    for &(f, start) in tones {
        for (x, t) in input[start..].iter_mut().zip(test_tone(f, SR as f64, len - start, 1.0)) {
            *x += t;
        }
    }
    input
}

fn detect(input: &[f32], channels: &[(f64, f64)], threshold: f64) -> (Vec<Onset>, Vec<Onset>) {
    let bank = DetectorBank::new(SR, input, 2, channels, normalized(), 1e-4, 25.0).unwrap();
    let mut detector = OnsetDetector::new(bank).unwrap();
    let mut onsets = Vec::new();
    let mut vague = Vec::new();
    detector.find_onsets(&mut onsets, threshold, Some(&mut vague)).unwrap();
    (onsets, vague)
}

#[test]
fn step_onset_is_located_at_the_step() {
    let input = steps(&[(440.0, T0)], 3 * SR as usize / 2);
    let (onsets, vague) = detect(&input, &[(440.0, 0.0)], 0.2);
    assert_eq!(onsets.len(), 1, "{onsets:?}");
    assert!(vague.is_empty());
    let onset = &onsets[0];
    assert!(onset.sample.abs_diff(T0) <= 1, "onset at {}", onset.sample);
    assert!(!onset.vague);
    assert_eq!(onset.channels, vec![0]);
    assert_eq!(onset.frequencies, vec![440.0]);
    assert!((onset.time - onset.sample as f64 / SR as f64).abs() < 1e-12);
}

/// The onset reported for `channel`.
fn on_channel(onsets: &[Onset], channel: usize) -> &Onset {
    let found: Vec<&Onset> = onsets.iter().filter(|o| o.channels == [channel]).collect();
    assert_eq!(found.len(), 1, "{onsets:?}");
    found[0]
}

#[test]
fn near_simultaneous_onsets_merge() {
    let channels = [(440.0, 0.0), (880.0, 0.0)];
    let ten_ms = SR as usize / 100;
    // The 440 Hz note is already sounding when the 880 Hz one starts, so the
    // second onset is only placed to within one beat of the two notes.
    let beat = SR as usize / 400;

    let input = steps(&[(440.0, T0), (880.0, T0 + ten_ms)], 3 * SR as usize / 2);
    let (onsets, _) = detect(&input, &channels, 0.2);
    assert_eq!(onsets.len(), 2);
    let first = on_channel(&onsets, 0).sample;
    let second = on_channel(&onsets, 1).sample;
    assert!(first.abs_diff(T0) <= 1, "440 Hz onset at {first}");
    assert!(second.abs_diff(T0 + ten_ms) <= beat, "880 Hz onset at {second}");
    let merged = OnsetDetector::sort_simultaneous(&onsets);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].channels, vec![0, 1]);
    assert!(merged[0].sample.abs_diff(T0) <= 1);

    let input = steps(&[(440.0, T0), (880.0, T0 + 4 * ten_ms)], 3 * SR as usize / 2);
    let (onsets, _) = detect(&input, &channels, 0.2);
    assert_eq!(onsets.len(), 2);
    let first = on_channel(&onsets, 0).sample;
    let second = on_channel(&onsets, 1).sample;
    assert!(first.abs_diff(T0) <= 1, "440 Hz onset at {first}");
    assert!(second.abs_diff(T0 + 4 * ten_ms) <= beat, "880 Hz onset at {second}");
    let separate = OnsetDetector::sort_simultaneous(&onsets);
    assert_eq!(separate.len(), 2);
    assert_eq!(separate[1].frequencies, vec![880.0]);
}

#[test]
fn channel_rearms_after_falling_below_threshold() {
    let half_second = SR as usize / 2;
    let restart = T0 + half_second + 5 * half_second;
    let len = restart + 2 * half_second;
    let mut input = vec![0.0f32; len];
    input[T0..T0 + half_second].copy_from_slice(&test_tone(440.0, SR as f64, half_second, 1.0));
    input[restart..].copy_from_slice(&test_tone(440.0, SR as f64, len - restart, 1.0));

    let (onsets, vague) = detect(&input, &[(440.0, 0.0)], 0.2);
    assert!(vague.is_empty(), "{vague:?}");
    assert_eq!(onsets.len(), 2, "{onsets:?}");
    assert!(onsets.iter().all(|o| o.channels == [0] && !o.vague));
    assert!(onsets[0].sample.abs_diff(T0) <= 1, "first onset at {}", onsets[0].sample);
    let beat = SR as usize / 400;
    assert!(
        onsets[1].sample.abs_diff(restart) <= beat,
        "second onset at {}",
        onsets[1].sample
    );
}

#[test]
fn gradual_swell_is_vague() {
    let swell = T0 + 2 * SR as usize;
    let len = swell + SR as usize;
    let tone = test_tone(440.0, SR as f64, len - T0, 1.0);
    let mut input = vec![0.0f32; len];
    for (n, (x, t)) in input[T0..].iter_mut().zip(tone).enumerate() {
        // Quiet enough to stay below the threshold, then loud enough to
        // cross it from a magnitude more than half the threshold
        *x = t * if T0 + n < swell { 0.15 } else { 0.3 };
    }

    let (onsets, vague) = detect(&input, &[(440.0, 0.0)], 0.2);
    assert!(onsets.is_empty(), "{onsets:?}");
    assert_eq!(vague.len(), 1, "{vague:?}");
    assert!(vague[0].vague);
    assert_eq!(vague[0].channels, vec![0]);
    assert!(vague[0].sample > swell && vague[0].sample < len, "at {}", vague[0].sample);

    // Without a vague list the crossing is dropped
    let bank = DetectorBank::new(SR, &input, 2, &[(440.0, 0.0)], normalized(), 1e-4, 25.0).unwrap();
    let mut detector = OnsetDetector::new(bank).unwrap();
    let mut onsets = Vec::new();
    detector.find_onsets(&mut onsets, 0.2, None).unwrap();
    assert!(onsets.is_empty(), "{onsets:?}");
}

#[test]
fn threshold_must_be_a_fraction() {
    let bank =
        DetectorBank::new(SR, &[0.0; 100], 0, &[(440.0, 0.0)], normalized(), 1e-4, 25.0).unwrap();
    let mut detector = OnsetDetector::new(bank).unwrap();
    let mut onsets = Vec::new();
    for bad in [0.0, -0.5, 1.5, f64::NAN] {
        assert!(matches!(
            detector.find_onsets(&mut onsets, bad, None),
            Err(Error::InvalidParameter(_))
        ));
    }
    assert!(detector.find_onsets(&mut onsets, 1.0, None).is_ok());
}

#[test]
fn empty_and_silent_input_have_no_onsets() {
    for input in [Vec::new(), vec![0.0f32; 4800]] {
        let (onsets, vague) = detect(&input, &[(440.0, 0.0)], 0.2);
        assert!(onsets.is_empty());
        assert!(vague.is_empty());
    }
}
