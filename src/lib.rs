//! Banks of Hopf-bifurcation oscillators tuned to audio frequencies, with a
//! sliding magnitude cache and threshold onset detection on top.

pub mod bank;
pub mod cache;
pub mod error;
pub mod note;
pub mod onset;
pub mod profile;
pub mod shift;

pub use bank::{
    partition, AmpNorm, Detector, DetectorBank, Features, FreqNorm, Solver, DEFAULT_DAMPING,
    DEFAULT_GAIN, EDO12_PIANO, SUPPORTED_SAMPLE_RATES,
};
pub use cache::{
    DetectorCache, MagnitudeBlock, Producer, SegmentProducer, SharedDetectorCache, SlidingBuffer,
};
pub use error::{Error, Result};
pub use note::{Arg, NoteDetector, NoteDetectorBuilder};
pub use onset::{Onset, OnsetDetector, SIMULTANEITY_WINDOW};
pub use profile::{DetectorProfile, MemoryProfileStore, Profile, ProfileStore, TomlProfileStore};
pub use rustfft::num_complex::Complex64;
pub use shift::{FrequencyShifter, HilbertFft, HilbertFir, HilbertMode, HilbertTransform};
