use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use detectorbank::{AmpNorm, Features, FreqNorm, Solver};

#[derive(Parser, Debug)]
#[command(
    name = "detectorbank",
    about = "Hopf oscillator detector banks for pitch and onset analysis"
)]
pub struct Cli {
    /// Config file (default: ./detectorbank.toml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect note onsets in an audio file
    Onsets {
        /// Input audio file (WAV, MP3, FLAC, OGG)
        input: PathBuf,

        /// Onset threshold on the normalized magnitude (0-1]
        #[arg(short, long, default_value_t = 0.2)]
        threshold: f64,

        /// Report each channel separately instead of merging simultaneous onsets
        #[arg(long)]
        separate: bool,

        /// Also list crossings without a clear rise
        #[arg(long)]
        vague: bool,

        /// Print onsets as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        bank: BankArgs,
    },

    /// Print the peak magnitude of every channel
    Maxima {
        /// Input audio file (WAV, MP3, FLAC, OGG)
        input: PathBuf,

        /// Samples integrated per step
        #[arg(long, default_value_t = 4800)]
        block: usize,

        #[command(flatten)]
        bank: BankArgs,
    },

    /// Build a bank, normalize it and store it under a name
    SaveProfile {
        /// Profile name
        name: String,

        /// Sample rate the profile is built for (44100 or 48000)
        #[arg(long, default_value_t = 48000)]
        sample_rate: u32,

        #[command(flatten)]
        bank: BankArgs,
    },

    /// List stored profiles
    Profiles {
        /// Profile file (default: <config dir>/detectorbank/profiles.toml)
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct BankArgs {
    /// Channel frequencies in Hz (default: the 88 piano keys)
    #[arg(short, long, value_delimiter = ',')]
    pub frequencies: Vec<f64>,

    /// Detector bandwidth in Hz (0 = minimum bandwidth)
    #[arg(short, long, default_value_t = 0.0)]
    pub bandwidth: f64,

    /// Integration method
    #[arg(long, value_enum, default_value_t = SolverArg::Rk4)]
    pub solver: SolverArg,

    /// Search-normalize detector frequencies
    #[arg(long)]
    pub search: bool,

    /// Skip amplitude normalization
    #[arg(long)]
    pub raw_amplitude: bool,

    /// Damping factor
    #[arg(short, long, default_value_t = 0.0001)]
    pub damping: f64,

    /// Input gain
    #[arg(short, long, default_value_t = 25.0)]
    pub gain: f64,

    /// Worker threads (0 = calling thread only)
    #[arg(long, default_value_t = 4)]
    pub threads: usize,

    /// Load the bank from a stored profile instead of normalizing
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Profile file (default: <config dir>/detectorbank/profiles.toml)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Features from the config file, used when no feature flag is given
    #[arg(skip)]
    pub config_features: Option<Features>,
}

impl BankArgs {
    /// Whether the feature flags are all left at their defaults.
    pub fn default_features(&self) -> bool {
        self.solver == SolverArg::Rk4 && !self.search && !self.raw_amplitude
    }

    pub fn features(&self) -> Features {
        if let Some(features) = self.config_features.filter(|_| self.default_features()) {
            return features;
        }
        let solver = match self.solver {
            SolverArg::Euler => Solver::Euler,
            SolverArg::Cd => Solver::CentralDifference,
            SolverArg::Rk4 => Solver::RungeKutta,
        };
        let freq_norm = if self.search {
            FreqNorm::SearchNormalized
        } else {
            FreqNorm::Unnormalized
        };
        let amp_norm = if self.raw_amplitude {
            AmpNorm::Unnormalized
        } else {
            AmpNorm::Normalized
        };
        Features::new(solver, freq_norm, amp_norm)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum SolverArg {
    /// Semi-implicit Euler
    Euler,
    /// Central difference (minimum bandwidth only)
    Cd,
    /// Fourth-order Runge-Kutta
    Rk4,
}
