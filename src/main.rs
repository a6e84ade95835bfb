mod audio;
mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use cli::{BankArgs, Cli, Command};
use config::Config;
use detectorbank::{
    Complex64, DetectorBank, OnsetDetector, ProfileStore, TomlProfileStore, EDO12_PIANO,
    SUPPORTED_SAMPLE_RATES,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect detectorbank.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = PathBuf::from("detectorbank.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("detectorbank").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("detectorbank").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });
    let cfg = match config_path {
        Some(ref path) => match config::load_config(path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}", path.display());
                Config::default()
            }
        },
        None => Config::default(),
    };

    match &mut cli.command {
        Command::Onsets {
            input,
            threshold,
            separate,
            vague,
            json,
            bank,
        } => {
            if *threshold == 0.2 {
                *threshold = cfg.onsets.threshold;
            }
            merge_bank_config(bank, &cfg);
            run_onsets(input, *threshold, *separate, *vague, *json, bank)
        }
        Command::Maxima { input, block, bank } => {
            merge_bank_config(bank, &cfg);
            run_maxima(input, *block, bank)
        }
        Command::SaveProfile {
            name,
            sample_rate,
            bank,
        } => {
            merge_bank_config(bank, &cfg);
            run_save_profile(name, *sample_rate, bank)
        }
        Command::Profiles { store } => {
            let store = open_store(store.as_deref().or(cfg.profiles.store.as_deref()))?;
            let names = store.names()?;
            if names.is_empty() {
                println!("No profiles in {}", store.path().display());
            } else {
                println!("Profiles in {}:", store.path().display());
                for name in names {
                    println!("  {name}");
                }
            }
            Ok(())
        }
    }
}

/// Config values apply only when the CLI value is at its default.
fn merge_bank_config(bank: &mut BankArgs, cfg: &Config) {
    if bank.threads == 4 {
        bank.threads = cfg.bank.threads;
    }
    if bank.damping == 0.0001 {
        bank.damping = cfg.bank.damping;
    }
    if bank.gain == 25.0 {
        bank.gain = cfg.bank.gain;
    }
    if bank.bandwidth == 0.0 {
        bank.bandwidth = cfg.bank.bandwidth;
    }
    if bank.frequencies.is_empty() {
        bank.frequencies = cfg.bank.frequencies.clone();
    }
    if bank.store.is_none() {
        bank.store = cfg.profiles.store.clone();
    }
    bank.config_features = cfg.bank.features;
}

fn open_store(path: Option<&Path>) -> Result<TomlProfileStore> {
    match path {
        Some(p) => Ok(TomlProfileStore::new(p)),
        None => TomlProfileStore::default_location().context("Failed to locate profile store"),
    }
}

fn build_bank(args: &BankArgs, sample_rate: u32, samples: &[f32]) -> Result<DetectorBank> {
    if let Some(ref name) = args.profile {
        let store = open_store(args.store.as_deref())?;
        log::info!("Loading profile \"{}\" from {}", name, store.path().display());
        let bank = DetectorBank::from_profile(&store, name, samples)
            .with_context(|| format!("Failed to load profile \"{name}\""))?;
        if bank.sample_rate() != sample_rate {
            anyhow::bail!(
                "Profile \"{}\" is for {}Hz but the input is {}Hz",
                name,
                bank.sample_rate(),
                sample_rate
            );
        }
        return Ok(bank);
    }

    let features = args.features();
    let frequencies: Vec<f64> = if args.frequencies.is_empty() {
        EDO12_PIANO.to_vec()
    } else {
        args.frequencies.clone()
    };
    let channels: Vec<(f64, f64)> = frequencies.iter().map(|&f| (f, args.bandwidth)).collect();
    log::info!("Building {} detectors ({})", channels.len(), features);
    DetectorBank::new(
        sample_rate,
        samples,
        args.threads,
        &channels,
        features,
        args.damping,
        args.gain,
    )
    .context("Failed to build detector bank")
}

fn load_input(input: &Path) -> Result<audio::decode::AudioData> {
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }
    log::info!("Decoding audio...");
    let audio = audio::decode::decode_audio(input)?;
    if !SUPPORTED_SAMPLE_RATES.contains(&audio.sample_rate) {
        anyhow::bail!(
            "Unsupported sample rate {}Hz (expected 44100 or 48000)",
            audio.sample_rate
        );
    }
    Ok(audio)
}

fn run_onsets(
    input: &Path,
    threshold: f64,
    separate: bool,
    report_vague: bool,
    json: bool,
    args: &BankArgs,
) -> Result<()> {
    let audio = load_input(input)?;
    let bank = build_bank(args, audio.sample_rate, &audio.samples)?;

    log::info!("Scanning {:.1}s for onsets at threshold {}", audio.duration(), threshold);
    let mut detector = OnsetDetector::new(bank)?;
    let mut onsets = Vec::new();
    let mut vague = Vec::new();
    detector.find_onsets(&mut onsets, threshold, report_vague.then_some(&mut vague))?;
    if !separate {
        onsets = OnsetDetector::sort_simultaneous(&onsets);
        vague = OnsetDetector::sort_simultaneous(&vague);
    }
    log::info!("Found {} onsets ({} vague)", onsets.len(), vague.len());

    if json {
        let mut all = onsets;
        all.extend(vague);
        all.sort_by(|a, b| a.time.total_cmp(&b.time));
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }
    for onset in onsets.iter().chain(vague.iter()) {
        let freqs: Vec<String> = onset.frequencies.iter().map(|f| format!("{f:.2}")).collect();
        println!(
            "{:10.4}s  {:>9}  {}{}",
            onset.time,
            onset.sample,
            freqs.join(", "),
            if onset.vague { "  (vague)" } else { "" }
        );
    }
    Ok(())
}

fn run_maxima(input: &Path, block: usize, args: &BankArgs) -> Result<()> {
    let audio = load_input(input)?;
    let mut bank = build_bank(args, audio.sample_rate, &audio.samples)?;
    let channels = bank.channels();
    let block = block.max(1);

    let pb = ProgressBar::new(audio.samples.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} samples ({eta})")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );

    let mut z = vec![vec![Complex64::default(); block]; channels];
    let mut mags = vec![vec![0.0; block]; channels];
    let mut maxima = vec![0.0f64; channels];
    loop {
        let n = bank.get_z(&mut z, block)?;
        if n == 0 {
            break;
        }
        if n < block {
            z.iter_mut().for_each(|row| row.truncate(n));
            mags.iter_mut().for_each(|row| row.truncate(n));
        }
        bank.abs_z(&mut mags, &z)?;
        for (max, row) in maxima.iter_mut().zip(&mags) {
            *max = row.iter().cloned().fold(*max, f64::max);
        }
        pb.inc(n as u64);
        if n < block {
            break;
        }
    }
    pb.finish_with_message("Integration complete");

    for (channel, max) in maxima.iter().enumerate() {
        let freq = bank.input_frequency(channel).unwrap_or_default();
        println!("{channel:4}  {freq:10.3} Hz  {max:.6}");
    }
    Ok(())
}

fn run_save_profile(name: &str, sample_rate: u32, args: &BankArgs) -> Result<()> {
    let bank = build_bank(args, sample_rate, &[])?;
    let mut store = open_store(args.store.as_deref())?;
    bank.save_profile(&mut store, name)
        .with_context(|| format!("Failed to save profile \"{name}\""))?;
    println!("Saved \"{}\" ({} channels) to {}", name, bank.channels(), store.path().display());
    Ok(())
}
