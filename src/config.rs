use serde::Deserialize;
use std::path::{Path, PathBuf};

use detectorbank::Features;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bank: BankConfig,
    #[serde(default)]
    pub onsets: OnsetConfig,
    #[serde(default)]
    pub profiles: ProfileConfig,
}

#[derive(Debug, Deserialize)]
pub struct BankConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_damping")]
    pub damping: f64,
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub bandwidth: f64,
    /// Comma-separated feature names, e.g. "Runge-Kutta method,Amplitude normalized"
    #[serde(default)]
    pub features: Option<Features>,
    #[serde(default)]
    pub frequencies: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub struct OnsetConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub store: Option<PathBuf>,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            damping: default_damping(),
            gain: default_gain(),
            bandwidth: 0.0,
            features: None,
            frequencies: Vec::new(),
        }
    }
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

fn default_threads() -> usize { 4 }
fn default_damping() -> f64 { detectorbank::DEFAULT_DAMPING }
fn default_gain() -> f64 { detectorbank::DEFAULT_GAIN }
fn default_threshold() -> f64 { 0.2 }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            log::warn!("Invalid config {}: {}", path.display(), e);
            None
        }
    }
}
