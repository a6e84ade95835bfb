//! Named, persisted bank configurations.
//!
//! A profile holds everything needed to rebuild a bank without repeating the
//! normalization passes: channel tuning, features, damping, gain and each
//! detector's measured scaling. Audio and computed output are never stored.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bank::features::Features;
use crate::error::{Error, Result};

/// Version tag written to every profile file; files with another tag are rejected.
pub const PROTOCOL: &str = "detectorbank profiles v1";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub sample_rate: u32,
    pub damping: f64,
    pub max_threads: usize,
    pub features: Features,
    pub gain: f64,
    pub detectors: Vec<DetectorProfile>,
}

/// Stored state of one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorProfile {
    /// Requested angular frequency.
    pub w_in: f64,
    pub bw: f64,
    /// Angular frequency the detector actually runs at, after modulation and
    /// search normalization.
    pub w_adjusted: f64,
    /// Complex output scale as `[re, im]`.
    pub a_scale: [f64; 2],
    pub i_scale: f64,
}

/// Storage medium for profiles.
pub trait ProfileStore {
    /// Save under `name`, replacing any profile of that name.
    fn save(&mut self, name: &str, profile: &Profile) -> Result<()>;
    /// Fails with [`Error::ProfileNotFound`] when `name` is absent.
    fn load(&self, name: &str) -> Result<Profile>;
    fn names(&self) -> Result<Vec<String>>;
}

/// Profiles kept in memory for the lifetime of the store.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: HashMap<String, Profile>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStore for MemoryProfileStore {
    fn save(&mut self, name: &str, profile: &Profile) -> Result<()> {
        self.profiles.insert(name.to_string(), profile.clone());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Profile> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))
    }

    fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfileFile {
    protocol: String,
    #[serde(default)]
    profiles: BTreeMap<String, Profile>,
}

/// Profiles in a single human-readable TOML file.
#[derive(Clone, Debug)]
pub struct TomlProfileStore {
    path: PathBuf,
}

impl TomlProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/detectorbank/profiles.toml`
    pub fn default_location() -> Result<Self> {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .ok_or_else(|| Error::Profile("no configuration directory available".into()))?;
        Ok(Self::new(base.join("detectorbank").join("profiles.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<ProfileFile> {
        if !self.path.exists() {
            return Ok(ProfileFile {
                protocol: PROTOCOL.to_string(),
                profiles: BTreeMap::new(),
            });
        }
        let content = std::fs::read_to_string(&self.path)?;
        let file: ProfileFile = toml::from_str(&content)?;
        if file.protocol != PROTOCOL {
            return Err(Error::Profile(format!(
                "incompatible protocol \"{}\" in {}",
                file.protocol,
                self.path.display()
            )));
        }
        Ok(file)
    }
}

impl ProfileStore for TomlProfileStore {
    fn save(&mut self, name: &str, profile: &Profile) -> Result<()> {
        let mut file = self.read()?;
        file.profiles.insert(name.to_string(), profile.clone());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string_pretty(&file)?)?;
        log::info!("Saved profile \"{}\" to {}", name, self.path.display());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Profile> {
        self.read()?
            .profiles
            .remove(name)
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))
    }

    fn names(&self) -> Result<Vec<String>> {
        Ok(self.read()?.profiles.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Profile {
        Profile {
            sample_rate: 48000,
            damping: 1e-4,
            max_threads: 2,
            features: Features::default(),
            gain: 25.0,
            detectors: vec![DetectorProfile {
                w_in: 2.0 * std::f64::consts::PI * 440.0,
                bw: 0.0,
                w_adjusted: 2764.601535159018,
                a_scale: [-0.6662276214323172, 0.6413948092413078],
                i_scale: 1.00086861378479,
            }],
        }
    }

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryProfileStore::new();
        store.save("a4", &sample()).unwrap();
        assert_eq!(store.load("a4").unwrap(), sample());
        assert!(matches!(store.load("missing"), Err(Error::ProfileNotFound(_))));
        assert_eq!(store.names().unwrap(), vec!["a4".to_string()]);
    }

    #[test]
    fn toml_store_persists_exact_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("profiles.toml");
        let mut store = TomlProfileStore::new(&path);
        store.save("a4", &sample()).unwrap();
        store.save("other", &sample()).unwrap();

        let reopened = TomlProfileStore::new(&path);
        assert_eq!(reopened.load("a4").unwrap(), sample());
        assert_eq!(reopened.names().unwrap(), vec!["a4".to_string(), "other".to_string()]);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Runge-Kutta method,Frequency unnormalized,Amplitude normalized"));
    }

    #[test]
    fn toml_store_missing_file_or_name_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlProfileStore::new(dir.path().join("none.toml"));
        assert!(matches!(store.load("x"), Err(Error::ProfileNotFound(_))));
        assert!(store.names().unwrap().is_empty());
    }

    #[test]
    fn toml_store_rejects_foreign_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.toml");
        std::fs::write(&path, "protocol = \"v2 19 Jan 2017\"\n").unwrap();
        let store = TomlProfileStore::new(&path);
        assert!(matches!(store.load("x"), Err(Error::Profile(_))));
    }
}
