use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fingerprinting::algorithm::{GeneratorConfig, SkipAhead, DEFAULT_MAX_WINDOW_SECONDS};
use crate::fingerprinting::extractor::ExtractorConfig;

/// Defaults that can be saved to a file. Unset fields fall back to the
/// built-in values when resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_window_seconds: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_ahead: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_country: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_interval_secs: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_decay: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_floor: Option<f32>,
}

impl Config {
    /// Create a new empty config
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the config file path (~/.state/songsig/defaults.toml)
    pub fn get_config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").map_err(|_| {
            io::Error::new(io::ErrorKind::NotFound, "HOME environment variable not set")
        })?;
        Ok(Path::new(&home).join(".state").join("songsig").join("defaults.toml"))
    }

    /// Load config from the default path; a missing file is an empty config.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::new());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, toml_string)?;
        Ok(())
    }

    /// Merge this config with another, preferring values from other
    pub fn merge(&mut self, other: &Config) {
        if other.max_window_seconds.is_some() {
            self.max_window_seconds = other.max_window_seconds;
        }
        if other.skip_ahead.is_some() {
            self.skip_ahead = other.skip_ahead;
        }
        if other.language.is_some() {
            self.language = other.language.clone();
        }
        if other.endpoint_country.is_some() {
            self.endpoint_country = other.endpoint_country.clone();
        }
        if other.timezone.is_some() {
            self.timezone = other.timezone.clone();
        }
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
        if other.request_interval_secs.is_some() {
            self.request_interval_secs = other.request_interval_secs;
        }
        if other.peak_decay.is_some() {
            self.peak_decay = other.peak_decay;
        }
        if other.peak_floor.is_some() {
            self.peak_floor = other.peak_floor;
        }
    }

    /// Windowing policy with defaults filled in.
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            max_window_seconds: self.max_window_seconds.unwrap_or(DEFAULT_MAX_WINDOW_SECONDS),
            skip_ahead: if self.skip_ahead.unwrap_or(true) {
                Some(SkipAhead::default())
            } else {
                None
            },
        }
    }

    /// Extraction constants with defaults filled in.
    pub fn extractor_config(&self) -> ExtractorConfig {
        let mut config = ExtractorConfig::default();
        if let Some(decay) = self.peak_decay {
            config.decay = decay;
        }
        if let Some(floor) = self.peak_floor {
            config.power_floor = floor;
        }
        config
    }

    /// Print the config in a human-readable format
    pub fn print(&self, title: &str) {
        println!("{}:", title);

        if let Some(window) = self.max_window_seconds {
            println!("  Window length:      {} seconds", window);
        }
        if let Some(skip) = self.skip_ahead {
            println!("  Skip-ahead:         {}", if skip { "enabled" } else { "disabled" });
        }
        if let Some(language) = &self.language {
            println!("  Language:           {}", language);
        }
        if let Some(country) = &self.endpoint_country {
            println!("  Endpoint country:   {}", country);
        }
        if let Some(timezone) = &self.timezone {
            println!("  Timezone:           {}", timezone);
        }
        if let Some(timeout) = self.timeout_secs {
            println!("  Request timeout:    {} seconds", timeout);
        }
        if let Some(interval) = self.request_interval_secs {
            println!("  Request interval:   {} seconds", interval);
        }
        if let Some(decay) = self.peak_decay {
            println!("  Peak decay:         {}", decay);
        }
        if let Some(floor) = self.peak_floor {
            println!("  Peak floor:         {}", floor);
        }
    }
}
