//! Layered configuration.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults ([`Config::default`]).
//! 2. `config.toml`, `config.yaml` and `config.json` in the user's
//!    configuration directory (e.g. `~/.config/stacks/` on Linux).
//! 3. A file given explicitly on the command line. Its format is picked from
//!    its extension, falling back to TOML.
//! 4. `STACKS_`-prefixed environment variables, with `__` separating nested
//!    keys: `STACKS_WATCH__DEBOUNCE_MS=500`.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "STACKS_";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "stacks")
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Location of the SQLite catalog.
    pub database: PathBuf,
    /// Libraries registered on startup if not already catalogued.
    pub libraries: Vec<LibrarySeed>,
    pub scan: ScanConfig,
    pub watch: WatchConfig,
    pub events: EventsConfig,
    pub covers: CoverConfig,
    pub log: LogConfig,
}
impl Default for Config {
    fn default() -> Self {
        let database = project_dirs()
            .map(|dirs| dirs.data_dir().join("catalog.sqlite3"))
            .unwrap_or_else(|| PathBuf::from("stacks.sqlite3"));
        Self {
            database,
            libraries: Vec::new(),
            scan: ScanConfig::default(),
            watch: WatchConfig::default(),
            events: EventsConfig::default(),
            covers: CoverConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct LibrarySeed {
    pub path: PathBuf,
    /// Defaults to the directory name.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    /// File extensions (without the dot) that count as books. Matched
    /// case-insensitively.
    pub extensions: Vec<String>,
}
impl Default for ScanConfig {
    fn default() -> Self {
        Self { extensions: vec!["epub".to_string()] }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet window before a burst of filesystem events for one path turns
    /// into a rescan.
    pub debounce_ms: u64,
    /// Quiet window before a series' last-update time is written.
    pub touch_debounce_ms: u64,
    /// How often every library gets a full scan. `0` disables it.
    pub scan_interval_secs: u64,
}
impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 3_000,
            touch_debounce_ms: 10_000,
            scan_interval_secs: 60,
        }
    }
}
impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn touch_debounce(&self) -> Duration {
        Duration::from_millis(self.touch_debounce_ms)
    }

    pub fn scan_interval(&self) -> Option<Duration> {
        (self.scan_interval_secs > 0).then(|| Duration::from_secs(self.scan_interval_secs))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsConfig {
    /// Events buffered per subscriber before a slow one starts missing them.
    pub capacity: usize,
}
impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoverConfig {
    pub enabled: bool,
    pub thumbnail_height: u32,
    pub jpeg_quality: u8,
    /// Blurhash components along the x and y axes.
    pub placeholder_components: (u32, u32),
}
impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thumbnail_height: 300,
            jpeg_quality: 70,
            placeholder_components: (2, 3),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive used when `RUST_LOG` is not set.
    pub filter: String,
}
impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}

impl Config {
    /// Load configuration from every source, then validate it.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut files: Vec<PathBuf> = project_dirs()
            .map(|dirs| ["config.toml", "config.yaml", "config.json"].map(|f| dirs.config_dir().join(f)).to_vec())
            .unwrap_or_default();
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::Load);
            }
            files.push(path.to_path_buf());
        }
        tracing::debug!(?files, "loading configuration");
        Self::from_figment(Self::figment(&files))
    }

    /// Defaults, then each file in order (missing files are skipped), then
    /// the environment.
    pub fn figment(files: &[PathBuf]) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        for file in files {
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
                Some("json") => figment.merge(Json::file(file)),
                _ => figment.merge(Toml::file(file)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let bad_extension = |ext: &String| ext.is_empty() || ext.starts_with('.');
        if self.scan.extensions.is_empty() || self.scan.extensions.iter().any(bad_extension) {
            exn::bail!(ErrorKind::Invalid("scan.extensions"));
        }
        if self.watch.debounce_ms == 0 {
            exn::bail!(ErrorKind::Invalid("watch.debounce_ms"));
        }
        if self.watch.touch_debounce_ms == 0 {
            exn::bail!(ErrorKind::Invalid("watch.touch_debounce_ms"));
        }
        if self.events.capacity == 0 {
            exn::bail!(ErrorKind::Invalid("events.capacity"));
        }
        if !(1..=100).contains(&self.covers.jpeg_quality) {
            exn::bail!(ErrorKind::Invalid("covers.jpeg_quality"));
        }
        if self.covers.thumbnail_height == 0 {
            exn::bail!(ErrorKind::Invalid("covers.thumbnail_height"));
        }
        let (x, y) = self.covers.placeholder_components;
        if !(1..=9).contains(&x) || !(1..=9).contains(&y) {
            exn::bail!(ErrorKind::Invalid("covers.placeholder_components"));
        }
        Ok(())
    }
}
