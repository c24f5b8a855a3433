//! Configuration loading.
//!
//! Loads from `$REELKEEPER_CONFIG_PATH`, else `./reelkeeper.toml`, else
//! `~/.reelkeeper/config.toml`. A missing file means defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::policy::RetentionMode;

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the grid and the test framework write artifacts.
    pub results: ResultsConfig,
    /// Recording and retention settings.
    pub video: VideoConfig,
    /// Container runtime settings.
    pub runtime: RuntimeConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence env vars > TOML file > defaults.
    ///
    /// `explicit` (from the command line) wins over every search location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::config_path_with(env, home_dir()),
        };
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(env);
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config file path using a custom env resolver.
    ///
    /// Checks `$REELKEEPER_CONFIG_PATH`, then `./reelkeeper.toml`, then the
    /// per-user file under `home`.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>, home: Option<PathBuf>) -> PathBuf {
        if let Some(p) = env("REELKEEPER_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        let local = PathBuf::from("reelkeeper.toml");
        if local.is_file() {
            return local;
        }
        match home {
            Some(home) => home.join(".reelkeeper").join("config.toml"),
            None => local,
        }
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests avoid mutating the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Retention; the variable name matches the test harness convention.
        if let Some(v) = env("RECORD_VIDEO") {
            match v.parse::<RetentionMode>() {
                Ok(mode) => self.video.record = mode,
                Err(e) => tracing::warn!(
                    var = "RECORD_VIDEO",
                    value = %v,
                    error = %e,
                    "ignoring invalid env override"
                ),
            }
        }

        // Paths.
        if let Some(v) = env("REELKEEPER_RESULTS_DIR") {
            self.results.dir = PathBuf::from(v);
        }
        if let Some(v) = env("REELKEEPER_VIDEO_DIR") {
            self.results.video_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("REELKEEPER_MANIFEST_FILE") {
            self.results.manifest_file = v;
        }

        // Runtime.
        if let Some(v) = env("REELKEEPER_LABEL_KEY") {
            self.runtime.label_key = v;
        }
        if let Some(v) = env("REELKEEPER_MAX_WAIT_SECS") {
            match v.parse() {
                Ok(n) => self.runtime.max_wait_secs = Some(n),
                Err(_) => tracing::warn!(
                    var = "REELKEEPER_MAX_WAIT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Logging.
        if let Some(v) = env("REELKEEPER_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid TOML or invalid field values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

// ── Results config ──────────────────────────────────────────────

/// Artifact locations shared by the grid, the test workers and the coordinator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Allure results directory (`*-result.json` files).
    pub dir: PathBuf,
    /// Directory the grid writes videos to; defaults to `dir`.
    ///
    /// Attached videos are linked by file name, which the report resolves
    /// against `dir`; a separate directory only suits delete-heavy runs.
    pub video_dir: Option<PathBuf>,
    /// Manifest file name, relative to `dir` unless absolute.
    pub manifest_file: String,
}

impl ResultsConfig {
    /// Full manifest path.
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(&self.manifest_file)
    }

    /// Effective video directory.
    pub fn video_dir(&self) -> &Path {
        self.video_dir.as_deref().unwrap_or(&self.dir)
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/app/allure-results"),
            video_dir: None,
            manifest_file: "cleanup_manifest.jsonl".to_string(),
        }
    }
}

// ── Video config ────────────────────────────────────────────────

/// Recording and retention settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Which videos survive the run.
    pub record: RetentionMode,
    /// Recording resolution passed to the grid.
    pub screen_size: String,
    /// Whether the grid should expose VNC for live viewing.
    pub enable_vnc: bool,
    /// Static labels added to every browser container.
    pub labels: BTreeMap<String, String>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            record: RetentionMode::OnFailure,
            screen_size: "1920x1080".to_string(),
            enable_vnc: true,
            labels: BTreeMap::from([
                ("env".to_string(), "test".to_string()),
                ("team".to_string(), "qa".to_string()),
            ]),
        }
    }
}

// ── Runtime config ──────────────────────────────────────────────

/// Container runtime settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Label key carrying the execution id on browser containers.
    pub label_key: String,
    /// Optional cap on each destruction wait; unset waits indefinitely.
    pub max_wait_secs: Option<u64>,
}

impl RuntimeConfig {
    /// Wait cap as a duration.
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(Duration::from_secs)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            label_key: "execution_id".to_string(),
            max_wait_secs: None,
        }
    }
}

// ── Logging config ──────────────────────────────────────────────

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
