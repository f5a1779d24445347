//! Command-line arguments and the persisted per-user configuration.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default coordination port. Ports below 1000 are privileged and fall
/// back to this value.
pub const DEFAULT_PORT: u16 = 22623;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("cannot locate a home directory")]
    NoHome,
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Parser)]
#[command(name = "wgpreproc", about = "Macro preprocessor for scripting languages")]
pub struct Args {
    /// File to preprocess. Without one the process starts as a bare host.
    pub file: Option<PathBuf>,

    /// Hand the file to a running host and exit, never becoming one.
    #[arg(long)]
    pub client: bool,

    /// Become the host even when given a file.
    #[arg(long, conflicts_with = "client")]
    pub server: bool,

    /// Coordination port override.
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding per-project source trees.
    #[arg(long)]
    pub projects_dir: Option<PathBuf>,

    /// Run once and print the result instead of watching.
    #[arg(long)]
    pub once: bool,

    /// With --once, print the expanded text only, not the JSON report.
    #[arg(long, requires = "once")]
    pub raw: bool,

    /// Language profile override; otherwise taken from pragmas or the
    /// file extension.
    #[arg(long)]
    pub lang: Option<String>,
}

/// Settings that survive between invocations, stored as JSON under the
/// user's `.config` directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub projects_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            projects_dir: None,
        }
    }
}

impl Config {
    fn path() -> Result<PathBuf, ConfigError> {
        let home = std::env::var_os("HOME").ok_or(ConfigError::NoHome)?;
        Ok(PathBuf::from(home).join(".config").join("wgpreproc.json"))
    }

    /// Read the stored configuration, falling back to defaults when the
    /// file does not exist yet.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Effective projects directory: the stored value, or `projects`
    /// under the user's home directory.
    pub fn projects_root(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.projects_dir {
            return Ok(dir.clone());
        }
        let home = std::env::var_os("HOME").ok_or(ConfigError::NoHome)?;
        Ok(PathBuf::from(home).join("projects"))
    }

    /// Fold command-line overrides in. Overrides persist for later
    /// invocations, so the caller should save afterwards.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(dir) = &args.projects_dir {
            self.projects_dir = Some(dir.clone());
        }
        if self.port < 1000 {
            log::warn!("port {} is privileged, using {}", self.port, DEFAULT_PORT);
            self.port = DEFAULT_PORT;
        }
    }
}
