//! Locating and reading the TOML configuration file.
//!
//! An explicit path always wins. Otherwise the environment variable is
//! consulted, then the working directory, the user's XDG config home and
//! finally `/etc/airwx`. When none of them hold the file the caller's
//! defaults apply.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::{debug, info};
use serde::de::DeserializeOwned;

use crate::APP_NAME;

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Named by the caller or by the environment variable
    Explicit(PathBuf),
    CurrentDir(PathBuf),
    /// `$XDG_CONFIG_HOME/airwx/` or `~/.config/airwx/`
    XdgConfig(PathBuf),
    /// `/etc/airwx/`
    System(PathBuf),
    /// Nothing on disk; built-in defaults
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p)
            | ConfigSource::CurrentDir(p)
            | ConfigSource::XdgConfig(p)
            | ConfigSource::System(p) => Some(p.as_path()),
            ConfigSource::Defaults => None,
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.path() {
            Some(p) => write!(f, "{}", p.display()),
            None => f.write_str("(defaults)"),
        }
    }
}

/// The on-disk candidates for `filename`, most specific first.
fn candidates(filename: &str) -> [ConfigSource; 3] {
    [
        ConfigSource::CurrentDir(PathBuf::from(filename)),
        ConfigSource::XdgConfig(get_xdg_config_path(filename)),
        ConfigSource::System(Path::new("/etc").join(APP_NAME).join(filename)),
    ]
}

/// Resolve which file, if any, holds the configuration.
///
/// A variable pointing at a missing file is ignored and the search carries
/// on through the standard locations.
pub fn find_config_file(env_var: &str, filename: &str) -> ConfigSource {
    if let Some(path) = env::var_os(env_var).map(PathBuf::from) {
        if path.exists() {
            return ConfigSource::Explicit(path);
        }
        debug!("{} names missing file {}", env_var, path.display());
    }

    candidates(filename)
        .into_iter()
        .find(|c| c.path().is_some_and(Path::exists))
        .unwrap_or(ConfigSource::Defaults)
}

pub fn get_xdg_config_path(filename: &str) -> PathBuf {
    let base = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))
        .unwrap_or_else(|| PathBuf::from(".config"));
    base.join(APP_NAME).join(filename)
}

/// Parse the file behind `source`, or hand back `T::default()` for
/// [`ConfigSource::Defaults`].
pub fn load_config<T: DeserializeOwned + Default>(source: &ConfigSource) -> anyhow::Result<T> {
    let Some(path) = source.path() else {
        return Ok(T::default());
    };
    info!("loading configuration from {}", path.display());
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}
