//! airwx core library
//!
//! Shared utilities for the airwx services:
//! - Configuration discovery and loading (XDG-compliant)
//! - Application-wide defaults

mod config;

pub use config::{find_config_file, get_xdg_config_path, load_config, ConfigSource};

/// Application name used for XDG paths
pub const APP_NAME: &str = "airwx";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AIRWX_CONFIG";

/// Config filename searched for in the standard locations
pub const CONFIG_FILENAME: &str = "airports.toml";

/// Overall deadline for one fan-out of source fetches (seconds)
pub const DEFAULT_FETCH_DEADLINE: u64 = 20;

/// Per-source fetch timeout when a source doesn't set one (seconds)
pub const DEFAULT_SOURCE_TIMEOUT: u64 = 10;

/// Global ceiling on observation age regardless of source (3 hours)
pub const DEFAULT_HARD_STALENESS: u64 = 3 * 3600;

/// Age after which every source being stale counts as an outage (1.5 hours)
pub const DEFAULT_OUTAGE_THRESHOLD: u64 = 5400;

/// Airports aggregated at once by a bulk run
pub const DEFAULT_MAX_CONCURRENT_AIRPORTS: usize = 4;

/// Longest duration any setting may name (one week, in seconds)
pub const MAX_SETTING_SECONDS: u64 = 7 * 24 * 3600;
