/// Downloader configuration.
///
/// Every tunable that differed between the menu themes lives here so there
/// is one code path. Values arrive as plain key/value pairs, either from the
/// process environment or from whatever loader the front end uses.
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

pub const KEY_DOWNLOAD_ROOT: &str = "STOREGAME_DOWNLOAD_ROOT";
pub const KEY_CONNECTIONS: &str = "STOREGAME_CONNECTIONS";
pub const KEY_SPLITS: &str = "STOREGAME_SPLITS";
pub const KEY_CONCURRENCY: &str = "STOREGAME_CONCURRENCY";
pub const KEY_CONNECT_TIMEOUT: &str = "STOREGAME_CONNECT_TIMEOUT_SECS";
pub const KEY_MAX_TRIES: &str = "STOREGAME_MAX_TRIES";
pub const KEY_RETRY_WAIT: &str = "STOREGAME_RETRY_WAIT_SECS";
pub const KEY_REFERER: &str = "STOREGAME_REFERER";
pub const KEY_LISTING_TIMEOUT: &str = "STOREGAME_LISTING_TIMEOUT_SECS";
pub const KEY_PROBE_TIMEOUT: &str = "STOREGAME_PROBE_TIMEOUT_SECS";
pub const KEY_ARCHIVE_EXTENSION: &str = "STOREGAME_ARCHIVE_EXTENSION";
pub const KEY_TURBO_TOOL: &str = "STOREGAME_TURBO_TOOL";
pub const KEY_FALLBACK_TOOL: &str = "STOREGAME_FALLBACK_TOOL";
pub const KEY_EXTRACT_TOOL: &str = "STOREGAME_EXTRACT_TOOL";

const ALL_KEYS: &[&str] = &[
    KEY_DOWNLOAD_ROOT,
    KEY_CONNECTIONS,
    KEY_SPLITS,
    KEY_CONCURRENCY,
    KEY_CONNECT_TIMEOUT,
    KEY_MAX_TRIES,
    KEY_RETRY_WAIT,
    KEY_REFERER,
    KEY_LISTING_TIMEOUT,
    KEY_PROBE_TIMEOUT,
    KEY_ARCHIVE_EXTENSION,
    KEY_TURBO_TOOL,
    KEY_FALLBACK_TOOL,
    KEY_EXTRACT_TOOL,
];

/// Settings consumed by the orchestrator and its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderConfig {
    /// Root under which `<category>/<item>` is written.
    pub download_root: PathBuf,
    /// Connections per server in turbo mode.
    pub connections: u32,
    /// Splits per file in turbo mode.
    pub splits: u32,
    /// Concurrent downloads in turbo mode.
    pub concurrency: u32,
    pub connect_timeout_secs: u64,
    pub max_tries: u32,
    pub retry_wait_secs: u64,
    /// Referer header some hosts require before serving files.
    pub referer: Option<String>,
    pub listing_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    /// Archive extension (without the dot) that catalog entries must carry.
    pub archive_extension: String,
    pub turbo_tool: String,
    pub fallback_tool: String,
    pub extract_tool: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from("/roms"),
            connections: 10,
            splits: 10,
            concurrency: 10,
            connect_timeout_secs: 30,
            max_tries: 5,
            retry_wait_secs: 5,
            referer: None,
            listing_timeout_secs: 15,
            probe_timeout_secs: 5,
            archive_extension: "zip".to_string(),
            turbo_tool: "aria2c".to_string(),
            fallback_tool: "curl".to_string(),
            extract_tool: "7z".to_string(),
        }
    }
}

impl DownloaderConfig {
    /// Build from key/value pairs. Unknown keys are ignored, missing keys
    /// keep their defaults.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            config.apply(key.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    /// Build from the process environment (`STOREGAME_*` variables).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_pairs(
            ALL_KEYS
                .iter()
                .filter_map(|key| std::env::var(key).ok().map(|value| (*key, value))),
        )
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            KEY_DOWNLOAD_ROOT => {
                if value.is_empty() {
                    return Err(invalid(key, value));
                }
                self.download_root = PathBuf::from(value);
            }
            KEY_CONNECTIONS => self.connections = parse_count(key, value)?,
            KEY_SPLITS => self.splits = parse_count(key, value)?,
            KEY_CONCURRENCY => self.concurrency = parse_count(key, value)?,
            KEY_CONNECT_TIMEOUT => self.connect_timeout_secs = parse_count(key, value)?,
            KEY_MAX_TRIES => self.max_tries = parse_count(key, value)?,
            KEY_RETRY_WAIT => self.retry_wait_secs = parse_number(key, value)?,
            KEY_REFERER => {
                self.referer = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            KEY_LISTING_TIMEOUT => self.listing_timeout_secs = parse_count(key, value)?,
            KEY_PROBE_TIMEOUT => self.probe_timeout_secs = parse_count(key, value)?,
            KEY_ARCHIVE_EXTENSION => {
                let ext = value.trim_start_matches('.');
                if ext.is_empty() {
                    return Err(invalid(key, value));
                }
                self.archive_extension = ext.to_string();
            }
            KEY_TURBO_TOOL => self.turbo_tool = parse_program(key, value)?,
            KEY_FALLBACK_TOOL => self.fallback_tool = parse_program(key, value)?,
            KEY_EXTRACT_TOOL => self.extract_tool = parse_program(key, value)?,
            _ => {}
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_secs)
    }

    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Directory a category's archives are written to.
    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.download_root.join(category)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

/// Like `parse_number`, but zero is rejected.
fn parse_count<T: FromStr + Default + PartialEq>(key: &str, value: &str) -> Result<T, ConfigError> {
    let n: T = parse_number(key, value)?;
    if n == T::default() {
        return Err(invalid(key, value));
    }
    Ok(n)
}

fn parse_program(key: &str, value: &str) -> Result<String, ConfigError> {
    if value.is_empty() {
        Err(invalid(key, value))
    } else {
        Ok(value.to_string())
    }
}
