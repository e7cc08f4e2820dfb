use crate::core::WatchMapping;
use crate::daemon_error_with_source;
use crate::err::Result;
use crate::fs::util::{check_dir_permissions, expand_tilde, normalize_path};
use crate::global_var::LOGGER;
use crate::utilities::LogSink;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_UPLOAD_DELAY_SECONDS: u64 = 10;
pub const DEFAULT_DELETE_DELAY_SECONDS: u64 = 600;
pub const LOG_STDOUT_ENV: &str = "NEXTCLOUD_DAEMON_LOG_STDOUT";

static SERVER_URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/]+").expect("static regex"));

fn default_upload_delay() -> u64 {
    DEFAULT_UPLOAD_DELAY_SECONDS
}

fn default_delete_delay() -> u64 {
    DEFAULT_DELETE_DELAY_SECONDS
}

/// One `[[directories]]` entry: a local tree and the remote folder its files go to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub local: String,
    pub remote: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub nextcloud_server: String,
    pub username: String,
    pub password: String,
    pub directories: Vec<DirectoryConfig>,

    #[serde(default = "default_upload_delay")]
    pub upload_delay_seconds: u64,
    #[serde(default = "default_delete_delay")]
    pub delete_delay_seconds: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_patterns: Vec<String>,
}

fn reject_overlaps(roots: &[PathBuf]) -> Result<()> {
    for (i, a) in roots.iter().enumerate() {
        for b in roots.iter().skip(i + 1) {
            if a.starts_with(b) || b.starts_with(a) {
                return Err(format!(
                    "Overlapping local directories are not supported: '{}' and '{}'",
                    a.display(),
                    b.display()
                )
                .into());
            }
        }
    }
    Ok(())
}

impl Config {
    /// Read, parse and validate the TOML file at `config_path` (a leading `~/` is expanded).
    pub fn from_config(config_path: &str) -> Result<Self> {
        let path = expand_tilde(config_path);
        let content = fs::read_to_string(&path).map_err(|e| {
            daemon_error_with_source!(e, "Cannot read configuration file {}", path)
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| daemon_error_with_source!(e, "Invalid configuration file"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !SERVER_URL_PATTERN.is_match(&self.nextcloud_server) {
            return Err(format!(
                "nextcloud_server must be an http(s) URL, got '{}'",
                self.nextcloud_server
            )
            .into());
        }
        if self.username.trim().is_empty() {
            return Err("username must not be empty".into());
        }
        if self.directories.is_empty() {
            return Err("'directories' must contain at least one entry".into());
        }
        for (i, dir) in self.directories.iter().enumerate() {
            if dir.local.trim().is_empty() {
                return Err(format!("Invalid directory entry at index {}: empty 'local'", i).into());
            }
        }
        if self.upload_delay_seconds == 0 {
            return Err("upload_delay_seconds must be greater than 0".into());
        }
        if self.delete_delay_seconds == 0 {
            return Err("delete_delay_seconds must be greater than 0".into());
        }
        self.ignore_regexes()?;
        self.check_overlapping_roots()?;
        Ok(())
    }

    // Routing picks the first root containing a path, so nested roots would be ambiguous.
    fn check_overlapping_roots(&self) -> Result<()> {
        let roots = self
            .directories
            .iter()
            .map(|d| normalize_path(expand_tilde(&d.local)))
            .collect::<std::io::Result<Vec<PathBuf>>>()?;
        reject_overlaps(&roots)
    }

    pub fn ignore_regexes(&self) -> Result<Vec<Regex>> {
        self.ignore_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| daemon_error_with_source!(e, "Invalid ignore pattern '{}'", p).into())
            })
            .collect()
    }

    pub fn upload_delay(&self) -> Duration {
        Duration::from_secs(self.upload_delay_seconds)
    }

    pub fn delete_delay(&self) -> Duration {
        Duration::from_secs(self.delete_delay_seconds)
    }

    /// Where log lines go: stdout when forced by the environment or when no log file is set.
    pub fn log_sink(&self) -> LogSink {
        let forced_stdout = std::env::var(LOG_STDOUT_ENV)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        match &self.log_file {
            Some(file) if !forced_stdout => LogSink::File(PathBuf::from(expand_tilde(file))),
            _ => LogSink::Stdout,
        }
    }

    /// Resolve configured directories into watchable mappings.
    ///
    /// Entries whose local root is missing or not a readable directory are skipped
    /// with a warning; an error is returned only if nothing is left to watch.
    pub fn watch_mappings(&self) -> Result<Vec<WatchMapping>> {
        let mut mappings = Vec::new();
        for dir in &self.directories {
            let local = expand_tilde(&dir.local);
            let root = PathBuf::from(&local);
            if !root.exists() {
                LOGGER.warn(format!("Local directory does not exist: {}", local));
                continue;
            }
            if !root.is_dir() {
                LOGGER.warn(format!("Local path is not a directory: {}", local));
                continue;
            }
            let perms = check_dir_permissions(&root);
            if !perms.can_watch() {
                LOGGER.warn(format!(
                    "Insufficient permissions to watch {}: read={}, execute={}",
                    local, perms.read, perms.execute
                ));
                continue;
            }
            if !perms.write {
                LOGGER.warn(format!(
                    "{} is not writable; uploaded files cannot be removed locally",
                    local
                ));
            }
            let local_root = fs::canonicalize(&root)?;
            LOGGER.info(format!(
                "Monitoring directory: {} -> {}",
                local_root.display(),
                dir.remote
            ));
            mappings.push(WatchMapping::new(local_root, dir.remote.clone()));
        }

        if mappings.is_empty() {
            return Err("No valid directories to monitor".into());
        }
        // symlinks can make lexically distinct roots overlap
        let canonical: Vec<PathBuf> = mappings
            .iter()
            .map(|m| m.local_root().to_path_buf())
            .collect();
        reject_overlaps(&canonical)?;
        Ok(mappings)
    }
}
