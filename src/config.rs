use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

pub const MIN_INTERVAL_MINUTES: u32 = 5;
pub const MAX_INTERVAL_MINUTES: u32 = 60;

/// Process settings loaded from environment variables
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub config_path: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8780),
            config_path: std::env::var("SAVEWARDEN_CONFIG")
                .unwrap_or_else(|_| "config.json".into())
                .into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("couldn't parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("couldn't serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostingConfig {
    pub api_url: String,
    pub server_id: u64,
    pub api_token: String,
    /// Telemetry feed URL; `{server_ip}` and `{port}` are filled from the status document.
    pub feed_url: String,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            api_url: "https://www.fakaheda.eu/fhapi/v1/servers".into(),
            server_id: 123456,
            api_token: String::new(),
            feed_url: "https://query.fakaheda.eu/{server_ip}{port}.feed".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FtpConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub dir: String,
    pub blacklist: Vec<String>,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "example.org".into(),
            user: "user".into(),
            password: String::new(),
            dir: "/Saves".into(),
            blacklist: vec!["/Backup".into()],
        }
    }
}

impl FtpConfig {
    /// `host:port` for the control connection. Accepts values pasted as URLs.
    pub fn address(&self) -> String {
        let host = self.host.trim();
        let host = host
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(host)
            .trim_end_matches('/');
        if host.contains(':') {
            host.to_string()
        } else {
            format!("{}:21", host)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RestoreConfig {
    pub settle_secs: u64,
    pub timeout_secs: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            settle_secs: 5,
            timeout_secs: 300,
        }
    }
}

impl RestoreConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The persisted configuration document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub hosting: HostingConfig,
    pub ftp: FtpConfig,
    pub backups_dir: PathBuf,
    pub auto_backup: bool,
    /// Minutes between unattended backups.
    pub interval: u32,
    /// Unix seconds of the last scheduled launch. `None` until the scheduler first arms.
    pub last_run: Option<i64>,
    pub restore: RestoreConfig,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosting: HostingConfig::default(),
            ftp: FtpConfig::default(),
            backups_dir: PathBuf::from("backups"),
            auto_backup: false,
            interval: MIN_INTERVAL_MINUTES,
            last_run: None,
            restore: RestoreConfig::default(),
            poll_interval_ms: 1000,
        }
    }
}

impl Config {
    pub fn set_interval(&mut self, minutes: u32) {
        self.interval = clamp_interval(minutes);
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// One line per setting, secrets masked.
    pub fn redacted_summary(&self) -> Vec<String> {
        let mask = |s: &str| if s.is_empty() { "<empty>" } else { "********" };
        vec![
            format!("hosting.api_url: {}", self.hosting.api_url),
            format!("hosting.server_id: {}", self.hosting.server_id),
            format!("hosting.api_token: {}", mask(&self.hosting.api_token)),
            format!("hosting.feed_url: {}", self.hosting.feed_url),
            format!("ftp.host: {}", self.ftp.address()),
            format!("ftp.user: {}", self.ftp.user),
            format!("ftp.password: {}", mask(&self.ftp.password)),
            format!("ftp.dir: {}", self.ftp.dir),
            format!("ftp.blacklist: {:?}", self.ftp.blacklist),
            format!("backups_dir: {}", self.backups_dir.display()),
            format!("auto_backup: {}", self.auto_backup),
            format!("interval: {} min", self.interval),
            format!("last_run: {:?}", self.last_run),
        ]
    }
}

pub fn clamp_interval(minutes: u32) -> u32 {
    minutes.clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES)
}

/// Shared handle to the configuration document and the file backing it.
///
/// Reads hand out clones. Writes replace the whole file atomically, and the
/// in-memory copy only moves once the file is on disk.
#[derive(Clone)]
pub struct ConfigStore {
    path: Arc<PathBuf>,
    current: Arc<RwLock<Config>>,
}

impl ConfigStore {
    /// Loads `path`, writing the default document first when the file is missing.
    pub fn open_or_create(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            write_atomic(&path, &Config::default())?;
        }
        Self::load(path)
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.set_interval(config.interval);

        Ok(Self {
            path: Arc::new(path),
            current: Arc::new(RwLock::new(config)),
        })
    }

    /// Count of top-level keys in the file on disk.
    pub fn property_count(&self) -> usize {
        std::fs::read_to_string(self.path.as_ref())
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .and_then(|v| v.as_object().map(|o| o.len()))
            .unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Config {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Applies `change` to a copy of the document, persists it, then publishes it.
    pub fn update<F>(&self, change: F) -> Result<Config, ConfigError>
    where
        F: FnOnce(&mut Config),
    {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = guard.clone();
        change(&mut next);
        next.set_interval(next.interval);
        write_atomic(&self.path, &next)?;
        *guard = next.clone();
        Ok(next)
    }
}

fn write_atomic(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let body = serde_json::to_string_pretty(config)?;
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(body.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    std::fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let store = ConfigStore::open_or_create(&path).unwrap();

        assert!(path.exists());
        assert_eq!(store.snapshot(), Config::default());
        assert_eq!(store.property_count(), 8);
    }

    #[test]
    fn partial_document_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "ftp": { "dir": "/World" }, "interval": 90 }"#).unwrap();

        let config = ConfigStore::load(&path).unwrap().snapshot();

        assert_eq!(config.ftp.dir, "/World");
        assert_eq!(config.ftp.blacklist, vec!["/Backup".to_string()]);
        assert_eq!(config.interval, MAX_INTERVAL_MINUTES);
        assert_eq!(config.last_run, None);
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ConfigStore::load(&path).err().unwrap();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn update_persists_whole_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::open_or_create(&path).unwrap();

        store
            .update(|c| {
                c.last_run = Some(301);
                c.auto_backup = true;
                c.interval = 2;
            })
            .unwrap();

        let reloaded = ConfigStore::load(&path).unwrap().snapshot();
        assert_eq!(reloaded.last_run, Some(301));
        assert!(reloaded.auto_backup);
        assert_eq!(reloaded.interval, MIN_INTERVAL_MINUTES);
        assert!(!dir.path().join("config.json.tmp").exists());
    }

    #[test]
    fn failed_write_keeps_memory_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::open_or_create(&path).unwrap();

        // A directory squatting on the temp file name makes the write fail.
        std::fs::create_dir(dir.path().join("config.json.tmp")).unwrap();
        assert!(store.update(|c| c.auto_backup = true).is_err());
        assert!(!store.snapshot().auto_backup);
    }

    #[test]
    fn ftp_address_tolerates_urls() {
        let mut ftp = FtpConfig::default();
        ftp.host = "https://example.org/".into();
        assert_eq!(ftp.address(), "example.org:21");
        ftp.host = "10.0.0.5:2121".into();
        assert_eq!(ftp.address(), "10.0.0.5:2121");
    }

    #[test]
    fn summary_masks_secrets() {
        let mut config = Config::default();
        config.hosting.api_token = "secret-token".into();
        config.ftp.password = "hunter2".into();

        let summary = config.redacted_summary().join("\n");
        assert!(!summary.contains("secret-token"));
        assert!(!summary.contains("hunter2"));
    }
}
