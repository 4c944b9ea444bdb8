use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::api::DEFAULT_API_URL;
use crate::update::DEFAULT_RELEASE_URL;

/// Directory under `$HOME` holding the config document.
pub const STORAGE_DIR: &str = ".binocs";
pub const CONFIG_FILE: &str = "config.json";

/// Keys the client reads and writes. Anything else found in the document is
/// carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Key {
    AccessKey,
    SecretKey,
    AccessToken,
    UpgradeLastChecked,
}

impl Key {
    pub const ALL: [Key; 4] = [
        Key::AccessKey,
        Key::SecretKey,
        Key::AccessToken,
        Key::UpgradeLastChecked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Key::AccessKey => "access_key",
            Key::SecretKey => "secret_key",
            Key::AccessToken => "access_token",
            Key::UpgradeLastChecked => "upgrade_last_checked",
        }
    }

    /// Environment variable that overrides this key (`ACCESS_KEY`, ...).
    pub fn env_var(self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHomeDir,
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("config {path} is not a valid JSON object: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Where the client talks to, and how it treats upgrades.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_url: String,         // BINOCS_API_URL
    pub release_url: String,     // BINOCS_RELEASE_URL
    pub release_archive: bool,   // BINOCS_RELEASE_ARCHIVE=1 (artifacts are .tgz)
    pub skip_update_check: bool, // BINOCS_NO_UPDATE_CHECK=1
}

pub fn endpoints() -> Endpoints {
    let flag = |name: &str| std::env::var(name).map(|v| v == "1").unwrap_or(false);
    Endpoints {
        api_url: std::env::var("BINOCS_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
        release_url: std::env::var("BINOCS_RELEASE_URL")
            .unwrap_or_else(|_| DEFAULT_RELEASE_URL.to_string()),
        release_archive: flag("BINOCS_RELEASE_ARCHIVE"),
        skip_update_check: flag("BINOCS_NO_UPDATE_CHECK"),
    }
}

/// `$HOME/.binocs/config.json`.
pub fn default_path() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(STORAGE_DIR).join(CONFIG_FILE))
        .ok_or(ConfigError::NoHomeDir)
}

/// Small key/value document persisted as a JSON object.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    document: Map<String, Value>,
    overrides: BTreeMap<Key, String>,
    persist: bool,
}

impl ConfigStore {
    /// Open the document at `path`, applying environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut store = Self::open(path)?;
        store.overrides = env_overrides();
        Ok(store)
    }

    /// Open the document at `path` without consulting the environment.
    ///
    /// A missing file is created with every recognized key present and empty.
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let (document, created) = match fs::read_to_string(path) {
            Ok(raw) if raw.trim().is_empty() => (Map::new(), true),
            Ok(raw) => {
                let document = serde_json::from_str::<Map<String, Value>>(&raw).map_err(
                    |source| ConfigError::Parse {
                        path: path.to_path_buf(),
                        source,
                    },
                )?;
                (document, false)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => (Map::new(), true),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut store = ConfigStore {
            path: path.to_path_buf(),
            document,
            overrides: BTreeMap::new(),
            persist: true,
        };
        for key in Key::ALL {
            store
                .document
                .entry(key.as_str())
                .or_insert_with(|| Value::String(String::new()));
        }
        if created {
            tracing::debug!(path = %path.display(), "creating config file");
            store.flush()?;
        }
        Ok(store)
    }

    /// Empty in-memory store for `path` that never writes back.
    ///
    /// Stands in for a document that could not be loaded, so commands that
    /// do not need credentials keep working and the file is left as found.
    pub fn detached(path: &Path) -> Self {
        ConfigStore {
            path: path.to_path_buf(),
            document: Map::new(),
            overrides: env_overrides(),
            persist: false,
        }
    }

    /// Value for `key`, or `None` when unset or empty. Environment overrides win.
    pub fn get(&self, key: Key) -> Option<String> {
        if let Some(v) = self.overrides.get(&key) {
            return Some(v.clone());
        }
        match self.document.get(key.as_str()) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: Key, value: impl Into<String>) {
        self.document
            .insert(key.as_str().to_string(), Value::String(value.into()));
    }

    pub fn clear(&mut self, key: Key) {
        self.set(key, String::new());
    }

    /// Write the whole document next to the target, then rename over it.
    pub fn flush(&self) -> Result<(), ConfigError> {
        if !self.persist {
            tracing::debug!(path = %self.path.display(), "config not loaded, skipping write");
            return Ok(());
        }
        let write_err = |source: io::Error| ConfigError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_private_dir(dir).map_err(write_err)?;
        }

        let mut body = serde_json::to_vec_pretty(&self.document)
            .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        body.push(b'\n');

        let tmp = tmp_path(&self.path);
        let result = (|| {
            let mut file = open_private(&tmp)?;
            file.write_all(&body)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map_err(write_err)
    }
}

fn env_overrides() -> BTreeMap<Key, String> {
    Key::ALL
        .into_iter()
        .filter_map(|key| {
            std::env::var(key.env_var())
                .ok()
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        })
        .collect()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if dir.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
