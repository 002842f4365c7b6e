use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;

use blobscope_types::AppConfig;

use crate::legacy::{config_from_legacy, parse_legacy_env};

const ACTIVE_FILE: &str = "config.toml";
const DEFAULT_FILE: &str = "config.default.toml";
const BACKUP_DIR: &str = "backups";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File-backed store for the single active configuration
///
/// Reads and writes are serialized through an internal lock; the active file
/// is only ever replaced by an atomic rename.
pub struct ConfigStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn active_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_FILE)
    }

    pub fn default_path(&self) -> PathBuf {
        self.dir.join(DEFAULT_FILE)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR)
    }

    /// True until an active configuration has been written
    pub fn needs_setup(&self) -> bool {
        !self.active_path().exists()
    }

    /// Active configuration merged over compiled-in defaults.
    ///
    /// A missing file yields defaults; an unreadable or unparseable one is
    /// logged and also yields defaults.
    pub fn read(&self) -> AppConfig {
        let _guard = self.lock.lock();
        load_or_default(&self.active_path())
    }

    /// The default snapshot, if one was taken
    pub fn read_default(&self) -> Option<AppConfig> {
        let _guard = self.lock.lock();
        load(&self.default_path())
    }

    /// Back up the current active file, then atomically replace it with `cfg`
    pub fn write(&self, cfg: &AppConfig) -> Result<(), ConfigError> {
        let _guard = self.lock.lock();
        self.write_active(cfg)
    }

    /// Read, modify and write the active configuration under one lock
    pub fn update<F>(&self, f: F) -> Result<AppConfig, ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let _guard = self.lock.lock();
        let mut cfg = load_or_default(&self.active_path());
        f(&mut cfg);
        self.write_active(&cfg)?;
        Ok(cfg)
    }

    /// Seed the store from a legacy env file when no active config exists.
    ///
    /// Writes the active file, and the default snapshot unless one is already
    /// on disk. Returns whether anything was bootstrapped.
    pub fn bootstrap_once(&self, legacy_env: &Path) -> Result<bool, ConfigError> {
        let _guard = self.lock.lock();

        if self.active_path().exists() {
            return Ok(false);
        }
        let content = match fs::read_to_string(legacy_env) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ConfigError::io(legacy_env, e)),
        };

        let cfg = config_from_legacy(&parse_legacy_env(&content));
        self.ensure_dir()?;
        let default_path = self.default_path();
        if default_path.exists() {
            tracing::debug!(path = %default_path.display(), "keeping existing default snapshot");
        } else {
            write_atomic(&default_path, &toml::to_string_pretty(&cfg)?)?;
        }
        self.write_active(&cfg)?;

        tracing::info!(
            source = %legacy_env.display(),
            dir = %self.dir.display(),
            fetch_range = cfg.fetch_range.as_str(),
            "bootstrapped configuration from legacy env file"
        );
        Ok(true)
    }

    /// Overwrite the active configuration with the default snapshot
    pub fn restore_default(&self) -> Result<AppConfig, ConfigError> {
        let _guard = self.lock.lock();

        let cfg = load(&self.default_path()).unwrap_or_else(|| {
            tracing::warn!("no default snapshot, restoring compiled-in defaults");
            AppConfig::default()
        });
        self.write_active(&cfg)?;
        tracing::info!("restored default configuration");
        Ok(cfg)
    }

    fn ensure_dir(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.dir).map_err(|e| ConfigError::io(&self.dir, e))
    }

    fn write_active(&self, cfg: &AppConfig) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(cfg)?;
        self.ensure_dir()?;

        let active = self.active_path();
        if active.exists() {
            if let Err(e) = self.backup(&active) {
                tracing::warn!(error = %e, "config backup failed, continuing with write");
            }
        }

        write_atomic(&active, &contents)?;
        tracing::debug!(path = %active.display(), "wrote active configuration");
        Ok(())
    }

    fn backup(&self, active: &Path) -> Result<PathBuf, ConfigError> {
        let dir = self.backup_dir();
        fs::create_dir_all(&dir).map_err(|e| ConfigError::io(&dir, e))?;

        let tag = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let path = dir.join(format!("config-{tag}.toml"));
        fs::copy(active, &path).map_err(|e| ConfigError::io(&path, e))?;
        Ok(path)
    }
}

fn load(path: &Path) -> Option<AppConfig> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to read config");
            return None;
        }
    };

    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to parse config");
            None
        }
    }
}

fn load_or_default(path: &Path) -> AppConfig {
    load(path).unwrap_or_default()
}

/// Write to a temp file in the target's directory, then rename over it
fn write_atomic(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ConfigError::io(dir, e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| ConfigError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| ConfigError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| ConfigError::io(path, e.error))?;
    Ok(())
}
