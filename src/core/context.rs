//! Explicit runtime context shared by every component.
//!
//! Built once at startup from the config root and handed to the registry,
//! supervisor, collector and monitoring service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::config::{ConfigStore, GlobalConfig};
use crate::error::{Result, ValmonError};

/// Environment variable overriding the config root
pub const HOME_ENV: &str = "VALMON_HOME";

/// Resolved on-disk layout under the config root
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub config_file: PathBuf,
    pub environments_dir: PathBuf,
    pub current_file: PathBuf,
    pub process_file: PathBuf,
    pub lock_file: PathBuf,
    pub ledger_dir: PathBuf,
    pub accounts_dir: PathBuf,
    pub metrics_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Paths {
    /// Layout with the default ledger/accounts locations
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let environments_dir = root.join("environments");

        Self {
            config_file: root.join("config.json"),
            current_file: environments_dir.join(".current"),
            process_file: environments_dir.join(".process"),
            lock_file: environments_dir.join(".lock"),
            environments_dir,
            ledger_dir: root.join("ledger"),
            accounts_dir: root.join("accounts"),
            metrics_dir: root.join("metrics"),
            log_file: root.join("logs").join("validator.log"),
            root,
        }
    }

    /// Default root: `$VALMON_HOME`, else `<os config dir>/valmon`
    pub fn default_root() -> Result<PathBuf> {
        if let Some(home) = std::env::var_os(HOME_ENV) {
            return Ok(PathBuf::from(home));
        }

        dirs::config_dir()
            .map(|dir| dir.join("valmon"))
            .ok_or_else(|| ValmonError::config("Could not determine config directory"))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Paths plus the config snapshot loaded for this run
#[derive(Debug, Clone)]
pub struct Context {
    pub paths: Paths,
    pub config: GlobalConfig,
}

impl Context {
    /// Load (or create) the config under `root` and resolve the layout
    pub fn load(root: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let paths = Paths::new(root);
        let config = ConfigStore::new(&paths.config_file).load_or_create()?;
        Ok(Arc::new(Self::with_config(paths, config)))
    }

    /// Build a context from an already loaded config without touching disk
    pub fn with_config(mut paths: Paths, config: GlobalConfig) -> Self {
        paths.ledger_dir = paths.resolve(&config.validator.ledger_dir);
        paths.accounts_dir = paths.resolve(&config.validator.accounts_dir);
        Self { paths, config }
    }

    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::new(&self.paths.config_file)
    }

    pub fn rpc_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.config.validator.bind_address, port)
    }

    /// The validator serves its pubsub endpoint on the port after RPC
    pub fn ws_url(&self, port: u16) -> String {
        format!(
            "ws://{}:{}",
            self.config.validator.bind_address,
            port.saturating_add(1)
        )
    }
}
