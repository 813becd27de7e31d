use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// A program deployed at genesis: `--bpf-program <address> <path>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSpec {
    pub address: String,
    pub path: PathBuf,
}

/// A named, reusable set of validator startup parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub reset: bool,
    #[serde(default)]
    pub clone_accounts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts_dir: Option<PathBuf>,
    #[serde(default)]
    pub description: String,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom_flags: Vec<String>,
    #[serde(default)]
    pub programs: Vec<ProgramSpec>,
    #[serde(default)]
    pub setup_scripts: Vec<String>,
    #[serde(default)]
    pub teardown_scripts: Vec<String>,
}

impl Environment {
    /// Record used for the reserved names when no file exists
    pub fn synthesized(name: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            port,
            reset: false,
            clone_accounts: Vec::new(),
            accounts_dir: None,
            description: "Default local development environment".to_string(),
            created: Utc::now(),
            updated: None,
            custom_flags: Vec::new(),
            programs: Vec::new(),
            setup_scripts: Vec::new(),
            teardown_scripts: Vec::new(),
        }
    }

    pub(crate) fn create(name: &str, opts: EnvironmentOptions, default_port: u16) -> Self {
        Self {
            name: name.to_string(),
            port: opts.port.unwrap_or(default_port),
            reset: opts.reset,
            clone_accounts: opts.clone_accounts,
            accounts_dir: opts.accounts_dir,
            description: opts.description.unwrap_or_default(),
            created: Utc::now(),
            updated: None,
            custom_flags: opts.custom_flags,
            programs: opts.programs,
            setup_scripts: opts.setup_scripts,
            teardown_scripts: opts.teardown_scripts,
        }
    }

    /// Shallow merge: every field present in the patch replaces the stored
    /// value wholesale.
    pub(crate) fn apply(&mut self, patch: EnvironmentPatch) {
        if let Some(port) = patch.port {
            self.port = port;
        }
        if let Some(reset) = patch.reset {
            self.reset = reset;
        }
        if let Some(clone_accounts) = patch.clone_accounts {
            self.clone_accounts = clone_accounts;
        }
        if let Some(accounts_dir) = patch.accounts_dir {
            self.accounts_dir = accounts_dir;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(custom_flags) = patch.custom_flags {
            self.custom_flags = custom_flags;
        }
        if let Some(programs) = patch.programs {
            self.programs = programs;
        }
        if let Some(setup_scripts) = patch.setup_scripts {
            self.setup_scripts = setup_scripts;
        }
        if let Some(teardown_scripts) = patch.teardown_scripts {
            self.teardown_scripts = teardown_scripts;
        }
        self.updated = Some(Utc::now());
    }
}

/// Fields accepted when creating an environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentOptions {
    pub port: Option<u16>,
    pub reset: bool,
    pub clone_accounts: Vec<String>,
    pub accounts_dir: Option<PathBuf>,
    pub description: Option<String>,
    pub custom_flags: Vec<String>,
    pub programs: Vec<ProgramSpec>,
    pub setup_scripts: Vec<String>,
    pub teardown_scripts: Vec<String>,
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentPatch {
    pub port: Option<u16>,
    pub reset: Option<bool>,
    pub clone_accounts: Option<Vec<String>>,
    /// `Some(None)` (JSON `null`) clears the stored directory
    #[serde(deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub accounts_dir: Option<Option<PathBuf>>,
    pub description: Option<String>,
    pub custom_flags: Option<Vec<String>>,
    pub programs: Option<Vec<ProgramSpec>>,
    pub setup_scripts: Option<Vec<String>>,
    pub teardown_scripts: Option<Vec<String>>,
}

/// Tells an explicit `null` apart from a missing field
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloneOptions {
    /// Defaults to the source port + 100
    pub port: Option<u16>,
    pub description: Option<String>,
}

/// An environment annotated with whether it is the one running now
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSummary {
    #[serde(flatten)]
    pub environment: Environment,
    pub running: bool,
}

/// Export envelope; the metadata is dropped again on import
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExportedEnvironment {
    #[serde(flatten)]
    pub environment: Environment,
    pub export_version: String,
    pub exported_at: DateTime<Utc>,
}
