use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::types::*;
use crate::core::context::Context;
use crate::core::supervisor::ProcessRecordStore;
use crate::error::{Result, ValmonError};

/// Names that resolve to a synthesized record when no file exists
pub const RESERVED_NAMES: [&str; 2] = ["development", "default"];

/// Environment used when no current pointer is set
pub const DEFAULT_ENVIRONMENT: &str = "development";

const EXPORT_VERSION: &str = "1.0";

/// Offset applied to the source port when cloning without an explicit port
const CLONE_PORT_OFFSET: u16 = 100;

const MAX_NAME_LEN: usize = 64;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").expect("valid name pattern"));

/// Validate an environment name; names map directly to file names
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(ValmonError::invalid_input(format!(
            "Invalid environment name '{}': use letters, digits, '-', '_' or '.' (max 64 chars)",
            name
        )))
    }
}

/// File-backed registry of named environments, one JSON file each
#[derive(Debug, Clone)]
pub struct EnvironmentRegistry {
    dir: PathBuf,
    current_file: PathBuf,
    records: ProcessRecordStore,
    default_port: u16,
}

impl EnvironmentRegistry {
    pub fn new(ctx: &Context) -> Self {
        Self {
            dir: ctx.paths.environments_dir.clone(),
            current_file: ctx.paths.current_file.clone(),
            records: ProcessRecordStore::new(&ctx.paths.process_file),
            default_port: ctx.config.validator.rpc_port,
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| ValmonError::io_at(&self.dir, e))
    }

    fn read_file(path: &Path) -> Result<Environment> {
        let data = fs::read_to_string(path).map_err(|e| ValmonError::io_at(path, e))?;
        serde_json::from_str(&data)
            .map_err(|e| ValmonError::parse(format!("Malformed environment {}: {}", path.display(), e)))
    }

    /// Write a brand new file; fails if one already exists
    fn write_new(&self, env: &Environment) -> Result<()> {
        self.ensure_dir()?;
        let path = self.path_for(&env.name);
        let data = serde_json::to_string_pretty(env)?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ValmonError::already_exists(format!(
                    "Environment '{}' already exists",
                    env.name
                )))
            }
            Err(e) => return Err(ValmonError::io_at(&path, e)),
        };

        file.write_all(data.as_bytes())
            .map_err(|e| ValmonError::io_at(&path, e))
    }

    fn overwrite(&self, env: &Environment) -> Result<()> {
        let path = self.path_for(&env.name);
        let data = serde_json::to_string_pretty(env)?;
        fs::write(&path, data).map_err(|e| ValmonError::io_at(&path, e))
    }

    fn running_environment(&self) -> Option<String> {
        self.records.load_live().map(|record| record.environment)
    }

    pub fn create(&self, name: &str, opts: EnvironmentOptions) -> Result<Environment> {
        validate_name(name)?;

        let env = Environment::create(name, opts, self.default_port);
        self.write_new(&env)?;

        log::info!("Created environment '{}' on port {}", env.name, env.port);
        Ok(env)
    }

    /// All stored environments, sorted by name
    pub fn list(&self) -> Result<Vec<EnvironmentSummary>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ValmonError::io_at(&self.dir, e)),
        };

        let running = self.running_environment();
        let mut environments = Vec::new();

        for entry in entries.flatten() {
            let path = entry.path();
            let is_env_file = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_env_file {
                continue;
            }

            match Self::read_file(&path) {
                Ok(environment) => {
                    let is_running = running.as_deref() == Some(environment.name.as_str());
                    environments.push(EnvironmentSummary {
                        environment,
                        running: is_running,
                    });
                }
                Err(e) => log::warn!("Skipping environment file: {}", e),
            }
        }

        environments.sort_by(|a, b| a.environment.name.cmp(&b.environment.name));
        Ok(environments)
    }

    /// `None` when absent, except for the reserved names
    pub fn get(&self, name: &str) -> Result<Option<Environment>> {
        validate_name(name)?;

        let path = self.path_for(name);
        if path.exists() {
            return Self::read_file(&path).map(Some);
        }

        if RESERVED_NAMES.contains(&name) {
            return Ok(Some(Environment::synthesized(name, self.default_port)));
        }

        Ok(None)
    }

    /// Like `get`, but absence is an error
    pub fn require(&self, name: &str) -> Result<Environment> {
        self.get(name)?
            .ok_or_else(|| ValmonError::not_found(format!("Environment '{}' not found", name)))
    }

    pub fn update(&self, name: &str, patch: EnvironmentPatch) -> Result<Environment> {
        validate_name(name)?;

        let path = self.path_for(name);
        if !path.exists() {
            return Err(ValmonError::not_found(format!(
                "Environment '{}' not found",
                name
            )));
        }

        let mut env = Self::read_file(&path)?;
        env.apply(patch);
        self.overwrite(&env)?;

        log::info!("Updated environment '{}'", name);
        Ok(env)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;

        let path = self.path_for(name);
        if !path.exists() {
            return Err(ValmonError::not_found(format!(
                "Environment '{}' not found",
                name
            )));
        }

        if self.running_environment().as_deref() == Some(name) {
            return Err(ValmonError::conflict(format!(
                "Environment '{}' is running; stop the validator first",
                name
            )));
        }

        fs::remove_file(&path).map_err(|e| ValmonError::io_at(&path, e))?;

        if self.get_current() == name {
            let _ = fs::remove_file(&self.current_file);
        }

        log::info!("Deleted environment '{}'", name);
        Ok(())
    }

    pub fn switch_current(&self, name: &str) -> Result<()> {
        self.require(name)?;
        self.ensure_dir()?;

        fs::write(&self.current_file, name)
            .map_err(|e| ValmonError::io_at(&self.current_file, e))?;

        log::info!("Switched current environment to '{}'", name);
        Ok(())
    }

    /// Name from the pointer file, `development` when missing or unreadable
    pub fn get_current(&self) -> String {
        fs::read_to_string(&self.current_file)
            .ok()
            .map(|data| data.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
    }

    pub fn clone_environment(
        &self,
        source: &str,
        target: &str,
        opts: CloneOptions,
    ) -> Result<Environment> {
        validate_name(target)?;

        let source_env = self.require(source)?;
        if self.path_for(target).exists() {
            return Err(ValmonError::already_exists(format!(
                "Environment '{}' already exists",
                target
            )));
        }

        let port = match opts.port {
            Some(port) => port,
            None => source_env.port.checked_add(CLONE_PORT_OFFSET).ok_or_else(|| {
                ValmonError::invalid_input(format!(
                    "Port {} + {} is out of range; pass an explicit port",
                    source_env.port, CLONE_PORT_OFFSET
                ))
            })?,
        };

        let env = Environment {
            name: target.to_string(),
            port,
            description: opts.description.unwrap_or(source_env.description),
            created: Utc::now(),
            updated: None,
            ..source_env
        };
        self.write_new(&env)?;

        log::info!("Cloned environment '{}' into '{}'", source, target);
        Ok(env)
    }

    /// JSON text with export metadata attached
    pub fn export(&self, name: &str) -> Result<String> {
        let environment = self.require(name)?;
        let exported = ExportedEnvironment {
            environment,
            export_version: EXPORT_VERSION.to_string(),
            exported_at: Utc::now(),
        };

        Ok(serde_json::to_string_pretty(&exported)?)
    }

    /// Import exported text. The stored name is used unless `name` is given;
    /// a record without any name gets `imported-<timestamp>`.
    pub fn import(&self, text: &str, name: Option<&str>) -> Result<Environment> {
        let mut value: Value = serde_json::from_str(text)
            .map_err(|e| ValmonError::parse(format!("Import is not valid JSON: {}", e)))?;

        let object = value
            .as_object_mut()
            .ok_or_else(|| ValmonError::parse("Import must be a JSON object"))?;

        object.remove("exportVersion");
        object.remove("exportedAt");
        object.remove("updated");
        object.remove("running");

        let name = match name {
            Some(name) => name.to_string(),
            None => self.fresh_import_name(object.get("name").and_then(Value::as_str)),
        };
        validate_name(&name)?;

        object.insert("name".to_string(), Value::String(name));
        object.insert("created".to_string(), serde_json::to_value(Utc::now())?);
        if !object.contains_key("port") {
            object.insert("port".to_string(), Value::from(self.default_port));
        }

        let env: Environment = serde_json::from_value(value)
            .map_err(|e| ValmonError::parse(format!("Invalid environment in import: {}", e)))?;
        self.write_new(&env)?;

        log::info!("Imported environment '{}'", env.name);
        Ok(env)
    }

    /// The exported name when it is free, otherwise `<name>-imported`,
    /// `<name>-imported-2`, ...
    fn fresh_import_name(&self, exported: Option<&str>) -> String {
        let base = match exported.filter(|name| validate_name(name).is_ok()) {
            Some(name) => name.to_string(),
            None => format!("imported-{}", Utc::now().format("%Y%m%d%H%M%S")),
        };
        if !self.path_for(&base).exists() {
            return base;
        }

        let mut attempt = 1u32;
        loop {
            let suffix = match attempt {
                1 => "-imported".to_string(),
                n => format!("-imported-{}", n),
            };
            let keep = MAX_NAME_LEN.saturating_sub(suffix.len());
            let candidate = format!("{}{}", &base[..base.len().min(keep)], suffix);
            if !self.path_for(&candidate).exists() {
                return candidate;
            }
            attempt += 1;
        }
    }
}
