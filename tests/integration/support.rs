// Shared fixtures: a scriptable chain client and isolated state roots

use futures_util::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use valmon::core::chain_client::{ChainClient, EpochInfo};
use valmon::core::config::GlobalConfig;
use valmon::core::context::{Context, Paths};
use valmon::error::{Result, ValmonError};

/// Chain client whose readiness is toggled by the test; each slot query
/// advances by `slot_step`
pub struct FakeClient {
    ready: AtomicBool,
    slot: AtomicU64,
    slot_step: u64,
}

impl FakeClient {
    pub fn ready() -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(true),
            slot: AtomicU64::new(0),
            slot_step: 2,
        })
    }

    pub fn never_ready() -> Arc<Self> {
        let client = Self::ready();
        client.ready.store(false, Ordering::SeqCst);
        client
    }

    fn check(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ValmonError::client("connection refused"))
        }
    }
}

impl ChainClient for FakeClient {
    fn version<'a>(&'a self, _rpc_url: &'a str) -> BoxFuture<'a, Result<String>> {
        async move {
            self.check()?;
            Ok("1.18.26".to_string())
        }
        .boxed()
    }

    fn block_height<'a>(&'a self, _rpc_url: &'a str) -> BoxFuture<'a, Result<u64>> {
        async move {
            self.check()?;
            Ok(self.slot.load(Ordering::SeqCst))
        }
        .boxed()
    }

    fn slot<'a>(&'a self, _rpc_url: &'a str) -> BoxFuture<'a, Result<u64>> {
        async move {
            self.check()?;
            Ok(self.slot.fetch_add(self.slot_step, Ordering::SeqCst) + self.slot_step)
        }
        .boxed()
    }

    fn epoch_info<'a>(&'a self, _rpc_url: &'a str) -> BoxFuture<'a, Result<EpochInfo>> {
        async move {
            self.check()?;
            Ok(EpochInfo {
                slots_in_epoch: 432_000,
                ..Default::default()
            })
        }
        .boxed()
    }
}

pub fn context_with(temp_dir: &TempDir, config: GlobalConfig) -> Arc<Context> {
    Arc::new(Context::with_config(Paths::new(temp_dir.path()), config))
}

pub fn context(temp_dir: &TempDir) -> Arc<Context> {
    context_with(temp_dir, GlobalConfig::default())
}

/// Write an executable shell script standing in for the validator binary
#[cfg(unix)]
pub fn fake_validator(temp_dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = temp_dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
