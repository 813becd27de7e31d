//! Adapter around the external command-line client.
//!
//! Every invocation of the client and every parse of its output lives here,
//! behind the [`ChainClient`] trait, so the rest of the crate never sees raw
//! client text.

use futures_util::future::{BoxFuture, FutureExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{Result, ValmonError};

/// Epoch progress as reported by the client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochInfo {
    pub epoch: u64,
    pub slot_index: u64,
    pub slots_in_epoch: u64,
    pub absolute_slot: u64,
    pub block_height: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_count: Option<u64>,
}

/// Queries against a running validator's RPC endpoint
pub trait ChainClient: Send + Sync {
    /// Succeeds once the node answers; used as the readiness probe
    fn version<'a>(&'a self, rpc_url: &'a str) -> BoxFuture<'a, Result<String>>;

    fn block_height<'a>(&'a self, rpc_url: &'a str) -> BoxFuture<'a, Result<u64>>;

    fn slot<'a>(&'a self, rpc_url: &'a str) -> BoxFuture<'a, Result<u64>>;

    fn epoch_info<'a>(&'a self, rpc_url: &'a str) -> BoxFuture<'a, Result<EpochInfo>>;
}

/// Shells out to the client executable (`solana` by default)
#[derive(Debug, Clone)]
pub struct CliChainClient {
    binary: String,
    timeout: Duration,
}

impl CliChainClient {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Run `<binary> <args..> --url <rpc_url>` and return stdout.
    ///
    /// The child is killed if it outlives the timeout.
    async fn run(&self, args: &[&str], rpc_url: &str) -> Result<String> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .arg("--url")
            .arg(rpc_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                ValmonError::timeout(format!(
                    "'{} {}' did not answer within {}s",
                    self.binary,
                    args.join(" "),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ValmonError::client(format!("Failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ValmonError::client(format!(
                "'{} {}' exited with {}: {}",
                self.binary,
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ChainClient for CliChainClient {
    fn version<'a>(&'a self, rpc_url: &'a str) -> BoxFuture<'a, Result<String>> {
        async move {
            let out = self.run(&["cluster-version"], rpc_url).await?;
            parse_version(&out)
                .ok_or_else(|| ValmonError::parse(format!("Unexpected version output: {}", out.trim())))
        }
        .boxed()
    }

    fn block_height<'a>(&'a self, rpc_url: &'a str) -> BoxFuture<'a, Result<u64>> {
        async move {
            let out = self.run(&["block-height"], rpc_url).await?;
            parse_number(&out)
        }
        .boxed()
    }

    fn slot<'a>(&'a self, rpc_url: &'a str) -> BoxFuture<'a, Result<u64>> {
        async move {
            let out = self.run(&["slot"], rpc_url).await?;
            parse_number(&out)
        }
        .boxed()
    }

    fn epoch_info<'a>(&'a self, rpc_url: &'a str) -> BoxFuture<'a, Result<EpochInfo>> {
        async move {
            let out = self
                .run(&["epoch-info", "--output", "json"], rpc_url)
                .await?;
            parse_epoch_info(&out)
        }
        .boxed()
    }
}

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+\.\d+\.\d+)").expect("valid version pattern"));

static NUMBER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)").expect("valid number pattern"));

static EPOCH_LINE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(Block height|Slot|Epoch|Transaction Count):\s*(\d+)")
        .expect("valid epoch line pattern")
});

static EPOCH_PROGRESS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Epoch Completed Slots:\s*(\d+)/(\d+)").expect("valid epoch progress pattern")
});

pub fn parse_version(output: &str) -> Option<String> {
    VERSION_PATTERN
        .captures(output)
        .map(|caps| caps[1].to_string())
}

/// First integer in the output (`12345` or `Slot: 12345`)
pub fn parse_number(output: &str) -> Result<u64> {
    NUMBER_PATTERN
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| ValmonError::parse(format!("Expected a number, got: {}", output.trim())))
}

/// Epoch info from JSON output, falling back to the human-readable layout
pub fn parse_epoch_info(output: &str) -> Result<EpochInfo> {
    if let Ok(info) = serde_json::from_str::<EpochInfo>(output.trim()) {
        return Ok(info);
    }

    let mut info = EpochInfo::default();
    let mut matched = false;

    for caps in EPOCH_LINE_PATTERN.captures_iter(output) {
        let value: u64 = caps[2].parse().unwrap_or(0);
        matched = true;
        match &caps[1] {
            "Block height" => info.block_height = value,
            "Slot" => info.absolute_slot = value,
            "Epoch" => info.epoch = value,
            "Transaction Count" => info.transaction_count = Some(value),
            _ => {}
        }
    }

    if let Some(caps) = EPOCH_PROGRESS_PATTERN.captures(output) {
        info.slot_index = caps[1].parse().unwrap_or(0);
        info.slots_in_epoch = caps[2].parse().unwrap_or(0);
    }

    if matched {
        Ok(info)
    } else {
        Err(ValmonError::parse(format!(
            "Unrecognised epoch-info output: {}",
            output.trim()
        )))
    }
}
