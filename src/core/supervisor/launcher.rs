//! Spawning the validator and teeing its output into the log file.

use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{watch, Mutex};

use super::log_rotation::{rotate_log_if_needed, LogRotationConfig};
use crate::core::context::Context;
use crate::core::environment::Environment;
use crate::error::{Result, ValmonError};

/// How long to keep draining output after the process has exited
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How the validator process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// `None` when terminated by a signal
    pub code: Option<i32>,
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

pub(crate) struct SpawnedValidator {
    pub pid: u32,
    pub exit_rx: watch::Receiver<Option<ExitInfo>>,
}

type LogSink = Arc<Mutex<File>>;

fn log_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Command-line arguments for the validator, from global config plus the
/// environment
pub fn build_args(ctx: &Context, env: &Environment, reset: bool) -> Vec<String> {
    let validator = &ctx.config.validator;
    let mut args = vec![
        "--ledger".to_string(),
        ctx.paths.ledger_dir.to_string_lossy().into_owned(),
        "--rpc-port".to_string(),
        env.port.to_string(),
        "--bind-address".to_string(),
        validator.bind_address.clone(),
        "--limit-ledger-size".to_string(),
        validator.limit_ledger_size.to_string(),
    ];

    if !env.clone_accounts.is_empty() {
        args.push("--url".to_string());
        args.push(validator.clone_url.clone());
        for account in &env.clone_accounts {
            args.push("--clone".to_string());
            args.push(account.clone());
        }
    }

    if let Some(accounts_dir) = &env.accounts_dir {
        args.push("--account-dir".to_string());
        args.push(accounts_dir.to_string_lossy().into_owned());
    }

    for program in &env.programs {
        args.push("--bpf-program".to_string());
        args.push(program.address.clone());
        args.push(program.path.to_string_lossy().into_owned());
    }

    args.extend(env.custom_flags.iter().cloned());

    if reset {
        args.push("--reset".to_string());
    }

    args
}

/// Spawn the validator with piped stdio; both streams are copied,
/// timestamp-prefixed, into `log_path`. The exit code is written to the log
/// and published on the returned watch channel.
pub(crate) async fn spawn_validator(
    binary: &Path,
    args: &[String],
    log_path: &Path,
    rotation: &LogRotationConfig,
) -> Result<SpawnedValidator> {
    if let Some(parent) = log_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ValmonError::io_at(parent, e))?;
    }

    rotate_log_if_needed(log_path, rotation)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
        .map_err(|e| ValmonError::io_at(log_path, e))?;
    let sink: LogSink = Arc::new(Mutex::new(file));

    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            ValmonError::startup(format!("Failed to spawn {}: {}", binary.display(), e))
        })?;

    let pid = child
        .id()
        .ok_or_else(|| ValmonError::startup("Validator exited before it could be tracked"))?;

    {
        let header = format!(
            "[{}] [valmon] started {} (pid {}) {}\n",
            log_timestamp(),
            binary.display(),
            pid,
            args.join(" ")
        );
        let mut file = sink.lock().await;
        file.write_all(header.as_bytes())
            .await
            .map_err(|e| ValmonError::io_at(log_path, e))?;
    }

    let mut tee_tasks = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        tee_tasks.push(tokio::spawn(tee_lines(stdout, "stdout", sink.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        tee_tasks.push(tokio::spawn(tee_lines(stderr, "stderr", sink.clone())));
    }

    let (exit_tx, exit_rx) = watch::channel(None);

    tokio::spawn(async move {
        let status = child.wait().await;

        for task in tee_tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(DRAIN_GRACE, task).await.is_err() {
                abort.abort();
            }
        }

        let exit = ExitInfo {
            code: status.as_ref().ok().and_then(|s| s.code()),
        };
        if let Err(e) = &status {
            log::warn!("Failed to wait for validator pid {}: {}", pid, e);
        }

        let footer = format!("[{}] [valmon] pid {} ended: {}\n", log_timestamp(), pid, exit);
        {
            let mut file = sink.lock().await;
            let _ = file.write_all(footer.as_bytes()).await;
            let _ = file.flush().await;
        }
        drop(sink);

        log::info!("Validator pid {} ended: {}", pid, exit);
        let _ = exit_tx.send(Some(exit));
    });

    Ok(SpawnedValidator { pid, exit_rx })
}

/// Copy lines from one output stream into the log until EOF. Non-UTF-8
/// output is written lossily so the pipe keeps draining.
async fn tee_lines<R>(reader: R, stream: &'static str, sink: LogSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let entry = format!(
                    "[{}] [{}] {}\n",
                    log_timestamp(),
                    stream,
                    line.trim_end_matches(['\r', '\n'])
                );

                let mut file = sink.lock().await;
                if let Err(e) = file.write_all(entry.as_bytes()).await {
                    log::warn!("Failed to write validator {} to log: {}", stream, e);
                }
            }
            Err(e) => {
                log::debug!("Validator {} closed: {}", stream, e);
                break;
            }
        }
    }
}
