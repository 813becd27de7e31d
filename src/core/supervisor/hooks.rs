//! Shell hooks run around start/stop. Failures are logged, never propagated.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// Variables exported to every hook
pub(crate) fn hook_env(environment: &str, rpc_url: &str) -> Vec<(&'static str, String)> {
    vec![
        ("VALMON_ENVIRONMENT", environment.to_string()),
        ("VALMON_RPC_URL", rpc_url.to_string()),
    ]
}

fn shell(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }

    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Run each command in order; returns how many succeeded
pub(crate) async fn run_hooks(stage: &str, commands: &[String], env: &[(&'static str, String)]) -> usize {
    let mut succeeded = 0;

    for command in commands {
        log::info!("Running {} hook: {}", stage, command);

        let mut cmd = shell(command);
        cmd.envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(HOOK_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => succeeded += 1,
            Ok(Ok(output)) => log::warn!(
                "{} hook '{}' failed with {}: {}",
                stage,
                command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Ok(Err(e)) => log::warn!("{} hook '{}' could not run: {}", stage, command, e),
            Err(_) => log::warn!(
                "{} hook '{}' timed out after {}s",
                stage,
                command,
                HOOK_TIMEOUT.as_secs()
            ),
        }
    }

    succeeded
}
