//! Thin wrapper around shelling out to `ip`/`iptables` (spec §6.1a: no pack
//! example vendors a netlink-rule crate specific enough for the
//! fwmark+table semantics this needs, so rules are applied the way the
//! original implementation does — by invoking the command-line tools).

use tokio::process::Command;

use crate::error::TunnelError;

/// Runs `program args...`, returning stdout on success.
pub async fn run(program: &str, args: &[&str]) -> Result<String, TunnelError> {
    let command_line = format!("{program} {}", args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| TunnelError::Spawn { command: command_line.clone(), source })?;

    if !output.status.success() {
        return Err(TunnelError::CommandFailed {
            command: command_line,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Like [`run`], but a non-zero exit is logged and swallowed rather than
/// propagated. Used for teardown commands: by the time `down()`/`delete()`
/// runs, the rule being removed may already be gone (e.g. a previous
/// teardown was interrupted), and that must not abort the rest of the
/// teardown sequence.
pub async fn run_best_effort(program: &str, args: &[&str]) {
    if let Err(error) = run(program, args).await {
        tracing::warn!(%error, "teardown command failed, continuing");
    }
}
