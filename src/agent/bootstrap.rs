//! Agent bootstrap algorithm (C7, §4.4): content-addressed upload of the
//! companion agent binary, followed by an interactive remote launch and an
//! RPC dial over the resulting stdio pipes.
//!
//! Grounded on the original's `remote/handler.go` (`Execute`, `sendToRemote`)
//! and `remote/system_info.go` (`gatherSystemInfo`), reworked against this
//! crate's `Connection` trait instead of gRPC-over-stdio.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::agent::rpc::RpcClient;
use crate::constants::{AGENT_BINARY_NAME, AGENT_BINARY_TMP_NAME, AGENT_CACHE_DIR};
use crate::error::{Error, Result};
use crate::traits::{BecomeArgs, Connection};

/// Bound on how long the RPC dial may take once the agent process has been
/// launched ("a few seconds", per §4.4).
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Information recovered from the remote probe command.
#[derive(Debug, Default)]
struct ProbeResult {
    dir: Option<String>,
    #[allow(dead_code)]
    uname: Option<String>,
    has_runner: bool,
}

/// Parses `Key=Value` probe output, per §6's grammar.
fn parse_probe_output(stdout: &str) -> ProbeResult {
    let mut result = ProbeResult::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "Dir" => result.dir = Some(value.to_string()),
            "Sys" => result.uname = Some(value.to_string()),
            "HasRunner" => result.has_runner = value == "1",
            _ => {}
        }
    }
    result
}

async fn sha256_hex(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| Error::AgentBootstrap {
        host: "local".to_string(),
        message: format!("failed to hash agent binary: {e}"),
    })?
}

/// Runs the probe command and parses its output, creating the remote cache
/// directory as a side effect.
async fn gather_system_info(
    conn: &dyn Connection,
    hash: &str,
) -> Result<ProbeResult> {
    let shell = conn.shell();
    let dir_expr = format!("$HOME/{AGENT_CACHE_DIR}/{hash}");
    let runner_path = format!("{dir_expr}/{AGENT_BINARY_NAME}");
    let cmd = format!(
        "DIR=\"{dir_expr}\"; {echo} \"Dir=$DIR\"; {echo} \"Sys=$(uname -a)\"; ([ -e \"{runner_path}\" ] {sep} {echo} HasRunner=1); mkdir -p \"$DIR\" {sep} chmod 1775 \"$DIR\"",
        dir_expr = dir_expr,
        runner_path = runner_path,
        echo = shell.echo,
        sep = shell.separator,
    );
    debug!(command = %cmd, "gathering remote agent directory info");

    let result = conn
        .exec_command(&cmd, None, false, &BecomeArgs::default())
        .await?;
    let probe = parse_probe_output(&result.stdout);
    if probe.dir.is_none() {
        return Err(Error::AgentBootstrap {
            host: conn.target().to_string(),
            message: "failed to resolve remote agent directory".to_string(),
        });
    }
    Ok(probe)
}

/// Uploads the local agent binary (if not already present) and launches it
/// interactively, returning an RPC client dialed against its stdio pipes.
///
/// `local_binary` is the path to this host's own agent binary on disk; the
/// same binary is distributed to every managed host, content-addressed by
/// its sha256 hash so repeat runs against an unchanged agent never re-upload.
pub async fn bootstrap(
    conn: &dyn Connection,
    local_binary: &Path,
    become_args: &BecomeArgs,
) -> Result<RpcClient> {
    let hash = sha256_hex(local_binary).await?;
    let probe = gather_system_info(conn, &hash).await?;
    let dir = probe.dir.expect("checked above");

    let remote_bin = format!("{dir}/{AGENT_BINARY_NAME}");
    let launch_path = if probe.has_runner {
        debug!(host = %conn.target(), "reusing already-uploaded agent binary");
        remote_bin
    } else {
        let remote_tmp = format!("{dir}/{AGENT_BINARY_TMP_NAME}");
        debug!(host = %conn.target(), path = %remote_tmp, "uploading agent binary");
        let mut file = tokio::fs::File::open(local_binary)
            .await
            .map_err(|e| Error::AgentBootstrap {
                host: conn.target().to_string(),
                message: format!("failed to open local agent binary: {e}"),
            })?;
        conn.send_file(&mut file, &remote_tmp, 0o555).await?;
        remote_bin
    };

    debug!(host = %conn.target(), path = %launch_path, "launching remote agent");
    let pipes = conn.exec_interactive(&launch_path, become_args).await?;
    let mut client = RpcClient::new(pipes, conn.target().to_string());
    client.hello(DIAL_TIMEOUT).await?;
    Ok(client)
}

/// Computes the content-addressed remote cache paths for `local_binary`
/// without contacting a host, for diagnostics and tests.
pub async fn content_address(local_binary: &Path) -> Result<HashMap<&'static str, String>> {
    let hash = sha256_hex(local_binary).await?;
    let mut map = HashMap::new();
    map.insert("hash", hash.clone());
    map.insert("dir", format!("{AGENT_CACHE_DIR}/{hash}"));
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_probe_output() {
        let probe = parse_probe_output("Dir=/home/u/.cache/rustible_agent/abc\nSys=Linux x\nHasRunner=1\n");
        assert_eq!(probe.dir.as_deref(), Some("/home/u/.cache/rustible_agent/abc"));
        assert!(probe.has_runner);
    }

    #[test]
    fn missing_has_runner_line_means_binary_absent() {
        let probe = parse_probe_output("Dir=/home/u/.cache/rustible_agent/abc\nSys=Linux x\n");
        assert!(!probe.has_runner);
    }

    #[tokio::test]
    async fn hashes_a_known_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        write!(file, "hello world").unwrap();
        let hash = sha256_hex(file.path()).await.unwrap();
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
