//! Local connection: executes commands directly on the control node, with
//! no network transport. Used for `hosts: localhost` and for the
//! controller-side half of the agent bootstrap handshake when the play
//! targets the control node itself.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{Error, Result};
use crate::traits::{
    BecomeArgs, CommandExecutor, CommandResult, Connection, FileSender,
    InteractiveCommandExecutor, InteractivePipes, ShellDescriptor,
};

/// A connection that runs commands as local subprocesses.
#[derive(Debug, Clone)]
pub struct LocalConnection {
    identifier: String,
    shell: ShellDescriptor,
}

impl LocalConnection {
    /// Creates a local connection identified by the machine's hostname.
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            identifier,
            shell: ShellDescriptor::default(),
        }
    }

    fn wrap_become(&self, cmd: &str, become_args: &BecomeArgs) -> String {
        match (become_args.method.as_deref(), become_args.user.as_deref()) {
            (Some("sudo") | None, Some(user)) if become_args.is_enabled() => {
                format!("sudo -u {user} -- {} -c {cmd:?}", self.shell.executable)
            }
            (Some("su"), Some(user)) => {
                format!("su - {user} -c {cmd:?}")
            }
            _ => cmd.to_string(),
        }
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

struct LocalPipes {
    child: Child,
}

#[async_trait]
impl InteractivePipes for LocalPipes {
    async fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        if let Some(stdin) = self.child.stdin.as_mut() {
            stdin
                .write_all(data)
                .await
                .map_err(|e| Error::connection_failed("local", e.to_string()))?;
        }
        Ok(())
    }

    async fn read_stderr_chunk(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len.min(64 * 1024)];
        if let Some(stderr) = self.child.stderr.as_mut() {
            let n = stderr
                .read(&mut buf)
                .await
                .map_err(|e| Error::connection_failed("local", e.to_string()))?;
            buf.truncate(n);
        } else {
            buf.clear();
        }
        Ok(buf)
    }

    async fn drain_stdout(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(stdout) = self.child.stdout.as_mut() {
            stdout
                .read_to_end(&mut out)
                .await
                .map_err(|e| Error::connection_failed("local", e.to_string()))?;
        }
        Ok(out)
    }

    async fn read_stdout_chunk(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len.min(64 * 1024)];
        if let Some(stdout) = self.child.stdout.as_mut() {
            let n = stdout
                .read(&mut buf)
                .await
                .map_err(|e| Error::connection_failed("local", e.to_string()))?;
            buf.truncate(n);
        } else {
            buf.clear();
        }
        Ok(buf)
    }

    async fn close(mut self: Box<Self>) -> Result<CommandResult> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| Error::connection_failed("local", e.to_string()))?;
        Ok(CommandResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: status.code(),
        })
    }
}

#[async_trait]
impl InteractiveCommandExecutor for LocalConnection {
    async fn exec_interactive(
        &self,
        cmd: &str,
        become_args: &BecomeArgs,
    ) -> Result<Box<dyn InteractivePipes>> {
        let wrapped = self.wrap_become(cmd, become_args);
        debug!(command = %wrapped, "spawning local command");

        let child = Command::new(&self.shell.executable)
            .arg("-c")
            .arg(&wrapped)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::connection_failed("local", e.to_string()))?;

        Ok(Box::new(LocalPipes { child }))
    }
}

#[async_trait]
impl CommandExecutor for LocalConnection {
    async fn exec_command(
        &self,
        cmd: &str,
        stdin_bytes: Option<&[u8]>,
        _sudoable: bool,
        become_args: &BecomeArgs,
    ) -> Result<CommandResult> {
        crate::traits::default_exec_command(self, cmd, stdin_bytes, become_args).await
    }
}

#[async_trait]
impl FileSender for LocalConnection {
    async fn send_file(
        &self,
        reader: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
        remote_path: &str,
        mode: u32,
    ) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .await
            .map_err(|e| Error::FileTransfer {
                host: self.identifier.clone(),
                message: e.to_string(),
            })?;
        tokio::fs::write(remote_path, &content)
            .await
            .map_err(|e| Error::FileTransfer {
                host: self.identifier.clone(),
                message: e.to_string(),
            })?;
        tokio::fs::set_permissions(remote_path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| Error::FileTransfer {
                host: self.identifier.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

impl Connection for LocalConnection {
    fn shell(&self) -> &ShellDescriptor {
        &self.shell
    }

    fn target(&self) -> &str {
        &self.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_simple_command() {
        let conn = LocalConnection::new();
        let result = conn
            .exec_command("echo hi", None, false, &BecomeArgs::default())
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_errored() {
        let conn = LocalConnection::new();
        let result = conn
            .exec_command("exit 3", None, false, &BecomeArgs::default())
            .await
            .unwrap();
        assert_eq!(result.exit_code, Some(3));
    }
}
