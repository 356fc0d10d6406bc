//! SSH connection backed by `russh`, a pure-Rust async SSH implementation.
//!
//! Authentication is tried in order: SSH agent, configured/default identity
//! files, then password. Host keys are checked against `~/.ssh/known_hosts`
//! on a best-effort basis (unknown hosts are accepted, matching
//! `StrictHostKeyChecking=accept-new`); a mismatch against a *known* entry
//! is rejected.

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::keys::key::PublicKey;
use russh::keys::load_secret_key;
use russh::ChannelMsg;
use russh_sftp::client::SftpSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use super::config::{default_identity_files, expand_path, ConnectionConfig, HostConfig};
use crate::error::{Error, Result};
use crate::traits::{
    BecomeArgs, CommandExecutor, CommandResult, Connection, FileSender,
    InteractiveCommandExecutor, InteractivePipes, ShellDescriptor,
};

struct KnownHostEntry {
    patterns: Vec<String>,
    key: PublicKey,
}

enum HostKeyStatus {
    Verified,
    Unknown,
    Mismatch,
}

struct ClientHandler {
    host: String,
    port: u16,
    accept_unknown: bool,
    known_hosts: Vec<KnownHostEntry>,
}

impl ClientHandler {
    fn new(host: &str, port: u16, accept_unknown: bool) -> Self {
        Self {
            host: host.to_string(),
            port,
            accept_unknown,
            known_hosts: Self::load_known_hosts(),
        }
    }

    fn load_known_hosts() -> Vec<KnownHostEntry> {
        let Some(path) = dirs::home_dir().map(|h| h.join(".ssh").join("known_hosts")) else {
            return Vec::new();
        };
        if !path.exists() {
            return Vec::new();
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(Self::parse_known_hosts_line)
            .collect()
    }

    fn parse_known_hosts_line(line: &str) -> Option<KnownHostEntry> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            return None;
        }
        let patterns = parts[0].split(',').map(str::to_string).collect();
        let key_bytes =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, parts[2]).ok()?;
        let key = russh::keys::key::parse_public_key(&key_bytes, None).ok()?;
        Some(KnownHostEntry { patterns, key })
    }

    fn pattern_matches(pattern: &str, host: &str, port: u16) -> bool {
        if pattern.starts_with('[') {
            if let Some(end) = pattern.find(']') {
                let pattern_host = &pattern[1..end];
                let pattern_port = pattern
                    .get(end + 2..)
                    .and_then(|p| p.parse::<u16>().ok())
                    .unwrap_or(22);
                return pattern_host == host && pattern_port == port;
            }
        }
        port == 22 && pattern == host
    }

    fn verify_host_key(&self, server_key: &PublicKey) -> HostKeyStatus {
        for entry in &self.known_hosts {
            if entry
                .patterns
                .iter()
                .any(|p| Self::pattern_matches(p, &self.host, self.port))
            {
                return if entry.key.fingerprint() == server_key.fingerprint() {
                    HostKeyStatus::Verified
                } else {
                    HostKeyStatus::Mismatch
                };
            }
        }
        HostKeyStatus::Unknown
    }
}

#[derive(Debug)]
struct HandlerError(String);

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for HandlerError {}
impl From<russh::Error> for HandlerError {
    fn from(e: russh::Error) -> Self {
        Self(e.to_string())
    }
}

impl Handler for ClientHandler {
    type Error = HandlerError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.verify_host_key(server_public_key) {
            HostKeyStatus::Verified => Ok(true),
            HostKeyStatus::Unknown => {
                if self.accept_unknown {
                    warn!(host = %self.host, "host key not in known_hosts, accepting (first connection)");
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            HostKeyStatus::Mismatch => {
                warn!(host = %self.host, "HOST KEY MISMATCH against known_hosts");
                Ok(false)
            }
        }
    }
}

/// An SSH connection to a single remote host.
#[derive(Clone)]
pub struct RusshConnection {
    identifier: String,
    handle: Arc<RwLock<Option<Handle<ClientHandler>>>>,
    shell: ShellDescriptor,
}

impl std::fmt::Debug for RusshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshConnection")
            .field("identifier", &self.identifier)
            .finish()
    }
}

impl RusshConnection {
    /// Opens an SSH connection to `host:port` as `user`, merging `host_config`
    /// (falling back to `global_config`'s per-host lookup when absent).
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        host_config: Option<HostConfig>,
        global_config: &ConnectionConfig,
    ) -> Result<Self> {
        let host_config = host_config.unwrap_or_else(|| global_config.get_host_merged(host));
        let actual_host = host_config.hostname.clone().unwrap_or_else(|| host.to_string());
        let actual_port = host_config.port.unwrap_or(port);
        let actual_user = host_config.user.clone().unwrap_or_else(|| user.to_string());
        let timeout = host_config.timeout_duration();

        debug!(host = %actual_host, port = %actual_port, user = %actual_user, "connecting via SSH (russh)");

        let config = Arc::new(russh::client::Config {
            inactivity_timeout: Some(timeout),
            ..Default::default()
        });

        let addr = format!("{actual_host}:{actual_port}");
        let socket = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::connection_timeout(host, timeout.as_secs()))?
            .map_err(|e| Error::connection_failed(host, format!("failed to connect to {addr}: {e}")))?;
        socket
            .set_nodelay(true)
            .map_err(|e| Error::connection_failed(host, e.to_string()))?;

        let handler = ClientHandler::new(&actual_host, actual_port, true);
        let mut session = russh::client::connect_stream(config, socket, handler)
            .await
            .map_err(|e| Error::connection_failed(host, format!("SSH handshake failed: {e}")))?;

        Self::authenticate(&mut session, &actual_user, &host_config, global_config).await?;

        Ok(Self {
            identifier: format!("{actual_user}@{actual_host}:{actual_port}"),
            handle: Arc::new(RwLock::new(Some(session))),
            shell: ShellDescriptor::default(),
        })
    }

    async fn authenticate(
        session: &mut Handle<ClientHandler>,
        user: &str,
        host_config: &HostConfig,
        global_config: &ConnectionConfig,
    ) -> Result<()> {
        if global_config.defaults.use_agent
            && Self::try_agent_auth(session, user).await.is_ok()
        {
            debug!("authenticated using SSH agent");
            return Ok(());
        }

        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(identity_file) = &host_config.identity_file {
            candidates.push(expand_path(identity_file));
        }
        candidates.extend(global_config.defaults.identity_files.iter().map(|p| expand_path(p)));
        candidates.extend(default_identity_files());

        for key_path in candidates {
            if Self::try_key_auth(session, user, &key_path, host_config.password.as_deref())
                .await
                .is_ok()
            {
                debug!(key = %key_path.display(), "authenticated using key");
                return Ok(());
            }
        }

        if let Some(password) = &host_config.password {
            let authenticated = session
                .authenticate_password(user, password)
                .await
                .map_err(|e| Error::authentication_failed(user, "ssh", e.to_string()))?;
            if authenticated {
                debug!("authenticated using password");
                return Ok(());
            }
        }

        Err(Error::authentication_failed(user, "ssh", "no authentication method succeeded"))
    }

    async fn try_agent_auth(session: &mut Handle<ClientHandler>, user: &str) -> Result<()> {
        let fail = || Error::authentication_failed(user, "ssh", "agent authentication failed");
        let mut agent = russh_keys::agent::client::AgentClient::connect_env()
            .await
            .map_err(|_| fail())?;
        let identities = agent.request_identities().await.map_err(|_| fail())?;
        for key in identities {
            let (a, result) = session
                .authenticate_future(user, key, agent)
                .await;
            agent = a;
            if result.map_err(|_| fail())? {
                return Ok(());
            }
        }
        Err(fail())
    }

    async fn try_key_auth(
        session: &mut Handle<ClientHandler>,
        user: &str,
        key_path: &Path,
        passphrase: Option<&str>,
    ) -> Result<()> {
        let fail = || Error::authentication_failed(user, "ssh", format!("key auth failed for {}", key_path.display()));
        if !key_path.exists() {
            return Err(fail());
        }
        let key = load_secret_key(key_path, passphrase)
            .map_err(|e| Error::connection_failed("local", format!("failed to load key {}: {e}", key_path.display())))?;
        let authenticated = session
            .authenticate_publickey(user, Arc::new(key))
            .await
            .map_err(|_| fail())?;
        if authenticated {
            Ok(())
        } else {
            Err(fail())
        }
    }

    async fn open_sftp(&self) -> Result<SftpSession> {
        let guard = self.handle.read().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| Error::connection_failed(&self.identifier, "session closed"))?;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| Error::connection_failed(&self.identifier, e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::connection_failed(&self.identifier, e.to_string()))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::connection_failed(&self.identifier, e.to_string()))
    }

    fn wrap_become(&self, cmd: &str, become_args: &BecomeArgs) -> String {
        if !become_args.is_enabled() {
            return cmd.to_string();
        }
        let user = become_args.user.as_deref().unwrap_or("root");
        match become_args.method.as_deref() {
            Some("su") => format!("su - {user} -c {cmd:?}"),
            _ => format!("sudo -u {user} -- {} -c {cmd:?}", self.shell.executable),
        }
    }
}

struct RusshPipes {
    channel: russh::Channel<russh::client::Msg>,
    stdout: Vec<u8>,
    exit_code: Option<i32>,
}

#[async_trait]
impl InteractivePipes for RusshPipes {
    async fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        self.channel
            .data(data)
            .await
            .map_err(|e| Error::connection_failed("ssh", e.to_string()))
    }

    async fn read_stderr_chunk(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while out.len() < max_len {
            match self.channel.wait().await {
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    out.extend_from_slice(&data);
                }
                Some(ChannelMsg::Data { data }) => {
                    self.stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    self.exit_code = Some(exit_status as i32);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }
        Ok(out)
    }

    async fn drain_stdout(&mut self) -> Result<Vec<u8>> {
        while let Some(msg) = self.channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => self.stdout.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => {
                    self.exit_code = Some(exit_status as i32);
                }
                ChannelMsg::Eof | ChannelMsg::Close => break,
                _ => {}
            }
        }
        Ok(std::mem::take(&mut self.stdout))
    }

    async fn close(self: Box<Self>) -> Result<CommandResult> {
        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::new(),
            exit_code: self.exit_code,
        })
    }

    async fn read_stdout_chunk(&mut self, max_len: usize) -> Result<Vec<u8>> {
        if self.stdout.is_empty() {
            while let Some(msg) = self.channel.wait().await {
                match msg {
                    ChannelMsg::Data { data } => {
                        self.stdout.extend_from_slice(&data);
                        break;
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        self.exit_code = Some(exit_status as i32);
                    }
                    ChannelMsg::Eof | ChannelMsg::Close => break,
                    _ => {}
                }
            }
        }
        let take = max_len.min(self.stdout.len());
        Ok(self.stdout.drain(..take).collect())
    }
}

#[async_trait]
impl InteractiveCommandExecutor for RusshConnection {
    async fn exec_interactive(
        &self,
        cmd: &str,
        become_args: &BecomeArgs,
    ) -> Result<Box<dyn InteractivePipes>> {
        let full_command = self.wrap_become(cmd, become_args);
        trace!(command = %full_command, "executing remote command");

        let guard = self.handle.read().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| Error::connection_failed(&self.identifier, "session closed"))?;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| Error::connection_failed(&self.identifier, e.to_string()))?;
        drop(guard);

        channel
            .exec(true, full_command)
            .await
            .map_err(|e| Error::connection_failed(&self.identifier, e.to_string()))?;

        Ok(Box::new(RusshPipes {
            channel,
            stdout: Vec::new(),
            exit_code: None,
        }))
    }
}

#[async_trait]
impl CommandExecutor for RusshConnection {
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
impl FileSender for RusshConnection {
    async fn send_file(
        &self,
        reader: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
        remote_path: &str,
        mode: u32,
    ) -> Result<()> {
        let sftp = self.open_sftp().await?;
        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .await
            .map_err(|e| Error::FileTransfer {
                host: self.identifier.clone(),
                message: e.to_string(),
            })?;

        let mut remote_file = sftp
            .create(remote_path)
            .await
            .map_err(|e| Error::FileTransfer {
                host: self.identifier.clone(),
                message: e.to_string(),
            })?;
        use tokio::io::AsyncWriteExt;
        remote_file
            .write_all(&content)
            .await
            .map_err(|e| Error::FileTransfer {
                host: self.identifier.clone(),
                message: e.to_string(),
            })?;
        sftp.set_metadata(
            remote_path,
            russh_sftp::protocol::FileAttributes {
                permissions: Some(mode),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| Error::FileTransfer {
            host: self.identifier.clone(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

impl Connection for RusshConnection {
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

    #[test]
    fn pattern_matches_plain_hostname_on_default_port() {
        assert!(ClientHandler::pattern_matches("example.com", "example.com", 22));
        assert!(!ClientHandler::pattern_matches("example.com", "example.com", 2222));
    }

    #[test]
    fn pattern_matches_bracketed_host_and_port() {
        assert!(ClientHandler::pattern_matches(
            "[example.com]:2222",
            "example.com",
            2222
        ));
    }
}
