//! Length-delimited RPC transport over a stdio-tunneled connection (C7).
//!
//! The companion agent's internals are out of scope (spec §1); only the
//! on-the-wire contract is: a 4-byte big-endian length prefix followed by a
//! JSON payload, carried over the remote process's stdin/stdout. Exactly two
//! surface calls exist: `hello` establishes the session, `execute_module`
//! dispatches one module invocation and waits for its `Return`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::traits::{InteractivePipes, Return};

/// Maximum frame size accepted from the agent, guarding against a
/// corrupted or malicious length prefix turning into an unbounded
/// allocation.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Response to `Hello()`, confirming the agent runtime is alive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    /// Agent build/version identifier.
    pub agent_version: String,
    /// Agent process id on the remote host, for diagnostics.
    pub pid: u32,
}

/// Extra arguments accompanying a module dispatch, beyond the module's own
/// parameters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetaArgs {
    /// Python interpreter path the agent should use for Python-backed
    /// modules.
    pub python_interpreter: String,
    /// The Python companion runtime archive, attached only on the retry
    /// after a module first reports `needs_python_runtime`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub py_runtime_zip_data: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct Frame<'a> {
    method: &'a str,
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct FrameReply {
    ok: bool,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// A single-writer RPC client bound to one agent session's stdio pipes.
/// Requests are strictly request/response: the caller must not issue a new
/// call before the previous one's reply has been read.
pub struct RpcClient {
    pipes: Box<dyn InteractivePipes>,
    host: String,
}

impl RpcClient {
    /// Wraps the given interactive pipes (already connected to a running
    /// agent process) as an RPC client.
    pub fn new(pipes: Box<dyn InteractivePipes>, host: impl Into<String>) -> Self {
        Self {
            pipes,
            host: host.into(),
        }
    }

    /// Sends `Hello()`, bounded by `dial_timeout`; fails if the agent
    /// runtime never responds or responds with an error.
    pub async fn hello(&mut self, dial_timeout: Duration) -> Result<Hello> {
        tokio::time::timeout(dial_timeout, self.call("hello", serde_json::Value::Null))
            .await
            .map_err(|_| Error::AgentRpc {
                host: self.host.clone(),
                message: format!("agent did not respond to hello within {dial_timeout:?}"),
            })?
    }

    /// Dispatches one module invocation and returns its unified `Return`.
    pub async fn execute_module(
        &mut self,
        module_name: &str,
        vars_json: serde_json::Value,
        meta_args: MetaArgs,
    ) -> Result<Return> {
        let payload = serde_json::json!({
            "module_name": module_name,
            "vars_json": vars_json,
            "meta_args": meta_args,
        });
        self.call("execute_module", payload).await
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &mut self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<T> {
        let frame = Frame { method, payload };
        let body = serde_json::to_vec(&frame)?;
        self.write_frame(&body).await?;
        let reply_bytes = self.read_frame().await?;
        let reply: FrameReply = serde_json::from_slice(&reply_bytes)?;
        if !reply.ok {
            return Err(Error::AgentRpc {
                host: self.host.clone(),
                message: reply
                    .error
                    .unwrap_or_else(|| "agent reported failure with no message".to_string()),
            });
        }
        serde_json::from_value(reply.payload).map_err(Error::from)
    }

    async fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        let len = u32::try_from(body.len()).map_err(|_| Error::AgentRpc {
            host: self.host.clone(),
            message: "request frame too large to encode".to_string(),
        })?;
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(body);
        self.pipes.write_stdin(&out).await
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            return Err(Error::AgentRpc {
                host: self.host.clone(),
                message: format!("agent sent an oversized frame ({len} bytes)"),
            });
        }
        let mut body = vec![0u8; len as usize];
        self.read_exact(&mut body).await?;
        Ok(body)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let chunk = self.pipes.read_stdout_chunk(buf.len() - filled).await?;
            if chunk.is_empty() {
                return Err(Error::AgentRpc {
                    host: self.host.clone(),
                    message: "agent session closed before a full frame was read".to_string(),
                });
            }
            buf[filled..filled + chunk.len()].copy_from_slice(&chunk);
            filled += chunk.len();
        }
        Ok(())
    }

    /// Closes the underlying pipes, returning the agent process's exit
    /// status.
    pub async fn close(self) -> Result<()> {
        self.pipes.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MockPipes {
        #[allow(dead_code)]
        written: Vec<u8>,
        to_read: Mutex<VecDeque<u8>>,
    }

    #[async_trait]
    impl InteractivePipes for MockPipes {
        async fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
            self.written.extend_from_slice(data);
            Ok(())
        }

        async fn read_stderr_chunk(&mut self, _max_len: usize) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn drain_stdout(&mut self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn read_stdout_chunk(&mut self, max_len: usize) -> Result<Vec<u8>> {
            let mut queue = self.to_read.lock().await;
            let take = max_len.min(queue.len());
            Ok((0..take).filter_map(|_| queue.pop_front()).collect())
        }

        async fn close(self: Box<Self>) -> Result<crate::traits::CommandResult> {
            Ok(crate::traits::CommandResult::default())
        }
    }

    fn framed_reply(payload: serde_json::Value) -> Vec<u8> {
        let reply = serde_json::json!({"ok": true, "payload": payload});
        let body = serde_json::to_vec(&reply).unwrap();
        let mut out = Vec::new();
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[tokio::test]
    async fn hello_parses_a_framed_reply() {
        let hello = Hello {
            agent_version: "1.0".to_string(),
            pid: 42,
        };
        let bytes = framed_reply(serde_json::to_value(&hello).unwrap());
        let pipes = MockPipes {
            written: Vec::new(),
            to_read: Mutex::new(bytes.into_iter().collect()),
        };
        let mut client = RpcClient::new(Box::new(pipes), "h1");
        let got = client.hello(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.pid, 42);
    }

    #[tokio::test]
    async fn error_reply_surfaces_as_agent_rpc_error() {
        let reply = serde_json::json!({"ok": false, "error": "boom"});
        let body = serde_json::to_vec(&reply).unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&body);
        let pipes = MockPipes {
            written: Vec::new(),
            to_read: Mutex::new(bytes.into_iter().collect()),
        };
        let mut client = RpcClient::new(Box::new(pipes), "h1");
        let err = client.hello(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::AgentRpc { .. }));
    }
}
