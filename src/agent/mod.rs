//! Remote agent bootstrap and per-host RPC session management (C7, C8).
//!
//! The companion agent's internal structure is out of scope — only its
//! on-the-wire contract is specified (§4.4, §6 "Agent RPC"). This module
//! covers the controller side: computing the content-addressed remote path
//! for the agent binary, probing and uploading it, launching it
//! interactively (optionally under become), dialing an RPC client over its
//! stdio pipes, and caching one such session per (host, become-identity)
//! pair for the lifetime of a play.

pub mod bootstrap;
pub mod rpc;
pub mod session;

pub use bootstrap::bootstrap;
pub use rpc::{Hello, MetaArgs, RpcClient};
pub use session::{Session, SessionManager};
