//! Connection layer for remote host communication.
//!
//! Two transports are provided: [`local`] for `hosts: localhost` and the
//! default [`russh`]-backed SSH transport used for everything else. Both
//! implement the narrow three-capability contract in [`crate::traits`]
//! rather than a single fat connection interface.

pub mod config;
pub mod local;

#[cfg(feature = "russh")]
pub mod russh;

pub use config::{ConnectionConfig, ConnectionDefaults, HostConfig, RetryConfig, SshConfigParser};
#[cfg(feature = "russh")]
pub use russh::RusshConnection;
