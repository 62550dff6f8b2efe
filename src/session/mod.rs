//! Interactive device sessions.
//!
//! A [`Shell`] drives a prompt-delimited conversation with a device through
//! a pair of channels, independent of the transport underneath. [`SshSession`]
//! feeds it from an SSH PTY channel and can open extra exec channels on the
//! same connection (used for SCP); [`TelnetConnection`] feeds it from a raw
//! TCP stream with option negotiation refused.
//!
//! # Main Components
//!
//! - [`Shell`] - Command execution with prompt detection and mode switching
//! - [`Output`] - Result of one command
//! - [`SshSession`] - SSH login, PTY shell and exec channels
//! - [`TelnetConnection`] - Telnet transport with `read_until`

pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use shell::{Output, Shell};
use shell::Utf8Decoder;
pub use ssh::{SshSession, SshTarget};
pub use telnet::{TelnetConnection, TelnetFilter};

mod security;
mod shell;
mod ssh;
mod telnet;
