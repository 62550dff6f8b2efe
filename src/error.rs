//! Error types for device sessions, collection adapters and the glue around them.
//!
//! [`ConnectError`] covers the interactive session layer (SSH and Telnet
//! shells, prompt handling, mode switching). [`CollectError`] is the taxonomy
//! every adapter reports at the job boundary; the dispatcher only ever looks
//! at its tag.

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors that can occur while driving an interactive device session.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The TCP or SSH connection could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Connecting did not finish within the configured timeout.
    #[error("connect timeout after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// The target state cannot be reached from the current state.
    ///
    /// This occurs when asking for a mode (e.g. `enable`) that the device
    /// template has no transition path to.
    #[error("unreachable state {0}")]
    UnreachableState(String),

    /// The channel was closed while waiting for a prompt.
    ///
    /// This typically happens when the remote device drops the connection
    /// during login or command execution.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The initial prompt did not show up in time. Carries whatever output
    /// was received before giving up.
    #[error("init timeout: {0}")]
    InitTimeout(String),

    /// Command execution timed out.
    ///
    /// The error contains the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// A device template failed to compile.
    #[error("invalid device handler config: {0}")]
    InvalidDeviceHandlerConfig(String),

    /// No template is registered for the requested platform.
    #[error("unknown platform {0}")]
    UnknownPlatform(String),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Socket level failure on an established connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to send data to the I/O task.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),
}

/// Failure decoding a UU-encoded tar payload.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload lacks the `begin` / `end` framing lines.
    #[error("uu payload is not framed by begin/end lines")]
    MissingFraming,

    /// A body line contains characters outside the uuencode alphabet.
    #[error("illegal uu character {0:?} on line {1}")]
    IllegalChar(char, usize),

    /// The tar stream could not be read.
    #[error("tar error: {0}")]
    Tar(#[from] std::io::Error),

    /// The requested member is not in the archive.
    #[error("member {0} not found in archive")]
    MemberNotFound(String),
}

/// Failure in the receiving side of an SCP transfer.
#[derive(Error, Debug)]
pub enum ScpError {
    /// The remote `scp` reported an error (status byte 1 or 2).
    #[error("remote scp error: {0}")]
    Remote(String),

    /// A control record could not be parsed.
    #[error("bad scp header: {0}")]
    BadHeader(String),

    /// The remote sent a directory where a file was expected, or vice versa.
    #[error("unexpected scp record: {0}")]
    Unexpected(String),

    /// A received name would escape the destination directory.
    #[error("refusing unsafe path {0}")]
    UnsafeName(String),

    #[error("scp io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The collection error taxonomy reported at the job boundary.
#[derive(Error, Debug)]
pub enum CollectError {
    /// Connecting (TCP, TLS, SSH or Telnet) timed out.
    #[error("connect timeout: {0}")]
    ConnectTimeout(String),

    /// The connection was refused or dropped.
    #[error("connection error: {0}")]
    ConnectRefused(String),

    /// Credentials were supplied but the device or protocol cannot use them.
    #[error("credentials unsupported: {0}")]
    AuthUnsupported(String),

    /// Unexpected handshake response or missing token/prompt.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The device answered, but with nothing.
    #[error("empty response: {0}")]
    EmptyResponse(String),

    /// The payload failed an integrity check.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything the adapter did not anticipate, including panics.
    #[error("unhandled: {0}")]
    Unhandled(String),
}

impl CollectError {
    /// Short tag used in per-host log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::ConnectTimeout(_) => "ConnectTimeout",
            CollectError::ConnectRefused(_) => "ConnectRefused",
            CollectError::AuthUnsupported(_) => "AuthUnsupported",
            CollectError::ProtocolError(_) => "ProtocolError",
            CollectError::EmptyResponse(_) => "EmptyResponse",
            CollectError::MalformedResponse(_) => "MalformedResponse",
            CollectError::Io(_) => "IOError",
            CollectError::Unhandled(_) => "Unhandled",
        }
    }
}

impl From<ConnectError> for CollectError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::ConnectTimeout(_) | ConnectError::InitTimeout(_) => {
                CollectError::ConnectTimeout(err.to_string())
            }
            ConnectError::ConnectFailed(_) | ConnectError::ChannelDisconnectError => {
                CollectError::ConnectRefused(err.to_string())
            }
            ConnectError::Io(io) => match io.kind() {
                std::io::ErrorKind::TimedOut => CollectError::ConnectTimeout(io.to_string()),
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe => CollectError::ConnectRefused(io.to_string()),
                _ => CollectError::ProtocolError(io.to_string()),
            },
            ConnectError::InvalidDeviceHandlerConfig(_) | ConnectError::UnknownPlatform(_) => {
                CollectError::Unhandled(err.to_string())
            }
            other => CollectError::ProtocolError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for CollectError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CollectError::ConnectTimeout(err.to_string())
        } else if err.is_connect() {
            CollectError::ConnectRefused(err.to_string())
        } else {
            CollectError::ProtocolError(err.to_string())
        }
    }
}

impl From<DecodeError> for CollectError {
    fn from(err: DecodeError) -> Self {
        CollectError::MalformedResponse(err.to_string())
    }
}

impl From<ScpError> for CollectError {
    fn from(err: ScpError) -> Self {
        match err {
            ScpError::Io(io) => CollectError::ConnectRefused(io.to_string()),
            other => CollectError::ProtocolError(other.to_string()),
        }
    }
}

/// Errors raised while loading the job roster.
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read roster {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to parse TOML roster: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON roster: {0}")]
    Json(#[from] serde_json::Error),

    /// The document root or a host section is not a table.
    #[error("section {0} is not a table")]
    NotATable(String),

    /// A section lacks the `device_type` discriminator.
    #[error("section {0} has no device_type")]
    MissingDeviceType(String),

    /// `device_type` names no known adapter or platform.
    #[error("section {0}: unknown device_type {1}")]
    UnknownDeviceType(String, String),

    /// Adapter parameters failed to deserialize (unknown key, bad value).
    #[error("section {0}: {1}")]
    InvalidParams(String, String),
}

/// Errors from the commit-and-push step.
#[derive(Error, Debug)]
pub enum GitError {
    /// The `git` binary could not be spawned.
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    /// A git subcommand exited non-zero.
    #[error("git {command} failed in {dir}: {stderr}")]
    Command {
        command: String,
        dir: String,
        stderr: String,
    },
}
