// ABOUTME: Error types for configuration building, dialing, and session runs.
// ABOUTME: Covers the full taxonomy from builder invariants to the timeout sentinel.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no authentication methods specified")]
    NoAuthMethods,

    #[error("failed to load private key from {path}: {reason}")]
    KeyLoad { path: PathBuf, reason: String },

    #[error("invalid known_hosts file {path}: {reason}")]
    KnownHosts { path: PathBuf, reason: String },

    #[error("failed to read password from terminal: {0}")]
    Prompt(std::io::Error),

    #[error("invalid address {0:?}: expected host:port")]
    Address(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("authentication failed: all methods rejected")]
    AuthenticationFailed,

    #[error("failed to open session channel: {0}")]
    SessionOpen(String),

    #[error("failed to start remote shell: {0}")]
    ShellStart(String),

    #[error("failed to run {command:?}: {source}")]
    Write {
        command: String,
        source: russh::Error,
    },

    #[error("session timed out")]
    Timeout,

    #[error("failed to read shell output: {0}")]
    Read(String),

    #[error("remote shell exited with status {0}")]
    ExitStatus(u32),

    #[error("channel closed without reporting an exit status")]
    ChannelClosed,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
