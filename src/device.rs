// ABOUTME: SSH connection to a network device and the command batch engine.
// ABOUTME: Dials one host, runs shell command batches, races completion vs deadline.

use crate::config::{AuthMethod, Config, HostVerification};
use crate::error::{Error, Result};
use russh::client::{self, Handle};
use russh::keys::known_hosts::check_known_hosts_path;
use russh::keys::{PrivateKeyWithHashAlg, ssh_key};
use russh::{ChannelMsg, Disconnect, Preferred, Pty};
use std::sync::Arc;
use std::time::Duration;

/// Terminal settings used when a pseudo-terminal is requested: a fixed
/// dumb terminal type with local echo disabled, so device consoles do
/// not mirror every command back into the captured output.
const PTY_TERM: &str = "vt100";
const PTY_MODES: &[(Pty, u32)] = &[(Pty::ECHO, 0)];

/// Client handler enforcing the configured host verification policy.
pub(crate) struct DeviceHandler {
    host: String,
    port: u16,
    verification: HostVerification,
}

impl client::Handler for DeviceHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match &self.verification {
            HostVerification::AcceptAny => Ok(true),
            HostVerification::KnownHosts(path) => {
                match check_known_hosts_path(&self.host, self.port, server_public_key, path) {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        tracing::warn!(host = %self.host, port = self.port,
                            "server key not found in known_hosts, rejecting");
                        Ok(false)
                    }
                    Err(russh::keys::Error::KeyChanged { .. }) => {
                        tracing::warn!(host = %self.host, port = self.port,
                            "server key changed since known_hosts entry, rejecting");
                        Ok(false)
                    }
                    Err(e) => {
                        tracing::warn!(host = %self.host, port = self.port, error = %e,
                            "known_hosts check failed, rejecting");
                        Ok(false)
                    }
                }
            }
        }
    }
}

/// One open, authenticated SSH connection to a network device.
///
/// Created by [`Device::dial`], destroyed by [`Device::close`]. All
/// interaction with the remote shell goes through [`Device::run`]; the
/// transport itself is never exposed. One command batch at a time per
/// device is the intended usage; callers managing a fleet hold one
/// `Device` per host, each on its own task.
pub struct Device {
    handle: Handle<DeviceHandler>,
    command_timeout: Duration,
    request_pty: bool,
    check_exit_status: bool,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &"<russh::Handle>")
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl Device {
    /// Create a client connection to a remote device.
    ///
    /// `addr` must be `host:port`; the port is never defaulted. Methods
    /// from the configuration are offered in order and the first one the
    /// server accepts wins. Fails with [`Error::ConnectTimeout`] when the
    /// configured connect timeout elapses before the transport is up.
    pub async fn dial(addr: &str, config: Config) -> Result<Self> {
        let (host, port) = parse_addr(addr)?;

        let russh_config = client::Config {
            preferred: preferred_algorithms(&config),
            ..Default::default()
        };
        let handler = DeviceHandler {
            host: host.clone(),
            port,
            verification: config.host_verification.clone(),
        };

        tracing::debug!(host = %host, port, user = %config.user, "dialing device");
        let connect = client::connect(Arc::new(russh_config), (host.as_str(), port), handler);
        let mut handle = match config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| Error::ConnectTimeout(timeout))?,
            None => connect.await,
        }
        .map_err(|e| Error::Connection(e.to_string()))?;

        authenticate(&mut handle, &config.user, &config.auth).await?;
        tracing::debug!(host = %host, port, "device connection established");

        Ok(Self {
            handle,
            command_timeout: config.command_timeout,
            request_pty: config.request_pty,
            check_exit_status: config.check_exit_status,
        })
    }

    /// Start a remote shell and run the given commands.
    ///
    /// Each command is written newline-terminated, in order. The combined
    /// output of the shell's standard output and standard error is
    /// returned once the shell exits, standard output first. If the shell
    /// does not exit within the configured command timeout the batch
    /// fails with [`Error::Timeout`] and no output is returned.
    ///
    /// The batch should end with a command that terminates the shell
    /// (typically `exit`), otherwise the deadline is the only way out.
    pub async fn run<S: AsRef<str>>(&self, commands: &[S]) -> Result<Vec<u8>> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::SessionOpen(e.to_string()))?;

        if self.request_pty {
            channel
                .request_pty(true, PTY_TERM, 80, 24, 0, 0, PTY_MODES)
                .await
                .map_err(|e| Error::ShellStart(e.to_string()))?;
        }
        channel
            .request_shell(true)
            .await
            .map_err(|e| Error::ShellStart(e.to_string()))?;

        for command in commands {
            let command = command.as_ref();
            tracing::debug!(command, "sending command");
            channel
                .data(format!("{command}\n").as_bytes())
                .await
                .map_err(|source| Error::Write {
                    command: command.to_string(),
                    source,
                })?;
        }

        // Race shell exit against the deadline. The drain task owns the
        // channel, so aborting it on timeout also releases the channel;
        // its buffered output is discarded.
        let mut drain = tokio::spawn(async move {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_status = None;
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        stdout.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        if ext == 1 {
                            stderr.extend_from_slice(&data);
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                        exit_status = Some(status);
                    }
                    Some(ChannelMsg::Close) => break,
                    Some(_) => {}
                    None => break,
                }
            }
            (stdout, stderr, exit_status)
        });

        tokio::select! {
            joined = &mut drain => {
                let (mut output, stderr, exit_status) =
                    joined.map_err(|e| Error::Read(e.to_string()))?;
                if self.check_exit_status {
                    match exit_status {
                        Some(0) => {}
                        Some(status) => return Err(Error::ExitStatus(status)),
                        None => return Err(Error::ChannelClosed),
                    }
                }
                output.extend_from_slice(&stderr);
                Ok(output)
            }
            _ = tokio::time::sleep(self.command_timeout) => {
                tracing::warn!(timeout = ?self.command_timeout, "shell did not exit before deadline");
                drain.abort();
                Err(Error::Timeout)
            }
        }
    }

    /// Disconnect from the device.
    ///
    /// Any [`run`](Self::run) attempted afterwards fails with a session
    /// setup error rather than hanging.
    pub async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)?;
        Ok(())
    }
}

/// Split a `host:port` address. IPv6 hosts use the usual bracket form.
fn parse_addr(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Address(addr.to_string()))?;
    if host.is_empty() {
        return Err(Error::Address(addr.to_string()));
    }
    let port: u16 = port.parse().map_err(|_| Error::Address(addr.to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}

/// Offer each configured method in order; the first accepted one wins.
async fn authenticate(
    handle: &mut Handle<DeviceHandler>,
    user: &str,
    methods: &[AuthMethod],
) -> Result<()> {
    for method in methods {
        match method {
            AuthMethod::Password(password) => {
                let result = handle
                    .authenticate_password(user, password.as_str())
                    .await
                    .map_err(Error::Protocol)?;
                if result.success() {
                    return Ok(());
                }
                tracing::debug!(user, "password authentication rejected");
            }
            AuthMethod::Keys(keys) => {
                for key in keys {
                    let hash_alg = handle
                        .best_supported_rsa_hash()
                        .await
                        .map_err(Error::Protocol)?
                        .flatten();
                    let result = handle
                        .authenticate_publickey(
                            user,
                            PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                        )
                        .await
                        .map_err(Error::Protocol)?;
                    if result.success() {
                        return Ok(());
                    }
                }
                tracing::debug!(user, "public key authentication rejected");
            }
        }
    }
    Err(Error::AuthenticationFailed)
}

/// Default algorithm set with any configured legacy ciphers appended.
fn preferred_algorithms(config: &Config) -> Preferred {
    let mut preferred = Preferred::default();
    if !config.extra_ciphers.is_empty() {
        let ciphers = preferred.cipher.to_mut();
        for name in &config.extra_ciphers {
            if !ciphers.contains(name) {
                ciphers.push(name.clone());
            }
        }
    }
    preferred
}
