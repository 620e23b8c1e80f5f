// ABOUTME: In-process SSH server acting as a fake device shell.
// ABOUTME: Scriptable shell behaviors drive the session engine tests.

use russh::keys::ssh_key::{self, Algorithm, PrivateKey};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const USER: &str = "admin";
pub const PASSWORD: &str = "hunter2";

/// What the fake shell does once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellBehavior {
    /// Echo each received line back on stdout; exit when an `exit` line
    /// arrives.
    EchoUntilExit,
    /// Print `ok\n` and exit as soon as the shell starts.
    ImmediateOk,
    /// Start the shell and never exit.
    NeverExit,
    /// Print one line on stdout and one on stderr, then exit.
    StdoutThenStderr,
    /// Exit immediately with the given status and no output.
    ExitWith(u32),
}

/// A running fake shell server bound to a loopback port.
pub struct FakeShell {
    pub addr: String,
    pub host_key: ssh_key::PublicKey,
    port: u16,
}

impl FakeShell {
    /// A known_hosts line matching this server.
    pub fn known_hosts_entry(&self) -> String {
        let key = self.host_key.to_openssh().expect("host key encoding");
        format!("[127.0.0.1]:{} {}\n", self.port, key)
    }
}

/// Start a fake shell server; it accepts connections until dropped tasks
/// unwind at the end of the test process.
pub async fn spawn(behavior: ShellBehavior) -> FakeShell {
    let host_key =
        PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).expect("host key");
    let public = host_key.public_key().clone();

    let config = Arc::new(server::Config {
        keys: vec![host_key],
        auth_rejection_time: Duration::from_millis(10),
        ..Default::default()
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let port = listener.local_addr().expect("local addr").port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let config = Arc::clone(&config);
            let handler = ShellHandler::new(behavior);
            tokio::spawn(async move {
                if let Ok(session) = server::run_stream(config, stream, handler).await {
                    let _ = session.await;
                }
            });
        }
    });

    FakeShell {
        addr: format!("127.0.0.1:{port}"),
        host_key: public,
        port,
    }
}

struct ShellHandler {
    behavior: ShellBehavior,
    channels: HashMap<ChannelId, Channel<Msg>>,
    line_buf: Vec<u8>,
}

impl ShellHandler {
    fn new(behavior: ShellBehavior) -> Self {
        Self {
            behavior,
            channels: HashMap::new(),
            line_buf: Vec::new(),
        }
    }

    async fn exit_shell(&mut self, channel_id: ChannelId, session: &mut Session, status: u32) {
        let handle = session.handle();
        let _ = handle.exit_status_request(channel_id, status).await;
        if let Some(channel) = self.channels.get_mut(&channel_id) {
            let _ = channel.eof().await;
            let _ = channel.close().await;
        }
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

impl server::Handler for ShellHandler {
    type Error = russh::Error;

    async fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(reject())
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &ssh_key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        if user == USER {
            Ok(Auth::Accept)
        } else {
            Ok(reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_success(channel_id);
        match self.behavior {
            ShellBehavior::ImmediateOk => {
                if let Some(channel) = self.channels.get_mut(&channel_id) {
                    let _ = channel.data(&b"ok\n"[..]).await;
                }
                self.exit_shell(channel_id, session, 0).await;
            }
            ShellBehavior::StdoutThenStderr => {
                if let Some(channel) = self.channels.get_mut(&channel_id) {
                    let _ = channel.data(&b"out\n"[..]).await;
                    let _ = channel.extended_data(1, &b"err\n"[..]).await;
                }
                self.exit_shell(channel_id, session, 0).await;
            }
            ShellBehavior::ExitWith(status) => {
                self.exit_shell(channel_id, session, status).await;
            }
            ShellBehavior::EchoUntilExit | ShellBehavior::NeverExit => {}
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.behavior != ShellBehavior::EchoUntilExit {
            return Ok(());
        }
        self.line_buf.extend_from_slice(data);
        while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.line_buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if text == "exit" {
                self.exit_shell(channel_id, session, 0).await;
            } else if let Some(channel) = self.channels.get_mut(&channel_id) {
                let _ = channel.data(format!("{text}\n").as_bytes()).await;
            }
        }
        Ok(())
    }
}
