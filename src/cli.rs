// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines connection, authentication, and command batch arguments.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "devconf")]
#[command(about = "Push configuration commands to network devices over SSH")]
#[command(version)]
pub struct Cli {
    /// Devices to configure, as host:port
    #[arg(required = true, value_name = "HOST:PORT")]
    pub devices: Vec<String>,

    /// Username presented during authentication
    #[arg(short, long)]
    pub user: String,

    /// Prompt for a password to authenticate with
    #[arg(short, long)]
    pub password: bool,

    /// Private key file; repeat for multiple keys
    #[arg(short, long, value_name = "PATH")]
    pub key: Vec<PathBuf>,

    /// Only connect to hosts listed in this known_hosts file
    #[arg(long, value_name = "PATH")]
    pub known_hosts: Option<PathBuf>,

    /// Connection timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Seconds the remote shell may run before the batch times out
    #[arg(long, value_name = "SECS")]
    pub command_timeout: Option<u64>,

    /// Allocate a pseudo-terminal before starting the shell
    #[arg(long)]
    pub pty: bool,

    /// Command to run; repeat to build the batch, in order
    #[arg(short, long = "cmd", value_name = "COMMAND", required = true)]
    pub commands: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
