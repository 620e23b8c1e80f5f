// ABOUTME: Entry point for the devconf CLI application.
// ABOUTME: Fans one command batch out to each device and reports per-host results.

mod cli;

use clap::Parser;
use cli::Cli;
use devconf::config::ConfigBuilder;
use devconf::device::Device;
use devconf::error::Result;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;

    // One device, one task, one batch; join them all before reporting.
    let mut tasks = Vec::new();
    for device in cli.devices {
        let config = config.clone();
        let commands = cli.commands.clone();
        tasks.push(tokio::spawn(async move {
            let output = configure(&device, config, &commands).await;
            (device, output)
        }));
    }

    let mut failures = 0;
    for joined in futures::future::join_all(tasks).await {
        let (device, outcome) = joined.expect("configure task panicked");
        match outcome {
            Ok(output) => {
                println!("--- {device}");
                print!("{}", String::from_utf8_lossy(&output));
            }
            Err(e) => {
                failures += 1;
                eprintln!("--- {device}: {e}");
            }
        }
    }
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<devconf::Config> {
    let mut builder = ConfigBuilder::new(cli.user.as_str());
    if cli.password {
        builder = builder.password("");
    }
    if !cli.key.is_empty() {
        builder = builder.private_keys(&cli.key)?;
    }
    if let Some(path) = &cli.known_hosts {
        builder = builder.known_hosts(path)?;
    }
    if let Some(secs) = cli.timeout {
        builder = builder.connect_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = cli.command_timeout {
        builder = builder.command_timeout(Duration::from_secs(secs));
    }
    builder.request_pty(cli.pty).build()
}

async fn configure(addr: &str, config: devconf::Config, commands: &[String]) -> Result<Vec<u8>> {
    let device = Device::dial(addr, config).await?;
    let output = device.run(commands).await;
    if let Err(e) = device.close().await {
        tracing::warn!(device = addr, error = %e, "disconnect failed");
    }
    output
}
