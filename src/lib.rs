// ABOUTME: Library root for devconf - SSH command execution on network devices.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod device;
pub mod error;

pub use config::{Config, ConfigBuilder};
pub use device::Device;
pub use error::{Error, Result};
