//! Command-line configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use libcsi::{CsiError, Endpoint};

pub const DEFAULT_ENDPOINT: &str = "unix:/tmp/csi.sock";
pub const DEFAULT_LOG_FILE: &str = "/var/log/s3csi.log";
pub const DEFAULT_DRIVER_NAME: &str = "s3.csi.rk8s.io";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable lines.
    Text,
}

/// S3 CSI plugin: serves the Identity, Controller and Node services on one
/// endpoint.
#[derive(Parser, Debug, Clone)]
#[command(name = "s3csi", version, about, long_about = None)]
pub struct Args {
    /// CSI endpoint (unix:/path, unix:///path, /path or tcp://host:port)
    #[arg(long, env = "CSI_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Node identifier reported by NodeGetInfo
    #[arg(long = "nodeid", env = "NODE_ID", default_value = "")]
    pub node_id: String,

    /// Log file path
    #[arg(long = "log", env = "S3CSI_LOG_FILE", default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9080")]
    pub metrics_address: SocketAddr,

    /// Name the plugin registers under
    #[arg(long, env = "DRIVER_NAME", default_value = DEFAULT_DRIVER_NAME)]
    pub driver_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, env = "LOG_FORMAT", default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Args {
    pub fn endpoint(&self) -> Result<Endpoint, CsiError> {
        self.endpoint.parse()
    }
}
