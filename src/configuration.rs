use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

pub use clap::Parser;
use clap::ValueEnum;
use thiserror::Error;

use crate::stats::OutputFormat;

/// Probe send period used when none is given on the command line.
pub const DEFAULT_PERIOD_MICROS: u64 = 100_000;

/// ConfigurationError represents a command line that cannot be turned into settings.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigurationError {
    #[error("Port wasn't provided")]
    MissingPort,
    #[error("Server ip wasn't provided")]
    MissingAddress,
    #[error("Failed to parse {0} as IP address")]
    InvalidAddress(String),
    #[error("Failed to parse port {0}, must be in range [0:65535]")]
    InvalidPort(String),
    #[error("Too many positional arguments")]
    TooManyArguments,
    #[error("Send period must be greater than zero")]
    ZeroPeriod,
    #[error("Requests number must be greater than zero")]
    ZeroCount,
}

/// What the reflector does with a datagram that is neither a handshake nor a probe.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, ValueEnum)]
pub enum UnknownDatagramPolicy {
    /// Echo the datagram back byte-for-byte, without a timestamp.
    #[default]
    Forward,
    /// Do not answer.
    Drop,
}

#[derive(Parser, Debug)]
#[command(version, about = "UDP round-trip time meter", long_about = None)]
pub struct Configuration {
    /// Launch in server-mode (client mode by default)
    #[arg(short, long)]
    pub server: bool,
    /// Log every measurement and connection event
    #[arg(short, long)]
    pub verbose: bool,
    /// Output into file instead of stdout. Client-mode only
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Do <COUNT> measures and exit. Client-mode only
    #[arg(short = 'n', long)]
    pub count: Option<u64>,
    /// Client packet sending period in microseconds. Client-mode only
    #[arg(short, long)]
    pub period: Option<u64>,
    /// Reflector handling of datagrams that are neither handshake nor probe. Server-mode only
    #[arg(long, value_enum, default_value_t = UnknownDatagramPolicy::Forward)]
    pub unknown: UnknownDatagramPolicy,
    /// Demand a handshake as the first datagram before reflecting. Server-mode only
    #[arg(long)]
    pub require_handshake: bool,
    /// Print a summary on exit
    #[arg(long)]
    pub stats: bool,
    /// Format of the exit summary
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// [IP] PORT: server address (mandatory for client-mode) and port
    #[arg(value_name = "ENDPOINT", num_args = 1..=2, required = true)]
    pub endpoint: Vec<String>,
}

/// Everything the prober loop needs, already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ProberSettings {
    pub peer: SocketAddr,
    pub period: Duration,
    pub limit: Option<u64>,
    pub verbose: bool,
}

/// Everything the reflector loop needs, already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectorSettings {
    pub local_addr: SocketAddr,
    pub unknown: UnknownDatagramPolicy,
    pub require_handshake: bool,
    pub verbose: bool,
}

/// Role-specific settings produced by [`Configuration::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    Prober(ProberSettings),
    Reflector(ReflectorSettings),
}

impl Configuration {
    /// Validates the command line and resolves it into role settings.
    pub fn resolve(&self) -> Result<Role, ConfigurationError> {
        if self.period == Some(0) {
            return Err(ConfigurationError::ZeroPeriod);
        }
        if self.count == Some(0) {
            return Err(ConfigurationError::ZeroCount);
        }

        if self.server {
            let port = match self.endpoint.as_slice() {
                [] => return Err(ConfigurationError::MissingPort),
                [port] => parse_port(port)?,
                _ => return Err(ConfigurationError::TooManyArguments),
            };

            if self.output.is_some() || self.count.is_some() || self.period.is_some() {
                log::warn!("Options -o, -n and -p are client-mode only and are ignored");
            }

            return Ok(Role::Reflector(ReflectorSettings {
                local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
                unknown: self.unknown,
                require_handshake: self.require_handshake,
                verbose: self.verbose,
            }));
        }

        let (ip, port) = match self.endpoint.as_slice() {
            [] => return Err(ConfigurationError::MissingAddress),
            [_] => return Err(ConfigurationError::MissingPort),
            [ip, port] => (parse_ip(ip)?, parse_port(port)?),
            _ => return Err(ConfigurationError::TooManyArguments),
        };

        Ok(Role::Prober(ProberSettings {
            peer: SocketAddr::new(ip, port),
            period: Duration::from_micros(self.period.unwrap_or(DEFAULT_PERIOD_MICROS)),
            limit: self.count,
            verbose: self.verbose,
        }))
    }
}

fn parse_ip(s: &str) -> Result<IpAddr, ConfigurationError> {
    s.parse()
        .map_err(|_| ConfigurationError::InvalidAddress(s.to_string()))
}

fn parse_port(s: &str) -> Result<u16, ConfigurationError> {
    s.parse()
        .map_err(|_| ConfigurationError::InvalidPort(s.to_string()))
}
