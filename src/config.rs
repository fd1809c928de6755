use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use super::database_svc::PersistPolicy;
use super::error::ConfigError;

/// Ingests CCSDS telemetry datagrams into a time-series store.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the ingestion and healthcheck listeners
    Serve(ServeArgs),
    /// Read persisted telemetry as JSON
    Query(QueryArgs),
    /// Encode one telemetry packet and send it as a datagram
    Emit(EmitArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// SQLite database file
    #[arg(long = "database", env = "DATABASE_PATH")]
    pub path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// UDP port for telemetry packets
    #[arg(long, env = "INGESTION_PORT")]
    pub ingestion_port: u16,

    /// UDP port for healthcheck pings
    #[arg(long, env = "HEALTHCHECK_PORT")]
    pub healthcheck_port: u16,

    /// Address both listeners bind to
    #[arg(long, env = "BIND_ADDRESS", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_address: IpAddr,

    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Incoming webhook for anomaly alerts, alerts are not delivered without it
    #[arg(long, env = "SLACK_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Upper bound on a single webhook request
    #[arg(long, env = "NOTIFY_TIMEOUT_MS", default_value_t = 10000)]
    pub notify_timeout_ms: u64,

    /// Upper bound on a single database write
    #[arg(long, env = "PERSIST_TIMEOUT_MS", default_value_t = 5000)]
    pub persist_timeout_ms: u64,

    /// Retries after a failed write before giving up, 0 exits on the first failure
    #[arg(long, env = "PERSIST_RETRIES", default_value_t = 0)]
    pub persist_retries: u32,

    /// Delay before the first retry, doubled for each one after
    #[arg(long, env = "PERSIST_BACKOFF_MS", default_value_t = 250)]
    pub persist_backoff_ms: u64,
}

/// Settings for `serve`, fixed once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ingestion_addr: SocketAddr,
    pub healthcheck_addr: SocketAddr,
    pub database_path: PathBuf,
    pub webhook_url: Option<String>,
    pub notify_timeout: Duration,
    pub persist_timeout: Duration,
    pub persist_policy: PersistPolicy,
}

impl TryFrom<ServeArgs> for Config {
    type Error = ConfigError;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        if args.ingestion_port == 0 {
            return Err(ConfigError::ZeroPort("INGESTION_PORT"));
        }
        if args.healthcheck_port == 0 {
            return Err(ConfigError::ZeroPort("HEALTHCHECK_PORT"));
        }
        if args.ingestion_port == args.healthcheck_port {
            return Err(ConfigError::PortClash(args.ingestion_port));
        }

        Ok(Config {
            ingestion_addr: SocketAddr::new(args.bind_address, args.ingestion_port),
            healthcheck_addr: SocketAddr::new(args.bind_address, args.healthcheck_port),
            database_path: args.database.path,
            // an empty variable counts as unset
            webhook_url: args.webhook_url.filter(|url| !url.trim().is_empty()),
            notify_timeout: Duration::from_millis(args.notify_timeout_ms),
            persist_timeout: Duration::from_millis(args.persist_timeout_ms),
            persist_policy: PersistPolicy {
                retries: args.persist_retries,
                backoff: Duration::from_millis(args.persist_backoff_ms),
            },
        })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Most recent packet
    Current,
    /// Packets in the window, newest first
    List,
    /// Min/max/average per measurement and subsystem
    Aggregate,
    /// Packets with at least one value past its alert threshold
    Anomalies,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(value_enum)]
    pub kind: QueryKind,

    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Window start (RFC 3339), defaults to one hour ago
    #[arg(long)]
    pub start: Option<DateTime<Utc>>,

    /// Window end (RFC 3339), defaults to now
    #[arg(long)]
    pub end: Option<DateTime<Utc>>,

    /// Maximum rows for `list` (default 100) and `anomalies` (default 50)
    #[arg(long)]
    pub limit: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct EmitArgs {
    /// Ingestion listener to send to
    #[arg(long, default_value = "127.0.0.1:8089")]
    pub target: SocketAddr,

    #[arg(long, default_value_t = 0)]
    pub apid: u16,

    #[arg(long, default_value_t = 3)]
    pub seq_flags: u8,

    #[arg(long, default_value_t = 0)]
    pub seq_count: u16,

    #[arg(long, default_value_t = 0)]
    pub subsystem_id: u16,

    /// Unix seconds, defaults to now
    #[arg(long)]
    pub timestamp: Option<u64>,

    #[arg(long, default_value_t = 25.0, allow_negative_numbers = true)]
    pub temperature: f32,

    #[arg(long, default_value_t = 85.0, allow_negative_numbers = true)]
    pub battery: f32,

    #[arg(long, default_value_t = 500.0, allow_negative_numbers = true)]
    pub altitude: f32,

    #[arg(long, default_value_t = -50.0, allow_negative_numbers = true)]
    pub signal: f32,
}
