use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `harvest-server` binary.
///
/// These settings control how the dispatch engine selects organizations, how
/// long it waits on each batch, and how the real-time channel buffers
/// outbound frames. All values are parsed from CLI arguments or environment
/// variables, with defaults matching production cadence.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "harvest-server",
    version,
    about = "Dispatches surplus-food donations to nearby organizations in real time"
)]
pub struct CliArgs {
    /// Address to listen on for HTTP and WebSocket traffic.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Number of organizations notified per round.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE", default_value_t = 3)]
    pub batch_size: usize,

    /// Radius, in meters, within which organizations are eligible.
    ///
    /// The radius is never widened between rounds; once every organization in
    /// range has been notified, later rounds are empty.
    ///
    /// Environment variable: `SEARCH_RADIUS_M`
    #[arg(long, env = "SEARCH_RADIUS_M", default_value_t = 10_000.0)]
    pub search_radius_m: f64,

    /// How long a batch is given to respond before the next round runs.
    ///
    /// Environment variable: `WAIT_INTERVAL_SECS`
    #[arg(long, env = "WAIT_INTERVAL_SECS", default_value_t = 300)]
    pub wait_interval_secs: u64,

    /// How often the claim status is rechecked while waiting.
    ///
    /// Environment variable: `POLL_INTERVAL_SECS`
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Cancel open donations once their use-by date has passed.
    ///
    /// Environment variable: `EXPIRE_AFTER_USE_BY`
    #[arg(long, env = "EXPIRE_AFTER_USE_BY", default_value_t = false)]
    pub expire_after_use_by: bool,

    /// Capacity of each connection's outbound frame queue.
    ///
    /// Frames for a connection whose queue is full are dropped; delivery is
    /// best effort.
    ///
    /// Environment variable: `CONNECTION_BUFFER_SIZE`
    #[arg(long, env = "CONNECTION_BUFFER_SIZE", default_value_t = 32)]
    pub connection_buffer_size: usize,

    /// Seconds to wait for dispatch loops to exit during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Optional JSON fixture with `organizations` and `donations` arrays
    /// loaded into the store at startup.
    ///
    /// Environment variable: `SEED_PATH`
    #[arg(long, env = "SEED_PATH")]
    pub seed_path: Option<PathBuf>,
}

/// What happens to an open donation whose use-by date has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Keep dispatching until someone claims it.
    Never,
    /// Cancel it at the first round after the use-by day ends.
    AfterUseBy,
}

/// Knobs consumed by every dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub batch_size: usize,
    pub radius_m: f64,
    pub wait_interval: Duration,
    pub poll_interval: Duration,
    pub expiry: ExpiryPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 3,
            radius_m: 10_000.0,
            wait_interval: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            expiry: ExpiryPolicy::Never,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub dispatch: DispatchSettings,
    pub connection_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub seed_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:8080"),
            dispatch: DispatchSettings::default(),
            connection_buffer_size: 32,
            shutdown_timeout: Duration::from_secs(3),
            seed_path: None,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.batch_size == 0 {
            bail!("BATCH_SIZE must be greater than 0");
        }

        if !args.search_radius_m.is_finite() || args.search_radius_m <= 0.0 {
            bail!(
                "SEARCH_RADIUS_M must be a positive number of meters (got {})",
                args.search_radius_m
            );
        }

        if args.poll_interval_secs == 0 {
            bail!("POLL_INTERVAL_SECS must be greater than 0");
        }

        if args.poll_interval_secs > args.wait_interval_secs {
            bail!(
                "POLL_INTERVAL_SECS ({}) exceeds WAIT_INTERVAL_SECS ({})",
                args.poll_interval_secs,
                args.wait_interval_secs
            );
        }

        if args.connection_buffer_size == 0 {
            bail!("CONNECTION_BUFFER_SIZE must be greater than 0");
        }

        let expiry = if args.expire_after_use_by {
            ExpiryPolicy::AfterUseBy
        } else {
            ExpiryPolicy::Never
        };

        Ok(Self {
            server_addr: args.server_addr,
            dispatch: DispatchSettings {
                batch_size: args.batch_size,
                radius_m: args.search_radius_m,
                wait_interval: Duration::from_secs(args.wait_interval_secs),
                poll_interval: Duration::from_secs(args.poll_interval_secs),
                expiry,
            },
            connection_buffer_size: args.connection_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            seed_path: args.seed_path,
        })
    }
}
