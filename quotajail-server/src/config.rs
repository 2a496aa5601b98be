//! Server configuration and CLI argument parsing
//!
//! Every setting can come from a command-line flag or from an environment
//! variable with the `QUOTAJAIL_` prefix.
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Default values (lowest priority)
//!
//! # Example Usage
//!
//! ```bash
//! # Single replica, gRPC on 50051, metrics on 2112
//! quotajail
//!
//! # Replica that also serves its buckets to the fleet
//! quotajail --store-node --store-node-port 6379
//!
//! # Replica using another replica's buckets, failing closed
//! export QUOTAJAIL_STORE=remote
//! export QUOTAJAIL_STORE_ADDR=10.0.0.5:6379
//! quotajail --on-store-error closed
//! ```

use crate::admission::FailurePolicy;
use anyhow::{Result, anyhow};
use clap::Parser;
use quotajail::Policy;
use serde::Deserialize;
use std::collections::HashMap;

/// Main configuration structure for the server
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listener configuration
    pub listen: ListenConfig,
    /// Where bucket state lives
    pub store: StoreConfig,
    /// Serve the local store to other replicas
    pub store_node: Option<StoreNodeConfig>,
    /// Consecutive violations that trigger a ban
    pub max_violations: u32,
    /// Ban length in seconds
    pub ban_duration: i64,
    /// Answer given when the store fails
    pub failure_policy: FailurePolicy,
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
}

/// Addresses the replica listens on
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Host address shared by all listeners (e.g., "0.0.0.0")
    pub host: String,
    /// gRPC port, always enabled
    pub grpc_port: u16,
    /// HTTP/JSON port, when the HTTP transport is enabled
    pub http_port: Option<u16>,
    /// Prometheus metrics port
    pub metrics_port: u16,
}

/// Store node listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreNodeConfig {
    pub port: u16,
}

/// State store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Which backend the admission service uses
    pub backend: StoreBackend,
    /// Store node address for the remote backend
    pub addr: String,
    /// Connect and request timeout for the remote backend (milliseconds)
    pub timeout_ms: u64,
    /// Number of shards of the local store
    pub shards: usize,
    /// Expected number of buckets in the local store
    pub capacity: usize,
    /// Minimum time between cleanup sweeps of a shard (seconds)
    pub cleanup_interval: u64,
}

/// Available state store backends
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Buckets live in this process
    Local,
    /// Buckets live in a store node
    Remote,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StoreBackend::Local),
            "remote" => Ok(StoreBackend::Remote),
            _ => Err(anyhow!(
                "Invalid store backend: {}. Valid options are: local, remote",
                s
            )),
        }
    }
}

/// Command-line arguments for the server
///
/// All arguments can also be set via environment variables with the
/// QUOTAJAIL_ prefix. CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(
    name = "quotajail",
    about = "Token bucket admission control with temporary bans",
    long_about = "Admission control service: per-subject token buckets, with subjects that keep hitting an empty bucket jailed for a while.\n\nEnvironment variables with QUOTAJAIL_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    // Listeners
    #[arg(
        long,
        value_name = "HOST",
        help = "Host address for all listeners",
        default_value = "0.0.0.0",
        env = "QUOTAJAIL_HOST"
    )]
    pub host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "gRPC port",
        default_value_t = 50051,
        env = "QUOTAJAIL_PORT"
    )]
    pub port: u16,
    #[arg(long, help = "Enable HTTP/JSON transport", env = "QUOTAJAIL_HTTP")]
    pub http: bool,
    #[arg(
        long,
        value_name = "PORT",
        help = "HTTP port",
        default_value_t = 8080,
        env = "QUOTAJAIL_HTTP_PORT"
    )]
    pub http_port: u16,
    #[arg(
        long,
        value_name = "PORT",
        help = "Prometheus metrics port",
        default_value_t = 2112,
        env = "QUOTAJAIL_METRICS_PORT"
    )]
    pub metrics_port: u16,

    // Store
    #[arg(
        long,
        value_name = "BACKEND",
        help = "State store: local, remote",
        default_value = "local",
        env = "QUOTAJAIL_STORE"
    )]
    pub store: StoreBackend,
    #[arg(
        long,
        value_name = "ADDR",
        help = "Store node address for the remote store",
        default_value = "127.0.0.1:6379",
        env = "QUOTAJAIL_STORE_ADDR"
    )]
    pub store_addr: String,
    #[arg(
        long,
        value_name = "MS",
        help = "Remote store timeout (milliseconds)",
        default_value_t = 500,
        env = "QUOTAJAIL_STORE_TIMEOUT_MS"
    )]
    pub store_timeout_ms: u64,
    #[arg(
        long,
        help = "Serve the local store to other replicas",
        env = "QUOTAJAIL_STORE_NODE"
    )]
    pub store_node: bool,
    #[arg(
        long,
        value_name = "PORT",
        help = "Store node port",
        default_value_t = 6379,
        env = "QUOTAJAIL_STORE_NODE_PORT"
    )]
    pub store_node_port: u16,
    #[arg(
        long,
        value_name = "N",
        help = "Number of local store shards",
        default_value_t = 64,
        env = "QUOTAJAIL_SHARDS"
    )]
    pub shards: usize,
    #[arg(
        long,
        value_name = "SIZE",
        help = "Expected number of buckets",
        default_value_t = 100_000,
        env = "QUOTAJAIL_STORE_CAPACITY"
    )]
    pub store_capacity: usize,
    #[arg(
        long,
        value_name = "SECS",
        help = "Cleanup interval for settled buckets (seconds)",
        default_value_t = 60,
        env = "QUOTAJAIL_CLEANUP_INTERVAL"
    )]
    pub cleanup_interval: u64,

    // Policy
    #[arg(
        long,
        value_name = "N",
        help = "Consecutive violations before a ban",
        default_value_t = Policy::DEFAULT_MAX_VIOLATIONS,
        env = "QUOTAJAIL_MAX_VIOLATIONS"
    )]
    pub max_violations: u32,
    #[arg(
        long,
        value_name = "SECS",
        help = "Ban duration (seconds)",
        default_value_t = Policy::DEFAULT_BAN_DURATION,
        allow_negative_numbers = true,
        env = "QUOTAJAIL_BAN_DURATION"
    )]
    pub ban_duration: i64,
    #[arg(
        long,
        value_name = "POLICY",
        help = "Answer when the store fails: open, closed",
        default_value = "open",
        env = "QUOTAJAIL_ON_STORE_ERROR"
    )]
    pub on_store_error: FailurePolicy,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "QUOTAJAIL_LOG_LEVEL"
    )]
    pub log_level: String,

    // Utility options
    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,
}

impl Config {
    /// Build configuration from environment variables and CLI arguments
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        Self::from_args(args)
    }

    /// Build and validate configuration from already parsed arguments
    pub fn from_args(args: Args) -> Result<Self> {
        let config = Config {
            listen: ListenConfig {
                host: args.host,
                grpc_port: args.port,
                http_port: args.http.then_some(args.http_port),
                metrics_port: args.metrics_port,
            },
            store: StoreConfig {
                backend: args.store,
                addr: args.store_addr,
                timeout_ms: args.store_timeout_ms,
                shards: args.shards,
                capacity: args.store_capacity,
                cleanup_interval: args.cleanup_interval,
            },
            store_node: args.store_node.then_some(StoreNodeConfig {
                port: args.store_node_port,
            }),
            max_violations: args.max_violations,
            ban_duration: args.ban_duration,
            failure_policy: args.on_store_error,
            log_level: args.log_level,
        };

        config.validate()?;

        Ok(config)
    }

    /// Ban policy shared by every bucket
    pub fn policy(&self) -> Policy {
        Policy::new(self.max_violations, self.ban_duration)
    }

    fn validate(&self) -> Result<()> {
        if self.max_violations < 1 {
            return Err(anyhow!("--max-violations must be at least 1"));
        }
        if self.ban_duration < 0 {
            return Err(anyhow!("--ban-duration must not be negative"));
        }
        if self.store.shards < 1 {
            return Err(anyhow!("--shards must be at least 1"));
        }
        if self.store.backend == StoreBackend::Remote && self.store_node.is_some() {
            return Err(anyhow!(
                "--store-node cannot be combined with --store remote: \
                a store node must serve its own local buckets"
            ));
        }

        let mut ports = HashMap::new();
        let listeners = [
            ("gRPC", Some(self.listen.grpc_port)),
            ("HTTP", self.listen.http_port),
            ("metrics", Some(self.listen.metrics_port)),
            ("store node", self.store_node.as_ref().map(|node| node.port)),
        ];
        for (name, port) in listeners {
            let Some(port) = port else { continue };
            if let Some(other) = ports.insert(port, name) {
                return Err(anyhow!(
                    "The {} and {} listeners cannot share port {}",
                    other,
                    name,
                    port
                ));
            }
        }

        Ok(())
    }

    /// Print all available environment variables and their descriptions
    fn print_env_vars() {
        println!("Quotajail Environment Variables");
        println!("===============================");
        println!();
        println!("All environment variables use the QUOTAJAIL_ prefix.");
        println!("CLI arguments take precedence over environment variables.");
        println!();

        println!("Listeners:");
        println!("  QUOTAJAIL_HOST=<host>                 Host for all listeners [default: 0.0.0.0]");
        println!("  QUOTAJAIL_PORT=<port>                 gRPC port [default: 50051]");
        println!("  QUOTAJAIL_HTTP=true|false             Enable HTTP/JSON transport");
        println!("  QUOTAJAIL_HTTP_PORT=<port>            HTTP port [default: 8080]");
        println!("  QUOTAJAIL_METRICS_PORT=<port>         Metrics port [default: 2112]");
        println!();

        println!("Store Configuration:");
        println!(
            "  QUOTAJAIL_STORE=<backend>             State store: local, remote [default: local]"
        );
        println!(
            "  QUOTAJAIL_STORE_ADDR=<addr>           Store node address [default: 127.0.0.1:6379]"
        );
        println!("  QUOTAJAIL_STORE_TIMEOUT_MS=<ms>       Remote store timeout [default: 500]");
        println!("  QUOTAJAIL_STORE_NODE=true|false       Serve the local store to other replicas");
        println!("  QUOTAJAIL_STORE_NODE_PORT=<port>      Store node port [default: 6379]");
        println!("  QUOTAJAIL_SHARDS=<n>                  Local store shards [default: 64]");
        println!("  QUOTAJAIL_STORE_CAPACITY=<size>       Expected number of buckets [default: 100000]");
        println!(
            "  QUOTAJAIL_CLEANUP_INTERVAL=<secs>     Settled bucket cleanup interval [default: 60]"
        );
        println!();

        println!("Policy:");
        println!("  QUOTAJAIL_MAX_VIOLATIONS=<n>          Violations before a ban [default: 5]");
        println!("  QUOTAJAIL_BAN_DURATION=<secs>         Ban duration [default: 60]");
        println!(
            "  QUOTAJAIL_ON_STORE_ERROR=<policy>     Answer on store failure: open, closed [default: open]"
        );
        println!();

        println!("General Configuration:");
        println!(
            "  QUOTAJAIL_LOG_LEVEL=<level>           Log level: error, warn, info, debug, trace [default: info]"
        );
        println!();

        println!("Examples:");
        println!("  # Share buckets across replicas");
        println!("  export QUOTAJAIL_STORE=remote");
        println!("  export QUOTAJAIL_STORE_ADDR=10.0.0.5:6379");
        println!();
        println!("  # Run server (CLI args override env vars)");
        println!("  quotajail --port 50052  # Will use port 50052");
    }
}
