//! Startup configuration.
//!
//! Built once from `serve` flags (each with an environment fallback) and
//! shared read-only with the dispatcher, resolver and handlers.

use crate::telemetry::Propagation;
use clap::{Args, ValueEnum};
use std::time::Duration;
use thiserror::Error;

/// Fixed route prefix of every reactor endpoint.
pub const BASE_PATH: &str = "/treact";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeployMode {
    /// Every call goes back to this process on localhost
    Local,
    /// Calls go to per-atom and per-bond services by DNS name
    Cluster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Module {
    Treactor,
    Bond,
    Atom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Position of this instance in the bond ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Entry point (or an atom service); its bonds go to `bond-1`
    App,
    /// `bond-k`
    Bond(usize),
    /// The catch-all `bond-n`
    BondN,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max bond must be at least 1")]
    NoBonds,
    #[error("bond component must be 'n' or a number in 1..={max_bond}, got '{component}'")]
    InvalidComponent { component: String, max_bond: usize },
}

/// `serve` flags.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Listen port
    #[arg(long, env = "PORT", default_value_t = 3330)]
    pub port: u16,

    /// Service identity reported in every capture
    #[arg(long, env = "SERVICE_NAME", default_value = "treactor-app")]
    pub service_name: String,

    #[arg(long, env = "SERVICE_VERSION", default_value = "0.0")]
    pub service_version: String,

    /// Address resolution mode
    #[arg(long, env = "TREACTOR_MODE", value_enum, default_value_t = DeployMode::Local)]
    pub mode: DeployMode,

    /// Which kind of service this instance is
    #[arg(long, env = "TREACTOR_MODULE", value_enum, default_value_t = Module::Treactor)]
    pub module: Module,

    /// Instance within the module: `app`, `n`, or a bond number
    #[arg(long, env = "TREACTOR_COMPONENT", default_value = "app")]
    pub component: String,

    /// Length of the bond ring before falling back to `bond-n`
    #[arg(long, env = "TREACTOR_MAX_BOND", default_value_t = 5)]
    pub max_bond: usize,

    /// Highest atomic number served
    #[arg(long, env = "TREACTOR_MAX_NUMBER", default_value_t = 103)]
    pub max_number: u32,

    /// Upper bound for a single `mem:` allocation, in MiB
    #[arg(long, env = "TREACTOR_MAX_MEM_MB", default_value_t = 1024)]
    pub max_mem_mb: u64,

    /// Timeout for one outbound dispatch
    #[arg(long, env = "TREACTOR_CALL_TIMEOUT_MS", default_value_t = 30_000)]
    pub call_timeout_ms: u64,

    /// Return bond results in declaration order instead of receipt order
    #[arg(long, env = "TREACTOR_ORDERED_BONDS")]
    pub ordered_bonds: bool,

    #[arg(long, env = "TREACTOR_LOG_METHOD", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Trace header format written on outbound calls
    #[arg(long, env = "TREACTOR_TRACE_PROPAGATION", value_enum, default_value_t = Propagation::W3c)]
    pub trace_propagation: Propagation,

    /// OTLP/HTTP collector base URL; spans are not exported when unset
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub service_name: String,
    pub service_version: String,
    pub mode: DeployMode,
    pub module: Module,
    pub role: Role,
    pub max_bond: usize,
    pub max_number: u32,
    pub max_mem_mb: u64,
    pub call_timeout: Duration,
    pub ordered_bonds: bool,
    pub log_format: LogFormat,
    pub trace_propagation: Propagation,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_args(args: ServeArgs) -> Result<Self, ConfigError> {
        if args.max_bond == 0 {
            return Err(ConfigError::NoBonds);
        }
        let role = resolve_role(args.module, &args.component, args.max_bond)?;
        Ok(Self {
            port: args.port,
            service_name: args.service_name,
            service_version: args.service_version,
            mode: args.mode,
            module: args.module,
            role,
            max_bond: args.max_bond,
            max_number: args.max_number,
            max_mem_mb: args.max_mem_mb,
            call_timeout: Duration::from_millis(args.call_timeout_ms),
            ordered_bonds: args.ordered_bonds,
            log_format: args.log_format,
            trace_propagation: args.trace_propagation,
            otlp_endpoint: args.otlp_endpoint.filter(|e| !e.trim().is_empty()),
        })
    }

    /// Local-mode defaults on the given port.
    pub fn local(port: u16) -> Self {
        Self {
            port,
            service_name: "treactor-app".to_string(),
            service_version: "0.0".to_string(),
            mode: DeployMode::Local,
            module: Module::Treactor,
            role: Role::App,
            max_bond: 5,
            max_number: 103,
            max_mem_mb: 1024,
            call_timeout: Duration::from_secs(30),
            ordered_bonds: false,
            log_format: LogFormat::Text,
            trace_propagation: Propagation::W3c,
            otlp_endpoint: None,
        }
    }
}

fn resolve_role(module: Module, component: &str, max_bond: usize) -> Result<Role, ConfigError> {
    if module != Module::Bond {
        return Ok(Role::App);
    }
    if component == "n" {
        return Ok(Role::BondN);
    }
    match component.parse::<usize>() {
        Ok(k) if (1..=max_bond).contains(&k) => Ok(Role::Bond(k)),
        _ => Err(ConfigError::InvalidComponent {
            component: component.to_string(),
            max_bond,
        }),
    }
}
