use std::time::Duration;

use crate::cli::Args;

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum TTL before the session aborts
    pub max_ttl: u8,
    /// Destination port of the first probe; advances with the TTL
    pub base_port: u16,
    /// Reply timeout, re-armed before every receive
    pub timeout: Duration,
    /// Probes per TTL before the hop is recorded as unanswered
    pub retry_budget: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_ttl: 64,
            base_port: 33435,
            timeout: Duration::from_secs(3),
            retry_budget: 3,
        }
    }
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            max_ttl: args.max_ttl,
            base_port: args.port,
            timeout: args.timeout_duration(),
            retry_budget: args.retries,
        }
    }
}
