use clap::Parser;
use std::time::Duration;

/// Discover the IPv4 path to a host using TTL-limited UDP probes
#[derive(Parser, Debug, Clone)]
#[command(name = "hoptrace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Destination host (IPv4 address or hostname)
    #[arg(required = true)]
    pub host: String,

    /// Maximum TTL (hops)
    #[arg(short = 'm', long = "max-ttl", default_value = "64")]
    pub max_ttl: u8,

    /// Base destination port for UDP probes (advances with the TTL)
    #[arg(short = 'p', long = "port", default_value = "33435")]
    pub port: u16,

    /// Reply timeout in seconds
    #[arg(short = 't', long = "timeout", default_value = "3")]
    pub timeout: f64,

    /// Probes per TTL before recording the hop as unanswered
    #[arg(short = 'r', long = "retries", default_value = "3")]
    pub retries: u32,
}

impl Args {
    /// Get reply timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_ttl == 0 {
            return Err("Max TTL must be at least 1".into());
        }

        if self.timeout <= 0.0 {
            return Err("Timeout must be positive".into());
        }

        if self.retries == 0 {
            return Err("Retries must be at least 1".into());
        }

        // Probe ports must not wrap around the port space while the TTL
        // climbs all the way to the bound.
        if u32::from(self.port) + u32::from(self.max_ttl) > u32::from(u16::MAX) {
            return Err(format!(
                "Base port {} leaves no room for {} per-TTL increments",
                self.port, self.max_ttl
            ));
        }

        Ok(())
    }
}
