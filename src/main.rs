use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;

use hoptrace::cli::Args;
use hoptrace::config::Config;
use hoptrace::error::TraceError;
use hoptrace::trace::ProbeEngine;

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let config = Config::from(&args);

    // Resolve once; the destination address is fixed for the session.
    let destination = resolve_target(&args.host)?;

    // Operator interrupt: the engine polls the flag at its suspension
    // points and returns cleanly, closing both sockets on the way out.
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install interrupt handler")?;

    let engine = ProbeEngine::new(config, destination, cancel.clone()).map_err(|e| {
        if matches!(e, TraceError::SocketCreation { .. }) {
            anyhow::anyhow!(
                "{}\n\nRaw sockets require elevated privileges. \
                 Run with sudo, or grant the binary CAP_NET_RAW.",
                e
            )
        } else {
            anyhow::Error::new(e)
        }
    })?;

    engine.run()?;

    if cancel.load(Ordering::SeqCst) {
        // Interrupt is a normal, clean stop
        println!();
    }

    Ok(())
}

/// Resolve a hostname or dotted-quad to the session's IPv4 destination.
fn resolve_target(host: &str) -> Result<Ipv4Addr, TraceError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let addrs = format!("{}:0", host)
        .to_socket_addrs()
        .map_err(|e| TraceError::Resolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| TraceError::Resolution {
            host: host.to_string(),
            reason: "no IPv4 address found".to_string(),
        })
}
