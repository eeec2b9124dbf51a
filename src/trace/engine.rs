//! The probe engine: sockets, the send/receive loop, and hop output.
//!
//! Exactly one probe is outstanding at any time. The only suspension
//! point is the bounded receive on the raw ICMP socket, so hop lines come
//! out strictly in increasing TTL order: the loop never moves to the
//! next TTL until the current one is resolved, exhausted, or terminal.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use socket2::Socket;

use crate::config::Config;
use crate::error::TraceError;
use crate::probe::correlate::correlate_reply;
use crate::probe::socket::{create_raw_icmp_socket, create_udp_send_socket, recv_reply};
use crate::probe::udp::{build_probe_payload, send_probe};
use crate::state::session::{HopEvent, Session, TraceState};

/// Drives one trace session over a pair of exclusively owned sockets.
///
/// Both sockets live for the whole session and are closed on every exit
/// path by drop, including operator interrupt.
pub struct ProbeEngine {
    config: Config,
    send_socket: Socket,
    recv_socket: Socket,
    session: Session,
    cancel: Arc<AtomicBool>,
}

impl ProbeEngine {
    /// Open both sockets and set up the session. Socket creation failures
    /// are fatal pre-flight errors (usually missing privileges for the
    /// raw socket).
    pub fn new(
        config: Config,
        destination: std::net::Ipv4Addr,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, TraceError> {
        let send_socket = create_udp_send_socket()?;
        let recv_socket = create_raw_icmp_socket(config.timeout)?;
        let session = Session::new(destination, &config);
        Ok(Self {
            config,
            send_socket,
            recv_socket,
            session,
            cancel,
        })
    }

    /// Run the probe loop to a terminal state (or interrupt), printing
    /// one line per resolved hop as it happens.
    ///
    /// Send failures and non-timeout receive failures abort the session;
    /// everything the correlator rejects is logged and discarded while
    /// the current probe stays outstanding.
    pub fn run(mut self) -> Result<Session, TraceError> {
        let payload = build_probe_payload(std::process::id());
        let destination = self.session.destination();

        while !self.session.is_done() {
            if self.cancel.load(Ordering::SeqCst) {
                debug!("interrupted at ttl={}", self.session.ttl());
                return Ok(self.session);
            }

            // Probing: one send, TTL threaded explicitly into this probe
            let dest_addr = SocketAddrV4::new(destination, self.session.dst_port());
            let src_port = send_probe(
                &self.send_socket,
                dest_addr,
                &payload,
                self.session.ttl(),
            )?;
            let probe = self.session.begin_probe(src_port);

            // WaitingReply: consume packets until this probe is resolved
            // or the timeout fires. The read timeout re-arms per call.
            while self.session.state() == TraceState::WaitingReply {
                if self.cancel.load(Ordering::SeqCst) {
                    debug!("interrupted at ttl={}", probe.ttl);
                    return Ok(self.session);
                }

                let reply = match recv_reply(&self.recv_socket) {
                    Ok(reply) => reply,
                    Err(TraceError::Timeout) => {
                        debug!(
                            "timeout {} at hop ttl={}",
                            self.session.retries(),
                            probe.ttl
                        );
                        if let Some(event) = self.session.on_timeout() {
                            print_event(event);
                        }
                        break;
                    }
                    Err(e) => return Err(e),
                };

                if let Some(from) = reply.from {
                    debug!("received {} bytes from {}", reply.bytes.len(), from);
                } else {
                    debug!("received {} bytes", reply.bytes.len());
                }

                match correlate_reply(&reply.bytes, destination, probe.src_port) {
                    Ok(verdict) => {
                        if let Some(event) = self.session.on_verdict(verdict) {
                            print_event(event);
                        }
                        // SourcePortMismatch: stale or foreign reply,
                        // keep waiting without touching the retry counter
                    }
                    Err(e) if e.is_recoverable() => {
                        debug!("discarding reply: {}", e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if self.session.state() == TraceState::Aborted {
            println!(
                "Gave up after {} hops without reaching {}",
                self.config.max_ttl, destination
            );
        }

        Ok(self.session)
    }
}

/// Emit one line of hop output for a session event.
fn print_event(event: HopEvent) {
    match event {
        HopEvent::Resolved { ttl, responder } => println!("{:>2}    {}", ttl, responder),
        HopEvent::Unanswered { ttl } => println!("{:>2}    *", ttl),
        HopEvent::Reached { ttl, responder } => {
            println!("Reached destination {} at ttl={}", responder, ttl)
        }
    }
}
