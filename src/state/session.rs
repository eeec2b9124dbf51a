//! Session state machine for one trace run.
//!
//! The session is the single owner of all probe state: current TTL,
//! current destination port, the outstanding probe, and the retry
//! counter. It never touches a socket; the engine feeds it verdicts and
//! timeouts and acts on the events it hands back, which keeps the whole
//! TTL progression testable without network access.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::probe::correlate::Verdict;

/// One in-flight probe. Created immediately before the send, consulted at
/// correlation time, discarded once its TTL is resolved.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub ttl: u8,
    pub dst_port: u16,
    /// OS-assigned ephemeral port, read back after the send; the sole
    /// correlation key for this probe.
    pub src_port: u16,
    pub sent_at: Instant,
}

/// Probe loop states. `Reached` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    /// A probe for the current TTL needs to be sent.
    Probing,
    /// A probe is outstanding; replies are being awaited.
    WaitingReply,
    /// A reply arrived from the destination address itself.
    Reached,
    /// The TTL bound was exhausted without reaching the destination.
    Aborted,
}

/// A resolved TTL level. `responder` is `None` when the retry budget was
/// exhausted without a matching reply.
#[derive(Debug, Clone, Copy)]
pub struct Hop {
    pub ttl: u8,
    pub responder: Option<Ipv4Addr>,
    pub rtt: Option<Duration>,
}

/// What the session decided in response to one input; the engine turns
/// these into output lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopEvent {
    /// A router answered for this TTL.
    Resolved { ttl: u8, responder: Ipv4Addr },
    /// Retry budget exhausted; the hop is recorded without a responder.
    Unanswered { ttl: u8 },
    /// The destination itself answered; the session is done.
    Reached { ttl: u8, responder: Ipv4Addr },
}

/// Exclusive owner of the trace state for one destination.
#[derive(Debug)]
pub struct Session {
    destination: Ipv4Addr,
    state: TraceState,
    ttl: u8,
    dst_port: u16,
    retries: u32,
    retry_budget: u32,
    max_ttl: u8,
    outstanding: Option<Probe>,
    hops: Vec<Hop>,
}

impl Session {
    pub fn new(destination: Ipv4Addr, config: &Config) -> Self {
        Self {
            destination,
            state: TraceState::Probing,
            ttl: 1,
            dst_port: config.base_port,
            retries: 0,
            retry_budget: config.retry_budget,
            max_ttl: config.max_ttl,
            outstanding: None,
            hops: Vec::new(),
        }
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, TraceState::Reached | TraceState::Aborted)
    }

    /// TTL of the probe being worked on.
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Destination port for the next probe; advances together with the
    /// TTL so every hop uses a fresh, distinguishable port pair.
    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn outstanding(&self) -> Option<&Probe> {
        self.outstanding.as_ref()
    }

    /// Hops resolved so far, strictly in TTL order.
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Record that a probe went out with the given source port and enter
    /// `WaitingReply`.
    pub fn begin_probe(&mut self, src_port: u16) -> Probe {
        debug_assert_eq!(self.state, TraceState::Probing);
        let probe = Probe {
            ttl: self.ttl,
            dst_port: self.dst_port,
            src_port,
            sent_at: Instant::now(),
        };
        self.outstanding = Some(probe);
        self.state = TraceState::WaitingReply;
        probe
    }

    /// A receive timed out while waiting for the outstanding probe.
    ///
    /// Returns `None` while retries remain (the engine re-sends the same
    /// TTL), or `Unanswered` once the budget is spent and the hop has
    /// been recorded without a responder.
    pub fn on_timeout(&mut self) -> Option<HopEvent> {
        debug_assert_eq!(self.state, TraceState::WaitingReply);
        self.retries += 1;
        if self.retries < self.retry_budget {
            self.state = TraceState::Probing;
            return None;
        }

        let ttl = self.ttl;
        self.hops.push(Hop {
            ttl,
            responder: None,
            rtt: None,
        });
        self.advance();
        Some(HopEvent::Unanswered { ttl })
    }

    /// Apply a correlation verdict for a received packet.
    ///
    /// A source-port mismatch yields `None`: the packet was stale or
    /// foreign, the probe stays outstanding, and the retry counter is
    /// untouched.
    pub fn on_verdict(&mut self, verdict: Verdict) -> Option<HopEvent> {
        debug_assert_eq!(self.state, TraceState::WaitingReply);
        match verdict {
            Verdict::DestinationReached { responder } => {
                let ttl = self.ttl;
                self.outstanding = None;
                self.state = TraceState::Reached;
                Some(HopEvent::Reached { ttl, responder })
            }
            Verdict::HopMatched { responder } => {
                let ttl = self.ttl;
                let rtt = self.outstanding.map(|p| p.sent_at.elapsed());
                self.hops.push(Hop {
                    ttl,
                    responder: Some(responder),
                    rtt,
                });
                self.advance();
                Some(HopEvent::Resolved { ttl, responder })
            }
            Verdict::SourcePortMismatch => None,
        }
    }

    /// Move to the next TTL level, or abort once the bound is exhausted.
    /// TTL only ever grows by exactly one per resolved hop.
    fn advance(&mut self) {
        self.outstanding = None;
        self.retries = 0;
        if self.ttl >= self.max_ttl {
            self.state = TraceState::Aborted;
        } else {
            self.ttl += 1;
            self.dst_port += 1;
            self.state = TraceState::Probing;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Session {
        let config = Config {
            max_ttl: 64,
            base_port: 33435,
            retry_budget: 3,
            ..Config::default()
        };
        Session::new(Ipv4Addr::new(8, 8, 8, 8), &config)
    }

    #[test]
    fn test_new_session_starts_probing_at_ttl_1() {
        let session = test_session();
        assert_eq!(session.state(), TraceState::Probing);
        assert_eq!(session.ttl(), 1);
        assert_eq!(session.dst_port(), 33435);
        assert!(session.outstanding().is_none());
    }

    #[test]
    fn test_hop_match_advances_ttl_and_port_by_one() {
        let mut session = test_session();
        session.begin_probe(60001);
        let event = session.on_verdict(Verdict::HopMatched {
            responder: Ipv4Addr::new(192, 168, 1, 1),
        });
        assert_eq!(
            event,
            Some(HopEvent::Resolved {
                ttl: 1,
                responder: Ipv4Addr::new(192, 168, 1, 1)
            })
        );
        assert_eq!(session.ttl(), 2);
        assert_eq!(session.dst_port(), 33436);
        assert_eq!(session.retries(), 0);
        assert_eq!(session.state(), TraceState::Probing);
        assert_eq!(session.hops().len(), 1);
        assert!(session.hops()[0].rtt.is_some());
    }

    #[test]
    fn test_mismatch_leaves_probe_outstanding() {
        let mut session = test_session();
        session.begin_probe(60001);
        // One timeout burns a retry first
        assert!(session.on_timeout().is_none());
        session.begin_probe(60002);

        assert!(session.on_verdict(Verdict::SourcePortMismatch).is_none());
        assert_eq!(session.state(), TraceState::WaitingReply);
        assert_eq!(session.ttl(), 1);
        // The stale packet must not reset the retry counter either
        assert_eq!(session.retries(), 1);
    }

    #[test]
    fn test_retry_budget_then_unanswered_hop() {
        let mut session = test_session();

        // Two timeouts: retry, still at TTL 1
        for _ in 0..2 {
            session.begin_probe(60001);
            assert!(session.on_timeout().is_none());
            assert_eq!(session.state(), TraceState::Probing);
            assert_eq!(session.ttl(), 1);
        }

        // Third timeout exhausts the budget
        session.begin_probe(60001);
        assert_eq!(session.on_timeout(), Some(HopEvent::Unanswered { ttl: 1 }));
        assert_eq!(session.ttl(), 2);
        assert_eq!(session.dst_port(), 33436);
        assert_eq!(session.retries(), 0);
        assert!(session.hops()[0].responder.is_none());
    }

    #[test]
    fn test_destination_reached_is_terminal() {
        let mut session = test_session();
        session.begin_probe(60001);
        let dest = session.destination();
        let event = session.on_verdict(Verdict::DestinationReached { responder: dest });
        assert_eq!(
            event,
            Some(HopEvent::Reached {
                ttl: 1,
                responder: dest
            })
        );
        assert_eq!(session.state(), TraceState::Reached);
        assert!(session.is_done());
    }

    #[test]
    fn test_abort_at_max_ttl() {
        let config = Config {
            max_ttl: 3,
            ..Config::default()
        };
        let mut session = Session::new(Ipv4Addr::new(8, 8, 8, 8), &config);

        for expected_ttl in 1..=3u8 {
            assert_eq!(session.ttl(), expected_ttl);
            session.begin_probe(60000 + expected_ttl as u16);
            session.on_verdict(Verdict::HopMatched {
                responder: Ipv4Addr::new(10, 0, 0, expected_ttl),
            });
        }

        // TTL max_ttl itself was probed; only then does the session abort
        assert_eq!(session.state(), TraceState::Aborted);
        assert!(session.is_done());
        assert_eq!(session.hops().len(), 3);
    }

    #[test]
    fn test_ttl_strictly_monotonic() {
        let mut session = test_session();
        let mut last_ttl = 0u8;
        for i in 0..10 {
            assert_eq!(session.ttl(), last_ttl + 1);
            last_ttl = session.ttl();
            session.begin_probe(60000 + i);
            if i % 2 == 0 {
                session.on_verdict(Verdict::HopMatched {
                    responder: Ipv4Addr::new(10, 0, 0, 1),
                });
            } else {
                // Exhaust the budget through timeouts instead
                while session.on_timeout().is_none() {
                    session.begin_probe(61000 + i);
                }
            }
        }
    }
}
