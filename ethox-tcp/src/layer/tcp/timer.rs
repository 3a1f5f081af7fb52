//! The periodic timers.
//!
//! There is no clock inside the engine. The owner calls [`fast_periodic_processing`]
//! `fast_timer_rate` times per second, every timer of a socket counts these ticks. The slow timer
//! runs once per second from within the fast one and drives keepalive.
//!
//! When several timeouts of a socket are due at once the first that applies wins: exhausted
//! retries reset the connection, then the SYN is repeated, then data is retransmitted or the
//! window probed, then the FIN is repeated, and last TIME_WAIT ends.
//!
//! [`fast_periodic_processing`]: struct.Endpoint.html#method.fast_periodic_processing
use crate::layer::ip::Ip;

use super::endpoint::{Context, Endpoint, Signals};
use super::socket::{Socket, SocketKey, State};

impl Endpoint<'_> {
    /// Advance the fast timer by one tick.
    ///
    /// Sends delayed acknowledgements, retransmits, repeats SYN and FIN, probes closed windows
    /// and ends TIME_WAIT. Also completes deferred cleanups of suspended callers.
    pub fn fast_periodic_processing<I: Ip + ?Sized>(&mut self, ip: &mut I) {
        self.ticks += 1;
        self.deferred_cleanup_check(ip);

        let mut walk = self.created.walk();
        while let Some(key) = walk.next(&self.sockets) {
            let socket = SocketKey(key);
            let signals = match self.split(ip, socket) {
                Some((entry, mut cx)) => entry.fast_tick(&mut cx),
                None => continue,
            };
            self.apply(ip, socket, signals);
        }

        self.slow_countdown = self.slow_countdown.saturating_sub(1);
        if self.slow_countdown == 0 {
            self.slow_countdown = self.config.fast_timer_rate.max(1);
            self.slow_periodic_processing(ip);
        }
    }

    /// Advance the slow timer by one second.
    ///
    /// Called by `fast_periodic_processing`, only call this directly if the fast timer is not
    /// used.
    pub fn slow_periodic_processing<I: Ip + ?Sized>(&mut self, ip: &mut I) {
        let mut walk = self.created.walk();
        while let Some(key) = walk.next(&self.sockets) {
            let socket = SocketKey(key);
            let signals = match self.split(ip, socket) {
                Some((entry, mut cx)) => entry.slow_tick(&mut cx),
                None => continue,
            };
            self.apply(ip, socket, signals);
        }
    }
}

impl Socket {
    pub(crate) fn fast_tick<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>) -> Signals {
        let mut signals = Signals::default();

        if self.timer.delayed_ack > 0 {
            self.timer.delayed_ack -= 1;
            if self.timer.delayed_ack == 0
                && self.state.is_synchronized()
                && self.recv.acked != self.recv.next
            {
                let seq = self.send.next;
                self.send_ack(cx, seq);
            }
        }

        if self.timer.timeout == 0 {
            return signals;
        }
        self.timer.timeout -= 1;
        if self.timer.timeout > 0 {
            return signals;
        }

        let exhausted = self.timer.retries >= self.timer.max_retries;
        match self.state {
            State::SynSent | State::SynReceived => {
                if exhausted {
                    net_debug!("tcp: {} handshake timed out", self.port);
                    return self.reset(cx, true);
                }
                self.timer.retries += 1;
                self.timer.timeout = self.backoff(self.timer.retries);
                let seq = self.send.next - 1;
                self.send_syn(cx, seq);
            },
            State::TimeWait => {
                net_trace!("tcp: {} time wait over", self.port);
                self.cleanup(cx.ip.pool());
                signals.closed = true;
            },
            _ if !self.sent.is_empty() || self.probe.has_data => {
                let exhausted = if self.send.window == 0 {
                    self.probe.failures >= self.timer.max_retries
                } else {
                    exhausted
                };
                if exhausted {
                    net_debug!("tcp: {} retransmissions exhausted", self.port);
                    return self.reset(cx, true);
                }
                self.retransmit_timeout(cx);
            },
            State::FinWait1 | State::Closing | State::LastAck if !self.fin.acked => {
                if exhausted {
                    net_debug!("tcp: {} fin not acknowledged", self.port);
                    return self.reset(cx, true);
                }
                self.timer.retries += 1;
                self.timer.timeout = self.backoff(self.timer.retries);
                let seq = self.send.next - 1;
                self.send_fin(cx, seq);
            },
            _ => (),
        }

        signals
    }

    /// Keepalive, RFC 1122 4.2.3.6.
    ///
    /// The probe is an acknowledgement with a sequence number the peer has already seen, which
    /// it must answer.
    pub(crate) fn slow_tick<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>) -> Signals {
        if !self.keepalive.enabled || self.state != State::Established || self.keepalive.timeout == 0 {
            return Signals::default();
        }

        self.keepalive.timeout -= 1;
        if self.keepalive.timeout > 0 {
            return Signals::default();
        }

        if self.keepalive.retries >= cx.config.keepalive_retries {
            net_debug!("tcp: {} keepalive unanswered, resetting", self.port);
            return self.reset(cx, true);
        }

        net_trace!("tcp: {} keepalive probe {}", self.port, self.keepalive.retries);
        let seq = self.send.next - 1;
        self.send_ack(cx, seq);
        self.keepalive.retries += 1;
        self.keepalive.timeout = cx.config.keepalive_retry;
        Signals::default()
    }
}
