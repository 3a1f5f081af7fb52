//! The connection state machine.
//!
//! Processing of a segment that matched a socket, in the order of RFC 793 section 3.9: the
//! handshake states first, then the acceptability test of the sequence number, reset and
//! synchronize bits, the acknowledgement, data and finally the FIN. Resets and synchronize bits
//! within the window are answered with a challenge acknowledgement, RFC 5961.
//!
//! The acknowledgement processing also drives NewReno congestion control, RFC 5681 and RFC 6582:
//! slow start, congestion avoidance, fast retransmit on the third duplicate acknowledgement and
//! fast recovery until everything outstanding at the time is acknowledged.
use crate::layer::buffer::{BufferKey, Pool, QueueState};
use crate::layer::ip::Ip;
use crate::wire::TcpRepr;

use super::endpoint::{Context, Signals};
use super::server::default_mss;
use super::socket::{Socket, State};

impl Socket {
    /// Process a segment for this connection.
    ///
    /// Takes ownership of the buffer, which holds the whole segment. It is either queued as
    /// received data or released.
    pub(crate) fn process<I: Ip + ?Sized>(
        &mut self,
        cx: &mut Context<I>,
        buffer: BufferKey,
        repr: &TcpRepr,
    ) -> Signals {
        let mut signals = Signals::default();
        if !self.process_inner(cx, buffer, repr, &mut signals) {
            cx.ip.pool().release(buffer);
        }
        signals
    }

    /// Returns whether the buffer was kept.
    fn process_inner<I: Ip + ?Sized>(
        &mut self,
        cx: &mut Context<I>,
        buffer: BufferKey,
        repr: &TcpRepr,
        signals: &mut Signals,
    ) -> bool {
        match self.state {
            State::Closed | State::Listen => return false,
            State::SynSent => {
                self.syn_sent(cx, repr, signals);
                return false;
            },
            _ => (),
        }

        if self.keepalive.enabled && self.state == State::Established {
            self.keepalive.timeout = cx.config.keepalive_initial;
            self.keepalive.retries = 0;
        }

        // The peer lost our SYN/ACK and repeats its SYN.
        if self.state == State::SynReceived
            && repr.flags.syn()
            && repr.ack_number.is_none()
            && repr.seq_number + 1 == self.recv.next
        {
            let seq = self.send.next - 1;
            self.send_syn(cx, seq);
            return false;
        }

        if !self.acceptable(repr) {
            net_trace!("tcp: {} unacceptable {}", self.port, repr);
            if !repr.flags.rst() {
                let seq = self.send.next;
                self.send_ack(cx, seq);
            }
            return false;
        }

        if repr.flags.rst() {
            if repr.seq_number == self.recv.next {
                net_trace!("tcp: {} reset by peer in {:?}", self.port, self.state);
                *signals = self.reset(cx, false);
            } else {
                let seq = self.send.next;
                self.send_ack(cx, seq);
            }
            return false;
        }

        if repr.flags.syn() {
            net_trace!("tcp: {} challenge ack for syn", self.port);
            let seq = self.send.next;
            self.send_ack(cx, seq);
            return false;
        }

        let ack = match repr.ack_number {
            Some(ack) => ack,
            None => return false,
        };

        if self.state == State::SynReceived {
            if ack != self.send.next {
                // Stale or forged, also clears a half-open connection of the peer.
                net_trace!("tcp: {} bad ack {} in syn received", self.port, ack);
                self.send_rst(cx, ack, false);
                return false;
            }
            self.establish(cx, repr, true, signals);
        }

        if !self.ack_check(cx, repr, signals) {
            return false;
        }

        if self.fin.acked {
            match self.state {
                State::FinWait1 => {
                    self.state = State::FinWait2;
                    self.timer.timeout = 0;
                    net_trace!("tcp: {} fin acked, fin wait 2", self.port);
                },
                State::Closing => self.enter_time_wait(cx, signals),
                State::LastAck if repr.seq_number == self.recv.next => {
                    net_trace!("tcp: {} last ack, closed", self.port);
                    self.cleanup(cx.ip.pool());
                    signals.closed = true;
                    return false;
                },
                _ => (),
            }
        }

        if repr.flags.urg() {
            signals.urgent = true;
        }

        let kept = match self.state {
            State::Established | State::FinWait1 | State::FinWait2 => {
                self.data_check(cx, buffer, repr, signals)
            },
            _ => false,
        };

        if self.fin.received && !self.state.peer_closed() && self.recv.next == self.fin.sequence {
            self.recv.next += 1;
            self.state = match self.state {
                State::Established => State::CloseWait,
                State::FinWait1 => State::Closing,
                State::FinWait2 => State::TimeWait,
                other => other,
            };
            net_trace!("tcp: {} fin received, now {:?}", self.port, self.state);
            let seq = self.send.next;
            self.send_ack(cx, seq);
            signals.peer_closed = true;
            if self.state == State::TimeWait {
                self.enter_time_wait(cx, signals);
            }
        }

        self.transmit_check(signals);
        kept
    }

    /// The acceptability test of RFC 793, page 69.
    fn acceptable(&self, repr: &TcpRepr) -> bool {
        let window = self.recv.window as i64;
        let start = i64::from(repr.seq_number - self.recv.next);
        let len = repr.sequence_len() as i64;
        let in_window = |offset: i64| offset >= 0 && offset < window;

        match (len, window) {
            (0, 0) => start == 0,
            (0, _) => in_window(start),
            (_, 0) => false,
            (_, _) => in_window(start) || in_window(start + len - 1),
        }
    }

    /// Handle a segment answering our SYN.
    fn syn_sent<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>, repr: &TcpRepr, signals: &mut Signals) {
        if let Some(ack) = repr.ack_number {
            if ack != self.send.next {
                if !repr.flags.rst() {
                    self.send_rst(cx, ack, false);
                }
                return;
            }
        }

        if repr.flags.rst() {
            if repr.ack_number.is_some() {
                net_trace!("tcp: {} connection refused", self.port);
                *signals = self.reset(cx, false);
            }
            return;
        }

        if !repr.flags.syn() {
            return;
        }

        self.recv.next = repr.seq_number + 1;
        self.recv.acked = repr.seq_number;
        self.mss.peer = match repr.max_seg_size {
            Some(mss) if mss != 0 => u32::from(mss),
            _ => default_mss(self.peer.version()),
        };
        if self.mss.connect == 0 || self.mss.connect > self.mss.peer {
            self.mss.connect = self.mss.peer;
        }
        self.mss.connect2 = self.mss.connect.saturating_mul(self.mss.connect);
        self.send.offered_scale = repr.window_scale;

        if repr.ack_number.is_some() {
            self.establish(cx, repr, false, signals);
            let seq = self.send.next;
            self.send_ack(cx, seq);
        } else {
            // Simultaneous open.
            self.state = State::SynReceived;
            self.timer.timeout = self.timer.rate;
            self.timer.retries = 0;
            let seq = self.send.next - 1;
            self.send_syn(cx, seq);
        }
    }

    /// Complete the handshake.
    ///
    /// The window of a segment carrying SYN is never scaled. If the peer did not offer window
    /// scaling neither side scales and our window is limited to the 16-bit field.
    fn establish<I: Ip + ?Sized>(
        &mut self,
        cx: &mut Context<I>,
        repr: &TcpRepr,
        scaled: bool,
        signals: &mut Signals,
    ) {
        match self.send.offered_scale {
            Some(scale) if cx.config.window_scaling => self.send.scale = scale,
            _ => {
                self.send.scale = 0;
                self.recv.scale = 0;
                self.recv.window = self.recv.window.min(0xFFFF);
                self.recv.window_last_sent = self.recv.window_last_sent.min(0xFFFF);
            },
        }

        let window = u32::from(repr.window_len);
        self.send.window = if scaled { window << self.send.scale } else { window };

        // RFC 3390, a single segment after the SYN had to be repeated.
        let mss = self.mss.connect;
        self.flow.congestion_window = if self.timer.retries > 0 {
            mss
        } else {
            let mut initial = 4 * mss;
            if mss > 1095 {
                initial -= mss;
            }
            if mss > 2190 {
                initial -= mss;
            }
            initial
        };
        self.flow.ssthresh = self.send.window.max(2 * mss);

        self.state = State::Established;
        self.timer.timeout = 0;
        self.timer.retries = 0;
        if self.keepalive.enabled {
            self.keepalive.timeout = cx.config.keepalive_initial;
            self.keepalive.retries = 0;
        }
        signals.established = true;
        net_trace!("tcp: {} established with {}:{}, mss {}", self.port, self.peer, self.peer_port, mss);
    }

    fn enter_time_wait<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>, signals: &mut Signals) {
        self.state = State::TimeWait;
        self.timer.timeout = cx.config.time_wait_ticks().max(1);
        self.timer.retries = 0;
        signals.time_wait = true;
        net_trace!("tcp: {} time wait", self.port);
    }

    /// Process the acknowledgement of a segment.
    ///
    /// Releases acknowledged segments, updates the congestion window and the peer's window.
    /// Returns `false` when the segment must be dropped because it acknowledges data we never
    /// sent.
    pub(crate) fn ack_check<I: Ip + ?Sized>(
        &mut self,
        cx: &mut Context<I>,
        repr: &TcpRepr,
        signals: &mut Signals,
    ) -> bool {
        let ack = match repr.ack_number {
            Some(ack) => ack,
            None => return false,
        };
        let seq = repr.seq_number;
        let mss = self.mss.connect;

        let mut ending_tx = self.send.next;
        if self.probe.has_data {
            ending_tx += 1;
        }
        let unsent_fin = if self.fin.sent { 1 } else { 0 };
        let starting_tx = self.send.next - unsent_fin - self.send.outstanding as usize;
        let ending_rx = {
            let pool = cx.ip.pool();
            match self.received.back() {
                Some(tail) => {
                    let descriptor = pool.descriptor(tail);
                    descriptor.sequence + descriptor.data_len
                },
                None => self.recv.next,
            }
        };

        let mut count = 0;
        if ack == ending_tx {
            count = self.sent.len();
            if self.probe.has_data {
                // The peer took the probe byte. The sender resends its buffer past that byte,
                // which probes again with the next one while the window stays closed.
                self.probe.has_data = false;
                self.probe.accepted = true;
                self.send.next += 1;
                signals.transmit = true;
            }
            if self.fin.sent {
                self.fin.acked = true;
            }
        } else {
            let head_done = match self.sent.front() {
                Some(head) => cx.ip.pool().descriptor(head).link.state == QueueState::TxDone,
                None => false,
            };
            if head_done && ack == starting_tx && repr.payload_len == 0 {
                self.flow.duplicate_acks += 1;
                if self.flow.duplicate_acks == 3 {
                    let recover_passed = ack - 1 > self.flow.recover;
                    let recent = self.flow.congestion_window > mss
                        && ack - self.flow.previous_highest_ack < (4 * mss) as i32;
                    if recover_passed || recent {
                        self.retransmit(cx, true);
                    }
                } else if self.flow.duplicate_acks > 3 && self.flow.fast_recovery {
                    self.flow.congestion_window += mss;
                }
            }

            let pool = cx.ip.pool();
            let mut next = self.sent.front();
            while let Some(segment) = next {
                let descriptor = pool.descriptor(segment);
                let end = descriptor.sequence + descriptor.data_len;
                if end <= ack && ack <= ending_tx {
                    count += 1;
                    next = descriptor.link.next;
                } else {
                    break;
                }
            }
        }

        if count == 0 {
            if ack > ending_tx {
                net_trace!("tcp: {} ack {} for unsent data", self.port, ack);
                let seq = self.send.next;
                self.send_ack(cx, seq);
                return false;
            }
            if ack == ending_tx && self.recv.window == 0 && seq == self.recv.next {
                let seq = self.send.next;
                self.send_ack(cx, seq);
            }
        } else {
            if self.flow.fast_recovery && ack > self.flow.recover {
                self.flow.fast_recovery = false;
                self.flow.congestion_window = self.flow.ssthresh;
            }
            if self.flow.recover < ack - 2 {
                self.flow.recover = ack - 2;
            }
            self.flow.duplicate_acks = 0;
            self.flow.previous_highest_ack = starting_tx;

            let acked = (ack - starting_tx).max(0) as u32;
            if self.flow.fast_recovery {
                // Partial acknowledgement, deflate by the newly acknowledged data.
                self.flow.congestion_window = self.flow.congestion_window.saturating_sub(acked);
                if acked > mss {
                    self.flow.congestion_window += mss;
                }
            } else if self.flow.congestion_window >= self.flow.ssthresh {
                let growth = self.mss.connect2 / self.flow.congestion_window.max(1);
                self.flow.congestion_window += growth.max(1);
            } else {
                self.flow.congestion_window += acked.min(mss);
            }
        }

        let window = u32::from(repr.window_len) << self.send.scale;
        if (ack > starting_tx && ack <= ending_tx)
            || seq > ending_rx
            || (seq == ending_rx && ack >= starting_tx)
        {
            if window > self.send.window {
                signals.window_update = true;
            }
            self.send.window = window;
        }

        if self.send.window <= self.send.outstanding && ack >= self.probe.sequence {
            self.probe.failures = 0;
        }

        if count == 0 {
            return true;
        }

        let before = self.sent.len();
        let queue_max = self.send.queue_max;
        self.release_acked(cx.ip.pool(), count);
        if before >= queue_max && self.sent.len() < queue_max {
            signals.queue_depth = true;
        }

        if !self.sent.is_empty() {
            self.timer.timeout = self.timer.rate;
            self.timer.retries = 0;
        } else {
            match self.state {
                State::FinWait1 | State::Closing | State::LastAck => {
                    self.timer.timeout = self.timer.rate;
                    self.timer.retries = 0;
                },
                _ if self.send.window != 0 => self.timer.timeout = 0,
                _ => (),
            }
        }

        if self.flow.fast_recovery {
            self.retransmit(cx, false);
        }
        true
    }

    /// Wake senders once they could make progress.
    fn transmit_check(&self, signals: &mut Signals) {
        match self.state {
            State::Established | State::CloseWait => (),
            _ => return,
        }
        if self.transmit_window() > 0 && self.sent.len() < self.send.queue_max {
            signals.transmit = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{TcpFlags, TcpSeqNumber};

    fn segment(seq: i32, len: usize, flags: TcpFlags) -> TcpRepr {
        TcpRepr {
            src_port: 80,
            dst_port: 49152,
            flags,
            seq_number: TcpSeqNumber(seq),
            ack_number: None,
            window_len: 0,
            window_scale: None,
            max_seg_size: None,
            payload_len: len,
        }
    }

    #[test]
    fn acceptability() {
        let mut socket = Socket::default();
        socket.recv.next = TcpSeqNumber(1000);
        socket.recv.window = 100;

        assert!(socket.acceptable(&segment(1000, 0, TcpFlags::default())));
        assert!(socket.acceptable(&segment(1099, 0, TcpFlags::default())));
        assert!(!socket.acceptable(&segment(1100, 0, TcpFlags::default())));
        assert!(!socket.acceptable(&segment(999, 0, TcpFlags::default())));
        // Overlaps the left edge.
        assert!(socket.acceptable(&segment(990, 20, TcpFlags::default())));
        assert!(!socket.acceptable(&segment(980, 20, TcpFlags::default())));
        // A FIN occupies sequence space.
        assert!(!socket.acceptable(&segment(999, 0, TcpFlags::FIN)));
        assert!(socket.acceptable(&segment(1000, 0, TcpFlags::FIN)));

        socket.recv.window = 0;
        assert!(socket.acceptable(&segment(1000, 0, TcpFlags::default())));
        assert!(!socket.acceptable(&segment(1000, 1, TcpFlags::default())));
    }
}
