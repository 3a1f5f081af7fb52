//! Building and sending segments.
//!
//! Every outgoing segment is assembled in a fresh buffer of the IP layer's pool, or for data
//! that can be sent in place, in the application's own buffer. The congestion control of RFC 5681
//! with the NewReno modification of RFC 6582 governs how much data may be in flight.
use crate::layer::{Error, Result};
use crate::layer::buffer::{BufferKey, Pool, QueueState};
use crate::layer::ip::{Ip, SendRequest};
use crate::wire::{IpAddress, IpVersion, TcpFlags, TcpPacket, TcpRepr, TcpSeqNumber};
use crate::wire::tcp::{HEADER_LEN, MAX_WINDOW_SCALE};

use super::endpoint::Context;
use super::socket::{Socket, State};

/// The largest header we emit, with MSS and window scale options.
const MAX_HEADER_LEN: usize = HEADER_LEN + 8;

/// The MSS we announce, derived from the interface MTU.
pub(crate) fn interface_mss(mtu: usize, version: Option<IpVersion>, custom: u16) -> u32 {
    let ip_header = match version {
        Some(IpVersion::Ipv6) => 40,
        _ => 20,
    };
    let mut mss = mtu.saturating_sub(ip_header + HEADER_LEN).min(0xFFFF) as u32;
    if custom != 0 && u32::from(custom) < mss {
        mss = u32::from(custom);
    }
    mss
}

/// The smallest shift so that a window fits into the 16-bit field.
pub(crate) fn window_scale_for(window: u32) -> u8 {
    let mut scale = 0;
    while scale < MAX_WINDOW_SCALE && (window >> scale) > 0xFFFF {
        scale += 1;
    }
    scale
}

/// Emit a segment into a fresh buffer and send it.
pub(crate) fn send_segment<I: Ip + ?Sized>(
    cx: &mut Context<I>,
    request: SendRequest,
    repr: &TcpRepr,
    data: &[u8],
) -> Result<()> {
    if request.source.version().is_none() || request.source.version() != request.destination.version() {
        return Err(Error::NoInterface);
    }

    let offload = cx.ip.interface(request.interface)
        .ok_or(Error::NoInterface)?
        .tx_checksum_offload;

    let pool = cx.ip.pool();
    let buffer = pool.allocate().ok_or(Error::AllocationFailed)?;
    let header_len = repr.header_len();
    if let Err(err) = pool.append(buffer, &[0; MAX_HEADER_LEN][..header_len])
        .and_then(|_| pool.append(buffer, data))
    {
        pool.release(buffer);
        return Err(err);
    }

    repr.emit(&mut TcpPacket::new_unchecked(pool.payload_mut(buffer)));
    finish(cx, buffer, request, offload);
    Ok(())
}

/// Fill the checksum and hand the segment to the IP layer.
fn finish<I: Ip + ?Sized>(
    cx: &mut Context<I>,
    buffer: BufferKey,
    request: SendRequest,
    offload: bool,
) {
    if !offload {
        let checksum = cx.ip.checksum(buffer, request.source, request.destination);
        TcpPacket::new_unchecked(cx.ip.pool().payload_mut(buffer)).set_checksum(checksum);
    }
    cx.ip.send(buffer, request);
}

/// Answer a segment that has no connection.
///
/// An acceptable reset, RFC 793: if the segment carried an ACK the reset takes its sequence
/// number from that, otherwise it acknowledges everything the segment occupied.
pub(crate) fn reset_stray<I: Ip + ?Sized>(
    cx: &mut Context<I>,
    segment: &TcpRepr,
    source: IpAddress,
    destination: IpAddress,
) {
    if segment.flags.rst() {
        return;
    }

    let route = match cx.ip.route(source) {
        Some(route) => route,
        None => return,
    };

    let (flags, seq_number, ack_number) = match segment.ack_number {
        Some(ack) => (TcpFlags::RST, ack, None),
        None => (TcpFlags::RST, TcpSeqNumber(0), Some(segment.seq_number + segment.sequence_len())),
    };

    let repr = TcpRepr {
        src_port: segment.dst_port,
        dst_port: segment.src_port,
        flags,
        seq_number,
        ack_number,
        window_len: 0,
        window_scale: None,
        max_seg_size: None,
        payload_len: 0,
    };

    let request = SendRequest {
        interface: route.interface,
        source: destination,
        destination: source,
        next_hop: route.next_hop,
        tos: 0,
        ttl: 128,
        fragment: true,
    };

    net_trace!("tcp: reset {}:{} <- {}", source, segment.src_port, repr);
    if send_segment(cx, request, &repr, &[]).is_err() {
        net_debug!("tcp: could not send reset to {}", source);
    }
}

impl Socket {
    pub(crate) fn request(&self) -> Result<SendRequest> {
        Ok(SendRequest {
            interface: self.interface.ok_or(Error::NoInterface)?,
            source: self.local,
            destination: self.peer,
            next_hop: self.next_hop,
            tos: self.tos,
            ttl: self.ttl,
            fragment: self.fragment,
        })
    }

    fn control(&self, flags: TcpFlags, seq_number: TcpSeqNumber) -> TcpRepr {
        TcpRepr {
            src_port: self.port,
            dst_port: self.peer_port,
            flags,
            seq_number,
            ack_number: Some(self.recv.next),
            window_len: self.window_field(),
            window_scale: None,
            max_seg_size: None,
            payload_len: 0,
        }
    }

    fn send_control<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>, repr: TcpRepr, data: &[u8]) {
        let request = match self.request() {
            Ok(request) => request,
            Err(_) => return,
        };

        match send_segment(cx, request, &repr, data) {
            Ok(()) => if repr.ack_number.is_some() {
                self.recv.acked = self.recv.next;
                self.recv.window_last_sent = self.recv.window;
                self.timer.delayed_ack = 0;
            },
            Err(err) => net_debug!("tcp: {} dropped {}: {}", self.port, repr, err),
        }
    }

    /// Acknowledge everything received so far.
    pub(crate) fn send_ack<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>, seq_number: TcpSeqNumber) {
        let repr = self.control(TcpFlags::default(), seq_number);
        self.send_control(cx, repr, &[]);
    }

    pub(crate) fn send_fin<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>, seq_number: TcpSeqNumber) {
        let repr = self.control(TcpFlags::FIN, seq_number);
        self.send_control(cx, repr, &[]);
    }

    /// Send a reset for the current connection.
    ///
    /// With `ack` the reset also acknowledges the received data, which makes it acceptable to a
    /// peer that has not yet seen our SYN.
    pub(crate) fn send_rst<I: Ip + ?Sized>(
        &mut self,
        cx: &mut Context<I>,
        seq_number: TcpSeqNumber,
        ack: bool,
    ) {
        let mut repr = self.control(TcpFlags::RST, seq_number);
        repr.window_len = 0;
        if !ack {
            repr.ack_number = None;
        }
        net_trace!("tcp: {} reset {}:{}", self.port, self.peer, self.peer_port);
        self.send_control(cx, repr, &[]);
    }

    /// Send the one byte of a zero window probe.
    pub(crate) fn send_probe<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>) {
        let mut repr = self.control(TcpFlags::default(), self.probe.sequence);
        repr.payload_len = 1;
        net_trace!("tcp: {} zero window probe at {}", self.port, self.probe.sequence);
        let data = [self.probe.data];
        self.send_control(cx, repr, &data);
    }

    /// Send our SYN, or SYN/ACK in SynReceived.
    ///
    /// Also settles the segment size of the connection: the MSS we announce is derived from the
    /// interface, and the connection never uses more than that.
    pub(crate) fn send_syn<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>, seq_number: TcpSeqNumber) {
        let interface = match self.interface.and_then(|id| cx.ip.interface(id)) {
            Some(interface) => interface,
            None => return,
        };

        let mss = interface_mss(interface.mtu, self.peer.version(), self.mss.custom);
        if self.mss.connect == 0 || self.mss.connect > mss {
            self.mss.connect = mss;
        }
        self.mss.connect2 = self.mss.connect.saturating_mul(self.mss.connect);

        let server = self.state == State::SynReceived;
        let window_scale = if cx.config.window_scaling && (!server || self.send.offered_scale.is_some()) {
            Some(self.recv.scale)
        } else {
            None
        };

        let repr = TcpRepr {
            src_port: self.port,
            dst_port: self.peer_port,
            flags: TcpFlags::SYN,
            seq_number,
            ack_number: if server { Some(self.recv.next) } else { None },
            window_len: self.recv.window.min(0xFFFF) as u16,
            window_scale,
            max_seg_size: Some(mss.min(0xFFFF) as u16),
            payload_len: 0,
        };

        self.flow.recover = seq_number;
        self.flow.previous_highest_ack = seq_number;
        net_trace!("tcp: {} syn {}", self.port, repr);
        self.send_control(cx, repr, &[]);
    }

    /// Send as much of an application buffer as the windows permit.
    ///
    /// Returns `true` when the whole buffer was consumed. Otherwise the buffer has been advanced
    /// past the data that was sent and the caller must wait for the window to open.
    pub(crate) fn send_data<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>, buffer: BufferKey)
        -> Result<bool>
    {
        let request = self.request()?;
        let offload = cx.ip.interface(request.interface)
            .ok_or(Error::NoInterface)?
            .tx_checksum_offload;

        loop {
            let window = self.transmit_window() as usize;
            if window == 0 || self.sent.len() >= self.send.queue_max {
                // A closed peer window is probed with the first pending byte.
                if self.send.window == 0 {
                    if !self.probe.has_data {
                        let first = cx.ip.pool().payload(buffer).first().cloned();
                        if let Some(data) = first {
                            self.probe.has_data = true;
                            self.probe.data = data;
                            self.probe.sequence = self.send.next;
                            self.probe.failures = 0;
                            self.probe.buffer = Some(buffer);
                        }
                    }
                    // The first probe goes out on the next tick, later ones back off.
                    if self.timer.timeout == 0 {
                        self.timer.timeout = 1;
                        self.timer.retries = 0;
                    }
                }
                return Ok(false);
            }

            let pool = cx.ip.pool();
            let len = pool.payload(buffer).len();
            let mut take = len.min(window);
            let segment = if take < len || !pool.in_place(buffer) {
                take = take.min(pool.capacity());
                copy_prefix(pool, buffer, take)?
            } else {
                buffer
            };

            if let Err(err) = pool.prepend(segment, HEADER_LEN) {
                if segment != buffer {
                    pool.release(segment);
                }
                return Err(err);
            }

            let repr = TcpRepr {
                payload_len: take,
                ..self.control(TcpFlags::PSH, self.send.next)
            };
            repr.emit(&mut TcpPacket::new_unchecked(pool.payload_mut(segment)));

            let descriptor = pool.descriptor_mut(segment);
            descriptor.sequence = self.send.next;
            descriptor.data_len = take;

            self.recv.acked = self.recv.next;
            self.recv.window_last_sent = self.recv.window;
            self.timer.delayed_ack = 0;
            self.send.next += take;
            self.probe.has_data = false;
            self.probe.buffer = None;

            if self.sent.is_empty() {
                self.timer.timeout = self.timer.rate;
                self.timer.retries = 0;
                self.send.outstanding = 0;
            }
            self.sent.push_back(pool, segment, QueueState::Enqueued);
            self.send.outstanding += take as u32;
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += take as u64;
            cx.info.packets_sent += 1;
            cx.info.bytes_sent += take as u64;

            finish(cx, segment, request, offload);

            if segment == buffer {
                return Ok(true);
            }

            let pool = cx.ip.pool();
            pool.advance(buffer, take);
            if pool.payload(buffer).is_empty() {
                pool.release(buffer);
                return Ok(true);
            }
        }
    }

    /// Resend segments at the head of the sent queue.
    ///
    /// With `fast` this enters fast recovery first, RFC 6582. Only segments the driver is done with
    /// can be resent. In fast recovery that is a single segment, otherwise up to one MSS.
    pub(crate) fn retransmit<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>, fast: bool) {
        let mss = self.mss.connect;
        if fast {
            self.flow.ssthresh = (self.send.outstanding / 2).max(2 * mss);
            self.flow.congestion_window = self.flow.ssthresh + 3 * mss;
            self.flow.fast_recovery = true;
            self.flow.recover = self.send.next - 1;
            net_trace!("tcp: {} fast retransmit, recover at {}", self.port, self.flow.recover);
        }

        let request = match self.request() {
            Ok(request) => request,
            Err(_) => return,
        };
        let offload = match cx.ip.interface(request.interface) {
            Some(interface) => interface.tx_checksum_offload,
            None => return,
        };

        let mut next = self.sent.front();
        let mut budget = mss as usize;
        let mut first = true;
        while let Some(segment) = next {
            let descriptor = *cx.ip.pool().descriptor(segment);
            if descriptor.link.state != QueueState::TxDone {
                break;
            }
            if !first && (self.flow.fast_recovery || descriptor.data_len > budget) {
                break;
            }

            next = descriptor.link.next;
            budget = budget.saturating_sub(descriptor.data_len);
            first = false;

            let repr = TcpRepr {
                payload_len: descriptor.data_len,
                ..self.control(TcpFlags::PSH, descriptor.sequence)
            };
            let pool = cx.ip.pool();
            {
                let mut packet = TcpPacket::new_unchecked(pool.payload_mut(segment));
                repr.emit(&mut packet);
            }
            pool.descriptor_mut(segment).link.state = QueueState::Enqueued;

            self.recv.acked = self.recv.next;
            self.recv.window_last_sent = self.recv.window;
            self.stats.retransmit_packets += 1;
            cx.info.retransmit_packets += 1;
            net_trace!("tcp: {} retransmit {}", self.port, repr);
            finish(cx, segment, request, offload);
        }
    }

    /// The retransmission timer expired with data outstanding.
    ///
    /// Probes a closed window, or collapses the congestion window and retransmits.
    pub(crate) fn retransmit_timeout<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>) {
        if self.send.window == 0 {
            if self.probe.has_data {
                self.send_probe(cx);
            } else if let Some(head) = self.sent.front() {
                // Window closed with data in flight, probe with its first byte.
                let pool = cx.ip.pool();
                let descriptor = *pool.descriptor(head);
                let data = pool.payload(head);
                if descriptor.data_len > 0 && data.len() > HEADER_LEN {
                    self.probe.data = data[HEADER_LEN];
                    self.probe.sequence = descriptor.sequence;
                    self.send_probe(cx);
                }
            }
            self.probe.failures += 1;
            let shift = self.probe.failures.min(self.timer.max_retries).min(16);
            self.timer.timeout = self.timer.rate.saturating_mul(1 << shift);
            return;
        }

        let mss = self.mss.connect;
        self.timer.retries += 1;
        self.timer.timeout = self.backoff(self.timer.retries);
        self.flow.ssthresh = (self.send.outstanding / 2).max(2 * mss);
        self.flow.congestion_window = mss;
        self.flow.fast_recovery = false;
        self.flow.duplicate_acks = 0;
        self.retransmit(cx, false);
    }

    /// Drop acknowledged segments from the sent queue.
    ///
    /// Segments still held by the driver are only unlinked, the driver releases them.
    pub(crate) fn release_acked<P: Pool + ?Sized>(&mut self, pool: &mut P, count: usize) {
        for _ in 0..count {
            let head = match self.sent.front() {
                Some(head) => head,
                None => break,
            };
            let descriptor = *pool.descriptor(head);
            self.sent.pop_front(pool);
            self.send.outstanding = self.send.outstanding.saturating_sub(descriptor.data_len as u32);
            if descriptor.link.state != QueueState::Enqueued {
                pool.release(head);
            }
        }
    }
}

/// Copy the first `len` bytes of a buffer into a new one.
fn copy_prefix<P: Pool + ?Sized>(pool: &mut P, source: BufferKey, len: usize) -> Result<BufferKey> {
    let segment = pool.allocate().ok_or(Error::AllocationFailed)?;
    let mut chunk = [0u8; 128];
    let mut copied = 0;
    while copied < len {
        let step = (len - copied).min(chunk.len());
        chunk[..step].copy_from_slice(&pool.payload(source)[copied..copied + step]);
        if let Err(err) = pool.append(segment, &chunk[..step]) {
            pool.release(segment);
            return Err(err);
        }
        copied += step;
    }
    Ok(segment)
}

/// Sum of the data bytes in a queue of sent segments.
#[cfg(test)]
pub(crate) fn queued_bytes<P: Pool + ?Sized>(pool: &P, queue: &crate::layer::buffer::BufferQueue)
    -> usize
{
    use crate::layer::buffer::BufferQueue;
    let mut total = 0;
    let mut next = queue.front();
    while let Some(buffer) = next {
        total += pool.descriptor(buffer).data_len;
        next = BufferQueue::next_of(pool, buffer);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announced_mss() {
        assert_eq!(interface_mss(1500, Some(IpVersion::Ipv4), 0), 1460);
        assert_eq!(interface_mss(1500, Some(IpVersion::Ipv6), 0), 1440);
        assert_eq!(interface_mss(1500, Some(IpVersion::Ipv4), 536), 536);
        assert_eq!(interface_mss(1500, Some(IpVersion::Ipv4), 9000), 1460);
        assert_eq!(interface_mss(100_000, Some(IpVersion::Ipv4), 0), 0xFFFF);
    }

    #[test]
    fn scale_fits_window() {
        assert_eq!(window_scale_for(8192), 0);
        assert_eq!(window_scale_for(0xFFFF), 0);
        assert_eq!(window_scale_for(0x10000), 1);
        assert_eq!(window_scale_for(1 << 20), 5);
        assert_eq!(window_scale_for(u32::max_value()), MAX_WINDOW_SCALE);
    }
}
