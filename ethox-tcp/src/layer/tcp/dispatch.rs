//! Inbound segments.
//!
//! A segment is first matched against the connections in the port table by its full four tuple.
//! Segments without a connection may be connection requests for a listener, everything else is
//! answered with a reset. Malformed segments are dropped silently and only counted.
use crate::layer::buffer::{BufferKey, BufferQueue, Pool, QueueState};
use crate::layer::ip::Ip;
use crate::managed::Key;
use crate::wire::{IpAddress, TcpPacket, TcpRepr};

use super::endpoint::{Context, Endpoint};
use super::server::{default_mss, ConnectionRequest};
use super::socket::{Socket, SocketKey, State};
use super::transmit::reset_stray;

/// The addresses of a received segment, as recorded by the IP layer.
#[derive(Clone, Copy, Debug)]
struct Addresses {
    source: IpAddress,
    destination: IpAddress,
}

/// The fields of a segment whose options could not be parsed.
fn bare_repr(packet: &TcpPacket<&[u8]>) -> TcpRepr {
    let flags = packet.flags();
    TcpRepr {
        src_port: packet.src_port(),
        dst_port: packet.dst_port(),
        flags,
        seq_number: packet.seq_number(),
        ack_number: if flags.ack() { Some(packet.ack_number()) } else { None },
        window_len: packet.window_len(),
        window_scale: None,
        max_seg_size: None,
        payload_len: packet.payload().len(),
    }
}

impl Endpoint<'_> {
    /// Hand over a received segment for deferred processing.
    ///
    /// The payload of the buffer is the TCP segment, its descriptor holds the addresses and the
    /// interface it arrived on. Queued segments are processed by [`queue_process`].
    ///
    /// [`queue_process`]: #method.queue_process
    pub fn packet_receive<I: Ip + ?Sized>(&mut self, ip: &mut I, buffer: BufferKey) {
        self.inbound.push_back(ip.pool(), buffer, QueueState::Enqueued);
    }

    /// Process all segments handed over with `packet_receive`.
    pub fn queue_process<I: Ip + ?Sized>(&mut self, ip: &mut I) {
        while let Some(buffer) = self.inbound.pop_front(ip.pool()) {
            self.packet_process(ip, buffer);
        }
    }

    /// Process one received segment.
    ///
    /// The engine takes ownership of the buffer. It ends up in a receive queue, a listener
    /// queue or is released.
    pub fn packet_process<I: Ip + ?Sized>(&mut self, ip: &mut I, buffer: BufferKey) {
        let descriptor = *ip.pool().descriptor(buffer);
        let addresses = Addresses {
            source: descriptor.source,
            destination: descriptor.destination,
        };
        if addresses.source.version().is_none()
            || addresses.source.version() != addresses.destination.version()
        {
            net_debug!("tcp: dropped segment without addresses");
            self.drop_invalid(ip, buffer);
            return;
        }

        let interface = descriptor.interface.and_then(|id| ip.interface(id));
        let offload = interface.map_or(false, |interface| interface.rx_checksum_offload);

        let header = {
            let payload = ip.pool().payload(buffer);
            match TcpPacket::new_checked(payload) {
                Ok(packet) => Some((TcpRepr::parse(&packet), bare_repr(&packet))),
                Err(_) => None,
            }
        };
        let (parsed, bare) = match header {
            Some(header) => header,
            None => {
                net_debug!("tcp: dropped malformed segment from {}", addresses.source);
                self.drop_invalid(ip, buffer);
                return;
            },
        };

        if !offload && ip.checksum(buffer, addresses.source, addresses.destination) != 0 {
            net_debug!("tcp: dropped segment from {} with bad checksum", addresses.source);
            self.info.checksum_errors += 1;
            if let Some(socket) = self.find_connection(&bare, addresses.source) {
                if let Some(entry) = self.sockets.get_mut(socket.0) {
                    entry.stats.checksum_errors += 1;
                }
            }
            ip.pool().release(buffer);
            return;
        }

        let repr = match parsed {
            Ok(repr) => repr,
            Err(_) => {
                net_debug!("tcp: invalid options from {}:{}", addresses.source, bare.src_port);
                self.info.invalid_packets += 1;
                self.reset_unmatched(ip, &bare, addresses);
                ip.pool().release(buffer);
                return;
            },
        };

        if let Some(socket) = self.find_connection(&repr, addresses.source) {
            let signals = match self.split(ip, socket) {
                Some((entry, mut cx)) => entry.process(&mut cx, buffer, &repr),
                None => {
                    ip.pool().release(buffer);
                    return;
                },
            };
            self.apply(ip, socket, signals);
            return;
        }

        if repr.ack_number.is_none() {
            if let Some(listener) = self.find_listener(repr.dst_port) {
                if addresses.source == addresses.destination && repr.src_port == repr.dst_port {
                    net_debug!("tcp: dropped land segment on {}", repr.dst_port);
                    self.drop_invalid(ip, buffer);
                    return;
                }

                let directed = interface.map_or(false, |interface| {
                    interface.cidr.is_broadcast(addresses.source)
                        || interface.cidr.is_network(addresses.source)
                });
                if !addresses.source.is_unicast() || directed {
                    net_debug!("tcp: dropped request from non-unicast {}", addresses.source);
                    self.drop_invalid(ip, buffer);
                    return;
                }

                if repr.flags.rst() {
                    self.cancel_request(ip, listener, &repr, addresses.source);
                    ip.pool().release(buffer);
                    return;
                }

                if repr.flags.syn() {
                    self.connection_request(ip, listener, buffer, &repr, addresses);
                    return;
                }
            }
        }

        self.reset_unmatched(ip, &repr, addresses);
        ip.pool().release(buffer);
    }

    /// The connection a segment belongs to.
    fn find_connection(&self, repr: &TcpRepr, source: IpAddress) -> Option<SocketKey> {
        let bucket = &self.buckets[self.bucket_of(repr.dst_port)];
        let mut walk = bucket.walk();
        while let Some(key) = walk.next(&self.sockets) {
            let socket = match self.sockets.get(key) {
                Some(socket) => socket,
                None => continue,
            };
            if socket.port == repr.dst_port
                && socket.peer_port == repr.src_port
                && socket.peer == source
                && socket.state != State::Closed
            {
                return Some(SocketKey(key));
            }
        }
        None
    }

    /// Handle a SYN for a listener.
    ///
    /// The listener's server socket adopts the request. Without one the segment is queued,
    /// evicting the oldest queued request when the queue is full.
    fn connection_request<I: Ip + ?Sized>(
        &mut self,
        ip: &mut I,
        listener: Key,
        buffer: BufferKey,
        repr: &TcpRepr,
        addresses: Addresses,
    ) {
        if let Some(mss) = repr.max_seg_size {
            if mss != 0 && mss < self.config.mss_minimum {
                net_debug!("tcp: refused request from {} with mss {}", addresses.source, mss);
                self.info.invalid_packets += 1;
                self.reset_unmatched(ip, repr, addresses);
                ip.pool().release(buffer);
                return;
            }
        }

        self.info.passive_connections += 1;
        let waiting = self.listeners.get(listener)
            .and_then(|entry| entry.socket)
            .and_then(|socket| self.sockets.get(socket.0))
            .map_or(false, Socket::awaits_request);
        if waiting {
            let request = ConnectionRequest {
                repr: *repr,
                source: addresses.source,
                destination: addresses.destination,
                interface: ip.pool().descriptor(buffer).interface,
                mss: match repr.max_seg_size {
                    Some(mss) if mss != 0 => u32::from(mss),
                    _ => default_mss(addresses.source.version()),
                },
            };
            ip.pool().release(buffer);
            self.adopt(ip, listener, &request);
            return;
        }
        if let Some(entry) = self.listeners.get_mut(listener) {
            entry.socket = None;
        }

        let entry = match self.listeners.get_mut(listener) {
            Some(entry) => entry,
            None => {
                ip.pool().release(buffer);
                return;
            },
        };
        let pool = ip.pool();

        if entry.queue_max == 0 {
            self.info.connections_dropped += 1;
            pool.release(buffer);
            return;
        }

        // A repeated SYN of a queued request.
        let mut next = entry.queue.front();
        while let Some(queued) = next {
            if same_peer(pool, queued, repr, addresses.source) {
                pool.release(buffer);
                return;
            }
            next = BufferQueue::next_of(pool, queued);
        }

        if entry.queue.len() >= entry.queue_max {
            if let Some(oldest) = entry.queue.pop_front(pool) {
                net_debug!("tcp: listener {} queue full, dropping oldest request", entry.port);
                pool.release(oldest);
                self.info.connections_dropped += 1;
            }
        }
        entry.queue.push_back(pool, buffer, QueueState::Enqueued);
        net_trace!("tcp: {} queued request from {}:{}", entry.port, addresses.source, repr.src_port);
    }

    /// Drop a queued request that the peer reset.
    fn cancel_request<I: Ip + ?Sized>(&mut self, ip: &mut I, listener: Key, repr: &TcpRepr, source: IpAddress) {
        let entry = match self.listeners.get_mut(listener) {
            Some(entry) => entry,
            None => return,
        };
        let pool = ip.pool();
        let mut prev = None;
        let mut next = entry.queue.front();
        while let Some(queued) = next {
            if same_peer(pool, queued, repr, source) {
                entry.queue.remove_after(pool, prev);
                pool.release(queued);
                net_trace!("tcp: {} request from {}:{} cancelled", entry.port, source, repr.src_port);
                return;
            }
            prev = Some(queued);
            next = BufferQueue::next_of(pool, queued);
        }
    }

    fn reset_unmatched<I: Ip + ?Sized>(&mut self, ip: &mut I, repr: &TcpRepr, addresses: Addresses) {
        let mut cx = Context {
            ip,
            config: &self.config,
            info: &mut self.info,
        };
        reset_stray(&mut cx, repr, addresses.source, addresses.destination);
    }

    fn drop_invalid<I: Ip + ?Sized>(&mut self, ip: &mut I, buffer: BufferKey) {
        self.info.invalid_packets += 1;
        ip.pool().release(buffer);
    }
}

/// Whether a queued request came from the sender of a segment.
fn same_peer<P: Pool + ?Sized>(pool: &P, queued: BufferKey, repr: &TcpRepr, source: IpAddress) -> bool {
    if pool.descriptor(queued).source != source {
        return false;
    }
    match TcpPacket::new_checked(pool.payload(queued)) {
        Ok(packet) => packet.src_port() == repr.src_port,
        Err(_) => false,
    }
}
