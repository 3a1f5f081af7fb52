//! Connection scenarios against a recording IP layer.
use crate::layer::Error;
use crate::layer::buffer::{transmit_complete, BufferKey, Pool};
use crate::layer::ip::{Interface, InterfaceId, Ip, Route, SendRequest};
use crate::managed::Slice;
use crate::storage::{BufferEntry, BufferPool};
use crate::wire::{IpAddress, IpCidr, Ipv4Address, TcpFlags, TcpPacket, TcpRepr, TcpSeqNumber};
use crate::wire::ip::checksum;

use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use super::transmit::queued_bytes;

const LOCAL: IpAddress = IpAddress::Ipv4(Ipv4Address([10, 0, 0, 1]));
const PEER: IpAddress = IpAddress::Ipv4(Ipv4Address([10, 0, 0, 2]));
const PEER_B: IpAddress = IpAddress::Ipv4(Ipv4Address([10, 0, 0, 3]));
const PEER_C: IpAddress = IpAddress::Ipv4(Ipv4Address([10, 0, 0, 4]));

const BUFFERS: usize = 64;
const PEER_ISN: i32 = 5000;

struct Sent {
    request: SendRequest,
    bytes: Vec<u8>,
}

impl Sent {
    fn repr(&self) -> TcpRepr {
        let packet = TcpPacket::new_checked(&self.bytes[..]).unwrap();
        TcpRepr::parse(&packet).unwrap()
    }

    fn payload(&self) -> &[u8] {
        let packet = TcpPacket::new_unchecked(&self.bytes[..]);
        &self.bytes[usize::from(packet.header_len())..]
    }
}

/// An IP layer with one interface that records every segment.
///
/// The driver completes each transmission immediately unless `hold` is set, then the buffers
/// collect in `held` until `complete` is called.
struct Net {
    pool: BufferPool<'static>,
    sent: Vec<Sent>,
    hold: bool,
    held: Vec<BufferKey>,
}

impl Net {
    fn new() -> Self {
        let pool = BufferPool::new(
            Slice::Many(vec![0; BUFFERS * 2048]),
            Slice::Many(vec![BufferEntry::default(); BUFFERS]),
            64);
        Net { pool, sent: Vec::new(), hold: false, held: Vec::new() }
    }

    fn complete(&mut self) {
        for buffer in self.held.drain(..) {
            transmit_complete(&mut self.pool, buffer);
        }
    }
}

impl Ip for Net {
    type Pool = BufferPool<'static>;

    fn pool(&mut self) -> &mut Self::Pool {
        &mut self.pool
    }

    fn interface(&self, id: InterfaceId) -> Option<Interface> {
        if id != InterfaceId(0) {
            return None;
        }
        Some(Interface {
            cidr: IpCidr::new(LOCAL, 24),
            mtu: 1500,
            rx_checksum_offload: false,
            tx_checksum_offload: false,
        })
    }

    fn route(&self, destination: IpAddress) -> Option<Route> {
        match destination {
            IpAddress::Ipv4(_) => Some(Route { interface: InterfaceId(0), next_hop: destination }),
            _ => None,
        }
    }

    fn send(&mut self, buffer: BufferKey, request: SendRequest) {
        let bytes = self.pool.payload(buffer).to_vec();
        self.sent.push(Sent { request, bytes });
        if self.hold {
            self.held.push(buffer);
        } else {
            transmit_complete(&mut self.pool, buffer);
        }
    }
}

struct Fixture {
    endpoint: Endpoint<'static>,
    net: Net,
}

fn peer_segment(dst_port: u16, seq: i32, ack: Option<TcpSeqNumber>) -> TcpRepr {
    TcpRepr {
        src_port: 80,
        dst_port,
        flags: TcpFlags::default(),
        seq_number: TcpSeqNumber(seq),
        ack_number: ack,
        window_len: 8192,
        window_scale: None,
        max_seg_size: None,
        payload_len: 0,
    }
}

fn syn_from(src_port: u16, seq: i32) -> TcpRepr {
    TcpRepr {
        src_port,
        dst_port: 80,
        flags: TcpFlags::SYN,
        seq_number: TcpSeqNumber(seq),
        ack_number: None,
        window_len: 8192,
        window_scale: None,
        max_seg_size: Some(1460),
        payload_len: 0,
    }
}

impl Fixture {
    fn new() -> Self {
        Fixture::with_config(Config::default())
    }

    fn with_config(config: Config) -> Self {
        let endpoint = Endpoint::new(
            Storage::with_capacity(4),
            config,
            IsnGenerator::from_key(7, 11));
        Fixture { endpoint, net: Net::new() }
    }

    fn segment_buffer(&mut self, source: IpAddress, repr: &TcpRepr, data: &[u8]) -> BufferKey {
        let repr = TcpRepr { payload_len: data.len(), ..*repr };
        let pool = &mut self.net.pool;
        let buffer = pool.allocate().unwrap();
        pool.append(buffer, &[0; 40][..repr.header_len()]).unwrap();
        pool.append(buffer, data).unwrap();
        repr.emit(&mut TcpPacket::new_unchecked(pool.payload_mut(buffer)));
        let sum = checksum::segment(&source, &LOCAL, pool.payload(buffer));
        TcpPacket::new_unchecked(pool.payload_mut(buffer)).set_checksum(sum);

        let descriptor = pool.descriptor_mut(buffer);
        descriptor.source = source;
        descriptor.destination = LOCAL;
        descriptor.interface = Some(InterfaceId(0));
        buffer
    }

    fn deliver_from(&mut self, source: IpAddress, repr: TcpRepr, data: &[u8]) {
        let buffer = self.segment_buffer(source, &repr, data);
        self.endpoint.packet_process(&mut self.net, buffer);
    }

    fn deliver(&mut self, repr: TcpRepr, data: &[u8]) {
        self.deliver_from(PEER, repr, data)
    }

    fn last(&self) -> TcpRepr {
        self.net.sent.last().expect("nothing was sent").repr()
    }

    fn tick(&mut self, count: usize) {
        for _ in 0..count {
            self.endpoint.fast_periodic_processing(&mut self.net);
        }
    }

    fn socket(&self, socket: SocketKey) -> &Socket {
        self.endpoint.socket(socket).unwrap()
    }

    fn data(&mut self, data: &[u8]) -> BufferKey {
        let buffer = self.net.pool.allocate().unwrap();
        self.net.pool.append(buffer, data).unwrap();
        buffer
    }

    fn slow_tick(&mut self, count: usize) {
        for _ in 0..count {
            self.endpoint.slow_periodic_processing(&mut self.net);
        }
    }

    /// Tick until the socket emits its next segment.
    fn tick_until_sent(&mut self) {
        let before = self.net.sent.len();
        for _ in 0..100 {
            self.tick(1);
            if self.net.sent.len() > before {
                return;
            }
        }
        panic!("nothing was sent within 100 ticks");
    }

    fn send(&mut self, socket: SocketKey, data: &[u8]) {
        let buffer = self.data(data);
        let outcome = self.endpoint.socket_send(&mut self.net, socket, buffer, Wait::NoWait);
        assert_eq!(outcome, Ok(Outcome::Ready(())));
    }

    /// Open a connection to port 80 of the peer, which answers with `window`.
    ///
    /// Returns the socket, its port and the next sequence number it sends.
    fn connect(&mut self, window: u16) -> (SocketKey, u16, TcpSeqNumber) {
        self.connect_with(SocketOptions::default(), window)
    }

    fn connect_with(&mut self, options: SocketOptions, window: u16) -> (SocketKey, u16, TcpSeqNumber) {
        let socket = self.endpoint.socket_create(options).unwrap();
        let port = match self.endpoint.client_socket_bind(&mut self.net, socket, None, Wait::NoWait) {
            Ok(Outcome::Ready(port)) => port,
            other => panic!("bind failed: {:?}", other),
        };
        assert_eq!(
            self.endpoint.client_socket_connect(&mut self.net, socket, PEER, 80, Wait::NoWait),
            Ok(Outcome::InProgress));

        let syn = self.last();
        let synack = TcpRepr {
            flags: TcpFlags::SYN,
            window_len: window,
            window_scale: Some(0),
            max_seg_size: Some(1000),
            ..peer_segment(port, PEER_ISN, Some(syn.seq_number + 1))
        };
        self.deliver(synack, &[]);
        assert_eq!(self.endpoint.socket_state(socket), Ok(State::Established));
        (socket, port, syn.seq_number + 1)
    }
}

#[test]
fn active_open() {
    let mut fx = Fixture::new();
    let socket = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    let port = match fx.endpoint.client_socket_bind(&mut fx.net, socket, None, Wait::NoWait) {
        Ok(Outcome::Ready(port)) => port,
        other => panic!("bind failed: {:?}", other),
    };
    assert!(port >= 0xC000);

    assert_eq!(
        fx.endpoint.client_socket_connect(&mut fx.net, socket, PEER, 80, Wait::NoWait),
        Ok(Outcome::InProgress));
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::SynSent));

    let syn = fx.last();
    assert!(syn.flags.syn());
    assert_eq!(syn.ack_number, None);
    assert_eq!(syn.max_seg_size, Some(1460));
    assert_eq!(syn.window_len, 8192);
    assert_eq!(syn.window_scale, Some(0));
    assert_eq!(syn.src_port, port);
    assert_eq!(syn.dst_port, 80);

    let synack = TcpRepr {
        flags: TcpFlags::SYN,
        window_len: 4096,
        window_scale: Some(0),
        max_seg_size: Some(1000),
        ..peer_segment(port, PEER_ISN, Some(syn.seq_number + 1))
    };
    fx.deliver(synack, &[]);

    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Established));
    let ack = fx.last();
    assert!(!ack.flags.syn());
    assert_eq!(ack.ack_number, Some(TcpSeqNumber(PEER_ISN + 1)));
    assert_eq!(ack.seq_number, syn.seq_number + 1);

    assert_eq!(fx.endpoint.socket_mss_get(socket), Ok(1000));
    let entry = fx.socket(socket);
    assert_eq!(entry.flow.congestion_window, 4000);
    assert_eq!(entry.flow.ssthresh, 4096);
    assert_eq!(entry.send.window, 4096);
}

#[test]
fn transmitted_checksums_verify() {
    let mut fx = Fixture::new();
    let (socket, _, _) = fx.connect(4096);
    fx.send(socket, &[7; 300]);

    assert_eq!(fx.net.sent.len(), 3);
    for sent in &fx.net.sent {
        assert_eq!(sent.request.source, LOCAL);
        assert_eq!(sent.request.destination, PEER);
        assert_eq!(checksum::segment(&LOCAL, &PEER, &sent.bytes), 0);
    }
}

#[test]
fn send_and_acknowledge() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(4096);

    fx.send(socket, &[0xAB; 100]);
    let segment = fx.last();
    assert_eq!(segment.seq_number, next);
    assert_eq!(segment.payload_len, 100);
    assert!(segment.flags.psh());
    assert_eq!(fx.net.sent.last().unwrap().payload(), &[0xABu8; 100][..]);
    assert_eq!(fx.socket(socket).send.outstanding, 100);

    fx.deliver(TcpRepr {
        window_len: 4096,
        ..peer_segment(port, PEER_ISN + 1, Some(next + 100))
    }, &[]);

    let entry = fx.socket(socket);
    assert!(entry.sent.is_empty());
    assert_eq!(entry.send.outstanding, 0);
    assert_eq!(entry.flow.congestion_window, 4100);
    assert_eq!(entry.timer.timeout, 0);
    assert_eq!(fx.net.pool.available(), BUFFERS);
    assert_eq!(fx.endpoint.info().bytes_sent, 100);
}

#[test]
fn zero_window_probe() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(0);
    let data: Vec<u8> = (0..50).collect();
    let buffer = fx.data(&data);

    assert_eq!(
        fx.endpoint.socket_send(&mut fx.net, socket, buffer, Wait::NoWait),
        Err(Error::WindowOverflow));
    let waiter = match fx.endpoint.socket_send(&mut fx.net, socket, buffer, Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("send did not suspend: {:?}", other),
    };
    let before = fx.net.sent.len();
    assert_eq!(fx.socket(socket).timer.timeout, 1);

    fx.tick(1);
    assert_eq!(fx.net.sent.len(), before + 1);
    let probe = fx.last();
    assert_eq!(probe.seq_number, next);
    assert_eq!(probe.payload_len, 1);
    assert_eq!(fx.net.sent.last().unwrap().payload(), &[0u8][..]);
    assert_eq!(fx.socket(socket).timer.timeout, 20);

    fx.tick(20);
    assert_eq!(fx.net.sent.len(), before + 2);
    assert_eq!(fx.last().seq_number, next);
    assert_eq!(fx.socket(socket).timer.timeout, 40);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Established));

    // The peer takes the probe byte and opens its window.
    fx.deliver(TcpRepr {
        window_len: 4096,
        ..peer_segment(port, PEER_ISN + 1, Some(next + 1))
    }, &[]);
    assert_eq!(fx.endpoint.take_resumed(waiter), Some(Wakeup::Ready));

    assert_eq!(
        fx.endpoint.socket_send(&mut fx.net, socket, buffer, Wait::NoWait),
        Ok(Outcome::Ready(())));
    let rest = fx.last();
    assert_eq!(rest.seq_number, next + 1);
    assert_eq!(rest.payload_len, 49);
    assert_eq!(fx.net.sent.last().unwrap().payload(), &data[1..]);
}

#[test]
fn probing_continues_while_window_stays_closed() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(0);
    let data: Vec<u8> = (100..150).collect();
    let buffer = fx.data(&data);
    let mut waiter = match fx.endpoint.socket_send(&mut fx.net, socket, buffer, Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("send did not suspend: {:?}", other),
    };

    // Every probe byte is taken but the window stays shut, until the last one.
    for taken in 0..4 {
        fx.tick_until_sent();
        let probe = fx.last();
        assert_eq!(probe.seq_number, next + taken);
        assert_eq!(probe.payload_len, 1);
        assert_eq!(fx.net.sent.last().unwrap().payload(), &data[taken..taken + 1]);

        let window = if taken == 3 { 4096 } else { 0 };
        fx.deliver(TcpRepr {
            window_len: window,
            ..peer_segment(port, PEER_ISN + 1, Some(next + taken + 1))
        }, &[]);
        assert_eq!(fx.endpoint.take_resumed(waiter), Some(Wakeup::Ready));
        assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Established));
        if taken == 3 {
            break;
        }

        waiter = match fx.endpoint.socket_send(&mut fx.net, socket, buffer, Wait::Suspend) {
            Ok(Outcome::Suspended(waiter)) => waiter,
            other => panic!("send did not suspend: {:?}", other),
        };
        assert!(fx.socket(socket).probe.has_data);
        assert!(fx.socket(socket).timer.timeout > 0);
    }

    assert_eq!(
        fx.endpoint.socket_send(&mut fx.net, socket, buffer, Wait::NoWait),
        Ok(Outcome::Ready(())));
    let rest = fx.last();
    assert_eq!(rest.seq_number, next + 4);
    assert_eq!(rest.payload_len, 46);
    assert_eq!(fx.net.sent.last().unwrap().payload(), &data[4..]);
}

#[test]
fn accepted_probe_byte_is_skipped_only_in_its_buffer() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(0);
    let first = fx.data(&[10, 11, 12]);
    assert_eq!(
        fx.endpoint.socket_send(&mut fx.net, socket, first, Wait::NoWait),
        Err(Error::WindowOverflow));
    fx.tick_until_sent();
    assert_eq!(fx.net.sent.last().unwrap().payload(), &[10u8][..]);

    fx.deliver(TcpRepr {
        window_len: 4096,
        ..peer_segment(port, PEER_ISN + 1, Some(next + 1))
    }, &[]);

    // The application sends other data instead, none of it was probed.
    fx.send(socket, &[20, 21]);
    let segment = fx.last();
    assert_eq!(segment.seq_number, next + 1);
    assert_eq!(fx.net.sent.last().unwrap().payload(), &[20u8, 21][..]);
    assert!(!fx.socket(socket).probe.accepted);
    assert_eq!(fx.net.pool.payload(first), &[10u8, 11, 12][..]);
    fx.net.pool.release(first);
}

#[test]
fn retransmission_repeats_the_original_bytes() {
    let mut fx = Fixture::new();
    let (socket, _, next) = fx.connect(4096);
    let data: Vec<u8> = (0..200).map(|i| i as u8).collect();
    fx.send(socket, &data);
    let original = fx.net.sent.last().unwrap().bytes.clone();

    fx.tick(10);
    let resent = fx.net.sent.last().unwrap();
    assert_eq!(resent.repr().seq_number, next);
    assert_eq!(resent.bytes, original);
    assert_eq!(checksum::segment(&LOCAL, &PEER, &resent.bytes), 0);
}

#[test]
fn keepalive_resets_after_unanswered_probes() {
    static DISCONNECTS: AtomicUsize = AtomicUsize::new(0);
    fn disconnected(_: SocketKey) {
        DISCONNECTS.fetch_add(1, Ordering::SeqCst);
    }

    let mut fx = Fixture::with_config(Config {
        keepalive: true,
        keepalive_initial: 3,
        keepalive_retry: 2,
        keepalive_retries: 2,
        ..Config::default()
    });
    let (socket, port, next) = fx.connect_with(SocketOptions {
        disconnect: Some(disconnected),
        ..SocketOptions::default()
    }, 4096);
    let before = fx.net.sent.len();

    fx.slow_tick(2);
    assert_eq!(fx.net.sent.len(), before);
    fx.slow_tick(1);
    assert_eq!(fx.net.sent.len(), before + 1);
    let probe = fx.last();
    assert_eq!(probe.seq_number, next - 1);
    assert_eq!(probe.payload_len, 0);
    assert_eq!(probe.ack_number, Some(TcpSeqNumber(PEER_ISN + 1)));

    // An answer restarts the idle time.
    fx.deliver(peer_segment(port, PEER_ISN + 1, Some(next)), &[]);
    assert_eq!(fx.socket(socket).keepalive.retries, 0);
    fx.slow_tick(2);
    assert_eq!(fx.net.sent.len(), before + 1);

    fx.slow_tick(1);
    assert_eq!(fx.net.sent.len(), before + 2);
    fx.slow_tick(2);
    assert_eq!(fx.net.sent.len(), before + 3);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Established));

    fx.slow_tick(2);
    assert!(fx.last().flags.rst());
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Closed));
    assert_eq!(DISCONNECTS.load(Ordering::SeqCst), 1);
}

#[test]
fn window_scale_above_16_bits() {
    let mut fx = Fixture::new();
    let socket = fx.endpoint.socket_create(SocketOptions {
        window_size: 200_000,
        ..SocketOptions::default()
    }).unwrap();
    let port = match fx.endpoint.client_socket_bind(&mut fx.net, socket, None, Wait::NoWait) {
        Ok(Outcome::Ready(port)) => port,
        other => panic!("bind failed: {:?}", other),
    };
    fx.endpoint.client_socket_connect(&mut fx.net, socket, PEER, 80, Wait::NoWait).unwrap();

    let syn = fx.last();
    assert_eq!(syn.window_scale, Some(2));
    assert_eq!(syn.window_len, 0xFFFF);

    fx.deliver(TcpRepr {
        flags: TcpFlags::SYN,
        window_len: 1000,
        window_scale: Some(3),
        max_seg_size: Some(1000),
        ..peer_segment(port, PEER_ISN, Some(syn.seq_number + 1))
    }, &[]);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Established));
    // The window of the SYN itself is never scaled.
    assert_eq!(fx.socket(socket).send.window, 1000);
    assert_eq!(fx.last().window_len, 50_000);

    fx.deliver(TcpRepr {
        window_len: 1000,
        ..peer_segment(port, PEER_ISN + 1, Some(syn.seq_number + 1))
    }, &[]);
    assert_eq!(fx.socket(socket).send.window, 8000);
    assert_eq!(fx.socket(socket).recv.window, 200_000);
}

#[test]
fn reset_fails_waiters() {
    let mut fx = Fixture::new();
    let (socket, port, _) = fx.connect(4096);
    let waiter = match fx.endpoint.socket_receive(&mut fx.net, socket, Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("receive did not suspend: {:?}", other),
    };

    let sent = fx.net.sent.len();
    fx.deliver(TcpRepr {
        flags: TcpFlags::RST,
        ..peer_segment(port, PEER_ISN + 1, None)
    }, &[]);

    assert_eq!(fx.endpoint.take_resumed(waiter), Some(Wakeup::Failed(Error::NotConnected)));
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Closed));
    assert_eq!(fx.socket(socket).port(), Some(port));
    assert_eq!(fx.net.sent.len(), sent);
}

#[test]
fn reset_outside_window_is_challenged() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(4096);

    fx.deliver(TcpRepr {
        flags: TcpFlags::RST,
        ..peer_segment(port, PEER_ISN + 11, None)
    }, &[]);

    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Established));
    let challenge = fx.last();
    assert!(!challenge.flags.rst());
    assert_eq!(challenge.seq_number, next);
    assert_eq!(challenge.ack_number, Some(TcpSeqNumber(PEER_ISN + 1)));
}

#[test]
fn listener_queue_evicts_oldest() {
    let mut fx = Fixture::new();
    let first = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    fx.endpoint.server_socket_listen(80, first, 1, None).unwrap();

    fx.deliver_from(PEER, syn_from(40000, 1000), &[]);
    assert_eq!(fx.endpoint.socket_state(first), Ok(State::Listen));
    assert_eq!(fx.socket(first).peer, PEER);
    assert!(fx.net.sent.is_empty());

    fx.deliver_from(PEER_B, syn_from(40001, 2000), &[]);
    fx.deliver_from(PEER_C, syn_from(40002, 3000), &[]);

    assert_eq!(fx.endpoint.listener(80).unwrap().queue_len(), 1);
    let info = fx.endpoint.info();
    assert_eq!(info.connections_dropped, 1);
    assert_eq!(info.passive_connections, 3);
    assert!(fx.net.sent.is_empty());

    assert_eq!(
        fx.endpoint.server_socket_accept(&mut fx.net, first, Wait::NoWait),
        Ok(Outcome::InProgress));
    let synack = fx.last();
    assert!(synack.flags.syn());
    assert_eq!(synack.ack_number, Some(TcpSeqNumber(1001)));
    assert_eq!(synack.dst_port, 40000);
    assert_eq!(synack.window_scale, None);
    assert_eq!(synack.max_seg_size, Some(1460));

    let second = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    assert_eq!(
        fx.endpoint.server_socket_relisten(&mut fx.net, 80, second),
        Ok(Relisten::ConnectionPending));
    assert_eq!(fx.socket(second).peer, PEER_C);
    assert_eq!(fx.socket(second).peer_port, 40002);
    assert_eq!(fx.endpoint.listener(80).unwrap().queue_len(), 0);
}

#[test]
fn passive_open() {
    let mut fx = Fixture::new();
    let socket = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    fx.endpoint.server_socket_listen(80, socket, 4, None).unwrap();
    let waiter = match fx.endpoint.server_socket_accept(&mut fx.net, socket, Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("accept did not suspend: {:?}", other),
    };

    fx.deliver(syn_from(40000, 1000), &[]);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::SynReceived));
    let synack = fx.last();
    assert!(synack.flags.syn());
    assert_eq!(synack.ack_number, Some(TcpSeqNumber(1001)));
    let next = synack.seq_number + 1;

    // An acknowledgement of something we never sent.
    let bogus = next + 50;
    fx.deliver(TcpRepr {
        src_port: 40000,
        dst_port: 80,
        ..peer_segment(80, 1001, Some(bogus))
    }, &[]);
    let reset = fx.last();
    assert!(reset.flags.rst());
    assert_eq!(reset.seq_number, bogus);
    assert_eq!(reset.ack_number, None);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::SynReceived));
    assert_eq!(fx.endpoint.take_resumed(waiter), None);

    fx.deliver(TcpRepr {
        src_port: 40000,
        dst_port: 80,
        ..peer_segment(80, 1001, Some(next))
    }, &[]);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Established));
    assert_eq!(fx.endpoint.take_resumed(waiter), Some(Wakeup::Ready));
    assert_eq!(fx.endpoint.socket_peer_info_get(socket), Ok((PEER, 40000)));

    let entry = fx.socket(socket);
    assert_eq!(entry.flow.congestion_window, 4380);
    assert_eq!(entry.send.window, 8192);
    assert_eq!(fx.endpoint.info().connections, 1);
}

#[test]
fn retransmission_timeout() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(4096);
    for _ in 0..3 {
        fx.send(socket, &[1; 1000]);
    }
    assert_eq!(fx.socket(socket).send.outstanding, 3000);
    let before = fx.net.sent.len();

    fx.tick(10);
    assert_eq!(fx.net.sent.len(), before + 1);
    let resent = fx.last();
    assert_eq!(resent.seq_number, next);
    assert_eq!(resent.payload_len, 1000);

    let entry = fx.socket(socket);
    assert_eq!(entry.flow.congestion_window, 1000);
    assert_eq!(entry.flow.ssthresh, 2000);
    assert_eq!(entry.timer.retries, 1);
    assert_eq!(fx.endpoint.socket_info(socket).unwrap().retransmit_packets, 1);

    // A partial acknowledgement releases only what it covers.
    fx.deliver(TcpRepr {
        window_len: 4096,
        ..peer_segment(port, PEER_ISN + 1, Some(next + 1000))
    }, &[]);
    let entry = fx.socket(socket);
    assert_eq!(entry.sent.len(), 2);
    assert_eq!(entry.send.outstanding, 2000);
    assert_eq!(entry.send.outstanding as usize, queued_bytes(&fx.net.pool, &entry.sent));
    assert_eq!(entry.flow.congestion_window, 2000);
    assert_eq!(entry.timer.retries, 0);
}

#[test]
fn segments_held_by_the_driver() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(4096);
    fx.net.hold = true;
    fx.send(socket, &[4; 100]);
    let before = fx.net.sent.len();

    // Not resent while the driver still owns the buffer.
    fx.tick(10);
    assert_eq!(fx.net.sent.len(), before);
    assert_eq!(fx.socket(socket).flow.congestion_window, 1000);

    fx.net.hold = false;
    fx.net.complete();
    fx.tick(10);
    assert_eq!(fx.net.sent.len(), before + 1);
    assert_eq!(fx.last().seq_number, next);

    fx.deliver(peer_segment(port, PEER_ISN + 1, Some(next + 100)), &[]);
    assert!(fx.socket(socket).sent.is_empty());
    assert_eq!(fx.net.pool.available(), BUFFERS);
}

#[test]
fn acknowledged_while_held() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(4096);
    fx.net.hold = true;
    fx.send(socket, &[5; 100]);

    fx.deliver(peer_segment(port, PEER_ISN + 1, Some(next + 100)), &[]);
    assert!(fx.socket(socket).sent.is_empty());
    assert_eq!(fx.net.pool.available(), BUFFERS - 1);

    fx.net.complete();
    assert_eq!(fx.net.pool.available(), BUFFERS);
}

#[test]
fn fast_retransmit_and_recovery() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(8192);
    for _ in 0..4 {
        fx.send(socket, &[2; 1000]);
    }

    let ack = |fx: &mut Fixture, acked: usize| fx.deliver(
        peer_segment(port, PEER_ISN + 1, Some(next + acked)), &[]);

    ack(&mut fx, 1000);
    assert_eq!(fx.socket(socket).flow.congestion_window, 5000);

    let before = fx.net.sent.len();
    ack(&mut fx, 1000);
    ack(&mut fx, 1000);
    assert_eq!(fx.net.sent.len(), before);
    assert_eq!(fx.socket(socket).flow.duplicate_acks, 2);

    ack(&mut fx, 1000);
    assert_eq!(fx.net.sent.len(), before + 1);
    let resent = fx.last();
    assert_eq!(resent.seq_number, next + 1000);
    assert_eq!(resent.payload_len, 1000);

    let entry = fx.socket(socket);
    assert!(entry.flow.fast_recovery);
    assert_eq!(entry.flow.ssthresh, 2000);
    assert_eq!(entry.flow.congestion_window, 5000);

    ack(&mut fx, 4000);
    let entry = fx.socket(socket);
    assert!(!entry.flow.fast_recovery);
    assert!(entry.sent.is_empty());
    assert_eq!(entry.flow.congestion_window, 2500);
}

#[test]
fn out_of_order_reassembly() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(4096);

    fx.deliver(peer_segment(port, PEER_ISN + 101, Some(next)), &[2; 100]);
    let dup = fx.last();
    assert_eq!(dup.ack_number, Some(TcpSeqNumber(PEER_ISN + 1)));
    assert_eq!(fx.endpoint.socket_bytes_available(&mut fx.net, socket), Ok(0));

    fx.deliver(peer_segment(port, PEER_ISN + 1, Some(next)), &[1; 100]);
    assert_eq!(fx.endpoint.socket_bytes_available(&mut fx.net, socket), Ok(200));
    assert_eq!(fx.socket(socket).recv.next, TcpSeqNumber(PEER_ISN + 201));

    for &fill in &[1u8, 2] {
        let buffer = match fx.endpoint.socket_receive(&mut fx.net, socket, Wait::NoWait) {
            Ok(Outcome::Ready(buffer)) => buffer,
            other => panic!("no data: {:?}", other),
        };
        assert_eq!(fx.net.pool.payload(buffer), &[fill; 100][..]);
        fx.net.pool.release(buffer);
    }
    assert_eq!(
        fx.endpoint.socket_receive(&mut fx.net, socket, Wait::NoWait),
        Err(Error::NoPacket));
}

#[test]
fn overlapping_retransmission_is_trimmed() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(4096);
    let data: Vec<u8> = (0..200).map(|i| i as u8).collect();

    fx.deliver(peer_segment(port, PEER_ISN + 101, Some(next)), &data[100..]);
    // Covers the gap and half of what is queued.
    fx.deliver(peer_segment(port, PEER_ISN + 1, Some(next)), &data[..150]);

    assert_eq!(fx.endpoint.socket_bytes_available(&mut fx.net, socket), Ok(200));
    let mut received = Vec::new();
    while let Ok(Outcome::Ready(buffer)) = fx.endpoint.socket_receive(&mut fx.net, socket, Wait::NoWait) {
        received.extend_from_slice(fx.net.pool.payload(buffer));
        fx.net.pool.release(buffer);
    }
    assert_eq!(received, data);
}

#[test]
fn suspended_receiver_gets_data() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(4096);
    let waiter = match fx.endpoint.socket_receive(&mut fx.net, socket, Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("receive did not suspend: {:?}", other),
    };

    fx.deliver(peer_segment(port, PEER_ISN + 1, Some(next)), b"hello");
    let buffer = match fx.endpoint.take_resumed(waiter) {
        Some(Wakeup::Received(buffer)) => buffer,
        other => panic!("not resumed with data: {:?}", other),
    };
    assert_eq!(fx.net.pool.payload(buffer), b"hello");
    assert!(fx.endpoint.waiter(waiter).is_none());
}

#[test]
fn delayed_ack() {
    let mut fx = Fixture::new();
    let (_, port, next) = fx.connect(4096);
    let before = fx.net.sent.len();

    fx.deliver(peer_segment(port, PEER_ISN + 1, Some(next)), &[3; 10]);
    assert_eq!(fx.net.sent.len(), before);

    fx.tick(2);
    assert_eq!(fx.net.sent.len(), before + 1);
    assert_eq!(fx.last().ack_number, Some(TcpSeqNumber(PEER_ISN + 11)));
}

#[test]
fn active_close() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(4096);

    assert_eq!(
        fx.endpoint.socket_disconnect(&mut fx.net, socket, Wait::NoWait),
        Ok(Outcome::InProgress));
    let fin = fx.last();
    assert!(fin.flags.fin());
    assert_eq!(fin.seq_number, next);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::FinWait1));

    fx.deliver(peer_segment(port, PEER_ISN + 1, Some(next + 1)), &[]);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::FinWait2));

    fx.deliver(TcpRepr {
        flags: TcpFlags::FIN,
        ..peer_segment(port, PEER_ISN + 1, Some(next + 1))
    }, &[]);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::TimeWait));
    assert_eq!(fx.last().ack_number, Some(TcpSeqNumber(PEER_ISN + 2)));

    let ticks = fx.endpoint.config().time_wait_ticks() as usize;
    assert_eq!(ticks, 2400);
    fx.tick(ticks - 1);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::TimeWait));
    fx.tick(1);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Closed));
    assert_eq!(fx.net.pool.available(), BUFFERS);
}

#[test]
fn passive_close() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(4096);

    fx.deliver(TcpRepr {
        flags: TcpFlags::FIN,
        ..peer_segment(port, PEER_ISN + 1, Some(next))
    }, &[]);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::CloseWait));
    assert_eq!(fx.last().ack_number, Some(TcpSeqNumber(PEER_ISN + 2)));
    assert_eq!(
        fx.endpoint.socket_receive(&mut fx.net, socket, Wait::NoWait),
        Err(Error::NotConnected));

    let waiter = match fx.endpoint.socket_disconnect(&mut fx.net, socket, Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("disconnect did not suspend: {:?}", other),
    };
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::LastAck));
    assert!(fx.last().flags.fin());

    fx.deliver(peer_segment(port, PEER_ISN + 2, Some(next + 1)), &[]);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Closed));
    assert_eq!(fx.endpoint.take_resumed(waiter), Some(Wakeup::Ready));
}

#[test]
fn stray_segments_are_reset() {
    let mut fx = Fixture::new();

    let stray_ack = TcpRepr {
        src_port: 40000,
        dst_port: 1234,
        ..peer_segment(1234, 77, Some(TcpSeqNumber(900)))
    };
    fx.deliver(stray_ack, &[]);
    let reset = fx.last();
    assert!(reset.flags.rst());
    assert_eq!(reset.seq_number, TcpSeqNumber(900));
    assert_eq!(reset.ack_number, None);
    assert_eq!(reset.dst_port, 40000);

    let sent = fx.net.sent.len();
    fx.deliver(TcpRepr {
        flags: TcpFlags::RST,
        ..stray_ack
    }, &[]);
    assert_eq!(fx.net.sent.len(), sent);

    fx.deliver(TcpRepr {
        dst_port: 1234,
        ..syn_from(40000, 300)
    }, &[]);
    let refused = fx.last();
    assert!(refused.flags.rst());
    assert_eq!(refused.ack_number, Some(TcpSeqNumber(301)));
    assert_eq!(fx.net.pool.available(), BUFFERS);
}

#[test]
fn bad_checksum_is_dropped() {
    let mut fx = Fixture::new();
    let repr = TcpRepr {
        src_port: 40000,
        dst_port: 1234,
        ..peer_segment(1234, 77, Some(TcpSeqNumber(900)))
    };
    let buffer = fx.segment_buffer(PEER, &repr, b"data");
    fx.net.pool.payload_mut(buffer)[16] ^= 0xFF;
    fx.endpoint.packet_process(&mut fx.net, buffer);

    assert_eq!(fx.endpoint.info().checksum_errors, 1);
    assert!(fx.net.sent.is_empty());
    assert_eq!(fx.net.pool.available(), BUFFERS);
}

#[test]
fn deferred_queue_processing() {
    let mut fx = Fixture::new();
    let (socket, port, next) = fx.connect(4096);
    let repr = peer_segment(port, PEER_ISN + 1, Some(next));
    let buffer = fx.segment_buffer(PEER, &repr, b"queued");

    fx.endpoint.packet_receive(&mut fx.net, buffer);
    assert_eq!(fx.endpoint.socket_bytes_available(&mut fx.net, socket), Ok(0));
    fx.endpoint.queue_process(&mut fx.net);
    assert_eq!(fx.endpoint.socket_bytes_available(&mut fx.net, socket), Ok(6));
}

#[test]
fn unanswered_syn_times_out() {
    let mut fx = Fixture::new();
    let socket = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    fx.endpoint.client_socket_bind(&mut fx.net, socket, Some(5000), Wait::NoWait).unwrap();
    let waiter = match fx.endpoint.client_socket_connect(&mut fx.net, socket, PEER, 80, Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("connect did not suspend: {:?}", other),
    };

    fx.tick(109);
    assert_eq!(fx.endpoint.take_resumed(waiter), None);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::SynSent));
    fx.tick(1);

    assert_eq!(fx.endpoint.take_resumed(waiter), Some(Wakeup::Failed(Error::NotConnected)));
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Closed));
    assert_eq!(fx.net.sent.len(), 11);
    assert!(fx.net.sent.iter().all(|sent| sent.repr().flags.syn()));
}

#[test]
fn blocking_receive_times_out() {
    use std::time::Duration;

    let mut fx = Fixture::new();
    let (socket, _, _) = fx.connect(4096);
    let Fixture { endpoint, net } = fx;
    let blocking = Blocking::new(endpoint, net);

    assert_eq!(
        blocking.receive(socket, Duration::from_millis(10)),
        Err(Error::NoPacket));

    let state = blocking.process(|endpoint, _| endpoint.socket_state(socket));
    assert_eq!(state, Ok(State::Established));
}

#[test]
fn bind_waits_for_the_owner_to_unbind() {
    let mut fx = Fixture::new();
    let owner = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    let binder = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    assert_eq!(
        fx.endpoint.client_socket_bind(&mut fx.net, owner, Some(5000), Wait::NoWait),
        Ok(Outcome::Ready(5000)));
    assert_eq!(
        fx.endpoint.client_socket_bind(&mut fx.net, binder, Some(5000), Wait::NoWait),
        Err(Error::PortUnavailable));

    let waiter = match fx.endpoint.client_socket_bind(&mut fx.net, binder, Some(5000), Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("bind did not suspend: {:?}", other),
    };
    assert_eq!(fx.socket(binder).port(), None);
    assert_eq!(fx.endpoint.take_resumed(waiter), None);

    fx.endpoint.client_socket_unbind(&mut fx.net, owner).unwrap();
    assert_eq!(fx.endpoint.take_resumed(waiter), Some(Wakeup::Ready));
    assert_eq!(fx.socket(binder).port(), Some(5000));
    assert_eq!(fx.socket(owner).port(), None);
    assert_eq!(fx.endpoint.port_owner(5000), Some(binder.0));
}

#[test]
fn listened_port_cannot_be_bound() {
    let mut fx = Fixture::new();
    let server = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    let client = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    fx.endpoint.server_socket_listen(80, server, 2, None).unwrap();

    assert_eq!(
        fx.endpoint.client_socket_bind(&mut fx.net, client, Some(80), Wait::NoWait),
        Err(Error::PortUnavailable));
    assert_eq!(
        fx.endpoint.client_socket_bind(&mut fx.net, client, Some(80), Wait::Suspend),
        Err(Error::PortUnavailable));
    assert_eq!(fx.endpoint.free_port_find(&fx.net, 80), Ok(81));
    // A socket offered to a listener is not a client socket.
    assert_eq!(
        fx.endpoint.client_socket_bind(&mut fx.net, server, Some(81), Wait::NoWait),
        Err(Error::NotClosed));

    fx.endpoint.server_socket_unlisten(&mut fx.net, 80).unwrap();
    assert_eq!(
        fx.endpoint.client_socket_bind(&mut fx.net, client, Some(80), Wait::NoWait),
        Ok(Outcome::Ready(80)));
}

#[test]
fn relisten_without_queued_requests() {
    let mut fx = Fixture::new();
    let first = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    fx.endpoint.server_socket_listen(80, first, 2, None).unwrap();
    fx.deliver_from(PEER, syn_from(40000, 1000), &[]);
    assert_eq!(
        fx.endpoint.server_socket_accept(&mut fx.net, first, Wait::NoWait),
        Ok(Outcome::InProgress));

    let second = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    assert_eq!(
        fx.endpoint.server_socket_relisten(&mut fx.net, 80, second),
        Ok(Relisten::Adopted));
    assert_eq!(fx.endpoint.socket_state(second), Ok(State::Listen));
    assert_eq!(fx.endpoint.listener(80).unwrap().socket, Some(second));
    assert_eq!(
        fx.endpoint.server_socket_relisten(&mut fx.net, 80, first),
        Err(Error::InvalidRelisten));

    fx.deliver_from(PEER_B, syn_from(40001, 2000), &[]);
    assert_eq!(fx.socket(second).peer, PEER_B);
    assert_eq!(fx.socket(second).port(), Some(80));
    assert_eq!(fx.socket(first).peer, PEER);
    assert_eq!(fx.endpoint.listener(80).unwrap().socket, None);
}

#[test]
fn disconnect_before_any_request_withdraws_the_server_socket() {
    let mut fx = Fixture::new();
    let socket = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    fx.endpoint.server_socket_listen(80, socket, 2, None).unwrap();
    let waiter = match fx.endpoint.server_socket_accept(&mut fx.net, socket, Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("accept did not suspend: {:?}", other),
    };
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::SynReceived));

    assert_eq!(
        fx.endpoint.socket_disconnect(&mut fx.net, socket, Wait::NoWait),
        Ok(Outcome::Ready(())));
    assert!(fx.net.sent.is_empty());
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Closed));
    assert_eq!(fx.socket(socket).port(), None);
    assert_eq!(fx.endpoint.take_resumed(waiter), Some(Wakeup::Failed(Error::NotConnected)));
    assert_eq!(fx.endpoint.listener(80).unwrap().socket, None);

    // The next request waits in the queue for a new server socket.
    fx.deliver(syn_from(40000, 1000), &[]);
    assert!(fx.net.sent.is_empty());
    assert_eq!(fx.endpoint.listener(80).unwrap().queue_len(), 1);
    assert_eq!(
        fx.endpoint.server_socket_relisten(&mut fx.net, 80, socket),
        Ok(Relisten::ConnectionPending));
    assert_eq!(fx.socket(socket).peer, PEER);
}

#[test]
fn accept_timeout_before_any_request_withdraws_the_server_socket() {
    let mut fx = Fixture::new();
    let socket = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    fx.endpoint.server_socket_listen(80, socket, 2, None).unwrap();
    let waiter = match fx.endpoint.server_socket_accept(&mut fx.net, socket, Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("accept did not suspend: {:?}", other),
    };

    assert_eq!(
        fx.endpoint.suspension_timeout(&mut fx.net, waiter),
        Ok(Wakeup::Failed(Error::NotConnected)));
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Closed));
    assert_eq!(fx.endpoint.listener(80).unwrap().socket, None);

    fx.deliver(syn_from(40000, 1000), &[]);
    assert!(fx.net.sent.is_empty());
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Closed));
    assert_eq!(fx.endpoint.listener(80).unwrap().queue_len(), 1);
}

#[test]
fn unaccept_reports_the_reset() {
    static DISCONNECTS: AtomicUsize = AtomicUsize::new(0);
    fn disconnected(_: SocketKey) {
        DISCONNECTS.fetch_add(1, Ordering::SeqCst);
    }

    let mut fx = Fixture::new();
    let socket = fx.endpoint.socket_create(SocketOptions {
        disconnect: Some(disconnected),
        ..SocketOptions::default()
    }).unwrap();
    fx.endpoint.server_socket_listen(80, socket, 2, None).unwrap();
    fx.deliver(syn_from(40000, 1000), &[]);
    assert_eq!(
        fx.endpoint.server_socket_accept(&mut fx.net, socket, Wait::NoWait),
        Ok(Outcome::InProgress));
    let synack = fx.last();

    fx.endpoint.server_socket_unaccept(&mut fx.net, socket).unwrap();
    let reset = fx.last();
    assert!(reset.flags.rst());
    assert_eq!(reset.seq_number, synack.seq_number + 1);
    assert_eq!(reset.dst_port, 40000);
    assert_eq!(DISCONNECTS.load(Ordering::SeqCst), 1);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Closed));
    assert_eq!(fx.socket(socket).port(), None);
}

#[test]
fn handshake_timeout_reports_the_reset() {
    static DISCONNECTS: AtomicUsize = AtomicUsize::new(0);
    fn disconnected(_: SocketKey) {
        DISCONNECTS.fetch_add(1, Ordering::SeqCst);
    }

    let mut fx = Fixture::new();
    let socket = fx.endpoint.socket_create(SocketOptions {
        disconnect: Some(disconnected),
        ..SocketOptions::default()
    }).unwrap();
    fx.endpoint.server_socket_listen(80, socket, 2, None).unwrap();
    fx.deliver(syn_from(40000, 1000), &[]);
    let waiter = match fx.endpoint.server_socket_accept(&mut fx.net, socket, Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("accept did not suspend: {:?}", other),
    };

    assert_eq!(
        fx.endpoint.suspension_timeout(&mut fx.net, waiter),
        Ok(Wakeup::Failed(Error::NotConnected)));
    assert!(fx.last().flags.rst());
    assert_eq!(DISCONNECTS.load(Ordering::SeqCst), 1);
    assert_eq!(fx.endpoint.socket_state(socket), Ok(State::Closed));
}

#[test]
fn unaccept_hands_the_port_to_binders() {
    let mut fx = Fixture::new();
    let first = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    let second = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    let client = fx.endpoint.socket_create(SocketOptions::default()).unwrap();
    fx.endpoint.server_socket_listen(80, first, 2, None).unwrap();
    fx.deliver_from(PEER, syn_from(40000, 1000), &[]);
    assert_eq!(
        fx.endpoint.server_socket_relisten(&mut fx.net, 80, second),
        Ok(Relisten::Adopted));
    fx.deliver_from(PEER_B, syn_from(40001, 2000), &[]);
    fx.endpoint.server_socket_unlisten(&mut fx.net, 80).unwrap();
    assert_eq!(fx.socket(first).port(), Some(80));
    assert_eq!(fx.socket(second).port(), Some(80));

    let waiter = match fx.endpoint.client_socket_bind(&mut fx.net, client, Some(80), Wait::Suspend) {
        Ok(Outcome::Suspended(waiter)) => waiter,
        other => panic!("bind did not suspend: {:?}", other),
    };

    // The other server socket still holds the port.
    fx.endpoint.server_socket_unaccept(&mut fx.net, first).unwrap();
    assert_eq!(fx.endpoint.take_resumed(waiter), None);
    assert_eq!(fx.socket(client).port(), None);

    fx.endpoint.server_socket_unaccept(&mut fx.net, second).unwrap();
    assert_eq!(fx.endpoint.take_resumed(waiter), Some(Wakeup::Ready));
    assert_eq!(fx.socket(client).port(), Some(80));
    assert_eq!(fx.endpoint.port_owner(80), Some(client.0));
}
