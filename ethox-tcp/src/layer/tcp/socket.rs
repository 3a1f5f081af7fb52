use crate::layer::buffer::{BufferKey, BufferQueue, Pool};
use crate::layer::ip::InterfaceId;
use crate::managed::{Key, Link, Node, Ring};
use crate::wire::{IpAddress, TcpSeqNumber};

use super::suspend::Suspended;

/// The handle of a socket.
///
/// Keys are generation checked, a key of a deleted socket stays invalid even when its slot was
/// reused for a new socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SocketKey(pub(crate) Key);

/// Tag of the ring of all created sockets.
#[derive(Debug)]
pub enum Created { }

/// Tag of the rings of bound sockets, one per port hash bucket.
#[derive(Debug)]
pub enum Bound { }

/// State enum of the statemachine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// No connection, and not waiting for one.
    Closed,

    /// A server socket waiting for a connection request.
    ///
    /// Turns into SynReceived once a request was received or taken from a listener queue.
    Listen,

    /// An open connection request.
    SynSent,

    /// Connection request we intend to answer, waiting on ack.
    SynReceived,

    /// An open connection.
    Established,

    /// Closed our side of the connection.
    FinWait1,

    /// Closing connection nicely, initiated by us and acknowledged.
    FinWait2,

    /// Closed both sides but we don't know the other knows.
    Closing,

    /// Both sides recognized connection as closed.
    TimeWait,

    /// Other side closed its connection.
    CloseWait,

    /// Connection closed after other side closed its already.
    LastAck,
}

/// Per-socket options fixed at creation.
#[derive(Clone, Copy, Debug)]
pub struct SocketOptions {
    /// A name for diagnostics.
    pub name: &'static str,
    /// Type of service of all outgoing segments.
    pub tos: u8,
    /// Time to live of all outgoing segments.
    pub ttl: u8,
    /// Whether outgoing segments may be fragmented.
    pub fragment: bool,
    /// The receive window, in bytes.
    pub window_size: u32,
    /// Called when a segment with the URG flag arrives.
    pub urgent_data: Option<fn(SocketKey)>,
    /// Called when the peer closes or resets the connection.
    pub disconnect: Option<fn(SocketKey)>,
}

/// A snapshot of the statistics and windows of one socket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SocketInfo {
    /// Data segments sent.
    pub packets_sent: u64,
    /// Data bytes sent.
    pub bytes_sent: u64,
    /// Data segments accepted.
    pub packets_received: u64,
    /// Data bytes accepted.
    pub bytes_received: u64,
    /// Segments retransmitted.
    pub retransmit_packets: u64,
    /// Segments dropped for a bad checksum.
    pub checksum_errors: u64,
    /// Buffers in the receive queue.
    pub receive_queue_depth: usize,
    /// Buffers in the sent queue.
    pub transmit_queue_depth: usize,
    /// Current state.
    pub state: State,
    /// The window the peer advertised.
    pub tx_window: u32,
    /// The window we advertise.
    pub rx_window: u32,
    /// The congestion window.
    pub congestion_window: u32,
}

/// Notification hooks of a socket.
///
/// These run synchronously within the engine call that triggered them.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Callbacks {
    pub(crate) establish: Option<fn(SocketKey)>,
    pub(crate) disconnect: Option<fn(SocketKey)>,
    pub(crate) disconnect_complete: Option<fn(SocketKey)>,
    pub(crate) receive: Option<fn(SocketKey)>,
    pub(crate) urgent_data: Option<fn(SocketKey)>,
    pub(crate) timed_wait: Option<fn(SocketKey)>,
    pub(crate) queue_depth: Option<fn(SocketKey)>,
    pub(crate) window_update: Option<fn(SocketKey)>,
}

/// Whether the socket owns a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Binding {
    Unbound,
    /// Waiting for the owner of `port` to release it.
    Pending,
    Bound,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct Fin {
    pub(crate) sent: bool,
    pub(crate) received: bool,
    pub(crate) acked: bool,
    /// The sequence number of a received FIN.
    pub(crate) sequence: TcpSeqNumber,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct Send {
    /// The next sequence number to use for transmission.
    ///
    /// In RFC793 this is referred to as `SND.NXT`.
    pub(crate) next: TcpSeqNumber,

    /// The send window size indicated by the receiver, already scaled.
    pub(crate) window: u32,

    /// Bytes sent and not yet acknowledged, the flight size.
    pub(crate) outstanding: u32,

    /// The shift the peer applies to its window field.
    pub(crate) scale: u8,

    /// The window scale the peer offered in its SYN.
    pub(crate) offered_scale: Option<u8>,

    /// Sent segments kept for retransmission before a send has to wait.
    pub(crate) queue_max: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct Receive {
    /// The next expected sequence number.
    ///
    /// In RFC793 this is referred to as `RCV.NXT`.
    pub(crate) next: TcpSeqNumber,

    /// The sequence number we last acknowledged.
    pub(crate) acked: TcpSeqNumber,

    /// The space left for received data.
    pub(crate) window: u32,

    /// The window of an empty receive queue.
    pub(crate) window_default: u32,

    /// The window we last advertised.
    pub(crate) window_last_sent: u32,

    /// The shift we apply to our window field.
    pub(crate) scale: u8,

    /// Receive queue depth after which new data is refused.
    pub(crate) queue_max: usize,

    /// Buffers at the head of the receive queue that are `Ready`.
    pub(crate) ready: usize,

    /// In-order segments since the last acknowledgement, for ack-every-n.
    pub(crate) unacked_segments: u32,
}

/// Models TCP NewReno flow control and congestion avoidance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct NewReno {
    /// Decider between slow-start and congestion avoidance.
    pub(crate) ssthresh: u32,

    /// The window dictated by congestion.
    pub(crate) congestion_window: u32,

    /// The highest sequence number sent when fast recovery started.
    pub(crate) recover: TcpSeqNumber,

    /// The left edge of the sent data before the last new acknowledgement.
    pub(crate) previous_highest_ack: TcpSeqNumber,

    pub(crate) fast_recovery: bool,

    pub(crate) duplicate_acks: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct Mss {
    /// A locally configured limit, zero if unset.
    pub(crate) custom: u16,
    /// The segment size used for this connection.
    pub(crate) connect: u32,
    /// The square of `connect`, for congestion avoidance.
    pub(crate) connect2: u32,
    /// What the peer announced.
    pub(crate) peer: u32,
}

/// The one generic timer of a socket and its retry bookkeeping.
///
/// Used in turn for SYN retries, retransmission, zero window probing, FIN retries and TIME_WAIT.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct Timer {
    /// Fast ticks until expiry, zero when stopped.
    pub(crate) timeout: u32,
    pub(crate) rate: u32,
    pub(crate) retries: u32,
    pub(crate) max_retries: u32,
    pub(crate) shift: u32,
    /// Fast ticks until a delayed acknowledgement is due.
    pub(crate) delayed_ack: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct Keepalive {
    pub(crate) enabled: bool,
    /// Seconds until the next probe.
    pub(crate) timeout: u32,
    pub(crate) retries: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct ZeroWindowProbe {
    /// A byte is waiting for the window to open.
    pub(crate) has_data: bool,
    pub(crate) data: u8,
    pub(crate) sequence: TcpSeqNumber,
    pub(crate) failures: u32,
    /// The application buffer the probe byte was taken from.
    pub(crate) buffer: Option<BufferKey>,
    /// The peer took the probe byte, the next send of `buffer` skips it.
    pub(crate) accepted: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct Stats {
    pub(crate) packets_sent: u64,
    pub(crate) bytes_sent: u64,
    pub(crate) packets_received: u64,
    pub(crate) bytes_received: u64,
    pub(crate) retransmit_packets: u64,
    pub(crate) checksum_errors: u64,
}

/// The suspension lists of a socket.
#[derive(Debug, Default)]
pub(crate) struct WaitLists {
    pub(crate) bind: Ring<Suspended>,
    pub(crate) connect: Ring<Suspended>,
    pub(crate) disconnect: Ring<Suspended>,
    pub(crate) receive: Ring<Suspended>,
    pub(crate) transmit: Ring<Suspended>,
}

/// The control block of one connection.
///
/// Sockets live in a fixed pool of the endpoint and are only ever referred to by their
/// [`SocketKey`]. The same block is reused for every connection of the socket, a reset returns
/// it to `Closed` while keeping its port and options.
///
/// [`SocketKey`]: struct.SocketKey.html
#[derive(Debug)]
pub struct Socket {
    pub(crate) created: Option<Link>,
    pub(crate) bucket: Option<Link>,
    pub(crate) name: &'static str,
    pub(crate) client: bool,

    pub(crate) binding: Binding,
    pub(crate) port: u16,
    pub(crate) peer: IpAddress,
    pub(crate) peer_port: u16,
    pub(crate) local: IpAddress,
    pub(crate) interface: Option<InterfaceId>,
    pub(crate) next_hop: IpAddress,

    pub(crate) state: State,
    pub(crate) fin: Fin,
    pub(crate) send: Send,
    pub(crate) recv: Receive,
    pub(crate) flow: NewReno,
    pub(crate) mss: Mss,

    pub(crate) sent: BufferQueue,
    pub(crate) received: BufferQueue,
    pub(crate) waiting: WaitLists,

    pub(crate) timer: Timer,
    pub(crate) keepalive: Keepalive,
    pub(crate) probe: ZeroWindowProbe,

    pub(crate) callbacks: Callbacks,
    pub(crate) stats: Stats,
    pub(crate) tos: u8,
    pub(crate) ttl: u8,
    pub(crate) fragment: bool,
}

impl State {
    /// Whether both sides have exchanged their SYN.
    pub fn is_synchronized(self) -> bool {
        match self {
            State::Closed | State::Listen | State::SynSent | State::SynReceived => false,
            _ => true,
        }
    }

    /// Whether the peer has closed its side, so no more data will arrive.
    pub fn peer_closed(self) -> bool {
        match self {
            State::CloseWait | State::LastAck | State::Closing | State::TimeWait => true,
            _ => false,
        }
    }
}

impl Socket {
    pub(crate) fn new(options: &SocketOptions, transmit_timer_rate: u32) -> Self {
        let mut socket = Socket::default();
        socket.name = options.name;
        socket.tos = options.tos;
        socket.ttl = options.ttl;
        socket.fragment = options.fragment;
        socket.recv.window_default = options.window_size;
        socket.recv.window = options.window_size;
        socket.recv.window_last_sent = options.window_size;
        socket.callbacks.urgent_data = options.urgent_data;
        socket.callbacks.disconnect = options.disconnect;
        socket.timer.rate = transmit_timer_rate;
        socket
    }

    /// The state of the connection.
    pub fn state(&self) -> State {
        self.state
    }

    /// The locally bound port, if any.
    pub fn port(&self) -> Option<u16> {
        match self.binding {
            Binding::Bound => Some(self.port),
            _ => None,
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.binding == Binding::Bound
    }

    /// A server socket offered by its listener that has not adopted a request yet.
    pub(crate) fn awaits_request(&self) -> bool {
        match self.state {
            State::Listen | State::SynReceived => self.binding == Binding::Unbound,
            _ => false,
        }
    }

    /// The value of our window field, for segments other than SYN.
    pub(crate) fn window_field(&self) -> u16 {
        let scaled = self.recv.window >> self.recv.scale;
        if scaled > 0xFFFF {
            0xFFFF
        } else {
            scaled as u16
        }
    }

    /// The number of bytes that may be sent right now.
    ///
    /// This is the smaller of the peer's and the congestion window minus the flight size, capped
    /// to one segment. During the first two duplicate acknowledgements the congestion window is
    /// inflated by two segments, RFC 5681 section 3.2.
    pub(crate) fn transmit_window(&self) -> u32 {
        let mss = self.mss.connect;
        let mut window = if self.send.window > self.flow.congestion_window {
            let mut window = self.flow.congestion_window;
            if self.flow.duplicate_acks == 1 || self.flow.duplicate_acks == 2 {
                window = window.saturating_add(2 * mss).min(self.send.window);
            }
            window
        } else {
            self.send.window
        };
        window = window.saturating_sub(self.send.outstanding);
        window.min(mss)
    }

    /// The retransmission timeout after `retries` retries.
    pub(crate) fn backoff(&self, retries: u32) -> u32 {
        let shift = retries.saturating_mul(self.timer.shift).min(16);
        self.timer.rate.saturating_mul(1 << shift)
    }

    /// Forget everything about the current connection.
    ///
    /// Queued buffers are released, or for those the driver still holds, marked so that the driver
    /// releases them. The socket keeps its port, options and callbacks.
    pub(crate) fn cleanup<P: Pool + ?Sized>(&mut self, pool: &mut P) {
        self.sent.release_sent(pool);
        self.received.release_all(pool);
        self.state = State::Closed;
        self.fin = Fin::default();
        self.peer = IpAddress::Unspecified;
        self.peer_port = 0;
        self.interface = None;
        self.next_hop = IpAddress::Unspecified;
        self.local = IpAddress::Unspecified;
        self.send = Send {
            queue_max: self.send.queue_max,
            ..Send::default()
        };
        self.recv = Receive {
            window: self.recv.window_default,
            window_default: self.recv.window_default,
            window_last_sent: self.recv.window_default,
            queue_max: self.recv.queue_max,
            ..Receive::default()
        };
        self.flow = NewReno::default();
        self.mss = Mss {
            custom: self.mss.custom,
            ..Mss::default()
        };
        self.timer = Timer {
            rate: self.timer.rate,
            max_retries: self.timer.max_retries,
            shift: self.timer.shift,
            ..Timer::default()
        };
        self.keepalive.timeout = 0;
        self.keepalive.retries = 0;
        self.probe = ZeroWindowProbe::default();
    }

    /// The bytes of data ready for the application.
    pub(crate) fn bytes_available<P: Pool + ?Sized>(&self, pool: &P) -> usize {
        let mut total = 0;
        let mut next = self.received.front();
        let mut remaining = self.recv.ready;
        while let Some(buffer) = next {
            if remaining == 0 {
                break;
            }
            total += pool.payload(buffer).len();
            remaining -= 1;
            next = BufferQueue::next_of(pool, buffer);
        }
        total
    }

    pub(crate) fn info(&self) -> SocketInfo {
        SocketInfo {
            packets_sent: self.stats.packets_sent,
            bytes_sent: self.stats.bytes_sent,
            packets_received: self.stats.packets_received,
            bytes_received: self.stats.bytes_received,
            retransmit_packets: self.stats.retransmit_packets,
            checksum_errors: self.stats.checksum_errors,
            receive_queue_depth: self.received.len(),
            transmit_queue_depth: self.sent.len(),
            state: self.state,
            tx_window: self.send.window,
            rx_window: self.recv.window,
            congestion_window: self.flow.congestion_window,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        State::Closed
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            name: "",
            tos: 0,
            ttl: 128,
            fragment: true,
            window_size: 8192,
            urgent_data: None,
            disconnect: None,
        }
    }
}

impl Default for Socket {
    fn default() -> Self {
        Socket {
            created: None,
            bucket: None,
            name: "",
            client: false,
            binding: Binding::Unbound,
            port: 0,
            peer: IpAddress::Unspecified,
            peer_port: 0,
            local: IpAddress::Unspecified,
            interface: None,
            next_hop: IpAddress::Unspecified,
            state: State::Closed,
            fin: Fin::default(),
            send: Send::default(),
            recv: Receive::default(),
            flow: NewReno::default(),
            mss: Mss::default(),
            sent: BufferQueue::new(),
            received: BufferQueue::new(),
            waiting: WaitLists::default(),
            timer: Timer::default(),
            keepalive: Keepalive::default(),
            probe: ZeroWindowProbe::default(),
            callbacks: Callbacks::default(),
            stats: Stats::default(),
            tos: 0,
            ttl: 0,
            fragment: false,
        }
    }
}

impl Node<Created> for Socket {
    fn link(&self) -> Option<Link> {
        self.created
    }

    fn set_link(&mut self, link: Option<Link>) {
        self.created = link;
    }
}

impl Node<Bound> for Socket {
    fn link(&self) -> Option<Link> {
        self.bucket
    }

    fn set_link(&mut self, link: Option<Link>) {
        self.bucket = link;
    }
}
