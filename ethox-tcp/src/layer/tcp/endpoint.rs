use core::sync::atomic::AtomicBool;

use crate::layer::{Error, Result};
use crate::layer::buffer::BufferQueue;
use crate::layer::ip::Ip;
use crate::managed::{Ring, Slice, Slot, SlotMap};

use super::config::Config;
use super::server::{Active, Listener};
use super::siphash::{FourTuple, IsnGenerator};
use super::socket::{Binding, Bound, Created, Socket, SocketInfo, SocketKey, SocketOptions, State};
use super::suspend::{WaitList, Waiter, Wakeup};

/// The TCP engine of one IP instance.
///
/// Holds every socket, the port table, the listen registry and the suspended callers. All of it
/// lives in the storage given to [`new`], the engine never allocates. Application calls and
/// segment processing both take the IP layer as an argument, see the [module documentation].
///
/// [`new`]: #method.new
/// [module documentation]: index.html
pub struct Endpoint<'a> {
    pub(crate) config: Config,
    pub(crate) isn: IsnGenerator,

    pub(crate) sockets: SlotMap<'a, Socket>,
    pub(crate) created: Ring<Created>,
    pub(crate) buckets: Slice<'a, Ring<Bound>>,

    pub(crate) listeners: SlotMap<'a, Listener>,
    pub(crate) active: Ring<Active>,

    pub(crate) waiters: SlotMap<'a, Waiter>,
    pub(crate) cleanup_event: AtomicBool,

    /// Segments received but not yet processed.
    pub(crate) inbound: BufferQueue,

    /// Fast timer ticks since creation.
    pub(crate) ticks: u64,
    /// Fast ticks left until the next slow tick.
    pub(crate) slow_countdown: u32,
    /// Ephemeral port searches so far.
    pub(crate) port_searches: u64,

    pub(crate) info: Info,
}

/// The fixed storage of an endpoint.
///
/// Every pool is a pair of elements and slots, the capacity of a pool is the smaller of the two.
/// The number of port hash buckets must be a power of two.
pub struct Storage<'a> {
    /// Socket control blocks.
    pub sockets: Slice<'a, Socket>,
    /// Slots for the socket pool.
    pub socket_slots: Slice<'a, Slot>,
    /// Listener entries.
    pub listeners: Slice<'a, Listener>,
    /// Slots for the listener pool.
    pub listener_slots: Slice<'a, Slot>,
    /// Suspended callers.
    pub waiters: Slice<'a, Waiter>,
    /// Slots for the waiter pool.
    pub waiter_slots: Slice<'a, Slot>,
    /// Rings of the port hash table.
    pub buckets: Slice<'a, Ring<Bound>>,
}

/// Engine wide statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Info {
    /// Data segments sent.
    pub packets_sent: u64,
    /// Data bytes sent.
    pub bytes_sent: u64,
    /// Data segments accepted.
    pub packets_received: u64,
    /// Data bytes accepted.
    pub bytes_received: u64,
    /// Segments dropped as malformed or not permitted.
    pub invalid_packets: u64,
    /// Segments dropped for other reasons.
    pub receive_packets_dropped: u64,
    /// Segments dropped for a bad checksum.
    pub checksum_errors: u64,
    /// Connections opened, actively or passively.
    pub connections: u64,
    /// Connection requests received by a listener.
    pub passive_connections: u64,
    /// Connections closed by the application.
    pub disconnections: u64,
    /// Queued connection requests evicted by newer ones.
    pub connections_dropped: u64,
    /// Segments retransmitted.
    pub retransmit_packets: u64,
}

/// What the state machine needs besides the socket itself.
///
/// Borrows the parts of the endpoint disjoint from the socket pool.
pub(crate) struct Context<'c, I: Ip + ?Sized> {
    pub(crate) ip: &'c mut I,
    pub(crate) config: &'c Config,
    pub(crate) info: &'c mut Info,
}

/// Outcomes of socket processing that reach beyond the socket.
///
/// The socket level code can not touch waiters or call the application, it only records what
/// happened. The endpoint then resumes waiters and runs the notification callbacks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Signals {
    /// The handshake completed.
    pub(crate) established: bool,
    /// The connection was reset or timed out.
    pub(crate) reset: bool,
    /// The peer sent its FIN.
    pub(crate) peer_closed: bool,
    /// Entered TIME_WAIT.
    pub(crate) time_wait: bool,
    /// The connection was closed gracefully.
    pub(crate) closed: bool,
    /// In-order data became ready.
    pub(crate) received: bool,
    /// A segment carried the URG flag.
    pub(crate) urgent: bool,
    /// The send window opened.
    pub(crate) transmit: bool,
    /// The sent queue dropped below its depth.
    pub(crate) queue_depth: bool,
    /// The peer's window grew.
    pub(crate) window_update: bool,
}

impl<'a> Endpoint<'a> {
    /// Create an endpoint on preallocated storage.
    ///
    /// # Panics
    /// This function panics if the number of port hash buckets is not a power of two.
    pub fn new(storage: Storage<'a>, config: Config, isn: IsnGenerator) -> Self {
        let Storage {
            sockets,
            socket_slots,
            listeners,
            listener_slots,
            waiters,
            waiter_slots,
            mut buckets,
        } = storage;

        assert!(buckets.len().is_power_of_two(), "bucket count must be a power of two");
        for bucket in buckets.iter_mut() {
            *bucket = Ring::new();
        }

        Endpoint {
            slow_countdown: config.fast_timer_rate,
            config,
            isn,
            sockets: SlotMap::new(sockets, socket_slots),
            created: Ring::new(),
            buckets,
            listeners: SlotMap::new(listeners, listener_slots),
            active: Ring::new(),
            waiters: SlotMap::new(waiters, waiter_slots),
            cleanup_event: AtomicBool::new(false),
            inbound: BufferQueue::new(),
            ticks: 0,
            port_searches: 0,
            info: Info::default(),
        }
    }
}

impl Storage<'static> {
    /// Allocate storage for a number of sockets.
    ///
    /// Provides a listener and four waiters per socket, and one bucket per socket rounded up to a
    /// power of two.
    #[cfg(feature = "std")]
    pub fn with_capacity(sockets: usize) -> Self {
        fn many<T>(count: usize, init: impl Fn() -> T) -> Slice<'static, T> {
            Slice::Many((0..count).map(|_| init()).collect())
        }

        Storage {
            sockets: many(sockets, Socket::default),
            socket_slots: many(sockets, Slot::default),
            listeners: many(sockets, Listener::default),
            listener_slots: many(sockets, Slot::default),
            waiters: many(4 * sockets, Waiter::default),
            waiter_slots: many(4 * sockets, Slot::default),
            buckets: many(sockets.next_power_of_two(), Ring::new),
        }
    }
}

impl<'a> Endpoint<'a> {
    /// The engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Engine wide statistics.
    pub fn info(&self) -> Info {
        self.info
    }

    /// Inspect a socket.
    pub fn socket(&self, socket: SocketKey) -> Option<&Socket> {
        self.sockets.get(socket.0)
    }

    pub(crate) fn socket_mut(&mut self, socket: SocketKey) -> Result<&mut Socket> {
        self.sockets.get_mut(socket.0).ok_or(Error::InvalidSocket)
    }

    /// Borrow a socket and the context for processing it.
    pub(crate) fn split<'s, I: Ip + ?Sized>(&'s mut self, ip: &'s mut I, socket: SocketKey)
        -> Option<(&'s mut Socket, Context<'s, I>)>
    {
        let socket = self.sockets.get_mut(socket.0)?;
        let cx = Context {
            ip,
            config: &self.config,
            info: &mut self.info,
        };
        Some((socket, cx))
    }

    /// The bucket index of a port in the hash table.
    pub(crate) fn bucket_of(&self, port: u16) -> usize {
        let port = usize::from(port);
        (port + (port >> 8)) & (self.buckets.len() - 1)
    }

    /// The initial sequence number for a connection, RFC 6528.
    pub(crate) fn initial_sequence(&self, tuple: FourTuple) -> crate::wire::TcpSeqNumber {
        let millis = self.ticks * 1000 / u64::from(self.config.fast_timer_rate.max(1));
        self.isn.get_isn(tuple, millis)
    }

    /// Create a socket.
    ///
    /// The socket starts out `Closed` and unbound with the engine's default transmit parameters.
    pub fn socket_create(&mut self, options: SocketOptions) -> Result<SocketKey> {
        if options.window_size == 0 {
            return Err(Error::OptionError);
        }
        if !self.config.window_scaling && options.window_size > 0xFFFF {
            return Err(Error::OptionError);
        }

        let mut socket = Socket::new(&options, self.config.transmit_timer_rate);
        socket.send.queue_max = self.config.maximum_tx_queue;
        socket.recv.queue_max = self.config.maximum_rx_queue;
        socket.timer.max_retries = self.config.maximum_retries;
        socket.timer.shift = self.config.retry_shift;
        socket.keepalive.enabled = self.config.keepalive;

        let key = self.sockets.insert(socket).ok_or(Error::Exhausted)?;
        self.created.push_back(&mut self.sockets, key);
        net_trace!("tcp: created socket {:?} {}", key, options.name);
        Ok(SocketKey(key))
    }

    /// Delete a socket.
    ///
    /// The socket must be unbound and have no waiters. A listener that still refers to it keeps
    /// its port but loses its server socket.
    pub fn socket_delete(&mut self, socket: SocketKey) -> Result<()> {
        let entry = self.sockets.get(socket.0).ok_or(Error::InvalidSocket)?;
        if entry.binding != Binding::Unbound {
            return Err(Error::StillBound);
        }
        if entry.state != State::Closed && entry.state != State::Listen {
            return Err(Error::NotClosed);
        }

        const LISTS: [WaitList; 5] = [
            WaitList::Bind,
            WaitList::Connect,
            WaitList::Disconnect,
            WaitList::Receive,
            WaitList::Transmit,
        ];
        if LISTS.iter().any(|&list| self.has_waiters(socket, list)) {
            return Err(Error::AlreadySuspended);
        }

        if entry.state == State::Listen {
            self.detach_listener(socket);
        }

        self.created.remove(&mut self.sockets, socket.0);
        self.sockets.remove(socket.0);
        Ok(())
    }

    /// The state of a socket.
    pub fn socket_state(&self, socket: SocketKey) -> Result<State> {
        self.socket(socket).map(Socket::state).ok_or(Error::InvalidSocket)
    }

    /// Statistics and windows of a socket.
    pub fn socket_info(&self, socket: SocketKey) -> Result<SocketInfo> {
        self.socket(socket).map(Socket::info).ok_or(Error::InvalidSocket)
    }

    /// Set a local limit on the segment size.
    ///
    /// Only permitted before the connection is synchronized. Zero removes the limit.
    pub fn socket_mss_set(&mut self, socket: SocketKey, mss: u16) -> Result<()> {
        let socket = self.socket_mut(socket)?;
        if socket.state.is_synchronized() {
            return Err(Error::NotClosed);
        }
        socket.mss.custom = mss;
        Ok(())
    }

    /// The segment size of the connection, or the local limit before one is established.
    pub fn socket_mss_get(&self, socket: SocketKey) -> Result<u32> {
        let socket = self.socket(socket).ok_or(Error::InvalidSocket)?;
        Ok(match socket.mss.connect {
            0 => u32::from(socket.mss.custom),
            mss => mss,
        })
    }

    /// The segment size announced by the peer.
    pub fn socket_peer_mss_get(&self, socket: SocketKey) -> Result<u32> {
        self.socket(socket).map(|socket| socket.mss.peer).ok_or(Error::InvalidSocket)
    }

    /// Address and port of the peer.
    pub fn socket_peer_info_get(&self, socket: SocketKey) -> Result<(crate::wire::IpAddress, u16)> {
        let socket = self.socket(socket).ok_or(Error::InvalidSocket)?;
        match socket.state {
            State::Closed | State::Listen | State::SynSent => Err(Error::NotConnected),
            _ => Ok((socket.peer, socket.peer_port)),
        }
    }

    /// Configure the retransmission parameters of a socket.
    ///
    /// `queue_max` bounds the sent queue, `timeout` is the initial retransmission timeout in fast
    /// ticks, `max_retries` the retransmissions before a reset and `shift` the exponential
    /// backoff per retry.
    pub fn socket_transmit_configure(
        &mut self,
        socket: SocketKey,
        queue_max: usize,
        timeout: u32,
        max_retries: u32,
        shift: u32,
    ) -> Result<()> {
        if queue_max == 0 || timeout == 0 {
            return Err(Error::OptionError);
        }
        let socket = self.socket_mut(socket)?;
        socket.send.queue_max = queue_max;
        socket.timer.rate = timeout;
        socket.timer.max_retries = max_retries;
        socket.timer.shift = shift;
        Ok(())
    }

    /// Bound the number of buffers in the receive queue.
    pub fn socket_receive_queue_max_set(&mut self, socket: SocketKey, max: usize) -> Result<()> {
        if max == 0 {
            return Err(Error::OptionError);
        }
        self.socket_mut(socket)?.recv.queue_max = max;
        Ok(())
    }

    /// Data bytes ready to be received.
    pub fn socket_bytes_available<I: Ip + ?Sized>(&self, ip: &mut I, socket: SocketKey)
        -> Result<usize>
    {
        let socket = self.socket(socket).ok_or(Error::InvalidSocket)?;
        if !socket.state.is_synchronized() {
            return Err(Error::NotConnected);
        }
        Ok(socket.bytes_available(ip.pool()))
    }

    /// Notify when the handshake completes.
    pub fn socket_establish_notify(&mut self, socket: SocketKey, callback: Option<fn(SocketKey)>)
        -> Result<()>
    {
        self.socket_mut(socket)?.callbacks.establish = callback;
        Ok(())
    }

    /// Notify when a disconnect initiated by the application has completed.
    pub fn socket_disconnect_complete_notify(
        &mut self,
        socket: SocketKey,
        callback: Option<fn(SocketKey)>,
    ) -> Result<()> {
        self.socket_mut(socket)?.callbacks.disconnect_complete = callback;
        Ok(())
    }

    /// Notify when in-order data arrives.
    pub fn socket_receive_notify(&mut self, socket: SocketKey, callback: Option<fn(SocketKey)>)
        -> Result<()>
    {
        self.socket_mut(socket)?.callbacks.receive = callback;
        Ok(())
    }

    /// Notify when a full sent queue drains below its depth.
    pub fn socket_queue_depth_notify_set(
        &mut self,
        socket: SocketKey,
        callback: Option<fn(SocketKey)>,
    ) -> Result<()> {
        self.socket_mut(socket)?.callbacks.queue_depth = callback;
        Ok(())
    }

    /// Notify when the connection enters TIME_WAIT.
    ///
    /// The callback may end the wait early with [`time_wait_clear`].
    ///
    /// [`time_wait_clear`]: #method.time_wait_clear
    pub fn socket_timed_wait_callback(
        &mut self,
        socket: SocketKey,
        callback: Option<fn(SocketKey)>,
    ) -> Result<()> {
        self.socket_mut(socket)?.callbacks.timed_wait = callback;
        Ok(())
    }

    /// Notify when the peer's window grows.
    pub fn socket_window_update_notify_set(
        &mut self,
        socket: SocketKey,
        callback: Option<fn(SocketKey)>,
    ) -> Result<()> {
        self.socket_mut(socket)?.callbacks.window_update = callback;
        Ok(())
    }

    /// End a TIME_WAIT immediately.
    pub fn time_wait_clear<I: Ip + ?Sized>(&mut self, ip: &mut I, socket: SocketKey) -> Result<()> {
        let entry = self.socket_mut(socket)?;
        if entry.state != State::TimeWait {
            return Err(Error::NotConnected);
        }
        entry.cleanup(ip.pool());
        net_trace!("tcp: {} time wait cleared", entry.port);
        Ok(())
    }

    /// Tear down a connection with a reset.
    pub(crate) fn abort<I: Ip + ?Sized>(&mut self, ip: &mut I, key: SocketKey) {
        let (socket, mut cx) = match self.split(ip, key) {
            Some(split) => split,
            None => return,
        };
        let signals = socket.reset(&mut cx, true);
        self.apply(ip, key, signals);
    }

    /// Give up a handshake that has not completed.
    pub(crate) fn abandon_connect<I: Ip + ?Sized>(&mut self, ip: &mut I, key: SocketKey) {
        let signals = {
            let (socket, mut cx) = match self.split(ip, key) {
                Some(split) => split,
                None => return,
            };
            let signals = match socket.state {
                State::SynSent => {
                    socket.cleanup(cx.ip.pool());
                    Some(Signals::default())
                },
                State::SynReceived if !socket.awaits_request() => Some(socket.reset(&mut cx, true)),
                State::SynReceived => None,
                _ => return,
            };
            net_trace!("tcp: {} abandoned handshake", socket.port);
            signals
        };
        match signals {
            Some(signals) => self.apply(ip, key, signals),
            None => self.withdraw_server_socket(ip, key),
        }
    }

    /// Resume waiters and run callbacks after processing a socket.
    pub(crate) fn apply<I: Ip + ?Sized>(&mut self, ip: &mut I, key: SocketKey, signals: Signals) {
        let callbacks = match self.sockets.get(key.0) {
            Some(socket) => socket.callbacks,
            None => return,
        };

        if signals.established {
            self.resume_all(key, WaitList::Connect, Wakeup::Ready);
            if let Some(callback) = callbacks.establish {
                callback(key);
            }
        }

        if signals.received {
            self.deliver(ip, key);
            if let Some(callback) = callbacks.receive {
                callback(key);
            }
        }

        if signals.urgent {
            if let Some(callback) = callbacks.urgent_data {
                callback(key);
            }
        }

        if signals.reset {
            let failed = Wakeup::Failed(Error::NotConnected);
            self.resume_all(key, WaitList::Connect, failed);
            self.resume_all(key, WaitList::Receive, failed);
            self.resume_all(key, WaitList::Transmit, failed);
            self.resume_all(key, WaitList::Disconnect, Wakeup::Ready);
            if let Some(callback) = callbacks.disconnect {
                callback(key);
            }
            return;
        }

        if signals.peer_closed {
            self.resume_all(key, WaitList::Receive, Wakeup::Failed(Error::NotConnected));
            if let Some(callback) = callbacks.disconnect {
                callback(key);
            }
        }

        if signals.time_wait {
            self.resume_all(key, WaitList::Disconnect, Wakeup::Ready);
            if let Some(callback) = callbacks.timed_wait {
                callback(key);
            }
        }

        if signals.closed {
            self.resume_all(key, WaitList::Disconnect, Wakeup::Ready);
            if let Some(callback) = callbacks.disconnect_complete {
                callback(key);
            }
        }

        if signals.transmit {
            self.resume_all(key, WaitList::Transmit, Wakeup::Ready);
        }

        if signals.queue_depth {
            if let Some(callback) = callbacks.queue_depth {
                callback(key);
            }
        }

        if signals.window_update {
            if let Some(callback) = callbacks.window_update {
                callback(key);
            }
        }
    }

    /// Hand ready buffers directly to suspended receivers.
    fn deliver<I: Ip + ?Sized>(&mut self, ip: &mut I, key: SocketKey) {
        while self.has_waiters(key, WaitList::Receive) {
            let buffer = {
                let (socket, mut cx) = match self.split(ip, key) {
                    Some(split) => split,
                    None => return,
                };
                match socket.take_ready(&mut cx) {
                    Some(buffer) => buffer,
                    None => return,
                }
            };
            self.resume(key, WaitList::Receive, Wakeup::Received(buffer));
        }
    }

    /// Take a server socket back from the listener offering it.
    pub(crate) fn detach_listener(&mut self, socket: SocketKey) {
        let mut walk = self.active.walk();
        while let Some(key) = walk.next(&self.listeners) {
            if let Some(listener) = self.listeners.get_mut(key) {
                if listener.socket == Some(socket) {
                    listener.socket = None;
                }
            }
        }
    }
}

impl Socket {
    /// Reset the connection.
    ///
    /// Sends a reset if the peer knows about the connection, then forgets it.
    pub(crate) fn reset<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>, send: bool) -> Signals {
        if send {
            match self.state {
                State::Closed | State::Listen | State::SynSent | State::TimeWait => (),
                _ => {
                    let seq = self.send.next;
                    self.send_rst(cx, seq, true);
                },
            }
        }
        net_trace!("tcp: {} connection reset in {:?}", self.port, self.state);
        self.cleanup(cx.ip.pool());
        Signals {
            reset: true,
            ..Signals::default()
        }
    }
}
