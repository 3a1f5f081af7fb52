//! Passive opens.
//!
//! A listener reserves a port for incoming connections and holds at most one server socket. The
//! first connection request is adopted by that socket: its peer is recorded and it joins the
//! port table. Requests arriving while the listener has no socket are queued, up to the queue
//! depth, and adopted by the socket supplied with the next `server_socket_relisten`.
//!
//! An adopted socket answers with its SYN/ACK once the application accepts it. When `accept`
//! was called ahead of the request the answer goes out right away.
use crate::layer::{Error, Result};
use crate::layer::buffer::{BufferKey, BufferQueue, Pool};
use crate::layer::ip::{Ip, InterfaceId};
use crate::managed::{Key, Link, Node};
use crate::wire::{IpAddress, IpVersion, TcpPacket, TcpRepr};

use super::endpoint::Endpoint;
use super::siphash::FourTuple;
use super::socket::{Binding, Socket, SocketKey, State};
use super::suspend::{Outcome, Wait, WaitList, Wakeup};
use super::transmit::window_scale_for;

/// Tag of the ring of active listeners.
#[derive(Debug)]
pub enum Active { }

/// A registered passive open.
#[derive(Debug, Default)]
pub struct Listener {
    link: Option<Link>,
    pub(crate) port: u16,
    /// Called with the socket and port after a connection request was adopted.
    pub(crate) callback: Option<fn(SocketKey, u16)>,
    /// The server socket waiting for the next request.
    pub(crate) socket: Option<SocketKey>,
    /// Requests that arrived while there was no server socket.
    pub(crate) queue: BufferQueue,
    pub(crate) queue_max: usize,
}

/// The success of `server_socket_relisten`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relisten {
    /// The socket waits for the next connection request.
    Adopted,
    /// A queued request was adopted right away, the socket can be accepted.
    ConnectionPending,
}

/// A connection request, as needed for adoption.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ConnectionRequest {
    pub(crate) repr: TcpRepr,
    pub(crate) source: IpAddress,
    pub(crate) destination: IpAddress,
    pub(crate) interface: Option<InterfaceId>,
    /// The peer's segment size, with the default filled in.
    pub(crate) mss: u32,
}

impl Listener {
    /// The port of the listener.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The number of queued connection requests.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl Node<Active> for Listener {
    fn link(&self) -> Option<Link> {
        self.link
    }

    fn set_link(&mut self, link: Option<Link>) {
        self.link = link;
    }
}

/// The segment size assumed when the peer sent no option.
pub(crate) fn default_mss(version: Option<IpVersion>) -> u32 {
    match version {
        Some(IpVersion::Ipv6) => 1220,
        _ => 536,
    }
}

impl ConnectionRequest {
    /// Recover a request from a queued segment.
    pub(crate) fn from_queued<P: Pool + ?Sized>(pool: &P, buffer: BufferKey) -> Option<Self> {
        let descriptor = *pool.descriptor(buffer);
        let packet = TcpPacket::new_checked(pool.payload(buffer)).ok()?;
        let repr = TcpRepr::parse(&packet).ok()?;
        let mss = match repr.max_seg_size {
            Some(mss) if mss != 0 => u32::from(mss),
            _ => default_mss(descriptor.source.version()),
        };
        Some(ConnectionRequest {
            repr,
            source: descriptor.source,
            destination: descriptor.destination,
            interface: descriptor.interface,
            mss,
        })
    }
}

impl Endpoint<'_> {
    /// The listener of a port.
    pub(crate) fn find_listener(&self, port: u16) -> Option<Key> {
        let mut walk = self.active.walk();
        while let Some(key) = walk.next(&self.listeners) {
            match self.listeners.get(key) {
                Some(listener) if listener.port == port => return Some(key),
                _ => (),
            }
        }
        None
    }

    /// Inspect the listener of a port.
    pub fn listener(&self, port: u16) -> Option<&Listener> {
        self.listeners.get(self.find_listener(port)?)
    }

    /// Check that a socket can become a server socket.
    fn check_server_socket(&self, socket: SocketKey) -> Result<()> {
        let entry = self.sockets.get(socket.0).ok_or(Error::InvalidSocket)?;
        if entry.binding != Binding::Unbound {
            return Err(Error::AlreadyBound);
        }
        if entry.state != State::Closed {
            return Err(Error::NotClosed);
        }
        Ok(())
    }

    /// Register a passive open on a port.
    ///
    /// `socket` waits for the first connection request. Up to `queue_max` further requests are
    /// queued until the application supplies the next socket with `server_socket_relisten`.
    pub fn server_socket_listen(
        &mut self,
        port: u16,
        socket: SocketKey,
        queue_max: usize,
        callback: Option<fn(SocketKey, u16)>,
    ) -> Result<()> {
        if port == 0 {
            return Err(Error::InvalidPort);
        }
        if self.find_listener(port).is_some() {
            return Err(Error::DuplicateListen);
        }
        self.check_server_socket(socket)?;

        let key = self.listeners
            .insert(Listener {
                link: None,
                port,
                callback,
                socket: Some(socket),
                queue: BufferQueue::new(),
                queue_max,
            })
            .ok_or(Error::MaxListen)?;
        self.active.push_back(&mut self.listeners, key);

        let entry = self.socket_mut(socket)?;
        entry.port = port;
        entry.state = State::Listen;
        net_trace!("tcp: listening on {}", port);
        Ok(())
    }

    /// Supply the next server socket of a listener.
    ///
    /// If a request is queued the socket adopts it immediately and `ConnectionPending` is
    /// returned, the application should accept it next.
    pub fn server_socket_relisten<I: Ip + ?Sized>(
        &mut self,
        ip: &mut I,
        port: u16,
        socket: SocketKey,
    ) -> Result<Relisten> {
        let key = self.find_listener(port).ok_or(Error::NotEnabled)?;
        if self.listeners.get(key).and_then(|listener| listener.socket).is_some() {
            return Err(Error::InvalidRelisten);
        }
        self.check_server_socket(socket)?;

        {
            let entry = self.socket_mut(socket)?;
            entry.port = port;
            entry.state = State::Listen;
        }

        self.listeners.get_mut(key).ok_or(Error::NotEnabled)?.socket = Some(socket);
        loop {
            let buffer = match self.listeners.get_mut(key) {
                Some(listener) => listener.queue.pop_front(ip.pool()),
                None => None,
            };
            let buffer = match buffer {
                Some(buffer) => buffer,
                None => break,
            };
            let request = ConnectionRequest::from_queued(ip.pool(), buffer);
            ip.pool().release(buffer);
            if let Some(request) = request {
                if self.adopt(ip, key, &request) {
                    return Ok(Relisten::ConnectionPending);
                }
            }
        }
        Ok(Relisten::Adopted)
    }

    /// Remove the listener of a port.
    ///
    /// Queued requests are dropped. A server socket still waiting is returned to `Closed` and
    /// its suspended accept fails.
    pub fn server_socket_unlisten<I: Ip + ?Sized>(&mut self, ip: &mut I, port: u16) -> Result<()> {
        let key = self.find_listener(port).ok_or(Error::NotEnabled)?;
        let socket = {
            let listener = self.listeners.get_mut(key).ok_or(Error::NotEnabled)?;
            listener.queue.release_all(ip.pool());
            listener.socket.take()
        };
        self.active.remove(&mut self.listeners, key);
        self.listeners.remove(key);

        // The offered socket never joined the port table, adopted ones keep the port.
        if let Some(socket) = socket {
            self.withdraw_server_socket(ip, socket);
        }
        net_trace!("tcp: stopped listening on {}", port);
        Ok(())
    }

    /// Return a server socket that adopted no request to `Closed`.
    ///
    /// No listener offers it afterwards and its suspended accept fails.
    pub(crate) fn withdraw_server_socket<I: Ip + ?Sized>(&mut self, ip: &mut I, socket: SocketKey) {
        self.detach_listener(socket);
        match self.sockets.get_mut(socket.0) {
            Some(entry) if entry.awaits_request() => {
                net_trace!("tcp: {} server socket withdrawn", entry.port);
                entry.cleanup(ip.pool());
                entry.port = 0;
            },
            _ => return,
        }
        self.resume_all(socket, WaitList::Connect, Wakeup::Failed(Error::NotConnected));
    }

    /// Accept a connection on a server socket.
    ///
    /// If the socket adopted a request the SYN/ACK is sent now. Otherwise the socket answers
    /// as soon as it adopts one. The handshake completes in the background, or the caller
    /// suspends until it does.
    pub fn server_socket_accept<I: Ip + ?Sized>(
        &mut self,
        ip: &mut I,
        socket: SocketKey,
        wait: Wait,
    ) -> Result<Outcome<()>> {
        {
            let (entry, mut cx) = self.split(ip, socket).ok_or(Error::InvalidSocket)?;
            match entry.state {
                State::Listen if entry.binding == Binding::Bound => {
                    entry.state = State::SynReceived;
                    entry.recv.next += 1;
                    entry.send.next += 1;
                    entry.timer.timeout = entry.timer.rate;
                    entry.timer.retries = 0;
                    let seq = entry.send.next - 1;
                    entry.send_syn(&mut cx, seq);
                },
                State::Listen => entry.state = State::SynReceived,
                State::SynReceived => (),
                State::Established => return Ok(Outcome::Ready(())),
                _ => return Err(Error::NotListenState),
            }
        }

        match wait {
            Wait::NoWait => Ok(Outcome::InProgress),
            Wait::Suspend => Ok(Outcome::Suspended(self.suspend(socket, socket, WaitList::Connect)?)),
        }
    }

    /// Release a server socket after its connection ended.
    ///
    /// Removes the socket from the port table so that it can be handed to
    /// `server_socket_relisten` again. A handshake in progress is reset.
    pub fn server_socket_unaccept<I: Ip + ?Sized>(&mut self, ip: &mut I, socket: SocketKey)
        -> Result<()>
    {
        match self.socket_state(socket)? {
            State::Closed | State::Listen | State::TimeWait => (),
            State::SynReceived => {
                let signals = {
                    let (entry, mut cx) = self.split(ip, socket).ok_or(Error::InvalidSocket)?;
                    if entry.binding == Binding::Bound {
                        Some(entry.reset(&mut cx, true))
                    } else {
                        None
                    }
                };
                if let Some(signals) = signals {
                    self.apply(ip, socket, signals);
                }
            },
            _ => return Err(Error::NotListenState),
        }

        let port = self.socket(socket).and_then(|entry| entry.port());
        self.unlink_bound(socket);
        self.detach_listener(socket);

        let entry = self.socket_mut(socket)?;
        entry.cleanup(ip.pool());
        entry.port = 0;
        self.resume_all(socket, WaitList::Connect, Wakeup::Failed(Error::NotConnected));
        if let Some(port) = port {
            self.release_port(socket, port);
        }
        Ok(())
    }

    /// Bind the listener's server socket to a connection request.
    ///
    /// The socket records the peer and the negotiated parameters and joins the port table. If
    /// the application already accepted, the SYN/ACK goes out now. The listen callback runs
    /// last.
    ///
    /// Returns `false` when the listener offers no socket still waiting for a request.
    pub(crate) fn adopt<I: Ip + ?Sized>(&mut self, ip: &mut I, listener: Key, request: &ConnectionRequest)
        -> bool
    {
        let (socket, port, callback) = match self.listeners.get_mut(listener) {
            Some(entry) => match entry.socket.take() {
                Some(socket) => (socket, entry.port, entry.callback),
                None => return false,
            },
            None => return false,
        };
        if !self.sockets.get(socket.0).map_or(false, Socket::awaits_request) {
            net_debug!("tcp: {} server socket no longer waits for requests", port);
            return false;
        }

        let (interface, next_hop) = match ip.route(request.source) {
            Some(route) => (Some(route.interface), route.next_hop),
            None => (request.interface, request.source),
        };
        let isn = self.initial_sequence(FourTuple {
            local: request.destination,
            remote: request.source,
            local_port: port,
            remote_port: request.repr.src_port,
        });
        let window_scaling = self.config.window_scaling;

        {
            let entry = match self.sockets.get_mut(socket.0) {
                Some(entry) => entry,
                None => return false,
            };
            entry.client = false;
            entry.interface = interface;
            entry.next_hop = next_hop;
            entry.local = request.destination;
            entry.peer = request.source;
            entry.peer_port = request.repr.src_port;
            entry.recv.next = request.repr.seq_number;
            entry.recv.acked = request.repr.seq_number;

            entry.mss.peer = request.mss;
            entry.mss.connect = match u32::from(entry.mss.custom) {
                custom if custom != 0 && custom < request.mss => custom,
                _ => request.mss,
            };
            entry.mss.connect2 = entry.mss.connect.saturating_mul(entry.mss.connect);

            entry.send.offered_scale = request.repr.window_scale;
            entry.recv.scale = match (window_scaling, request.repr.window_scale) {
                (true, Some(_)) => window_scale_for(entry.recv.window),
                _ => 0,
            };
            entry.send.window = u32::from(request.repr.window_len);
            entry.send.outstanding = 0;
            entry.send.next = isn;
            entry.flow.ssthresh = entry.send.window;
            entry.flow.congestion_window = entry.mss.connect;
        }
        self.link_bound(socket, port);
        self.info.connections += 1;
        net_trace!("tcp: {} adopted request from {}:{}", port, request.source, request.repr.src_port);

        if let Some((entry, mut cx)) = self.split(ip, socket) {
            if entry.state == State::SynReceived {
                entry.recv.next += 1;
                entry.send.next += 1;
                entry.timer.timeout = entry.timer.rate;
                entry.timer.retries = 0;
                let seq = entry.send.next - 1;
                entry.send_syn(&mut cx, seq);
            }
        }

        if let Some(callback) = callback {
            callback(socket, port);
        }
        true
    }
}
