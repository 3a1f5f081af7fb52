//! Active opens and closing connections.
use crate::layer::{Error, Result};
use crate::layer::ip::Ip;
use crate::wire::IpAddress;

use super::endpoint::Endpoint;
use super::siphash::FourTuple;
use super::socket::{Binding, SocketKey, State};
use super::suspend::{Outcome, Wait, WaitList};
use super::transmit::window_scale_for;

impl Endpoint<'_> {
    /// Open a connection to a peer.
    ///
    /// The socket must be bound and closed. Sends the SYN and either reports the handshake as
    /// in progress or suspends the caller until it completes. The SYN is retried by the fast
    /// timer, exhausting the retries resets the socket and fails the waiter with
    /// `NotConnected`.
    pub fn client_socket_connect<I: Ip + ?Sized>(
        &mut self,
        ip: &mut I,
        socket: SocketKey,
        peer: IpAddress,
        port: u16,
        wait: Wait,
    ) -> Result<Outcome<()>> {
        let local_port = {
            let entry = self.socket_mut(socket)?;
            if entry.binding != Binding::Bound {
                return Err(Error::NotBound);
            }
            if entry.state != State::Closed {
                return Err(Error::NotClosed);
            }
            entry.port
        };
        if port == 0 {
            return Err(Error::InvalidPort);
        }
        if !peer.is_unicast() {
            return Err(Error::NoInterface);
        }

        let route = ip.route(peer).ok_or(Error::NoInterface)?;
        let local = ip.interface(route.interface).ok_or(Error::NoInterface)?.cidr.address();
        if local.version() != peer.version() {
            return Err(Error::NoInterface);
        }

        let isn = self.initial_sequence(FourTuple {
            local,
            remote: peer,
            local_port,
            remote_port: port,
        });
        let window_scaling = self.config.window_scaling;

        {
            let (entry, mut cx) = self.split(ip, socket).ok_or(Error::InvalidSocket)?;
            entry.client = true;
            entry.peer = peer;
            entry.peer_port = port;
            entry.interface = Some(route.interface);
            entry.next_hop = route.next_hop;
            entry.local = local;
            entry.recv.scale = if window_scaling {
                window_scale_for(entry.recv.window)
            } else {
                0
            };

            entry.send.next = isn + 1;
            entry.state = State::SynSent;
            entry.timer.timeout = entry.timer.rate;
            entry.timer.retries = 0;
            net_trace!("tcp: {} connecting to {}:{}", local_port, peer, port);
            entry.send_syn(&mut cx, isn);
            cx.info.connections += 1;
        }

        match wait {
            Wait::NoWait => Ok(Outcome::InProgress),
            Wait::Suspend => Ok(Outcome::Suspended(self.suspend(socket, socket, WaitList::Connect)?)),
        }
    }

    /// Close a connection.
    ///
    /// Sends our FIN when the connection is open. The close completes once the peer has
    /// acknowledged it, the caller may suspend until then. A connection still in its handshake
    /// is dropped immediately. A server socket accepted ahead of any request is taken back from
    /// its listener.
    pub fn socket_disconnect<I: Ip + ?Sized>(
        &mut self,
        ip: &mut I,
        socket: SocketKey,
        wait: Wait,
    ) -> Result<Outcome<()>> {
        let withdraw = {
            let (entry, mut cx) = self.split(ip, socket).ok_or(Error::InvalidSocket)?;
            match entry.state {
                State::Closed | State::Listen => return Err(Error::NotConnected),
                State::TimeWait => return Ok(Outcome::Ready(())),
                State::SynSent => {
                    entry.cleanup(cx.ip.pool());
                    cx.info.disconnections += 1;
                    return Ok(Outcome::Ready(()));
                },
                State::SynReceived if entry.awaits_request() => true,
                State::Established | State::SynReceived | State::CloseWait => {
                    entry.state = if entry.state == State::CloseWait {
                        State::LastAck
                    } else {
                        State::FinWait1
                    };
                    let seq = entry.send.next;
                    entry.send_fin(&mut cx, seq);
                    entry.send.next += 1;
                    entry.fin.sent = true;
                    entry.timer.timeout = entry.timer.rate;
                    entry.timer.retries = 0;
                    cx.info.disconnections += 1;
                    net_trace!("tcp: {} closing, now {:?}", entry.port, entry.state);
                    false
                },
                State::FinWait1 | State::FinWait2 | State::Closing | State::LastAck => false,
            }
        };

        if withdraw {
            self.withdraw_server_socket(ip, socket);
            return Ok(Outcome::Ready(()));
        }

        match wait {
            Wait::NoWait => Ok(Outcome::InProgress),
            Wait::Suspend => Ok(Outcome::Suspended(self.suspend(socket, socket, WaitList::Disconnect)?)),
        }
    }
}
