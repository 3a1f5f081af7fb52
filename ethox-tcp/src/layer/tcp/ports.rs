//! The port table.
//!
//! Bound sockets are kept in a hash table of rings, indexed by `(port + (port >> 8)) & mask`.
//! Sockets of one bucket are compared by their exact port, a bucket is a collision chain. Server
//! sockets of the same listener share their port, they are told apart by the peer.
use crate::layer::{Error, Result};
use crate::layer::ip::Ip;
use crate::managed::Key;

use super::endpoint::Endpoint;
use super::socket::{Binding, SocketKey, State};
use super::suspend::{Outcome, Wait, WaitList};

impl Endpoint<'_> {
    /// The first socket bound to a port.
    pub(crate) fn port_owner(&self, port: u16) -> Option<Key> {
        let bucket = &self.buckets[self.bucket_of(port)];
        let mut walk = bucket.walk();
        while let Some(key) = walk.next(&self.sockets) {
            match self.sockets.get(key) {
                Some(socket) if socket.port == port => return Some(key),
                _ => (),
            }
        }
        None
    }

    /// Link a socket into the bucket of its port.
    pub(crate) fn link_bound(&mut self, socket: SocketKey, port: u16) {
        let index = self.bucket_of(port);
        if let Some(entry) = self.sockets.get_mut(socket.0) {
            entry.port = port;
            entry.binding = Binding::Bound;
        }
        self.buckets[index].push_back(&mut self.sockets, socket.0);
    }

    /// Remove a socket from the port table.
    pub(crate) fn unlink_bound(&mut self, socket: SocketKey) {
        let port = match self.sockets.get(socket.0) {
            Some(entry) if entry.binding == Binding::Bound => entry.port,
            _ => return,
        };
        let index = self.bucket_of(port);
        self.buckets[index].remove(&mut self.sockets, socket.0);
        if let Some(entry) = self.sockets.get_mut(socket.0) {
            entry.binding = Binding::Unbound;
        }
    }

    /// A port reserved outside the port table, by the IP layer or by a listener.
    fn port_reserved<I: Ip + ?Sized>(&self, ip: &I, port: u16) -> bool {
        ip.nat_reserved(port) || self.find_listener(port).is_some()
    }

    fn port_free<I: Ip + ?Sized>(&self, ip: &I, port: u16) -> bool {
        port != 0 && !self.port_reserved(ip, port) && self.port_owner(port).is_none()
    }

    /// Pass a port that `socket` gave up to the sockets waiting to bind it.
    ///
    /// Server sockets of one listener share their port. While another of them still holds it
    /// the waiters queue behind that socket, while a listener reserves it they fail.
    pub(crate) fn release_port(&mut self, socket: SocketKey, port: u16) {
        if let Some(owner) = self.port_owner(port) {
            self.move_binders(socket, SocketKey(owner));
        } else if self.find_listener(port).is_some() {
            self.fail_binders(socket);
        } else if let Some(next) = self.hand_over_binders(socket) {
            self.link_bound(next, port);
            net_trace!("tcp: port {} handed to a waiting binder", port);
        }
    }

    /// Bind a socket to a local port.
    ///
    /// With `None` an ephemeral port is chosen: the search starts at a pseudo random port of the
    /// range from `search_port_start` up and probes linearly, wrapping within the range.
    ///
    /// A port owned by another socket either fails with `PortUnavailable` or, with
    /// `Wait::Suspend`, queues the caller behind the owner until it unbinds. The port is then
    /// handed to the oldest queued binder. A listened port is never handed out.
    pub fn client_socket_bind<I: Ip + ?Sized>(
        &mut self,
        ip: &mut I,
        socket: SocketKey,
        port: Option<u16>,
        wait: Wait,
    ) -> Result<Outcome<u16>> {
        let entry = self.socket_mut(socket)?;
        if entry.binding != Binding::Unbound {
            return Err(Error::AlreadyBound);
        }
        if entry.state != State::Closed {
            return Err(Error::NotClosed);
        }

        let port = match port {
            Some(0) => return Err(Error::InvalidPort),
            Some(port) => port,
            None => {
                let port = self.ephemeral_port(ip)?;
                self.link_bound(socket, port);
                net_trace!("tcp: bound ephemeral port {}", port);
                return Ok(Outcome::Ready(port));
            },
        };

        if self.port_reserved(ip, port) {
            return Err(Error::PortUnavailable);
        }

        match self.port_owner(port) {
            None => {
                self.link_bound(socket, port);
                net_trace!("tcp: bound port {}", port);
                Ok(Outcome::Ready(port))
            },
            Some(_) if wait == Wait::NoWait => Err(Error::PortUnavailable),
            Some(owner) => {
                let waiter = self.suspend(socket, SocketKey(owner), WaitList::Bind)?;
                let entry = self.socket_mut(socket)?;
                entry.binding = Binding::Pending;
                entry.port = port;
                Ok(Outcome::Suspended(waiter))
            },
        }
    }

    fn ephemeral_port<I: Ip + ?Sized>(&mut self, ip: &I) -> Result<u16> {
        let start = self.config.search_port_start.max(1);
        let range = 0x1_0000 - u32::from(start);
        self.port_searches = self.port_searches.wrapping_add(1);
        let seed = self.isn.port_hint(self.ticks << 16 ^ self.port_searches);
        let first = u32::from(start) + u32::from(seed) % range;

        for offset in 0..range {
            let port = u32::from(start) + (first - u32::from(start) + offset) % range;
            let port = port as u16;
            if self.port_free(ip, port) {
                return Ok(port);
            }
        }
        Err(Error::NoFreePorts)
    }

    /// Release the port of a socket.
    ///
    /// The socket must be closed, a TIME_WAIT is ended. If other sockets wait to bind the port,
    /// the oldest of them becomes its owner and is resumed.
    pub fn client_socket_unbind<I: Ip + ?Sized>(&mut self, ip: &mut I, socket: SocketKey)
        -> Result<()>
    {
        let entry = self.socket_mut(socket)?;
        if entry.binding != Binding::Bound {
            return Err(Error::NotBound);
        }
        match entry.state {
            State::Closed => (),
            State::TimeWait => entry.cleanup(ip.pool()),
            _ => return Err(Error::NotClosed),
        }

        let port = entry.port;
        self.unlink_bound(socket);
        if let Some(entry) = self.sockets.get_mut(socket.0) {
            entry.port = 0;
        }
        net_trace!("tcp: unbound port {}", port);
        self.release_port(socket, port);
        Ok(())
    }

    /// Find a port that could be bound.
    ///
    /// Searches upwards from `port`, then wraps around to `search_port_start`. Nothing is bound.
    pub fn free_port_find<I: Ip + ?Sized>(&self, ip: &I, port: u16) -> Result<u16> {
        if port == 0 {
            return Err(Error::InvalidPort);
        }

        let upwards = port..=0xFFFF;
        let wrapped = self.config.search_port_start.max(1)..port;
        upwards.chain(wrapped)
            .find(|&candidate| self.port_free(ip, candidate))
            .ok_or(Error::NoFreePorts)
    }
}

#[cfg(test)]
mod tests {
    use crate::layer::tcp::{Config, Endpoint, IsnGenerator, SocketOptions, Storage};

    fn endpoint(buckets: usize) -> Endpoint<'static> {
        let mut storage = Storage::with_capacity(4);
        storage.buckets = crate::managed::Slice::Many(
            (0..buckets).map(|_| crate::managed::Ring::new()).collect());
        Endpoint::new(storage, Config::default(), IsnGenerator::from_key(7, 11))
    }

    #[test]
    fn bucket_hash() {
        let endpoint = endpoint(8);
        assert_eq!(endpoint.bucket_of(0), 0);
        assert_eq!(endpoint.bucket_of(0x0101), 2);
        assert_eq!(endpoint.bucket_of(0xFFFF), (0xFFFF + 0xFF) & 7);
    }

    #[test]
    fn owner_lookup_compares_ports() {
        let mut endpoint = endpoint(1);
        let a = endpoint.socket_create(SocketOptions::default()).unwrap();
        let b = endpoint.socket_create(SocketOptions::default()).unwrap();
        endpoint.link_bound(a, 80);
        endpoint.link_bound(b, 81);
        assert_eq!(endpoint.port_owner(80), Some(a.0));
        assert_eq!(endpoint.port_owner(81), Some(b.0));
        assert_eq!(endpoint.port_owner(82), None);

        endpoint.unlink_bound(a);
        assert_eq!(endpoint.port_owner(80), None);
        assert_eq!(endpoint.socket(a).unwrap().port(), None);
    }
}
