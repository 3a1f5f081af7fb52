//! Callers waiting for a socket.
//!
//! A call that can not complete immediately may suspend. The engine then records a [`Waiter`] in
//! one of the socket's suspension lists and hands its key back. Whatever later satisfies the
//! call, an inbound segment or a timer, resumes the oldest waiter of that list with a
//! [`Wakeup`]. The caller collects it with [`take_resumed`].
//!
//! The engine does not keep time for waiters. The environment enforces a wait timeout and then
//! runs [`suspension_timeout`]. Where the timeout fires in a context which must not touch the
//! engine, it can instead flag the waiter with [`defer_cleanup`], which only needs a shared
//! reference, and the next [`deferred_cleanup_check`] completes the cleanup.
//!
//! [`Waiter`]: struct.Waiter.html
//! [`Wakeup`]: enum.Wakeup.html
//! [`take_resumed`]: struct.Endpoint.html#method.take_resumed
//! [`suspension_timeout`]: struct.Endpoint.html#method.suspension_timeout
//! [`defer_cleanup`]: struct.Endpoint.html#method.defer_cleanup
//! [`deferred_cleanup_check`]: struct.Endpoint.html#method.deferred_cleanup_check
use core::sync::atomic::{AtomicBool, Ordering};

use crate::layer::{Error, Result};
use crate::layer::buffer::BufferKey;
use crate::layer::ip::Ip;
use crate::managed::{Key, Link, Node, Ring};

use super::endpoint::Endpoint;
use super::socket::{Binding, Socket, SocketKey};

/// Tag of the suspension rings.
#[derive(Debug)]
pub enum Suspended { }

/// Whether a call may suspend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Wait {
    /// Fail or report progress instead of suspending.
    NoWait,
    /// Suspend until the call can complete.
    Suspend,
}

/// The result of a call that may suspend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome<T> {
    /// The call completed.
    Ready(T),
    /// The operation was started and completes in the background.
    InProgress,
    /// The caller must wait for the waiter to be resumed.
    Suspended(WaiterKey),
}

/// The handle of a suspended caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WaiterKey(pub(crate) Key);

/// What a resumed caller receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Wakeup {
    /// The awaited condition holds, the call has completed or may be retried.
    Ready,
    /// Received data was handed directly to the waiting receiver.
    Received(BufferKey),
    /// The call failed.
    Failed(Error),
}

/// The suspension list a waiter is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WaitList {
    /// Waiting for a port to become free.
    Bind,
    /// Waiting for a connection to be established.
    Connect,
    /// Waiting for a connection to close.
    Disconnect,
    /// Waiting for data.
    Receive,
    /// Waiting for the send window to open.
    Transmit,
}

/// A suspended caller.
#[derive(Debug, Default)]
pub struct Waiter {
    link: Option<Link>,
    /// The socket the call was made on.
    socket: Option<SocketKey>,
    /// The socket whose list holds the waiter.
    ///
    /// Differs from `socket` only for a bind, which waits on the current owner of the port.
    queue: Option<SocketKey>,
    list: Option<WaitList>,
    wakeup: Option<Wakeup>,
    deferred: AtomicBool,
}

impl Waiter {
    /// The socket the suspended call was made on.
    pub fn socket(&self) -> Option<SocketKey> {
        self.socket
    }

    /// The list the waiter is or was suspended on.
    pub fn list(&self) -> Option<WaitList> {
        self.list
    }

    /// Whether the waiter was resumed and holds its wakeup.
    pub fn is_resumed(&self) -> bool {
        self.wakeup.is_some()
    }
}

impl Node<Suspended> for Waiter {
    fn link(&self) -> Option<Link> {
        self.link
    }

    fn set_link(&mut self, link: Option<Link>) {
        self.link = link;
    }
}

impl Socket {
    pub(crate) fn wait_ring(&self, list: WaitList) -> &Ring<Suspended> {
        match list {
            WaitList::Bind => &self.waiting.bind,
            WaitList::Connect => &self.waiting.connect,
            WaitList::Disconnect => &self.waiting.disconnect,
            WaitList::Receive => &self.waiting.receive,
            WaitList::Transmit => &self.waiting.transmit,
        }
    }

    pub(crate) fn wait_list(&mut self, list: WaitList) -> &mut Ring<Suspended> {
        match list {
            WaitList::Bind => &mut self.waiting.bind,
            WaitList::Connect => &mut self.waiting.connect,
            WaitList::Disconnect => &mut self.waiting.disconnect,
            WaitList::Receive => &mut self.waiting.receive,
            WaitList::Transmit => &mut self.waiting.transmit,
        }
    }
}

impl Endpoint<'_> {
    /// Suspend a call made on `socket` in a list of `queue`.
    pub(crate) fn suspend(&mut self, socket: SocketKey, queue: SocketKey, list: WaitList)
        -> Result<WaiterKey>
    {
        let owner = self.sockets.get_mut(queue.0).ok_or(Error::InvalidSocket)?;
        let key = self.waiters
            .insert(Waiter {
                link: None,
                socket: Some(socket),
                queue: Some(queue),
                list: Some(list),
                wakeup: None,
                deferred: AtomicBool::new(false),
            })
            .ok_or(Error::Exhausted)?;
        owner.wait_list(list).push_back(&mut self.waiters, key);
        Ok(WaiterKey(key))
    }

    /// Resume the oldest waiter of a list.
    ///
    /// Returns `false` if there was none.
    pub(crate) fn resume(&mut self, socket: SocketKey, list: WaitList, wakeup: Wakeup) -> bool {
        let owner = match self.sockets.get_mut(socket.0) {
            Some(owner) => owner,
            None => return false,
        };
        let key = match owner.wait_list(list).pop_front(&mut self.waiters) {
            Some(key) => key,
            None => return false,
        };
        if let Some(waiter) = self.waiters.get_mut(key) {
            waiter.wakeup = Some(wakeup);
        }
        true
    }

    /// Resume every waiter of a list.
    pub(crate) fn resume_all(&mut self, socket: SocketKey, list: WaitList, wakeup: Wakeup) {
        while self.resume(socket, list, wakeup) { }
    }

    /// Pass the bind waiters of a socket that released its port to the oldest of them.
    ///
    /// The oldest waiter is resumed, the others move to the suspension list of the new owner.
    /// Returns the socket of the resumed waiter, which the caller binds.
    pub(crate) fn hand_over_binders(&mut self, from: SocketKey) -> Option<SocketKey> {
        let first = match self.sockets.get_mut(from.0) {
            Some(owner) => owner.waiting.bind.pop_front(&mut self.waiters)?,
            None => return None,
        };
        let next = self.waiters.get(first)?.socket?;
        self.move_binders(from, next);

        if let Some(waiter) = self.waiters.get_mut(first) {
            waiter.wakeup = Some(Wakeup::Ready);
        }
        Some(next)
    }

    /// Queue the bind waiters of one socket behind another owner of the port.
    pub(crate) fn move_binders(&mut self, from: SocketKey, to: SocketKey) {
        loop {
            let key = match self.sockets.get_mut(from.0) {
                Some(owner) => match owner.waiting.bind.pop_front(&mut self.waiters) {
                    Some(key) => key,
                    None => break,
                },
                None => break,
            };
            if let Some(waiter) = self.waiters.get_mut(key) {
                waiter.queue = Some(to);
            }
            if let Some(owner) = self.sockets.get_mut(to.0) {
                owner.waiting.bind.push_back(&mut self.waiters, key);
            }
        }
    }

    /// Fail the bind waiters of a socket, their port stays taken.
    pub(crate) fn fail_binders(&mut self, from: SocketKey) {
        loop {
            let key = match self.sockets.get_mut(from.0) {
                Some(owner) => match owner.waiting.bind.pop_front(&mut self.waiters) {
                    Some(key) => key,
                    None => break,
                },
                None => break,
            };
            let binder = match self.waiters.get_mut(key) {
                Some(waiter) => {
                    waiter.wakeup = Some(Wakeup::Failed(Error::PortUnavailable));
                    waiter.socket
                },
                None => None,
            };
            if let Some(entry) = binder.and_then(|binder| self.sockets.get_mut(binder.0)) {
                entry.binding = Binding::Unbound;
                entry.port = 0;
            }
        }
    }

    pub(crate) fn has_waiters(&self, socket: SocketKey, list: WaitList) -> bool {
        match self.sockets.get(socket.0) {
            Some(socket) => !socket.wait_ring(list).is_empty(),
            None => false,
        }
    }

    /// Collect the wakeup of a resumed waiter.
    ///
    /// Frees the waiter on success. Returns `None` while it is still suspended or when the key
    /// is stale.
    pub fn take_resumed(&mut self, waiter: WaiterKey) -> Option<Wakeup> {
        let wakeup = self.waiters.get(waiter.0)?.wakeup?;
        self.waiters.remove(waiter.0);
        Some(wakeup)
    }

    /// Query the state of a waiter.
    pub fn waiter(&self, waiter: WaiterKey) -> Option<&Waiter> {
        self.waiters.get(waiter.0)
    }

    /// Give up waiting.
    ///
    /// The cleanup for a wait that timed out or whose caller went away. The waiter is removed
    /// from its list and freed. A waiter that was already resumed yields its wakeup instead, the
    /// condition raced the timeout and won. Otherwise the wakeup reports the failure of the call:
    /// a bind fails with `PortUnavailable`, a receive with `NoPacket`, all others with
    /// `NotConnected`.
    ///
    /// Giving up a connect resets the half-open connection, giving up a disconnect aborts the
    /// connection with a reset.
    pub fn suspension_timeout<I: Ip + ?Sized>(&mut self, ip: &mut I, waiter: WaiterKey)
        -> Result<Wakeup>
    {
        self.expire(ip, waiter)?;
        self.take_resumed(waiter).ok_or(Error::InvalidSocket)
    }

    /// Flag a waiter for cleanup by the next `deferred_cleanup_check`.
    ///
    /// Only needs a shared reference, for the context enforcing wait timeouts.
    pub fn defer_cleanup(&self, waiter: WaiterKey) {
        if let Some(entry) = self.waiters.get(waiter.0) {
            entry.deferred.store(true, Ordering::Release);
            self.cleanup_event.store(true, Ordering::Release);
        }
    }

    /// Complete all cleanups flagged with `defer_cleanup`.
    ///
    /// Sweeps the suspension lists of every created socket. The flagged waiters fail as with
    /// `suspension_timeout` but are not freed, their wakeup is collected with `take_resumed`.
    pub fn deferred_cleanup_check<I: Ip + ?Sized>(&mut self, ip: &mut I) {
        if !self.cleanup_event.swap(false, Ordering::AcqRel) {
            return;
        }

        const LISTS: [WaitList; 5] = [
            WaitList::Bind,
            WaitList::Connect,
            WaitList::Disconnect,
            WaitList::Receive,
            WaitList::Transmit,
        ];

        let mut sockets = self.created.walk();
        while let Some(socket) = sockets.next(&self.sockets) {
            for &list in LISTS.iter() {
                while let Some(waiter) = self.first_deferred(socket, list) {
                    if self.expire(ip, WaiterKey(waiter)).is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Fail a suspended waiter, leaving its wakeup to be collected.
    fn expire<I: Ip + ?Sized>(&mut self, ip: &mut I, waiter: WaiterKey) -> Result<()> {
        let (socket, queue, list) = {
            let entry = self.waiters.get(waiter.0).ok_or(Error::InvalidSocket)?;
            entry.deferred.store(false, Ordering::Relaxed);
            if entry.wakeup.is_some() {
                return Ok(());
            }
            (entry.socket, entry.queue, entry.list)
        };

        if let (Some(queue), Some(list)) = (queue, list) {
            if let Some(owner) = self.sockets.get_mut(queue.0) {
                owner.wait_list(list).remove(&mut self.waiters, waiter.0);
            }
        }

        let error = match (socket, list) {
            (Some(socket), Some(WaitList::Bind)) => {
                if let Some(binder) = self.sockets.get_mut(socket.0) {
                    binder.binding = Binding::Unbound;
                    binder.port = 0;
                }
                Error::PortUnavailable
            },
            (_, Some(WaitList::Receive)) => Error::NoPacket,
            (Some(socket), Some(WaitList::Connect)) => {
                self.abandon_connect(ip, socket);
                Error::NotConnected
            },
            (Some(socket), Some(WaitList::Disconnect)) => {
                self.abort(ip, socket);
                Error::NotConnected
            },
            _ => Error::NotConnected,
        };

        net_trace!("tcp: wait on {:?} gave up with {}", list, error);
        if let Some(entry) = self.waiters.get_mut(waiter.0) {
            entry.wakeup = Some(Wakeup::Failed(error));
        }
        Ok(())
    }

    fn first_deferred(&self, socket: Key, list: WaitList) -> Option<Key> {
        let mut walk = self.sockets.get(socket)?.wait_ring(list).walk();
        while let Some(key) = walk.next(&self.waiters) {
            if self.waiters.get(key)?.deferred.load(Ordering::Acquire) {
                return Some(key);
            }
        }
        None
    }
}
