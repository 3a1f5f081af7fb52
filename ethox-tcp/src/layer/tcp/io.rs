//! Sending and receiving data on a connection.
use crate::layer::{Error, Result};
use crate::layer::buffer::{BufferKey, Pool};
use crate::layer::ip::Ip;

use super::endpoint::{Context, Endpoint};
use super::socket::{Socket, SocketKey, State};
use super::suspend::{Outcome, Wait, WaitList};

impl Endpoint<'_> {
    /// Send the data of a buffer.
    ///
    /// The data is cut into segments of at most one MSS, as far as the peer's window and the
    /// congestion window permit. On `Ready` the buffer was consumed entirely. Otherwise the buffer
    /// still belongs to the caller, advanced past everything that went out.
    ///
    /// A caller that may not wait gets `WindowOverflow`, or `TxQueueDepth` when the sent queue is
    /// full. A suspended caller is resumed with `Wakeup::Ready` once the window opens, or once
    /// the peer took the byte of a window probe, and then sends the same buffer again.
    pub fn socket_send<I: Ip + ?Sized>(
        &mut self,
        ip: &mut I,
        socket: SocketKey,
        buffer: BufferKey,
        wait: Wait,
    ) -> Result<Outcome<()>> {
        let (full_queue, sent) = {
            let (entry, mut cx) = self.split(ip, socket).ok_or(Error::InvalidSocket)?;
            match entry.state {
                State::Established | State::CloseWait => (),
                _ => return Err(Error::NotConnected),
            }
            if cx.ip.pool().payload(buffer).is_empty() {
                return Err(Error::InvalidPacket);
            }

            if entry.probe.accepted {
                entry.probe.accepted = false;
                if entry.probe.buffer.take() == Some(buffer) {
                    let pool = cx.ip.pool();
                    pool.advance(buffer, 1);
                    if pool.payload(buffer).is_empty() {
                        pool.release(buffer);
                        return Ok(Outcome::Ready(()));
                    }
                }
            }

            let sent = entry.send_data(&mut cx, buffer)?;
            (entry.sent.len() >= entry.send.queue_max, sent)
        };

        if sent {
            return Ok(Outcome::Ready(()));
        }

        match wait {
            Wait::NoWait if full_queue => Err(Error::TxQueueDepth),
            Wait::NoWait => Err(Error::WindowOverflow),
            Wait::Suspend => Ok(Outcome::Suspended(self.suspend(socket, socket, WaitList::Transmit)?)),
        }
    }

    /// Receive the next buffer of in-order data.
    ///
    /// The returned buffer holds only data, it belongs to the caller who releases it. Without
    /// data a caller that may wait is suspended and resumed with `Wakeup::Received`.
    pub fn socket_receive<I: Ip + ?Sized>(
        &mut self,
        ip: &mut I,
        socket: SocketKey,
        wait: Wait,
    ) -> Result<Outcome<BufferKey>> {
        {
            let (entry, mut cx) = self.split(ip, socket).ok_or(Error::InvalidSocket)?;
            if let Some(buffer) = entry.take_ready(&mut cx) {
                return Ok(Outcome::Ready(buffer));
            }
            if !entry.state.is_synchronized() || entry.state.peer_closed() {
                return Err(Error::NotConnected);
            }
        }

        match wait {
            Wait::NoWait => Err(Error::NoPacket),
            Wait::Suspend => Ok(Outcome::Suspended(self.suspend(socket, socket, WaitList::Receive)?)),
        }
    }
}

impl Socket {
    /// Unlink the oldest ready buffer of the receive queue.
    ///
    /// Its space is returned to the receive window. When that opens the window by half of its
    /// full size since we last told the peer, an update is sent right away, RFC 1122 4.2.3.3.
    pub(crate) fn take_ready<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>) -> Option<BufferKey> {
        if self.recv.ready == 0 {
            return None;
        }

        let pool = cx.ip.pool();
        let buffer = self.received.pop_front(pool)?;
        self.recv.ready -= 1;
        let len = pool.payload(buffer).len() as u32;
        self.recv.window = self.recv.window.saturating_add(len).min(self.recv.window_default);

        let opened = self.recv.window.saturating_sub(self.recv.window_last_sent);
        if self.state.is_synchronized()
            && !self.state.peer_closed()
            && opened >= self.recv.window_default / 2
        {
            let seq = self.send.next;
            self.send_ack(cx, seq);
        }
        Some(buffer)
    }
}
