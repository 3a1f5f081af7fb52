//! Reassembly of received data.
//!
//! The receive queue is ordered by sequence number. Its head holds the in-order buffers marked
//! `Ready` for the application, behind them sit out-of-order buffers marked `Enqueued`. A buffer
//! only ever holds data, the header is stripped when it is queued. Overlaps between an arriving
//! segment and queued ones are resolved by trimming so that no byte is queued twice.
use crate::layer::buffer::{BufferKey, BufferQueue, Pool, QueueState};
use crate::layer::ip::Ip;
use crate::wire::{TcpRepr, TcpSeqNumber};

use super::endpoint::{Context, Signals};
use super::socket::{Socket, State};

/// Where a new segment lies relative to a queued one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Overlap {
    /// Entirely after it.
    Right,
    /// Entirely before it.
    Left,
    /// Within it, nothing new.
    Subset,
    /// Covers it completely.
    Superset,
    /// Covers the start of it.
    Front,
    /// Covers the end of it.
    Back,
}

impl Overlap {
    fn classify(begin: TcpSeqNumber, end: TcpSeqNumber, queued: (TcpSeqNumber, TcpSeqNumber)) -> Self {
        let (start, stop) = queued;
        if begin >= stop {
            Overlap::Right
        } else if end <= start {
            Overlap::Left
        } else if begin >= start && end <= stop {
            Overlap::Subset
        } else if begin <= start && end >= stop {
            Overlap::Superset
        } else if begin < start {
            Overlap::Front
        } else {
            Overlap::Back
        }
    }
}

fn span<P: Pool + ?Sized>(pool: &P, buffer: BufferKey) -> (TcpSeqNumber, TcpSeqNumber) {
    let descriptor = pool.descriptor(buffer);
    (descriptor.sequence, descriptor.sequence + descriptor.data_len)
}

impl Socket {
    /// Queue the data of a segment.
    ///
    /// Returns whether the buffer was consumed, either queued or released. Also records a FIN
    /// that lies within the window.
    pub(crate) fn data_check<I: Ip + ?Sized>(
        &mut self,
        cx: &mut Context<I>,
        buffer: BufferKey,
        repr: &TcpRepr,
        signals: &mut Signals,
    ) -> bool {
        let rx_before = self.recv.next;
        let mut begin = repr.seq_number;
        let mut len;
        let mut fin = repr.flags.fin();
        {
            let pool = cx.ip.pool();
            let header = pool.payload(buffer).len().saturating_sub(repr.payload_len);
            pool.advance(buffer, header);
            len = pool.payload(buffer).len();

            let stale = self.recv.next - begin;
            if stale > 0 {
                let trim = (stale as usize).min(len);
                pool.advance(buffer, trim);
                begin += trim;
                len -= trim;
            }

            let window_end = self.recv.next + self.recv.window as usize;
            let excess = (begin + len) - window_end;
            if excess > 0 {
                len -= (excess as usize).min(len);
                pool.truncate(buffer, len);
                fin = false;
            }
        }

        if fin && !self.fin.received && begin + len >= self.recv.next {
            self.fin.received = true;
            self.fin.sequence = begin + len;
        }

        if len == 0 {
            if self.state == State::Established
                && self.received.is_empty()
                && repr.seq_number != self.recv.next
                && repr.seq_number != self.recv.next - 1
            {
                let seq = self.send.next;
                self.send_ack(cx, seq);
            }
            return false;
        }

        {
            let descriptor = cx.ip.pool().descriptor_mut(buffer);
            descriptor.sequence = begin;
            descriptor.data_len = len;
        }

        if self.received.len() >= self.recv.queue_max {
            net_debug!("tcp: {} receive queue full, dropping {} bytes", self.port, len);
            cx.info.receive_packets_dropped += 1;
            let seq = self.send.next;
            self.send_ack(cx, seq);
            return false;
        }

        let len = match self.enqueue(cx, buffer, begin, len) {
            Some(len) => len,
            None => return false,
        };

        self.stats.packets_received += 1;
        self.stats.bytes_received += len as u64;
        cx.info.packets_received += 1;
        cx.info.bytes_received += len as u64;

        if let Some(max) = cx.config.max_out_of_order {
            while self.received.len() - self.recv.ready > max as usize {
                if !self.drop_newest(cx) {
                    break;
                }
            }
        }

        let advanced = (self.recv.next - rx_before).max(0) as u32;
        let mut need_ack = false;
        if advanced > 0 {
            self.recv.window = self.recv.window.saturating_sub(advanced);
            self.recv.window_last_sent = self.recv.window_last_sent.saturating_sub(advanced);
            signals.received = true;

            if let Some(every) = cx.config.ack_every_n {
                if self.state == State::Established && !self.fin.received {
                    self.recv.unacked_segments += 1;
                    if self.recv.unacked_segments >= every {
                        self.recv.unacked_segments = 0;
                        need_ack = true;
                    }
                }
            }
        }

        if self.recv.window.saturating_sub(self.recv.window_last_sent) >= self.recv.window_default / 2 {
            need_ack = true;
        }

        if need_ack {
            let seq = self.send.next;
            self.send_ack(cx, seq);
        }
        true
    }

    /// Insert trimmed data into the receive queue.
    ///
    /// Returns the length that was queued, or `None` for a duplicate that was not queued.
    fn enqueue<I: Ip + ?Sized>(
        &mut self,
        cx: &mut Context<I>,
        buffer: BufferKey,
        begin: TcpSeqNumber,
        mut len: usize,
    ) -> Option<usize> {
        let tail_end = self.received.back().map(|tail| span(cx.ip.pool(), tail).1);
        let in_order = begin == self.recv.next && tail_end.map_or(true, |end| end == self.recv.next);

        if in_order {
            self.received.push_back(cx.ip.pool(), buffer, QueueState::Ready);
            if self.timer.delayed_ack == 0 {
                self.timer.delayed_ack = cx.config.ack_timer_rate;
            }
            self.recv.next = begin + len;
            self.recv.ready = self.received.len();
            return Some(len);
        }

        // Out of order, a duplicate acknowledgement tells the sender about the gap.
        if self.received.is_empty() {
            let seq = self.send.next;
            self.send_ack(cx, seq);
            self.received.push_back(cx.ip.pool(), buffer, QueueState::Enqueued);
            if self.timer.delayed_ack == 0 {
                self.timer.delayed_ack = cx.config.ack_timer_rate;
            }
            return Some(len);
        }

        if begin > self.recv.next {
            let seq = self.send.next;
            self.send_ack(cx, seq);
        }

        let pool = cx.ip.pool();
        let end = begin + len;
        let mut prev = None;
        let mut next = self.received.front();
        while let Some(current) = next {
            let queued = span(pool, current);
            let following = BufferQueue::next_of(pool, current);
            match Overlap::classify(begin, end, queued) {
                Overlap::Right => {
                    prev = Some(current);
                    next = following;
                },
                Overlap::Left => break,
                Overlap::Subset => {
                    let seq = self.send.next;
                    self.send_ack(cx, seq);
                    return None;
                },
                Overlap::Superset => {
                    let removed = queued.1 - queued.0;
                    self.received.remove_after(pool, prev);
                    pool.release(current);
                    self.forget_received(cx.info, removed as u64);
                    next = following;
                },
                Overlap::Front => {
                    len = (queued.0 - begin) as usize;
                    pool.truncate(buffer, len);
                    pool.descriptor_mut(buffer).data_len = len;
                    break;
                },
                Overlap::Back => {
                    let keep = (begin - queued.0) as usize;
                    let removed = (queued.1 - begin) as u64;
                    pool.truncate(current, keep);
                    pool.descriptor_mut(current).data_len = keep;
                    self.forget_received(cx.info, removed);
                    prev = Some(current);
                    next = following;
                },
            }
        }

        self.received.insert_after(pool, prev, buffer, QueueState::Enqueued);

        // Mark what has become contiguous.
        let mut ready = 0;
        let mut next = self.received.front();
        while let Some(current) = next {
            let descriptor = pool.descriptor_mut(current);
            if descriptor.link.state != QueueState::Ready {
                if descriptor.sequence != self.recv.next {
                    break;
                }
                descriptor.link.state = QueueState::Ready;
                self.recv.next = descriptor.sequence + descriptor.data_len;
            }
            ready += 1;
            next = descriptor.link.next;
        }
        self.recv.ready = ready;
        Some(len)
    }

    /// Undo the statistics of data that was replaced.
    fn forget_received(&mut self, info: &mut super::endpoint::Info, bytes: u64) {
        self.stats.bytes_received = self.stats.bytes_received.saturating_sub(bytes);
        info.bytes_received = info.bytes_received.saturating_sub(bytes);
    }

    /// Drop the last out-of-order buffer of the receive queue.
    fn drop_newest<I: Ip + ?Sized>(&mut self, cx: &mut Context<I>) -> bool {
        let pool = cx.ip.pool();
        let mut prev = None;
        let mut next = self.received.front();
        while let Some(current) = next {
            match BufferQueue::next_of(pool, current) {
                Some(following) => {
                    prev = Some(current);
                    next = Some(following);
                },
                None => break,
            }
        }

        let tail = match self.received.back() {
            Some(tail) if pool.descriptor(tail).link.state != QueueState::Ready => tail,
            _ => return false,
        };
        let bytes = pool.descriptor(tail).data_len as u64;
        self.received.remove_after(pool, prev);
        pool.release(tail);
        self.forget_received(cx.info, bytes);
        cx.info.receive_packets_dropped += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(begin: i32, end: i32, start: i32, stop: i32) -> Overlap {
        Overlap::classify(
            TcpSeqNumber(begin),
            TcpSeqNumber(end),
            (TcpSeqNumber(start), TcpSeqNumber(stop)),
        )
    }

    #[test]
    fn overlap_cases() {
        assert_eq!(classify(200, 300, 100, 200), Overlap::Right);
        assert_eq!(classify(0, 100, 100, 200), Overlap::Left);
        assert_eq!(classify(120, 180, 100, 200), Overlap::Subset);
        assert_eq!(classify(100, 200, 100, 200), Overlap::Subset);
        assert_eq!(classify(50, 250, 100, 200), Overlap::Superset);
        assert_eq!(classify(50, 150, 100, 200), Overlap::Front);
        assert_eq!(classify(150, 250, 100, 200), Overlap::Back);
    }

    #[test]
    fn overlap_wraps() {
        let start = i32::max_value() - 10;
        let stop = i32::min_value() + 10;
        assert_eq!(classify(stop, stop.wrapping_add(5), start, stop), Overlap::Right);
        assert_eq!(classify(start.wrapping_sub(5), start.wrapping_add(5), start, stop), Overlap::Front);
    }
}
