//! The buffer facility the engine borrows from its IP layer.
//!
//! Buffers are owned by the pool and referred to through a [`BufferKey`]. Each buffer carries a
//! [`Descriptor`] next to its bytes. The engine threads its queues through the descriptors, the
//! inbound queue, the per-socket receive and sent queues and the queued connection requests of a
//! listener, so that no queue needs storage of its own.
//!
//! The bytes of a buffer are a window into some larger backing memory. Prepending a header moves
//! the start of the window back, consuming a header moves it forward.
//!
//! [`BufferKey`]: struct.BufferKey.html
//! [`Descriptor`]: struct.Descriptor.html
use crate::wire::{IpAddress, TcpSeqNumber};
use super::Result;
use super::ip::InterfaceId;

/// Identifies a buffer within its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferKey(pub usize);

/// Where a buffer currently is, with respect to the engine's queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueState {
    /// Not in any queue, owned by whoever holds the key.
    Allocated,

    /// Queued for processing, or handed to the driver and not yet transmitted.
    Enqueued,

    /// Received data which is contiguous with everything before it.
    ///
    /// Only these buffers may be handed to the application.
    Ready,

    /// The driver has finished transmitting a buffer that the engine still keeps for
    /// retransmission.
    TxDone,
}

/// The queue link of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueLink {
    /// The next buffer in the same queue.
    pub next: Option<BufferKey>,
    /// The state with respect to queues.
    pub state: QueueState,
}

/// Metadata stored next to the bytes of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Descriptor {
    /// Link into an engine queue.
    pub link: QueueLink,
    /// The source address of a received segment.
    pub source: IpAddress,
    /// The destination address of a received segment.
    pub destination: IpAddress,
    /// The interface a segment arrived on.
    pub interface: Option<InterfaceId>,
    /// The first sequence number covered by the data.
    pub sequence: TcpSeqNumber,
    /// The number of data bytes, not counting any header still in front.
    pub data_len: usize,
}

/// A pool of packet buffers.
///
/// The engine allocates from it for every segment it builds and releases every buffer it
/// consumes. Implementations decide how memory is laid out, the engine only depends on the
/// operations here.
pub trait Pool {
    /// Allocate an empty buffer with room for headers in front.
    fn allocate(&mut self) -> Option<BufferKey>;

    /// Return a buffer to the pool.
    ///
    /// Releasing a key that is not allocated is ignored.
    fn release(&mut self, buffer: BufferKey);

    /// The current bytes of a buffer.
    fn payload(&self, buffer: BufferKey) -> &[u8];

    /// The current bytes of a buffer, mutably.
    fn payload_mut(&mut self, buffer: BufferKey) -> &mut [u8];

    /// Append bytes at the end.
    fn append(&mut self, buffer: BufferKey, data: &[u8]) -> Result<()>;

    /// Grow the buffer at the front by `len` bytes, for a header.
    fn prepend(&mut self, buffer: BufferKey, len: usize) -> Result<()>;

    /// Consume `len` bytes at the front.
    fn advance(&mut self, buffer: BufferKey, len: usize);

    /// Shorten the buffer to at most `len` bytes.
    fn truncate(&mut self, buffer: BufferKey, len: usize);

    /// The largest number of data bytes a single buffer can hold.
    fn capacity(&self) -> usize;

    /// Whether the buffer can become a segment without copying.
    ///
    /// That requires its data to be contiguous and aligned, and enough headroom in front for a
    /// segment header.
    fn in_place(&self, buffer: BufferKey) -> bool;

    /// Access the descriptor.
    fn descriptor(&self, buffer: BufferKey) -> &Descriptor;

    /// Access the descriptor mutably.
    fn descriptor_mut(&mut self, buffer: BufferKey) -> &mut Descriptor;
}

/// A singly linked queue of buffers threaded through their descriptors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferQueue {
    head: Option<BufferKey>,
    tail: Option<BufferKey>,
    len: usize,
}

/// Signal the end of a driver transmission.
///
/// A buffer which the engine still keeps for retransmission is marked as [`TxDone`] so that it
/// may be resent or released on acknowledgement. Any other buffer is released immediately, the
/// engine has already given up its claim on it.
///
/// [`TxDone`]: enum.QueueState.html#variant.TxDone
pub fn transmit_complete<P: Pool + ?Sized>(pool: &mut P, buffer: BufferKey) {
    match pool.descriptor(buffer).link.state {
        QueueState::Enqueued => pool.descriptor_mut(buffer).link.state = QueueState::TxDone,
        _ => pool.release(buffer),
    }
}

impl BufferQueue {
    /// An empty queue.
    pub fn new() -> Self {
        BufferQueue::default()
    }

    /// The oldest buffer.
    pub fn front(&self) -> Option<BufferKey> {
        self.head
    }

    /// The newest buffer.
    pub fn back(&self) -> Option<BufferKey> {
        self.tail
    }

    /// Number of queued buffers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no buffer is queued.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Queue a buffer at the tail, setting its link state.
    pub fn push_back<P: Pool + ?Sized>(&mut self, pool: &mut P, buffer: BufferKey, state: QueueState) {
        pool.descriptor_mut(buffer).link = QueueLink { next: None, state };
        match self.tail {
            Some(tail) => pool.descriptor_mut(tail).link.next = Some(buffer),
            None => self.head = Some(buffer),
        }
        self.tail = Some(buffer);
        self.len += 1;
    }

    /// Insert a buffer directly after another queued one, or at the front.
    pub fn insert_after<P: Pool + ?Sized>(
        &mut self,
        pool: &mut P,
        after: Option<BufferKey>,
        buffer: BufferKey,
        state: QueueState,
    ) {
        let next = match after {
            Some(prev) => pool.descriptor(prev).link.next,
            None => self.head,
        };
        pool.descriptor_mut(buffer).link = QueueLink { next, state };
        match after {
            Some(prev) => pool.descriptor_mut(prev).link.next = Some(buffer),
            None => self.head = Some(buffer),
        }
        if next.is_none() {
            self.tail = Some(buffer);
        }
        self.len += 1;
    }

    /// Unlink the oldest buffer, leaving it `Allocated`.
    pub fn pop_front<P: Pool + ?Sized>(&mut self, pool: &mut P) -> Option<BufferKey> {
        let head = self.head?;
        let link = &mut pool.descriptor_mut(head).link;
        self.head = link.next.take();
        link.state = QueueState::Allocated;
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(head)
    }

    /// Unlink the buffer following `prev`, or the head, leaving it `Allocated`.
    pub fn remove_after<P: Pool + ?Sized>(&mut self, pool: &mut P, prev: Option<BufferKey>)
        -> Option<BufferKey>
    {
        let prev = match prev {
            None => return self.pop_front(pool),
            Some(prev) => prev,
        };

        let removed = pool.descriptor(prev).link.next?;
        let link = &mut pool.descriptor_mut(removed).link;
        let next = link.next.take();
        link.state = QueueState::Allocated;
        pool.descriptor_mut(prev).link.next = next;
        if next.is_none() {
            self.tail = Some(prev);
        }
        self.len -= 1;
        Some(removed)
    }

    /// The buffer following another queued one.
    pub fn next_of<P: Pool + ?Sized>(pool: &P, buffer: BufferKey) -> Option<BufferKey> {
        pool.descriptor(buffer).link.next
    }

    /// Release every buffer in the queue.
    pub fn release_all<P: Pool + ?Sized>(&mut self, pool: &mut P) {
        while let Some(buffer) = self.pop_front(pool) {
            pool.release(buffer);
        }
    }

    /// Release every buffer of a queue of sent segments.
    ///
    /// Buffers still held by the driver are only marked `Allocated`, the driver releases them once
    /// it is done.
    pub fn release_sent<P: Pool + ?Sized>(&mut self, pool: &mut P) {
        while let Some(buffer) = self.head {
            let state = pool.descriptor(buffer).link.state;
            self.pop_front(pool);
            if state != QueueState::Enqueued {
                pool.release(buffer);
            }
        }
    }

    /// Forget all queued buffers at once, after they were handed elsewhere.
    pub fn clear(&mut self) {
        *self = BufferQueue::default();
    }
}

impl Default for QueueLink {
    fn default() -> Self {
        QueueLink {
            next: None,
            state: QueueState::Allocated,
        }
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        Descriptor {
            link: QueueLink::default(),
            source: IpAddress::Unspecified,
            destination: IpAddress::Unspecified,
            interface: None,
            sequence: TcpSeqNumber::default(),
            data_len: 0,
        }
    }
}
