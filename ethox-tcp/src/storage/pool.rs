use crate::layer::{Error, Result};
use crate::layer::buffer::{BufferKey, Descriptor, Pool};
use crate::managed::Slice;
use crate::wire::TCP_HEADER_LEN;

/// Bookkeeping of one buffer in a `BufferPool`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BufferEntry {
    begin: usize,
    end: usize,
    in_use: bool,
    descriptor: Descriptor,
}

/// A pool of equally sized buffers carved from one memory region.
///
/// Every buffer is a chunk of the memory with a fixed amount of headroom reserved in front, so
/// that headers can be prepended without copying.
///
/// ```
/// # use ethox_tcp::layer::buffer::Pool;
/// # use ethox_tcp::managed::Slice;
/// # use ethox_tcp::storage::{BufferEntry, BufferPool};
/// let mut memory = [0u8; 4 * 128];
/// let mut entries = [BufferEntry::default(); 4];
/// let mut pool = BufferPool::new(
///     Slice::Borrowed(&mut memory[..]),
///     Slice::Borrowed(&mut entries[..]),
///     64);
///
/// let buffer = pool.allocate().unwrap();
/// pool.append(buffer, b"hello").unwrap();
/// assert_eq!(pool.payload(buffer), b"hello");
/// assert_eq!(pool.available(), 3);
/// ```
pub struct BufferPool<'a> {
    memory: Slice<'a, u8>,
    entries: Slice<'a, BufferEntry>,
    chunk: usize,
    headroom: usize,
}

impl<'a> BufferPool<'a> {
    /// Create a pool, dividing the memory evenly between the entries.
    ///
    /// # Panics
    /// This function panics if the resulting chunks are not larger than the headroom.
    pub fn new(memory: Slice<'a, u8>, mut entries: Slice<'a, BufferEntry>, headroom: usize) -> Self {
        let chunk = match entries.len() {
            0 => 0,
            count => memory.len() / count,
        };
        assert!(entries.is_empty() || chunk > headroom, "buffers too small for their headroom");

        for entry in entries.iter_mut() {
            *entry = BufferEntry::default();
        }

        BufferPool {
            memory,
            entries,
            chunk,
            headroom,
        }
    }

    /// Number of buffers that can currently be allocated.
    pub fn available(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.in_use).count()
    }

    /// Total number of buffers.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, buffer: BufferKey) -> &BufferEntry {
        &self.entries[buffer.0]
    }

    fn entry_mut(&mut self, buffer: BufferKey) -> &mut BufferEntry {
        &mut self.entries[buffer.0]
    }

    fn base(&self, buffer: BufferKey) -> usize {
        buffer.0 * self.chunk
    }
}

impl Pool for BufferPool<'_> {
    fn allocate(&mut self) -> Option<BufferKey> {
        let headroom = self.headroom;
        let index = self.entries.iter().position(|entry| !entry.in_use)?;
        self.entries[index] = BufferEntry {
            begin: headroom,
            end: headroom,
            in_use: true,
            descriptor: Descriptor::default(),
        };
        Some(BufferKey(index))
    }

    fn release(&mut self, buffer: BufferKey) {
        if let Some(entry) = self.entries.get_mut(buffer.0) {
            entry.in_use = false;
        }
    }

    fn payload(&self, buffer: BufferKey) -> &[u8] {
        let base = self.base(buffer);
        let entry = self.entry(buffer);
        &self.memory[base + entry.begin..base + entry.end]
    }

    fn payload_mut(&mut self, buffer: BufferKey) -> &mut [u8] {
        let base = self.base(buffer);
        let BufferEntry { begin, end, .. } = *self.entry(buffer);
        &mut self.memory[base + begin..base + end]
    }

    fn append(&mut self, buffer: BufferKey, data: &[u8]) -> Result<()> {
        let base = self.base(buffer);
        let chunk = self.chunk;
        let end = self.entry(buffer).end;
        if end + data.len() > chunk {
            return Err(Error::Exhausted);
        }
        self.memory[base + end..base + end + data.len()].copy_from_slice(data);
        self.entry_mut(buffer).end += data.len();
        Ok(())
    }

    fn prepend(&mut self, buffer: BufferKey, len: usize) -> Result<()> {
        let entry = self.entry_mut(buffer);
        if entry.begin < len {
            return Err(Error::Exhausted);
        }
        entry.begin -= len;
        Ok(())
    }

    fn advance(&mut self, buffer: BufferKey, len: usize) {
        let entry = self.entry_mut(buffer);
        entry.begin = (entry.begin + len).min(entry.end);
    }

    fn truncate(&mut self, buffer: BufferKey, len: usize) {
        let entry = self.entry_mut(buffer);
        entry.end = entry.end.min(entry.begin + len);
    }

    fn capacity(&self) -> usize {
        self.chunk - self.headroom
    }

    fn in_place(&self, buffer: BufferKey) -> bool {
        let entry = self.entry(buffer);
        entry.begin >= TCP_HEADER_LEN && (self.base(buffer) + entry.begin) % 4 == 0
    }

    fn descriptor(&self, buffer: BufferKey) -> &Descriptor {
        &self.entry(buffer).descriptor
    }

    fn descriptor_mut(&mut self, buffer: BufferKey) -> &mut Descriptor {
        &mut self.entry_mut(buffer).descriptor
    }
}
