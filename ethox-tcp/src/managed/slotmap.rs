use super::Slice;

/// Bookkeeping of one entry of a [`SlotMap`].
///
/// Kept apart from the elements so that it is always `Copy` and `Default`, whatever the element
/// type is.
///
/// [`SlotMap`]: struct.SlotMap.html
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Slot {
    /// Odd while the slot holds an element, even while it is vacant.
    stamp: u32,
    /// The next vacant slot, only meaningful while vacant.
    next_vacant: Option<usize>,
}

/// A fixed pool of objects addressed by generation checked keys.
///
/// This is the arena behind sockets, listeners and suspended callers. Lookup with a key detects
/// if its entry has been removed, so a stale socket handle held by an application fails cleanly
/// instead of aliasing a new socket that reused the slot.
///
/// The map does not own the storage of its elements, it manages the slices given at
/// construction. Vacant slots are chained into a list so that acquiring and releasing a slot is
/// constant time. Slots that were never used are handed out in order before any reused one.
///
/// ```
/// # use ethox_tcp::managed::{Slice, SlotMap, Slot};
///
/// let mut elements = [0usize; 16];
/// let mut slots = [Slot::default(); 16];
///
/// let mut map = SlotMap::new(
///     Slice::Borrowed(&mut elements[..]),
///     Slice::Borrowed(&mut slots[..]));
/// let index = map.insert(42).unwrap();
/// assert_eq!(map.get(index).cloned(), Some(42));
/// ```
pub struct SlotMap<'a, T> {
    elements: Slice<'a, T>,
    slots: Slice<'a, Slot>,
    /// Head of the chain of released slots.
    vacant: Option<usize>,
    /// Slots at and above this index were never handed out.
    untouched: usize,
    used: usize,
    capacity: usize,
}

/// An index into a slotmap.
///
/// Valid until the entry is removed. Using it afterwards fails, even when the slot has since
/// been reused for another element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Key {
    idx: usize,
    stamp: u32,
}

impl Slot {
    fn is_occupied(&self) -> bool {
        self.stamp % 2 == 1
    }

    /// Flip between occupied and vacant.
    ///
    /// Every flip produces a stamp not seen in this slot for the last 2^31 occupations.
    fn flip(&mut self) {
        self.stamp = self.stamp.wrapping_add(1);
    }
}

impl<'a, T> SlotMap<'a, T> {
    /// Manage the given element storage.
    ///
    /// The capacity is the smaller of the two slice lengths.
    pub fn new(elements: Slice<'a, T>, slots: Slice<'a, Slot>) -> Self {
        let capacity = elements.len().min(slots.len());
        SlotMap {
            elements,
            slots,
            vacant: None,
            untouched: 0,
            used: 0,
            capacity,
        }
    }
}

impl<T> SlotMap<'_, T> {
    /// Retrieve a value by key.
    pub fn get(&self, key: Key) -> Option<&T> {
        self.check(key)?;
        self.elements.get(key.idx)
    }

    /// Retrieve a mutable value by key.
    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        self.check(key)?;
        self.elements.get_mut(key.idx)
    }

    /// Occupy a slot, returning its key and the element currently stored there.
    pub fn reserve(&mut self) -> Option<(Key, &mut T)> {
        let idx = self.take_vacant()?;
        let slot = &mut self.slots[idx];
        debug_assert!(!slot.is_occupied());
        slot.flip();
        slot.next_vacant = None;
        let key = Key { idx, stamp: slot.stamp };
        self.used += 1;
        Some((key, &mut self.elements[idx]))
    }

    /// Occupy a slot with a value.
    ///
    /// The old value stored in the backing slice is overwritten.
    pub fn insert(&mut self, value: T) -> Option<Key> {
        let (key, element) = self.reserve()?;
        *element = value;
        Some(key)
    }

    /// Remove an element.
    ///
    /// Returns the removed element, still in place in the backing storage, or `None` if the key
    /// does not refer to a live entry.
    pub fn remove(&mut self, key: Key) -> Option<&mut T> {
        self.check(key)?;
        let slot = &mut self.slots[key.idx];
        slot.flip();
        slot.next_vacant = self.vacant;
        self.vacant = Some(key.idx);
        self.used -= 1;
        Some(&mut self.elements[key.idx])
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        self.used
    }

    /// The maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn check(&self, key: Key) -> Option<()> {
        let slot = self.slots.get(key.idx)?;
        if slot.is_occupied() && slot.stamp == key.stamp {
            Some(())
        } else {
            None
        }
    }

    fn take_vacant(&mut self) -> Option<usize> {
        if let Some(idx) = self.vacant {
            self.vacant = self.slots[idx].next_vacant;
            return Some(idx);
        }

        if self.untouched < self.capacity {
            self.untouched += 1;
            return Some(self.untouched - 1);
        }

        None
    }
}
