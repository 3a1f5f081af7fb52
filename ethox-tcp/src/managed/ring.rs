//! Circular, doubly linked lists threaded through a `SlotMap`.
//!
//! The engine keeps the same object in several lists at once, a socket is both in the ring of
//! created sockets and, while bound, in the ring of its port hash bucket. Each membership has its
//! own link stored within the element and a zero-sized tag type selects which one a ring uses.
//!
//! A ring with one element links that element to itself. New elements are always inserted at the
//! tail, that is just before the head, so that walking from the head visits elements in insertion
//! order.
use core::marker::PhantomData;

use super::{Key, SlotMap};

/// The two neighbours of an element within one ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Link {
    /// The element before this one.
    pub prev: Key,
    /// The element after this one.
    pub next: Key,
}

/// An element that can be a member of rings with a specific tag.
pub trait Node<Tag> {
    /// The current link, `None` if not in any ring of this tag.
    fn link(&self) -> Option<Link>;

    /// Overwrite the link.
    fn set_link(&mut self, link: Option<Link>);
}

/// The anchor of a ring.
///
/// Does not own any of the elements but only remembers the head and the length.
#[derive(Debug)]
pub struct Ring<Tag> {
    head: Option<Key>,
    len: usize,
    tag: PhantomData<Tag>,
}

/// A cursor over a ring which tolerates removal of the element it last returned.
///
/// The successor is looked up before an element is returned, and the walk visits at most as many
/// elements as the ring contained when the walk started.
pub struct Walk<Tag> {
    next: Option<Key>,
    remaining: usize,
    tag: PhantomData<Tag>,
}

impl<Tag> Ring<Tag> {
    /// Create an empty ring.
    pub fn new() -> Self {
        Ring {
            head: None,
            len: 0,
            tag: PhantomData,
        }
    }

    /// The oldest element.
    pub fn front(&self) -> Option<Key> {
        self.head
    }

    /// The number of linked elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no element is linked.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Link an element at the tail.
    ///
    /// Returns `false` without any change if the key is invalid or already linked.
    pub fn push_back<T: Node<Tag>>(&mut self, map: &mut SlotMap<T>, key: Key) -> bool {
        match map.get(key) {
            Some(node) if node.link().is_none() => (),
            _ => return false,
        }

        let head = match self.head {
            None => {
                set_link::<T, Tag>(map, key, Link { prev: key, next: key });
                self.head = Some(key);
                self.len = 1;
                return true;
            },
            Some(head) => head,
        };

        let tail = match link_of::<T, Tag>(map, head) {
            Some(link) => link.prev,
            None => return false,
        };

        set_link::<T, Tag>(map, key, Link { prev: tail, next: head });
        update_link::<T, Tag>(map, tail, |link| link.next = key);
        update_link::<T, Tag>(map, head, |link| link.prev = key);
        self.len += 1;
        true
    }

    /// Unlink an element.
    ///
    /// Returns `false` if the element was not linked. The caller must ensure that the element is a
    /// member of this ring and not another one with the same tag.
    pub fn remove<T: Node<Tag>>(&mut self, map: &mut SlotMap<T>, key: Key) -> bool {
        let link = match link_of::<T, Tag>(map, key) {
            Some(link) => link,
            None => return false,
        };

        if link.next == key {
            self.head = None;
            self.len = 0;
        } else {
            update_link::<T, Tag>(map, link.prev, |prev| prev.next = link.next);
            update_link::<T, Tag>(map, link.next, |next| next.prev = link.prev);
            if self.head == Some(key) {
                self.head = Some(link.next);
            }
            self.len -= 1;
        }

        if let Some(node) = map.get_mut(key) {
            node.set_link(None);
        }
        true
    }

    /// Unlink and return the oldest element.
    pub fn pop_front<T: Node<Tag>>(&mut self, map: &mut SlotMap<T>) -> Option<Key> {
        let head = self.head?;
        self.remove(map, head);
        Some(head)
    }

    /// Rotate the ring so that a given member becomes the head.
    ///
    /// Used to move a recently matched element to the front of its lookup chain. Returns `false`
    /// if the element is not linked.
    pub fn set_head<T: Node<Tag>>(&mut self, map: &SlotMap<T>, key: Key) -> bool {
        if link_of::<T, Tag>(map, key).is_none() {
            return false;
        }
        self.head = Some(key);
        true
    }

    /// Start walking from the head.
    pub fn walk(&self) -> Walk<Tag> {
        Walk {
            next: self.head,
            remaining: self.len,
            tag: PhantomData,
        }
    }
}

impl<Tag> Walk<Tag> {
    /// Advance the cursor.
    pub fn next<T: Node<Tag>>(&mut self, map: &SlotMap<T>) -> Option<Key> {
        if self.remaining == 0 {
            return None;
        }

        let current = self.next?;
        let link = link_of::<T, Tag>(map, current)?;
        self.remaining -= 1;
        self.next = Some(link.next);
        Some(current)
    }
}

impl<Tag> Default for Ring<Tag> {
    fn default() -> Self {
        Ring::new()
    }
}

fn link_of<T: Node<Tag>, Tag>(map: &SlotMap<T>, key: Key) -> Option<Link> {
    map.get(key)?.link()
}

fn set_link<T: Node<Tag>, Tag>(map: &mut SlotMap<T>, key: Key, link: Link) {
    if let Some(node) = map.get_mut(key) {
        node.set_link(Some(link));
    }
}

fn update_link<T: Node<Tag>, Tag>(map: &mut SlotMap<T>, key: Key, f: impl FnOnce(&mut Link)) {
    if let Some(node) = map.get_mut(key) {
        if let Some(mut link) = node.link() {
            f(&mut link);
            node.set_link(Some(link));
        }
    }
}
