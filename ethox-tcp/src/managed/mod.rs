//! An assortment of non-owning containers.
//!
//! All of these containers are constructed from one (or more) slices of the underlying types
//! instead of allocating resources dynamically. The engine keeps every socket, listener and
//! suspended caller in a [`SlotMap`] and threads them together with [`Ring`]s.
//!
//! [`SlotMap`]: struct.SlotMap.html
//! [`Ring`]: struct.Ring.html
mod ring;
mod slice;
/// Generation checked arena.
pub mod slotmap;

pub use self::ring::{Link, Node, Ring, Walk};
pub use self::slice::Slice;
pub use self::slotmap::{Key, SlotMap, Slot};
