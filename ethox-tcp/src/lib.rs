//! A TCP engine for small, fixed-resource network stacks.
//!
//! ## Table of contents
//!
//! 1. [Design](#design-and-relevant-core-concepts)
//! 2. [The wire module](wire/index.html)
//!    1. [Ip addresses and checksums](wire/ip/index.html)
//!    1. [Tcp segments](wire/tcp/index.html)
//! 3. [The layers](layer/index.html)
//!    1. [Buffer facility](layer/buffer/index.html)
//!    1. [Ip collaborator](layer/ip/index.html)
//!    1. [The tcp engine](layer/tcp/index.html)
//! 4. Internals
//!    1. [The managed module](managed/index.html)
//!    2. [The storage module](storage/index.html)
//!
//! ## Design and relevant core concepts
//!
//! The engine sits on top of an IP layer that it does not own. Everything below TCP, that is
//! routing, fragmentation, neighbor discovery and the driver, is reached through the [`Ip`] trait
//! and every packet buffer through the [`Pool`] trait. Both are passed into each call that may
//! need them instead of being stored, so that the engine itself is plain data which the caller
//! can protect with whatever lock fits the environment.
//!
//! Nothing within the engine *ever* dynamically allocates memory. Sockets, listeners, suspended
//! callers and the port hash table are all given to the constructor as preallocated storage, in
//! the form of a [`Slice`]. Creating a socket acquires a slot, deleting it returns the slot. This
//! keeps memory use bounded and known upfront, which is the main requirement of the embedded
//! targets this is written for.
//!
//! [`Ip`]: layer/ip/trait.Ip.html
//! [`Pool`]: layer/buffer/trait.Pool.html
//! [`Slice`]: managed/enum.Slice.html
#![warn(missing_docs)]
#![warn(unreachable_pub)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

#[cfg(feature = "log")]
#[macro_use]
extern crate log;

#[macro_use] mod macros;
pub mod layer;
pub mod managed;
pub mod storage;
pub mod wire;
