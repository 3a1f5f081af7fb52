//! Storage facilities the engine can be run with.
//!
//! The engine itself only depends on the `Pool` trait of its IP layer. This module provides a
//! simple implementation over preallocated memory, for stacks without a buffer facility of their
//! own and for testing.
mod pool;

pub use self::pool::{BufferEntry, BufferPool};
