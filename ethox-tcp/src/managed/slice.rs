use core::ops;

/// Backing storage of the engine's tables.
///
/// Either borrowed, for example from a `static` on targets without an allocator, or owned in a
/// `Vec` when the `std` feature is available. Dereferences to a plain slice either way.
#[derive(Debug, PartialEq, Eq)]
pub enum Slice<'a, T: 'a> {
    /// Storage owned by the table.
    #[cfg(feature = "std")]
    Many(Vec<T>),

    /// Storage living in borrowed memory.
    Borrowed(&'a mut [T]),
}

#[cfg(feature = "std")]
impl<T> From<Vec<T>> for Slice<'_, T> {
    fn from(vec: Vec<T>) -> Self {
        Slice::Many(vec)
    }
}

impl<'a, T> From<&'a mut [T]> for Slice<'a, T> {
    fn from(borrowed: &'a mut [T]) -> Self {
        Slice::Borrowed(borrowed)
    }
}

impl<T> ops::Deref for Slice<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self {
            #[cfg(feature = "std")]
            Slice::Many(vec) => vec,
            Slice::Borrowed(slice) => slice,
        }
    }
}

impl<T> ops::DerefMut for Slice<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        match self {
            #[cfg(feature = "std")]
            Slice::Many(vec) => vec,
            Slice::Borrowed(slice) => slice,
        }
    }
}
