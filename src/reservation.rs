use crate::Ring;
use std::mem::MaybeUninit;

/// In-place write window handed out by [`Ring::reserve`].
///
/// The window views the contiguous free cells starting at the logical tail
/// captured when the reservation was made. Write every cell, then call
/// [`commit`](Self::commit) to publish them; dropping an uncommitted
/// reservation leaves the ring untouched.
///
/// The window may be shorter than the requested count when the free region
/// wraps at the end of the buffer. Check [`len`](Self::len) and reserve again
/// for the remainder.
///
/// ```
/// # use ringfan::{Config, Ring};
/// let ring = Ring::<u32>::new(Config::new(4, 1, false));
///
/// let mut reservation = ring.reserve(3).unwrap();
/// for (i, cell) in reservation.as_mut_slice().iter_mut().enumerate() {
///     cell.write(i as u32);
/// }
/// reservation.commit();
/// assert_eq!(ring.len(), 3);
/// ```
pub struct Reservation<'a, T> {
    cells: &'a mut [MaybeUninit<T>],
    pos: u64,
    ring: &'a Ring<T>,
}

impl<'a, T> Reservation<'a, T> {
    pub(crate) fn new(cells: &'a mut [MaybeUninit<T>], pos: u64, ring: &'a Ring<T>) -> Self {
        Self { cells, pos, ring }
    }

    /// Writable view of the reserved cells.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [MaybeUninit<T>] {
        self.cells
    }

    /// Number of reserved cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Logical tail position the window starts at.
    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Publishes every reserved cell to the consumer.
    ///
    /// Every cell must have been written first: the consumer will treat the
    /// whole window as initialized once the ring's tail moves.
    #[inline]
    pub fn commit(self) {
        self.ring.publish(self.cells.len());
    }
}
