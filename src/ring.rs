use crate::invariants::{
    debug_assert_consumable, debug_assert_forward, debug_assert_occupancy, debug_assert_published,
};
use crate::{Backoff, Config, Metrics, MetricsSnapshot, Reservation};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// Synchronization protocol
// ========================
//
// `head` and `tail` are unbounded u64 positions; the buffer index is
// `position & mask`, computed only at the point of access. Positions never
// wrap in practice (decades at tens of billions of messages per second), so
// `tail - head` is always the exact occupancy.
//
// Producer: load `tail` relaxed (it is the only writer), judge free space
// against its private `cached_head`, refresh that cache with one acquire
// load of `head` when space runs out, write the reserved cells, then store
// `tail` with release. The release/acquire pair on `tail` is what publishes
// the cell contents to the consumer.
//
// Consumer: the mirror image through `cached_tail` and `head`. The release
// store on `head` is what returns cells to the producer.
//
// `cached_head` and `cached_tail` live in `UnsafeCell`s without atomics:
// each has exactly one writing side, which is also the only reading side.
// A cell of the buffer is initialized exactly while its position lies in
// `[head, tail)`; everything else is free space the producer may scribble on.

/// Bounded lock-free queue for exactly one producer and one consumer.
///
/// The building block of [`Channel`](crate::Channel): the channel owns one
/// ring per registered producer and drains them in index order. A ring can
/// also be used standalone wherever a plain SPSC queue is needed.
///
/// Producer-side and consumer-side calls must each come from at most one
/// thread at a time; the ring does not check this at runtime.
#[repr(C)]
pub struct Ring<T> {
    /// Logical tail; producer-owned, release-published by commits.
    tail: CacheAligned<AtomicU64>,
    /// Producer's stale copy of `head`, refreshed only when space runs out.
    cached_head: CacheAligned<UnsafeCell<u64>>,

    /// Logical head; consumer-owned, release-published by advances.
    head: CacheAligned<AtomicU64>,
    /// Consumer's stale copy of `tail`, refreshed only when the ring looks empty.
    cached_tail: CacheAligned<UnsafeCell<u64>>,

    /// Set once a producer claims the ring. Diagnostic.
    active: CacheAligned<AtomicBool>,
    /// One-way: never cleared after `close`.
    closed: AtomicBool,
    /// Present only when `Config::enable_metrics` is set.
    metrics: Option<Box<Metrics>>,
    config: Config,

    /// Cell storage. A fixed allocation; a `Box<[_]>` rather than a `Vec`
    /// since the length never changes after construction.
    slots: UnsafeCell<Box<[MaybeUninit<T>]>>,
}

// SAFETY: the acquire/release protocol on `head`/`tail` above is the sole
// synchronization for the buffer and the caches; it is sound for one
// producer thread plus one consumer thread, which is the ring's contract.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    pub fn new(config: Config) -> Self {
        let mut slots = Vec::with_capacity(config.capacity());
        slots.resize_with(config.capacity(), MaybeUninit::uninit);

        Self {
            tail: CacheAligned::new(AtomicU64::new(0)),
            cached_head: CacheAligned::new(UnsafeCell::new(0)),
            head: CacheAligned::new(AtomicU64::new(0)),
            cached_tail: CacheAligned::new(UnsafeCell::new(0)),
            active: CacheAligned::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            metrics: config.enable_metrics.then(|| Box::new(Metrics::default())),
            config,
            slots: UnsafeCell::new(slots.into_boxed_slice()),
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.config.mask()
    }

    /// Current occupancy. Relaxed loads; informational only.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Relaxed) == self.head.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether a producer has ever claimed this ring. Diagnostic.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self) {
        self.active.store(true, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Producer side
    // ------------------------------------------------------------------

    /// Reserves up to `n` cells for in-place writing.
    ///
    /// Returns `None` when `n` is zero or exceeds the capacity, when fewer
    /// than `n` cells are free, or when the ring is closed. On success the
    /// window holds `min(n, cells until the buffer end)` cells, so a
    /// near-wrap reservation can come back shorter than `n`; callers wanting
    /// exactly `n` items reserve again for the remainder.
    ///
    /// The tail does not move until the reservation is committed.
    pub fn reserve(&self, n: usize) -> Option<Reservation<'_, T>> {
        if n == 0 || n > self.capacity() || self.is_closed() {
            return None;
        }

        let tail = self.tail.load(Ordering::Relaxed);

        // Fast path: judge space against the producer-local head copy,
        // without touching the consumer's cache line.
        // SAFETY: `cached_head` is read and written only by the producer.
        let head = unsafe { *self.cached_head.get() };
        if self.free_cells(tail, head) >= n {
            return Some(self.window(tail, n));
        }

        // Refresh the copy with one acquire load and re-judge.
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: as above; the producer is the only writer of this cache.
        unsafe { *self.cached_head.get() = head };

        if self.free_cells(tail, head) < n {
            return None;
        }
        Some(self.window(tail, n))
    }

    #[inline]
    fn free_cells(&self, tail: u64, head: u64) -> usize {
        self.capacity()
            .saturating_sub(tail.wrapping_sub(head) as usize)
    }

    /// [`reserve`](Self::reserve) that rides a [`Backoff`] through a full ring.
    ///
    /// Gives up with `None` once the backoff completes or the ring is
    /// observed closed.
    pub fn reserve_with_backoff(&self, n: usize) -> Option<Reservation<'_, T>> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(reservation) = self.reserve(n) {
                return Some(reservation);
            }
            if self.is_closed() || backoff.is_completed() {
                return None;
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_reserve_spin();
            }
            backoff.snooze();
        }
    }

    fn window(&self, tail: u64, n: usize) -> Reservation<'_, T> {
        let idx = (tail as usize) & self.mask();
        let contiguous = n.min(self.capacity() - idx);

        // SAFETY: in-bounds pointer arithmetic; a prefetch never dereferences.
        unsafe {
            let base = (*self.slots.get()).as_ptr();
            prefetch_write(base.add((tail as usize).wrapping_add(n) & self.mask()));
        }

        // SAFETY: cells in `[idx, idx + contiguous)` lie in the free region:
        // the caller has established `tail - head + n <= capacity`, the
        // producer is the only writer past the tail, and the consumer will
        // not read these cells until a commit publishes the new tail.
        let cells = unsafe {
            let slots = &mut *self.slots.get();
            &mut slots[idx..idx + contiguous]
        };
        Reservation::new(cells, tail, self)
    }

    /// Advances the tail over `n` freshly written cells. Called by
    /// [`Reservation::commit`].
    pub(crate) fn publish(&self, n: usize) {
        let tail = self.tail.load(Ordering::Relaxed);
        let new_tail = tail.wrapping_add(n as u64);

        debug_assert_occupancy!(
            new_tail.wrapping_sub(self.head.load(Ordering::Relaxed)) as usize,
            self.capacity()
        );
        debug_assert_forward!("tail", tail, new_tail);

        self.tail.store(new_tail, Ordering::Release);

        if let Some(metrics) = &self.metrics {
            metrics.record_send(n as u64);
        }
    }

    /// Enqueues a single item. Returns `false` when full or closed.
    #[inline]
    pub fn push(&self, item: T) -> bool {
        match self.reserve(1) {
            Some(mut reservation) => {
                reservation.as_mut_slice()[0].write(item);
                reservation.commit();
                true
            }
            None => false,
        }
    }

    /// Copies as many items as one reservation holds; returns how many.
    ///
    /// May send fewer than `items.len()` when the reservation stops at the
    /// buffer end. Deliberately does not loop: one call is one commit.
    pub fn send(&self, items: &[T]) -> usize
    where
        T: Copy,
    {
        let Some(mut reservation) = self.reserve(items.len()) else {
            return 0;
        };
        let cells = reservation.as_mut_slice();
        let n = cells.len();
        for (cell, item) in cells.iter_mut().zip(items) {
            cell.write(*item);
        }
        reservation.commit();
        n
    }

    // ------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------

    /// Contiguous view of published items starting at the head.
    ///
    /// Returns `None` when the ring is empty. The view stops at the buffer
    /// end even when more items wrap past it. The head does not move until
    /// [`advance`](Self::advance).
    pub fn readable(&self) -> Option<&[T]>
    where
        T: Copy,
    {
        let head = self.head.load(Ordering::Relaxed);

        // SAFETY: `cached_tail` is read and written only by the consumer.
        let mut avail = unsafe { *self.cached_tail.get() }.wrapping_sub(head) as usize;
        if avail == 0 {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: as above; the consumer is the only writer of this cache.
            unsafe { *self.cached_tail.get() = tail };
            avail = tail.wrapping_sub(head) as usize;
            if avail == 0 {
                return None;
            }
        }

        let idx = (head as usize) & self.mask();
        let contiguous = avail.min(self.capacity() - idx);

        // SAFETY: cells in `[head, head + contiguous)` were published by a
        // release store of `tail` that an acquire load here (or an earlier
        // one that filled the cache) synchronized with. The producer will
        // not overwrite them until the head passes them.
        unsafe {
            let base = (*self.slots.get()).as_ptr();
            prefetch_read(base.add((head as usize).wrapping_add(contiguous) & self.mask()));
            Some(std::slice::from_raw_parts(base.add(idx).cast::<T>(), contiguous))
        }
    }

    /// Returns `n` consumed cells to the producer.
    ///
    /// `n` must not exceed the length of the most recent
    /// [`readable`](Self::readable) view.
    #[inline]
    pub fn advance(&self, n: usize) {
        let head = self.head.load(Ordering::Relaxed);
        let new_head = head.wrapping_add(n as u64);

        debug_assert_consumable!(new_head, self.tail.load(Ordering::Relaxed));
        debug_assert_forward!("head", head, new_head);

        self.head.store(new_head, Ordering::Release);

        if let Some(metrics) = &self.metrics {
            metrics.record_recv(n as u64);
        }
    }

    /// Drains everything published so far through `handler`, then moves the
    /// head once.
    ///
    /// One release store per batch is the point: the producer's head cache
    /// goes stale at most once per batch instead of once per item, and the
    /// per-item loop runs with no atomics at all. Items committed after the
    /// tail snapshot are left for the next batch.
    ///
    /// Each item is dropped after its handler call; handlers must not stash
    /// references into the buffer.
    pub fn consume_batch<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return 0;
        }

        let mask = self.mask();
        let mut pos = head;
        while pos != tail {
            debug_assert_published!(pos, head, tail);
            // SAFETY: `pos` lies in `[head, tail)`, so the cell holds a value
            // published by the acquire-synchronized tail snapshot. Moving it
            // out matches the head update below: once the head passes this
            // position the producer treats the cell as free.
            let item = unsafe { (*self.slots.get())[(pos as usize) & mask].assume_init_read() };
            handler(&item);
            drop(item);
            pos = pos.wrapping_add(1);
        }

        let count = tail.wrapping_sub(head) as usize;
        self.head.store(tail, Ordering::Release);

        if let Some(metrics) = &self.metrics {
            metrics.record_recv(count as u64);
        }
        count
    }

    /// [`consume_batch`](Self::consume_batch) capped at `max_items`, for
    /// consumers that must bound their pause per ring.
    pub fn consume_up_to<F>(&self, max_items: usize, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        if max_items == 0 {
            return 0;
        }

        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let avail = tail.wrapping_sub(head) as usize;
        if avail == 0 {
            return 0;
        }

        let take = avail.min(max_items);
        let mask = self.mask();
        for offset in 0..take {
            let pos = head.wrapping_add(offset as u64);
            debug_assert_published!(pos, head, tail);
            // SAFETY: same argument as in `consume_batch`.
            let item = unsafe { (*self.slots.get())[(pos as usize) & mask].assume_init_read() };
            handler(&item);
            drop(item);
        }

        self.head
            .store(head.wrapping_add(take as u64), Ordering::Release);

        if let Some(metrics) = &self.metrics {
            metrics.record_recv(take as u64);
        }
        take
    }

    /// Copies out one readable view's worth of items; returns how many.
    pub fn recv(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        let Some(view) = self.readable() else {
            return 0;
        };
        let n = view.len().min(out.len());
        out[..n].copy_from_slice(&view[..n]);
        self.advance(n);
        n
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Refuses new reservations from here on. Idempotent; already-published
    /// items stay drainable, so consumers run until `is_empty && is_closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Counter snapshot; all zeros when metrics are disabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics
            .as_ref()
            .map_or_else(MetricsSnapshot::default, |metrics| metrics.snapshot())
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        let mask = self.mask();
        let slots = self.slots.get_mut();

        let mut pos = head;
        while pos != tail {
            // SAFETY: cells in `[head, tail)` still hold initialized values.
            unsafe { ptr::drop_in_place(slots[(pos as usize) & mask].as_mut_ptr()) };
            pos = pos.wrapping_add(1);
        }
    }
}

// ------------------------------------------------------------------
// Cache-line isolation
// ------------------------------------------------------------------

/// 128-byte-aligned wrapper. 64 bytes is one line, but adjacent-line
/// prefetchers on current x86 parts pull lines in pairs; 128 keeps
/// independently-mutated atomics out of each other's pair.
#[repr(align(128))]
struct CacheAligned<T>(T);

impl<T> CacheAligned<T> {
    const fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

// ------------------------------------------------------------------
// Prefetch hints
// ------------------------------------------------------------------

#[inline(always)]
#[allow(unused_variables)]
fn prefetch_read<T>(ptr: *const T) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: a prefetch is a pure hint and never faults.
    unsafe {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
        _mm_prefetch::<_MM_HINT_T0>(ptr.cast::<i8>());
    }
    #[cfg(target_arch = "x86")]
    // SAFETY: as above.
    unsafe {
        use std::arch::x86::{_mm_prefetch, _MM_HINT_T0};
        _mm_prefetch::<_MM_HINT_T0>(ptr.cast::<i8>());
    }
}

#[inline(always)]
#[allow(unused_variables)]
fn prefetch_write<T>(ptr: *const T) {
    // No stable write-prefetch intrinsic; T0 still warms the line.
    prefetch_read(ptr);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_ring() -> Ring<u64> {
        // 16 slots.
        Ring::new(Config::new(4, 1, false))
    }

    #[test]
    fn reserve_write_commit_then_read_in_order() {
        let ring = small_ring();

        let mut reservation = ring.reserve(4).expect("fresh ring has space");
        for (cell, value) in reservation.as_mut_slice().iter_mut().zip([100, 200, 300, 400]) {
            cell.write(value);
        }
        reservation.commit();
        assert_eq!(ring.len(), 4);

        let view = ring.readable().expect("items published");
        assert_eq!(view, [100, 200, 300, 400]);
        ring.advance(4);
        assert!(ring.is_empty());
    }

    #[test]
    fn batch_drain_visits_every_item_once() {
        let ring = small_ring();
        for i in 0..10u64 {
            assert!(ring.push(i * 10));
        }

        let mut sum = 0;
        let drained = ring.consume_batch(|item| sum += item);

        assert_eq!(drained, 10);
        assert_eq!(sum, 450);
        assert!(ring.is_empty());
    }

    #[test]
    fn full_ring_rejects_reserve_and_backoff_gives_up() {
        let ring = small_ring();
        for i in 0..16u64 {
            assert!(ring.push(i));
        }
        assert!(ring.is_full());

        assert!(ring.reserve(1).is_none());
        assert!(ring.reserve_with_backoff(1).is_none());
    }

    #[test]
    fn reservation_truncates_at_buffer_end() {
        let ring = small_ring();

        // Move head and tail to position 6.
        for i in 0..6u64 {
            assert!(ring.push(i));
        }
        assert_eq!(ring.consume_batch(|_| {}), 6);

        // 16 free cells, but only 10 before the wrap.
        let reservation = ring.reserve(16).expect("ring is empty");
        assert_eq!(reservation.len(), 10);
        assert_eq!(reservation.pos(), 6);
        drop(reservation);

        // An uncommitted reservation moved nothing.
        assert!(ring.is_empty());
    }

    #[test]
    fn consume_up_to_caps_the_batch() {
        let ring = small_ring();
        for i in 0..10u64 {
            assert!(ring.push(i));
        }

        let mut seen = Vec::new();
        assert_eq!(ring.consume_up_to(4, |item| seen.push(*item)), 4);
        assert_eq!(seen, [0, 1, 2, 3]);
        assert_eq!(ring.len(), 6);

        assert_eq!(ring.consume_up_to(100, |_| {}), 6);
        assert!(ring.is_empty());
    }

    #[test]
    fn send_truncates_instead_of_wrapping() {
        let ring = small_ring();

        for i in 0..12u64 {
            assert!(ring.push(i));
        }
        assert_eq!(ring.consume_batch(|_| {}), 12);

        // Tail at 12: only 4 contiguous cells before the buffer end.
        let sent = ring.send(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(sent, 4);
        assert_eq!(ring.len(), 4);

        // The remainder goes out in a second call, now past the wrap.
        assert_eq!(ring.send(&[5, 6]), 2);

        let mut seen = Vec::new();
        ring.consume_batch(|item| seen.push(*item));
        assert_eq!(seen, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn closed_ring_refuses_reserve_but_drains() {
        let ring = small_ring();
        assert!(ring.push(41));
        assert!(ring.push(42));

        ring.close();
        ring.close(); // idempotent

        assert!(ring.is_closed());
        assert!(ring.reserve(1).is_none());
        assert!(!ring.push(43));

        let mut seen = Vec::new();
        assert_eq!(ring.consume_batch(|item| seen.push(*item)), 2);
        assert_eq!(seen, [41, 42]);
        assert!(ring.is_empty() && ring.is_closed());
    }

    #[test]
    fn recv_copies_and_advances() {
        let ring = small_ring();
        assert_eq!(ring.send(&[7, 8, 9]), 3);

        let mut out = [0u64; 2];
        assert_eq!(ring.recv(&mut out), 2);
        assert_eq!(out, [7, 8]);
        assert_eq!(ring.len(), 1);

        let mut rest = [0u64; 8];
        assert_eq!(ring.recv(&mut rest), 1);
        assert_eq!(rest[0], 9);
        assert!(ring.is_empty());
    }

    #[test]
    fn pending_items_drop_with_the_ring() {
        use std::sync::atomic::AtomicUsize;

        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROPS.store(0, Ordering::SeqCst);
        {
            let ring = Ring::<Tracked>::new(Config::new(4, 1, false));
            for _ in 0..5 {
                assert!(ring.push(Tracked));
            }
            // Drain two: dropped as they are consumed.
            assert_eq!(ring.consume_up_to(2, |_| {}), 2);
            assert_eq!(DROPS.load(Ordering::SeqCst), 2);
        }
        // The three stragglers go down with the ring.
        assert_eq!(DROPS.load(Ordering::SeqCst), 5);
    }
}
