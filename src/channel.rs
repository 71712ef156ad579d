use crate::{Config, MetricsSnapshot, Reservation, Ring};
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Why [`Channel::register_producer`] refused to hand out a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// All producer slots are taken.
    #[error("producer limit reached (max {max})")]
    TooManyProducers {
        /// The configured producer cap.
        max: usize,
    },
    /// The channel was closed before registration.
    #[error("channel is closed")]
    Closed,
}

/// Multi-producer single-consumer channel built from per-producer rings.
///
/// Instead of one shared ring with a contended tail, the channel owns
/// `max_producers` independent SPSC [`Ring`]s. Each registered producer gets
/// exclusive write access to one of them, so the producer hot path never
/// touches shared state; the consumer fans in by sweeping the rings in
/// registration order.
///
/// Cloning the channel clones a handle to the same shared state. Consumer
/// calls (`recv`, `consume_all`) must come from a single logical thread;
/// this is a contract, not something the channel checks.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    rings: Box<[Ring<T>]>,
    producer_count: AtomicUsize,
    closed: AtomicBool,
    config: Config,
}

impl<T> Channel<T> {
    /// Pre-constructs all `config.max_producers` rings up front, so
    /// registration is just an index claim.
    pub fn new(config: Config) -> Self {
        let rings: Vec<Ring<T>> = (0..config.max_producers).map(|_| Ring::new(config)).collect();

        Self {
            shared: Arc::new(Shared {
                rings: rings.into_boxed_slice(),
                producer_count: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Claims the next free ring and returns its write handle.
    ///
    /// Registration is one-way: ids grow monotonically and rings are never
    /// returned to a pool, even when the handle is dropped.
    pub fn register_producer(&self) -> Result<Producer<T>, RegisterError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(RegisterError::Closed);
        }

        // Relaxed suffices: the id handed back by the fetch_add is the sole
        // claim on rings[id], and every ring was fully constructed before
        // the channel could be shared.
        let id = self.shared.producer_count.fetch_add(1, Ordering::Relaxed);
        if id >= self.shared.config.max_producers {
            // Undo the overshoot; the count settles back at the cap.
            self.shared.producer_count.fetch_sub(1, Ordering::Relaxed);
            return Err(RegisterError::TooManyProducers {
                max: self.shared.config.max_producers,
            });
        }

        self.shared.rings[id].set_active();
        Ok(Producer {
            shared: Arc::clone(&self.shared),
            id,
            _not_sync: PhantomData,
        })
    }

    /// Rings claimed so far, in registration order.
    ///
    /// The count may transiently overshoot the cap while a losing
    /// registration compensates, so clamp to the ring table.
    fn registered(&self) -> &[Ring<T>] {
        let count = self.shared.producer_count.load(Ordering::Acquire);
        &self.shared.rings[..count.min(self.shared.rings.len())]
    }

    /// Copies items into `out`, sweeping rings in index order.
    ///
    /// Each ring is drained before the next is looked at, so earlier
    /// producers win ties; stops once `out` is full or every ring came up
    /// empty in this pass.
    pub fn recv(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        let mut filled = 0;
        for ring in self.registered() {
            if filled == out.len() {
                break;
            }
            filled += ring.recv(&mut out[filled..]);
        }
        filled
    }

    /// Batch-drains every registered ring through `handler`.
    ///
    /// One head update per ring per call. Items from one producer arrive in
    /// send order; across producers the order is the sweep order, nothing
    /// more.
    pub fn consume_all<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        self.registered()
            .iter()
            .map(|ring| ring.consume_batch(&mut handler))
            .sum()
    }

    /// [`consume_all`](Self::consume_all) capped at `max_total` items,
    /// lower ring indices first.
    pub fn consume_all_up_to<F>(&self, max_total: usize, mut handler: F) -> usize
    where
        F: FnMut(&T),
    {
        let mut total = 0;
        for ring in self.registered() {
            if total == max_total {
                break;
            }
            total += ring.consume_up_to(max_total - total, &mut handler);
        }
        total
    }

    /// Closes the channel and every registered ring. Idempotent.
    ///
    /// Pending items survive; consumers drain until every ring is both
    /// closed and empty.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        for ring in self.registered() {
            ring.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of successful registrations so far.
    pub fn producer_count(&self) -> usize {
        self.shared
            .producer_count
            .load(Ordering::Acquire)
            .min(self.shared.rings.len())
    }

    /// Direct access to one ring, registered or not. For dedicated per-ring
    /// consumers and diagnostics.
    pub fn ring(&self, id: usize) -> Option<&Ring<T>> {
        self.shared.rings.get(id)
    }

    /// Counter totals across all registered rings; zeros when metrics are
    /// disabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut total = MetricsSnapshot::default();
        for ring in self.registered() {
            total += ring.metrics();
        }
        total
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Write handle bound to one ring of a [`Channel`].
///
/// Not `Clone`, and deliberately not `Sync`: the ring's producer protocol
/// tolerates exactly one writing thread. Moving the handle between threads
/// is fine.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    id: usize,
    /// Opts out of `Sync` while leaving `Send` intact.
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> std::fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<T> Producer<T> {
    /// Registration index; also the ring index inside the channel.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    fn ring(&self) -> &Ring<T> {
        &self.shared.rings[self.id]
    }

    /// See [`Ring::reserve`].
    #[inline]
    pub fn reserve(&self, n: usize) -> Option<Reservation<'_, T>> {
        self.ring().reserve(n)
    }

    /// See [`Ring::reserve_with_backoff`].
    #[inline]
    pub fn reserve_with_backoff(&self, n: usize) -> Option<Reservation<'_, T>> {
        self.ring().reserve_with_backoff(n)
    }

    /// See [`Ring::push`].
    #[inline]
    pub fn push(&self, item: T) -> bool {
        self.ring().push(item)
    }

    /// See [`Ring::send`].
    #[inline]
    pub fn send(&self, items: &[T]) -> usize
    where
        T: Copy,
    {
        self.ring().send(items)
    }

    /// Closes this producer's ring only.
    #[inline]
    pub fn close(&self) {
        self.ring().close();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.ring().is_closed()
    }
}
