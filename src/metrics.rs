use std::sync::atomic::{AtomicU64, Ordering};

/// Per-ring operation counters.
///
/// All counters are relaxed atomics: nothing synchronizes through them, and
/// eventual visibility is good enough for monitoring. Within one ring the
/// sent-side counters have a single writer (the producer) and the
/// received-side counters have a single writer (the consumer).
///
/// Rings only carry a `Metrics` when [`Config::enable_metrics`] is set; with
/// metrics disabled the counters do not exist at all.
///
/// [`Config::enable_metrics`]: crate::Config::enable_metrics
#[derive(Debug, Default)]
pub struct Metrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    batches_sent: AtomicU64,
    batches_received: AtomicU64,
    reserve_spins: AtomicU64,
}

impl Metrics {
    /// Records one commit of `n` items.
    #[inline]
    pub(crate) fn record_send(&self, n: u64) {
        self.messages_sent.fetch_add(n, Ordering::Relaxed);
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one head advance over `n` items.
    #[inline]
    pub(crate) fn record_recv(&self, n: u64) {
        self.messages_received.fetch_add(n, Ordering::Relaxed);
        self.batches_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one failed attempt inside a backed-off reserve.
    #[inline]
    pub(crate) fn record_reserve_spin(&self) {
        self.reserve_spins.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters into a plain value.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_received: self.batches_received.load(Ordering::Relaxed),
            reserve_spins: self.reserve_spins.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values, summable across rings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Items published by commits.
    pub messages_sent: u64,
    /// Items consumed by advances and batch drains.
    pub messages_received: u64,
    /// Number of commits.
    pub batches_sent: u64,
    /// Number of advances / batch drains.
    pub batches_received: u64,
    /// Failed attempts observed by `reserve_with_backoff`.
    pub reserve_spins: u64,
}

impl std::ops::AddAssign for MetricsSnapshot {
    fn add_assign(&mut self, other: Self) {
        self.messages_sent += other.messages_sent;
        self.messages_received += other.messages_received;
        self.batches_sent += other.batches_sent;
        self.batches_received += other.batches_received;
        self.reserve_spins += other.reserve_spins;
    }
}
