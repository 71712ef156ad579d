/// Construction-time tuning for rings and channels.
///
/// Capacity is always a power of two so index wrapping is a single mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// log2 of the per-ring capacity (default 16, i.e. 65536 slots).
    pub ring_bits: u32,
    /// Hard cap on concurrently registered producers (default 16).
    pub max_producers: usize,
    /// Maintain per-ring counters on commit/advance (default off).
    pub enable_metrics: bool,
}

impl Config {
    /// # Panics
    ///
    /// Panics when `ring_bits` is zero or at least the word size, or when
    /// `max_producers` is zero. Both are construction-time programmer errors.
    pub const fn new(ring_bits: u32, max_producers: usize, enable_metrics: bool) -> Self {
        assert!(
            ring_bits >= 1 && ring_bits < usize::BITS,
            "ring_bits must lie in [1, word size)"
        );
        assert!(max_producers > 0, "max_producers must be positive");

        Self {
            ring_bits,
            max_producers,
            enable_metrics,
        }
    }

    /// Slots per ring.
    #[inline]
    pub const fn capacity(&self) -> usize {
        1 << self.ring_bits
    }

    /// Index mask (`capacity - 1`).
    #[inline]
    pub const fn mask(&self) -> usize {
        self.capacity() - 1
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(16, 16, false)
    }
}

/// 4096-slot rings: small enough to stay cache-resident.
pub const LOW_LATENCY: Config = Config::new(12, 16, false);

/// 256K-slot rings and room for 32 producers.
pub const HIGH_THROUGHPUT: Config = Config::new(18, 32, false);
