//! Ring-decomposed lock-free MPSC channel.
//!
//! A conventional MPSC queue makes every producer fight over one shared tail.
//! This crate instead gives each registered producer its own SPSC [`Ring`],
//! and the single consumer fans in across them. Every producer-side operation
//! is an uncontended SPSC operation; the consumer pays one sweep per drain.
//!
//! The pieces:
//!
//! - [`Ring`]: bounded SPSC queue with a zero-copy reserve/commit producer
//!   protocol and a batch-drain consumer protocol. Cached head/tail copies
//!   keep cross-core traffic off the hot paths; hot atomics sit on their own
//!   128-byte-aligned lines.
//! - [`Channel`]: a fixed table of rings plus one-way producer registration.
//! - [`Backoff`]: adaptive spin-then-yield waiting for full rings and empty
//!   drains.
//!
//! # Example
//!
//! ```
//! use ringfan::{Channel, Config};
//!
//! let channel = Channel::<u64>::new(Config::default());
//! let producer = channel.register_producer().unwrap();
//!
//! // Single-item convenience.
//! assert!(producer.push(7));
//!
//! // Zero-copy: reserve cells, write in place, publish.
//! let mut reservation = producer.reserve(2).unwrap();
//! for (i, cell) in reservation.as_mut_slice().iter_mut().enumerate() {
//!     cell.write(10 + i as u64);
//! }
//! reservation.commit();
//!
//! // Batch drain: one handler call per item, one head update per ring.
//! let mut received = Vec::new();
//! let drained = channel.consume_all(|item| received.push(*item));
//! assert_eq!(drained, 3);
//! assert_eq!(received, [7, 10, 11]);
//! ```
//!
//! # Ordering
//!
//! Items from one producer arrive in send order. Across producers there is
//! no defined order: the consumer sweeps rings by index, so callers that
//! need a global order must carry sequence numbers in the payload.

mod backoff;
mod channel;
mod config;
mod invariants;
mod metrics;
mod reservation;
mod ring;

pub use backoff::Backoff;
pub use channel::{Channel, Producer, RegisterError};
pub use config::{Config, HIGH_THROUGHPUT, LOW_LATENCY};
pub use metrics::{Metrics, MetricsSnapshot};
pub use reservation::Reservation;
pub use ring::Ring;
