#![deny(missing_docs)]
//! The weathervane aggregation server collects weather observations
//! pushed by independent content producers and answers pull queries for
//! the most recent observation at a station.
//!
//! Event ordering across producers, clients, and the server is
//! maintained by a Lamport logical clock carried on the wire (see
//! `weathervane_api`): every accepted connection is greeted with the
//! server's current clock value on a single line, the request carries
//! the peer's timestamp back, and queries only see observations at or
//! before the clock value they present. Wall-clock time is used for
//! exactly one thing: producers that have been silent for longer than
//! the liveness window have their observations hidden from queries
//! (soft expiry) until they push again.
//!
//! The server is built from three long-lived os threads sharing memory:
//! an acceptor (accept, greet, hand off), a single request worker
//! (decode, handle, respond), and a checkpointer that persists the full
//! state to a JSON file on a fixed interval and restores it at startup.
//! Because the worker is single-threaded, uploads and queries are
//! totally ordered and the handlers need no per-map locking.

/// Wall-clock now in integer milliseconds since the unix epoch.
///
/// This feeds the producer liveness table only. It is always compared
/// against this process's own later readings, so clock skew between
/// machines cannot affect query results.
pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .expect("InvalidSystemTime")
        .as_millis() as i64
}

mod config;
pub use config::*;

mod transport;
pub use transport::*;

mod store;
pub use store::*;

mod checkpoint;
pub use checkpoint::Checkpoint;

mod server;
pub use server::*;
