#![deny(missing_docs)]
//! Weathervane API contains the wire protocol types shared by the three
//! weathervane participant roles: the aggregation server, content
//! producers, and query clients.
//!
//! The wire dialect is HTTP-shaped but is not HTTP: on every accepted
//! connection the aggregation server first writes its current Lamport
//! clock value as a single decimal line, then reads exactly one request,
//! writes exactly one response line, and closes. Event ordering across
//! all participants is maintained by the Lamport timestamps carried in
//! the `LamportClock` header; wall-clock time never orders data.

mod error;
pub use error::*;

mod clock;
pub use clock::*;

mod protocol;
pub use protocol::*;
