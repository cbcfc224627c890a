//! Worker-side stages of a conversion.
//!
//! Each submodule owns one concern of getting a document through
//! LibreOffice. The orchestrator in [`crate::convert`] only talks to
//! [`uno`]; the other modules sit underneath it.
//!
//! ## Call graph
//!
//! ```text
//! convert ──▶ uno ──▶ listener (lock / spawn_ready)
//!               │
//!               ├──▶ counter (enter)
//!               └──▶ runner  (run unoconv)
//! ```
//!
//! 1. [`runner`]: spawn a program, wait for its exit code, kill it on cancellation
//! 2. [`listener`]: supervise the long-running `soffice` listener, serialise access to it
//! 3. [`counter`]: count conversions in flight, for diagnostics only
//! 4. [`uno`]: one `unoconv` invocation per document, exit code → error

pub mod counter;
pub mod listener;
pub mod runner;
pub mod uno;
