//! Durable storage primitives for governance state.
//!
//! Two shapes cover every persisted store: an append-only journal of
//! newline-delimited JSON records (audit and rejection logs) and a JSON
//! document rewritten whole and atomically (the tool catalog).

#![warn(missing_docs, clippy::pedantic)]

pub mod document;
mod error;
pub mod journal;

pub use document::JsonDocument;
pub use error::{JournalError, JournalResult};
pub use journal::{FileJournal, Journal};
