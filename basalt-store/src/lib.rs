//! # Basalt Store
//!
//! An in-memory, optionally file-persistent quad store with MVCC
//! snapshots, transactional sinks, and deferred batched file sync.
//!
//! This crate provides:
//! - [`MemoryGraphStore`]: the store facade (lifecycle, persistence,
//!   change events)
//! - [`Connection`]: the per-caller transaction state machine
//! - [`StatementSource`] / [`Dataset`] / [`Sink`]: the MVCC engine's
//!   read/write handles
//! - [`StatementCursor`] and [`QueueCursor`]: lazy, lock-owning iteration
//!
//! ## Concurrency model
//!
//! Shared state lives behind one store-wide read/write lock. Readers share
//! it; a flush takes it exclusively, advances the snapshot clock, and
//! publishes new visibility bounds. Datasets and sinks are not internally
//! thread-safe — each belongs to one thread; the store itself may be
//! shared freely.

pub mod config;
pub mod connection;
pub mod cursor;
mod index;
mod locks;
pub mod persist;
mod snapshot;
pub mod source;
mod statements;
pub mod store;
pub mod terms;

pub use basalt_core::{
    ContextFilter, Error, IsolationLevel, Pattern, Result, Statement, Term, TermId, TermSpec,
};
pub use config::StoreConfig;
pub use connection::{Connection, ConnectionState};
pub use cursor::{queue_cursor, QueueCursor, QueueFeeder, StatementCursor};
pub use source::{CommitSummary, Dataset, Sink, StatementSource};
pub use store::{ChangeEvent, MemoryGraphStore};
pub use terms::TermRegistry;
