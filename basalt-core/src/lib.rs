//! # Basalt Core
//!
//! Data model for the basalt graph store.
//!
//! This crate provides:
//! - Core types: [`TermId`], [`Term`], [`TermSpec`], [`Statement`], [`Pattern`]
//! - Transaction isolation levels ([`IsolationLevel`])
//! - The shared error type ([`Error`])
//!
//! ## Design principles
//!
//! 1. **Pure data**: no I/O, no locks, no background work
//! 2. **Cheap clones**: term components are `Arc<str>`, identities are `u32`
//! 3. **Canonical forms**: one stored representation per equivalence class;
//!    the engine crate interns against these types

pub mod error;
pub mod isolation;
pub mod statement;
pub mod term;
pub mod vocab;

pub use error::{Error, Result};
pub use isolation::IsolationLevel;
pub use statement::{ContextFilter, Pattern, Statement};
pub use term::{split_iri, Term, TermId, TermSpec};
