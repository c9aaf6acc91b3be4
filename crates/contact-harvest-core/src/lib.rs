//! # Contact Harvest Core
//!
//! I/O-free engine for contact-harvest: the record model, the tolerant field
//! decoding used on remote payloads, normalization, the paginated cursor
//! walk, batched detail resolution, and idempotent reconciliation into a
//! [`store::DirectoryStore`].
//!
//! The remote directory and the relational store are reached only through
//! the [`client::DirectoryClient`] and [`store::DirectoryStore`] traits, so
//! everything here runs against in-memory doubles in tests.
//!
//! ```text
//! walker ──▶ resolver ──▶ normalize ──▶ reconcile ──▶ DirectoryStore
//!   ▲           ▲
//!   └───────────┴──── DirectoryClient
//! ```

pub mod client;
pub mod context;
pub mod field;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod resolver;
pub mod store;
pub mod walker;
