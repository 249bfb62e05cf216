//! Migration of a WordPress film archive into a relational Postgres schema.
//!
//! Items are read from a [`source::Source`] as flat key/value rows, decoded by [`codec`],
//! [`grammar`] and [`aggregate`], reconciled across their PRIMARY and IMPORT tracks by
//! [`reconcile`], turned into target rows by the [`catalog`] transforms, and written by the
//! [`engine`] to a [`sink::Sink`] with idempotent upserts. Identifier mappings and cursors are
//! checkpointed in a [`store::CheckpointStore`] so interrupted runs resume where they stopped.

pub mod aggregate;
pub mod catalog;
pub mod codec;
pub mod concurrency;
pub mod diagnostics;
pub mod engine;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod grammar;
pub mod hierarchy;
pub mod identifiers;
mod macros;
pub mod migrations;
pub mod policy;
pub mod reconcile;
pub mod sink;
pub mod source;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
