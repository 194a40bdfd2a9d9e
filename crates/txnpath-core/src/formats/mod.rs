//! # Storage Formats
//!
//! Byte encodings of [`GraphSnapshot`](crate::export::GraphSnapshot)s.
//! File I/O stays in the driver; everything here is a pure transformation.

pub mod persistence;

pub use persistence::{PersistenceHeader, snapshot_from_bytes, snapshot_to_bytes};
