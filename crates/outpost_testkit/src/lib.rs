//! # Outpost Testkit
//!
//! Test utilities for Outpost.
//!
//! This crate provides:
//! - Fixtures for throwaway databases and app contexts
//! - A storage backend that fails or tears writes on demand
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use outpost_testkit::prelude::*;
//!
//! let db = TestDatabase::memory();
//! db.transaction(|txn| txn.put(b"k".to_vec(), b"v".to_vec())).unwrap();
//! let db = db.restart();
//! assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
