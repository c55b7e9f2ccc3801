//! # Outpost Storage
//!
//! Byte-store backends for the Outpost client database.
//!
//! Backends are **opaque append-only byte stores**: the write-ahead log and
//! the checkpoint image are framed by `outpost_core`, never by a backend.
//!
//! - [`InMemoryBackend`] - ephemeral stores and tests; clones share bytes so a
//!   test can "restart" a database over the same contents
//! - [`FileBackend`] - persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use outpost_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
