//! # Outpost Core
//!
//! Client-resident persistence core for the Outpost photo client.
//!
//! This crate provides:
//! - A transactional key-value store with snapshots, backed by a
//!   write-ahead log and checkpoint image
//! - Protocol-version migrations run at open
//! - The FSCK maintenance pass and its integrity checks
//! - A crash-safe local operation-id allocator
//! - Identity, preference and system-message storage
//! - A notification hub for progress and state changes
//! - [`AppContext`], which wires all of the above together
//!
//! ## Example
//!
//! ```rust
//! use outpost_core::{AppContext, HeadlessPlatform, ServerConfig};
//! use std::sync::Arc;
//!
//! let dir = tempfile::tempdir()?;
//! let ctx = AppContext::open(
//!     dir.path(),
//!     ServerConfig::default(),
//!     Arc::new(HeadlessPlatform::new()),
//!     false,
//!     &mut |message| println!("{message}"),
//! )?;
//!
//! assert_eq!(ctx.next_local_operation_id()?, 1);
//! ctx.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod app;
mod checkpoint;
mod config;
mod database;
mod dir;
mod error;
mod identity;
pub mod keys;
pub mod maintenance;
pub mod migration;
pub mod notify;
mod op_id;
mod platform;
mod settings;
mod store;
mod types;
pub mod version;
pub mod wal;

pub use app::AppContext;
pub use checkpoint::CheckpointImage;
pub use config::{Config, ServerConfig};
pub use database::Database;
pub use dir::{AppDirs, DatabaseDir};
pub use error::{CoreError, CoreResult};
pub use identity::{AuthMetadata, IdentityStore};
pub use maintenance::{MaintenanceEngine, MaintenanceReport, MaintenanceTrigger};
pub use migration::{Migration, MigrationContext, MigrationManager, MigrationRunResult};
pub use notify::{CallbackSet, NotificationHub, SubscriptionToken};
pub use op_id::OpIdAllocator;
pub use platform::{HeadlessPlatform, InitAction, Platform};
pub use settings::{
    Preferences, RegistrationVersion, ServerSettings, Settings, Severity, SystemMessage,
};
pub use store::{DbRead, RecoveryStats, Snapshot, Transaction, TransactionState};
pub use types::{SequenceNumber, TransactionId, WriteOp};
pub use version::ProtocolVersion;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
