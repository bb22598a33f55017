//! Persistence layer for TrackVault.
//!
//! Stores accounts with their encryption records, and the user content
//! that the vault protects: events (structured details plus a free-text
//! note), binary attachments, and cached analysis results.
//!
//! # Architecture
//!
//! - [`UserStore`] and [`ContentStore`] are the seams the key lifecycle and
//!   repair tool depend on; they never see key material.
//! - [`DuckStore`] persists to DuckDB; [`MemoryStore`] keeps everything in
//!   process and supports fault injection for tests.
//! - Each protected value is a [`StoredValue`]: `Plain` for legacy rows
//!   written before encryption, `Sealed` for encrypted blobs.

mod duck;
mod error;
mod memory;
mod store;
mod types;

pub use duck::DuckStore;
pub use error::{StorageError, StorageResult};
pub use memory::{FaultPlan, MemoryStore};
pub use store::{ContentStore, UserStore};
pub use types::{
    AnalysisRow, AttachmentRow, EncryptionRecord, EventRow, PurgeCounts, StoredValue, UserId,
    UserRecord, now_millis,
};
