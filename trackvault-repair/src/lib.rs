//! Offline repair of mangled TrackVault ciphertext.
//!
//! An earlier release sealed some values after serializing their raw bytes
//! as JSON rather than as text. Decrypting such a value yields an indexed
//! byte object or a comma-separated byte list instead of the original
//! plaintext. [`repair_user`] finds those values for one account, rebuilds
//! the original text, and seals it again under a fresh nonce.
//!
//! The tool never guesses: values that do not decrypt, do not match a known
//! shape, or do not validate after recovery are reported and left alone.

pub mod classify;
mod error;
mod repair;

pub use classify::{Classification, Classifier, FieldKind, Recovery, recover};
pub use error::{RepairError, RepairResult};
pub use repair::{Outcome, RecordField, RecordOutcome, RepairOptions, RepairReport, repair_user};
