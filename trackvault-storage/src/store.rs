//! Storage traits consumed by the key lifecycle and the repair tool.
//!
//! Both traits are synchronous and object-safe; callers hold them as
//! `Arc<dyn UserStore>` / `Arc<dyn ContentStore>`. Every `update_*` call
//! replaces a single row and is atomic at that granularity.

use crate::error::StorageResult;
use crate::types::{
    AnalysisRow, AttachmentRow, EncryptionRecord, EventRow, PurgeCounts, UserId, UserRecord,
};
use uuid::Uuid;

/// Account rows and their encryption records.
pub trait UserStore: Send + Sync {
    /// Inserts a new account. Fails with `Conflict` if the email is taken.
    fn create_user(&self, user: &UserRecord) -> StorageResult<()>;

    fn get_user(&self, id: &UserId) -> StorageResult<Option<UserRecord>>;

    /// Looks up by normalized email.
    fn find_user_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>>;

    /// Writes all three encryption columns at once, only if the user has no
    /// record yet. Fails with `Conflict` if one is already present, so two
    /// racing first logins cannot both install a data key.
    fn set_encryption_record(&self, id: &UserId, record: &EncryptionRecord) -> StorageResult<()>;

    /// Replaces the password hash and encryption record together.
    fn update_credentials(
        &self,
        id: &UserId,
        password_hash: &str,
        record: &EncryptionRecord,
    ) -> StorageResult<()>;

    fn delete_user(&self, id: &UserId) -> StorageResult<()>;
}

/// Events, attachments, and analysis results owned by users.
pub trait ContentStore: Send + Sync {
    fn insert_event(&self, event: &EventRow) -> StorageResult<()>;

    fn get_event(&self, id: &Uuid) -> StorageResult<Option<EventRow>>;

    /// All events for a user, oldest first.
    fn list_events(&self, user: &UserId) -> StorageResult<Vec<EventRow>>;

    /// Replaces `details` and `note` of an existing event.
    fn update_event(&self, event: &EventRow) -> StorageResult<()>;

    fn insert_attachment(&self, attachment: &AttachmentRow) -> StorageResult<()>;

    fn list_attachments(&self, user: &UserId) -> StorageResult<Vec<AttachmentRow>>;

    /// Replaces the payload of an existing attachment.
    fn update_attachment(&self, attachment: &AttachmentRow) -> StorageResult<()>;

    fn insert_analysis(&self, analysis: &AnalysisRow) -> StorageResult<()>;

    fn list_analyses(&self, user: &UserId) -> StorageResult<Vec<AnalysisRow>>;

    /// Replaces the result of an existing analysis row.
    fn update_analysis(&self, analysis: &AnalysisRow) -> StorageResult<()>;

    /// Number of protected values still stored as plaintext.
    fn count_plaintext(&self, user: &UserId) -> StorageResult<usize>;

    /// Deletes every row holding encrypted content: events with any sealed
    /// field (and all their attachments), sealed attachments, and sealed
    /// analysis results. Plaintext legacy rows are kept.
    fn purge_sealed_content(&self, user: &UserId) -> StorageResult<PurgeCounts>;

    /// Deletes all content owned by the user.
    fn delete_all_content(&self, user: &UserId) -> StorageResult<PurgeCounts>;
}
