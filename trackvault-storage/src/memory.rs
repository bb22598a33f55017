//! In-memory store for tests and embedding.
//!
//! Behaves like [`crate::DuckStore`] and additionally supports a
//! [`FaultPlan`] so callers can exercise partial-failure paths.

use crate::error::{StorageError, StorageResult};
use crate::store::{ContentStore, UserStore};
use crate::types::{
    AnalysisRow, AttachmentRow, EncryptionRecord, EventRow, PurgeCounts, StoredValue, UserId,
    UserRecord,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use uuid::Uuid;

/// Failures to inject into subsequent calls.
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    /// Allow this many content `update_*` calls, then fail the rest.
    pub content_updates_before_failure: Option<usize>,
    /// Fail `set_encryption_record` and `update_credentials`.
    pub fail_credential_writes: bool,
    /// Fail `purge_sealed_content`.
    pub fail_purge: bool,
}

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, UserRecord>,
    events: HashMap<Uuid, EventRow>,
    attachments: HashMap<Uuid, AttachmentRow>,
    analyses: HashMap<Uuid, AnalysisRow>,
}

/// Thread-safe in-memory implementation of both store traits.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    faults: Mutex<FaultPlan>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active fault plan.
    pub fn set_faults(&self, plan: FaultPlan) {
        *self.faults.lock() = plan;
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = FaultPlan::default();
    }

    fn check_content_update(&self) -> StorageResult<()> {
        let mut faults = self.faults.lock();
        match faults.content_updates_before_failure.as_mut() {
            Some(0) => Err(StorageError::Injected("content update".into())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_credential_write(&self) -> StorageResult<()> {
        if self.faults.lock().fail_credential_writes {
            return Err(StorageError::Injected("credential write".into()));
        }
        Ok(())
    }
}

impl UserStore for MemoryStore {
    fn create_user(&self, user: &UserRecord) -> StorageResult<()> {
        let mut tables = self.tables.write();
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StorageError::Conflict(format!("email {} already registered", user.email)));
        }
        if tables.users.contains_key(&user.id) {
            return Err(StorageError::Conflict(format!("user {} already exists", user.id)));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    fn get_user(&self, id: &UserId) -> StorageResult<Option<UserRecord>> {
        Ok(self.tables.read().users.get(id).cloned())
    }

    fn find_user_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>> {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    fn set_encryption_record(&self, id: &UserId, record: &EncryptionRecord) -> StorageResult<()> {
        self.check_credential_write()?;
        let mut tables = self.tables.write();
        let user = tables
            .users
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("user {id}")))?;
        if user.encryption.is_some() {
            return Err(StorageError::Conflict(format!("user {id} already has a data key")));
        }
        user.encryption = Some(record.clone());
        Ok(())
    }

    fn update_credentials(
        &self,
        id: &UserId,
        password_hash: &str,
        record: &EncryptionRecord,
    ) -> StorageResult<()> {
        self.check_credential_write()?;
        let mut tables = self.tables.write();
        let user = tables
            .users
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("user {id}")))?;
        user.password_hash = password_hash.to_string();
        user.encryption = Some(record.clone());
        Ok(())
    }

    fn delete_user(&self, id: &UserId) -> StorageResult<()> {
        self.tables
            .write()
            .users
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("user {id}")))
    }
}

impl ContentStore for MemoryStore {
    fn insert_event(&self, event: &EventRow) -> StorageResult<()> {
        let mut tables = self.tables.write();
        if tables.events.contains_key(&event.id) {
            return Err(StorageError::Conflict(format!("event {}", event.id)));
        }
        tables.events.insert(event.id, event.clone());
        Ok(())
    }

    fn get_event(&self, id: &Uuid) -> StorageResult<Option<EventRow>> {
        Ok(self.tables.read().events.get(id).cloned())
    }

    fn list_events(&self, user: &UserId) -> StorageResult<Vec<EventRow>> {
        let tables = self.tables.read();
        let mut events: Vec<EventRow> = tables
            .events
            .values()
            .filter(|e| e.user_id == *user)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    fn update_event(&self, event: &EventRow) -> StorageResult<()> {
        self.check_content_update()?;
        let mut tables = self.tables.write();
        let existing = tables
            .events
            .get_mut(&event.id)
            .ok_or_else(|| StorageError::NotFound(format!("event {}", event.id)))?;
        existing.details = event.details.clone();
        existing.note = event.note.clone();
        Ok(())
    }

    fn insert_attachment(&self, attachment: &AttachmentRow) -> StorageResult<()> {
        let mut tables = self.tables.write();
        if tables.attachments.contains_key(&attachment.id) {
            return Err(StorageError::Conflict(format!("attachment {}", attachment.id)));
        }
        tables.attachments.insert(attachment.id, attachment.clone());
        Ok(())
    }

    fn list_attachments(&self, user: &UserId) -> StorageResult<Vec<AttachmentRow>> {
        let tables = self.tables.read();
        let mut rows: Vec<AttachmentRow> = tables
            .attachments
            .values()
            .filter(|a| a.user_id == *user)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.id);
        Ok(rows)
    }

    fn update_attachment(&self, attachment: &AttachmentRow) -> StorageResult<()> {
        self.check_content_update()?;
        let mut tables = self.tables.write();
        let existing = tables
            .attachments
            .get_mut(&attachment.id)
            .ok_or_else(|| StorageError::NotFound(format!("attachment {}", attachment.id)))?;
        existing.data = attachment.data.clone();
        Ok(())
    }

    fn insert_analysis(&self, analysis: &AnalysisRow) -> StorageResult<()> {
        let mut tables = self.tables.write();
        if tables.analyses.contains_key(&analysis.id) {
            return Err(StorageError::Conflict(format!("analysis {}", analysis.id)));
        }
        tables.analyses.insert(analysis.id, analysis.clone());
        Ok(())
    }

    fn list_analyses(&self, user: &UserId) -> StorageResult<Vec<AnalysisRow>> {
        let tables = self.tables.read();
        let mut rows: Vec<AnalysisRow> = tables
            .analyses
            .values()
            .filter(|a| a.user_id == *user)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn update_analysis(&self, analysis: &AnalysisRow) -> StorageResult<()> {
        self.check_content_update()?;
        let mut tables = self.tables.write();
        let existing = tables
            .analyses
            .get_mut(&analysis.id)
            .ok_or_else(|| StorageError::NotFound(format!("analysis {}", analysis.id)))?;
        existing.result = analysis.result.clone();
        Ok(())
    }

    fn count_plaintext(&self, user: &UserId) -> StorageResult<usize> {
        let tables = self.tables.read();
        let events: usize = tables
            .events
            .values()
            .filter(|e| e.user_id == *user)
            .map(|e| {
                usize::from(e.details.is_plain())
                    + usize::from(e.note.as_ref().is_some_and(StoredValue::is_plain))
            })
            .sum();
        let attachments = tables
            .attachments
            .values()
            .filter(|a| a.user_id == *user && a.data.is_plain())
            .count();
        let analyses = tables
            .analyses
            .values()
            .filter(|a| a.user_id == *user && a.result.is_plain())
            .count();
        Ok(events + attachments + analyses)
    }

    fn purge_sealed_content(&self, user: &UserId) -> StorageResult<PurgeCounts> {
        if self.faults.lock().fail_purge {
            return Err(StorageError::Injected("purge".into()));
        }
        let mut tables = self.tables.write();
        let mut counts = PurgeCounts::default();

        let doomed_events: Vec<Uuid> = tables
            .events
            .values()
            .filter(|e| e.user_id == *user && e.has_sealed())
            .map(|e| e.id)
            .collect();
        for id in &doomed_events {
            tables.events.remove(id);
        }
        counts.events = doomed_events.len();

        let before = tables.attachments.len();
        tables.attachments.retain(|_, a| {
            !(a.user_id == *user && (a.data.is_sealed() || doomed_events.contains(&a.event_id)))
        });
        counts.attachments = before - tables.attachments.len();

        let before = tables.analyses.len();
        tables
            .analyses
            .retain(|_, a| !(a.user_id == *user && a.result.is_sealed()));
        counts.analyses = before - tables.analyses.len();

        Ok(counts)
    }

    fn delete_all_content(&self, user: &UserId) -> StorageResult<PurgeCounts> {
        let mut tables = self.tables.write();
        let mut counts = PurgeCounts::default();

        let before = tables.attachments.len();
        tables.attachments.retain(|_, a| a.user_id != *user);
        counts.attachments = before - tables.attachments.len();

        let before = tables.events.len();
        tables.events.retain(|_, e| e.user_id != *user);
        counts.events = before - tables.events.len();

        let before = tables.analyses.len();
        tables.analyses.retain(|_, a| a.user_id != *user);
        counts.analyses = before - tables.analyses.len();

        Ok(counts)
    }
}
