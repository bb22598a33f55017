//! Per-user repair pass over sealed content.

use crate::classify::{Classification, Classifier, FieldKind, Recovery, recover};
use crate::error::{RepairError, RepairResult};
use serde::Serialize;
use tracing::{debug, info, warn};
use trackvault_crypto::{
    CryptoError, DataKey, EncryptedBlob, KdfParams, decrypt, derive_kek, encrypt, unwrap_data_key,
    verify_password,
};
use trackvault_storage::{ContentStore, StoredValue, UserId, UserStore};
use uuid::Uuid;
use zeroize::Zeroizing;

#[derive(Clone, Debug, Default)]
pub struct RepairOptions {
    /// Report what would change without writing anything.
    pub dry_run: bool,
    /// Must match the iteration count the account's key was wrapped with.
    pub kdf: KdfParams,
}

/// Which protected column a record outcome refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    EventDetails,
    EventNote,
    AnalysisResult,
}

impl RecordField {
    fn kind(self) -> FieldKind {
        match self {
            Self::EventDetails | Self::AnalysisResult => FieldKind::Structured,
            Self::EventNote => FieldKind::Text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Clean,
    Repaired { shape: &'static str },
    WouldRepair { shape: &'static str },
    Unrecoverable { reason: String },
    Undecryptable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub record_id: Uuid,
    pub field: RecordField,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub user_id: UserId,
    pub dry_run: bool,
    pub records: Vec<RecordOutcome>,
}

impl RepairReport {
    pub fn scanned(&self) -> usize {
        self.records.len()
    }

    pub fn clean(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Clean))
    }

    pub fn repaired(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Repaired { .. }))
    }

    pub fn would_repair(&self) -> usize {
        self.count(|o| matches!(o, Outcome::WouldRepair { .. }))
    }

    pub fn unrecoverable(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Unrecoverable { .. }))
    }

    pub fn undecryptable(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Undecryptable))
    }

    /// One-line human-readable totals.
    pub fn summary(&self) -> String {
        let verb = if self.dry_run { "would repair" } else { "repaired" };
        let fixed = if self.dry_run { self.would_repair() } else { self.repaired() };
        format!(
            "user {}: scanned {}, clean {}, {verb} {fixed}, unrecoverable {}, undecryptable {}",
            self.user_id,
            self.scanned(),
            self.clean(),
            self.unrecoverable(),
            self.undecryptable()
        )
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Scans every sealed event and analysis value owned by `email` and
/// re-encrypts the ones matching a known corruption shape.
///
/// Attachments are raw binary and never scanned. Plaintext values left by
/// an unfinished migration are skipped. Running it twice makes no further
/// changes.
pub fn repair_user(
    users: &dyn UserStore,
    content: &dyn ContentStore,
    email: &str,
    password: &str,
    options: &RepairOptions,
) -> RepairResult<RepairReport> {
    let email = email.trim().to_lowercase();
    let user = users
        .find_user_by_email(&email)?
        .ok_or(RepairError::InvalidCredentials)?;
    if !verify_password(password, &user.password_hash)? {
        return Err(RepairError::InvalidCredentials);
    }
    let record = user.encryption.ok_or(RepairError::NotMigrated)?;

    let kek = derive_kek(password, &record.salt, &options.kdf)?;
    let dek = unwrap_data_key(&kek, &record.wrapped_data_key, &record.wrap_nonce).map_err(
        |e| match e {
            CryptoError::DecryptionFailed => RepairError::Decryption,
            other => RepairError::Crypto(other),
        },
    )?;

    let pass = RepairPass {
        classifier: Classifier::new()?,
        dek,
        dry_run: options.dry_run,
    };
    let mut records = Vec::new();

    for mut event in content.list_events(&user.id)? {
        let mut changed = false;

        if let Some(result) = pass.inspect(&event.details, RecordField::EventDetails)? {
            records.push(result.outcome(event.id, RecordField::EventDetails));
            if let Some(blob) = result.sealed {
                event.details = StoredValue::Sealed(blob);
                changed = true;
            }
        }
        if let Some(note) = event.note.as_ref() {
            if let Some(result) = pass.inspect(note, RecordField::EventNote)? {
                records.push(result.outcome(event.id, RecordField::EventNote));
                if let Some(blob) = result.sealed {
                    event.note = Some(StoredValue::Sealed(blob));
                    changed = true;
                }
            }
        }

        if changed {
            content.update_event(&event)?;
        }
    }

    for mut analysis in content.list_analyses(&user.id)? {
        if let Some(result) = pass.inspect(&analysis.result, RecordField::AnalysisResult)? {
            let outcome = result.outcome(analysis.id, RecordField::AnalysisResult);
            if let Some(blob) = result.sealed {
                analysis.result = StoredValue::Sealed(blob);
                content.update_analysis(&analysis)?;
            }
            records.push(outcome);
        }
    }

    let report = RepairReport {
        user_id: user.id,
        dry_run: options.dry_run,
        records,
    };
    info!("{}", report.summary());
    Ok(report)
}

struct RepairPass {
    classifier: Classifier,
    dek: DataKey,
    dry_run: bool,
}

struct Inspected {
    outcome: Outcome,
    /// Replacement ciphertext, set only when the value should be rewritten.
    sealed: Option<EncryptedBlob>,
}

impl Inspected {
    fn outcome(&self, record_id: Uuid, field: RecordField) -> RecordOutcome {
        RecordOutcome {
            record_id,
            field,
            outcome: self.outcome.clone(),
        }
    }

    fn unchanged(outcome: Outcome) -> Self {
        Self {
            outcome,
            sealed: None,
        }
    }
}

impl RepairPass {
    /// Returns `None` for plaintext values, which are not repairable here.
    fn inspect(&self, value: &StoredValue, field: RecordField) -> RepairResult<Option<Inspected>> {
        let Some(blob) = value.as_sealed() else {
            debug!("skipping plaintext {field:?}");
            return Ok(None);
        };

        let plaintext = match decrypt(&self.dek, blob) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(_) => {
                warn!("{field:?} value failed to decrypt; leaving it alone");
                return Ok(Some(Inspected::unchanged(Outcome::Undecryptable)));
            }
        };

        let classification = self.classifier.classify(&plaintext);
        if classification.is_clean() {
            return Ok(Some(Inspected::unchanged(Outcome::Clean)));
        }
        let shape = classification.shape();

        let recovered = match recover(&classification, field.kind()) {
            Recovery::Recovered(bytes) => Zeroizing::new(bytes),
            Recovery::Unrecoverable { reason } => {
                warn!("{field:?} value has {shape} shape but is unrecoverable: {reason}");
                return Ok(Some(Inspected::unchanged(Outcome::Unrecoverable { reason })));
            }
        };
        if self.classifier.classify(&recovered) != Classification::Clean {
            let reason = "recovered value is itself mangled".to_string();
            warn!("{field:?} value has {shape} shape but is unrecoverable: {reason}");
            return Ok(Some(Inspected::unchanged(Outcome::Unrecoverable { reason })));
        }

        if self.dry_run {
            return Ok(Some(Inspected::unchanged(Outcome::WouldRepair { shape })));
        }
        Ok(Some(Inspected {
            outcome: Outcome::Repaired { shape },
            sealed: Some(encrypt(&self.dek, &recovered)?),
        }))
    }
}
