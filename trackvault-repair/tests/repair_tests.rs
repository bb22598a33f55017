use pretty_assertions::assert_eq;
use trackvault_crypto::{
    DataKey, EncryptedBlob, KdfParams, PasswordHashParams, Salt, decrypt, derive_kek, encrypt,
    generate_data_key, hash_password, wrap_data_key,
};
use trackvault_repair::{Outcome, RecordField, RepairError, RepairOptions, repair_user};
use trackvault_storage::{
    AnalysisRow, AttachmentRow, ContentStore, EncryptionRecord, EventRow, MemoryStore,
    StoredValue, UserId, UserRecord, UserStore,
};
use uuid::Uuid;

const EMAIL: &str = "patient@example.com";
const PASSWORD: &str = "correct horse";

fn kdf() -> KdfParams {
    KdfParams::with_iterations(1_000)
}

fn options(dry_run: bool) -> RepairOptions {
    RepairOptions { dry_run, kdf: kdf() }
}

fn cheap_hash(password: &str) -> String {
    let params = PasswordHashParams {
        m_cost_kib: 8,
        t_cost: 1,
        p_cost: 1,
    };
    hash_password(password, &params).unwrap()
}

/// Creates a migrated account and returns its id and data key.
fn account(store: &MemoryStore) -> (UserId, DataKey) {
    let salt = Salt::random();
    let kek = derive_kek(PASSWORD, &salt, &kdf()).unwrap();
    let dek = generate_data_key();
    let record = EncryptionRecord::new(salt, wrap_data_key(&kek, &dek).unwrap());
    let user = UserRecord {
        id: UserId::new(),
        email: EMAIL.into(),
        password_hash: cheap_hash(PASSWORD),
        encryption: Some(record),
        created_at: 0,
    };
    store.create_user(&user).unwrap();
    (user.id, dek)
}

fn seal(dek: &DataKey, text: &str) -> StoredValue {
    StoredValue::Sealed(encrypt(dek, text.as_bytes()).unwrap())
}

fn mangle_csv(text: &str) -> String {
    text.bytes().map(|b| b.to_string()).collect::<Vec<_>>().join(",")
}

fn mangle_object(text: &str) -> String {
    let fields: Vec<String> = text
        .bytes()
        .enumerate()
        .map(|(i, b)| format!("\"{i}\":{b}"))
        .collect();
    format!("{{{}}}", fields.join(","))
}

fn open(dek: &DataKey, value: &StoredValue) -> String {
    let blob: &EncryptedBlob = value.as_sealed().unwrap();
    String::from_utf8(decrypt(dek, blob).unwrap()).unwrap()
}

fn event(user: UserId, details: StoredValue, note: Option<StoredValue>, at: i64) -> EventRow {
    EventRow {
        id: Uuid::new_v4(),
        user_id: user,
        details,
        note,
        created_at: at,
    }
}

#[test]
fn repairs_mangled_values_and_is_idempotent() {
    let store = MemoryStore::new();
    let (user, dek) = account(&store);

    let mangled = event(
        user,
        seal(&dek, &mangle_csv(r#"{"mood":"low"}"#)),
        Some(seal(&dek, &mangle_object("felt tired"))),
        1,
    );
    let healthy = event(user, seal(&dek, r#"{"mood":"ok"}"#), Some(seal(&dek, "fine")), 2);
    store.insert_event(&mangled).unwrap();
    store.insert_event(&healthy).unwrap();
    let analysis = AnalysisRow {
        id: Uuid::new_v4(),
        user_id: user,
        result: seal(&dek, &mangle_object(r#"{"trend":"up"}"#)),
        created_at: 3,
    };
    store.insert_analysis(&analysis).unwrap();

    let report = repair_user(&store, &store, EMAIL, PASSWORD, &options(false)).unwrap();
    assert_eq!(report.scanned(), 5);
    assert_eq!(report.repaired(), 3);
    assert_eq!(report.clean(), 2);
    assert_eq!(
        report.records[0].outcome,
        Outcome::Repaired { shape: "csv_bytes" }
    );
    assert_eq!(report.records[1].field, RecordField::EventNote);
    assert_eq!(
        report.records[1].outcome,
        Outcome::Repaired { shape: "object_bytes" }
    );

    let fixed = store.get_event(&mangled.id).unwrap().unwrap();
    assert_eq!(open(&dek, &fixed.details), r#"{"mood":"low"}"#);
    assert_eq!(open(&dek, fixed.note.as_ref().unwrap()), "felt tired");
    assert_ne!(fixed.details, mangled.details);
    assert_eq!(store.get_event(&healthy.id).unwrap().unwrap(), healthy);
    let fixed_analysis = &store.list_analyses(&user).unwrap()[0];
    assert_eq!(open(&dek, &fixed_analysis.result), r#"{"trend":"up"}"#);

    let second = repair_user(&store, &store, EMAIL, PASSWORD, &options(false)).unwrap();
    assert_eq!(second.repaired(), 0);
    assert_eq!(second.clean(), 5);
}

#[test]
fn dry_run_changes_nothing() {
    let store = MemoryStore::new();
    let (user, dek) = account(&store);
    let mangled = event(user, seal(&dek, "{}"), Some(seal(&dek, "72,105")), 1);
    store.insert_event(&mangled).unwrap();

    let report = repair_user(&store, &store, EMAIL, PASSWORD, &options(true)).unwrap();
    assert!(report.dry_run);
    assert_eq!(report.would_repair(), 1);
    assert_eq!(report.repaired(), 0);
    assert_eq!(store.get_event(&mangled.id).unwrap().unwrap(), mangled);
    assert!(report.summary().contains("would repair 1"));
}

#[test]
fn unrecoverable_and_undecryptable_are_left_alone() {
    let store = MemoryStore::new();
    let (user, dek) = account(&store);

    // "Hi" is not JSON, so a structured field cannot take it.
    let bad_json = event(user, seal(&dek, "72,105"), None, 1);
    let foreign = event(user, seal(&generate_data_key(), "{}"), None, 2);
    store.insert_event(&bad_json).unwrap();
    store.insert_event(&foreign).unwrap();

    let report = repair_user(&store, &store, EMAIL, PASSWORD, &options(false)).unwrap();
    assert_eq!(report.unrecoverable(), 1);
    assert_eq!(report.undecryptable(), 1);
    assert_eq!(report.repaired(), 0);
    assert_eq!(store.get_event(&bad_json.id).unwrap().unwrap(), bad_json);
    assert_eq!(store.get_event(&foreign.id).unwrap().unwrap(), foreign);
}

#[test]
fn plaintext_and_attachments_are_not_scanned() {
    let store = MemoryStore::new();
    let (user, dek) = account(&store);
    let legacy = event(user, StoredValue::Plain(b"72,105".to_vec()), None, 1);
    store.insert_event(&legacy).unwrap();
    store
        .insert_attachment(&AttachmentRow {
            id: Uuid::new_v4(),
            user_id: user,
            event_id: legacy.id,
            filename: "bytes.txt".into(),
            data: seal(&dek, "72,105"),
        })
        .unwrap();

    let report = repair_user(&store, &store, EMAIL, PASSWORD, &options(false)).unwrap();
    assert_eq!(report.scanned(), 0);
    assert_eq!(store.get_event(&legacy.id).unwrap().unwrap(), legacy);
}

#[test]
fn wrong_password_is_rejected() {
    let store = MemoryStore::new();
    account(&store);
    let err = repair_user(&store, &store, EMAIL, "not it", &options(false));
    assert!(matches!(err, Err(RepairError::InvalidCredentials)));

    let err = repair_user(&store, &store, "nobody@example.com", PASSWORD, &options(false));
    assert!(matches!(err, Err(RepairError::InvalidCredentials)));
}

#[test]
fn unmigrated_account_is_reported() {
    let store = MemoryStore::new();
    store
        .create_user(&UserRecord {
            id: UserId::new(),
            email: EMAIL.into(),
            password_hash: cheap_hash(PASSWORD),
            encryption: None,
            created_at: 0,
        })
        .unwrap();

    let err = repair_user(&store, &store, EMAIL, PASSWORD, &options(false));
    assert!(matches!(err, Err(RepairError::NotMigrated)));
}

#[test]
fn mismatched_kdf_cost_fails_to_unwrap() {
    let store = MemoryStore::new();
    account(&store);
    let opts = RepairOptions {
        dry_run: false,
        kdf: KdfParams::with_iterations(999),
    };
    let err = repair_user(&store, &store, EMAIL, PASSWORD, &opts);
    assert!(matches!(err, Err(RepairError::Decryption)));
}

#[test]
fn report_serializes_with_flat_outcomes() {
    let store = MemoryStore::new();
    let (user, dek) = account(&store);
    store
        .insert_event(&event(user, seal(&dek, "{}"), Some(seal(&dek, "72,105")), 1))
        .unwrap();

    let report = repair_user(&store, &store, EMAIL, PASSWORD, &options(true)).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["records"][0]["outcome"], "clean");
    assert_eq!(json["records"][1]["field"], "event_note");
    assert_eq!(json["records"][1]["outcome"], "would_repair");
    assert_eq!(json["records"][1]["shape"], "csv_bytes");
}
