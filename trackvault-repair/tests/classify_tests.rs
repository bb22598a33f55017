use pretty_assertions::assert_eq;
use trackvault_repair::{Classification, Classifier, FieldKind, Recovery, recover};

fn classify(text: &str) -> Classification {
    Classifier::new().unwrap().classify(text.as_bytes())
}

#[test]
fn object_bytes_recover_text() {
    let c = classify(r#"{"0":72,"1":105}"#);
    assert_eq!(c, Classification::MangledObjectBytes(b"Hi".to_vec()));
    assert_eq!(recover(&c, FieldKind::Text), Recovery::Recovered(b"Hi".to_vec()));
}

#[test]
fn csv_bytes_recover_text() {
    let c = classify("72,105");
    assert_eq!(c, Classification::MangledCsvBytes(b"Hi".to_vec()));
    assert_eq!(recover(&c, FieldKind::Text), Recovery::Recovered(b"Hi".to_vec()));
}

#[test]
fn csv_inside_json_string_is_detected() {
    assert_eq!(classify(r#""72,105""#), Classification::MangledCsvBytes(b"Hi".to_vec()));
}

#[test]
fn mangled_json_document_recovers_as_structured() {
    let original = r#"{"mood":"low"}"#;
    let mangled: String = original
        .bytes()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let c = classify(&mangled);
    assert_eq!(c.shape(), "csv_bytes");
    assert_eq!(
        recover(&c, FieldKind::Structured),
        Recovery::Recovered(original.as_bytes().to_vec())
    );
}

#[test]
fn readable_values_are_clean() {
    for text in [
        "felt tired",
        r#"{"mood":"low","sleep":7}"#,
        "{}",
        "[72,105]",
        "72",
        "72, 105",
        r#"{"1":72,"0":105}"#,
        r#"{"0":72,"1":300}"#,
        r#"{"0":72,"1":"105"}"#,
        "256,1",
    ] {
        assert_eq!(classify(text), Classification::Clean, "{text}");
    }
}

#[test]
fn non_utf8_plaintext_is_clean() {
    let c = Classifier::new().unwrap().classify(&[0xff, 0xfe, 0x00]);
    assert!(c.is_clean());
}

#[test]
fn control_characters_are_unrecoverable() {
    let c = classify("1,2,3");
    assert!(matches!(
        recover(&c, FieldKind::Text),
        Recovery::Unrecoverable { .. }
    ));
}

#[test]
fn whitespace_controls_are_allowed() {
    let c = classify("72,9,105,10");
    assert_eq!(recover(&c, FieldKind::Text), Recovery::Recovered(b"H\ti\n".to_vec()));
}

#[test]
fn invalid_utf8_bytes_are_unrecoverable() {
    let c = classify(r#"{"0":255,"1":254}"#);
    let Recovery::Unrecoverable { reason } = recover(&c, FieldKind::Text) else {
        panic!("expected unrecoverable");
    };
    assert!(reason.contains("UTF-8"));
}

#[test]
fn structured_field_must_reparse_as_json() {
    let c = classify("72,105");
    let Recovery::Unrecoverable { reason } = recover(&c, FieldKind::Structured) else {
        panic!("expected unrecoverable");
    };
    assert!(reason.contains("JSON"));
}

#[test]
fn clean_value_has_nothing_to_recover() {
    assert!(matches!(
        recover(&Classification::Clean, FieldKind::Text),
        Recovery::Unrecoverable { .. }
    ));
}
