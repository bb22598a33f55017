//! Detection of the known ciphertext-corruption shapes.
//!
//! A historical bug serialized plaintext bytes instead of the text they
//! encoded, so some decrypted values read as one of:
//!
//! - an object of indexed byte values: `{"0":72,"1":105}`
//! - a comma-separated byte list: `72,105`
//!
//! Each shape is a [`Classification`] variant with one detector in
//! [`Classifier`]'s table. Anything no detector claims is `Clean`.

use crate::error::{RepairError, RepairResult};
use regex_lite::Regex;
use serde_json::Value;
use std::borrow::Cow;

/// What a decrypted value turned out to be.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    Clean,
    /// Bytes taken from an `{"0":..,"1":..}` object, in key order.
    MangledObjectBytes(Vec<u8>),
    /// Bytes taken from a `72,105` list, in split order.
    MangledCsvBytes(Vec<u8>),
}

impl Classification {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    /// The reconstructed original bytes, if the value was mangled.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Clean => None,
            Self::MangledObjectBytes(b) | Self::MangledCsvBytes(b) => Some(b),
        }
    }

    /// Stable label for reports and logs.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::MangledObjectBytes(_) => "object_bytes",
            Self::MangledCsvBytes(_) => "csv_bytes",
        }
    }
}

/// How a field's plaintext is interpreted by the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// JSON documents: event details, analysis results.
    Structured,
    /// Free text: event notes.
    Text,
}

/// Outcome of turning a mangled value back into plaintext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recovery {
    Recovered(Vec<u8>),
    Unrecoverable { reason: String },
}

impl Recovery {
    fn unrecoverable(reason: &str) -> Self {
        Self::Unrecoverable {
            reason: reason.to_string(),
        }
    }
}

type Detector = fn(&Classifier, &str) -> Option<Classification>;

/// Detectors in priority order. The first match wins.
const DETECTORS: &[Detector] = &[detect_object_bytes, detect_csv_bytes];

/// Classifies decrypted values against every known corruption shape.
pub struct Classifier {
    csv: Regex,
}

impl Classifier {
    pub fn new() -> RepairResult<Self> {
        let csv = Regex::new(r"^[0-9]{1,3}(?:,[0-9]{1,3})+$")
            .map_err(|e| RepairError::Pattern(e.to_string()))?;
        Ok(Self { csv })
    }

    pub fn classify(&self, decrypted: &[u8]) -> Classification {
        let Ok(text) = std::str::from_utf8(decrypted) else {
            return Classification::Clean;
        };
        DETECTORS
            .iter()
            .find_map(|detect| detect(self, text))
            .unwrap_or(Classification::Clean)
    }
}

fn detect_object_bytes(_: &Classifier, text: &str) -> Option<Classification> {
    if !text.trim_start().starts_with('{') {
        return None;
    }
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) else {
        return None;
    };
    if map.is_empty() {
        return None;
    }

    let mut bytes = Vec::with_capacity(map.len());
    for (index, (key, value)) in map.iter().enumerate() {
        if *key != index.to_string() {
            return None;
        }
        bytes.push(u8::try_from(value.as_u64()?).ok()?);
    }
    Some(Classification::MangledObjectBytes(bytes))
}

fn detect_csv_bytes(classifier: &Classifier, text: &str) -> Option<Classification> {
    // Structured fields stored the list as a JSON string.
    let list = match serde_json::from_str::<Value>(text) {
        Ok(Value::String(inner)) => Cow::Owned(inner),
        _ => Cow::Borrowed(text),
    };
    if !classifier.csv.is_match(&list) {
        return None;
    }
    list.split(',')
        .map(|n| n.parse::<u8>().ok())
        .collect::<Option<Vec<u8>>>()
        .map(Classification::MangledCsvBytes)
}

/// Validates the reconstructed bytes of a mangled value.
///
/// Recovered plaintext must be UTF-8 text without control characters other
/// than tab and line breaks. Structured fields must also parse as JSON.
pub fn recover(classification: &Classification, kind: FieldKind) -> Recovery {
    let Some(bytes) = classification.bytes() else {
        return Recovery::unrecoverable("value is not mangled");
    };
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Recovery::unrecoverable("recovered bytes are not valid UTF-8");
    };
    if text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        return Recovery::unrecoverable("recovered text contains control characters");
    }
    if kind == FieldKind::Structured && serde_json::from_str::<Value>(text).is_err() {
        return Recovery::unrecoverable("recovered value is not valid JSON");
    }
    Recovery::Recovered(bytes.to_vec())
}
