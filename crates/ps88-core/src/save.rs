//! The value a script persists across rebuilds and restarts.

use rhai::{Blob, Dynamic, EvalAltResult, Position};
use serde::{Deserialize, Serialize};

/// Opaque script-owned persistent value.
///
/// Serialized as `null`, `{"type":"bytes","data":[..]}` or
/// `{"type":"text","data":".."}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<StoredBlob>", into = "Option<StoredBlob>")]
pub enum SaveBlob {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Text(String),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
enum StoredBlob {
    Bytes(Vec<u8>),
    #[serde(alias = "string")]
    Text(String),
}

impl From<Option<StoredBlob>> for SaveBlob {
    fn from(stored: Option<StoredBlob>) -> Self {
        match stored {
            None => SaveBlob::Empty,
            Some(StoredBlob::Bytes(bytes)) => SaveBlob::Bytes(bytes),
            Some(StoredBlob::Text(text)) => SaveBlob::Text(text),
        }
    }
}

impl From<SaveBlob> for Option<StoredBlob> {
    fn from(blob: SaveBlob) -> Self {
        match blob {
            SaveBlob::Empty => None,
            SaveBlob::Bytes(bytes) => Some(StoredBlob::Bytes(bytes)),
            SaveBlob::Text(text) => Some(StoredBlob::Text(text)),
        }
    }
}

impl SaveBlob {
    pub fn is_empty(&self) -> bool {
        matches!(self, SaveBlob::Empty)
    }

    /// Convert a script value. Only blobs, strings and `()` are accepted.
    pub fn from_dynamic(value: Dynamic) -> Result<Self, Box<EvalAltResult>> {
        if value.is_unit() {
            return Ok(SaveBlob::Empty);
        }
        if value.is_string() {
            let text = value.into_string().map_err(|actual| mismatch(actual))?;
            return Ok(SaveBlob::Text(text));
        }
        if value.is::<Blob>() {
            let bytes = value.into_blob().map_err(|actual| mismatch(actual))?;
            return Ok(SaveBlob::Bytes(bytes));
        }
        Err(mismatch(value.type_name()))
    }

    /// The script-side view: `Blob`, string, or `()`.
    pub fn to_dynamic(&self) -> Dynamic {
        match self {
            SaveBlob::Empty => Dynamic::UNIT,
            SaveBlob::Bytes(bytes) => Dynamic::from_blob(bytes.clone()),
            SaveBlob::Text(text) => Dynamic::from(text.clone()),
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn mismatch(actual: &str) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorMismatchDataType(
        "blob, string or ()".to_string(),
        actual.to_string(),
        Position::NONE,
    ))
}
