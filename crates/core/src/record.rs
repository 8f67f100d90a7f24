//! Capture record input model
//!
//! A [`CaptureRecord`] is the normalized value produced by the capture layer
//! (selection, full document, annotation or transcript capture) and the only
//! input accepted by the store. Field names follow the camelCase wire format
//! emitted by the capture layer.

use crate::error::{Error, RecordError, Result};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// One persisted capture event as handed over by the capture layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    /// Stable, caller-supplied capture id
    pub id: String,
    /// Kind of capture (e.g. `selection`, `document`, `transcript`)
    pub capture_type: String,
    /// ISO-8601 timestamp of the save
    pub saved_at: String,
    /// Where the content came from
    pub source: CaptureSource,
    /// Captured content
    #[serde(default)]
    pub content: CaptureContent,
    /// Opaque diagnostics from the capture layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Value>,
}

/// Source descriptor of a capture
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSource {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    /// Opaque page metadata; `canonicalUrl` is read from here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Captured content of a record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureContent {
    #[serde(default)]
    pub document_text: Option<String>,
    #[serde(default)]
    pub document_text_word_count: Option<u64>,
    #[serde(default)]
    pub document_text_character_count: Option<u64>,
    #[serde(default)]
    pub content_hash: Option<String>,
    /// Descriptor of a compressed copy of the document text, stored verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_text_compressed: Option<Value>,
    #[serde(default)]
    pub annotations: Vec<AnnotationInput>,
    #[serde(default)]
    pub transcript_text: Option<String>,
    #[serde(default)]
    pub transcript_segments: Vec<TranscriptSegmentInput>,
}

/// A highlight or note attached to a capture
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationInput {
    #[serde(default, alias = "selected_text", alias = "text", deserialize_with = "lenient::text")]
    pub selected_text: String,
    #[serde(default, alias = "note", deserialize_with = "lenient::optional_text")]
    pub comment: Option<String>,
    #[serde(default, alias = "created_at", deserialize_with = "lenient::optional_text")]
    pub created_at: Option<String>,
}

impl AnnotationInput {
    /// The trimmed comment, if it has any content
    pub fn comment_text(&self) -> Option<&str> {
        self.comment.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    /// True when neither the selection nor the comment carries text
    pub fn is_empty(&self) -> bool {
        self.selected_text.trim().is_empty() && self.comment_text().is_none()
    }
}

/// One line of a video transcript
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegmentInput {
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub text: String,
}

/// Scalar fields the capture layer emits as either strings or numbers
///
/// Epoch-millisecond `createdAt` values and numeric transcript timestamps
/// become their decimal text; `null` reads as absent.
mod lenient {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use serde_json::Value;

    fn scalar<E: Error>(value: Value) -> Result<Option<String>, E> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(E::custom(format!("expected a string or number, found {other}"))),
        }
    }

    pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(scalar(Value::deserialize(deserializer)?)?.unwrap_or_default())
    }

    pub fn optional_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        scalar(Value::deserialize(deserializer)?)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordBatch {
    Many(Vec<CaptureRecord>),
    One(Box<CaptureRecord>),
}

impl CaptureRecord {
    /// Reject records the store cannot key
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(RecordError::MissingId.into());
        }
        if self.source.url.trim().is_empty() {
            return Err(RecordError::missing_url(&self.id).into());
        }
        if self.capture_type.trim().is_empty() {
            return Err(RecordError::missing_capture_type(&self.id).into());
        }
        Ok(())
    }

    /// Document text, if present and not blank
    pub fn document_text(&self) -> Option<&str> {
        self.content.document_text.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Transcript text, if present and not blank
    pub fn transcript_text(&self) -> Option<&str> {
        self.content.transcript_text.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Word count as supplied, otherwise computed from the document text
    pub fn word_count(&self) -> Option<u64> {
        self.content
            .document_text_word_count
            .or_else(|| self.document_text().map(|t| t.split_whitespace().count() as u64))
    }

    /// Character count as supplied, otherwise computed from the document text
    pub fn character_count(&self) -> Option<u64> {
        self.content
            .document_text_character_count
            .or_else(|| self.document_text().map(|t| t.chars().count() as u64))
    }

    /// Canonical URL advertised in the page metadata
    pub fn canonical_url(&self) -> Option<&str> {
        let metadata = self.source.metadata.as_ref()?.as_object()?;
        ["canonicalUrl", "canonical_url"]
            .iter()
            .filter_map(|key| metadata.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|url| !url.is_empty())
    }

    /// Transcript segments, derived from transcript lines when none were captured
    pub fn effective_segments(&self) -> Vec<TranscriptSegmentInput> {
        if !self.content.transcript_segments.is_empty() {
            return self.content.transcript_segments.clone();
        }

        self.transcript_text()
            .map(|text| {
                text.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(|line| TranscriptSegmentInput { timestamp: None, text: line.to_string() })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parse one record or an array of records from JSON
pub fn parse_records(json: &str) -> Result<Vec<CaptureRecord>> {
    let batch: RecordBatch = serde_json::from_str(json).map_err(|e| Error::Parse(e.to_string()))?;
    Ok(match batch {
        RecordBatch::Many(records) => records,
        RecordBatch::One(record) => vec![*record],
    })
}

/// Read capture records from a JSON file
pub fn read_records(path: &Path) -> Result<Vec<CaptureRecord>> {
    let content = std::fs::read_to_string(path)?;
    parse_records(&content).map_err(|e| {
        RecordError::Unreadable { path: path.to_path_buf(), reason: e.to_string() }.into()
    })
}
