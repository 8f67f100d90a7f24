//! Row types returned by the store

use crate::codec::StoredJson;

use serde::{Deserialize, Serialize};

/// Chunk variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Slice of the document body
    Document,
    /// Annotation without a comment
    Highlight,
    /// Annotation with a comment
    Note,
    /// One transcript line
    TranscriptSegment,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Document => "document",
            ChunkKind::Highlight => "highlight",
            ChunkKind::Note => "note",
            ChunkKind::TranscriptSegment => "transcript_segment",
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one save
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub document_id: String,
    pub capture_id: String,
    pub chunk_count: usize,
    pub annotation_count: usize,
    pub segment_count: usize,
    pub entity_count: usize,
    pub edge_count: usize,
}

/// A stored document
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRow {
    pub document_id: String,
    pub url: String,
    pub canonical_url: Option<String>,
    pub title: Option<String>,
    pub site: Option<String>,
    pub language: Option<String>,
    pub published_at: Option<String>,
    pub metadata: StoredJson,
    pub created_at: String,
    pub updated_at: Option<String>,
}

/// A stored capture
#[derive(Debug, Clone, Serialize)]
pub struct CaptureRow {
    pub capture_id: String,
    pub document_id: String,
    pub capture_type: String,
    pub saved_at: String,
    pub document_text: Option<String>,
    pub document_text_word_count: Option<i64>,
    pub document_text_character_count: Option<i64>,
    pub content_hash: Option<String>,
    pub document_text_compressed: StoredJson,
    pub transcript_text: Option<String>,
    pub transcript_segments: StoredJson,
    pub diagnostics: StoredJson,
    pub created_at: String,
}

/// A stored chunk
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRow {
    pub chunk_id: String,
    pub document_id: String,
    pub capture_id: Option<String>,
    pub chunk_type: String,
    pub chunk_index: Option<i64>,
    pub start_offset: Option<i64>,
    pub end_offset: Option<i64>,
    pub text: String,
    pub comment: Option<String>,
    pub annotation_id: Option<String>,
    pub created_at: String,
}

/// A stored highlight or note
#[derive(Debug, Clone, Serialize)]
pub struct AnnotationRow {
    pub annotation_id: String,
    pub document_id: String,
    pub capture_id: String,
    pub annotation_type: String,
    pub selected_text: String,
    pub comment: Option<String>,
    pub created_at: Option<String>,
    pub start_offset: Option<i64>,
    pub end_offset: Option<i64>,
}

/// A stored transcript line
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptSegmentRow {
    pub segment_id: String,
    pub document_id: String,
    pub capture_id: String,
    pub segment_index: i64,
    pub timestamp_text: Option<String>,
    pub text: String,
}

/// A knowledge-graph node
#[derive(Debug, Clone, Serialize)]
pub struct EntityRow {
    pub entity_id: String,
    pub entity_type: String,
    pub name: String,
    pub properties: StoredJson,
    pub created_at: String,
    pub updated_at: String,
}

/// A knowledge-graph edge
#[derive(Debug, Clone, Serialize)]
pub struct EdgeRow {
    pub edge_id: String,
    pub from_entity_id: String,
    pub to_entity_id: String,
    pub predicate: String,
    pub properties: StoredJson,
    pub created_at: String,
    pub updated_at: String,
}

/// One search result; both the ranked and the substring path return this shape
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub capture_id: Option<String>,
    pub chunk_type: String,
    pub chunk_index: Option<i64>,
    pub start_offset: Option<i64>,
    pub end_offset: Option<i64>,
    pub text: String,
    pub comment: Option<String>,
    pub created_at: String,
    pub url: String,
    pub title: Option<String>,
    pub site: Option<String>,
    /// BM25 score from the full-text path (lower = better); `None` from the substring path
    pub score: Option<f64>,
}

/// Which path answered a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    FullText,
    Substring,
}

/// A capture listing entry joined with its document
#[derive(Debug, Clone, Serialize)]
pub struct RecentCapture {
    pub capture_id: String,
    pub document_id: String,
    pub capture_type: String,
    pub saved_at: String,
    pub document_text_word_count: Option<i64>,
    pub document_text_character_count: Option<i64>,
    pub diagnostics: StoredJson,
    pub url: String,
    pub title: Option<String>,
    pub site: Option<String>,
}

/// A document with everything derived from it
#[derive(Debug, Clone, Serialize)]
pub struct DocumentContext {
    pub document: DocumentRow,
    pub captures: Vec<CaptureRow>,
    pub chunks: Vec<ChunkRow>,
    pub annotations: Vec<AnnotationRow>,
    pub transcript_segments: Vec<TranscriptSegmentRow>,
    pub entities: Vec<EntityRow>,
    pub edges: Vec<EdgeRow>,
}

/// One schema upgrade record kept in `meta`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationEntry {
    pub id: String,
    pub at: String,
    pub schema_version: i64,
    pub details: serde_json::Value,
}

/// Schema state as recorded in `meta`
#[derive(Debug, Clone, Serialize)]
pub struct SchemaStatus {
    pub version: i64,
    pub name: Option<String>,
    pub fts_enabled: bool,
    pub history: Vec<MigrationEntry>,
}

/// Store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub schema_version: i64,
    pub fts_enabled: bool,
    pub documents: usize,
    pub captures: usize,
    pub chunks: usize,
    pub annotations: usize,
    pub transcript_segments: usize,
    pub entities: usize,
    pub entity_aliases: usize,
    pub edges: usize,
    pub provenance: usize,
}
