//! SQLite schema for the capture store
//!
//! Tables are created with `IF NOT EXISTS` and grown with additive
//! `ALTER TABLE ... ADD COLUMN`; nothing here drops or rewrites data.

/// Current schema version
pub const SCHEMA_VERSION: i64 = 2;

/// Schema name recorded in `meta`
pub const SCHEMA_NAME: &str = "webclip.capture-graph";

/// Maximum number of entries kept in the migration history
pub const MIGRATION_HISTORY_CAP: usize = 64;

pub const META_SCHEMA_VERSION: &str = "db_schema_version";
pub const META_SCHEMA_NAME: &str = "db_schema_name";
pub const META_FTS_ENABLED: &str = "fts_enabled";
pub const META_MIGRATION_HISTORY: &str = "migration_history";

/// Name the flat pre-normalization capture table is archived under
pub const LEGACY_ARCHIVE_TABLE: &str = "legacy_captures_archive";

/// Columns whose presence (with no `document_id`) marks a flat legacy `captures` table
pub const LEGACY_SIGNATURE_COLUMN: &str = "url";

/// SQL to create every current table
pub const TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT
);

CREATE TABLE IF NOT EXISTS documents (
    document_id TEXT PRIMARY KEY,
    url TEXT NOT NULL UNIQUE,
    canonical_url TEXT,
    title TEXT,
    site TEXT,
    language TEXT,
    published_at TEXT,
    metadata TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT
);

CREATE TABLE IF NOT EXISTS captures (
    capture_id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    capture_type TEXT NOT NULL,
    saved_at TEXT NOT NULL,
    document_text TEXT,
    document_text_word_count INTEGER,
    document_text_character_count INTEGER,
    content_hash TEXT,
    document_text_compressed TEXT,
    transcript_text TEXT,
    transcript_segments TEXT,
    diagnostics TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    capture_id TEXT,
    chunk_type TEXT NOT NULL,
    chunk_index INTEGER,
    start_offset INTEGER,
    end_offset INTEGER,
    text TEXT NOT NULL,
    comment TEXT,
    annotation_id TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS annotations (
    annotation_id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    capture_id TEXT NOT NULL,
    annotation_type TEXT NOT NULL,
    selected_text TEXT NOT NULL,
    comment TEXT,
    created_at TEXT,
    start_offset INTEGER,
    end_offset INTEGER,
    chunk_id TEXT
);

CREATE TABLE IF NOT EXISTS transcript_segments (
    segment_id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    capture_id TEXT NOT NULL,
    segment_index INTEGER NOT NULL,
    timestamp_text TEXT,
    text TEXT NOT NULL,
    chunk_id TEXT,
    UNIQUE(capture_id, segment_index)
);

CREATE TABLE IF NOT EXISTS entities (
    entity_id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    name TEXT NOT NULL,
    capture_id TEXT,
    properties TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entity_aliases (
    entity_id TEXT NOT NULL,
    alias TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (entity_id, alias)
);

CREATE TABLE IF NOT EXISTS edges (
    edge_id TEXT PRIMARY KEY,
    from_entity_id TEXT NOT NULL,
    to_entity_id TEXT NOT NULL,
    predicate TEXT NOT NULL,
    capture_id TEXT,
    properties TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(from_entity_id, to_entity_id, predicate)
);

CREATE TABLE IF NOT EXISTS provenance (
    provenance_id TEXT PRIMARY KEY,
    subject_type TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    document_id TEXT,
    capture_id TEXT,
    evidence_text TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(subject_type, subject_id, chunk_id)
);
"#;

/// Columns added after the first normalized layout, as `(table, column, declaration)`
///
/// Declarations must be valid for `ALTER TABLE ADD COLUMN` (no NOT NULL without a default).
pub const COLUMN_ADDITIONS: &[(&str, &str, &str)] = &[
    ("documents", "canonical_url", "TEXT"),
    ("documents", "site", "TEXT"),
    ("documents", "language", "TEXT"),
    ("documents", "published_at", "TEXT"),
    ("documents", "metadata", "TEXT"),
    ("documents", "updated_at", "TEXT"),
    ("captures", "document_text", "TEXT"),
    ("captures", "document_text_word_count", "INTEGER"),
    ("captures", "document_text_character_count", "INTEGER"),
    ("captures", "content_hash", "TEXT"),
    ("captures", "document_text_compressed", "TEXT"),
    ("captures", "transcript_text", "TEXT"),
    ("captures", "transcript_segments", "TEXT"),
    ("captures", "diagnostics", "TEXT"),
    ("captures", "created_at", "TEXT NOT NULL DEFAULT ''"),
    ("chunks", "capture_id", "TEXT"),
    ("chunks", "chunk_index", "INTEGER"),
    ("chunks", "start_offset", "INTEGER"),
    ("chunks", "end_offset", "INTEGER"),
    ("chunks", "comment", "TEXT"),
    ("chunks", "annotation_id", "TEXT"),
    ("chunks", "created_at", "TEXT NOT NULL DEFAULT ''"),
    ("entities", "capture_id", "TEXT"),
    ("edges", "capture_id", "TEXT"),
    ("provenance", "document_id", "TEXT"),
    ("provenance", "capture_id", "TEXT"),
    ("provenance", "evidence_text", "TEXT"),
];

/// Indexes, created after columns exist
pub const INDEXES_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_documents_canonical_url ON documents(canonical_url);
CREATE INDEX IF NOT EXISTS idx_captures_document ON captures(document_id, saved_at);
CREATE INDEX IF NOT EXISTS idx_captures_saved_at ON captures(saved_at);
CREATE INDEX IF NOT EXISTS idx_chunks_capture ON chunks(capture_id, chunk_index);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_annotations_capture ON annotations(capture_id);
CREATE INDEX IF NOT EXISTS idx_annotations_document ON annotations(document_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_annotations_dedup ON annotations(
    capture_id, annotation_type, selected_text, IFNULL(comment, ''), IFNULL(created_at, '')
);
CREATE INDEX IF NOT EXISTS idx_transcript_segments_document ON transcript_segments(document_id);
CREATE INDEX IF NOT EXISTS idx_entities_capture ON entities(capture_id);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);
CREATE INDEX IF NOT EXISTS idx_edges_capture ON edges(capture_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_entity_id);
CREATE INDEX IF NOT EXISTS idx_provenance_chunk ON provenance(chunk_id);
CREATE INDEX IF NOT EXISTS idx_provenance_capture ON provenance(capture_id);
"#;

/// SQL to create the FTS5 table for chunk search
///
/// Standalone (not external-content): rows are written and removed explicitly
/// alongside the chunk rows they mirror, keyed by `chunk_id`.
pub const CHUNKS_FTS_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    chunk_id UNINDEXED,
    capture_id UNINDEXED,
    text,
    comment,
    tokenize='porter unicode61 remove_diacritics 2'
);
"#;

/// Every table the engine owns, for stats and tests
pub const TABLE_NAMES: &[&str] = &[
    "meta",
    "documents",
    "captures",
    "chunks",
    "annotations",
    "transcript_segments",
    "entities",
    "entity_aliases",
    "edges",
    "provenance",
];
