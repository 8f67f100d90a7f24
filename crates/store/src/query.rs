//! Read queries over the capture graph
//!
//! JSON columns are decoded with [`StoredJson::decode`], so a corrupt value
//! reads back as absent instead of failing the whole query.

use crate::codec::StoredJson;
use crate::error::Result;
use crate::migration::MigrationManager;
use crate::resolver;
use crate::search;
use crate::types::{
    AnnotationRow, CaptureRow, ChunkRow, DocumentContext, DocumentRow, EdgeRow, EntityRow, RecentCapture, StoreStats,
    TranscriptSegmentRow,
};

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::trace;

/// Largest page `list_recent_captures` returns
pub const MAX_RECENT_LIMIT: usize = 500;

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<StoredJson> {
    let raw: Option<String> = row.get(idx)?;
    Ok(StoredJson::decode(raw.as_deref()))
}

const DOCUMENT_COLUMNS: &str =
    "document_id, url, canonical_url, title, site, language, published_at, metadata, created_at, updated_at";

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        document_id: row.get(0)?,
        url: row.get(1)?,
        canonical_url: row.get(2)?,
        title: row.get(3)?,
        site: row.get(4)?,
        language: row.get(5)?,
        published_at: row.get(6)?,
        metadata: json_column(row, 7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn capture_from_row(row: &Row<'_>) -> rusqlite::Result<CaptureRow> {
    Ok(CaptureRow {
        capture_id: row.get(0)?,
        document_id: row.get(1)?,
        capture_type: row.get(2)?,
        saved_at: row.get(3)?,
        document_text: row.get(4)?,
        document_text_word_count: row.get(5)?,
        document_text_character_count: row.get(6)?,
        content_hash: row.get(7)?,
        document_text_compressed: json_column(row, 8)?,
        transcript_text: row.get(9)?,
        transcript_segments: json_column(row, 10)?,
        diagnostics: json_column(row, 11)?,
        created_at: row.get(12)?,
    })
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<ChunkRow> {
    Ok(ChunkRow {
        chunk_id: row.get(0)?,
        document_id: row.get(1)?,
        capture_id: row.get(2)?,
        chunk_type: row.get(3)?,
        chunk_index: row.get(4)?,
        start_offset: row.get(5)?,
        end_offset: row.get(6)?,
        text: row.get(7)?,
        comment: row.get(8)?,
        annotation_id: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<EntityRow> {
    Ok(EntityRow {
        entity_id: row.get(0)?,
        entity_type: row.get(1)?,
        name: row.get(2)?,
        properties: json_column(row, 3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<EdgeRow> {
    Ok(EdgeRow {
        edge_id: row.get(0)?,
        from_entity_id: row.get(1)?,
        to_entity_id: row.get(2)?,
        predicate: row.get(3)?,
        properties: json_column(row, 4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Most recent captures first, joined with their document
pub fn list_recent_captures(conn: &Connection, limit: usize, offset: usize) -> Result<Vec<RecentCapture>> {
    let limit = limit.clamp(1, MAX_RECENT_LIMIT) as i64;
    let mut stmt = conn.prepare_cached(
        "SELECT c.capture_id, c.document_id, c.capture_type, c.saved_at, c.document_text_word_count,
                c.document_text_character_count, c.diagnostics, d.url, d.title, d.site
         FROM captures c
         JOIN documents d ON d.document_id = c.document_id
         ORDER BY c.saved_at DESC, c.rowid DESC
         LIMIT ?1 OFFSET ?2",
    )?;
    let captures = stmt
        .query_map(params![limit, offset as i64], |row| {
            Ok(RecentCapture {
                capture_id: row.get(0)?,
                document_id: row.get(1)?,
                capture_type: row.get(2)?,
                saved_at: row.get(3)?,
                document_text_word_count: row.get(4)?,
                document_text_character_count: row.get(5)?,
                diagnostics: json_column(row, 6)?,
                url: row.get(7)?,
                title: row.get(8)?,
                site: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(captures)
}

fn document_by_id(conn: &Connection, document_id: &str) -> Result<Option<DocumentRow>> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_id = ?1");
    Ok(conn.query_row(&sql, [document_id], document_from_row).optional()?)
}

/// A document with every capture, chunk, annotation, segment and graph row tied to it
///
/// Returns `None` for an unknown id.
pub fn get_document_context(conn: &Connection, document_id: &str) -> Result<Option<DocumentContext>> {
    let Some(document) = document_by_id(conn, document_id)? else {
        trace!(document_id, "Document not found");
        return Ok(None);
    };

    let captures = conn
        .prepare(
            "SELECT capture_id, document_id, capture_type, saved_at, document_text, document_text_word_count,
                    document_text_character_count, content_hash, document_text_compressed, transcript_text,
                    transcript_segments, diagnostics, created_at
             FROM captures WHERE document_id = ?1
             ORDER BY saved_at DESC, rowid DESC",
        )?
        .query_map([document_id], capture_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let chunks = conn
        .prepare(
            "SELECT chunk_id, document_id, capture_id, chunk_type, chunk_index, start_offset, end_offset, text,
                    comment, annotation_id, created_at
             FROM chunks WHERE document_id = ?1
             ORDER BY chunk_index, created_at, chunk_id",
        )?
        .query_map([document_id], chunk_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let annotations = conn
        .prepare(
            "SELECT annotation_id, document_id, capture_id, annotation_type, selected_text, comment, created_at,
                    start_offset, end_offset
             FROM annotations WHERE document_id = ?1
             ORDER BY capture_id, start_offset, annotation_id",
        )?
        .query_map([document_id], |row| {
            Ok(AnnotationRow {
                annotation_id: row.get(0)?,
                document_id: row.get(1)?,
                capture_id: row.get(2)?,
                annotation_type: row.get(3)?,
                selected_text: row.get(4)?,
                comment: row.get(5)?,
                created_at: row.get(6)?,
                start_offset: row.get(7)?,
                end_offset: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let transcript_segments = conn
        .prepare(
            "SELECT segment_id, document_id, capture_id, segment_index, timestamp_text, text
             FROM transcript_segments WHERE document_id = ?1
             ORDER BY capture_id, segment_index",
        )?
        .query_map([document_id], |row| {
            Ok(TranscriptSegmentRow {
                segment_id: row.get(0)?,
                document_id: row.get(1)?,
                capture_id: row.get(2)?,
                segment_index: row.get(3)?,
                timestamp_text: row.get(4)?,
                text: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let entities = conn
        .prepare(
            "SELECT DISTINCT e.entity_id, e.entity_type, e.name, e.properties, e.created_at, e.updated_at
             FROM entities e
             JOIN provenance p ON p.subject_type = 'entity' AND p.subject_id = e.entity_id
             JOIN chunks c ON c.chunk_id = p.chunk_id
             WHERE c.document_id = ?1
             ORDER BY e.entity_type, e.entity_id",
        )?
        .query_map([document_id], entity_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let edges = conn
        .prepare(
            "SELECT DISTINCT g.edge_id, g.from_entity_id, g.to_entity_id, g.predicate, g.properties, g.created_at,
                    g.updated_at
             FROM edges g
             JOIN provenance p ON p.subject_type = 'edge' AND p.subject_id = g.edge_id
             JOIN chunks c ON c.chunk_id = p.chunk_id
             WHERE c.document_id = ?1
             ORDER BY g.predicate, g.edge_id",
        )?
        .query_map([document_id], edge_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(DocumentContext { document, captures, chunks, annotations, transcript_segments, entities, edges }))
}

/// Look up a document by URL (normalized, as given, or canonical)
pub fn get_document_by_url(conn: &Connection, url: &str) -> Result<Option<DocumentRow>> {
    match resolver::lookup_document_id(conn, url)? {
        Some(document_id) => document_by_id(conn, &document_id),
        None => Ok(None),
    }
}

fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count as usize)
}

/// Row counts per table plus schema state
pub fn store_stats(conn: &Connection) -> Result<StoreStats> {
    Ok(StoreStats {
        schema_version: MigrationManager::get_current_version(conn)?,
        fts_enabled: search::fts_available(conn)?,
        documents: count_rows(conn, "documents")?,
        captures: count_rows(conn, "captures")?,
        chunks: count_rows(conn, "chunks")?,
        annotations: count_rows(conn, "annotations")?,
        transcript_segments: count_rows(conn, "transcript_segments")?,
        entities: count_rows(conn, "entities")?,
        entity_aliases: count_rows(conn, "entity_aliases")?,
        edges: count_rows(conn, "edges")?,
        provenance: count_rows(conn, "provenance")?,
    })
}
