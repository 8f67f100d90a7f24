//! Capture write path
//!
//! One save resolves the document, clears everything previously derived from
//! the capture id, and rebuilds capture, chunks, annotations, transcript
//! segments, search rows and graph rows inside a single transaction.

use crate::chunker::split_document_into_chunks;
use crate::codec;
use crate::error::Result;
use crate::graph::{self, EvidenceChunk, GraphAnnotation, GraphContext};
use crate::ids;
use crate::linker::{self, LinkContext};
use crate::options::StoreOptions;
use crate::resolver::{self, host_of, normalize_url};
use crate::search;
use crate::types::{ChunkKind, SaveOutcome};

use rusqlite::{Connection, params};
use tracing::{debug, trace};
use webclip_core::CaptureRecord;

/// A chunk row about to be written
#[derive(Debug, Clone)]
pub struct NewChunk<'a> {
    pub chunk_id: &'a str,
    pub document_id: &'a str,
    pub capture_id: &'a str,
    pub kind: ChunkKind,
    pub chunk_index: usize,
    pub offsets: Option<(usize, usize)>,
    pub text: &'a str,
    pub comment: Option<&'a str>,
    pub annotation_id: Option<&'a str>,
    pub created_at: &'a str,
}

pub fn insert_chunk(conn: &Connection, chunk: &NewChunk<'_>) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO chunks (chunk_id, document_id, capture_id, chunk_type, chunk_index, start_offset,
                                        end_offset, text, comment, annotation_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    stmt.execute(params![
        chunk.chunk_id,
        chunk.document_id,
        chunk.capture_id,
        chunk.kind.as_str(),
        chunk.chunk_index as i64,
        chunk.offsets.map(|(start, _)| start as i64),
        chunk.offsets.map(|(_, end)| end as i64),
        chunk.text,
        chunk.comment,
        chunk.annotation_id,
        chunk.created_at,
    ])?;
    Ok(())
}

/// Delete every row derived from a capture id
///
/// Shared entities (document, site, capture type) and the shared
/// `hosts_document` edge are kept; only their provenance into this
/// capture's chunks goes.
pub fn clear_capture_derived(conn: &Connection, capture_id: &str) -> Result<()> {
    if search::fts_available(conn)? {
        search::remove_capture_from_index(conn, capture_id)?;
    }

    conn.execute(
        "DELETE FROM provenance
         WHERE capture_id = ?1 OR chunk_id IN (SELECT chunk_id FROM chunks WHERE capture_id = ?1)",
        [capture_id],
    )?;
    conn.execute("DELETE FROM edges WHERE capture_id = ?1", [capture_id])?;
    conn.execute(
        "DELETE FROM entity_aliases WHERE entity_id IN (SELECT entity_id FROM entities WHERE capture_id = ?1)",
        [capture_id],
    )?;
    conn.execute("DELETE FROM entities WHERE capture_id = ?1", [capture_id])?;
    conn.execute("DELETE FROM annotations WHERE capture_id = ?1", [capture_id])?;
    conn.execute("DELETE FROM transcript_segments WHERE capture_id = ?1", [capture_id])?;
    conn.execute("DELETE FROM chunks WHERE capture_id = ?1", [capture_id])?;

    trace!(capture_id, "Cleared derived rows");
    Ok(())
}

/// Clear a capture's derived rows and write its capture row
pub fn insert_capture(conn: &Connection, record: &CaptureRecord, document_id: &str) -> Result<()> {
    clear_capture_derived(conn, &record.id)?;

    let segments = record.effective_segments();
    let segments = if segments.is_empty() { None } else { Some(&segments) };

    conn.execute(
        "INSERT OR REPLACE INTO captures (capture_id, document_id, capture_type, saved_at, document_text,
                                          document_text_word_count, document_text_character_count, content_hash,
                                          document_text_compressed, transcript_text, transcript_segments,
                                          diagnostics, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.id,
            document_id,
            record.capture_type.trim(),
            record.saved_at,
            record.content.document_text,
            record.word_count().map(|n| n as i64),
            record.character_count().map(|n| n as i64),
            record.content.content_hash,
            codec::encode(record.content.document_text_compressed.as_ref())?,
            record.content.transcript_text,
            codec::encode(segments)?,
            codec::encode(record.diagnostics.as_ref())?,
            crate::now_timestamp(),
        ],
    )?;
    Ok(())
}

/// Write one record inside an open transaction
///
/// Callers own the transaction; the schema migration reuses this for legacy rows.
pub(crate) fn write_capture(conn: &Connection, record: &CaptureRecord, options: &StoreOptions) -> Result<SaveOutcome> {
    let document_id = resolver::upsert_document(conn, record)?;
    insert_capture(conn, record, &document_id)?;

    let capture_id = record.id.as_str();
    let mut next_index = 0;
    let mut evidence = None;

    if let Some(text) = record.document_text() {
        for (seq, chunk) in split_document_into_chunks(text, options.max_chunk_chars).into_iter().enumerate() {
            let chunk_id = ids::chunk_id(capture_id, ChunkKind::Document.as_str(), seq);
            insert_chunk(
                conn,
                &NewChunk {
                    chunk_id: &chunk_id,
                    document_id: &document_id,
                    capture_id,
                    kind: ChunkKind::Document,
                    chunk_index: next_index,
                    offsets: Some((chunk.start_offset, chunk.end_offset)),
                    text: &chunk.text,
                    comment: None,
                    annotation_id: None,
                    created_at: &record.saved_at,
                },
            )?;
            next_index += 1;
            evidence.get_or_insert(EvidenceChunk { chunk_id, text: chunk.text });
        }
    }
    let document_chunks = next_index;

    let ctx = LinkContext {
        document_id: &document_id,
        capture_id,
        saved_at: &record.saved_at,
        document_text: record.document_text(),
        transcript_text: record.transcript_text(),
    };
    let annotations = linker::link_annotations(conn, &ctx, &record.content.annotations, &mut next_index)?;
    let segments = linker::link_transcript(conn, &ctx, &record.effective_segments(), &mut next_index)?;

    if search::fts_available(conn)? {
        search::index_capture_chunks(conn, capture_id)?;
    }

    if evidence.is_none() {
        evidence = annotations
            .first()
            .map(|a| EvidenceChunk { chunk_id: a.chunk_id.clone(), text: a.chunk_text.clone() })
            .or_else(|| {
                segments.first().map(|s| EvidenceChunk { chunk_id: s.chunk_id.clone(), text: s.text.clone() })
            });
    }

    let normalized = normalize_url(&record.source.url);
    let (url, title, site): (String, Option<String>, Option<String>) = conn.query_row(
        "SELECT url, title, site FROM documents WHERE document_id = ?1",
        [&document_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    let graph_ctx = GraphContext {
        document_id: document_id.clone(),
        host: host_of(&url),
        raw_url: Some(record.source.url.trim().to_string()).filter(|raw| *raw != url),
        canonical_url: record.canonical_url().map(normalize_url),
        url,
        title,
        site,
        capture_id: capture_id.to_string(),
        capture_type: record.capture_type.trim().to_string(),
        saved_at: record.saved_at.clone(),
        evidence,
        annotations: annotations
            .iter()
            .map(|a| GraphAnnotation {
                annotation_id: a.annotation_id.clone(),
                annotation_type: a.kind.as_str().to_string(),
                selected_text: a.selected_text.clone(),
                comment: a.comment.clone(),
                chunk: EvidenceChunk { chunk_id: a.chunk_id.clone(), text: a.chunk_text.clone() },
            })
            .collect(),
    };
    let counts = graph::populate_capture_graph(conn, &graph_ctx, options.evidence_excerpt_chars)?;

    debug!(
        capture_id,
        document_id = %document_id,
        normalized_url = %normalized,
        document_chunks,
        chunks = next_index,
        annotations = annotations.len(),
        segments = segments.len(),
        "Wrote capture"
    );

    Ok(SaveOutcome {
        document_id,
        capture_id: capture_id.to_string(),
        chunk_count: next_index,
        annotation_count: annotations.len(),
        segment_count: segments.len(),
        entity_count: counts.entities,
        edge_count: counts.edges,
    })
}

/// Persist one capture record atomically
///
/// Re-saving a capture id replaces the capture and everything derived from
/// it. Any failure rolls the whole save back.
pub fn save_capture(conn: &mut Connection, record: &CaptureRecord, options: &StoreOptions) -> Result<SaveOutcome> {
    record.validate()?;

    let tx = conn.transaction()?;
    let outcome = write_capture(&tx, record, options)?;
    tx.commit()?;
    Ok(outcome)
}
