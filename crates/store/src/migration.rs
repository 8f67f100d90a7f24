//! Schema bootstrap and migration
//!
//! [`MigrationManager::ensure_schema`] is safe to run on every open. It archives
//! a flat legacy `captures` table, creates missing tables, columns and indexes,
//! sets up full-text search when possible and, only when the stored version is
//! below [`SCHEMA_VERSION`], runs one upgrade step: legacy rows are replayed
//! through the normal write path, rows that predate the derived tables are
//! backfilled, orphaned graph rows are pruned and a history entry is recorded.

use crate::codec::{self, StoredJson};
use crate::error::{Error, Result};
use crate::graph::{self, EvidenceChunk, GraphAnnotation, GraphContext};
use crate::ids;
use crate::linker::{self, LinkContext};
use crate::options::StoreOptions;
use crate::resolver::host_of;
use crate::schema::{
    CHUNKS_FTS_SQL, COLUMN_ADDITIONS, INDEXES_SQL, LEGACY_ARCHIVE_TABLE, LEGACY_SIGNATURE_COLUMN,
    META_FTS_ENABLED, META_MIGRATION_HISTORY, META_SCHEMA_NAME, META_SCHEMA_VERSION, MIGRATION_HISTORY_CAP,
    SCHEMA_NAME, SCHEMA_VERSION, TABLES_SQL,
};
use crate::search;
use crate::types::{MigrationEntry, SchemaStatus};
use crate::writer;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, trace, warn};
use webclip_core::{CaptureContent, CaptureRecord, CaptureSource, TranscriptSegmentInput};

/// What one `ensure_schema` call did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub from_version: i64,
    pub to_version: i64,
    pub upgraded: bool,
    pub fts_enabled: bool,
    pub archived_table: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
struct LegacyCounts {
    migrated: usize,
    skipped: usize,
    skipped_items: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
struct BackfillCounts {
    annotations: usize,
    transcript_captures: usize,
    reindexed_captures: usize,
    graph_captures: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
struct PruneCounts {
    entities: usize,
    edges: usize,
    provenance: usize,
    aliases: usize,
}

/// Manages schema bootstrap and upgrades for the capture store
pub struct MigrationManager;

impl MigrationManager {
    /// Get the stored schema version
    ///
    /// Returns 0 if the meta table or version row doesn't exist.
    pub fn get_current_version(conn: &Connection) -> Result<i64> {
        if !table_exists(conn, "meta")? {
            trace!("meta table does not exist, returning version 0");
            return Ok(0);
        }

        let raw = get_meta(conn, META_SCHEMA_VERSION)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(0),
            Some(value) => value
                .parse::<i64>()
                .map_err(|e| Error::database(format!("Invalid stored schema version {value:?}: {e}"))),
        }
    }

    /// Bring the database up to the current schema
    ///
    /// Runs in one transaction: on error nothing changes. On an up-to-date
    /// database this writes no rows.
    pub fn ensure_schema(conn: &mut Connection, options: &StoreOptions) -> Result<SchemaReport> {
        let from = Self::get_current_version(conn)?;
        debug!("Current schema version: {}, target: {}", from, SCHEMA_VERSION);

        Self::apply(conn, from, options).map_err(|e| match e {
            Error::Migration { .. } => e,
            other => Error::migration(from, SCHEMA_VERSION, other.to_string()),
        })
    }

    fn apply(conn: &mut Connection, from: i64, options: &StoreOptions) -> Result<SchemaReport> {
        let tx = conn.transaction()?;

        let archived_table = archive_legacy_table(&tx)?;
        tx.execute_batch(TABLES_SQL)?;
        add_missing_columns(&tx)?;
        tx.execute_batch(INDEXES_SQL)?;
        let fts_enabled = ensure_fts(&tx, options.enable_fts)?;

        let upgraded = from < SCHEMA_VERSION || archived_table.is_some();
        if upgraded {
            info!("Migrating schema from version {} to {}", from, SCHEMA_VERSION);
            let details = upgrade(&tx, from, options, archived_table.as_deref(), fts_enabled)?;
            let to = from.max(SCHEMA_VERSION);
            set_meta(&tx, META_SCHEMA_VERSION, &to.to_string())?;
            set_meta(&tx, META_SCHEMA_NAME, SCHEMA_NAME)?;
            append_history(&tx, from, to, details)?;
        } else if from > SCHEMA_VERSION {
            warn!("Stored schema version {} is newer than {}, leaving it as is", from, SCHEMA_VERSION);
        } else {
            trace!("Schema is up to date, no migration needed");
        }

        tx.commit()?;
        if upgraded {
            info!("Schema migration complete");
        }

        Ok(SchemaReport {
            from_version: from,
            to_version: from.max(SCHEMA_VERSION),
            upgraded,
            fts_enabled,
            archived_table,
        })
    }

    /// Schema state as recorded in `meta`
    pub fn schema_status(conn: &Connection) -> Result<SchemaStatus> {
        let version = Self::get_current_version(conn)?;
        if version == 0 {
            return Ok(SchemaStatus { version, name: None, fts_enabled: false, history: Vec::new() });
        }

        Ok(SchemaStatus {
            version,
            name: get_meta(conn, META_SCHEMA_NAME)?,
            fts_enabled: search::fts_available(conn)?,
            history: codec::decode_list(get_meta(conn, META_MIGRATION_HISTORY)?.as_deref()),
        })
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
        [name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let columns = stmt.query_map([], |row| row.get::<_, String>(1))?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

pub(crate) fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> =
        conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0)).optional()?;
    Ok(value.flatten())
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Rename a flat legacy `captures` table out of the way
fn archive_legacy_table(conn: &Connection) -> Result<Option<String>> {
    if !table_exists(conn, "captures")? {
        return Ok(None);
    }
    let columns = table_columns(conn, "captures")?;
    let is_legacy = columns.iter().any(|c| c == LEGACY_SIGNATURE_COLUMN) && !columns.iter().any(|c| c == "document_id");
    if !is_legacy {
        return Ok(None);
    }

    let mut name = LEGACY_ARCHIVE_TABLE.to_string();
    let mut suffix = 1;
    while table_exists(conn, &name)? {
        name = format!("{LEGACY_ARCHIVE_TABLE}_{suffix}");
        suffix += 1;
    }

    conn.execute_batch(&format!("ALTER TABLE captures RENAME TO \"{name}\";"))?;
    info!(table = %name, "Archived legacy captures table");
    Ok(Some(name))
}

fn add_missing_columns(conn: &Connection) -> Result<usize> {
    let mut added = 0;
    for (table, column, declaration) in COLUMN_ADDITIONS {
        if table_columns(conn, table)?.iter().any(|c| c == column) {
            continue;
        }
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {declaration};"))?;
        debug!(table, column, "Added column");
        added += 1;
    }
    Ok(added)
}

/// Create the full-text table if enabled; returns whether search can use it
///
/// A failure to create the virtual table is recorded, not raised.
fn ensure_fts(conn: &Connection, enable: bool) -> Result<bool> {
    let previous = get_meta(conn, META_FTS_ENABLED)?;

    let enabled = enable && create_fts_table(conn)?;

    let flag = if enabled { "1" } else { "0" };
    if previous.as_deref() != Some(flag) {
        set_meta(conn, META_FTS_ENABLED, flag)?;
        if enabled && previous.is_some() {
            let indexed = resync_search_index(conn)?;
            debug!(indexed, "Re-enabled full-text search");
        }
    }
    Ok(enabled)
}

fn create_fts_table(conn: &Connection) -> Result<bool> {
    if let Err(err) = conn.execute_batch(CHUNKS_FTS_SQL) {
        warn!(error = %err, "Full-text search unavailable, falling back to substring search");
        return Ok(false);
    }

    // IF NOT EXISTS keeps whatever already holds the name
    let sql: Option<String> = conn
        .query_row("SELECT sql FROM sqlite_master WHERE type='table' AND name='chunks_fts'", [], |row| row.get(0))
        .optional()?
        .flatten();
    let is_fts5 = sql.is_some_and(|sql| sql.to_ascii_lowercase().contains("using fts5"));
    if !is_fts5 {
        warn!("Existing chunks_fts table is not a full-text table, falling back to substring search");
    }
    Ok(is_fts5)
}

fn resync_search_index(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM chunks_fts", [])?;
    let indexed = conn.execute(
        "INSERT INTO chunks_fts (chunk_id, capture_id, text, comment)
         SELECT chunk_id, capture_id, text, comment FROM chunks",
        [],
    )?;
    Ok(indexed)
}

fn upgrade(
    conn: &Connection, from: i64, options: &StoreOptions, archived_table: Option<&str>, fts_enabled: bool,
) -> Result<serde_json::Value> {
    // Archives left over in an already-versioned database were replayed when
    // they were created; only the table archived by this run is new.
    let legacy_tables = if from >= 1 {
        archived_table.map(str::to_string).into_iter().collect()
    } else {
        let mut tables = archive_tables(conn)?;
        if let Some(archived) = archived_table
            && !tables.iter().any(|t| t == archived)
        {
            tables.push(archived.to_string());
        }
        tables
    };

    let mut legacy = LegacyCounts::default();
    for table in &legacy_tables {
        let counts = migrate_legacy_rows(conn, table, options)?;
        legacy.migrated += counts.migrated;
        legacy.skipped += counts.skipped;
        legacy.skipped_items += counts.skipped_items;
    }

    let backfill = BackfillCounts {
        annotations: backfill_annotations(conn)?,
        transcript_captures: backfill_transcripts(conn)?,
        reindexed_captures: reindex_chunks(conn)?,
        graph_captures: backfill_graph(conn, options)?,
    };
    let pruned = prune_orphans(conn)?;

    if fts_enabled {
        resync_search_index(conn)?;
    }

    let kind = if !legacy_tables.is_empty() {
        "legacy_migration"
    } else if from == 0 {
        "bootstrap"
    } else {
        "upgrade"
    };
    debug!(kind, ?legacy, ?backfill, ?pruned, "Upgrade step finished");

    Ok(json!({
        "kind": kind,
        "from_version": from,
        "legacy_tables": legacy_tables,
        "legacy": legacy,
        "backfill": backfill,
        "pruned": pruned,
        "fts_enabled": fts_enabled,
    }))
}

fn append_history(conn: &Connection, from: i64, to: i64, details: serde_json::Value) -> Result<()> {
    let mut history: Vec<MigrationEntry> = codec::decode_list(get_meta(conn, META_MIGRATION_HISTORY)?.as_deref());
    let now = chrono::Utc::now();
    history.push(MigrationEntry {
        id: format!("migrate-v{from}-to-v{to}-{}", now.format("%Y%m%dT%H%M%S%.3fZ")),
        at: crate::now_timestamp(),
        schema_version: to,
        details,
    });
    if history.len() > MIGRATION_HISTORY_CAP {
        let excess = history.len() - MIGRATION_HISTORY_CAP;
        history.drain(..excess);
    }
    set_meta(conn, META_MIGRATION_HISTORY, &serde_json::to_string(&history)?)
}

fn archive_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND (name = ?1 OR name LIKE ?1 || '\\_%' ESCAPE '\\')
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([LEGACY_ARCHIVE_TABLE], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Legacy fields and the column names they may be stored under, in preference order
const LEGACY_FIELDS: &[(&str, &[&str])] = &[
    ("id", &["id", "capture_id"]),
    ("capture_type", &["capture_type", "type", "captureType"]),
    ("saved_at", &["saved_at", "savedAt", "created_at"]),
    ("url", &["url"]),
    ("title", &["title"]),
    ("site", &["site"]),
    ("language", &["language", "lang"]),
    ("published_at", &["published_at", "publishedAt"]),
    ("metadata", &["metadata"]),
    ("document_text", &["document_text", "documentText", "text", "content"]),
    ("annotations", &["annotations"]),
    ("transcript_text", &["transcript_text", "transcriptText"]),
    ("transcript_segments", &["transcript_segments", "transcriptSegments"]),
    ("diagnostics", &["diagnostics"]),
];

fn value_to_text(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Integer(n) => Some(n.to_string()),
        SqlValue::Real(f) => Some(f.to_string()),
        SqlValue::Text(s) => Some(s),
        SqlValue::Blob(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Replay every row of an archived legacy table through the write path
fn migrate_legacy_rows(conn: &Connection, table: &str, options: &StoreOptions) -> Result<LegacyCounts> {
    let columns = table_columns(conn, table)?;
    let select: Vec<String> = LEGACY_FIELDS
        .iter()
        .map(|(field, candidates)| match candidates.iter().find(|c| columns.iter().any(|col| col == *c)) {
            Some(column) => format!("\"{column}\" AS {field}"),
            None => format!("NULL AS {field}"),
        })
        .collect();
    let sql = format!("SELECT rowid, {} FROM \"{table}\" ORDER BY rowid", select.join(", "));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let rowid: i64 = row.get(0)?;
            let mut values = Vec::with_capacity(LEGACY_FIELDS.len());
            for i in 0..LEGACY_FIELDS.len() {
                values.push(value_to_text(row.get::<_, SqlValue>(i + 1)?));
            }
            Ok((rowid, values))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut counts = LegacyCounts::default();
    for (rowid, values) in rows {
        let mut values = values.into_iter();
        let mut next = || values.next().flatten();
        let (id, capture_type, saved_at, url) = (next(), next(), next(), next());
        let (title, site, language, published_at) = (next(), next(), next(), next());
        let (metadata, document_text, annotations) = (next(), next(), next());
        let (transcript_text, transcript_segments, diagnostics) = (next(), next(), next());

        let Some(url) = non_blank(url) else {
            warn!(table, rowid, "Skipping legacy row without a url");
            counts.skipped += 1;
            continue;
        };

        let (annotations, bad_annotations) = codec::decode_items(annotations.as_deref());
        let (segments, bad_segments) = codec::decode_items(transcript_segments.as_deref());
        if bad_annotations + bad_segments > 0 {
            warn!(table, rowid, bad_annotations, bad_segments, "Legacy row has list items that could not be read");
            counts.skipped_items += bad_annotations + bad_segments;
        }

        let record = CaptureRecord {
            id: non_blank(id).unwrap_or_else(|| format!("legacy-{rowid}")),
            capture_type: non_blank(capture_type).unwrap_or_else(|| "legacy".to_string()),
            saved_at: non_blank(saved_at).unwrap_or_else(crate::now_timestamp),
            source: CaptureSource {
                url,
                title: non_blank(title),
                site: non_blank(site),
                language: non_blank(language),
                published_at: non_blank(published_at),
                metadata: StoredJson::decode(metadata.as_deref()).into_value(),
            },
            content: CaptureContent {
                document_text,
                annotations,
                transcript_text,
                transcript_segments: segments,
                ..Default::default()
            },
            diagnostics: StoredJson::decode(diagnostics.as_deref()).into_value(),
        };

        writer::write_capture(conn, &record, options)?;
        counts.migrated += 1;
    }

    info!(
        table,
        migrated = counts.migrated,
        skipped = counts.skipped,
        skipped_items = counts.skipped_items,
        "Migrated legacy captures"
    );
    Ok(counts)
}

/// Give highlight/note chunks that predate the annotations table an annotation row
fn backfill_annotations(conn: &Connection) -> Result<usize> {
    type Row = (String, String, String, String, String, Option<String>, Option<i64>, Option<i64>, Option<String>);

    let mut stmt = conn.prepare(
        "SELECT chunk_id, document_id, capture_id, chunk_type, text, comment, start_offset, end_offset, created_at
         FROM chunks
         WHERE chunk_type IN ('highlight', 'note') AND annotation_id IS NULL AND capture_id IS NOT NULL
         ORDER BY capture_id, rowid",
    )?;
    let rows: Vec<Row> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut inserted = 0;
    for (chunk_id, document_id, capture_id, chunk_type, text, comment, start, end, created_at) in rows {
        let created_at = created_at.filter(|c| !c.is_empty());
        let mut seq: usize = conn.query_row(
            "SELECT COUNT(*) FROM annotations WHERE capture_id = ?1",
            [&capture_id],
            |row| row.get::<_, i64>(0),
        )? as usize;
        while conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM annotations WHERE annotation_id = ?1)",
                [ids::annotation_id(&capture_id, seq)],
                |row| row.get::<_, bool>(0),
            )?
        {
            seq += 1;
        }
        let annotation_id = ids::annotation_id(&capture_id, seq);

        let changed = conn.execute(
            "INSERT OR IGNORE INTO annotations (annotation_id, document_id, capture_id, annotation_type, selected_text,
                                                comment, created_at, start_offset, end_offset, chunk_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![annotation_id, document_id, capture_id, chunk_type, text, comment, created_at, start, end, chunk_id],
        )?;

        let linked_id = if changed > 0 {
            inserted += 1;
            annotation_id
        } else {
            conn.query_row(
                "SELECT annotation_id FROM annotations
                 WHERE capture_id = ?1 AND annotation_type = ?2 AND selected_text = ?3
                   AND IFNULL(comment, '') = IFNULL(?4, '') AND IFNULL(created_at, '') = IFNULL(?5, '')",
                params![capture_id, chunk_type, text, comment, created_at],
                |row| row.get(0),
            )?
        };
        conn.execute("UPDATE chunks SET annotation_id = ?1 WHERE chunk_id = ?2", params![linked_id, chunk_id])?;
    }

    Ok(inserted)
}

/// Build segment rows and transcript chunks from stored segment lists
fn backfill_transcripts(conn: &Connection) -> Result<usize> {
    type Row = (String, String, String, Option<String>, Option<String>);

    let mut stmt = conn.prepare(
        "SELECT c.capture_id, c.document_id, c.saved_at, c.transcript_text, c.transcript_segments
         FROM captures c
         WHERE c.transcript_segments IS NOT NULL
           AND NOT EXISTS (SELECT 1 FROM transcript_segments s WHERE s.capture_id = c.capture_id)
           AND NOT EXISTS (
               SELECT 1 FROM chunks k WHERE k.capture_id = c.capture_id AND k.chunk_type = 'transcript_segment'
           )",
    )?;
    let rows: Vec<Row> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut captures = 0;
    for (capture_id, document_id, saved_at, transcript_text, segments_json) in rows {
        let (segments, skipped): (Vec<TranscriptSegmentInput>, usize) = codec::decode_items(segments_json.as_deref());
        if skipped > 0 {
            warn!(capture_id = %capture_id, skipped, "Stored transcript segments could not all be read");
        }
        if segments.is_empty() {
            continue;
        }

        let mut next_index: usize = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE capture_id = ?1",
            [&capture_id],
            |row| row.get::<_, i64>(0),
        )? as usize;
        let ctx = LinkContext {
            document_id: &document_id,
            capture_id: &capture_id,
            saved_at: &saved_at,
            document_text: None,
            transcript_text: transcript_text.as_deref(),
        };
        linker::link_transcript(conn, &ctx, &segments, &mut next_index)?;
        captures += 1;
    }

    Ok(captures)
}

/// Renumber chunks of captures that have any chunk without a `chunk_index`
fn reindex_chunks(conn: &Connection) -> Result<usize> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT capture_id FROM chunks WHERE capture_id IS NOT NULL AND chunk_index IS NULL")?;
    let captures = stmt.query_map([], |row| row.get::<_, String>(0))?.collect::<std::result::Result<Vec<_>, _>>()?;

    for capture_id in &captures {
        let mut ordered = conn.prepare(
            "SELECT chunk_id FROM chunks WHERE capture_id = ?1
             ORDER BY chunk_index IS NULL, chunk_index, start_offset IS NULL, start_offset, rowid",
        )?;
        let chunk_ids =
            ordered.query_map([capture_id], |row| row.get::<_, String>(0))?.collect::<std::result::Result<Vec<_>, _>>()?;
        for (index, chunk_id) in chunk_ids.iter().enumerate() {
            conn.execute("UPDATE chunks SET chunk_index = ?1 WHERE chunk_id = ?2", params![index as i64, chunk_id])?;
        }
    }

    Ok(captures.len())
}

/// Derive graph rows for captures that have none
fn backfill_graph(conn: &Connection, options: &StoreOptions) -> Result<usize> {
    type Row = (String, String, String, String, String, Option<String>, Option<String>, Option<String>);

    let mut stmt = conn.prepare(
        "SELECT c.capture_id, c.document_id, c.capture_type, c.saved_at, d.url, d.canonical_url, d.title, d.site
         FROM captures c
         JOIN documents d ON d.document_id = c.document_id
         WHERE NOT EXISTS (
             SELECT 1 FROM entities e WHERE e.entity_type = 'capture' AND e.capture_id = c.capture_id
         )
         ORDER BY c.saved_at, c.capture_id",
    )?;
    let rows: Vec<Row> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (capture_id, document_id, capture_type, saved_at, url, canonical_url, title, site) in &rows {
        let evidence = conn
            .query_row(
                "SELECT chunk_id, text FROM chunks WHERE capture_id = ?1
                 ORDER BY chunk_type != 'document', chunk_index, rowid LIMIT 1",
                [capture_id],
                |row| Ok(EvidenceChunk { chunk_id: row.get(0)?, text: row.get(1)? }),
            )
            .optional()?;

        let mut annotation_stmt = conn.prepare(
            "SELECT a.annotation_id, a.annotation_type, a.selected_text, a.comment, k.chunk_id, k.text
             FROM annotations a
             JOIN chunks k ON k.chunk_id = a.chunk_id
             WHERE a.capture_id = ?1
             ORDER BY k.chunk_index, a.annotation_id",
        )?;
        let annotations = annotation_stmt
            .query_map([capture_id], |row| {
                Ok(GraphAnnotation {
                    annotation_id: row.get(0)?,
                    annotation_type: row.get(1)?,
                    selected_text: row.get(2)?,
                    comment: row.get(3)?,
                    chunk: EvidenceChunk { chunk_id: row.get(4)?, text: row.get(5)? },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let ctx = GraphContext {
            document_id: document_id.clone(),
            url: url.clone(),
            raw_url: None,
            canonical_url: canonical_url.clone(),
            title: title.clone(),
            site: site.clone(),
            host: host_of(url),
            capture_id: capture_id.clone(),
            capture_type: capture_type.clone(),
            saved_at: saved_at.clone(),
            evidence,
            annotations,
        };
        graph::populate_capture_graph(conn, &ctx, options.evidence_excerpt_chars)?;
    }

    Ok(rows.len())
}

/// Delete graph rows that point at rows which no longer exist
fn prune_orphans(conn: &Connection) -> Result<PruneCounts> {
    let entities = conn.execute(
        "DELETE FROM entities
         WHERE capture_id IS NOT NULL AND capture_id NOT IN (SELECT capture_id FROM captures)",
        [],
    )?;
    let edges = conn.execute(
        "DELETE FROM edges
         WHERE from_entity_id NOT IN (SELECT entity_id FROM entities)
            OR to_entity_id NOT IN (SELECT entity_id FROM entities)",
        [],
    )?;
    let provenance = conn.execute(
        "DELETE FROM provenance
         WHERE chunk_id NOT IN (SELECT chunk_id FROM chunks)
            OR (subject_type = 'entity' AND subject_id NOT IN (SELECT entity_id FROM entities))
            OR (subject_type = 'edge' AND subject_id NOT IN (SELECT edge_id FROM edges))",
        [],
    )?;
    let aliases =
        conn.execute("DELETE FROM entity_aliases WHERE entity_id NOT IN (SELECT entity_id FROM entities)", [])?;

    Ok(PruneCounts { entities, edges, provenance, aliases })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TABLE_NAMES;

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    fn history(conn: &Connection) -> Vec<MigrationEntry> {
        MigrationManager::schema_status(conn).unwrap().history
    }

    fn snapshot(conn: &Connection) -> Vec<i64> {
        TABLE_NAMES.iter().map(|t| count(conn, &format!("SELECT COUNT(*) FROM {t}"))).collect()
    }

    fn legacy_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE captures (
                id TEXT PRIMARY KEY,
                type TEXT,
                saved_at TEXT,
                url TEXT,
                title TEXT,
                text TEXT,
                annotations TEXT,
                diagnostics TEXT
            );
            INSERT INTO captures VALUES (
                'legacy-1', 'selection', '2023-01-01T00:00:00Z', 'https://example.com/old/?utm_source=rss',
                'Old page', 'Alpha beta gamma. Delta epsilon zeta.',
                '[{"selectedText": "Alpha beta"}, {"selected_text": "zeta", "comment": "last"}]',
                '{not json'
            );
            INSERT INTO captures (id, url) VALUES ('legacy-2', NULL);
            "#,
        )
        .unwrap();
        conn
    }

    fn v1_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT);
            INSERT INTO meta VALUES ('db_schema_version', '1');
            CREATE TABLE documents (
                document_id TEXT PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                title TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE captures (
                capture_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                capture_type TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                document_text TEXT,
                transcript_segments TEXT
            );
            CREATE TABLE chunks (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                capture_id TEXT,
                chunk_type TEXT NOT NULL,
                start_offset INTEGER,
                end_offset INTEGER,
                text TEXT NOT NULL,
                comment TEXT
            );
            INSERT INTO documents VALUES ('doc_v1', 'https://example.com/video', 'A video', '2023-06-01T00:00:00Z');
            INSERT INTO captures VALUES (
                'cap-v1', 'doc_v1', 'transcript', '2023-06-01T00:00:00Z', 'Intro text here.',
                '[{"timestamp": "0:00", "text": "hello"}, {"timestamp": "0:03", "text": "world"}]'
            );
            INSERT INTO chunks VALUES ('c-note', 'doc_v1', 'cap-v1', 'note', 0, 5, 'Intro', 'nice');
            INSERT INTO chunks VALUES ('c-doc', 'doc_v1', 'cap-v1', 'document', 0, 16, 'Intro text here.', NULL);
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_get_current_version_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(MigrationManager::get_current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_bootstrap_fresh_db() {
        let mut conn = Connection::open_in_memory().unwrap();
        let report = MigrationManager::ensure_schema(&mut conn, &StoreOptions::default()).unwrap();

        assert!(report.upgraded);
        assert_eq!(report.from_version, 0);
        assert_eq!(MigrationManager::get_current_version(&conn).unwrap(), SCHEMA_VERSION);
        for table in TABLE_NAMES {
            assert!(table_exists(&conn, table).unwrap(), "missing {table}");
        }

        let status = MigrationManager::schema_status(&conn).unwrap();
        assert_eq!(status.name.as_deref(), Some(SCHEMA_NAME));
        assert_eq!(status.history.len(), 1);
        assert_eq!(status.history[0].details["kind"], "bootstrap");
        assert_eq!(status.history[0].schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let mut conn = legacy_db();
        let options = StoreOptions::default();
        MigrationManager::ensure_schema(&mut conn, &options).unwrap();
        let rows = snapshot(&conn);
        let meta: Vec<(String, Option<String>)> = conn
            .prepare("SELECT key, value FROM meta ORDER BY key")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        let report = MigrationManager::ensure_schema(&mut conn, &options).unwrap();
        assert!(!report.upgraded);
        assert_eq!(history(&conn).len(), 1);
        assert_eq!(snapshot(&conn), rows);

        let meta_after: Vec<(String, Option<String>)> = conn
            .prepare("SELECT key, value FROM meta ORDER BY key")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(meta, meta_after);
    }

    #[test]
    fn test_legacy_migration_completeness() {
        let mut conn = legacy_db();
        let report = MigrationManager::ensure_schema(&mut conn, &StoreOptions::default()).unwrap();

        assert_eq!(report.archived_table.as_deref(), Some(LEGACY_ARCHIVE_TABLE));
        assert_eq!(MigrationManager::get_current_version(&conn).unwrap(), SCHEMA_VERSION);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM documents"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM captures"), 1);
        assert!(count(&conn, "SELECT COUNT(*) FROM chunks") >= 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM annotations"), 2);
        assert!(count(&conn, "SELECT COUNT(*) FROM entities") >= 2);
        assert!(count(&conn, "SELECT COUNT(*) FROM edges") >= 1);

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM legacy_captures_archive"), 2);
        let url: String = conn.query_row("SELECT url FROM documents", [], |row| row.get(0)).unwrap();
        assert_eq!(url, "https://example.com/old");

        let entry = &history(&conn)[0];
        assert_eq!(entry.details["kind"], "legacy_migration");
        assert_eq!(entry.details["legacy"]["migrated"], 1);
        assert_eq!(entry.details["legacy"]["skipped"], 1);
    }

    #[test]
    fn test_legacy_numeric_fields_keep_annotations() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE captures (id TEXT, url TEXT, text TEXT, annotations TEXT, transcript_segments TEXT);
            INSERT INTO captures VALUES (
                'legacy-n', 'https://example.com/n', 'Alpha beta gamma.',
                '[{"selectedText": "Alpha beta", "createdAt": 1700000000000}, {"selectedText": null, "note": "n"},
                  {"selectedText": ["bad"]}]',
                '[{"timestamp": 5, "text": "hello"}]'
            );
            "#,
        )
        .unwrap();

        MigrationManager::ensure_schema(&mut conn, &StoreOptions::default()).unwrap();

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM annotations"), 2);
        let created_at: String = conn
            .query_row("SELECT created_at FROM annotations WHERE selected_text = 'Alpha beta'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(created_at, "1700000000000");
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM transcript_segments"), 1);
        assert_eq!(history(&conn)[0].details["legacy"]["skipped_items"], 1);
    }

    #[test]
    fn test_upgrade_replays_only_new_archive() {
        let mut conn = legacy_db();
        let options = StoreOptions::default();
        MigrationManager::ensure_schema(&mut conn, &options).unwrap();

        let mut resaved = CaptureRecord {
            id: "legacy-1".to_string(),
            capture_type: "selection".to_string(),
            saved_at: "2024-01-01T00:00:00Z".to_string(),
            source: CaptureSource { url: "https://example.com/old".to_string(), ..Default::default() },
            content: CaptureContent::default(),
            diagnostics: None,
        };
        resaved.content.document_text = Some("Rewritten later.".to_string());
        writer::save_capture(&mut conn, &resaved, &options).unwrap();

        conn.execute_batch(
            "CREATE TABLE legacy_captures_archive_1 (id TEXT, url TEXT, text TEXT);
             INSERT INTO legacy_captures_archive_1 VALUES ('legacy-3', 'https://example.com/new', 'Fresh.');",
        )
        .unwrap();
        let details = upgrade(&conn, SCHEMA_VERSION, &options, Some("legacy_captures_archive_1"), true).unwrap();

        assert_eq!(details["legacy_tables"], json!(["legacy_captures_archive_1"]));
        assert_eq!(details["legacy"]["migrated"], 1);
        let text: String = conn
            .query_row("SELECT document_text FROM captures WHERE capture_id = 'legacy-1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(text, "Rewritten later.");
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM captures"), 2);
    }

    #[test]
    fn test_fts_creation_failure_falls_back_to_substring() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE chunks_fts (id INTEGER PRIMARY KEY, body TEXT);").unwrap();

        let report = MigrationManager::ensure_schema(&mut conn, &StoreOptions::default()).unwrap();
        assert!(!report.fts_enabled);
        assert_eq!(get_meta(&conn, META_FTS_ENABLED).unwrap().as_deref(), Some("0"));

        let record = CaptureRecord {
            id: "cap-1".to_string(),
            capture_type: "document".to_string(),
            saved_at: "2024-01-01T00:00:00Z".to_string(),
            source: CaptureSource { url: "https://example.com/a".to_string(), ..Default::default() },
            content: CaptureContent {
                document_text: Some("Lifetimes outlive nothing.".to_string()),
                ..Default::default()
            },
            diagnostics: None,
        };
        writer::save_capture(&mut conn, &record, &StoreOptions::default()).unwrap();

        let (mode, hits) = search::search_with_mode(&conn, "outlive", 10).unwrap();
        assert_eq!(mode, crate::types::SearchMode::Substring);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_legacy_archive_name_collision() {
        let mut conn = legacy_db();
        conn.execute_batch("CREATE TABLE legacy_captures_archive (id TEXT, url TEXT);").unwrap();

        let report = MigrationManager::ensure_schema(&mut conn, &StoreOptions::default()).unwrap();
        assert_eq!(report.archived_table.as_deref(), Some("legacy_captures_archive_1"));
        assert!(table_exists(&conn, "legacy_captures_archive").unwrap());
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM captures"), 1);
    }

    #[test]
    fn test_v1_backfill() {
        let mut conn = v1_db();
        let report = MigrationManager::ensure_schema(&mut conn, &StoreOptions::default()).unwrap();
        assert_eq!(report.from_version, 1);
        assert!(report.archived_table.is_none());

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM annotations"), 1);
        let annotation_type: String =
            conn.query_row("SELECT annotation_type FROM annotations", [], |row| row.get(0)).unwrap();
        assert_eq!(annotation_type, "note");
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM chunks WHERE annotation_id IS NULL AND chunk_type = 'note'"), 0);

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM transcript_segments"), 2);
        let indexes: Vec<i64> = conn
            .prepare("SELECT chunk_index FROM chunks WHERE capture_id = 'cap-v1' ORDER BY chunk_index")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM entities WHERE entity_type = 'capture'"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM entities WHERE entity_type = 'annotation'"), 1);
        assert_eq!(history(&conn)[0].details["kind"], "upgrade");
    }

    #[test]
    fn test_prune_orphans() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::ensure_schema(&mut conn, &StoreOptions::default()).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO entities (entity_id, entity_type, name, capture_id, created_at, updated_at)
                VALUES ('ent:capture:gone', 'capture', 'gone', 'gone', 'x', 'x');
            INSERT INTO entities (entity_id, entity_type, name, created_at, updated_at)
                VALUES ('ent:site:kept', 'site', 'kept', 'x', 'x');
            INSERT INTO edges (edge_id, from_entity_id, to_entity_id, predicate, created_at, updated_at)
                VALUES ('e1', 'ent:site:kept', 'ent:capture:gone', 'p', 'x', 'x');
            INSERT INTO provenance (provenance_id, subject_type, subject_id, chunk_id, created_at)
                VALUES ('p1', 'entity', 'ent:site:kept', 'missing-chunk', 'x');
            INSERT INTO entity_aliases (entity_id, alias, created_at) VALUES ('ent:capture:gone', 'g', 'x');
            "#,
        )
        .unwrap();

        let pruned = prune_orphans(&conn).unwrap();
        assert_eq!(pruned, PruneCounts { entities: 1, edges: 1, provenance: 1, aliases: 1 });
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM entities"), 1);
    }

    #[test]
    fn test_newer_version_is_left_alone() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::ensure_schema(&mut conn, &StoreOptions::default()).unwrap();
        conn.execute("UPDATE meta SET value = '99' WHERE key = 'db_schema_version'", []).unwrap();

        let report = MigrationManager::ensure_schema(&mut conn, &StoreOptions::default()).unwrap();
        assert!(!report.upgraded);
        assert_eq!(MigrationManager::get_current_version(&conn).unwrap(), 99);
        assert_eq!(history(&conn).len(), 1);
    }

    #[test]
    fn test_fts_disabled_is_recorded() {
        let mut conn = Connection::open_in_memory().unwrap();
        let report = MigrationManager::ensure_schema(&mut conn, &StoreOptions::default().with_fts(false)).unwrap();
        assert!(!report.fts_enabled);
        assert_eq!(get_meta(&conn, META_FTS_ENABLED).unwrap().as_deref(), Some("0"));
        assert!(!MigrationManager::schema_status(&conn).unwrap().fts_enabled);
    }

    #[test]
    fn test_failed_upgrade_rolls_back() {
        let mut conn = legacy_db();
        conn.execute_batch(
            "CREATE TABLE entities (
                entity_id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL CHECK (entity_type != 'capture'),
                name TEXT NOT NULL,
                capture_id TEXT,
                properties TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .unwrap();

        let err = MigrationManager::ensure_schema(&mut conn, &StoreOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Migration { from: 0, to: SCHEMA_VERSION, .. }));

        assert!(!table_exists(&conn, "meta").unwrap());
        assert!(!table_exists(&conn, LEGACY_ARCHIVE_TABLE).unwrap());
        assert!(table_columns(&conn, "captures").unwrap().iter().any(|c| c == "url"));
    }

    #[test]
    fn test_history_is_capped() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::ensure_schema(&mut conn, &StoreOptions::default()).unwrap();
        for i in 0..70 {
            append_history(&conn, 1, 2, json!({ "i": i })).unwrap();
        }
        let entries = history(&conn);
        assert_eq!(entries.len(), MIGRATION_HISTORY_CAP);
        assert_eq!(entries.last().unwrap().details["i"], 69);
    }
}
