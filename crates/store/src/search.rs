//! Chunk search
//!
//! Ranked FTS5 search when the `chunks_fts` table is usable, escaped `LIKE`
//! substring search otherwise. Both paths return [`SearchHit`] rows.

use crate::error::Result;
use crate::schema::{self, META_FTS_ENABLED};
use crate::types::{SearchHit, SearchMode};

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, warn};

/// Largest result page a search returns
pub const MAX_SEARCH_LIMIT: usize = 500;

const HIT_COLUMNS: &str = "c.chunk_id, c.document_id, c.capture_id, c.chunk_type, c.chunk_index, c.start_offset,
                           c.end_offset, c.text, c.comment, c.created_at, d.url, d.title, d.site";

/// Whether the full-text table exists and is marked enabled
pub fn fts_available(conn: &Connection) -> Result<bool> {
    let flag: Option<Option<String>> = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [META_FTS_ENABLED], |row| row.get(0))
        .optional()?;
    if flag.flatten().as_deref() != Some("1") {
        return Ok(false);
    }

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='chunks_fts')",
        [],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Mirror a capture's chunks into the full-text table
pub fn index_capture_chunks(conn: &Connection, capture_id: &str) -> Result<usize> {
    let inserted = conn.execute(
        "INSERT INTO chunks_fts (chunk_id, capture_id, text, comment)
         SELECT chunk_id, capture_id, text, comment FROM chunks WHERE capture_id = ?1",
        [capture_id],
    )?;
    Ok(inserted)
}

/// Remove a capture's rows from the full-text table
pub fn remove_capture_from_index(conn: &Connection, capture_id: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM chunks_fts WHERE capture_id = ?1", [capture_id])?)
}

/// Drop, recreate and repopulate `chunks_fts`
///
/// Returns `false` without touching anything when full-text search is off.
pub fn rebuild_search_index(conn: &mut Connection) -> Result<bool> {
    if !fts_available(conn)? {
        return Ok(false);
    }

    let tx = conn.transaction()?;
    tx.execute_batch("DROP TABLE IF EXISTS chunks_fts;")?;
    tx.execute_batch(schema::CHUNKS_FTS_SQL)?;
    let indexed = tx.execute(
        "INSERT INTO chunks_fts (chunk_id, capture_id, text, comment)
         SELECT chunk_id, capture_id, text, comment FROM chunks",
        [],
    )?;
    tx.commit()?;

    debug!(indexed, "Rebuilt chunk search index");
    Ok(true)
}

fn hit_from_row(row: &Row<'_>, score: Option<f64>) -> rusqlite::Result<SearchHit> {
    Ok(SearchHit {
        chunk_id: row.get(0)?,
        document_id: row.get(1)?,
        capture_id: row.get(2)?,
        chunk_type: row.get(3)?,
        chunk_index: row.get(4)?,
        start_offset: row.get(5)?,
        end_offset: row.get(6)?,
        text: row.get(7)?,
        comment: row.get(8)?,
        created_at: row.get(9)?,
        url: row.get(10)?,
        title: row.get(11)?,
        site: row.get(12)?,
        score,
    })
}

fn full_text(conn: &Connection, query: &str, limit: i64) -> rusqlite::Result<Vec<SearchHit>> {
    let sql = format!(
        "SELECT {HIT_COLUMNS}, bm25(chunks_fts) AS score
         FROM chunks_fts
         JOIN chunks c ON c.chunk_id = chunks_fts.chunk_id
         JOIN documents d ON d.document_id = c.document_id
         WHERE chunks_fts MATCH ?1
         ORDER BY score, c.chunk_id
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let hits = stmt
        .query_map(params![query, limit], |row| {
            let score: f64 = row.get(13)?;
            hit_from_row(row, Some(score))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(hits)
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn substring(conn: &Connection, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
    let sql = format!(
        "SELECT {HIT_COLUMNS}
         FROM chunks c
         JOIN documents d ON d.document_id = c.document_id
         WHERE c.text LIKE ?1 ESCAPE '\\' OR IFNULL(c.comment, '') LIKE ?1 ESCAPE '\\'
         ORDER BY c.created_at DESC, c.rowid DESC
         LIMIT ?2"
    );
    let pattern = format!("%{}%", escape_like(query));
    let mut stmt = conn.prepare(&sql)?;
    let hits = stmt
        .query_map(params![pattern, limit], |row| hit_from_row(row, None))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(hits)
}

/// Search chunk text and comments, reporting which path answered
///
/// A query the full-text engine rejects falls back to substring search; a
/// valid query with no matches returns no rows.
pub fn search_with_mode(conn: &Connection, query: &str, limit: usize) -> Result<(SearchMode, Vec<SearchHit>)> {
    let query = query.trim();
    if query.is_empty() {
        return Ok((SearchMode::Substring, Vec::new()));
    }
    let limit = limit.clamp(1, MAX_SEARCH_LIMIT) as i64;

    if fts_available(conn)? {
        match full_text(conn, query, limit) {
            Ok(hits) => return Ok((SearchMode::FullText, hits)),
            Err(err) => warn!(error = %err, "Full-text query rejected, using substring search"),
        }
    }

    Ok((SearchMode::Substring, substring(conn, query, limit)?))
}

/// Search chunk text and comments, best match first
pub fn search_chunks_by_text(conn: &Connection, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
    Ok(search_with_mode(conn, query, limit)?.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MigrationManager;
    use crate::options::StoreOptions;
    use crate::writer::save_capture;
    use webclip_core::{AnnotationInput, CaptureContent, CaptureRecord, CaptureSource};

    fn record(id: &str, text: &str) -> CaptureRecord {
        CaptureRecord {
            id: id.to_string(),
            capture_type: "document".to_string(),
            saved_at: "2024-05-01T10:00:00Z".to_string(),
            source: CaptureSource { url: format!("https://example.com/{id}"), ..Default::default() },
            content: CaptureContent {
                document_text: Some(text.to_string()),
                annotations: vec![AnnotationInput {
                    selected_text: "quick".to_string(),
                    comment: Some("100% sure".to_string()),
                    created_at: None,
                }],
                ..Default::default()
            },
            diagnostics: None,
        }
    }

    fn store(options: &StoreOptions) -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::ensure_schema(&mut conn, options).unwrap();
        save_capture(&mut conn, &record("cap-1", "The quick brown fox jumps."), options).unwrap();
        save_capture(&mut conn, &record("cap-2", "A lazy dog sleeps all day."), options).unwrap();
        conn
    }

    #[test]
    fn test_full_text_search() {
        let conn = store(&StoreOptions::default());
        if !fts_available(&conn).unwrap() {
            return;
        }

        let (mode, hits) = search_with_mode(&conn, "fox", 10).unwrap();
        assert_eq!(mode, SearchMode::FullText);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].capture_id.as_deref(), Some("cap-1"));
        assert!(hits[0].score.is_some());
    }

    #[test]
    fn test_invalid_match_syntax_falls_back() {
        let conn = store(&StoreOptions::default());
        let (mode, hits) = search_with_mode(&conn, "fox jumps.\"", 10).unwrap();
        assert_eq!(mode, SearchMode::Substring);
        assert!(hits.is_empty());

        let (mode, hits) = search_with_mode(&conn, "fox jumps.", 10).unwrap();
        assert_eq!(mode, SearchMode::Substring);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_substring_search_when_disabled() {
        let conn = store(&StoreOptions::default().with_fts(false));
        assert!(!fts_available(&conn).unwrap());

        let (mode, hits) = search_with_mode(&conn, "lazy dog", 10).unwrap();
        assert_eq!(mode, SearchMode::Substring);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, None);
    }

    #[test]
    fn test_substring_search_when_table_missing() {
        let conn = store(&StoreOptions::default());
        conn.execute_batch("DROP TABLE IF EXISTS chunks_fts;").unwrap();

        let hits = search_chunks_by_text(&conn, "brown fox", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://example.com/cap-1");
    }

    #[test]
    fn test_like_wildcards_are_literal() {
        let conn = store(&StoreOptions::default().with_fts(false));
        let hits = search_chunks_by_text(&conn, "100%", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(search_chunks_by_text(&conn, "1_0", 10).unwrap().is_empty());
    }

    #[test]
    fn test_empty_query_and_limit_clamp() {
        let conn = store(&StoreOptions::default().with_fts(false));
        assert!(search_chunks_by_text(&conn, "   ", 10).unwrap().is_empty());
        assert_eq!(search_chunks_by_text(&conn, "a", 0).unwrap().len(), 1);
    }

    #[test]
    fn test_rebuild_search_index() {
        let mut conn = store(&StoreOptions::default());
        if !fts_available(&conn).unwrap() {
            return;
        }
        conn.execute("DELETE FROM chunks_fts", []).unwrap();
        assert!(search_with_mode(&conn, "fox", 10).unwrap().1.is_empty());

        assert!(rebuild_search_index(&mut conn).unwrap());
        assert_eq!(search_with_mode(&conn, "fox", 10).unwrap().1.len(), 1);
    }

    #[test]
    fn test_rebuild_is_noop_when_disabled() {
        let mut conn = store(&StoreOptions::default().with_fts(false));
        assert!(!rebuild_search_index(&mut conn).unwrap());
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
