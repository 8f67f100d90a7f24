//! Annotation and transcript linking
//!
//! Turns a record's annotations and transcript segments into normalized rows
//! plus one chunk each, resolving annotation offsets against the document text.

use crate::error::Result;
use crate::ids;
use crate::types::ChunkKind;
use crate::writer::{NewChunk, insert_chunk};

use rusqlite::{Connection, params};
use std::collections::HashSet;
use tracing::trace;
use webclip_core::{AnnotationInput, TranscriptSegmentInput};

/// Minimum token length used by the token-window match
const MIN_TOKEN_CHARS: usize = 3;

/// Lower bound on the span the token-window match may cover
const TOKEN_WINDOW_FLOOR: usize = 600;

/// Which tier resolved a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Exact,
    CaseInsensitive,
    TokenWindow,
}

/// Char offsets of a selection in the document text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetMatch {
    pub start: usize,
    pub end: usize,
    pub method: MatchMethod,
}

/// Locate a selection in the document text
///
/// Tries an exact match, then a case-insensitive one, then a token window:
/// the first token of 3+ chars and the last such token after it, accepted only
/// when the span is within `max(600, 4 × selection length)` chars.
pub fn resolve_selection_offsets(document: &str, selection: &str) -> Option<OffsetMatch> {
    let selection = selection.trim();
    if selection.is_empty() || document.is_empty() {
        return None;
    }

    let doc: Vec<char> = document.chars().collect();
    let needle: Vec<char> = selection.chars().collect();

    if let Some(start) = find_chars(&doc, &needle, 0) {
        return Some(OffsetMatch { start, end: start + needle.len(), method: MatchMethod::Exact });
    }

    let folded_doc = fold(&doc);
    let folded_needle = fold(&needle);
    if let Some(start) = find_chars(&folded_doc, &folded_needle, 0) {
        return Some(OffsetMatch { start, end: start + needle.len(), method: MatchMethod::CaseInsensitive });
    }

    let tokens: Vec<&[char]> = folded_needle
        .split(|c| !c.is_alphanumeric())
        .filter(|token| token.len() >= MIN_TOKEN_CHARS)
        .collect();
    let (first, last) = (tokens.first()?, tokens.last()?);

    let start = find_chars(&folded_doc, first, 0)?;
    let last_start = if tokens.len() == 1 { start } else { find_chars(&folded_doc, last, start + first.len())? };
    let end = last_start + last.len();

    let bound = TOKEN_WINDOW_FLOOR.max(4 * needle.len());
    (end - start <= bound).then_some(OffsetMatch { start, end, method: MatchMethod::TokenWindow })
}

/// Lowercase char by char, keeping positions aligned with the input
fn fold(chars: &[char]) -> Vec<char> {
    chars.iter().map(|c| c.to_lowercase().next().unwrap_or(*c)).collect()
}

fn find_chars(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() || needle.len() > haystack.len() - from {
        return None;
    }
    haystack[from..].windows(needle.len()).position(|window| window == needle).map(|pos| pos + from)
}

/// Capture-level values shared by every linked row
#[derive(Debug, Clone, Copy)]
pub struct LinkContext<'a> {
    pub document_id: &'a str,
    pub capture_id: &'a str,
    pub saved_at: &'a str,
    pub document_text: Option<&'a str>,
    pub transcript_text: Option<&'a str>,
}

/// An annotation after it was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedAnnotation {
    pub annotation_id: String,
    pub chunk_id: String,
    pub kind: ChunkKind,
    pub selected_text: String,
    pub comment: Option<String>,
    pub chunk_text: String,
    pub offsets: Option<(usize, usize)>,
}

/// A transcript segment after it was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedSegment {
    pub segment_id: String,
    pub chunk_id: String,
    pub segment_index: usize,
    pub text: String,
}

/// Write annotation rows and their chunks, skipping empties and duplicates
///
/// `next_index` is the capture's next free `chunk_index` and is advanced per chunk.
pub fn link_annotations(
    conn: &Connection, ctx: &LinkContext<'_>, annotations: &[AnnotationInput], next_index: &mut usize,
) -> Result<Vec<LinkedAnnotation>> {
    let mut seen = HashSet::new();
    let mut linked = Vec::new();

    for annotation in annotations.iter().filter(|a| !a.is_empty()) {
        let selected_text = annotation.selected_text.trim().to_string();
        let comment = annotation.comment_text().map(str::to_string);
        let kind = if comment.is_some() { ChunkKind::Note } else { ChunkKind::Highlight };
        let created_at = annotation.created_at.clone().unwrap_or_else(|| ctx.saved_at.to_string());

        if !seen.insert((kind, selected_text.clone(), comment.clone(), created_at.clone())) {
            trace!(capture_id = ctx.capture_id, "Skipping duplicate annotation");
            continue;
        }

        let seq = linked.len();
        let annotation_id = ids::annotation_id(ctx.capture_id, seq);
        let chunk_id = ids::chunk_id(ctx.capture_id, kind.as_str(), seq);
        let offsets = ctx
            .document_text
            .and_then(|doc| resolve_selection_offsets(doc, &selected_text))
            .map(|m| (m.start, m.end));
        let chunk_text = match (&comment, selected_text.is_empty()) {
            (Some(comment), true) => comment.clone(),
            _ => selected_text.clone(),
        };

        conn.execute(
            "INSERT OR IGNORE INTO annotations (annotation_id, document_id, capture_id, annotation_type, selected_text,
                                                comment, created_at, start_offset, end_offset, chunk_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                annotation_id,
                ctx.document_id,
                ctx.capture_id,
                kind.as_str(),
                selected_text,
                comment,
                created_at,
                offsets.map(|(start, _)| start as i64),
                offsets.map(|(_, end)| end as i64),
                chunk_id,
            ],
        )?;

        insert_chunk(
            conn,
            &NewChunk {
                chunk_id: &chunk_id,
                document_id: ctx.document_id,
                capture_id: ctx.capture_id,
                kind,
                chunk_index: *next_index,
                offsets,
                text: &chunk_text,
                comment: comment.as_deref(),
                annotation_id: Some(&annotation_id),
                created_at: &created_at,
            },
        )?;
        *next_index += 1;

        linked.push(LinkedAnnotation { annotation_id, chunk_id, kind, selected_text, comment, chunk_text, offsets });
    }

    Ok(linked)
}

/// Write transcript segment rows and their chunks in order
///
/// Segment offsets are searched forward through the transcript text so
/// repeated lines resolve to successive occurrences.
pub fn link_transcript(
    conn: &Connection, ctx: &LinkContext<'_>, segments: &[TranscriptSegmentInput], next_index: &mut usize,
) -> Result<Vec<LinkedSegment>> {
    let transcript: Vec<char> = ctx.transcript_text.map(|t| t.chars().collect()).unwrap_or_default();
    let mut cursor = 0;
    let mut linked = Vec::new();

    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }

        let segment_index = linked.len();
        let segment_id = ids::segment_id(ctx.capture_id, segment_index);
        let chunk_id = ids::chunk_id(ctx.capture_id, ChunkKind::TranscriptSegment.as_str(), segment_index);
        let needle: Vec<char> = text.chars().collect();
        let offsets = find_chars(&transcript, &needle, cursor).map(|start| (start, start + needle.len()));
        if let Some((_, end)) = offsets {
            cursor = end;
        }
        let timestamp = segment.timestamp.as_deref().map(str::trim).filter(|t| !t.is_empty());

        conn.execute(
            "INSERT OR REPLACE INTO transcript_segments (segment_id, document_id, capture_id, segment_index,
                                                         timestamp_text, text, chunk_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![segment_id, ctx.document_id, ctx.capture_id, segment_index as i64, timestamp, text, chunk_id],
        )?;

        insert_chunk(
            conn,
            &NewChunk {
                chunk_id: &chunk_id,
                document_id: ctx.document_id,
                capture_id: ctx.capture_id,
                kind: ChunkKind::TranscriptSegment,
                chunk_index: *next_index,
                offsets,
                text,
                comment: None,
                annotation_id: None,
                created_at: ctx.saved_at,
            },
        )?;
        *next_index += 1;

        linked.push(LinkedSegment { segment_id, chunk_id, segment_index, text: text.to_string() });
    }

    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    const DOC: &str = "Alpha beta gamma. Delta epsilon zeta.";

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(schema::TABLES_SQL).unwrap();
        conn.execute_batch(schema::INDEXES_SQL).unwrap();
        conn
    }

    fn ctx<'a>(document_text: Option<&'a str>, transcript_text: Option<&'a str>) -> LinkContext<'a> {
        LinkContext {
            document_id: "doc_1",
            capture_id: "cap-1",
            saved_at: "2024-05-01T10:00:00Z",
            document_text,
            transcript_text,
        }
    }

    fn annotation(selected: &str, comment: Option<&str>) -> AnnotationInput {
        AnnotationInput {
            selected_text: selected.to_string(),
            comment: comment.map(str::to_string),
            created_at: None,
        }
    }

    fn char_slice(text: &str, start: usize, end: usize) -> String {
        text.chars().skip(start).take(end - start).collect()
    }

    #[test]
    fn test_exact_match() {
        let m = resolve_selection_offsets(DOC, "Alpha beta").unwrap();
        assert_eq!(m.method, MatchMethod::Exact);
        assert_eq!((m.start, m.end), (0, 10));
        assert_eq!(char_slice(DOC, m.start, m.end), "Alpha beta");
    }

    #[test]
    fn test_case_insensitive_match() {
        let m = resolve_selection_offsets(DOC, "delta EPSILON").unwrap();
        assert_eq!(m.method, MatchMethod::CaseInsensitive);
        assert_eq!(char_slice(DOC, m.start, m.end), "Delta epsilon");
    }

    #[test]
    fn test_token_window_match() {
        let m = resolve_selection_offsets(DOC, "gamma delta").unwrap();
        assert_eq!(m.method, MatchMethod::TokenWindow);
        assert_eq!(char_slice(DOC, m.start, m.end), "gamma. Delta");
    }

    #[test]
    fn test_token_window_rejects_distant_tokens() {
        let doc = format!("start here {} finish now", "filler ".repeat(200));
        assert!(resolve_selection_offsets(&doc, "start finish").is_none());
    }

    #[test]
    fn test_unresolvable_selection() {
        assert!(resolve_selection_offsets(DOC, "omega").is_none());
        assert!(resolve_selection_offsets(DOC, "   ").is_none());
        assert!(resolve_selection_offsets("", "Alpha").is_none());
    }

    #[test]
    fn test_multibyte_exact_offsets() {
        let doc = "Café crème brûlée is délicieux.";
        let m = resolve_selection_offsets(doc, "brûlée").unwrap();
        assert_eq!(char_slice(doc, m.start, m.end), "brûlée");
    }

    #[test]
    fn test_link_annotations_classifies_and_indexes() {
        let conn = conn();
        let mut next_index = 1;
        let annotations = vec![annotation("Alpha beta", None), annotation("gamma delta", Some("n"))];
        let linked = link_annotations(&conn, &ctx(Some(DOC), None), &annotations, &mut next_index).unwrap();

        assert_eq!(linked.len(), 2);
        assert_eq!(linked[0].kind, ChunkKind::Highlight);
        assert_eq!(linked[1].kind, ChunkKind::Note);
        assert_eq!(next_index, 3);

        let indexes: Vec<i64> = conn
            .prepare("SELECT chunk_index FROM chunks ORDER BY chunk_index")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(indexes, vec![1, 2]);
    }

    #[test]
    fn test_link_annotations_dedups_and_skips_empty() {
        let conn = conn();
        let mut next_index = 0;
        let annotations = vec![
            annotation("Alpha beta", None),
            annotation("Alpha beta", None),
            annotation("  ", Some("  ")),
            annotation("", Some("just a comment")),
        ];
        let linked = link_annotations(&conn, &ctx(Some(DOC), None), &annotations, &mut next_index).unwrap();

        assert_eq!(linked.len(), 2);
        assert_eq!(linked[1].chunk_text, "just a comment");
        assert_eq!(linked[1].offsets, None);

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM annotations", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_unresolved_annotation_is_still_stored() {
        let conn = conn();
        let mut next_index = 0;
        let linked =
            link_annotations(&conn, &ctx(Some(DOC), None), &[annotation("omega", None)], &mut next_index).unwrap();

        assert_eq!(linked.len(), 1);
        let (start, end): (Option<i64>, Option<i64>) = conn
            .query_row("SELECT start_offset, end_offset FROM annotations", [], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        assert_eq!((start, end), (None, None));
    }

    #[test]
    fn test_link_transcript_in_order() {
        let conn = conn();
        let transcript = "hello there\nhello there\ngoodbye";
        let segments = vec![
            TranscriptSegmentInput { timestamp: Some("0:01".to_string()), text: "hello there".to_string() },
            TranscriptSegmentInput { timestamp: None, text: "  ".to_string() },
            TranscriptSegmentInput { timestamp: Some("0:05".to_string()), text: "hello there".to_string() },
            TranscriptSegmentInput { timestamp: Some("0:09".to_string()), text: "goodbye".to_string() },
        ];
        let mut next_index = 0;
        let linked = link_transcript(&conn, &ctx(None, Some(transcript)), &segments, &mut next_index).unwrap();

        assert_eq!(linked.len(), 3);
        assert_eq!(linked.iter().map(|s| s.segment_index).collect::<Vec<_>>(), vec![0, 1, 2]);

        let offsets: Vec<(i64, i64)> = conn
            .prepare("SELECT start_offset, end_offset FROM chunks ORDER BY chunk_index")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(offsets, vec![(0, 11), (12, 23), (24, 31)]);
    }
}
