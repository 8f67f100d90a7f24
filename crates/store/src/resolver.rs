//! URL normalization and document identity

use crate::codec;
use crate::error::Result;
use crate::ids;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::trace;
use url::{Url, form_urlencoded};
use webclip_core::CaptureRecord;

/// Query parameters dropped during normalization, matched case-insensitively
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "gbraid", "wbraid", "msclkid", "yclid", "igshid", "mc_cid", "mc_eid", "_hsenc",
    "_hsmi", "mkt_tok", "ref_src", "oly_anon_id", "oly_enc_id", "vero_id", "spm",
];

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Normalize a web URL for identity comparison
///
/// For http/https: drops the fragment and tracking parameters, sorts the
/// remaining query parameters and trims trailing slashes from the path (the
/// root path stays `/`). Anything else, including unparsable input, is
/// returned trimmed but otherwise unchanged.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    if !matches!(url.scheme(), "http" | "https") {
        return trimmed.to_string();
    }

    url.set_fragment(None);

    // Pairs keep their original text (`?flag`, `%20`); only order and membership change
    let mut pairs: Vec<((String, String), &str)> = url
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let decoded = form_urlencoded::parse(pair.as_bytes()).next()?;
            let key = (decoded.0.into_owned(), decoded.1.into_owned());
            (!is_tracking_param(&key.0)).then_some((key, pair))
        })
        .collect();
    pairs.sort();
    let query = pairs.iter().map(|(_, pair)| *pair).collect::<Vec<_>>().join("&");
    url.set_query((!query.is_empty()).then_some(query.as_str()));

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(if path.is_empty() { "/" } else { path.as_str() });

    url.to_string()
}

/// Host of a URL, lowercased, if it has one
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_ascii_lowercase)
}

/// How an existing document was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Match {
    Normalized,
    Raw,
    Canonical,
}

fn find_document(
    conn: &Connection, normalized: &str, raw: &str, canonical: Option<&str>,
) -> Result<Option<(String, String, Match)>> {
    let mut lookups = vec![("url", normalized, Match::Normalized)];
    if raw != normalized {
        lookups.push(("url", raw, Match::Raw));
    }
    if let Some(canonical) = canonical {
        lookups.push(("canonical_url", canonical, Match::Canonical));
        lookups.push(("url", canonical, Match::Canonical));
    }

    for (column, value, kind) in lookups {
        let sql = format!("SELECT document_id, url FROM documents WHERE {column} = ?1 LIMIT 1");
        let found: Option<(String, String)> =
            conn.query_row(&sql, [value], |row| Ok((row.get(0)?, row.get(1)?))).optional()?;
        if let Some((document_id, url)) = found {
            return Ok(Some((document_id, url, kind)));
        }
    }

    Ok(None)
}

/// Find the document a caller-supplied URL refers to
///
/// Tries the normalized form, the URL as given, then the URL as a canonical URL.
pub fn lookup_document_id(conn: &Connection, url: &str) -> Result<Option<String>> {
    let raw = url.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let normalized = normalize_url(raw);
    Ok(find_document(conn, &normalized, raw, Some(raw))?.map(|(document_id, _, _)| document_id))
}

/// Insert or update the document a record belongs to, returning its id
///
/// Existing documents are found by normalized URL, then raw URL, then
/// canonical URL. Updates keep every stored value the record leaves null.
pub fn upsert_document(conn: &Connection, record: &CaptureRecord) -> Result<String> {
    let raw = record.source.url.trim();
    let normalized = normalize_url(raw);
    let canonical = record.canonical_url().map(normalize_url);
    let site = record
        .source
        .site
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| host_of(&normalized));

    let existing = find_document(conn, &normalized, raw, canonical.as_deref())?;
    let found = existing.is_some();
    let (document_id, url) = match existing {
        Some((document_id, stored_url, Match::Canonical)) => (document_id, stored_url),
        Some((document_id, _, Match::Normalized | Match::Raw)) => (document_id, normalized.clone()),
        None => (ids::document_id(&normalized), normalized.clone()),
    };
    trace!(document_id = %document_id, found, "Resolved document");

    let metadata = codec::encode(record.source.metadata.as_ref())?;
    let now = crate::now_timestamp();

    conn.execute(
        "INSERT INTO documents (document_id, url, canonical_url, title, site, language, published_at,
                                metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
         ON CONFLICT(document_id) DO UPDATE SET
             url = excluded.url,
             canonical_url = COALESCE(excluded.canonical_url, documents.canonical_url),
             title = COALESCE(excluded.title, documents.title),
             site = COALESCE(excluded.site, documents.site),
             language = COALESCE(excluded.language, documents.language),
             published_at = COALESCE(excluded.published_at, documents.published_at),
             metadata = COALESCE(excluded.metadata, documents.metadata),
             updated_at = excluded.updated_at",
        params![
            document_id,
            url,
            canonical,
            non_blank(record.source.title.as_deref()),
            site,
            non_blank(record.source.language.as_deref()),
            non_blank(record.source.published_at.as_deref()),
            metadata,
            now,
        ],
    )?;

    Ok(document_id)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
