//! Deterministic identifiers
//!
//! Every derived row id is a pure function of stable inputs (capture id, url,
//! variant, sequence, slugs of names). Re-deriving rows for the same capture
//! therefore hits the same primary keys and upserts instead of duplicating.
//! Capture-scoped ids embed [`capture_key`], which stays distinct for capture
//! ids that only differ in case or punctuation.

use sha2::{Digest, Sha256};

/// Lowercase slug: runs of non-alphanumeric chars become one `-`
pub fn slug(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if out.is_empty() { "unknown".to_string() } else { out }
}

/// Document id for a normalized URL
pub fn document_id(normalized_url: &str) -> String {
    let digest = Sha256::digest(normalized_url.as_bytes());
    let hex = format!("{:x}", digest);
    format!("doc_{}", &hex[..24])
}

/// Readable, injective key for a capture id: its slug plus a hash of the raw id
pub fn capture_key(capture_id: &str) -> String {
    let digest = Sha256::digest(capture_id.as_bytes());
    let hex = format!("{:x}", digest);
    format!("{}-{}", slug(capture_id), &hex[..8])
}

pub fn chunk_id(capture_id: &str, variant: &str, seq: usize) -> String {
    format!("chunk:{}:{}:{}", capture_key(capture_id), variant, seq)
}

pub fn annotation_id(capture_id: &str, seq: usize) -> String {
    format!("ann:{}:{}", capture_key(capture_id), seq)
}

pub fn segment_id(capture_id: &str, segment_index: usize) -> String {
    format!("seg:{}:{}", capture_key(capture_id), segment_index)
}

pub fn entity_id(entity_type: &str, key: &str) -> String {
    format!("ent:{}:{}", entity_type, slug(key))
}

pub fn edge_id(from_entity_id: &str, predicate: &str, to_entity_id: &str) -> String {
    format!("edge:{}:{}:{}", slug(from_entity_id), predicate, slug(to_entity_id))
}

pub fn provenance_id(subject_type: &str, subject_id: &str, chunk_id: &str) -> String {
    format!("prov:{}:{}:{}", subject_type, slug(subject_id), slug(chunk_id))
}
