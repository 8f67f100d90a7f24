//! Knowledge-graph population
//!
//! Derives entities, edges and provenance for one capture. All ids are
//! deterministic, so populating the same capture again upserts the same rows.

use crate::codec;
use crate::error::Result;
use crate::ids;

use rusqlite::{Connection, params};
use serde_json::{Value, json};
use tracing::trace;

pub const ENTITY_DOCUMENT: &str = "document";
pub const ENTITY_CAPTURE: &str = "capture";
pub const ENTITY_CAPTURE_TYPE: &str = "capture_type";
pub const ENTITY_SITE: &str = "site";
pub const ENTITY_ANNOTATION: &str = "annotation";

pub const CAPTURED_AS: &str = "captured_as";
pub const HAS_CAPTURE_TYPE: &str = "has_capture_type";
pub const HOSTS_DOCUMENT: &str = "hosts_document";
pub const HAS_ANNOTATION: &str = "has_annotation";
pub const CAPTURED_ANNOTATION: &str = "captured_annotation";

/// A chunk used as evidence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceChunk {
    pub chunk_id: String,
    pub text: String,
}

/// One annotation to derive graph rows for
#[derive(Debug, Clone)]
pub struct GraphAnnotation {
    pub annotation_id: String,
    pub annotation_type: String,
    pub selected_text: String,
    pub comment: Option<String>,
    pub chunk: EvidenceChunk,
}

/// Everything the populator needs about one capture
///
/// Built from a record on save, or from stored rows during backfill.
#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    pub document_id: String,
    pub url: String,
    pub raw_url: Option<String>,
    pub canonical_url: Option<String>,
    pub title: Option<String>,
    pub site: Option<String>,
    pub host: Option<String>,
    pub capture_id: String,
    pub capture_type: String,
    pub saved_at: String,
    /// First document chunk, else the capture's first chunk
    pub evidence: Option<EvidenceChunk>,
    pub annotations: Vec<GraphAnnotation>,
}

/// Rows written by one population
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCounts {
    pub entities: usize,
    pub edges: usize,
    pub provenance: usize,
}

struct Populator<'a> {
    conn: &'a Connection,
    ctx: &'a GraphContext,
    excerpt_chars: usize,
    counts: GraphCounts,
}

impl Populator<'_> {
    fn entity(
        &mut self, entity_type: &str, key: &str, name: &str, scoped: bool, properties: Value,
        evidence: Option<&EvidenceChunk>,
    ) -> Result<String> {
        let entity_id = ids::entity_id(entity_type, key);
        let capture_id = scoped.then_some(self.ctx.capture_id.as_str());

        self.conn.execute(
            "INSERT INTO entities (entity_id, entity_type, name, capture_id, properties, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(entity_id) DO UPDATE SET
                 name = excluded.name,
                 capture_id = COALESCE(excluded.capture_id, entities.capture_id),
                 properties = COALESCE(excluded.properties, entities.properties),
                 updated_at = excluded.updated_at",
            params![entity_id, entity_type, name, capture_id, codec::encode(Some(&properties))?, self.ctx.saved_at],
        )?;
        self.counts.entities += 1;

        if let Some(chunk) = evidence {
            self.provenance("entity", &entity_id, chunk)?;
        }
        Ok(entity_id)
    }

    fn edge(
        &mut self, from: &str, predicate: &str, to: &str, scoped: bool, evidence: Option<&EvidenceChunk>,
    ) -> Result<String> {
        let edge_id = ids::edge_id(from, predicate, to);
        let capture_id = scoped.then_some(self.ctx.capture_id.as_str());
        let properties = json!({ "document_id": self.ctx.document_id });

        self.conn.execute(
            "INSERT INTO edges (edge_id, from_entity_id, to_entity_id, predicate, capture_id, properties,
                                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(edge_id) DO UPDATE SET
                 capture_id = COALESCE(excluded.capture_id, edges.capture_id),
                 properties = COALESCE(excluded.properties, edges.properties),
                 updated_at = excluded.updated_at",
            params![edge_id, from, to, predicate, capture_id, codec::encode(Some(&properties))?, self.ctx.saved_at],
        )?;
        self.counts.edges += 1;

        if let Some(chunk) = evidence {
            self.provenance("edge", &edge_id, chunk)?;
        }
        Ok(edge_id)
    }

    fn provenance(&mut self, subject_type: &str, subject_id: &str, chunk: &EvidenceChunk) -> Result<()> {
        let provenance_id = ids::provenance_id(subject_type, subject_id, &chunk.chunk_id);
        let excerpt = excerpt(&chunk.text, self.excerpt_chars);

        self.conn.execute(
            "INSERT INTO provenance (provenance_id, subject_type, subject_id, chunk_id, document_id, capture_id,
                                     evidence_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(provenance_id) DO UPDATE SET
                 evidence_text = excluded.evidence_text,
                 capture_id = excluded.capture_id",
            params![
                provenance_id,
                subject_type,
                subject_id,
                chunk.chunk_id,
                self.ctx.document_id,
                self.ctx.capture_id,
                excerpt,
                self.ctx.saved_at,
            ],
        )?;
        self.counts.provenance += 1;
        Ok(())
    }

    fn aliases(&self, entity_id: &str, aliases: &[&str]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO entity_aliases (entity_id, alias, created_at) VALUES (?1, ?2, ?3)",
        )?;
        for alias in aliases.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
            stmt.execute(params![entity_id, alias, self.ctx.saved_at])?;
        }
        Ok(())
    }
}

/// First `max_chars` chars of a chunk, whitespace collapsed
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_chars).collect()
}

/// Host aliases with and without a leading `www.`
fn host_aliases(host: &str) -> Vec<String> {
    let bare = host.strip_prefix("www.").unwrap_or(host);
    vec![bare.to_string(), format!("www.{bare}")]
}

/// Upsert the graph rows for one capture
pub fn populate_capture_graph(conn: &Connection, ctx: &GraphContext, excerpt_chars: usize) -> Result<GraphCounts> {
    let mut populator = Populator { conn, ctx, excerpt_chars, counts: GraphCounts::default() };
    let evidence = ctx.evidence.as_ref();

    let document_name = ctx.title.as_deref().filter(|t| !t.trim().is_empty()).unwrap_or(&ctx.url);
    let document = populator.entity(
        ENTITY_DOCUMENT,
        &ctx.document_id,
        document_name,
        false,
        json!({
            "document_id": ctx.document_id,
            "url": ctx.url,
            "canonical_url": ctx.canonical_url,
            "title": ctx.title,
        }),
        evidence,
    )?;
    let mut document_aliases = vec![ctx.url.as_str()];
    document_aliases.extend(ctx.raw_url.as_deref().filter(|u| *u != ctx.url));
    document_aliases.extend(ctx.canonical_url.as_deref().filter(|u| *u != ctx.url));
    populator.aliases(&document, &document_aliases)?;

    let capture = populator.entity(
        ENTITY_CAPTURE,
        &ids::capture_key(&ctx.capture_id),
        &ctx.capture_id,
        true,
        json!({
            "capture_id": ctx.capture_id,
            "capture_type": ctx.capture_type,
            "saved_at": ctx.saved_at,
            "document_id": ctx.document_id,
        }),
        evidence,
    )?;
    populator.edge(&document, CAPTURED_AS, &capture, true, evidence)?;

    let capture_type = populator.entity(
        ENTITY_CAPTURE_TYPE,
        &ctx.capture_type,
        &ctx.capture_type,
        false,
        json!({ "capture_type": ctx.capture_type }),
        evidence,
    )?;
    populator.edge(&capture, HAS_CAPTURE_TYPE, &capture_type, true, evidence)?;

    if let Some(site) = ctx.site.as_deref().or(ctx.host.as_deref()).filter(|s| !s.trim().is_empty()) {
        let site_entity =
            populator.entity(ENTITY_SITE, site, site, false, json!({ "site": site, "host": ctx.host }), evidence)?;
        let mut aliases = vec![site.to_string()];
        if let Some(host) = ctx.host.as_deref() {
            aliases.extend(host_aliases(host));
        }
        let aliases: Vec<&str> = aliases.iter().map(String::as_str).collect();
        populator.aliases(&site_entity, &aliases)?;
        populator.edge(&site_entity, HOSTS_DOCUMENT, &document, false, evidence)?;
    }

    for annotation in &ctx.annotations {
        let name = if annotation.selected_text.trim().is_empty() {
            annotation.comment.as_deref().unwrap_or(&annotation.annotation_id)
        } else {
            annotation.selected_text.as_str()
        };
        let entity = populator.entity(
            ENTITY_ANNOTATION,
            &annotation.annotation_id,
            &excerpt(name, 120),
            true,
            json!({
                "annotation_id": annotation.annotation_id,
                "annotation_type": annotation.annotation_type,
                "comment": annotation.comment,
                "capture_id": ctx.capture_id,
            }),
            Some(&annotation.chunk),
        )?;
        populator.edge(&document, HAS_ANNOTATION, &entity, true, Some(&annotation.chunk))?;
        populator.edge(&capture, CAPTURED_ANNOTATION, &entity, true, Some(&annotation.chunk))?;
    }

    trace!(
        capture_id = %ctx.capture_id,
        entities = populator.counts.entities,
        edges = populator.counts.edges,
        "Populated capture graph"
    );
    Ok(populator.counts)
}
