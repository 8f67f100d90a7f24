//! Capture store: SQLite persistence for saved web captures
//!
//! Normalizes capture records into documents, captures, chunks, annotations
//! and transcript segments, derives a small entity graph with provenance back
//! to the chunks, and serves recent-capture listing, chunk search and
//! per-document context.
//!
//! # Example
//!
//! ```ignore
//! use webclip_store::{CaptureStore, StoreOptions};
//!
//! let store = CaptureStore::open(&db_path, StoreOptions::default()).await?;
//! let outcome = store.save_capture(record).await?;
//!
//! for hit in store.search_chunks_by_text("borrow checker", 20).await? {
//!     println!("{} {}: {}", hit.url, hit.chunk_type, hit.text);
//! }
//!
//! let context = store.get_document_context(&outcome.document_id).await?;
//! ```

mod capture_store;
mod chunker;
mod codec;
mod error;
mod graph;
mod ids;
mod linker;
mod migration;
mod options;
mod query;
mod resolver;
mod schema;
mod search;
mod types;
mod writer;

pub use capture_store::CaptureStore;
pub use chunker::{TextChunk, split_document_into_chunks};
pub use codec::StoredJson;
pub use error::{Error, Result};
pub use linker::{MatchMethod, OffsetMatch, resolve_selection_offsets};
pub use migration::{MigrationManager, SchemaReport};
pub use options::StoreOptions;
pub use query::{get_document_by_url, get_document_context, list_recent_captures, store_stats};
pub use resolver::normalize_url;
pub use schema::{SCHEMA_NAME, SCHEMA_VERSION};
pub use search::{rebuild_search_index, search_chunks_by_text, search_with_mode};
pub use types::{
    AnnotationRow, CaptureRow, ChunkKind, ChunkRow, DocumentContext, DocumentRow, EdgeRow, EntityRow, MigrationEntry,
    RecentCapture, SaveOutcome, SchemaStatus, SearchHit, SearchMode, StoreStats, TranscriptSegmentRow,
};
pub use writer::save_capture;

/// Current time as an RFC 3339 UTC timestamp with millisecond precision
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
