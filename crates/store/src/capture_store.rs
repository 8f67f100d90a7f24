//! Async handle over the capture database
//!
//! Every operation runs on the `tokio-rusqlite` background thread. Write
//! operations are one SQLite transaction each.

use crate::error::{Error, Result};
use crate::migration::{MigrationManager, SchemaReport};
use crate::options::StoreOptions;
use crate::query;
use crate::search;
use crate::types::{DocumentContext, DocumentRow, RecentCapture, SaveOutcome, SchemaStatus, SearchHit, SearchMode};
use crate::writer;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_rusqlite::Connection;
use tracing::instrument;
use webclip_core::CaptureRecord;
use webclip_core::logging::sanitize_path;

/// Capture store backed by SQLite
#[derive(Clone)]
pub struct CaptureStore {
    conn: Arc<Connection>,
    options: StoreOptions,
    schema: SchemaReport,
}

impl CaptureStore {
    /// Open or create a store at `db_path`, bringing its schema up to date
    #[instrument(skip_all, fields(db_path = %sanitize_path(db_path)))]
    pub async fn open(db_path: &Path, options: StoreOptions) -> Result<Self> {
        tracing::info!("Opening capture store at {}", sanitize_path(db_path));

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(db_path)
            .await
            .map_err(|e| Error::database(format!("Failed to open database: {e}")))?;
        Self::init(conn, options).await
    }

    /// Open a private in-memory store
    pub async fn open_in_memory(options: StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::database(format!("Failed to open database: {e}")))?;
        Self::init(conn, options).await
    }

    async fn init(conn: Connection, options: StoreOptions) -> Result<Self> {
        let migrate_options = options.clone();
        let schema = conn
            .call(move |conn| {
                conn.busy_timeout(Duration::from_secs(5))?;
                tracing::debug!("Ensuring schema");
                Ok::<_, rusqlite::Error>(MigrationManager::ensure_schema(conn, &migrate_options))
            })
            .await??;

        tracing::info!(
            version = schema.to_version,
            upgraded = schema.upgraded,
            fts = schema.fts_enabled,
            "Capture store opened"
        );
        Ok(Self { conn: Arc::new(conn), options, schema })
    }

    /// Options the store was opened with
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// What schema setup did when the store was opened
    pub fn schema_report(&self) -> &SchemaReport {
        &self.schema
    }

    /// Persist one capture record and everything derived from it
    ///
    /// The record is validated before the database is touched.
    #[instrument(skip(self, record), fields(capture_id = %record.id))]
    pub async fn save_capture(&self, record: CaptureRecord) -> Result<SaveOutcome> {
        record.validate()?;
        let options = self.options.clone();

        let outcome = self
            .conn
            .call(move |conn| Ok::<_, rusqlite::Error>(writer::save_capture(conn, &record, &options)))
            .await??;

        tracing::info!(
            document_id = %outcome.document_id,
            chunks = outcome.chunk_count,
            annotations = outcome.annotation_count,
            "Capture saved"
        );
        Ok(outcome)
    }

    /// Most recent captures first
    #[instrument(skip(self))]
    pub async fn list_recent_captures(&self, limit: usize, offset: usize) -> Result<Vec<RecentCapture>> {
        self.conn
            .call(move |conn| Ok::<_, rusqlite::Error>(query::list_recent_captures(conn, limit, offset)))
            .await?
    }

    /// Search chunk text and comments
    #[instrument(skip(self))]
    pub async fn search_chunks_by_text(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        Ok(self.search_with_mode(query, limit).await?.1)
    }

    /// Search and report whether the full-text or substring path answered
    pub async fn search_with_mode(&self, query: &str, limit: usize) -> Result<(SearchMode, Vec<SearchHit>)> {
        let query = query.to_string();
        let (mode, hits) = self
            .conn
            .call(move |conn| Ok::<_, rusqlite::Error>(search::search_with_mode(conn, &query, limit)))
            .await??;

        tracing::debug!(?mode, hits = hits.len(), "Search complete");
        Ok((mode, hits))
    }

    /// Everything stored for one document
    #[instrument(skip(self))]
    pub async fn get_document_context(&self, document_id: &str) -> Result<Option<DocumentContext>> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| Ok::<_, rusqlite::Error>(query::get_document_context(conn, &document_id)))
            .await?
    }

    /// Find a document by URL
    #[instrument(skip(self))]
    pub async fn get_document_by_url(&self, url: &str) -> Result<Option<DocumentRow>> {
        let url = url.to_string();
        self.conn
            .call(move |conn| Ok::<_, rusqlite::Error>(query::get_document_by_url(conn, &url)))
            .await?
    }

    /// Schema version, name, search capability and migration history
    pub async fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .call(|conn| Ok::<_, rusqlite::Error>(MigrationManager::schema_status(conn)))
            .await?
    }

    /// Row counts per table
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<crate::types::StoreStats> {
        self.conn.call(|conn| Ok::<_, rusqlite::Error>(query::store_stats(conn))).await?
    }

    /// Rebuild the full-text index from the chunk table
    ///
    /// Returns `false` when full-text search is disabled.
    #[instrument(skip(self))]
    pub async fn rebuild_search_index(&self) -> Result<bool> {
        tracing::info!("Rebuilding chunk search index");
        self.conn
            .call(|conn| Ok::<_, rusqlite::Error>(search::rebuild_search_index(conn)))
            .await?
    }

    /// Close the underlying connection
    ///
    /// Fails if another clone of this store still holds the connection.
    pub async fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| Error::database("Capture store is still shared; drop other handles before closing"))?;
        conn.close()
            .await
            .map_err(|e| Error::database(format!("Failed to close database: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SCHEMA_VERSION;
    use tempfile::TempDir;
    use webclip_core::{AnnotationInput, CaptureContent, CaptureSource};

    fn record(id: &str) -> CaptureRecord {
        CaptureRecord {
            id: id.to_string(),
            capture_type: "selection".to_string(),
            saved_at: "2024-05-01T12:00:00Z".to_string(),
            source: CaptureSource {
                url: "https://blog.example.com/post?utm_campaign=x".to_string(),
                title: Some("A post".to_string()),
                ..Default::default()
            },
            content: CaptureContent {
                document_text: Some("Borrowing rules keep aliasing and mutation apart.".to_string()),
                annotations: vec![AnnotationInput {
                    selected_text: "aliasing and mutation".to_string(),
                    comment: None,
                    created_at: None,
                }],
                ..Default::default()
            },
            diagnostics: None,
        }
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs_and_schema() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("dir").join("captures.db");

        let store = CaptureStore::open(&db_path, StoreOptions::default()).await.unwrap();
        assert!(db_path.exists());
        assert!(store.schema_report().upgraded);

        let status = store.schema_status().await.unwrap();
        assert_eq!(status.version, SCHEMA_VERSION);
        assert_eq!(status.history.len(), 1);
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let store = CaptureStore::open_in_memory(StoreOptions::default()).await.unwrap();
        let outcome = store.save_capture(record("cap-1")).await.unwrap();
        assert_eq!(outcome.chunk_count, 2);

        let recent = store.list_recent_captures(10, 0).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].url, "https://blog.example.com/post");
        assert_eq!(recent[0].site.as_deref(), Some("blog.example.com"));

        let context = store.get_document_context(&outcome.document_id).await.unwrap().unwrap();
        assert_eq!(context.annotations.len(), 1);

        let by_url = store.get_document_by_url("https://blog.example.com/post/").await.unwrap().unwrap();
        assert_eq!(by_url.document_id, outcome.document_id);

        let hits = store.search_chunks_by_text("aliasing", 10).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.document_id == outcome.document_id));
    }

    #[tokio::test]
    async fn test_invalid_record_is_rejected() {
        let store = CaptureStore::open_in_memory(StoreOptions::default()).await.unwrap();
        let mut bad = record("cap-1");
        bad.source.url = String::new();

        let err = store.save_capture(bad).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
        assert_eq!(store.stats().await.unwrap().captures, 0);
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("captures.db");

        let store = CaptureStore::open(&db_path, StoreOptions::default()).await.unwrap();
        store.save_capture(record("cap-1")).await.unwrap();
        let before = store.stats().await.unwrap();
        store.close().await.unwrap();

        let store = CaptureStore::open(&db_path, StoreOptions::default()).await.unwrap();
        assert!(!store.schema_report().upgraded);
        let after = store.stats().await.unwrap();
        assert_eq!(before.captures, after.captures);
        assert_eq!(before.chunks, after.chunks);
        assert_eq!(before.entities, after.entities);
        assert_eq!(store.schema_status().await.unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_search_index() {
        let store = CaptureStore::open_in_memory(StoreOptions::default()).await.unwrap();
        store.save_capture(record("cap-1")).await.unwrap();

        let rebuilt = store.rebuild_search_index().await.unwrap();
        assert_eq!(rebuilt, store.schema_report().fts_enabled);
        assert!(!store.search_chunks_by_text("borrowing", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_substring_search_without_fts() {
        let store = CaptureStore::open_in_memory(StoreOptions::default().with_fts(false)).await.unwrap();
        store.save_capture(record("cap-1")).await.unwrap();

        let (mode, hits) = store.search_with_mode("mutation apart", 10).await.unwrap();
        assert_eq!(mode, SearchMode::Substring);
        assert_eq!(hits.len(), 1);
        assert!(!store.rebuild_search_index().await.unwrap());
    }
}
