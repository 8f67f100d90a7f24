//! Engine options

use webclip_core::StoreConfig;
use webclip_core::config::{DEFAULT_EVIDENCE_EXCERPT_CHARS, DEFAULT_MAX_CHUNK_CHARS, MIN_MAX_CHUNK_CHARS};

/// Options the engine reads on open and on every save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Try to create and use the `chunks_fts` table
    pub enable_fts: bool,
    /// Upper bound on document chunk length, in chars
    pub max_chunk_chars: usize,
    /// Length of provenance evidence excerpts, in chars
    pub evidence_excerpt_chars: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            enable_fts: true,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            evidence_excerpt_chars: DEFAULT_EVIDENCE_EXCERPT_CHARS,
        }
    }
}

impl StoreOptions {
    pub fn with_fts(mut self, enable: bool) -> Self {
        self.enable_fts = enable;
        self
    }

    pub fn with_max_chunk_chars(mut self, max: usize) -> Self {
        self.max_chunk_chars = max.max(MIN_MAX_CHUNK_CHARS);
        self
    }
}

impl From<&StoreConfig> for StoreOptions {
    fn from(config: &StoreConfig) -> Self {
        Self {
            enable_fts: config.enable_fts,
            max_chunk_chars: config.max_chunk_chars.max(MIN_MAX_CHUNK_CHARS),
            evidence_excerpt_chars: config.evidence_excerpt_chars.max(1),
        }
    }
}
