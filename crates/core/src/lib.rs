pub mod config;
pub mod error;
pub mod logging;
pub mod record;

pub use config::{Config, FileLoggingConfig, LoggingConfig, PrivacyLoggingConfig, StoreConfig};
pub use error::{Error, RecordError, Result};
pub use record::{
    AnnotationInput, CaptureContent, CaptureRecord, CaptureSource, TranscriptSegmentInput, parse_records, read_records,
};
