//! Tidepool Core - acquisition-to-stream orchestration
//!
//! This crate coordinates two externally-owned engines: a content-fetching
//! engine pulling media items from a peer swarm and a transcoding engine
//! converting them into adaptive-bitrate streaming output. It tracks
//! in-flight acquisitions, detects completion, queues and runs per-item
//! render jobs with cancellation, and reconciles unfinished items on
//! process restart. The HTTP layer, the persistent store implementation
//! and both engines are injected collaborators.

pub mod acquisition;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod fetch;
pub mod files;
pub mod pipeline;
pub mod poster;
pub mod render;
pub mod store;
pub mod tracing_setup;
pub mod transcode;


// Re-export main types for convenient access
pub use acquisition::{Acquisition, AcquisitionCoordinator, AcquisitionProgress};
pub use catalog::{CatalogError, Variant};
pub use config::TidepoolConfig;
pub use fetch::{FetchEngine, FetchError};
pub use pipeline::MediaPipeline;
pub use poster::{OmdbPosterProvider, PosterError, PosterProvider};
pub use render::{RenderCoordinator, RenderError, RenderQueue};
pub use store::{InMemoryMediaStore, Item, ItemFile, ItemId, ItemStatus, MediaStore, StoreError};
pub use transcode::{FfmpegTranscoder, TranscodeError, Transcoder};

/// Core errors that can bubble up from any Tidepool subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TidepoolError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TidepoolError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            TidepoolError::Fetch(error) => match error {
                FetchError::InvalidSource { reason } => {
                    format!("Invalid source: {reason}")
                }
                FetchError::MetadataTimeout => {
                    "Source took too long to resolve".to_string()
                }
                _ => "Download error occurred".to_string(),
            },
            TidepoolError::Store(_) => "Storage error occurred".to_string(),
            TidepoolError::Transcode(_) | TidepoolError::Render(_) => {
                "Transcoding error occurred".to_string()
            }
            TidepoolError::Catalog(CatalogError::UnknownVariant { label }) => {
                format!("Unknown resolution variant: {label}")
            }
            TidepoolError::Configuration { reason } => {
                format!("Configuration error: {reason}")
            }
            TidepoolError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TidepoolError::Configuration { .. }
                | TidepoolError::Fetch(FetchError::InvalidSource { .. })
                | TidepoolError::Catalog(CatalogError::UnknownVariant { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, TidepoolError>;
