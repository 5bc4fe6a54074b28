//! Content-fetching engine collaborator contract.
//!
//! The engine that actually speaks the peer-swarm protocol is owned by the
//! embedding application; the pipeline drives it exclusively through the
//! narrow [`FetchEngine`] trait. A simulation implementation ships here for
//! tests and demos.

pub mod simulation;

use std::fmt;

use async_trait::async_trait;

use crate::store::ContentId;

pub use simulation::SimulationFetchEngine;

/// Opaque handle to one engine-side acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Wraps a raw engine session number.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One file advertised by a resolved source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the acquisition's file tree
    pub path: String,
    /// Size in bytes
    pub length: u64,
}

/// Transfer priority for one file within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePriority {
    /// Fetch the file normally
    Normal,
    /// Never fetch the file
    Skip,
}

/// Errors surfaced by fetch-engine operations.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid source descriptor: {reason}")]
    InvalidSource { reason: String },

    #[error("Timed out waiting for source metadata")]
    MetadataTimeout,

    #[error("Unknown session: {session}")]
    SessionNotFound { session: SessionId },

    #[error("Fetch engine unavailable: {reason}")]
    EngineUnavailable { reason: String },
}

/// Narrow capability contract of the content-fetching engine.
///
/// The pipeline depends on nothing beyond these calls: resolving a source
/// descriptor into a session, listing and prioritizing its files, reading
/// transfer statistics, forcing re-verification, and releasing the session.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Resolves a source descriptor into an engine session.
    ///
    /// Suspends until the engine has the source's file metadata. Callers
    /// are expected to bound this with a timeout; the engine itself
    /// applies none.
    ///
    /// # Errors
    /// - `FetchError::InvalidSource` - Malformed or unresolvable descriptor
    /// - `FetchError::EngineUnavailable` - Engine rejected the operation
    async fn resolve(&self, descriptor: &str) -> Result<SessionId, FetchError>;

    /// Lists all files advertised by the session's source.
    async fn files(&self, session: SessionId) -> Result<Vec<RemoteFile>, FetchError>;

    /// Sets the transfer priority of one file.
    ///
    /// `FilePriority::Skip` deprioritizes the file to zero so it is never
    /// fetched.
    async fn set_priority(
        &self,
        session: SessionId,
        path: &str,
        priority: FilePriority,
    ) -> Result<(), FetchError>;

    /// Total payload bytes the session has read so far.
    async fn bytes_read(&self, session: SessionId) -> Result<u64, FetchError>;

    /// Forces a full re-verification of on-disk data against the source.
    ///
    /// Required after an uncontrolled restart: the engine's on-disk state
    /// cannot be trusted without it.
    async fn verify_data(&self, session: SessionId) -> Result<(), FetchError>;

    /// Discards the session, releasing any engine-held resources.
    async fn release(&self, session: SessionId) -> Result<(), FetchError>;

    /// Display name of the session's source.
    async fn name(&self, session: SessionId) -> Result<String, FetchError>;

    /// Content address derived from the session's source descriptor.
    async fn content_id(&self, session: SessionId) -> Result<ContentId, FetchError>;
}
