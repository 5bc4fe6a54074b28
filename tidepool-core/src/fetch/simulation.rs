//! Simulation fetch engine for tests and demos.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};

use super::{FetchEngine, FetchError, FilePriority, RemoteFile, SessionId};
use crate::store::ContentId;

/// Scripted in-memory [`FetchEngine`].
///
/// Sources are registered up front with a name and file list; tests then
/// advance per-session byte counters to drive completion detection, and
/// inspect which sessions were verified, released or re-prioritized.
#[derive(Clone, Default)]
pub struct SimulationFetchEngine {
    inner: Arc<RwLock<EngineState>>,
    /// Artificial delay before metadata resolution completes
    resolve_delay: Option<Duration>,
}

#[derive(Default)]
struct EngineState {
    sources: HashMap<String, ScriptedSource>,
    sessions: HashMap<SessionId, Session>,
    next_session: u64,
    released: Vec<SessionId>,
    verified: Vec<SessionId>,
}

struct ScriptedSource {
    name: String,
    files: Vec<RemoteFile>,
}

struct Session {
    descriptor: String,
    name: String,
    files: Vec<RemoteFile>,
    bytes_read: u64,
    priorities: HashMap<String, FilePriority>,
}

impl SimulationFetchEngine {
    /// Creates an engine with no known sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every `resolve` call, for exercising metadata timeouts.
    pub fn with_resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = Some(delay);
        self
    }

    /// Registers a source descriptor the engine will resolve.
    pub fn add_source(
        &self,
        descriptor: &str,
        name: &str,
        files: Vec<RemoteFile>,
    ) -> &Self {
        self.inner.write().sources.insert(
            descriptor.to_string(),
            ScriptedSource {
                name: name.to_string(),
                files,
            },
        );
        self
    }

    /// Advances a session's transferred-bytes counter.
    pub fn set_bytes_read(&self, session: SessionId, bytes: u64) {
        if let Some(state) = self.inner.write().sessions.get_mut(&session) {
            state.bytes_read = bytes;
        }
    }

    /// Sessions released so far, in call order.
    pub fn released_sessions(&self) -> Vec<SessionId> {
        self.inner.read().released.clone()
    }

    /// Sessions re-verified so far, in call order.
    pub fn verified_sessions(&self) -> Vec<SessionId> {
        self.inner.read().verified.clone()
    }

    /// Priority assigned to one file of a session, if any was set.
    pub fn priority_of(&self, session: SessionId, path: &str) -> Option<FilePriority> {
        self.inner
            .read()
            .sessions
            .get(&session)
            .and_then(|state| state.priorities.get(path).copied())
    }

    fn with_session<T>(
        &self,
        session: SessionId,
        f: impl FnOnce(&Session) -> T,
    ) -> Result<T, FetchError> {
        self.inner
            .read()
            .sessions
            .get(&session)
            .map(f)
            .ok_or(FetchError::SessionNotFound { session })
    }
}

#[async_trait]
impl FetchEngine for SimulationFetchEngine {
    async fn resolve(&self, descriptor: &str) -> Result<SessionId, FetchError> {
        if let Some(delay) = self.resolve_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.write();
        let source =
            state
                .sources
                .get(descriptor)
                .ok_or_else(|| FetchError::InvalidSource {
                    reason: format!("unknown descriptor: {descriptor}"),
                })?;

        let session_state = Session {
            descriptor: descriptor.to_string(),
            name: source.name.clone(),
            files: source.files.clone(),
            bytes_read: 0,
            priorities: HashMap::new(),
        };

        state.next_session += 1;
        let session = SessionId::new(state.next_session);
        state.sessions.insert(session, session_state);
        Ok(session)
    }

    async fn files(&self, session: SessionId) -> Result<Vec<RemoteFile>, FetchError> {
        self.with_session(session, |state| state.files.clone())
    }

    async fn set_priority(
        &self,
        session: SessionId,
        path: &str,
        priority: FilePriority,
    ) -> Result<(), FetchError> {
        let mut state = self.inner.write();
        let session_state = state
            .sessions
            .get_mut(&session)
            .ok_or(FetchError::SessionNotFound { session })?;

        session_state.priorities.insert(path.to_string(), priority);
        Ok(())
    }

    async fn bytes_read(&self, session: SessionId) -> Result<u64, FetchError> {
        self.with_session(session, |state| state.bytes_read)
    }

    async fn verify_data(&self, session: SessionId) -> Result<(), FetchError> {
        let mut state = self.inner.write();
        if !state.sessions.contains_key(&session) {
            return Err(FetchError::SessionNotFound { session });
        }

        state.verified.push(session);
        Ok(())
    }

    async fn release(&self, session: SessionId) -> Result<(), FetchError> {
        let mut state = self.inner.write();
        // Releasing twice is tolerated, mirroring real engines that treat
        // drop as idempotent; files stay queryable for post-release sweeps.
        state.released.push(session);
        Ok(())
    }

    async fn name(&self, session: SessionId) -> Result<String, FetchError> {
        self.with_session(session, |state| state.name.clone())
    }

    async fn content_id(&self, session: SessionId) -> Result<ContentId, FetchError> {
        let descriptor = self.with_session(session, |state| state.descriptor.clone())?;

        let digest = Sha1::digest(descriptor.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        Ok(ContentId::new(bytes))
    }
}
