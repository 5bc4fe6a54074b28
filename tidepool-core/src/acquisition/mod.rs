//! Acquisition coordination: in-flight swarm transfers.
//!
//! Owns the registry of active acquisitions, from source resolution
//! through completion detection. Completion hands an item over to the
//! render queue after a short grace delay that lets trailing disk writes
//! settle. The registry lock is never held across an engine call or an
//! `.await`; engine statistics are read against a snapshot instead.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::TidepoolConfig;
use crate::fetch::{FetchEngine, FetchError, FilePriority, SessionId};
use crate::files;
use crate::poster::PosterProvider;
use crate::render::RenderQueue;
use crate::store::{ContentId, Item, ItemFile, ItemId, ItemStatus, MediaStore};

/// In-memory working copy of one in-flight acquisition.
///
/// Destroyed when the acquisition completes, is dropped or the process
/// restarts; reconstructed from the persisted item on resume.
pub struct Acquisition {
    id: ItemId,
    session: SessionId,
    name: String,
    content_id: ContentId,
    source: String,
    /// Total bytes across files at or above the size threshold
    total_size: u64,
    /// Relative paths of the files eligible for output
    file_paths: Vec<String>,
}

impl Acquisition {
    /// Stable identifier of the item being acquired.
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Handle to the underlying engine session.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Content address of the source, for duplicate detection.
    pub fn content_id(&self) -> ContentId {
        self.content_id
    }

    /// Display name resolved from the source.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total eligible size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Builds the persistable item for this acquisition.
    ///
    /// Callers persist it (after checking for duplicate content) before
    /// activating the acquisition.
    pub fn item(&self) -> Item {
        Item {
            id: self.id,
            content_id: self.content_id,
            name: self.name.clone(),
            status: ItemStatus::Acquiring,
            source: self.source.clone(),
            added_at: Utc::now(),
            files: self
                .file_paths
                .iter()
                .map(|path| ItemFile {
                    id: 0,
                    path: path.clone(),
                    subtitle: None,
                })
                .collect(),
            poster: None,
        }
    }
}

/// Transfer progress of one active acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionProgress {
    pub id: ItemId,
    pub content_id: ContentId,
    pub name: String,
    /// Completion percentage, clamped to [0, 100]
    pub percent: u8,
    pub total_size: u64,
    pub bytes_read: u64,
}

/// Coordinator for all in-flight acquisitions.
pub struct AcquisitionCoordinator {
    config: TidepoolConfig,
    engine: Arc<dyn FetchEngine>,
    store: Arc<dyn MediaStore>,
    poster: Arc<dyn PosterProvider>,
    active: Mutex<HashMap<ItemId, Acquisition>>,
}

impl AcquisitionCoordinator {
    /// Creates a coordinator around the injected collaborators.
    pub fn new(
        config: TidepoolConfig,
        engine: Arc<dyn FetchEngine>,
        store: Arc<dyn MediaStore>,
        poster: Arc<dyn PosterProvider>,
    ) -> Self {
        Self {
            config,
            engine,
            store,
            poster,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a source descriptor into a new acquisition.
    ///
    /// Suspends until the engine has the source's file metadata, bounded
    /// by the configured timeout. Files below the size threshold are
    /// excluded from the eligible list and the total. The acquisition is
    /// not yet active and nothing is persisted; callers persist
    /// [`Acquisition::item`] and then call [`activate`](Self::activate).
    ///
    /// # Errors
    /// - `FetchError::InvalidSource` - Malformed or unresolvable descriptor
    /// - `FetchError::MetadataTimeout` - Engine did not resolve in time
    /// - `FetchError::EngineUnavailable` - Engine rejected the operation
    pub async fn start(&self, descriptor: &str) -> Result<Acquisition, FetchError> {
        let session = tokio::time::timeout(
            self.config.fetch.metadata_timeout,
            self.engine.resolve(descriptor),
        )
        .await
        .map_err(|_| FetchError::MetadataTimeout)??;

        let remote_files = self.engine.files(session).await?;
        let threshold = self.config.library.min_file_size;

        let mut total_size = 0u64;
        let mut file_paths = Vec::new();
        for file in &remote_files {
            if file.length < threshold {
                continue;
            }
            total_size += file.length;
            file_paths.push(file.path.clone());
        }

        Ok(Acquisition {
            id: ItemId::generate(),
            session,
            name: self.engine.name(session).await?,
            content_id: self.engine.content_id(session).await?,
            source: descriptor.to_string(),
            total_size,
            file_paths,
        })
    }

    /// Registers the acquisition and starts transferring eligible files.
    ///
    /// Idempotent per identifier: re-activating an already-active id is
    /// a no-op. Sub-threshold files are deprioritized to zero at the
    /// engine so they are never fetched; priority failures are logged
    /// and do not abort activation.
    ///
    /// # Errors
    /// - `FetchError::SessionNotFound` - Engine no longer knows the session
    pub async fn activate(&self, acquisition: Acquisition) -> Result<(), FetchError> {
        let id = acquisition.id;
        let session = acquisition.session;

        let remote_files = self.engine.files(session).await?;

        match self.active.lock().entry(id) {
            Entry::Occupied(_) => {
                tracing::debug!("Item {id} is already active");
                return Ok(());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(acquisition);
            }
        }

        let threshold = self.config.library.min_file_size;
        for file in remote_files {
            let priority = if file.length < threshold {
                tracing::info!("Skipping because of small size: {}", file.path);
                FilePriority::Skip
            } else {
                tracing::info!("Fetching: {}", file.path);
                FilePriority::Normal
            };

            if let Err(error) = self.engine.set_priority(session, &file.path, priority).await {
                tracing::warn!("Could not set priority for {}: {error}", file.path);
            }
        }

        Ok(())
    }

    /// Resumes persisted acquisitions after a restart.
    ///
    /// Each item is re-resolved from its original source descriptor under
    /// its persisted identifier; any files from prior runs are removed
    /// and the engine re-verifies before the acquisition re-activates.
    /// Failures are logged per item and do not stop the rest.
    pub async fn resume(&self, items: Vec<Item>) {
        for item in items {
            let id = item.id;
            match self.resume_item(&item).await {
                Ok(()) => tracing::info!("Resumed acquisition of item {id}"),
                Err(error) => tracing::error!("Could not resume item {id}: {error}"),
            }
        }
    }

    async fn resume_item(&self, item: &Item) -> Result<(), FetchError> {
        let mut acquisition = self.start(&item.source).await?;

        // Keep the persisted identifier; output paths and clients depend on it.
        acquisition.id = item.id;

        // On-disk state from before the restart cannot be trusted: remove
        // the files and force a full re-verification.
        let all_files = self.engine.files(acquisition.session).await?;
        let paths: Vec<String> = all_files.into_iter().map(|file| file.path).collect();
        files::remove_download_tree(&self.config.library, &paths);

        self.engine.verify_data(acquisition.session).await?;

        self.activate(acquisition).await
    }

    /// Drops an acquisition, releasing the engine session.
    ///
    /// No-op if the identifier is not active.
    pub async fn drop_acquisition(&self, id: ItemId) {
        let acquisition = self.active.lock().remove(&id);
        let Some(acquisition) = acquisition else {
            return;
        };

        if let Err(error) = self.engine.release(acquisition.session).await {
            tracing::warn!("Could not release session for {id}: {error}");
        }
    }

    /// Detects completed acquisitions and schedules their finalization.
    ///
    /// An acquisition is complete once transferred bytes reach its
    /// precomputed total. Completed entries leave the active set
    /// immediately, so a later poll never reports them again. For each,
    /// an independent task waits out the grace delay, releases the
    /// session, sweeps sub-threshold files off disk, marks the item
    /// Rendering, kicks off the best-effort poster lookup and enqueues
    /// the identifier for rendering. Returns the identifiers detected in
    /// this call; the caller is never blocked by finalization.
    pub async fn poll_completions(&self, render_queue: &RenderQueue) -> Vec<ItemId> {
        let snapshot: Vec<(ItemId, SessionId, u64)> = self
            .active
            .lock()
            .values()
            .map(|acquisition| (acquisition.id, acquisition.session, acquisition.total_size))
            .collect();

        let mut finished = Vec::new();
        for (id, session, total_size) in snapshot {
            match self.engine.bytes_read(session).await {
                Ok(bytes_read) if bytes_read >= total_size => finished.push(id),
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!("Could not read transfer stats for {id}: {error}");
                }
            }
        }

        let completed: Vec<Acquisition> = {
            let mut active = self.active.lock();
            finished
                .iter()
                .filter_map(|id| active.remove(id))
                .collect()
        };

        let mut ids = Vec::with_capacity(completed.len());
        for acquisition in completed {
            ids.push(acquisition.id);
            self.spawn_finalize(acquisition, render_queue.clone());
        }

        ids
    }

    fn spawn_finalize(&self, acquisition: Acquisition, render_queue: RenderQueue) {
        let engine = Arc::clone(&self.engine);
        let store = Arc::clone(&self.store);
        let poster = Arc::clone(&self.poster);
        let config = self.config.clone();

        tokio::spawn(async move {
            tokio::time::sleep(config.fetch.completion_grace).await;
            finalize_completed(engine, store, poster, config, acquisition, render_queue).await;
        });
    }

    /// Transfer progress for every active acquisition.
    pub async fn progress(&self) -> Vec<AcquisitionProgress> {
        let snapshot: Vec<(ItemId, SessionId, u64, String, ContentId)> = self
            .active
            .lock()
            .values()
            .map(|acquisition| {
                (
                    acquisition.id,
                    acquisition.session,
                    acquisition.total_size,
                    acquisition.name.clone(),
                    acquisition.content_id,
                )
            })
            .collect();

        let stats = futures::future::join_all(
            snapshot
                .iter()
                .map(|(_, session, ..)| self.engine.bytes_read(*session)),
        )
        .await;

        let mut progress = Vec::with_capacity(snapshot.len());
        for ((id, _, total_size, name, content_id), result) in snapshot.into_iter().zip(stats) {
            let bytes_read = match result {
                Ok(bytes_read) => bytes_read,
                Err(error) => {
                    tracing::warn!("Could not read transfer stats for {id}: {error}");
                    continue;
                }
            };

            progress.push(AcquisitionProgress {
                id,
                content_id,
                name,
                percent: percent_of(bytes_read, total_size),
                total_size,
                bytes_read,
            });
        }

        progress
    }

    /// Transfer progress of one acquisition, if it is active.
    pub async fn progress_of(&self, id: ItemId) -> Option<AcquisitionProgress> {
        self.progress()
            .await
            .into_iter()
            .find(|progress| progress.id == id)
    }

    /// Logs the progress of every active acquisition.
    pub async fn log_progress(&self) {
        for progress in self.progress().await {
            tracing::info!(
                "Item {}: {}% acquired. Bytes read {}. Total size {}.",
                progress.id,
                progress.percent,
                progress.bytes_read,
                progress.total_size
            );
        }
    }

    /// Number of currently active acquisitions.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

async fn finalize_completed(
    engine: Arc<dyn FetchEngine>,
    store: Arc<dyn MediaStore>,
    poster: Arc<dyn PosterProvider>,
    config: TidepoolConfig,
    acquisition: Acquisition,
    render_queue: RenderQueue,
) {
    let id = acquisition.id;
    let session = acquisition.session;
    tracing::info!("Acquisition of item {id} complete, finalizing");

    // Snapshot the full file list before releasing the session; the sweep
    // below needs the sub-threshold paths.
    let all_files = match engine.files(session).await {
        Ok(files) => files,
        Err(error) => {
            tracing::warn!("Could not list files for {id}: {error}");
            Vec::new()
        }
    };

    if let Err(error) = engine.release(session).await {
        tracing::warn!("Could not release session for {id}: {error}");
    }

    // Sub-threshold files were never prioritized, but pieces shared with
    // eligible files can still have put them on disk.
    for file in &all_files {
        if file.length >= config.library.min_file_size {
            continue;
        }
        files::remove_file_if_present(&config.library.download_path(&file.path));
    }

    if let Err(error) = store.set_status(id, ItemStatus::Rendering).await {
        tracing::error!("Could not mark item {id} as rendering: {error}");
        return;
    }

    let name = acquisition.name.clone();
    tokio::spawn(async move {
        match poster.poster_url(&name).await {
            Ok(Some(url)) => {
                if let Err(error) = store.set_poster(id, &url).await {
                    tracing::warn!("Could not store poster for {id}: {error}");
                }
            }
            Ok(None) => {}
            Err(error) => tracing::warn!("Poster lookup for {name} failed: {error}"),
        }
    });

    render_queue.enqueue(id);
}

fn percent_of(bytes_read: u64, total_size: u64) -> u8 {
    if total_size == 0 {
        return 100;
    }

    (bytes_read.saturating_mul(100) / total_size).min(100) as u8
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;
    use crate::fetch::{RemoteFile, SimulationFetchEngine};
    use crate::poster::StaticPosterProvider;
    use crate::store::InMemoryMediaStore;

    const MIB: u64 = 1024 * 1024;

    struct Fixture {
        _work_dir: tempfile::TempDir,
        config: TidepoolConfig,
        engine: SimulationFetchEngine,
        store: InMemoryMediaStore,
        coordinator: AcquisitionCoordinator,
    }

    fn fixture() -> Fixture {
        fixture_with_engine(SimulationFetchEngine::new())
    }

    fn fixture_with_engine(engine: SimulationFetchEngine) -> Fixture {
        let work_dir = tempfile::tempdir().unwrap();
        let mut config = TidepoolConfig::default();
        config.library.work_dir = work_dir.path().to_path_buf();
        config.fetch.completion_grace = Duration::from_millis(10);
        config.fetch.metadata_timeout = Duration::from_millis(200);

        let store = InMemoryMediaStore::new();
        let coordinator = AcquisitionCoordinator::new(
            config.clone(),
            Arc::new(engine.clone()),
            Arc::new(store.clone()),
            Arc::new(StaticPosterProvider::new("http://posters.example/p.jpg")),
        );

        Fixture {
            _work_dir: work_dir,
            config,
            engine,
            store,
            coordinator,
        }
    }

    fn movie_source(engine: &SimulationFetchEngine) {
        engine.add_source(
            "source://movie",
            "Some.Movie.2021",
            vec![
                RemoteFile {
                    path: "Some.Movie.2021/movie.mkv".to_string(),
                    length: 700 * MIB,
                },
                RemoteFile {
                    path: "Some.Movie.2021/sample.mp4".to_string(),
                    length: 10 * MIB,
                },
                RemoteFile {
                    path: "Some.Movie.2021/notes.txt".to_string(),
                    length: 4 * 1024,
                },
            ],
        );
    }

    #[tokio::test]
    async fn test_start_filters_small_files() {
        let fixture = fixture();
        movie_source(&fixture.engine);

        let acquisition = fixture.coordinator.start("source://movie").await.unwrap();

        assert_eq!(acquisition.total_size(), 700 * MIB);
        let item = acquisition.item();
        assert_eq!(item.files.len(), 1);
        assert_eq!(item.files[0].path, "Some.Movie.2021/movie.mkv");
        assert_eq!(item.status, ItemStatus::Acquiring);
        assert_eq!(item.source, "source://movie");
    }

    #[tokio::test]
    async fn test_start_unknown_source_fails() {
        let fixture = fixture();
        let result = fixture.coordinator.start("source://missing").await;
        assert!(matches!(result, Err(FetchError::InvalidSource { .. })));
    }

    #[tokio::test]
    async fn test_start_times_out_on_slow_metadata() {
        let fixture = fixture_with_engine(
            SimulationFetchEngine::new().with_resolve_delay(Duration::from_secs(5)),
        );
        movie_source(&fixture.engine);

        let result = fixture.coordinator.start("source://movie").await;
        assert!(matches!(result, Err(FetchError::MetadataTimeout)));
    }

    #[tokio::test]
    async fn test_activate_sets_priorities_and_is_idempotent() {
        let fixture = fixture();
        movie_source(&fixture.engine);

        let acquisition = fixture.coordinator.start("source://movie").await.unwrap();
        let id = acquisition.id();
        let session = acquisition.session;

        fixture.coordinator.activate(acquisition).await.unwrap();
        assert_eq!(fixture.coordinator.active_count(), 1);

        assert_eq!(
            fixture
                .engine
                .priority_of(session, "Some.Movie.2021/movie.mkv"),
            Some(FilePriority::Normal)
        );
        assert_eq!(
            fixture
                .engine
                .priority_of(session, "Some.Movie.2021/sample.mp4"),
            Some(FilePriority::Skip)
        );

        // Re-activating the same identifier is a no-op.
        let mut duplicate = fixture.coordinator.start("source://movie").await.unwrap();
        duplicate.id = id;
        fixture.coordinator.activate(duplicate).await.unwrap();
        assert_eq!(fixture.coordinator.active_count(), 1);
    }

    #[tokio::test]
    async fn test_poll_reports_completion_exactly_once() {
        let fixture = fixture();
        movie_source(&fixture.engine);
        let (queue, mut queue_rx) = RenderQueue::detached();

        let acquisition = fixture.coordinator.start("source://movie").await.unwrap();
        let id = acquisition.id();
        let session = acquisition.session;
        fixture.store.save_item(&acquisition.item()).await.unwrap();
        fixture.coordinator.activate(acquisition).await.unwrap();

        // Not done yet.
        fixture.engine.set_bytes_read(session, 100 * MIB);
        assert!(fixture.coordinator.poll_completions(&queue).await.is_empty());

        // Transferred bytes reach the eligible total.
        fixture.engine.set_bytes_read(session, 700 * MIB);
        assert_eq!(fixture.coordinator.poll_completions(&queue).await, vec![id]);

        // A second poll does not report it again.
        assert!(fixture.coordinator.poll_completions(&queue).await.is_empty());
        assert_eq!(fixture.coordinator.active_count(), 0);

        // Finalization runs after the grace delay: session released, item
        // marked Rendering, identifier queued for rendering.
        let queued = tokio::time::timeout(Duration::from_secs(2), queue_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued, id);
        assert_eq!(fixture.engine.released_sessions(), vec![session]);
        assert_eq!(
            fixture.store.item(id).await.unwrap().status,
            ItemStatus::Rendering
        );
    }

    #[tokio::test]
    async fn test_finalize_sweeps_small_files_and_sets_poster() {
        let fixture = fixture();
        movie_source(&fixture.engine);
        let (queue, mut queue_rx) = RenderQueue::detached();

        // A sub-threshold file landed on disk anyway.
        let stray = fixture
            .config
            .library
            .download_path("Some.Movie.2021/sample.mp4");
        std::fs::create_dir_all(stray.parent().unwrap()).unwrap();
        std::fs::write(&stray, b"partial").unwrap();

        let acquisition = fixture.coordinator.start("source://movie").await.unwrap();
        let id = acquisition.id();
        let session = acquisition.session;
        fixture.store.save_item(&acquisition.item()).await.unwrap();
        fixture.coordinator.activate(acquisition).await.unwrap();

        fixture.engine.set_bytes_read(session, 700 * MIB);
        fixture.coordinator.poll_completions(&queue).await;

        tokio::time::timeout(Duration::from_secs(2), queue_rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(!stray.exists());

        // Poster lookup is detached; give it a moment.
        for _ in 0..100 {
            if fixture.store.item(id).await.unwrap().poster.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            fixture.store.item(id).await.unwrap().poster.as_deref(),
            Some("http://posters.example/p.jpg")
        );
    }

    #[tokio::test]
    async fn test_resume_preserves_identifier_and_reverifies() {
        let fixture = fixture();
        movie_source(&fixture.engine);

        // Leftover files from the previous run.
        let leftover = fixture
            .config
            .library
            .download_path("Some.Movie.2021/movie.mkv");
        std::fs::create_dir_all(leftover.parent().unwrap()).unwrap();
        std::fs::write(&leftover, b"stale data").unwrap();

        let persisted = {
            let acquisition = fixture.coordinator.start("source://movie").await.unwrap();
            acquisition.item()
        };
        fixture.store.save_item(&persisted).await.unwrap();

        fixture.coordinator.resume(vec![persisted.clone()]).await;

        assert_eq!(fixture.coordinator.active_count(), 1);
        assert!(
            fixture
                .coordinator
                .progress_of(persisted.id)
                .await
                .is_some(),
            "resumed acquisition must keep the persisted identifier"
        );
        assert_eq!(fixture.engine.verified_sessions().len(), 1);
        assert!(!leftover.exists());
    }

    #[tokio::test]
    async fn test_drop_acquisition_releases_session() {
        let fixture = fixture();
        movie_source(&fixture.engine);

        let acquisition = fixture.coordinator.start("source://movie").await.unwrap();
        let id = acquisition.id();
        let session = acquisition.session;
        fixture.coordinator.activate(acquisition).await.unwrap();

        fixture.coordinator.drop_acquisition(id).await;
        assert_eq!(fixture.coordinator.active_count(), 0);
        assert_eq!(fixture.engine.released_sessions(), vec![session]);

        // Dropping an unknown identifier is a no-op.
        fixture.coordinator.drop_acquisition(ItemId::generate()).await;
    }

    #[tokio::test]
    async fn test_progress_clamps_overshoot() {
        let fixture = fixture();
        movie_source(&fixture.engine);

        let acquisition = fixture.coordinator.start("source://movie").await.unwrap();
        let id = acquisition.id();
        let session = acquisition.session;
        fixture.coordinator.activate(acquisition).await.unwrap();

        fixture.engine.set_bytes_read(session, 350 * MIB);
        let progress = fixture.coordinator.progress_of(id).await.unwrap();
        assert_eq!(progress.percent, 50);

        // Transferred bytes can overshoot the eligible total.
        fixture.engine.set_bytes_read(session, 900 * MIB);
        let progress = fixture.coordinator.progress_of(id).await.unwrap();
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.bytes_read, 900 * MIB);
        assert_eq!(progress.total_size, 700 * MIB);
    }

    proptest! {
        #[test]
        fn test_percent_is_always_in_range(bytes_read in any::<u64>(), total_size in any::<u64>()) {
            prop_assert!(percent_of(bytes_read, total_size) <= 100);
        }
    }
}
