//! Pipeline composition: wiring, bootstrap and reconciliation.
//!
//! [`MediaPipeline`] owns the two coordinators and the timer that ties
//! them together. All collaborators are injected explicitly; nothing in
//! the crate reaches for process-wide state.

use std::sync::Arc;
use std::time::Duration;

use crate::acquisition::AcquisitionCoordinator;
use crate::config::{LibraryConfig, TidepoolConfig};
use crate::fetch::FetchEngine;
use crate::files;
use crate::poster::PosterProvider;
use crate::render::{RenderCoordinator, spawn_render_coordinator};
use crate::store::{ItemId, ItemStatus, MediaStore};
use crate::transcode::Transcoder;
use crate::{Result, TidepoolError};

/// The assembled acquisition-to-stream pipeline.
///
/// Construction verifies the working directories and the transcoding
/// engine; [`start`](Self::start) reloads unfinished items and spawns the
/// reconciliation loop. The coordinators stay reachable for the HTTP
/// layer's operations (start/activate/drop/progress, enqueue/cancel,
/// delete).
pub struct MediaPipeline {
    config: TidepoolConfig,
    store: Arc<dyn MediaStore>,
    acquisition: Arc<AcquisitionCoordinator>,
    render: RenderCoordinator,
}

impl MediaPipeline {
    /// Wires the pipeline from its injected collaborators.
    ///
    /// # Errors
    /// - `TidepoolError::Configuration` - Transcoding engine unavailable
    /// - `TidepoolError::Io` - Working directories could not be created
    pub fn new(
        config: TidepoolConfig,
        engine: Arc<dyn FetchEngine>,
        store: Arc<dyn MediaStore>,
        transcoder: Arc<dyn Transcoder>,
        poster: Arc<dyn PosterProvider>,
    ) -> Result<Self> {
        if !transcoder.is_available() {
            return Err(TidepoolError::Configuration {
                reason: "transcoding engine is not available".to_string(),
            });
        }

        prepare_directories(&config.library)?;

        let render = spawn_render_coordinator(config.clone(), Arc::clone(&store), transcoder);
        let acquisition = Arc::new(AcquisitionCoordinator::new(
            config.clone(),
            engine,
            Arc::clone(&store),
            poster,
        ));

        Ok(Self {
            config,
            store,
            acquisition,
            render,
        })
    }

    /// Reloads unfinished items and spawns the reconciliation loop.
    ///
    /// Items left in Acquiring state are resumed from their source
    /// descriptors; items left in Rendering state are re-queued from
    /// scratch, which is safe because every render job clears stale
    /// output before encoding.
    ///
    /// # Errors
    /// Store failures while listing unfinished items are propagated.
    pub async fn start(&self) -> Result<()> {
        let acquiring = self.store.items_with_status(ItemStatus::Acquiring).await?;
        if !acquiring.is_empty() {
            tracing::info!("Resuming {} unfinished acquisitions", acquiring.len());
            self.acquisition.resume(acquiring).await;
        }

        let rendering = self.store.items_with_status(ItemStatus::Rendering).await?;
        for item in rendering {
            tracing::info!("Re-queueing unfinished render of item {}", item.id);
            self.render.enqueue(item.id);
        }

        self.spawn_reconciliation();
        Ok(())
    }

    /// Acquisition operations, as exposed to the HTTP layer.
    pub fn acquisition(&self) -> &Arc<AcquisitionCoordinator> {
        &self.acquisition
    }

    /// Render operations, as exposed to the HTTP layer.
    pub fn render(&self) -> &RenderCoordinator {
        &self.render
    }

    /// Deletes an item in whatever lifecycle state it is in.
    ///
    /// Ready items lose their rendered output; Rendering items get their
    /// job cancelled and both output and source files removed; Acquiring
    /// items are dropped at the engine and their partial files removed.
    ///
    /// # Errors
    /// - `TidepoolError::Store` - Item unknown or deletion failed
    pub async fn delete_item(&self, id: ItemId) -> Result<()> {
        let item = self.store.item(id).await?;
        self.store.delete_item(id).await?;

        let media_dir = self.config.library.item_media_dir(id);
        let paths: Vec<String> = item.files.iter().map(|file| file.path.clone()).collect();

        match item.status {
            ItemStatus::Ready => {
                let _ = std::fs::remove_dir_all(&media_dir);
            }
            ItemStatus::Rendering => {
                self.render.cancel(id);
                let _ = std::fs::remove_dir_all(&media_dir);
                files::remove_download_tree(&self.config.library, &paths);
            }
            ItemStatus::Acquiring => {
                self.acquisition.drop_acquisition(id).await;
                files::remove_download_tree(&self.config.library, &paths);
            }
        }

        tracing::info!("Deleted item {id} ({:?})", item.status);
        Ok(())
    }

    /// Spawns the fixed-interval reconciliation task.
    ///
    /// Each tick logs acquisition progress and forwards newly completed
    /// acquisitions towards the render queue. Ticks are idempotent per
    /// identifier, so an overlapping or delayed tick is benign.
    fn spawn_reconciliation(&self) {
        let acquisition = Arc::clone(&self.acquisition);
        let queue = self.render.queue();
        let interval = self.config.fetch.reconcile_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;

                acquisition.log_progress().await;

                let completed = acquisition.poll_completions(&queue).await;
                for id in completed {
                    tracing::info!("Item {id} finished acquiring, queued for rendering");
                }
            }
        });
    }
}

fn prepare_directories(library: &LibraryConfig) -> Result<()> {
    std::fs::create_dir_all(&library.work_dir)?;
    std::fs::create_dir_all(library.downloads_dir())?;
    std::fs::create_dir_all(library.media_dir())?;
    Ok(())
}
