//! Render coordination: the transcode queue and per-item render jobs.
//!
//! A single dispatcher task drains an unbounded identifier queue and
//! spawns one render job per item; jobs run concurrently with the
//! dispatcher and with each other. Within one job, files are processed
//! strictly in index order and resolution variants strictly in declared
//! order. Each job registers a cancellation token that both gates every
//! subsequent step and kills the currently running transcode process, so
//! a user delete mid-render stops the job at the next suspension point.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog::{self, CatalogError, Variant};
use crate::classify;
use crate::config::TidepoolConfig;
use crate::files;
use crate::store::{Item, ItemId, ItemStatus, MediaStore, StoreError};
use crate::transcode::{TranscodeError, Transcoder, plan_invocation};

/// Errors that abort one item's render job.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Render was cancelled")]
    Cancelled,

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

/// Cloneable sender side of the render queue.
#[derive(Clone)]
pub struct RenderQueue {
    sender: mpsc::UnboundedSender<ItemId>,
}

impl RenderQueue {
    /// Queues an item for rendering.
    ///
    /// The queue is unbounded; enqueueing never blocks. A send failure
    /// means the dispatcher is gone, which only happens at shutdown.
    pub fn enqueue(&self, id: ItemId) {
        if self.sender.send(id).is_err() {
            tracing::error!("Render queue is closed, dropping item {id}");
        }
    }

    /// Creates a queue without a dispatcher, for callers that consume
    /// the identifiers themselves.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<ItemId>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

/// Handle to the render coordinator.
///
/// Cheap to clone; the dispatcher task runs independently.
#[derive(Clone)]
pub struct RenderCoordinator {
    context: Arc<RenderContext>,
    queue: RenderQueue,
}

struct RenderContext {
    config: TidepoolConfig,
    store: Arc<dyn MediaStore>,
    transcoder: Arc<dyn Transcoder>,
    /// One cancellation token per item with a running render job.
    /// Never held across an engine call or an `.await`.
    active: Mutex<HashMap<ItemId, CancellationToken>>,
}

/// Spawns the render dispatcher and returns the coordinator handle.
pub fn spawn_render_coordinator(
    config: TidepoolConfig,
    store: Arc<dyn MediaStore>,
    transcoder: Arc<dyn Transcoder>,
) -> RenderCoordinator {
    let (sender, receiver) = mpsc::unbounded_channel();
    let context = Arc::new(RenderContext {
        config,
        store,
        transcoder,
        active: Mutex::new(HashMap::new()),
    });

    tokio::spawn(run_dispatcher(Arc::clone(&context), receiver));

    RenderCoordinator {
        context,
        queue: RenderQueue { sender },
    }
}

impl RenderCoordinator {
    /// Returns a cloneable handle for queueing items.
    pub fn queue(&self) -> RenderQueue {
        self.queue.clone()
    }

    /// Queues an item for rendering.
    pub fn enqueue(&self, id: ItemId) {
        self.queue.enqueue(id);
    }

    /// Cancels the item's render job, killing the running transcode
    /// process and removing the tracking entry.
    ///
    /// Already-finished variant encodes are not undone; callers delete
    /// the item's output directory afterwards. No-op for unknown ids.
    pub fn cancel(&self, id: ItemId) {
        let token = self.context.active.lock().remove(&id);
        if let Some(token) = token {
            tracing::info!("Cancelling render of item {id}");
            token.cancel();
        }
    }

    /// Whether a render job is currently tracked for the item.
    pub fn is_rendering(&self, id: ItemId) -> bool {
        self.context.active.lock().contains_key(&id)
    }
}

async fn run_dispatcher(
    context: Arc<RenderContext>,
    mut receiver: mpsc::UnboundedReceiver<ItemId>,
) {
    tracing::debug!("Render dispatcher started");

    while let Some(id) = receiver.recv().await {
        let item = match context.store.item(id).await {
            Ok(item) => item,
            Err(error) => {
                tracing::error!("Cannot render {id}: {error}");
                continue;
            }
        };

        let media_dir = context.config.library.item_media_dir(id);
        if let Err(error) = std::fs::create_dir_all(&media_dir) {
            tracing::error!(
                "Cannot create output directory {}: {error}",
                media_dir.display()
            );
            continue;
        }

        // The job runs concurrently; the dispatcher moves straight on to
        // the next queued identifier.
        tokio::spawn(run_render_job(Arc::clone(&context), item));
    }

    tracing::debug!("Render dispatcher stopped");
}

async fn run_render_job(context: Arc<RenderContext>, item: Item) {
    let id = item.id;
    let token = CancellationToken::new();

    {
        let mut active = context.active.lock();
        if active.contains_key(&id) {
            tracing::warn!("Item {id} already has a running render job");
            return;
        }
        active.insert(id, token.clone());
    }

    let result = render_item(&context, &item, &token).await;
    context.active.lock().remove(&id);

    match result {
        Ok(()) => tracing::info!("Render job for item {id} finished"),
        Err(RenderError::Cancelled) => tracing::info!("Render job for item {id} cancelled"),
        Err(error) => tracing::error!("Render job for item {id} failed: {error}"),
    }
}

async fn render_item(
    context: &RenderContext,
    item: &Item,
    token: &CancellationToken,
) -> Result<(), RenderError> {
    let media_dir = context.config.library.item_media_dir(item.id);

    // Clear stale output from an earlier, interrupted run.
    if media_dir.exists() {
        let _ = std::fs::remove_dir_all(&media_dir);
    }

    let variants = catalog::variants_for(&context.config.transcode.resolutions)?;

    let mut valid_files = 0usize;
    for (index, file) in item.files.iter().enumerate() {
        if token.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let source = context.config.library.download_path(&file.path);
        if !classify::is_video(&source) {
            tracing::info!(
                "File {} is not a video, deleting it from the store",
                file.path
            );
            context.store.delete_file(file.id).await?;
            continue;
        }

        valid_files += 1;

        if let Err(error) = render_file(context, item, index, &source, &variants, token).await {
            let _ = std::fs::remove_dir_all(&media_dir);
            return Err(error);
        }
    }

    if valid_files == 0 {
        tracing::info!("Item {} has no valid video files, deleting it", item.id);
        context.store.delete_item(item.id).await?;
    } else {
        context.store.set_status(item.id, ItemStatus::Ready).await?;
    }

    let paths: Vec<String> = item.files.iter().map(|file| file.path.clone()).collect();
    files::remove_download_tree(&context.config.library, &paths);

    Ok(())
}

/// Encodes one file into every declared variant, sequentially.
async fn render_file(
    context: &RenderContext,
    item: &Item,
    index: usize,
    source: &Path,
    variants: &[&Variant],
    token: &CancellationToken,
) -> Result<(), RenderError> {
    let output_dir = context
        .config
        .library
        .item_media_dir(item.id)
        .join(index.to_string());

    std::fs::create_dir_all(&output_dir).map_err(|source| RenderError::Io {
        operation: format!("create output directory {}", output_dir.display()),
        source,
    })?;

    // The manifest references every declared variant up front, so it is
    // present even if a later encode fails.
    catalog::write_master_playlist(&output_dir, variants).map_err(|source| RenderError::Io {
        operation: format!("write master playlist into {}", output_dir.display()),
        source,
    })?;

    for variant in variants {
        if token.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let invocation = plan_invocation(
            source,
            &output_dir,
            variant,
            context.config.transcode.hardware_accel,
        );

        let mut process = context.transcoder.spawn(&invocation).await?;

        let outcome = {
            let wait = process.wait();
            tokio::select! {
                result = wait => EncodeOutcome::Exited(result),
                () = token.cancelled() => EncodeOutcome::Cancelled,
            }
        };

        match outcome {
            EncodeOutcome::Exited(Ok(())) => {}
            EncodeOutcome::Exited(Err(error)) => return Err(error.into()),
            EncodeOutcome::Cancelled => {
                process.kill().await;
                return Err(RenderError::Cancelled);
            }
        }
    }

    Ok(())
}

enum EncodeOutcome {
    Exited(Result<(), TranscodeError>),
    Cancelled,
}
