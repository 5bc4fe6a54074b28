//! Centralized configuration for Tidepool.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase. Loading and
//! merging configuration from disk is the embedding application's job.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::ItemId;

/// Central configuration for all Tidepool components.
///
/// Groups related configuration settings into logical sections.
#[derive(Debug, Clone, Default)]
pub struct TidepoolConfig {
    pub library: LibraryConfig,
    pub fetch: FetchConfig,
    pub transcode: TranscodeConfig,
}

/// On-disk layout of the media library.
///
/// Acquired files land under `<work_dir>/downloads`, rendered output under
/// `<work_dir>/media/<item id>/<file index>`.
#[derive(Debug, Clone)]
pub struct LibraryConfig {
    /// Root working directory for downloads, rendered media and logs
    pub work_dir: PathBuf,
    /// Files below this size are never fetched or rendered
    pub min_file_size: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            min_file_size: 67_108_864, // 64 MiB
        }
    }
}

impl LibraryConfig {
    /// Directory the fetch engine writes acquired files into.
    pub fn downloads_dir(&self) -> PathBuf {
        self.work_dir.join("downloads")
    }

    /// Root directory for rendered streaming output.
    pub fn media_dir(&self) -> PathBuf {
        self.work_dir.join("media")
    }

    /// Absolute path of one acquired file, given its item-relative path.
    pub fn download_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.downloads_dir().join(relative)
    }

    /// Rendered-output directory for one item.
    pub fn item_media_dir(&self, id: ItemId) -> PathBuf {
        self.media_dir().join(id.to_string())
    }
}

/// Acquisition timing and polling configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum time to wait for the fetch engine to resolve source metadata
    pub metadata_timeout: Duration,
    /// Delay between completion detection and finalization, letting
    /// trailing disk writes settle
    pub completion_grace: Duration,
    /// Interval of the reconciliation loop
    pub reconcile_interval: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(90),
            completion_grace: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(3),
        }
    }
}

/// Transcoding engine configuration.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Use the hardware-accelerated encode profile
    pub hardware_accel: bool,
    /// Resolution variants rendered for every video file, in encode order
    pub resolutions: Vec<String>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            hardware_accel: false,
            resolutions: vec!["360p".to_string(), "720p".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_paths_derive_from_work_dir() {
        let library = LibraryConfig {
            work_dir: PathBuf::from("/srv/tidepool"),
            ..LibraryConfig::default()
        };

        assert_eq!(library.downloads_dir(), PathBuf::from("/srv/tidepool/downloads"));
        assert_eq!(library.media_dir(), PathBuf::from("/srv/tidepool/media"));
        assert_eq!(
            library.download_path("Some.Movie/file.mkv"),
            PathBuf::from("/srv/tidepool/downloads/Some.Movie/file.mkv")
        );
    }

    #[test]
    fn test_defaults_carry_documented_constants() {
        let config = TidepoolConfig::default();
        assert_eq!(config.library.min_file_size, 64 * 1024 * 1024);
        assert_eq!(config.fetch.completion_grace, Duration::from_secs(5));
        assert_eq!(config.fetch.reconcile_interval, Duration::from_secs(3));
        assert!(!config.transcode.resolutions.is_empty());
    }
}
