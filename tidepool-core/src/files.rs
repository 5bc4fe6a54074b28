//! Cleanup helpers for the acquired-file tree.
//!
//! Acquired files live under `<work_dir>/downloads/<top-level dir>/...`;
//! once an item is rendered or deleted, both the individual files and
//! each top-level directory they arrived in are removed. Cleanup is
//! best-effort: a path that is already gone is not an error.

use std::path::Path;

use crate::config::LibraryConfig;

/// Removes acquired files and the top-level directories they arrived in.
///
/// Mirrors how the fetch engine lays files out: every relative path's
/// first component is a per-acquisition directory under `downloads/`.
pub fn remove_download_tree(library: &LibraryConfig, relative_paths: &[String]) {
    for relative in relative_paths {
        remove_file_if_present(&library.download_path(relative));

        let Some(first_component) = first_path_component(relative) else {
            continue;
        };

        let top_level = library.downloads_dir().join(first_component);
        if top_level.exists() {
            if let Err(error) = std::fs::remove_dir_all(&top_level) {
                tracing::warn!(
                    "Could not remove download directory {}: {error}",
                    top_level.display()
                );
            }
        }
    }
}

/// Removes a single acquired file if it landed on disk.
pub fn remove_file_if_present(path: &Path) {
    if !path.exists() {
        return;
    }

    if let Err(error) = std::fs::remove_file(path) {
        tracing::warn!("Could not remove file {}: {error}", path.display());
    }
}

fn first_path_component(relative: &str) -> Option<&str> {
    relative.split('/').find(|component| !component.is_empty())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn library(work_dir: &Path) -> LibraryConfig {
        LibraryConfig {
            work_dir: work_dir.to_path_buf(),
            ..LibraryConfig::default()
        }
    }

    #[test]
    fn test_remove_download_tree_deletes_top_level_dir() {
        let dir = tempfile::tempdir().unwrap();
        let library = library(dir.path());

        let nested = library.downloads_dir().join("Movie.2020/Subs");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(library.downloads_dir().join("Movie.2020/movie.mkv"), b"x").unwrap();
        std::fs::write(nested.join("movie.srt"), b"x").unwrap();

        remove_download_tree(&library, &["Movie.2020/movie.mkv".to_string()]);

        assert!(!library.downloads_dir().join("Movie.2020").exists());
    }

    #[test]
    fn test_remove_download_tree_tolerates_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let library = library(dir.path());
        std::fs::create_dir_all(library.downloads_dir()).unwrap();

        remove_download_tree(&library, &["Gone/away.mkv".to_string()]);
    }

    #[test]
    fn test_remove_file_if_present() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("small.txt");
        std::fs::write(&path, b"tiny").unwrap();

        remove_file_if_present(&path);
        assert!(!path.exists());

        // Second removal is a no-op.
        remove_file_if_present(&path);
    }
}
