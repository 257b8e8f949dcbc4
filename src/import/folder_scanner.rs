//! Recursive folder scanner deriving ingestion candidates from file layout.
//!
//! Expected layout is `<root>/.../<album>/<performer> - <title>.<ext>`: the
//! album comes from the parent directory, the title from the file name, and
//! the performer from the caller.

use crate::import::types::{IngestionCandidate, ScanError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["flac", "mp3", "wav", "m4a", "aac", "ogg"];

/// Check if a file is an audio file based on extension
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Strip a leading `"<performer> - "` from a file stem, if present
pub fn strip_performer_prefix<'a>(stem: &'a str, performer: &str) -> &'a str {
    stem.strip_prefix(performer)
        .and_then(|rest| rest.strip_prefix(" - "))
        .unwrap_or(stem)
}

/// Scanner over one source tree for one performer
///
/// Each call to [`FolderScanner::candidates`] starts a fresh walk, so the
/// scan can be restarted. Order follows filesystem enumeration and is not
/// stable across runs or platforms.
#[derive(Debug, Clone)]
pub struct FolderScanner {
    root: PathBuf,
    performer: String,
}

impl FolderScanner {
    pub fn new(root: impl Into<PathBuf>, performer: impl Into<String>) -> Self {
        FolderScanner {
            root: root.into(),
            performer: performer.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the tree, yielding one item per audio file or failed path
    ///
    /// Unreadable files are reported and skipped; an unreadable directory is
    /// reported and its subtree skipped. Neither stops the walk.
    pub fn candidates(&self) -> impl Iterator<Item = Result<IngestionCandidate, ScanError>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) => {
                    if !entry.file_type().is_file() || !is_audio_file(entry.path()) {
                        return None;
                    }
                    Some(self.derive_candidate(entry.path()))
                }
                Err(e) => Some(Err(walk_error(e))),
            })
    }

    /// Build a candidate from one audio file path
    fn derive_candidate(&self, path: &Path) -> Result<IngestionCandidate, ScanError> {
        let file_error = |reason: String| ScanError::File {
            path: path.to_path_buf(),
            reason,
        };

        // Surface permission problems here rather than mid-upload
        fs::File::open(path).map_err(|e| file_error(e.to_string()))?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| file_error("File name is not valid UTF-8".to_string()))?;

        let album = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .ok_or_else(|| file_error("Cannot derive album from parent directory".to_string()))?;

        let name = strip_performer_prefix(stem, &self.performer);
        debug!("Scanned {:?} -> {} / {}", path, album, name);

        Ok(IngestionCandidate {
            source_path: path.to_path_buf(),
            name: name.to_string(),
            album: album.to_string(),
            singer: self.performer.clone(),
        })
    }
}

/// Classify a walkdir failure as a file or directory problem
fn walk_error(error: walkdir::Error) -> ScanError {
    let path = error.path().map(Path::to_path_buf).unwrap_or_default();
    let reason = error.to_string();
    warn!("Scan error at {:?}: {}", path, reason);

    if path.is_dir() {
        ScanError::Directory { path, reason }
    } else {
        ScanError::File { path, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"audio").unwrap();
    }

    fn scan(scanner: &FolderScanner) -> (Vec<IngestionCandidate>, Vec<ScanError>) {
        let mut candidates = Vec::new();
        let mut errors = Vec::new();
        for item in scanner.candidates() {
            match item {
                Ok(c) => candidates.push(c),
                Err(e) => errors.push(e),
            }
        }
        candidates.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        (candidates, errors)
    }

    #[test]
    fn test_is_audio_file() {
        assert!(is_audio_file(Path::new("track.flac")));
        assert!(is_audio_file(Path::new("track.mp3")));
        assert!(is_audio_file(Path::new("track.FLAC")));
        assert!(!is_audio_file(Path::new("cover.jpg")));
        assert!(!is_audio_file(Path::new("notes.txt")));
        assert!(!is_audio_file(Path::new("mp3")));
    }

    #[test]
    fn test_strip_performer_prefix() {
        assert_eq!(strip_performer_prefix("Singer - Song", "Singer"), "Song");
        assert_eq!(strip_performer_prefix("Song", "Singer"), "Song");
        assert_eq!(strip_performer_prefix("Other - Song", "Singer"), "Other - Song");
        assert_eq!(strip_performer_prefix("Singer-Song", "Singer"), "Singer-Song");
    }

    #[test]
    fn test_derives_candidate_from_layout() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("AlbumX").join("Singer - Song.mp3");
        touch(&file);

        let scanner = FolderScanner::new(temp_dir.path(), "Singer");
        let (candidates, errors) = scan(&scanner);

        assert!(errors.is_empty());
        assert_eq!(
            candidates,
            vec![IngestionCandidate {
                source_path: file,
                name: "Song".to_string(),
                album: "AlbumX".to_string(),
                singer: "Singer".to_string(),
            }]
        );
    }

    #[test]
    fn test_skips_non_audio_and_recurses() {
        let temp_dir = TempDir::new().unwrap();
        touch(&temp_dir.path().join("AlbumX").join("cover.jpg"));
        touch(&temp_dir.path().join("AlbumX").join("01 Intro.flac"));
        touch(&temp_dir.path().join("Box").join("Disc 2").join("Singer - Outro.ogg"));

        let scanner = FolderScanner::new(temp_dir.path(), "Singer");
        let (candidates, errors) = scan(&scanner);

        assert!(errors.is_empty());
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name, "01 Intro");
        assert_eq!(candidates[0].album, "AlbumX");
        assert_eq!(candidates[1].name, "Outro");
        assert_eq!(candidates[1].album, "Disc 2");
    }

    #[test]
    fn test_scan_is_restartable() {
        let temp_dir = TempDir::new().unwrap();
        touch(&temp_dir.path().join("A").join("x.mp3"));
        touch(&temp_dir.path().join("B").join("y.mp3"));

        let scanner = FolderScanner::new(temp_dir.path(), "Singer");
        assert_eq!(scanner.candidates().count(), 2);
        assert_eq!(scanner.candidates().count(), 2);
    }

    #[test]
    fn test_missing_root_reports_error() {
        let temp_dir = TempDir::new().unwrap();
        let scanner = FolderScanner::new(temp_dir.path().join("missing"), "Singer");
        let (candidates, errors) = scan(&scanner);

        assert!(candidates.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_skips_only_its_subtree() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        touch(&temp_dir.path().join("Open").join("a.mp3"));
        let locked = temp_dir.path().join("Locked");
        touch(&locked.join("b.mp3"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not bind root
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let scanner = FolderScanner::new(temp_dir.path(), "Singer");
        let (candidates, errors) = scan(&scanner);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "a");
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ScanError::Directory { .. }));
    }
}
