use crate::SUPPORTED_EXTENSIONS;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Audio directory not found: {}", .0.display())]
    MissingDir(PathBuf),
    #[error("Not a directory: {}", .0.display())]
    NotADir(PathBuf),
}

/// Collect supported audio files under `dir`, recursively, sorted by path.
///
/// Unreadable directory entries are logged and skipped.
pub fn find_audio_files(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    if !dir.exists() {
        return Err(ScanError::MissingDir(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(ScanError::NotADir(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Error scanning {}: {}", dir.display(), e);
                continue;
            }
        };
        if entry.file_type().is_file() && is_supported(entry.path()) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    log::info!("Found {} audio files under {}", files.len(), dir.display());
    Ok(files)
}

pub fn is_supported(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter_is_case_insensitive() {
        assert!(is_supported(Path::new("/a/b/Song.MP3")));
        assert!(is_supported(Path::new("take2.flac")));
        assert!(is_supported(Path::new("x.wav")));
        assert!(!is_supported(Path::new("cover.jpg")));
        assert!(!is_supported(Path::new("README")));
    }

    #[test]
    fn test_finds_nested_audio_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("live");
        std::fs::create_dir(&sub).unwrap();
        for name in ["b.wav", "a.mp3", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::write(sub.join("c.flac"), b"").unwrap();

        let files = find_audio_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, ["a.mp3", "b.wav", &format!("live{}c.flac", std::path::MAIN_SEPARATOR)]);
    }

    #[test]
    fn test_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_audio_files(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ScanError::MissingDir(_)));
    }
}
