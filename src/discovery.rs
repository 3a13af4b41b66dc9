use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

/// Files under `directory` whose extension matches one of `extensions`
/// (case-insensitive), sorted by path. Only the top level is searched unless
/// `recursive` is set.
pub fn discover_files(directory: &Path, extensions: &[&str], recursive: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(directory).follow_links(false).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| has_extension(path, extensions))
        .collect();

    // Sort by path for consistent ordering
    files.sort();
    files
}

pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            extensions.iter().any(|e| *e == ext)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn test_discover_files() {
        let dir = tempdir().unwrap();

        File::create(dir.path().join("b.jpg")).unwrap();
        File::create(dir.path().join("a.PNG")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();
        File::create(dir.path().join("subdir/c.jpeg")).unwrap();

        let flat = discover_files(dir.path(), IMAGE_EXTENSIONS, false);
        assert_eq!(flat.len(), 2);
        assert!(flat[0].ends_with("a.PNG"));

        let deep = discover_files(dir.path(), IMAGE_EXTENSIONS, true);
        assert_eq!(deep.len(), 3);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        assert!(discover_files(&dir.path().join("nope"), VIDEO_EXTENSIONS, true).is_empty());
    }
}
