use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Lazily walk `root` for image files, recursing into subdirectories.
///
/// Entries come out in file-name order, so two walks over an unchanged tree
/// yield the same sequence. Hidden entries below the root are skipped.
pub fn walk_images<'a>(
    root: &Path,
    extensions: &'a [String],
) -> impl Iterator<Item = PathBuf> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(move |entry| has_image_extension(entry.path(), extensions))
        .map(|entry| entry.into_path())
}

/// Collect every image under `root`, sorted by path.
pub fn discover_images(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = walk_images(root, extensions).collect();
    images.sort();
    images
}

pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    match path.extension() {
        Some(ext) => {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            extensions.iter().any(|e| e.to_lowercase() == ext_lower)
        }
        None => false,
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
