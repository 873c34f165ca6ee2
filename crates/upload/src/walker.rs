//! Recursive, name-sorted enumeration of the files to upload.

use std::path::{Component, Path, PathBuf};

use docpush_transfer::LocalFile;
use walkdir::{DirEntry, WalkDir};

use crate::error::UploadError;
use crate::types::WalkOptions;

/// Lazy walk over the regular files under a root directory.
///
/// Symbolic links are not followed. An entry that cannot be read yields an
/// error for that entry and the walk moves on.
pub struct FileWalker {
    root: PathBuf,
    options: WalkOptions,
    inner: walkdir::IntoIter,
}

impl FileWalker {
    /// Checks that `root` is a readable directory and prepares the walk.
    pub fn new(root: impl Into<PathBuf>, options: WalkOptions) -> Result<Self, UploadError> {
        let root = root.into();
        let meta = std::fs::metadata(&root).map_err(|e| UploadError::local_io(&root, e))?;
        if !meta.is_dir() {
            return Err(UploadError::local_io(
                &root,
                std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
            ));
        }
        // Surface permission problems at construction, not as the first item.
        std::fs::read_dir(&root).map_err(|e| UploadError::local_io(&root, e))?;

        let inner = WalkDir::new(&root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        Ok(Self {
            root,
            options,
            inner,
        })
    }

    fn is_skipped(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        (self.options.skip_hidden && name.starts_with('.'))
            || self.options.exclude.iter().any(|x| *x == name)
    }

    fn to_local_file(&self, entry: &DirEntry) -> Result<LocalFile, UploadError> {
        let meta = entry
            .metadata()
            .map_err(|e| UploadError::local_io(entry.path(), walk_io_error(e)))?;
        Ok(LocalFile {
            path: entry.path().to_path_buf(),
            size: meta.len(),
            relative_path: relative_path(&self.root, entry.path()),
        })
    }
}

impl Iterator for FileWalker {
    type Item = Result<LocalFile, UploadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                    return Some(Err(UploadError::local_io(path, walk_io_error(e))));
                }
            };

            if self.is_skipped(&entry) {
                if entry.file_type().is_dir() {
                    self.inner.skip_current_dir();
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            return Some(self.to_local_file(&entry));
        }
    }
}

/// Number of files a walk of `root` with `options` would yield, errors
/// included.
pub fn count_files(root: impl Into<PathBuf>, options: &WalkOptions) -> Result<usize, UploadError> {
    Ok(FileWalker::new(root, options.clone())?.count())
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn walk_io_error(err: walkdir::Error) -> std::io::Error {
    let message = err.to_string();
    err.into_io_error()
        .unwrap_or_else(|| std::io::Error::other(message))
}
