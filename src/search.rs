//! Document lookup across configured search directories

use std::path::{Path, PathBuf};

/// Ordered list of directories consulted when locating a document.
/// An absolute path is returned verbatim; otherwise the caller's current
/// directory (the including document's directory) is searched first.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    dirs: Vec<PathBuf>,
}

impl SearchPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push(dir.into());
    }

    fn candidates<'a>(
        &'a self,
        current_dir: Option<&'a Path>,
    ) -> impl Iterator<Item = &'a Path> {
        current_dir
            .into_iter()
            .chain(self.dirs.iter().map(PathBuf::as_path))
    }

    /// First existing match, or `None`
    pub fn locate(&self, filename: &str, current_dir: Option<&Path>) -> Option<PathBuf> {
        let name = Path::new(filename);
        if name.is_absolute() {
            return Some(name.to_path_buf());
        }
        self.candidates(current_dir)
            .map(|d| d.join(name))
            .find(|p| p.exists())
    }

    /// Every existing match, in search order
    pub fn locate_all(&self, filename: &str, current_dir: Option<&Path>) -> Vec<PathBuf> {
        let name = Path::new(filename);
        if name.is_absolute() {
            return vec![name.to_path_buf()];
        }
        self.candidates(current_dir)
            .map(|d| d.join(name))
            .filter(|p| p.exists())
            .collect()
    }
}
