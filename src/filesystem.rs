//! File-system adapter used for imports, outputs and the cache store

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::UNIX_EPOCH;

/// The file operations the compiler needs
pub trait FileSystem: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    /// Modification time in seconds since the epoch
    fn mtime(&self, path: &Path) -> Option<u64>;
}

/// The real file system
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        fs::write(path, contents)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn mtime(&self, path: &Path) -> Option<u64> {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
    }
}

/// In-memory file system for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: RwLock<HashMap<PathBuf, (String, u64)>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<String>, mtime: u64) {
        if let Ok(mut files) = self.files.write() {
            files.insert(path.into(), (contents.into(), mtime));
        }
    }
}

impl FileSystem for MemoryFs {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.files
            .read()
            .ok()
            .and_then(|files| files.get(path).map(|(c, _)| c.clone()))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut files = self
            .files
            .write()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory file system poisoned"))?;
        let mtime = files.get(path).map(|(_, m)| m + 1).unwrap_or(1);
        files.insert(path.to_path_buf(), (contents.to_string(), mtime));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files
            .read()
            .map(|files| files.contains_key(path) || files.keys().any(|p| p.starts_with(path)))
            .unwrap_or(false)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.files
            .read()
            .map(|files| files.keys().any(|p| p != path && p.starts_with(path)))
            .unwrap_or(false)
    }

    fn mtime(&self, path: &Path) -> Option<u64> {
        self.files.read().ok()?.get(path).map(|(_, m)| *m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_fs_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.css");
        let fs = LocalFs;
        fs.write(&path, "a{}").unwrap();
        assert!(fs.exists(&path));
        assert_eq!(fs.read(&path).unwrap(), "a{}");
        assert!(fs.mtime(&path).is_some());
        assert!(fs.is_dir(temp_dir.path()));
    }

    #[test]
    fn test_memory_fs() {
        let fs = MemoryFs::new();
        fs.insert("/css/a.css", "a{}", 10);
        assert_eq!(fs.read(Path::new("/css/a.css")).unwrap(), "a{}");
        assert_eq!(fs.mtime(Path::new("/css/a.css")), Some(10));
        assert!(fs.is_dir(Path::new("/css")));
        assert!(fs.read(Path::new("/css/missing.css")).is_err());
        fs.write(Path::new("/css/a.css"), "b{}").unwrap();
        assert_eq!(fs.mtime(Path::new("/css/a.css")), Some(11));
    }
}
