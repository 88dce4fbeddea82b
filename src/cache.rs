//! File-mode cache: skips recompiling outputs whose sources and options
//! have not changed since the last run

use crate::error::{CrushError, Result};
use crate::filesystem::FileSystem;
use crate::types::{Options, CACHE_FILE_NAME};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What one output was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// The host file followed by every inlined import
    pub imports: Vec<PathBuf>,
    /// Sum of the modification times of `imports`
    pub datem_sum: u64,
    pub options: Options,
}

impl CacheRecord {
    pub fn new(imports: Vec<PathBuf>, fs: &dyn FileSystem, options: &Options) -> Self {
        let datem_sum = datem_sum(&imports, fs).unwrap_or(0);
        Self {
            imports,
            datem_sum,
            options: options.clone(),
        }
    }
}

/// Sum of modification times; `None` when any file is gone
pub fn datem_sum(paths: &[PathBuf], fs: &dyn FileSystem) -> Option<u64> {
    paths.iter().map(|p| fs.mtime(p)).sum()
}

/// Records keyed by output file name, stored next to the outputs
#[derive(Debug, Default)]
pub struct CacheStore {
    path: PathBuf,
    records: IndexMap<String, CacheRecord>,
}

impl CacheStore {
    /// Load the store of `dir`. An unreadable store starts empty.
    pub fn load(fs: &dyn FileSystem, dir: &Path) -> Self {
        let path = dir.join(CACHE_FILE_NAME);
        let records = if fs.exists(&path) {
            match fs.read(&path).map_err(CrushError::from).and_then(|text| parse(&text)) {
                Ok(records) => records,
                Err(e) => {
                    log::warn!("Ignoring cache file {}: {}", path.display(), e);
                    IndexMap::new()
                }
            }
        } else {
            IndexMap::new()
        };
        Self { path, records }
    }

    pub fn get(&self, output_name: &str) -> Option<&CacheRecord> {
        self.records.get(output_name)
    }

    pub fn insert(&mut self, output_name: impl Into<String>, record: CacheRecord) {
        self.records.insert(output_name.into(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when `output` exists and was built from the same files, with the
    /// same modification times, under the same options
    pub fn is_fresh(&self, fs: &dyn FileSystem, output_name: &str, output: &Path, options: &Options) -> bool {
        let Some(record) = self.get(output_name) else {
            return false;
        };
        if record.options != *options || !fs.exists(output) {
            return false;
        }
        datem_sum(&record.imports, fs) == Some(record.datem_sum)
    }

    pub fn save(&self, fs: &dyn FileSystem) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records)
            .map_err(|e| CrushError::cache(format!("Failed to serialize cache: {}", e)))?;
        fs.write(&self.path, &json)?;
        log::debug!("Saved {} cache records to {}", self.records.len(), self.path.display());
        Ok(())
    }
}

fn parse(text: &str) -> Result<IndexMap<String, CacheRecord>> {
    serde_json::from_str(text).map_err(|e| CrushError::cache(format!("Invalid cache file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemoryFs;

    fn fixture() -> MemoryFs {
        let fs = MemoryFs::new();
        fs.insert("/css/main.css", "@import 'a.css';", 10);
        fs.insert("/css/a.css", "a{}", 5);
        fs.insert("/css/main.compiled.css", "a{}", 20);
        fs
    }

    fn record(fs: &MemoryFs) -> CacheRecord {
        let imports = vec![PathBuf::from("/css/main.css"), PathBuf::from("/css/a.css")];
        CacheRecord::new(imports, fs, &Options::default())
    }

    #[test]
    fn test_fresh_until_a_source_changes() {
        let fs = fixture();
        let mut store = CacheStore::load(&fs, Path::new("/css"));
        assert!(store.is_empty());
        let record = record(&fs);
        assert_eq!(record.datem_sum, 15);
        store.insert("main.compiled.css", record);

        let output = Path::new("/css/main.compiled.css");
        assert!(store.is_fresh(&fs, "main.compiled.css", output, &Options::default()));
        assert!(!store.is_fresh(&fs, "main.compiled.css", output, &Options::pretty()));

        fs.insert("/css/a.css", "b{}", 6);
        assert!(!store.is_fresh(&fs, "main.compiled.css", output, &Options::default()));
    }

    #[test]
    fn test_save_and_reload() {
        let fs = fixture();
        let mut store = CacheStore::load(&fs, Path::new("/css"));
        store.insert("main.compiled.css", record(&fs));
        store.save(&fs).unwrap();

        let reloaded = CacheStore::load(&fs, Path::new("/css"));
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("main.compiled.css"), store.get("main.compiled.css"));
    }

    #[test]
    fn test_corrupt_store_starts_empty() {
        let fs = fixture();
        fs.insert("/css/.cssforge-cache.json", "{ not json", 1);
        assert!(CacheStore::load(&fs, Path::new("/css")).is_empty());
    }
}
