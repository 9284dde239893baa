// src/watch/hash.rs

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::debug;

use crate::fs::FileSystem;
use crate::watch::patterns::{collect_matching_files, WatchTarget};

/// Compute the blake3 hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Last-seen content hash per watched file.
///
/// Used when `use_hash = true` so that saving a file without changing its
/// bytes does not cause a rebuild.
#[derive(Debug, Default)]
pub struct ContentHashes {
    hashes: HashMap<PathBuf, String>,
}

impl ContentHashes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash every file the target currently watches. Returns how many files
    /// were recorded.
    pub fn prime(&mut self, fs: &dyn FileSystem, target: &WatchTarget) -> Result<usize> {
        let files = collect_matching_files(fs, target)?;
        for path in files {
            match compute_file_hash(fs, &path) {
                Ok(hash) => {
                    self.hashes.insert(path, hash);
                }
                Err(err) => debug!(?path, error = %err, "skipping unreadable file while priming"),
            }
        }
        Ok(self.hashes.len())
    }

    /// Record the current contents of `path`.
    ///
    /// Returns `true` if the contents differ from the last recorded hash (or
    /// the file was never seen), `false` if they are identical.
    pub fn record(&mut self, fs: &dyn FileSystem, path: &Path) -> Result<bool> {
        let hash = compute_file_hash(fs, path)?;
        match self.hashes.insert(path.to_path_buf(), hash.clone()) {
            Some(previous) if previous == hash => Ok(false),
            _ => Ok(true),
        }
    }

    pub fn forget(&mut self, path: &Path) {
        if self.hashes.remove(path).is_some() {
            debug!(?path, "forgot content hash");
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
