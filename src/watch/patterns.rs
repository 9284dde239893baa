// src/watch/patterns.rs

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::model::WatchConfig;
use crate::fs::FileSystem;

/// Ignores added to every watch target unless `use_default_ignores = false`.
///
/// Build output and VCS metadata must never trigger a rebuild, otherwise the
/// build's own writes would loop forever.
pub const DEFAULT_IGNORES: &[&str] = &[
    "**/target",
    "**/target/**",
    "**/.git",
    "**/.git/**",
    ".watchrun",
    ".watchrun/**",
    "**/*.swp",
    "**/*.swx",
    "**/*~",
    "**/.#*",
];

/// Root directory plus compiled include / ignore globs.
///
/// Patterns are evaluated against paths relative to the root with forward
/// slashes (e.g. `"src/main.rs"`).
#[derive(Clone)]
pub struct WatchTarget {
    root: PathBuf,
    /// `None` means every path is included.
    include_set: Option<GlobSet>,
    ignore_set: GlobSet,
    use_hash: bool,
}

impl fmt::Debug for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchTarget")
            .field("root", &self.root)
            .field("use_hash", &self.use_hash)
            .finish_non_exhaustive()
    }
}

impl WatchTarget {
    pub fn new(
        root: impl Into<PathBuf>,
        include: &[String],
        ignore: &[String],
        use_hash: bool,
    ) -> Result<Self> {
        let include_set = if include.is_empty() {
            None
        } else {
            Some(build_globset(include).context("building include globset")?)
        };
        let ignore_set = build_globset(ignore).context("building ignore globset")?;

        Ok(Self {
            root: root.into(),
            include_set,
            ignore_set,
            use_hash,
        })
    }

    /// Build a target for `root` from the validated `[watch]` section.
    pub fn from_config(root: impl Into<PathBuf>, cfg: &WatchConfig) -> Result<Self> {
        Self::new(root, &cfg.include, &cfg.ignore, cfg.use_hash)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether created/modified events are filtered by content hash.
    pub fn use_hash(&self) -> bool {
        self.use_hash
    }

    /// True if `rel_path` matches an ignore pattern.
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        self.ignore_set.is_match(rel_path)
    }

    /// Returns true if a change to `rel_path` should be reported.
    pub fn matches(&self, rel_path: &str) -> bool {
        if self.is_ignored(rel_path) {
            return false;
        }
        match &self.include_set {
            Some(include) => include.is_match(rel_path),
            None => true,
        }
    }
}

/// Build a GlobSet from simple string patterns.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Collect all files under the target's root that a change would be reported
/// for. Ignored directories are not descended into.
pub fn collect_matching_files(fs: &dyn FileSystem, target: &WatchTarget) -> Result<Vec<PathBuf>> {
    let root = target.root();
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for path in fs.read_dir(&dir)? {
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let rel_str = rel.to_string_lossy().replace('\\', "/");

            if fs.is_dir(&path) {
                if !target.is_ignored(&rel_str) {
                    stack.push(path);
                }
            } else if fs.is_file(&path) && target.matches(&rel_str) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
