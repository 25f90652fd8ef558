//! File inventory: relative path to modification time.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::core::{INVENTORY_FIELD_SEP, ReplacePolicy, SYNC_FILES, SYNC_KEYWORD};

/// Data files under a storage root, keyed by `/`-separated relative path.
///
/// Rebuilt by a fresh scan on every reconciliation session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    entries: BTreeMap<String, i64>,
}

impl Inventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file with its unix mtime in seconds.
    pub fn insert(&mut self, path: impl Into<String>, mtime: i64) {
        self.entries.insert(path.into(), mtime);
    }

    /// Modification time of `path`, if present.
    pub fn get(&self, path: &str) -> Option<i64> {
        self.entries.get(path).copied()
    }

    /// Whether `path` is present.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no files.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(p, t)| (p.as_str(), *t))
    }

    /// Scan `root` recursively for files ending in `suffix`.
    ///
    /// A missing root yields an empty inventory.
    pub async fn scan(root: &Path, suffix: &str) -> io::Result<Self> {
        let root = root.to_path_buf();
        let suffix = suffix.to_string();
        tokio::task::spawn_blocking(move || Self::scan_blocking(&root, &suffix))
            .await
            .map_err(io::Error::other)?
    }

    /// Blocking variant of [`scan`](Self::scan).
    pub fn scan_blocking(root: &Path, suffix: &str) -> io::Result<Self> {
        let mut inventory = Self::new();
        if !root.is_dir() {
            debug!(root = %root.display(), "storage root missing, empty inventory");
            return Ok(inventory);
        }

        let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() || !entry.file_name().to_string_lossy().ends_with(suffix)
                {
                    continue;
                }
                let Some(relative) = relative_path(root, &path) else {
                    warn!(path = %path.display(), "skipping file with non-utf8 path");
                    continue;
                };
                let mtime = unix_seconds(entry.metadata()?.modified()?);
                inventory.insert(relative, mtime);
            }
        }

        debug!(root = %root.display(), files = inventory.len(), "scanned storage root");
        Ok(inventory)
    }

    /// Inventory frame messages: the `rsync files` header, then one
    /// `path;timestamp` entry per file.
    pub fn to_messages(&self) -> Vec<String> {
        let mut messages = Vec::with_capacity(self.entries.len() + 1);
        messages.push(format!("{SYNC_KEYWORD} {SYNC_FILES}"));
        messages.extend(
            self.entries
                .iter()
                .map(|(path, mtime)| format!("{path}{INVENTORY_FIELD_SEP}{mtime}")),
        );
        messages
    }

    /// Build an inventory from entry messages, skipping malformed ones.
    ///
    /// The header must already be stripped.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut inventory = Self::new();
        for entry in entries {
            let entry = entry.as_ref();
            if entry.trim().is_empty() {
                continue;
            }
            match parse_entry(entry) {
                Some((path, mtime)) => inventory.insert(path, mtime),
                None => warn!(entry, "skipping malformed inventory entry"),
            }
        }
        inventory
    }
}

/// Parse one `path;timestamp` entry.
///
/// Timestamps may be integers or decimal fractions; fractions are truncated
/// to whole seconds.
pub fn parse_entry(entry: &str) -> Option<(String, i64)> {
    let (path, stamp) = entry.rsplit_once(INVENTORY_FIELD_SEP)?;
    let path = path.trim();
    let stamp = stamp.trim();
    if path.is_empty() {
        return None;
    }

    let mtime = match stamp.parse::<i64>() {
        Ok(secs) => secs,
        Err(_) => {
            let secs = stamp.parse::<f64>().ok().filter(|s| s.is_finite())?;
            secs.trunc() as i64
        }
    };
    Some((path.to_string(), mtime))
}

/// Paths to fetch: absent locally, or newer remotely under `policy`.
///
/// Sorted and free of duplicates.
pub fn plan(remote: &Inventory, local: &Inventory, policy: ReplacePolicy) -> Vec<String> {
    remote
        .iter()
        .filter(|(path, remote_mtime)| match local.get(path) {
            None => true,
            Some(local_mtime) => policy.should_replace(*remote_mtime, local_mtime),
        })
        .map(|(path, _)| path.to_string())
        .collect()
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}
