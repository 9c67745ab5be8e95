use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::UNIX_EPOCH;

use tokio::fs;

use crate::error::FileGuardError;
use crate::patch::{structured_patch, PatchHunk};
use crate::text::{LineEnding, TextEncoding};

type Result<T> = std::result::Result<T, FileGuardError>;

/// Zero-based line offset plus an optional line count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineRange {
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub path: PathBuf,
    /// Requested slice, lines joined with `\n`.
    pub content: String,
    /// 1-based number of the first line in `content`.
    pub start_line: usize,
    pub total_lines: usize,
    pub encoding: TextEncoding,
    pub line_ending: LineEnding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
}

impl WriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub kind: WriteKind,
    pub path: PathBuf,
    /// Content as written, after line-ending normalization.
    pub content: String,
    /// Empty for newly created files.
    pub structured_patch: Vec<PatchHunk>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    content: String,
    modified_ms: u128,
}

/// Read-before-write and staleness bookkeeping for one working directory.
///
/// Relative paths are resolved against `base_dir`. Operations on the same
/// absolute path are serialized; different paths proceed concurrently.
#[derive(Debug)]
pub struct FileGuard {
    base_dir: PathBuf,
    snapshots: Mutex<HashMap<PathBuf, Snapshot>>,
    path_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileGuard {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            snapshots: Mutex::new(HashMap::new()),
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };
        clean_path(&joined)
    }

    pub async fn read(&self, path: impl AsRef<Path>, range: LineRange) -> Result<ReadResult> {
        let path = self.resolve(path);
        let lock = self.path_lock(&path);
        let _held = lock.lock().await;

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(FileGuardError::NotFound { path });
            }
            Err(error) => return Err(FileGuardError::io("reading metadata of", path, error)),
        };
        if !metadata.is_file() {
            return Err(FileGuardError::NotAFile { path });
        }

        let bytes = fs::read(&path)
            .await
            .map_err(|error| FileGuardError::io("reading", &path, error))?;
        let encoding = TextEncoding::detect(&bytes);
        let content = encoding.decode(&bytes);
        let line_ending = LineEnding::detect(&content);
        let modified_ms = modified_ms(&metadata).map_err(|error| FileGuardError::io("reading metadata of", &path, error))?;

        let (slice, total_lines) = slice_lines(&content, range);
        self.record(&path, content, modified_ms);
        tracing::debug!(path = %path.display(), total_lines, encoding = encoding.as_str(), "file read");

        Ok(ReadResult {
            path,
            content: slice,
            start_line: range.offset + 1,
            total_lines,
            encoding,
            line_ending,
        })
    }

    pub async fn write(&self, path: impl AsRef<Path>, content: &str) -> Result<WriteResult> {
        let path = self.resolve(path);
        let lock = self.path_lock(&path);
        let _held = lock.lock().await;
        self.write_locked(path, content).await
    }

    /// Substitutes `old` with `new` in the content captured by the last read.
    /// Without `replace_all` the needle must occur exactly once.
    pub async fn edit(
        &self,
        path: impl AsRef<Path>,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<WriteResult> {
        let path = self.resolve(path);
        let lock = self.path_lock(&path);
        let _held = lock.lock().await;

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(FileGuardError::NotFound { path });
            }
            Err(error) => return Err(FileGuardError::io("reading metadata of", path, error)),
        };
        if !metadata.is_file() {
            return Err(FileGuardError::NotAFile { path });
        }
        let snapshot = self.fresh_snapshot(&path, &metadata)?;

        if old.is_empty() {
            return Err(FileGuardError::EmptyNeedle { path });
        }
        let count = snapshot.content.matches(old).count();
        if count == 0 {
            return Err(FileGuardError::StringNotFound {
                path,
                needle: old.to_string(),
            });
        }
        if count > 1 && !replace_all {
            return Err(FileGuardError::AmbiguousEdit { path, count });
        }

        let updated = if replace_all {
            snapshot.content.replace(old, new)
        } else {
            snapshot.content.replacen(old, new, 1)
        };
        self.write_locked(path, &updated).await
    }

    pub fn has_been_read(&self, path: impl AsRef<Path>) -> bool {
        let path = self.resolve(path);
        lock_unpoisoned(&self.snapshots).contains_key(&path)
    }

    /// Content captured by the last read or write of `path`.
    pub fn cached_content(&self, path: impl AsRef<Path>) -> Option<String> {
        let path = self.resolve(path);
        lock_unpoisoned(&self.snapshots)
            .get(&path)
            .map(|snapshot| snapshot.content.clone())
    }

    /// Forgets the snapshot for `path`, or every snapshot when `None`.
    pub fn clear(&self, path: Option<&Path>) {
        let mut snapshots = lock_unpoisoned(&self.snapshots);
        match path {
            Some(path) => {
                snapshots.remove(&self.resolve(path));
            }
            None => snapshots.clear(),
        }
    }

    async fn write_locked(&self, path: PathBuf, content: &str) -> Result<WriteResult> {
        let existing = match fs::metadata(&path).await {
            Ok(metadata) => Some(metadata),
            Err(error) if error.kind() == ErrorKind::NotFound => None,
            Err(error) => return Err(FileGuardError::io("reading metadata of", path, error)),
        };

        let (original, encoding, line_ending) = match existing {
            Some(metadata) => {
                if !metadata.is_file() {
                    return Err(FileGuardError::NotAFile { path });
                }
                self.fresh_snapshot(&path, &metadata)?;
                let bytes = fs::read(&path)
                    .await
                    .map_err(|error| FileGuardError::io("reading", &path, error))?;
                let encoding = TextEncoding::detect(&bytes);
                let original = encoding.decode(&bytes);
                let line_ending = LineEnding::detect(&original);
                (Some(original), encoding, line_ending)
            }
            None => (None, TextEncoding::default(), LineEnding::platform_default()),
        };

        let normalized = line_ending.normalize(content);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|error| FileGuardError::io("creating parent directories of", &path, error))?;
        }
        fs::write(&path, encoding.encode(&normalized))
            .await
            .map_err(|error| FileGuardError::io("writing", &path, error))?;

        let metadata = fs::metadata(&path)
            .await
            .map_err(|error| FileGuardError::io("reading metadata of", &path, error))?;
        let modified = modified_ms(&metadata).map_err(|error| FileGuardError::io("reading metadata of", &path, error))?;
        self.record(&path, normalized.clone(), modified);

        let (kind, patch) = match original {
            Some(original) => (WriteKind::Update, structured_patch(&original, &normalized)),
            None => (WriteKind::Create, Vec::new()),
        };
        tracing::debug!(path = %path.display(), kind = kind.as_str(), hunks = patch.len(), "file written");

        Ok(WriteResult {
            kind,
            path,
            content: normalized,
            structured_patch: patch,
        })
    }

    fn fresh_snapshot(&self, path: &Path, metadata: &std::fs::Metadata) -> Result<Snapshot> {
        let Some(snapshot) = lock_unpoisoned(&self.snapshots).get(path).cloned() else {
            return Err(FileGuardError::Unread {
                path: path.to_path_buf(),
            });
        };
        let current = modified_ms(metadata).map_err(|error| FileGuardError::io("reading metadata of", path, error))?;
        if current != snapshot.modified_ms {
            tracing::debug!(
                path = %path.display(),
                recorded = snapshot.modified_ms,
                current,
                "file changed since last read"
            );
            return Err(FileGuardError::ExternallyModified {
                path: path.to_path_buf(),
            });
        }
        Ok(snapshot)
    }

    fn record(&self, path: &Path, content: String, modified_ms: u128) {
        lock_unpoisoned(&self.snapshots).insert(path.to_path_buf(), Snapshot { content, modified_ms });
    }

    fn path_lock(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        lock_unpoisoned(&self.path_locks)
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }
}

fn slice_lines(content: &str, range: LineRange) -> (String, usize) {
    let lines: Vec<&str> = content
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    let total = lines.len();
    if range.offset == 0 && range.limit.is_none() {
        return (lines.join("\n"), total);
    }
    let start = range.offset.min(total);
    let end = range
        .limit
        .map_or(total, |limit| start.saturating_add(limit).min(total));
    (lines[start..end].join("\n"), total)
}

fn modified_ms(metadata: &std::fs::Metadata) -> std::io::Result<u128> {
    let modified = metadata.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis())
}

fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(cleaned.components().next_back(), Some(Component::Normal(_))) {
                    cleaned.pop();
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
