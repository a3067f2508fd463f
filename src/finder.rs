//! Fast Finder (C5): a bounded-depth, concurrency-bounded filesystem walk producing executable
//! candidates matching a name set.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Semaphore};

/// Options controlling which files qualify as candidates.
#[derive(Clone, Debug, Default)]
pub struct FinderOptions {
    /// Require the entry to have executable permission (inferred from extension on Windows).
    pub executable: bool,
    /// Extensions stripped from a file name, in order, before comparing its stem against the
    /// name set. Only consulted on Windows.
    pub executable_extensions: Vec<String>,
}

struct Inner {
    names: HashSet<String>,
    options: FinderOptions,
    sender: mpsc::UnboundedSender<PathBuf>,
    seen: Mutex<HashSet<PathBuf>>,
    dir_semaphore: Arc<Semaphore>,
}

/// The scan-issuing handle. Cheap to clone; every clone shares the same dedup set and output
/// channel, so issuing the same root from two clones still yields each match once.
#[derive(Clone)]
pub struct Finder {
    inner: Arc<Inner>,
}

/// The consumer side of a [`Finder`]. Ends once every [`Finder`] handle has been dropped and
/// every in-flight `scan` call has finished — i.e. once all pending scans are drained.
pub struct FinderStream {
    receiver: mpsc::UnboundedReceiver<PathBuf>,
}

impl FinderStream {
    pub async fn next(&mut self) -> Option<PathBuf> {
        self.receiver.recv().await
    }

    /// Drains the remaining stream into a `Vec`, for callers that want every candidate instead
    /// of processing them incrementally.
    pub async fn collect(mut self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        while let Some(path) = self.next().await {
            out.push(path);
        }
        out
    }
}

impl Finder {
    /// Creates a finder for the given executable `names`, backed by a directory-read semaphore
    /// sized `max_concurrent_directory_reads` (see `EngineConfig`).
    pub fn new(
        names: impl IntoIterator<Item = String>,
        options: FinderOptions,
        max_concurrent_directory_reads: usize,
    ) -> (Self, FinderStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            names: names.into_iter().collect(),
            options,
            sender,
            seen: Mutex::new(HashSet::new()),
            dir_semaphore: Arc::new(Semaphore::new(max_concurrent_directory_reads.max(1))),
        });
        (Self { inner }, FinderStream { receiver })
    }

    /// Schedules a breadth-first walk of `root` to `depth` (0 = root directory only). Returns
    /// immediately; the walk runs on the current `tokio` runtime. May be called again after
    /// iteration of the paired [`FinderStream`] has begun.
    pub fn scan(&self, depth: usize, root: impl Into<PathBuf>) {
        let inner = self.inner.clone();
        let root = root.into();
        tokio::spawn(async move {
            walk(inner, root, depth).await;
        });
    }

    /// Convenience for scanning several roots at the given depth.
    pub fn scan_all(&self, depth: usize, roots: impl IntoIterator<Item = PathBuf>) {
        for root in roots {
            self.scan(depth, root);
        }
    }
}

async fn walk(inner: Arc<Inner>, root: PathBuf, depth: usize) {
    let mut queue = VecDeque::new();
    queue.push_back((root, depth));

    while let Some((dir, remaining)) = queue.pop_front() {
        // The stream was dropped: nothing downstream can observe further matches, so stop
        // acquiring more directory-read permits rather than walking the rest of the tree.
        if inner.sender.is_closed() {
            return;
        }

        let Ok(permit) = inner.dir_semaphore.clone().acquire_owned().await else {
            return;
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };

        let mut subdirs = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(_) => break,
            };

            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };

            let path = entry.path();
            if file_type.is_dir() {
                if remaining > 0 {
                    subdirs.push(path);
                }
            } else if qualifies(&inner, &path).await {
                let mut seen = inner.seen.lock().unwrap();
                if seen.insert(path.clone()) {
                    drop(seen);
                    let _ = inner.sender.send(path);
                }
            }
        }

        drop(permit);
        for sub in subdirs {
            queue.push_back((sub, remaining - 1));
        }
    }
}

fn file_stem_matches(names: &HashSet<String>, extensions: &[String], path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if cfg!(windows) {
        for ext in extensions {
            if let Some(stem) = file_name.strip_suffix(ext.as_str()) {
                return names.contains(stem);
            }
        }
        names.contains(file_name)
    } else {
        names.contains(file_name)
    }
}

async fn qualifies(inner: &Inner, path: &Path) -> bool {
    if !file_stem_matches(&inner.names, &inner.options.executable_extensions, path) {
        return false;
    }
    if !inner.options.executable {
        return true;
    }
    if cfg!(windows) {
        // Executability on Windows is inferred purely from the extension already matched above.
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }
    #[cfg(not(unix))]
    {
        true
    }
}
