/*
 * Paginated listing of a single directory for the interactive browser. The OS
 * directory stream is opened on the first `load_more` call and advanced batch by
 * batch; everything surfaced so far is memoised in a path-sorted map, so a browser
 * can re-render without touching the disk again. Listed subdirectories get their own
 * enumerators on demand, which persist across batches.
 *
 * An enumerator is driven by one caller at a time and is not shared between threads.
 */
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::iter::Peekable;
use std::path::{Path, PathBuf};

pub const BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug)]
pub struct LazyDirectoryEnumerator {
    path: PathBuf,
    stream: Option<Peekable<fs::ReadDir>>,
    closed: bool,
    show_files: bool,
    entries: BTreeMap<PathBuf, EntryKind>,
    children: BTreeMap<PathBuf, LazyDirectoryEnumerator>,
}

impl LazyDirectoryEnumerator {
    pub fn new(path: PathBuf, show_files: bool) -> Self {
        LazyDirectoryEnumerator {
            path,
            stream: None,
            closed: false,
            show_files,
            entries: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /* True while entries may remain, including before the stream was first opened. */
    pub fn is_stream_open(&self) -> bool {
        !self.closed
    }

    pub fn show_files(&self) -> bool {
        self.show_files
    }

    pub fn entries(&self) -> &BTreeMap<PathBuf, EntryKind> {
        &self.entries
    }

    /*
     * Changes file visibility for subsequent batches. Hiding files drops them from the
     * memoised listing. Showing them again rewinds the stream so files skipped earlier
     * can be surfaced; entries that are already known are not returned twice.
     */
    pub fn set_show_files(&mut self, show_files: bool) {
        if self.show_files == show_files {
            return;
        }
        self.show_files = show_files;
        if show_files {
            log::debug!(
                "LazyDirectoryEnumerator: Files shown again in {:?}, rewinding listing.",
                self.path
            );
            self.stream = None;
            self.closed = false;
        } else {
            self.entries.retain(|_, kind| *kind == EntryKind::Directory);
        }
        for child in self.children.values_mut() {
            child.set_show_files(show_files);
        }
    }

    /*
     * Returns up to `BATCH_SIZE` entries that were not surfaced before. Hidden files
     * do not count towards the batch. Once the stream is exhausted it is closed and
     * further calls return an empty map without reopening it.
     */
    pub fn load_more(&mut self) -> BTreeMap<PathBuf, EntryKind> {
        let mut batch = BTreeMap::new();
        if self.closed {
            return batch;
        }
        let Some(mut stream) = self.take_stream() else {
            return batch;
        };

        while batch.len() < BATCH_SIZE {
            let Some(next) = stream.next() else {
                break;
            };
            let entry = match next {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!(
                        "LazyDirectoryEnumerator: Skipping unreadable entry in {:?}: {e}",
                        self.path
                    );
                    continue;
                }
            };
            let path = entry.path();
            if self.entries.contains_key(&path) {
                continue;
            }
            let kind = entry_kind(&entry);
            if kind == EntryKind::File && !self.show_files {
                continue;
            }
            log::trace!("LazyDirectoryEnumerator: Listed {path:?} as {kind:?}");
            self.entries.insert(path.clone(), kind);
            batch.insert(path, kind);
        }

        if stream.peek().is_none() {
            self.close_stream();
        } else {
            self.stream = Some(stream);
        }
        batch
    }

    /* Hands out the open stream, opening it on first use. */
    fn take_stream(&mut self) -> Option<Peekable<fs::ReadDir>> {
        if let Some(stream) = self.stream.take() {
            return Some(stream);
        }
        match fs::read_dir(&self.path) {
            Ok(read_dir) => {
                log::debug!("LazyDirectoryEnumerator: Opened {:?}", self.path);
                Some(read_dir.peekable())
            }
            Err(e) => {
                if e.kind() == io::ErrorKind::PermissionDenied {
                    log::warn!(
                        "LazyDirectoryEnumerator: Access denied to {:?}, listing stays empty.",
                        self.path
                    );
                } else {
                    log::warn!("LazyDirectoryEnumerator: Cannot list {:?}: {e}", self.path);
                }
                self.closed = true;
                None
            }
        }
    }

    fn close_stream(&mut self) {
        self.stream = None;
        self.closed = true;
        log::debug!(
            "LazyDirectoryEnumerator: Closed {:?} after {} entries.",
            self.path,
            self.entries.len()
        );
    }

    /* Sub-enumerator for a directory that this enumerator has already listed. */
    pub fn child(&mut self, path: &Path) -> Option<&mut LazyDirectoryEnumerator> {
        if self.entries.get(path) != Some(&EntryKind::Directory) {
            return None;
        }
        let show_files = self.show_files;
        Some(
            self.children
                .entry(path.to_path_buf())
                .or_insert_with(|| LazyDirectoryEnumerator::new(path.to_path_buf(), show_files)),
        )
    }
}

fn entry_kind(entry: &fs::DirEntry) -> EntryKind {
    let is_dir = match entry.file_type() {
        Ok(file_type) if file_type.is_symlink() => entry.path().is_dir(),
        Ok(file_type) => file_type.is_dir(),
        Err(_) => false,
    };
    if is_dir {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}
