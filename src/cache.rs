//! Per-file header cache.
//!
//! Every reader of a file needs the same [`FormatHeader`]. The cache parses it
//! once per file, hands it out as `Arc<FormatHeader>`, and forgets the header
//! when the last reader holding a [`FileLease`] on it closes.
//!
//! Alongside the header each file keeps a small set of confirmed record
//! boundaries ("anchors"). Variable-length boundary walks start from the
//! nearest anchor below their target instead of the header end. Anchors
//! outlive the header entry so splits read one after another still benefit;
//! the most recently used `MAX_ANCHOR_FILES` files keep theirs until
//! [`HeaderCache::forget`] drops them.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::OnceCell;

use crate::header::{FormatHeader, PREAMBLE_SIZE};
use crate::source::ByteSource;
use crate::split::FileId;
use crate::{Error, Result};

const MAX_ANCHORS: usize = 4096;
const MAX_ANCHOR_FILES: usize = 256;
const INITIAL_HEADER_READ: usize = 4096;

type AnchorSet = Arc<Mutex<BTreeSet<u64>>>;

struct FileEntry {
    header: OnceCell<Arc<FormatHeader>>,
    anchors: AnchorSet,
}

struct CacheSlot {
    entry: Arc<FileEntry>,
    leases: usize,
}

#[derive(Default)]
struct AnchorStore {
    files: HashMap<FileId, AnchorSet>,
    /// Least recently used first.
    order: VecDeque<FileId>,
}

impl AnchorStore {
    fn touch(&mut self, file: &FileId) -> AnchorSet {
        if let Some(pos) = self.order.iter().position(|f| f == file) {
            self.order.remove(pos);
        }
        self.order.push_back(file.clone());
        let anchors = Arc::clone(self.files.entry(file.clone()).or_default());
        while self.order.len() > MAX_ANCHOR_FILES {
            if let Some(evicted) = self.order.pop_front() {
                self.files.remove(&evicted);
            }
        }
        anchors
    }

    fn remove(&mut self, file: &FileId) {
        self.files.remove(file);
        self.order.retain(|f| f != file);
    }
}

#[derive(Default)]
pub struct HeaderCache {
    files: Mutex<HashMap<FileId, CacheSlot>>,
    anchors: Mutex<AnchorStore>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HeaderCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers one more reader of `file`, creating the entry on first use.
    pub fn acquire(self: &Arc<Self>, file: &FileId) -> Result<FileLease> {
        let mut files = lock(&self.files);
        if !files.contains_key(file) {
            let anchors = lock(&self.anchors).touch(file);
            files.insert(
                file.clone(),
                CacheSlot {
                    entry: Arc::new(FileEntry {
                        header: OnceCell::new(),
                        anchors,
                    }),
                    leases: 0,
                },
            );
        }
        let slot = files
            .get_mut(file)
            .ok_or(Error::InvalidState("header cache entry missing"))?;
        slot.leases += 1;
        Ok(FileLease {
            cache: Arc::clone(self),
            file: file.clone(),
            entry: Arc::clone(&slot.entry),
            released: false,
        })
    }

    /// Number of files with at least one live lease.
    pub fn len(&self) -> usize {
        lock(&self.files).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, file: &FileId) -> bool {
        lock(&self.files).contains_key(file)
    }

    /// Largest confirmed boundary of `file` at or below `offset`, whether or
    /// not a reader currently holds the file.
    pub fn nearest_anchor(&self, file: &FileId, offset: u64) -> Option<u64> {
        let anchors = lock(&self.anchors).files.get(file).cloned()?;
        let anchors = lock(&anchors);
        anchors.range(..=offset).next_back().copied()
    }

    /// Drops the anchors remembered for `file`. Call when the file is
    /// rewritten; live readers keep the set they already hold.
    pub fn forget(&self, file: &FileId) {
        lock(&self.anchors).remove(file);
    }

    fn release(&self, file: &FileId) {
        let mut files = lock(&self.files);
        if let Some(slot) = files.get_mut(file) {
            slot.leases -= 1;
            if slot.leases == 0 {
                files.remove(file);
                log::debug!("header cache released {file}");
            }
        }
    }
}

/// A reader's claim on one file's cache entry; released on drop.
pub struct FileLease {
    cache: Arc<HeaderCache>,
    file: FileId,
    entry: Arc<FileEntry>,
    released: bool,
}

impl FileLease {
    pub fn file(&self) -> &FileId {
        &self.file
    }

    /// Returns the cached header, running `load` if no reader has parsed it yet.
    ///
    /// Concurrent callers block until the first `load` finishes; a failed load
    /// leaves the entry empty so a later open retries.
    pub fn header_or_load(
        &self,
        load: impl FnOnce() -> Result<FormatHeader>,
    ) -> Result<Arc<FormatHeader>> {
        self.entry
            .header
            .get_or_try_init(|| load().map(Arc::new))
            .map(Arc::clone)
    }

    /// Largest confirmed boundary at or below `offset`.
    pub fn nearest_anchor(&self, offset: u64) -> Option<u64> {
        let anchors = lock(&self.entry.anchors);
        anchors.range(..=offset).next_back().copied()
    }

    pub fn add_anchor(&self, offset: u64) {
        let mut anchors = lock(&self.entry.anchors);
        if anchors.len() < MAX_ANCHORS {
            anchors.insert(offset);
        }
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.cache.release(&self.file);
        }
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// Reads and parses the header at the start of `source`, reading further as
/// the tag dictionary demands.
pub fn read_header(source: &dyn ByteSource, max_header_len: usize) -> Result<FormatHeader> {
    let file_len = source.len();
    if let Some(bytes) = source.as_slice() {
        let limit = bytes.len().min(max_header_len);
        return finish_parse(FormatHeader::from_bytes(&bytes[..limit]), limit as u64, file_len);
    }

    let mut want = INITIAL_HEADER_READ.max(PREAMBLE_SIZE);
    loop {
        let limit = want.min(max_header_len) as u64;
        let limit = limit.min(file_len) as usize;
        let mut buf = vec![0u8; limit];
        let read = source.fill_at(0, &mut buf)?;
        buf.truncate(read);
        match FormatHeader::from_bytes(&buf) {
            Err(Error::TruncatedRecord { needed, .. })
                if (read as u64) < file_len && read < max_header_len =>
            {
                want = needed.max(want * 2);
            }
            other => return finish_parse(other, read as u64, file_len),
        }
    }
}

fn finish_parse(parsed: Result<FormatHeader>, read: u64, file_len: u64) -> Result<FormatHeader> {
    match parsed {
        Err(Error::TruncatedRecord { .. }) if read >= file_len => {
            Err(Error::MalformedHeader("file ends inside the header"))
        }
        Err(Error::TruncatedRecord { .. }) => Err(Error::MalformedHeader("header exceeds size limit")),
        other => other,
    }
}
