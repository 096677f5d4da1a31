//! The `ls`-device collaborator: a directory-listing LRU cache exposed
//! through a pread-able device node.
//!
//! `spec.md` describes this only as "a directory listing LRU cache
//! exposed through a pread-able device node" — this module supplements
//! that with the concrete pieces a working version needs, grounded in
//! the VFS surface this workspace's sibling `fs` code exposes
//! (`InodeOps`/`FileOps`-shaped traits, offset-tracked `File::read`,
//! `readdir`'s entry shape). It stays intentionally shallow: a
//! collaborator's contract, not a filesystem — no mount table, no inode
//! numbers, no permissions.

use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use los_utils::HashMap;

/// One rendered directory entry, mirroring `readdir`'s `DirEntry` shape
/// narrowed to what a listing needs to print.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntryRec {
    pub name: String,
    pub size: u64,
}

impl DirEntryRec {
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// A directory's cached listing: the raw entries plus a pre-rendered
/// byte buffer so repeated reads at different offsets are O(1) slices,
/// never re-renders. One line per entry, `name<TAB>size\n`.
#[derive(Clone, Debug)]
pub struct DirSnapshot {
    pub entries: Vec<DirEntryRec>,
    rendered: Vec<u8>,
}

impl DirSnapshot {
    #[must_use]
    pub fn render(entries: Vec<DirEntryRec>) -> Self {
        let mut rendered = Vec::new();
        for entry in &entries {
            rendered.extend_from_slice(entry.name.as_bytes());
            rendered.push(b'\t');
            rendered.extend_from_slice(entry.size.to_string().as_bytes());
            rendered.push(b'\n');
        }
        Self { entries, rendered }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rendered.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }
}

/// Source of directory listings a real filesystem provides; the cache
/// consults this only on a miss.
pub trait DirSource {
    fn list(&self, path: &str) -> Vec<DirEntryRec>;
}

/// Mirrors `FileOps::read(&self, file: &File, buf: &mut [u8])`, narrowed
/// to the pure offset+buffer shape a device node needs — no open-file
/// state beyond the offset the caller tracks.
pub trait PreadDevice {
    /// Read up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually copied (0 at or past end-of-listing).
    fn pread(&self, offset: u64, buf: &mut [u8]) -> usize;
}

/// A handle to one cached snapshot's rendered bytes, served byte-for-byte
/// through [`PreadDevice::pread`] — exactly the contract `spec.md` §1
/// describes for the `ls`-device file interface.
pub struct ListingHandle {
    rendered: Vec<u8>,
}

impl PreadDevice for ListingHandle {
    fn pread(&self, offset: u64, buf: &mut [u8]) -> usize {
        let offset = offset as usize;
        if offset >= self.rendered.len() {
            return 0;
        }
        let n = buf.len().min(self.rendered.len() - offset);
        buf[..n].copy_from_slice(&self.rendered[offset..offset + n]);
        n
    }
}

/// LRU cache of rendered directory listings, keyed by path.
///
/// Bounded capacity, insertion/access-order `VecDeque` for LRU tracking
/// plus a `HashMap` (`los_utils`'s `hashbrown` re-export) for O(1)
/// lookup — the same pairing the teacher's scheduler already uses a
/// `VecDeque` for ordered queues, applied here to ordered eviction.
pub struct ListingCache<S> {
    source: S,
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, DirSnapshot>,
}

impl<S: DirSource> ListingCache<S> {
    #[must_use]
    pub fn new(source: S, capacity: usize) -> Self {
        assert!(capacity > 0, "ListingCache capacity must be nonzero");
        Self {
            source,
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Move `path` to the most-recently-used end of the eviction order.
    fn touch(&mut self, path: &str) {
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            self.order.remove(pos);
        }
        self.order.push_back(path.to_string());
    }

    /// Open `path`, refreshing the cache on a miss and evicting the
    /// least-recently-used entry if the cache is at capacity.
    pub fn open(&mut self, path: &str) -> ListingHandle {
        let rendered = match self.entries.get(path) {
            Some(snapshot) => snapshot.clone_rendered(),
            None => {
                if self.entries.len() >= self.capacity {
                    if let Some(lru) = self.order.pop_front() {
                        self.entries.remove(&lru);
                    }
                }
                let snapshot = DirSnapshot::render(self.source.list(path));
                let rendered = snapshot.clone_rendered();
                self.entries.insert(path.to_string(), snapshot);
                rendered
            }
        };
        self.touch(path);
        ListingHandle { rendered }
    }

    /// Drop a cached entry (e.g. on directory mutation), forcing the
    /// next `open` to refresh from `source`.
    pub fn invalidate(&mut self, path: &str) {
        self.entries.remove(path);
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            self.order.remove(pos);
        }
    }
}

impl DirSnapshot {
    fn clone_rendered(&self) -> Vec<u8> {
        self.rendered.clone()
    }
}
