#![allow(unsafe_code)]

//! Offset-addressed backing memory for the block manager.
//!
//! An [`Arena`] wraps a single mapping whose base never moves for the
//! lifetime of the engine. The mapping is reserved up front at its maximum
//! size; only the prefix covered by [`ArenaBacking::extend_to`] may be
//! touched. All access goes through byte offsets so the same layout can be
//! mapped by another process at a different base address.
//!
//! Access discipline: header and entry words are only ever read or written
//! through [`AtomicU64`] views, and property bytes are written exactly once
//! before being published with a release store. Readers never touch bytes a
//! writer may still be producing, so plain byte slices over published ranges
//! never alias a concurrent write.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;

use memmap2::{MmapMut, MmapOptions};

use crate::types::BlockAddr;

/// Which kind of memory backs an arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackingKind {
    /// Process-local anonymous mapping.
    Heap,
    /// File-backed mapping that other processes can attach to.
    Shared,
}

/// Storage that can back an [`Arena`].
pub trait ArenaBacking: Send + Sync {
    /// Kind of memory behind this backing.
    fn kind(&self) -> BackingKind;

    /// Bytes addressable through the mapping.
    fn mapped_len(&self) -> usize;

    /// Makes the first `len` bytes safe to access. Never shrinks.
    fn extend_to(&self, len: usize) -> io::Result<()>;

    /// Base address of the mapping. Must stay fixed until drop.
    fn base_ptr(&self) -> NonNull<u8>;
}

/// Anonymous private mapping; pages are committed lazily by the OS.
pub struct HeapBacking {
    _map: MmapMut,
    base: NonNull<u8>,
    len: usize,
}

impl HeapBacking {
    /// Reserves `len` bytes of anonymous memory.
    pub fn new(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "arena mapping must be non-empty",
            ));
        }
        let mut map = MmapMut::map_anon(len)?;
        let base = NonNull::new(map.as_mut_ptr())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "anonymous mapping returned null"))?;
        Ok(Self {
            _map: map,
            base,
            len,
        })
    }
}

// SAFETY: the mapping is owned by this value, never remapped, and all
// concurrent access goes through the arena's atomic/published-range rules.
unsafe impl Send for HeapBacking {}
unsafe impl Sync for HeapBacking {}

impl ArenaBacking for HeapBacking {
    fn kind(&self) -> BackingKind {
        BackingKind::Heap
    }

    fn mapped_len(&self) -> usize {
        self.len
    }

    fn extend_to(&self, _len: usize) -> io::Result<()> {
        Ok(())
    }

    fn base_ptr(&self) -> NonNull<u8> {
        self.base
    }
}

/// Shared file mapping, typically placed under `/dev/shm`.
///
/// The mapping spans `mapped_len` bytes from the start while the file itself
/// is extended in steps; touching bytes past the file end would fault, which
/// is why the block manager extends the file before handing out blocks there.
pub struct SharedBacking {
    file: File,
    path: PathBuf,
    _map: MmapMut,
    base: NonNull<u8>,
    len: usize,
}

impl SharedBacking {
    /// Creates (or truncates) the object at `path` and maps `mapped_len` bytes.
    pub fn create(path: impl AsRef<Path>, mapped_len: usize) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::map(file, path.to_path_buf(), mapped_len)
    }

    /// Attaches to an object created by another engine or process.
    pub fn open(path: impl AsRef<Path>, mapped_len: usize) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::map(file, path.to_path_buf(), mapped_len)
    }

    fn map(file: File, path: PathBuf, mapped_len: usize) -> io::Result<Self> {
        if mapped_len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "arena mapping must be non-empty",
            ));
        }
        // SAFETY: the file is owned by this backing; other mappings of the
        // same object follow the same offset/atomic access rules.
        let mut map = unsafe { MmapOptions::new().len(mapped_len).map_mut(&file)? };
        let base = NonNull::new(map.as_mut_ptr())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "shared mapping returned null"))?;
        Ok(Self {
            file,
            path,
            _map: map,
            base,
            len: mapped_len,
        })
    }

    /// Path of the shared object.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the underlying file.
    pub fn file_len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

// SAFETY: see `HeapBacking`.
unsafe impl Send for SharedBacking {}
unsafe impl Sync for SharedBacking {}

impl ArenaBacking for SharedBacking {
    fn kind(&self) -> BackingKind {
        BackingKind::Shared
    }

    fn mapped_len(&self) -> usize {
        self.len
    }

    fn extend_to(&self, len: usize) -> io::Result<()> {
        if len > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot extend shared object past its mapping",
            ));
        }
        if self.file_len()? < len as u64 {
            self.file.set_len(len as u64)?;
        }
        Ok(())
    }

    fn base_ptr(&self) -> NonNull<u8> {
        self.base
    }
}

/// Byte region addressed by offsets.
pub struct Arena {
    backing: Box<dyn ArenaBacking>,
    base: NonNull<u8>,
    mapped: usize,
}

// SAFETY: `base` points into `backing`, which is Send + Sync and outlives it.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Wraps a backing store.
    pub fn new(backing: Box<dyn ArenaBacking>) -> Self {
        let base = backing.base_ptr();
        let mapped = backing.mapped_len();
        Self {
            backing,
            base,
            mapped,
        }
    }

    /// Kind of memory behind the arena.
    pub fn kind(&self) -> BackingKind {
        self.backing.kind()
    }

    /// Bytes addressable through the mapping.
    pub fn mapped_len(&self) -> usize {
        self.mapped
    }

    /// Extends the accessible prefix of the backing store.
    pub fn extend_to(&self, len: usize) -> io::Result<()> {
        self.backing.extend_to(len)
    }

    /// Atomic view of the 8-byte word at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the word is misaligned or outside the mapping.
    pub(crate) fn word(&self, offset: u64) -> &AtomicU64 {
        let off = offset as usize;
        assert!(
            off % 8 == 0 && off + 8 <= self.mapped,
            "arena word {off} out of bounds"
        );
        // SAFETY: in bounds, 8-aligned (mapping bases are page aligned), and
        // AtomicU64 has the layout of u64. Words are only accessed atomically.
        unsafe { &*(self.base.as_ptr().add(off) as *const AtomicU64) }
    }

    /// Shared view of `len` published bytes at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range is outside the mapping.
    pub(crate) fn bytes(&self, offset: u64, len: usize) -> &[u8] {
        let off = offset as usize;
        assert!(off + len <= self.mapped, "arena range {off}+{len} out of bounds");
        // SAFETY: in bounds; callers only read ranges published with a
        // release store and never rewritten while readable.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(off), len) }
    }

    /// Copies `src` into the arena at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range is outside the mapping.
    pub(crate) fn write_bytes(&self, offset: u64, src: &[u8]) {
        let off = offset as usize;
        assert!(
            off + src.len() <= self.mapped,
            "arena range {off}+{} out of bounds",
            src.len()
        );
        // SAFETY: in bounds; the target range belongs to a block owned by the
        // single writer of its chain and is not yet published to readers.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.base.as_ptr().add(off), src.len());
        }
    }

    /// Copies `len` bytes between two non-overlapping ranges.
    pub(crate) fn copy_bytes(&self, from: u64, to: u64, len: usize) {
        let (src, dst) = (from as usize, to as usize);
        assert!(
            src + len <= self.mapped && dst + len <= self.mapped,
            "arena copy out of bounds"
        );
        assert!(src + len <= dst || dst + len <= src, "arena copy overlaps");
        // SAFETY: both ranges are in bounds and disjoint; the destination is
        // unpublished and owned by the caller.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.base.as_ptr().add(src),
                self.base.as_ptr().add(dst),
                len,
            );
        }
    }
}

/// Typed view of one block, produced by
/// [`crate::storage::BlockManager::convert`].
#[derive(Clone, Copy)]
pub struct BlockRef<'a> {
    arena: &'a Arena,
    addr: BlockAddr,
}

impl<'a> BlockRef<'a> {
    pub(crate) fn new(arena: &'a Arena, addr: BlockAddr) -> Self {
        Self { arena, addr }
    }

    /// Offset of the block inside the arena.
    pub fn addr(&self) -> BlockAddr {
        self.addr
    }

    /// Atomic word `index` (8-byte units from the block start).
    pub(crate) fn word(&self, index: usize) -> &'a AtomicU64 {
        self.arena.word(self.addr.offset(index * 8))
    }

    /// Published bytes at `offset` from the block start.
    pub(crate) fn bytes(&self, offset: usize, len: usize) -> &'a [u8] {
        self.arena.bytes(self.addr.offset(offset), len)
    }

    /// Writes unpublished bytes at `offset` from the block start.
    pub(crate) fn write(&self, offset: usize, src: &[u8]) {
        self.arena.write_bytes(self.addr.offset(offset), src)
    }

    pub(crate) fn arena(&self) -> &'a Arena {
        self.arena
    }
}
