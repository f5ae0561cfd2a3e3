//! The directory layer (C5): a directory is a regular inode-backed file
//! whose payload is a dense sequence of fixed-size entries.

use arrayvec::ArrayVec;
use dataview::PodMethods as _;

use crate::{
    device::SectorDevice,
    error::{Error, Result},
    inode::{InodeHandle, InodeStore},
    repr::{self, DIR_ENTRY_SIZE, DIR_NAME_MAX},
};

pub const DOT: &[u8] = b".";
pub const DOT_DOT: &[u8] = b"..";

/// A path component, bounded to [`DIR_NAME_MAX`] bytes without allocating.
pub type Name = ArrayVec<u8, DIR_NAME_MAX>;

/// Validates and copies `bytes` into a [`Name`].
pub fn parse_name(bytes: &[u8]) -> Result<Name> {
    Name::try_from(bytes).map_err(|_| Error::NameTooLong)
}

fn decode_entry(buf: &[u8; DIR_ENTRY_SIZE]) -> repr::DirEntry {
    *buf.as_data_view().get(0)
}

fn encode_entry(entry: &repr::DirEntry) -> [u8; DIR_ENTRY_SIZE] {
    let mut buf = [0u8; DIR_ENTRY_SIZE];
    *buf.as_data_view_mut().get_mut(0) = *entry;
    buf
}

/// An open directory: an inode handle plus a sequential `readdir` cursor.
///
/// The cursor lives here, not on the shared inode handle, so that two
/// independent opens of the same directory iterate independently.
pub struct Dir<D: SectorDevice> {
    inode: InodeHandle<D>,
    cursor: i64,
}

impl<D: SectorDevice> Dir<D> {
    pub fn open(inode: InodeHandle<D>) -> Self {
        Self { inode, cursor: 0 }
    }

    pub fn reopen(&self, store: &InodeStore<D>) -> Self {
        Self {
            inode: store.reopen(&self.inode),
            cursor: 0,
        }
    }

    pub fn inode(&self) -> &InodeHandle<D> {
        &self.inode
    }

    fn entry_count(&self) -> usize {
        self.inode.length() as usize / DIR_ENTRY_SIZE
    }

    fn read_entry(&self, index: usize) -> Option<repr::DirEntry> {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        let n = self.inode.read_at(&mut buf, (index * DIR_ENTRY_SIZE) as i64);
        (n == DIR_ENTRY_SIZE).then(|| decode_entry(&buf))
    }

    fn write_entry(&self, index: usize, entry: &repr::DirEntry) -> Result<()> {
        let buf = encode_entry(entry);
        let n = self.inode.write_at(&buf, (index * DIR_ENTRY_SIZE) as i64)?;
        assert!(n == DIR_ENTRY_SIZE, "directory entry write was short");
        Ok(())
    }

    /// Creates a fresh directory inode at `sector`, sized to hold
    /// `initial_entry_capacity` entries. Does not add `.` or `..`; the
    /// caller populates those with [`Self::add`] once the directory and its
    /// parent's sector are both known.
    pub fn create(store: &InodeStore<D>, sector: u32, initial_entry_capacity: usize) -> Result<()> {
        store.create(sector, (initial_entry_capacity * DIR_ENTRY_SIZE) as i64, true)
    }

    /// Linear scan for `name`; opens and returns the target inode on hit.
    pub fn lookup(&self, store: &InodeStore<D>, name: &[u8]) -> Option<InodeHandle<D>> {
        for i in 0..self.entry_count() {
            let entry = self.read_entry(i)?;
            if entry.matches_name(name) {
                return Some(store.open(entry.inode_sector()));
            }
        }
        None
    }

    /// Inserts `name -> inode_sector` into the first free slot, extending
    /// the directory by one entry if none is free.
    pub fn add(&self, name: &[u8], inode_sector: u32) -> Result<()> {
        let name = parse_name(name)?;
        let count = self.entry_count();
        let mut free_slot = None;
        for i in 0..count {
            let Some(entry) = self.read_entry(i) else { break };
            if entry.matches_name(&name) {
                return Err(Error::Exists);
            }
            if free_slot.is_none() && !entry.is_in_use() {
                free_slot = Some(i);
            }
        }
        let slot = free_slot.unwrap_or(count);
        let mut entry = repr::DirEntry::free();
        entry.set(&name, inode_sector);
        self.write_entry(slot, &entry)
    }

    /// Frees `name`'s entry. Rejects `.`, `..`, and non-empty subdirectories
    /// with the same failure (they are, from the caller's perspective, all
    /// "this directory entry cannot be removed right now").
    pub fn remove(&self, store: &InodeStore<D>, name: &[u8]) -> Result<()> {
        if name == DOT || name == DOT_DOT {
            return Err(Error::NotEmpty);
        }
        for i in 0..self.entry_count() {
            let Some(mut entry) = self.read_entry(i) else { break };
            if !entry.matches_name(name) {
                continue;
            }
            let target = store.open(entry.inode_sector());
            if target.is_dir() {
                let sub = Dir::open(store.reopen(&target));
                if !sub.is_empty() {
                    return Err(Error::NotEmpty);
                }
            }
            entry.clear();
            self.write_entry(i, &entry)?;
            target.remove();
            return Ok(());
        }
        Err(Error::NotFound)
    }

    /// A directory is empty when every entry beyond `.` and `..` is free.
    fn is_empty(&self) -> bool {
        for i in 0..self.entry_count() {
            let Some(entry) = self.read_entry(i) else { break };
            if entry.is_in_use() && entry.name_bytes() != DOT && entry.name_bytes() != DOT_DOT {
                return false;
            }
        }
        true
    }

    /// Advances the cursor and returns the next in-use, non-dot name.
    /// Finite and forward-only; reopen the directory to restart.
    pub fn readdir(&mut self) -> Option<Name> {
        let count = self.entry_count();
        loop {
            let index = (self.cursor as usize) / DIR_ENTRY_SIZE;
            if index >= count {
                return None;
            }
            self.cursor += DIR_ENTRY_SIZE as i64;
            let entry = self.read_entry(index)?;
            if !entry.is_in_use() {
                continue;
            }
            let name = entry.name_bytes();
            if name == DOT || name == DOT_DOT {
                continue;
            }
            return Some(Name::try_from(name).expect("on-disk name fits DIR_NAME_MAX"));
        }
    }
}
