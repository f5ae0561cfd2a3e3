//! The descriptor table (C7): a fixed 128-slot per-process array of open
//! file or directory handles. Slots 0 and 1 are reserved for the console
//! and are never returned by [`DescriptorTable::add`].

use crate::{
    device::SectorDevice,
    dir::Dir,
    error::{Error, Result},
    inode::InodeHandle,
};

pub const STDIN_FD: usize = 0;
pub const STDOUT_FD: usize = 1;
const NUM_DESCRIPTORS: usize = 128;

/// An open file's inode plus the byte offset the next `read`/`write`
/// continues from.
pub struct OpenFile<D: SectorDevice> {
    pub inode: InodeHandle<D>,
    pub position: i64,
}

pub enum Slot<D: SectorDevice> {
    Console,
    File(OpenFile<D>),
    Dir(Dir<D>),
}

pub struct DescriptorTable<D: SectorDevice> {
    slots: [Option<Slot<D>>; NUM_DESCRIPTORS],
}

impl<D: SectorDevice> DescriptorTable<D> {
    pub fn new() -> Self {
        let slots = std::array::from_fn(|i| (i < 2).then_some(Slot::Console));
        Self { slots }
    }

    /// Installs `slot` into the lowest free index `>= 2`. Fails if every
    /// slot is occupied.
    pub fn add(&mut self, slot: Slot<D>) -> Result<usize> {
        let index = self.slots.iter().skip(2).position(Option::is_none).ok_or(Error::TooManyDescriptors)? + 2;
        self.slots[index] = Some(slot);
        Ok(index)
    }

    pub fn get(&self, fd: usize) -> Result<&Slot<D>> {
        self.slots.get(fd).and_then(Option::as_ref).ok_or(Error::BadDescriptor)
    }

    pub fn get_mut(&mut self, fd: usize) -> Result<&mut Slot<D>> {
        self.slots.get_mut(fd).and_then(Option::as_mut).ok_or(Error::BadDescriptor)
    }

    /// Closes `fd`, dropping its underlying handle. The console slots are
    /// permanent fixtures and cannot be closed this way.
    pub fn remove(&mut self, fd: usize) -> Result<()> {
        if fd < 2 {
            return Err(Error::BadDescriptor);
        }
        let slot = self.slots.get_mut(fd).ok_or(Error::BadDescriptor)?;
        slot.take().ok_or(Error::BadDescriptor)?;
        Ok(())
    }
}

impl<D: SectorDevice> Default for DescriptorTable<D> {
    fn default() -> Self {
        Self::new()
    }
}
