//! The buffer cache (C3): a fixed 64-entry, write-back, LRU cache of
//! sectors, built on top of [`block_io`]'s generic admission protocol.

use block_io::{BlockData, BlockIoCache, BufferList};
use mutex_api::StdMutex;

use crate::{device::SectorDevice, repr::SECTOR_SIZE};

/// Number of resident sector slots.
pub const CACHE_ENTRIES: usize = 64;

type Inner<Device> =
    BlockIoCache<Device, StdMutex<BufferList<StdMutex<BlockData<SECTOR_SIZE>>>>>;

/// A bounded write-back cache of 512-byte sectors, consulted for every
/// on-disk access the inode store and free-map make.
pub struct SectorCache<Device> {
    inner: Inner<Device>,
}

impl<Device> SectorCache<Device>
where
    Device: SectorDevice,
{
    pub fn new(device: Device) -> Self {
        let inner = BlockIoCache::new(device);
        inner.init(CACHE_ENTRIES);
        Self { inner }
    }

    /// Copies `n` bytes (`0 < ofs + n <= SECTOR_SIZE`) from the cached image
    /// of `sector` into `dst`. Blocks until the sector is resident.
    pub fn read(&self, sector: u32, dst: &mut [u8], ofs: usize, n: usize) {
        assert!(ofs + n <= SECTOR_SIZE);
        let mut handle = self.inner.get(sector as usize);
        let guard = handle.lock().read();
        dst[..n].copy_from_slice(&guard.bytes()[ofs..ofs + n]);
    }

    /// Copies `src[..n]` into the cached image of `sector` at `ofs` and
    /// marks the entry dirty. A subsequent [`Self::flush`] is required for
    /// durability.
    pub fn write(&self, sector: u32, src: &[u8], ofs: usize, n: usize) {
        assert!(ofs + n <= SECTOR_SIZE);
        let mut handle = self.inner.get(sector as usize);
        let mut guard = handle.lock().read();
        guard.bytes_mut()[ofs..ofs + n].copy_from_slice(&src[..n]);
        guard.mark_dirty();
    }

    /// Overwrites the whole sector without first reading its prior
    /// contents, as when zero-initialising a freshly allocated sector.
    pub fn write_whole(&self, sector: u32, data: &[u8; SECTOR_SIZE]) {
        let mut handle = self.inner.get(sector as usize);
        let mut guard = handle.lock().set_data(data);
        guard.mark_dirty();
    }

    /// Reads a [`dataview::Pod`] value out of `sector` at byte offset 0.
    pub fn read_pod<T: dataview::Pod + Copy>(&self, sector: u32) -> T {
        let mut handle = self.inner.get(sector as usize);
        let guard = handle.lock().read();
        *guard.data::<T>()
    }

    /// Writes a [`dataview::Pod`] value into `sector` at byte offset 0 and
    /// marks the entry dirty.
    pub fn write_pod<T: dataview::Pod + Copy>(&self, sector: u32, value: &T) {
        let mut handle = self.inner.get(sector as usize);
        let mut guard = handle.lock().read();
        *guard.data_mut::<T>() = *value;
        guard.mark_dirty();
    }

    /// The underlying device, for the free-map's direct access to its
    /// reserved sectors.
    pub fn device(&self) -> &Device {
        self.inner.device()
    }

    /// Writes every dirty entry back to the device and drops all entries.
    /// Used at shutdown and as a test primitive.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Monotonic count of successful lookups since the last [`Self::flush`].
    pub fn hit_count(&self) -> usize {
        self.inner.hit_count()
    }

    /// Monotonic count of admissions that required recycling a slot since
    /// the last [`Self::flush`].
    pub fn miss_count(&self) -> usize {
        self.inner.miss_count()
    }
}
