//! A bounded, write-back, LRU cache of fixed-size blocks over an opaque device.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{boxed::Box, collections::VecDeque, sync::Arc};
use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use dataview::{Pod, PodMethods as _};
use mutex_api::Mutex;

/// A fixed-size-block storage device.
pub trait BlockDevice<const BLOCK_SIZE: usize> {
    type Error;

    fn read(&self, index: usize, data: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error>;
    fn write(&self, index: usize, data: &[u8; BLOCK_SIZE]) -> Result<(), Self::Error>;
}

/// A write-back LRU cache of blocks backed by a [`BlockDevice`].
pub struct BlockIoCache<Device, BufferListMutex> {
    device: Device,

    /// All buffer slots, ordered by recency of use.
    ///
    /// `buffers.front()` is most recently used, `buffers.back()` is least.
    buffers: BufferListMutex,

    hits: AtomicUsize,
    misses: AtomicUsize,
}

pub struct BufferList<BlockDataMutex>(VecDeque<Arc<Block<BlockDataMutex>>>);

/// A block slot. `index` tracks the slot's assigned block index outside of
/// the data lock so admission can scan for a match without contending on it.
struct Block<BlockDataMutex> {
    index: usize,
    data: BlockDataMutex,
}

pub struct BlockHandle<'a, Device, BufferListMutex, BlockDataMutex>
where
    BufferListMutex: Mutex<Data = BufferList<BlockDataMutex>>,
{
    index: usize,
    cache: &'a BlockIoCache<Device, BufferListMutex>,
    block: Arc<Block<BlockDataMutex>>,
}

/// A reference to a block's cached bytes, typestated on whether a disk read
/// has populated them yet.
pub struct BlockGuard<
    'a,
    'b,
    Device,
    BufferListMutex,
    BlockDataMutex,
    const BLOCK_SIZE: usize,
    const VALID: bool,
> where
    BufferListMutex: Mutex<Data = BufferList<BlockDataMutex>>,
    BlockDataMutex: Mutex<Data = BlockData<BLOCK_SIZE>> + 'b,
{
    index: usize,
    cache: &'a BlockIoCache<Device, BufferListMutex>,
    block: Arc<Block<BlockDataMutex>>,
    data: BlockDataMutex::Guard<'b>,
}

/// A cached block's bytes, validity, and write-back state.
pub struct BlockData<const BLOCK_SIZE: usize> {
    index: usize,
    valid: bool,
    dirty: bool,
    data: Box<[u8; BLOCK_SIZE]>,
}

impl<Device, BufferListMutex, BlockDataMutex, const BLOCK_SIZE: usize>
    BlockIoCache<Device, BufferListMutex>
where
    BufferListMutex: Mutex<Data = BufferList<BlockDataMutex>>,
    BlockDataMutex: Mutex<Data = BlockData<BLOCK_SIZE>>,
{
    pub fn new(device: Device) -> Self {
        Self {
            device,
            buffers: BufferListMutex::new(BufferList(VecDeque::new())),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Initializes the cache with `num_block` empty slots.
    ///
    /// # Panics
    ///
    /// Panics if `num_block` is 0 or the cache is already initialized.
    pub fn init(&self, num_block: usize) {
        assert!(num_block > 0);
        let mut buffers = self.buffers.lock();
        assert!(buffers.0.is_empty());

        for _ in 0..num_block {
            buffers.0.push_back(Arc::new(Block {
                index: usize::MAX,
                data: BlockDataMutex::new(BlockData {
                    index: usize::MAX,
                    valid: false,
                    dirty: false,
                    data: Box::new([0; BLOCK_SIZE]),
                }),
            }));
        }
    }

    /// Returns the underlying device, for callers that need to bypass the
    /// cache entirely (e.g. a caller-managed region of reserved blocks).
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Monotonic count of lookups that found `index` already resident, since
    /// the last [`Self::flush`].
    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Monotonic count of lookups that required recycling a slot, since the
    /// last [`Self::flush`].
    pub fn miss_count(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns a reference to the block at `index`, recycling the
    /// least-recently-used unreferenced slot on a miss.
    ///
    /// Returns `None` if every slot is currently referenced by a live
    /// [`BlockHandle`].
    ///
    /// # Panics
    ///
    /// Panics if the cache is not initialized, or if a dirty victim's
    /// write-back to the device fails.
    pub fn try_get(
        &self,
        index: usize,
    ) -> Option<BlockHandle<'_, Device, BufferListMutex, BlockDataMutex>>
    where
        Device: BlockDevice<BLOCK_SIZE>,
        Device::Error: fmt::Debug,
    {
        let mut buffers = self.buffers.lock();
        assert!(!buffers.0.is_empty());

        if let Some(buf) = buffers.0.iter().find(|b| b.index == index) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(BlockHandle {
                index,
                cache: self,
                block: Arc::clone(buf),
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        // Recycle the LRU slot with no outstanding handle.
        let pos = buffers.0.iter().rposition(|b| Arc::strong_count(b) == 1)?;
        let mut buf = buffers.0.remove(pos)?;
        {
            let block = Arc::get_mut(&mut buf).expect("victim slot has no outstanding handle");
            block.index = index;
            let mut data = block.data.lock();
            if data.dirty {
                self.device
                    .write(data.index, &data.data)
                    .expect("buffer cache write-back failed");
            }
            data.index = index;
            data.valid = false;
            data.dirty = false;
        }
        buffers.0.push_front(Arc::clone(&buf));

        Some(BlockHandle {
            index,
            cache: self,
            block: buf,
        })
    }

    /// Like [`Self::try_get`], but panics instead of returning `None` when
    /// every slot is referenced.
    pub fn get(&self, index: usize) -> BlockHandle<'_, Device, BufferListMutex, BlockDataMutex>
    where
        Device: BlockDevice<BLOCK_SIZE>,
        Device::Error: fmt::Debug,
    {
        self.try_get(index)
            .unwrap_or_else(|| panic!("block buffer exhausted"))
    }

    /// Writes every dirty slot back to the device and invalidates all slots.
    ///
    /// Resets [`Self::hit_count`] and [`Self::miss_count`] to zero.
    ///
    /// # Panics
    ///
    /// Panics if any [`BlockHandle`] is still outstanding, or if a write-back
    /// fails.
    pub fn flush(&self)
    where
        Device: BlockDevice<BLOCK_SIZE>,
        Device::Error: fmt::Debug,
    {
        let mut buffers = self.buffers.lock();
        for buf in buffers.0.iter_mut() {
            let block =
                Arc::get_mut(buf).expect("cache flush requires no outstanding block handles");
            let mut data = block.data.lock();
            if data.dirty {
                self.device
                    .write(data.index, &data.data)
                    .expect("buffer cache write-back failed");
            }
            data.valid = false;
            data.dirty = false;
            data.index = usize::MAX;
            drop(data);
            block.index = usize::MAX;
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl<Device, BufferListMutex, BlockDataMutex> Drop
    for BlockHandle<'_, Device, BufferListMutex, BlockDataMutex>
where
    BufferListMutex: Mutex<Data = BufferList<BlockDataMutex>>,
{
    fn drop(&mut self) {
        let mut buffers = self.cache.buffers.lock();
        let Some(pos) = buffers.0.iter().position(|b| b.index == self.index) else {
            return;
        };
        let buf = buffers.0.remove(pos).expect("position just found");
        buffers.0.push_front(buf);
    }
}

impl<'a, Device, BufferListMutex, BlockDataMutex, const BLOCK_SIZE: usize>
    BlockHandle<'a, Device, BufferListMutex, BlockDataMutex>
where
    Device: BlockDevice<BLOCK_SIZE>,
    BufferListMutex: Mutex<Data = BufferList<BlockDataMutex>>,
    BlockDataMutex: Mutex<Data = BlockData<BLOCK_SIZE>> + 'a,
{
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn lock<'b>(
        &'b mut self,
    ) -> BlockGuard<'a, 'b, Device, BufferListMutex, BlockDataMutex, BLOCK_SIZE, false> {
        let mut data = self.block.data.lock();

        if data.index != self.index {
            // The slot was recycled underneath us between `try_get` and `lock`.
            data.index = self.index;
            data.valid = false;
            data.dirty = false;
        }

        BlockGuard {
            index: self.index,
            cache: self.cache,
            block: Arc::clone(&self.block),
            data,
        }
    }
}

impl<'a, 'b, Device, BufferListMutex, BlockDataMutex, const BLOCK_SIZE: usize, const VALID: bool>
    BlockGuard<'a, 'b, Device, BufferListMutex, BlockDataMutex, BLOCK_SIZE, VALID>
where
    Device: BlockDevice<BLOCK_SIZE>,
    BufferListMutex: Mutex<Data = BufferList<BlockDataMutex>>,
    BlockDataMutex: Mutex<Data = BlockData<BLOCK_SIZE>> + 'a,
{
    pub fn index(&self) -> usize {
        self.index
    }

    /// Reads the block from the device if the cached bytes are not valid.
    ///
    /// A device read error is treated as a zero-filled sector.
    pub fn read(
        mut self,
    ) -> BlockGuard<'a, 'b, Device, BufferListMutex, BlockDataMutex, BLOCK_SIZE, true> {
        if !self.data.valid {
            if self.cache.device.read(self.index, &mut self.data.data).is_err() {
                self.data.data.fill(0);
            }
            self.data.valid = true;
        }

        BlockGuard {
            index: self.index,
            cache: self.cache,
            block: Arc::clone(&self.block),
            data: self.data,
        }
    }

    /// Sets the whole block to `data` without reading it from the device.
    pub fn set_data(
        mut self,
        data: &[u8],
    ) -> BlockGuard<'a, 'b, Device, BufferListMutex, BlockDataMutex, BLOCK_SIZE, true> {
        self.data.valid = true;
        self.data.data.copy_from_slice(data);
        BlockGuard {
            index: self.index,
            cache: self.cache,
            block: Arc::clone(&self.block),
            data: self.data,
        }
    }

    /// Fills the whole block with zero without reading it from the device.
    pub fn zeroed(
        mut self,
    ) -> BlockGuard<'a, 'b, Device, BufferListMutex, BlockDataMutex, BLOCK_SIZE, true> {
        self.data.valid = true;
        self.data.data.fill(0);
        BlockGuard {
            index: self.index,
            cache: self.cache,
            block: Arc::clone(&self.block),
            data: self.data,
        }
    }
}

impl<Device, BufferListMutex, BlockDataMutex, const BLOCK_SIZE: usize>
    BlockGuard<'_, '_, Device, BufferListMutex, BlockDataMutex, BLOCK_SIZE, true>
where
    Device: BlockDevice<BLOCK_SIZE>,
    BufferListMutex: Mutex<Data = BufferList<BlockDataMutex>>,
    BlockDataMutex: Mutex<Data = BlockData<BLOCK_SIZE>>,
{
    pub fn bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.data.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data.data
    }

    pub fn data<T>(&self) -> &T
    where
        T: Pod,
    {
        self.bytes().as_data_view().get(0)
    }

    pub fn data_mut<T>(&mut self) -> &mut T
    where
        T: Pod,
    {
        self.bytes_mut().as_data_view_mut().get_mut(0)
    }

    /// Marks the block dirty. The bytes are only persisted on the next
    /// [`BlockIoCache::flush`] or eviction.
    pub fn mark_dirty(&mut self) {
        self.data.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.data.dirty
    }
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;
    use std::sync::Arc;

    use mutex_api::StdMutex;

    use super::*;

    const BLOCK_SIZE: usize = 512;

    #[derive(Clone)]
    struct MockDevice {
        data: Vec<Arc<StdMutex<MockData>>>,
    }

    struct MockData {
        data: [u8; BLOCK_SIZE],
        read: usize,
        write: usize,
    }

    type BlockIoCache = super::BlockIoCache<MockDevice, StdMutex<BufferList>>;
    type BufferList = super::BufferList<StdMutex<BlockData>>;
    type BlockData = super::BlockData<BLOCK_SIZE>;

    impl MockDevice {
        fn new(size: usize) -> Self {
            Self {
                data: (0..size)
                    .map(|_| {
                        Arc::new(StdMutex::new(MockData {
                            data: [0; BLOCK_SIZE],
                            read: 0,
                            write: 0,
                        }))
                    })
                    .collect(),
            }
        }
    }

    impl BlockDevice<BLOCK_SIZE> for MockDevice {
        type Error = Infallible;

        fn read(&self, index: usize, data: &mut [u8; 512]) -> Result<(), Self::Error> {
            let mut mock = self.data[index].lock();
            mock.read += 1;
            data.copy_from_slice(&mock.data);
            Ok(())
        }

        fn write(&self, index: usize, data: &[u8; 512]) -> Result<(), Self::Error> {
            let mut mock = self.data[index].lock();
            mock.write += 1;
            mock.data.copy_from_slice(data);
            Ok(())
        }
    }

    #[test]
    fn init_allocates_slots() {
        let cache = BlockIoCache::new(MockDevice::new(10));
        cache.init(5);
        assert_eq!(cache.buffers.lock().0.len(), 5);
    }

    #[test]
    #[should_panic]
    fn init_zero_panics() {
        let cache = BlockIoCache::new(MockDevice::new(10));
        cache.init(0);
    }

    #[test]
    fn get_does_not_read_until_locked() {
        let device = MockDevice::new(10);
        let cache = BlockIoCache::new(device.clone());
        cache.init(5);

        let block = cache.get(0);
        assert_eq!(block.index(), 0);
        assert_eq!(device.data[0].lock().read, 0);
    }

    #[test]
    fn write_is_deferred_until_flush() {
        let device = MockDevice::new(10);
        let cache = BlockIoCache::new(device.clone());
        cache.init(5);

        {
            let mut block = cache.get(0);
            let mut block = block.lock().read();
            block.bytes_mut().copy_from_slice(&[1; 512]);
            block.mark_dirty();
        }
        assert_eq!(device.data[0].lock().write, 0);

        cache.flush();
        assert_eq!(device.data[0].lock().write, 1);
        assert_eq!(device.data[0].lock().data, [1; 512]);
    }

    #[test]
    fn hit_and_miss_counts() {
        let device = MockDevice::new(10);
        let cache = BlockIoCache::new(device);
        cache.init(2);

        drop(cache.get(0));
        drop(cache.get(0));
        drop(cache.get(1));

        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 2);

        cache.flush();
        assert_eq!(cache.hit_count(), 0);
        assert_eq!(cache.miss_count(), 0);
    }

    #[test]
    fn exhaustion_returns_none() {
        let cache = BlockIoCache::new(MockDevice::new(10));
        cache.init(1);

        let _block1 = cache.get(0);
        assert!(cache.try_get(1).is_none());
    }

    #[test]
    fn lru_eviction_order() {
        let device = MockDevice::new(10);
        let cache = BlockIoCache::new(device.clone());
        cache.init(5);

        for i in 0..10 {
            let mut block = cache.get(i);
            let _block = block.lock().read();
        }
        // cache now holds 9,8,7,6,5 (9 most recent)

        for i in 0..10 {
            assert_eq!(device.data[i].lock().read, 1);
        }

        // 0 is not resident; evicts the LRU tail (5).
        let mut block = cache.get(0);
        let block = block.lock().read();
        assert_eq!(device.data[0].lock().read, 2);
        drop(block);

        // 8 is still resident.
        let mut block = cache.get(8);
        let block = block.lock().read();
        assert_eq!(device.data[8].lock().read, 1);
        drop(block);
    }

    #[test]
    fn dirty_victim_is_written_back_before_reuse() {
        let device = MockDevice::new(10);
        let cache = BlockIoCache::new(device.clone());
        cache.init(1);

        {
            let mut block = cache.get(0);
            let mut block = block.lock().read();
            block.bytes_mut().copy_from_slice(&[7; 512]);
            block.mark_dirty();
        }
        assert_eq!(device.data[0].lock().write, 0);

        // Only one slot: fetching sector 1 must evict the dirty sector 0.
        let mut block = cache.get(1);
        let _block = block.lock().read();

        assert_eq!(device.data[0].lock().write, 1);
        assert_eq!(device.data[0].lock().data, [7; 512]);
    }
}
