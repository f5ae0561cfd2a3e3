//! The inode store (C4): on-disk inodes with online growth/shrink, and
//! reference-counted in-memory handles uniqued process-wide by sector.

mod resize;

use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicI32, Ordering},
    },
};

use mutex_api::{Mutex, StdMutex};

pub use resize::{Addr, resolve as resolve_addr};

use crate::{
    cache::SectorCache,
    device::SectorDevice,
    error::{Error, Result},
    freemap::FreeMap,
    repr::{self, SECTOR_SIZE},
};

struct Resources<D> {
    cache: SectorCache<D>,
    free_map: FreeMap,
}

/// Open-inode uniquing table plus the resources every inode handle needs to
/// tear itself down on last close.
///
/// Handles hold a sector number, not a cache-entry reference; the cache is
/// looked up fresh on every access. That costs one extra lookup per
/// operation but avoids threading cache-entry lifetimes through every
/// inode handle.
pub struct InodeStore<D: SectorDevice> {
    res: Arc<Resources<D>>,
    open: StdMutex<HashMap<u32, Weak<InodeInner<D>>>>,
}

struct InodeInner<D: SectorDevice> {
    res: Arc<Resources<D>>,
    sector: u32,
    is_dir: bool,
    removed: AtomicBool,
    deny_write_cnt: AtomicI32,
    /// Serialises `resize` and the subsequent inode-sector rewrite for this
    /// inode; never held across a free-map call.
    growth_mutex: StdMutex<()>,
}

/// A reference-counted handle to an open inode.
///
/// `open(sector)` twice yields two `InodeHandle`s that clone the same
/// underlying `Arc<InodeInner>`. Dropping one leaves the other fully
/// usable; dropping the last handle runs deletion if the inode was marked
/// removed.
pub struct InodeHandle<D: SectorDevice>(Arc<InodeInner<D>>);

impl<D: SectorDevice> Clone for InodeHandle<D> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<D: SectorDevice> InodeStore<D> {
    pub(crate) fn new(cache: SectorCache<D>, free_map: FreeMap) -> Self {
        Self {
            res: Arc::new(Resources { cache, free_map }),
            open: StdMutex::new(HashMap::new()),
        }
    }

    pub(crate) fn cache(&self) -> &SectorCache<D> {
        &self.res.cache
    }

    pub(crate) fn free_map(&self) -> &FreeMap {
        &self.res.free_map
    }

    /// Zero-initialises an on-disk inode at `sector`, sized to `length`
    /// bytes, stamping magic and kind. Any sectors allocated before a
    /// failure are released before this returns.
    pub fn create(&self, sector: u32, length: i64, is_dir: bool) -> Result<()> {
        let mut disk = repr::Inode::zeroed();
        let resources = resize::Resources {
            cache: &self.res.cache,
            free_map: &self.res.free_map,
        };
        resize::resize(&resources, &mut disk, length)?;
        disk.set_is_dir(is_dir);
        self.res.cache.write_pod(sector, &disk);
        Ok(())
    }

    /// Opens the inode at `sector`, returning the existing handle if one is
    /// already open, otherwise reading the on-disk inode once to cache
    /// `is_dir`.
    pub fn open(&self, sector: u32) -> InodeHandle<D> {
        let mut open = self.open.lock();
        if let Some(inner) = open.get(&sector).and_then(Weak::upgrade) {
            return InodeHandle(inner);
        }

        let disk = self.res.cache.read_pod::<repr::Inode>(sector);
        disk.check_magic();

        let inner = Arc::new(InodeInner {
            res: Arc::clone(&self.res),
            sector,
            is_dir: disk.is_dir(),
            removed: AtomicBool::new(false),
            deny_write_cnt: AtomicI32::new(0),
            growth_mutex: StdMutex::new(()),
        });
        open.insert(sector, Arc::downgrade(&inner));
        InodeHandle(inner)
    }

    /// Bumps the open count on an already-open handle.
    pub fn reopen(&self, handle: &InodeHandle<D>) -> InodeHandle<D> {
        handle.clone()
    }
}

impl<D: SectorDevice> InodeInner<D> {
    fn teardown_if_removed(&self) {
        if !self.removed.load(Ordering::Acquire) {
            return;
        }
        let mut disk = self.res.cache.read_pod::<repr::Inode>(self.sector);
        let resources = resize::Resources {
            cache: &self.res.cache,
            free_map: &self.res.free_map,
        };
        resize::resize(&resources, &mut disk, 0).expect("freeing a removed inode cannot fail");
        self.res.free_map.release(self.sector, 1);
    }
}

impl<D: SectorDevice> Drop for InodeInner<D> {
    fn drop(&mut self) {
        self.teardown_if_removed();
    }
}

impl<D: SectorDevice> InodeHandle<D> {
    pub fn sector(&self) -> u32 {
        self.0.sector
    }

    pub fn is_dir(&self) -> bool {
        self.0.is_dir
    }

    /// Marks the inode for deletion once its open count reaches zero.
    pub fn remove(&self) {
        self.0.removed.store(true, Ordering::Release);
    }

    pub fn is_removed(&self) -> bool {
        self.0.removed.load(Ordering::Acquire)
    }

    /// # Panics
    /// Panics if `deny_write_cnt` would exceed the number of openers; the
    /// caller is expected to track its own opener count.
    pub fn deny_write(&self) {
        self.0.deny_write_cnt.fetch_add(1, Ordering::AcqRel);
    }

    /// # Panics
    /// Panics if called without a matching prior `deny_write`.
    pub fn allow_write(&self) {
        let prev = self.0.deny_write_cnt.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "allow_write without a matching deny_write");
    }

    pub fn length(&self) -> i64 {
        i64::from(self.0.res.cache.read_pod::<repr::Inode>(self.0.sector).length)
    }

    /// Reads up to `dst.len()` bytes starting at `offset`, clamped to the
    /// inode's length as observed at the start of the read. Returns the
    /// number of bytes transferred.
    pub fn read_at(&self, dst: &mut [u8], offset: i64) -> usize {
        let disk = self.0.res.cache.read_pod::<repr::Inode>(self.0.sector);
        let available = i64::from(disk.length) - offset;
        let size = (dst.len() as i64).min(available.max(0));
        if size <= 0 {
            return 0;
        }
        let size = size as usize;

        let mut done = 0;
        let mut pos = offset as usize;
        while done < size {
            let logical = pos / SECTOR_SIZE;
            let in_sector = pos % SECTOR_SIZE;
            let n = (SECTOR_SIZE - in_sector).min(size - done);
            let sector = resolve_addr(&self.0.res.cache, &disk, logical);
            self.0.res.cache.read(sector, &mut dst[done..done + n], in_sector, n);
            done += n;
            pos += n;
        }
        size
    }

    /// Writes `src` starting at `offset`, growing the inode first if
    /// necessary.
    ///
    /// An empty `src` always succeeds with `Ok(0)`, nothing was requested,
    /// which is distinct from a write that was requested and denied
    /// (`Err(WriteDenied)`) or that failed to grow the file
    /// (`Err(NoSpace)`).
    pub fn write_at(&self, src: &[u8], offset: i64) -> Result<usize> {
        if src.is_empty() {
            return Ok(0);
        }
        if self.0.deny_write_cnt.load(Ordering::Acquire) > 0 {
            return Err(Error::WriteDenied);
        }

        // Re-read the committed inode only after taking the growth lock, so a
        // concurrent grower's snapshot can never be stale by the time it
        // resizes and writes back.
        let growth = self.0.growth_mutex.lock();
        let mut disk = self.0.res.cache.read_pod::<repr::Inode>(self.0.sector);
        let new_length = i64::from(disk.length).max(offset + src.len() as i64);
        if new_length > i64::from(disk.length) {
            let resources = resize::Resources {
                cache: &self.0.res.cache,
                free_map: &self.0.res.free_map,
            };
            resize::resize(&resources, &mut disk, new_length)?;
            self.0.res.cache.write_pod(self.0.sector, &disk);
        }
        drop(growth);

        let size = src.len();
        let mut done = 0;
        let mut pos = offset as usize;
        while done < size {
            let logical = pos / SECTOR_SIZE;
            let in_sector = pos % SECTOR_SIZE;
            let n = (SECTOR_SIZE - in_sector).min(size - done);
            let sector = resolve_addr(&self.0.res.cache, &disk, logical);
            self.0.res.cache.write(sector, &src[done..done + n], in_sector, n);
            done += n;
            pos += n;
        }
        Ok(size)
    }
}
