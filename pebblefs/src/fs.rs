//! The path resolver + FS facade (C6): the process-wide storage engine and
//! the per-process view (working directory, descriptor table) over it.

use std::io::{Read as _, Write as _};

use crate::{
    cache::SectorCache,
    device::SectorDevice,
    dir::{self, Dir},
    error::{Error, Result},
    fd::{DescriptorTable, OpenFile, STDIN_FD, STDOUT_FD, Slot},
    freemap::FreeMap,
    inode::{InodeHandle, InodeStore},
    path, repr,
};

/// The process-wide storage engine: buffer cache, free-map, open-inode
/// list, and the root directory handle. Cheap to share by reference; the
/// per-process state (working directory, descriptors) lives in [`Process`].
pub struct FileSystem<D: SectorDevice> {
    store: InodeStore<D>,
    root: InodeHandle<D>,
}

impl<D: SectorDevice> FileSystem<D> {
    /// Formats a fresh file system onto `device`: an empty free-map
    /// reserving its own sectors plus the root directory's sector, and a
    /// root directory whose `.` and `..` both point to itself.
    pub fn format(device: D) -> Self {
        let sector_count = device.sector_count();
        let free_map = FreeMap::format(sector_count);
        free_map.reserve(repr::ROOT_DIR_SECTOR);

        let cache = SectorCache::new(device);
        let store = InodeStore::new(cache, free_map);
        store
            .create(repr::ROOT_DIR_SECTOR, 0, true)
            .expect("formatting the root directory on a fresh device cannot fail");
        let root = store.open(repr::ROOT_DIR_SECTOR);

        let root_dir = Dir::open(store.reopen(&root));
        root_dir
            .add(dir::DOT, repr::ROOT_DIR_SECTOR)
            .and_then(|()| root_dir.add(dir::DOT_DOT, repr::ROOT_DIR_SECTOR))
            .expect("seeding the root directory's . and .. cannot fail on a fresh device");

        Self { store, root }
    }

    /// Mounts a file system previously formatted onto `device`, reloading
    /// the free-map from its reserved sectors.
    pub fn mount(device: D) -> Self {
        let sector_count = device.sector_count();
        let free_map = FreeMap::load(&device, sector_count);
        let cache = SectorCache::new(device);
        let store = InodeStore::new(cache, free_map);
        let root = store.open(repr::ROOT_DIR_SECTOR);
        Self { store, root }
    }

    /// Flushes the buffer cache and persists the free-map. Must be the
    /// last operation performed against this file system.
    pub fn shutdown(&self) {
        self.store.cache().flush();
        self.store.free_map().persist(self.store.cache().device());
    }

    pub fn cache_hit_count(&self) -> usize {
        self.store.cache().hit_count()
    }

    pub fn cache_miss_count(&self) -> usize {
        self.store.cache().miss_count()
    }

    pub fn device_write_count(&self) -> usize {
        self.store.cache().device().write_count()
    }

    pub fn flush_cache(&self) {
        self.store.cache().flush();
    }
}

/// A thread's view of the file system: its current working directory and
/// its own descriptor table. Every method takes the owning [`FileSystem`]
/// by reference since the engine state it touches is process-wide.
pub struct Process<D: SectorDevice> {
    cwd: InodeHandle<D>,
    descriptors: DescriptorTable<D>,
}

impl<D: SectorDevice> Process<D> {
    /// A fresh process rooted at `fs`'s root directory.
    pub fn new(fs: &FileSystem<D>) -> Self {
        Self {
            cwd: fs.store.reopen(&fs.root),
            descriptors: DescriptorTable::new(),
        }
    }

    fn resolve(&self, fs: &FileSystem<D>, path: &[u8]) -> Result<path::Resolved<D>> {
        path::resolve(&fs.store, &fs.root, &self.cwd, path)
    }

    /// Creates a new, empty-unless-sized regular file at `path`.
    pub fn create(&self, fs: &FileSystem<D>, path: &[u8], size: i64) -> Result<()> {
        let resolved = self.resolve(fs, path)?;
        let parent_dir = Dir::open(fs.store.reopen(&resolved.parent));
        if parent_dir.lookup(&fs.store, &resolved.leaf).is_some() {
            return Err(Error::Exists);
        }

        let mut sector = 0;
        fs.store.free_map().allocate(1, &mut sector)?;
        if let Err(e) = fs.store.create(sector, size, false) {
            fs.store.free_map().release(sector, 1);
            return Err(e);
        }

        if let Err(e) = parent_dir.add(&resolved.leaf, sector) {
            let orphan = fs.store.open(sector);
            orphan.remove();
            return Err(e);
        }
        Ok(())
    }

    /// Creates a new directory at `path`, with `.` and `..` entries already
    /// populated.
    pub fn mkdir(&self, fs: &FileSystem<D>, path: &[u8]) -> Result<()> {
        let resolved = self.resolve(fs, path)?;
        let parent_dir = Dir::open(fs.store.reopen(&resolved.parent));
        if parent_dir.lookup(&fs.store, &resolved.leaf).is_some() {
            return Err(Error::Exists);
        }

        let mut sector = 0;
        fs.store.free_map().allocate(1, &mut sector)?;
        if let Err(e) = Dir::create(&fs.store, sector, 2) {
            fs.store.free_map().release(sector, 1);
            return Err(e);
        }

        let new_dir = Dir::open(fs.store.open(sector));
        let populate = new_dir
            .add(dir::DOT, sector)
            .and_then(|()| new_dir.add(dir::DOT_DOT, resolved.parent.sector()))
            .and_then(|()| parent_dir.add(&resolved.leaf, sector));

        if let Err(e) = populate {
            new_dir.inode().remove();
            return Err(e);
        }
        Ok(())
    }

    /// Opens `path`, installing a file or directory descriptor according to
    /// the target's kind.
    pub fn open(&mut self, fs: &FileSystem<D>, path: &[u8]) -> Result<usize> {
        let resolved = self.resolve(fs, path)?;
        let parent_dir = Dir::open(fs.store.reopen(&resolved.parent));
        let target = parent_dir.lookup(&fs.store, &resolved.leaf).ok_or(Error::NotFound)?;
        let slot = if target.is_dir() {
            Slot::Dir(Dir::open(target))
        } else {
            Slot::File(OpenFile { inode: target, position: 0 })
        };
        self.descriptors.add(slot)
    }

    /// Removes `path`. A directory may only be removed if it is empty and
    /// is not this process's current working directory.
    pub fn remove(&self, fs: &FileSystem<D>, path: &[u8]) -> Result<()> {
        let resolved = self.resolve(fs, path)?;
        let parent_dir = Dir::open(fs.store.reopen(&resolved.parent));
        let target = parent_dir.lookup(&fs.store, &resolved.leaf).ok_or(Error::NotFound)?;
        if target.is_dir() && target.sector() == self.cwd.sector() {
            return Err(Error::Busy);
        }
        drop(target);
        parent_dir.remove(&fs.store, &resolved.leaf)
    }

    /// Changes the working directory, closing the previous one.
    pub fn chdir(&mut self, fs: &FileSystem<D>, path: &[u8]) -> Result<()> {
        let resolved = self.resolve(fs, path)?;
        let parent_dir = Dir::open(fs.store.reopen(&resolved.parent));
        let target = parent_dir.lookup(&fs.store, &resolved.leaf).ok_or(Error::NotFound)?;
        if !target.is_dir() {
            return Err(Error::NotDir);
        }
        self.cwd = target;
        Ok(())
    }

    pub fn close(&mut self, fd: usize) -> Result<()> {
        self.descriptors.remove(fd)
    }

    /// Reads into `buf` from `fd`'s current position (or, for `fd == 0`,
    /// one byte from the console) and advances the position.
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize> {
        match self.descriptors.get_mut(fd)? {
            Slot::Console if fd == STDIN_FD => {
                if buf.is_empty() {
                    return Ok(0);
                }
                let mut byte = [0u8; 1];
                let n = std::io::stdin().read(&mut byte).unwrap_or(0);
                if n == 0 {
                    return Ok(0);
                }
                buf[0] = byte[0];
                Ok(1)
            }
            Slot::Console => Err(Error::BadDescriptor),
            Slot::File(open) => {
                let n = open.inode.read_at(buf, open.position);
                open.position += n as i64;
                Ok(n)
            }
            Slot::Dir(_) => Err(Error::NotDir),
        }
    }

    /// Writes `buf` to `fd` at its current position, growing a regular
    /// file as needed, and advances the position.
    pub fn write(&mut self, fd: usize, buf: &[u8]) -> Result<usize> {
        match self.descriptors.get_mut(fd)? {
            Slot::Console if fd == STDOUT_FD => {
                std::io::stdout().write_all(buf).expect("console write failed");
                Ok(buf.len())
            }
            Slot::Console => Err(Error::BadDescriptor),
            Slot::File(open) => {
                let n = open.inode.write_at(buf, open.position)?;
                open.position += n as i64;
                Ok(n)
            }
            Slot::Dir(_) => Err(Error::NotDir),
        }
    }

    pub fn seek(&mut self, fd: usize, offset: i64) -> Result<()> {
        match self.descriptors.get_mut(fd)? {
            Slot::File(open) => {
                open.position = offset;
                Ok(())
            }
            _ => Err(Error::BadDescriptor),
        }
    }

    pub fn tell(&self, fd: usize) -> Result<i64> {
        match self.descriptors.get(fd)? {
            Slot::File(open) => Ok(open.position),
            _ => Err(Error::BadDescriptor),
        }
    }

    pub fn filesize(&self, fd: usize) -> Result<i64> {
        match self.descriptors.get(fd)? {
            Slot::File(open) => Ok(open.inode.length()),
            _ => Err(Error::BadDescriptor),
        }
    }

    pub fn isdir(&self, fd: usize) -> Result<bool> {
        match self.descriptors.get(fd)? {
            Slot::Dir(_) => Ok(true),
            Slot::File(_) => Ok(false),
            Slot::Console => Err(Error::BadDescriptor),
        }
    }

    pub fn inumber(&self, fd: usize) -> Result<u32> {
        match self.descriptors.get(fd)? {
            Slot::File(open) => Ok(open.inode.sector()),
            Slot::Dir(d) => Ok(d.inode().sector()),
            Slot::Console => Err(Error::BadDescriptor),
        }
    }

    /// Advances `fd`'s directory cursor and returns the next entry's name.
    pub fn readdir(&mut self, fd: usize) -> Result<Option<dir::Name>> {
        match self.descriptors.get_mut(fd)? {
            Slot::Dir(d) => Ok(d.readdir()),
            _ => Err(Error::NotDir),
        }
    }
}
