//! The sector device: fixed-size sector read/write against an opaque
//! backing store. This is nominally an external collaborator; the engine
//! only depends on the [`SectorDevice`] contract, but a binary needs a real
//! backing store, so this module provides two: an in-memory one for tests
//! and short-lived sessions, and a file-backed one for anything that must
//! survive a process restart.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    sync::atomic::{AtomicUsize, Ordering},
};

use block_io::BlockDevice;
use mutex_api::{Mutex, StdMutex};

use crate::repr::SECTOR_SIZE;

/// Contract for the storage engine's backing store.
pub trait SectorDevice: BlockDevice<SECTOR_SIZE, Error = io::Error> {
    /// Total number of addressable sectors.
    fn sector_count(&self) -> usize;

    /// Monotonic count of `write` calls issued to the device, used by tests
    /// to observe write coalescing through the buffer cache.
    fn write_count(&self) -> usize;
}

/// An in-memory backing store. Contents do not survive the process.
pub struct MemoryDevice {
    sectors: StdMutex<Vec<[u8; SECTOR_SIZE]>>,
    write_count: AtomicUsize,
}

impl MemoryDevice {
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: StdMutex::new(vec![[0; SECTOR_SIZE]; sector_count]),
            write_count: AtomicUsize::new(0),
        }
    }
}

impl BlockDevice<SECTOR_SIZE> for MemoryDevice {
    type Error = io::Error;

    fn read(&self, index: usize, data: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let sectors = self.sectors.lock();
        let sector = sectors
            .get(index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "sector out of range"))?;
        data.copy_from_slice(sector);
        Ok(())
    }

    fn write(&self, index: usize, data: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let mut sectors = self.sectors.lock();
        let sector = sectors
            .get_mut(index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "sector out of range"))?;
        sector.copy_from_slice(data);
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl SectorDevice for MemoryDevice {
    fn sector_count(&self) -> usize {
        self.sectors.lock().len()
    }

    fn write_count(&self) -> usize {
        self.write_count.load(Ordering::Relaxed)
    }
}

/// A backing store over a regular file, sized to an exact number of sectors.
pub struct FileDevice {
    file: StdMutex<File>,
    sector_count: usize,
    write_count: AtomicUsize,
}

impl FileDevice {
    /// Opens (creating if needed) `path` and extends it to hold
    /// `sector_count` sectors, zero-filling any newly added space.
    pub fn open(path: &std::path::Path, sector_count: usize) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len((sector_count * SECTOR_SIZE) as u64)?;
        Ok(Self {
            file: StdMutex::new(file),
            sector_count,
            write_count: AtomicUsize::new(0),
        })
    }
}

impl BlockDevice<SECTOR_SIZE> for FileDevice {
    type Error = io::Error;

    fn read(&self, index: usize, data: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start((index * SECTOR_SIZE) as u64))?;
        file.read_exact(data)
    }

    fn write(&self, index: usize, data: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start((index * SECTOR_SIZE) as u64))?;
        file.write_all(data)?;
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl SectorDevice for FileDevice {
    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn write_count(&self) -> usize {
        self.write_count.load(Ordering::Relaxed)
    }
}
