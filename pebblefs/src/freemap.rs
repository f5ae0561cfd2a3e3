//! The free-sector map: a bitmap allocating and freeing individual sectors.
//!
//! Nominally an external collaborator (the inode store only consults its
//! `allocate`/`release` contract during resize), but it is not layered over
//! the buffer cache: the lock ordering in the storage engine places the
//! free-map lock below everything else, so it talks to the device directly
//! through its own reserved sectors rather than re-entering the cache.
//! Sector 0 is reserved for it; if the bitmap needs more than one sector to
//! describe the device, it claims the sectors immediately following sector
//! 0 as well.

use mutex_api::{Mutex, StdMutex};

use crate::{
    device::SectorDevice,
    error::{Error, Result},
    repr::SECTOR_SIZE,
};

const BITS_PER_SECTOR: usize = SECTOR_SIZE * 8;

pub struct FreeMap {
    state: StdMutex<State>,
}

struct State {
    /// One bit per sector; `true` means allocated.
    bits: Vec<bool>,
    reserved_sectors: usize,
}

impl FreeMap {
    fn reserved_sectors(total_sectors: usize) -> usize {
        total_sectors.div_ceil(BITS_PER_SECTOR).max(1)
    }

    /// Builds a fresh, all-free bitmap for a device of `total_sectors`
    /// sectors, then reserves the sectors the bitmap itself occupies.
    pub fn format(total_sectors: usize) -> Self {
        let reserved_sectors = Self::reserved_sectors(total_sectors);
        let mut bits = vec![false; total_sectors];
        bits[..reserved_sectors].fill(true);
        Self {
            state: StdMutex::new(State {
                bits,
                reserved_sectors,
            }),
        }
    }

    /// Unconditionally marks `sector` allocated, whether or not it already
    /// fell within the bitmap's own reserved range. Used once at format
    /// time to reserve the root directory's fixed sector.
    pub fn reserve(&self, sector: u32) {
        let mut state = self.state.lock();
        state.bits[sector as usize] = true;
    }

    /// Reloads a bitmap previously persisted by [`Self::persist`].
    pub fn load<D: SectorDevice>(device: &D, total_sectors: usize) -> Self {
        let reserved_sectors = Self::reserved_sectors(total_sectors);
        let mut bits = vec![false; total_sectors];
        for sector in 0..reserved_sectors {
            let mut buf = [0u8; SECTOR_SIZE];
            device
                .read(sector, &mut buf)
                .expect("free-map sector read failed");
            for (i, byte) in buf.iter().enumerate() {
                for bit in 0..8 {
                    let idx = sector * BITS_PER_SECTOR + i * 8 + bit;
                    if idx < total_sectors {
                        bits[idx] = (byte >> bit) & 1 != 0;
                    }
                }
            }
        }
        Self {
            state: StdMutex::new(State {
                bits,
                reserved_sectors,
            }),
        }
    }

    /// Serialises the bitmap back into its reserved sectors.
    pub fn persist<D: SectorDevice>(&self, device: &D) {
        let state = self.state.lock();
        for sector in 0..state.reserved_sectors {
            let mut buf = [0u8; SECTOR_SIZE];
            for (i, byte) in buf.iter_mut().enumerate() {
                for bit in 0..8 {
                    let idx = sector * BITS_PER_SECTOR + i * 8 + bit;
                    if state.bits.get(idx).copied().unwrap_or(false) {
                        *byte |= 1 << bit;
                    }
                }
            }
            device
                .write(sector, &buf)
                .expect("free-map sector write failed");
        }
    }

    /// Allocates `n` contiguous free sectors, writing the first sector
    /// number into `out_first_sector`.
    ///
    /// `n = 1` is the only case this engine exercises, but the contiguous
    /// scan works for any `n`.
    pub fn allocate(&self, n: usize, out_first_sector: &mut u32) -> Result<()> {
        assert!(n > 0);
        let mut state = self.state.lock();
        let run_start = 'search: {
            let mut run = 0usize;
            for (i, allocated) in state.bits.iter().enumerate() {
                if *allocated {
                    run = 0;
                    continue;
                }
                run += 1;
                if run == n {
                    break 'search Some(i + 1 - n);
                }
            }
            None
        };
        let Some(start) = run_start else {
            return Err(Error::NoSpace);
        };
        state.bits[start..start + n].fill(true);
        *out_first_sector = u32::try_from(start).expect("sector number fits in u32");
        Ok(())
    }

    /// Frees `n` sectors starting at `sector`.
    ///
    /// # Panics
    /// Panics if any sector in the range was already free, an invariant
    /// violation elsewhere in the engine.
    pub fn release(&self, sector: u32, n: usize) {
        let mut state = self.state.lock();
        let start = sector as usize;
        for bit in &mut state.bits[start..start + n] {
            assert!(*bit, "releasing an already-free sector {sector}");
            *bit = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use mutex_api::{Mutex, StdMutex};

    use super::*;
    use crate::device::SectorDevice;

    struct MemDevice {
        sectors: StdMutex<Vec<[u8; SECTOR_SIZE]>>,
    }

    impl MemDevice {
        fn new(n: usize) -> Self {
            Self {
                sectors: StdMutex::new(vec![[0; SECTOR_SIZE]; n]),
            }
        }
    }

    impl block_io::BlockDevice<SECTOR_SIZE> for MemDevice {
        type Error = io::Error;

        fn read(&self, index: usize, data: &mut [u8; SECTOR_SIZE]) -> std::result::Result<(), Self::Error> {
            data.copy_from_slice(&self.sectors.lock()[index]);
            Ok(())
        }

        fn write(&self, index: usize, data: &[u8; SECTOR_SIZE]) -> std::result::Result<(), Self::Error> {
            self.sectors.lock()[index].copy_from_slice(data);
            Ok(())
        }
    }

    impl SectorDevice for MemDevice {
        fn sector_count(&self) -> usize {
            self.sectors.lock().len()
        }

        fn write_count(&self) -> usize {
            0
        }
    }

    #[test]
    fn format_reserves_its_own_sectors() {
        let map = FreeMap::format(100);
        let mut sector = 0;
        // The bitmap for 100 sectors fits in one sector (800 bits), so
        // sector 0 is already taken and the first allocation skips it.
        assert!(map.allocate(1, &mut sector).is_ok());
        assert_ne!(sector, 0);
    }

    #[test]
    fn allocate_and_release_round_trip() {
        let map = FreeMap::format(10);
        let mut a = 0;
        map.allocate(1, &mut a).unwrap();
        let mut b = 0;
        map.allocate(1, &mut b).unwrap();
        assert_ne!(a, b);
        map.release(a, 1);
        let mut c = 0;
        map.allocate(1, &mut c).unwrap();
        assert_eq!(a, c, "freed sector should be reused before fresh ones");
    }

    #[test]
    fn allocate_fails_when_exhausted() {
        let map = FreeMap::format(2);
        let mut sector = 0;
        // Sector 0 is reserved by the bitmap itself, leaving one free sector.
        assert!(map.allocate(1, &mut sector).is_ok());
        assert!(matches!(map.allocate(1, &mut sector), Err(Error::NoSpace)));
    }

    #[test]
    fn persist_then_load_round_trips_allocation_state() {
        let device = MemDevice::new(100);
        let map = FreeMap::format(100);
        let mut sector = 0;
        map.allocate(1, &mut sector).unwrap();
        map.persist(&device);

        let reloaded = FreeMap::load(&device, 100);
        let mut next = 0;
        reloaded.allocate(1, &mut next).unwrap();
        assert_ne!(next, sector, "previously allocated sector must stay taken");
    }
}
