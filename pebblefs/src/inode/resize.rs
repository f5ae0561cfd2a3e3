//! Indirection addressing and the resize algorithm (C4).
//!
//! Navigating direct, indirect, and doubly-indirect pointers is a three-case
//! decision, so it is expressed as a small enum rather than three copies of
//! the same arithmetic inlined at every call site.

use crate::{
    cache::SectorCache,
    device::SectorDevice,
    error::Result,
    freemap::FreeMap,
    repr::{self, MAX_INDIRECT_INDEX, NUM_DIRECT, PTRS_PER_SECTOR, SECTOR_SIZE},
};

/// Where the pointer for logical sector `i` of a file lives.
pub enum Addr {
    Direct(usize),
    Indirect(usize),
    Doubly(usize, usize),
}

impl Addr {
    pub fn of(i: usize) -> Self {
        if i < NUM_DIRECT {
            Self::Direct(i)
        } else if i < MAX_INDIRECT_INDEX {
            Self::Indirect(i - NUM_DIRECT)
        } else {
            let j = i - MAX_INDIRECT_INDEX;
            Self::Doubly(j / PTRS_PER_SECTOR, j % PTRS_PER_SECTOR)
        }
    }
}

/// Resolves the device sector backing logical sector `i` of `inode`.
///
/// Returns `0` if `i` is beyond the inode's currently allocated footprint
/// (the caller is expected to have already bounded `i` by `length`).
/// Indirection blocks are always read fresh through the cache; the engine
/// never caches a pointer value across a growth boundary.
pub fn resolve<D: SectorDevice>(cache: &SectorCache<D>, inode: &repr::Inode, i: usize) -> u32 {
    match Addr::of(i) {
        Addr::Direct(i) => inode.direct[i],
        Addr::Indirect(i) => {
            if inode.indirect == 0 {
                return 0;
            }
            let block = cache.read_pod::<repr::IndirectBlock>(inode.indirect);
            block.ptrs[i]
        }
        Addr::Doubly(outer, inner) => {
            if inode.doubly_indirect == 0 {
                return 0;
            }
            let outer_block = cache.read_pod::<repr::IndirectBlock>(inode.doubly_indirect);
            let indirect = outer_block.ptrs[outer];
            if indirect == 0 {
                return 0;
            }
            let inner_block = cache.read_pod::<repr::IndirectBlock>(indirect);
            inner_block.ptrs[inner]
        }
    }
}

pub(super) struct Resources<'a, D> {
    pub cache: &'a SectorCache<D>,
    pub free_map: &'a FreeMap,
}

/// Grows or shrinks `inode` to exactly `new_size` bytes, allocating or
/// freeing sectors as needed. On failure, the inode is rolled back to its
/// pre-call footprint and `inode.length` is left untouched; the caller
/// decides whether to retry with a smaller size.
pub(super) fn resize<D: SectorDevice>(
    res: &Resources<'_, D>,
    inode: &mut repr::Inode,
    new_size: i64,
) -> Result<()> {
    let old_size = i64::from(inode.length);
    match apply(res, inode, new_size) {
        Ok(()) => {
            inode.length = i32::try_from(new_size).expect("file size fits in i32");
            Ok(())
        }
        Err(e) => {
            // Best-effort rollback to the previous footprint. If this also
            // fails, `inode` is left smaller than before but `length` (not
            // yet touched) still reflects the original size.
            let _ = apply(res, inode, old_size);
            Err(e)
        }
    }
}

fn apply<D: SectorDevice>(
    res: &Resources<'_, D>,
    inode: &mut repr::Inode,
    new_size: i64,
) -> Result<()> {
    for i in 0..NUM_DIRECT {
        resize_direct_slot(res, &mut inode.direct[i], new_size, i)?;
    }
    resize_indirect(res, &mut inode.indirect, new_size, NUM_DIRECT)?;
    resize_indirect_of_indirect(res, &mut inode.doubly_indirect, new_size, MAX_INDIRECT_INDEX)
}

/// `i` is "needed" at `new_size` when `new_size > SECTOR_SIZE * i`.
fn needed_at(new_size: i64, logical_index: usize) -> bool {
    new_size > (logical_index * SECTOR_SIZE) as i64
}

fn resize_direct_slot<D: SectorDevice>(
    res: &Resources<'_, D>,
    slot: &mut u32,
    new_size: i64,
    logical_index: usize,
) -> Result<()> {
    let needed = needed_at(new_size, logical_index);
    if needed && *slot == 0 {
        let mut sector = 0;
        res.free_map.allocate(1, &mut sector)?;
        res.cache.write_whole(sector, &[0; SECTOR_SIZE]);
        *slot = sector;
    } else if !needed && *slot != 0 {
        res.free_map.release(*slot, 1);
        *slot = 0;
    }
    Ok(())
}

/// Grows/shrinks a single level of indirection rooted at `*ptr`, whose
/// pointers address logical sectors `base..base + PTRS_PER_SECTOR`.
///
/// Shared between the top-level `indirect` pointer and each of the
/// doubly-indirect pointer's 128 children.
fn resize_indirect<D: SectorDevice>(
    res: &Resources<'_, D>,
    ptr: &mut u32,
    new_size: i64,
    base: usize,
) -> Result<()> {
    if !needed_at(new_size, base) && *ptr == 0 {
        return Ok(());
    }

    let mut block = if *ptr == 0 {
        let mut sector = 0;
        res.free_map.allocate(1, &mut sector)?;
        *ptr = sector;
        repr::IndirectBlock::zeroed()
    } else {
        res.cache.read_pod::<repr::IndirectBlock>(*ptr)
    };

    let mut err = None;
    for (i, slot) in block.ptrs.iter_mut().enumerate() {
        if let Err(e) = resize_direct_slot(res, slot, new_size, base + i) {
            err = Some(e);
            break;
        }
    }

    if block.is_empty() {
        res.free_map.release(*ptr, 1);
        *ptr = 0;
    } else {
        res.cache.write_pod(*ptr, &block);
    }

    match err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn resize_indirect_of_indirect<D: SectorDevice>(
    res: &Resources<'_, D>,
    ptr: &mut u32,
    new_size: i64,
    base: usize,
) -> Result<()> {
    if !needed_at(new_size, base) && *ptr == 0 {
        return Ok(());
    }

    let mut outer = if *ptr == 0 {
        let mut sector = 0;
        res.free_map.allocate(1, &mut sector)?;
        *ptr = sector;
        repr::IndirectBlock::zeroed()
    } else {
        res.cache.read_pod::<repr::IndirectBlock>(*ptr)
    };

    let mut err = None;
    for (o, child) in outer.ptrs.iter_mut().enumerate() {
        let child_base = base + o * PTRS_PER_SECTOR;
        if let Err(e) = resize_indirect(res, child, new_size, child_base) {
            err = Some(e);
            break;
        }
    }

    if outer.is_empty() {
        res.free_map.release(*ptr, 1);
        *ptr = 0;
    } else {
        res.cache.write_pod(*ptr, &outer);
    }

    match err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_classifies_direct_range() {
        assert!(matches!(Addr::of(0), Addr::Direct(0)));
        assert!(matches!(Addr::of(NUM_DIRECT - 1), Addr::Direct(i) if i == NUM_DIRECT - 1));
    }

    #[test]
    fn addr_classifies_indirect_range() {
        assert!(matches!(Addr::of(NUM_DIRECT), Addr::Indirect(0)));
        assert!(matches!(
            Addr::of(MAX_INDIRECT_INDEX - 1),
            Addr::Indirect(i) if i == PTRS_PER_SECTOR - 1
        ));
    }

    #[test]
    fn addr_classifies_doubly_indirect_range() {
        assert!(matches!(Addr::of(MAX_INDIRECT_INDEX), Addr::Doubly(0, 0)));
        assert!(matches!(Addr::of(MAX_INDIRECT_INDEX + PTRS_PER_SECTOR), Addr::Doubly(1, 0)));
    }

    #[test]
    fn needed_at_matches_sector_boundary() {
        assert!(!needed_at(0, 0));
        assert!(needed_at(1, 0));
        assert!(!needed_at(SECTOR_SIZE as i64, 1));
        assert!(needed_at(SECTOR_SIZE as i64 + 1, 1));
    }
}
