//! The path resolver (C6): splits a path into `(parent directory, leaf
//! name)` without looking up the leaf itself.

use crate::{
    dir::{self, Dir, Name},
    device::SectorDevice,
    error::{Error, Result},
    inode::{InodeHandle, InodeStore},
};

/// The result of [`resolve`]: the directory the leaf component would live
/// in, and the leaf's own name. The leaf is not looked up; callers decide
/// whether it should exist.
pub struct Resolved<D: SectorDevice> {
    pub parent: InodeHandle<D>,
    pub leaf: Name,
}

/// Walks `path` against `root` (for absolute paths) or `cwd` (otherwise),
/// failing on an empty path, a missing intermediate component, or an
/// intermediate component that is not a directory.
///
/// An all-slash path (`"/"`, `"//"`, ...) resolves to leaf `.` against
/// whichever directory the leading slash (or `cwd`) selected; see the
/// empty-path-vs-`"/"` distinction recorded alongside this function's
/// grounding entry.
pub fn resolve<D: SectorDevice>(
    store: &InodeStore<D>,
    root: &InodeHandle<D>,
    cwd: &InodeHandle<D>,
    path: &[u8],
) -> Result<Resolved<D>> {
    if path.is_empty() {
        return Err(Error::NotFound);
    }

    let absolute = path[0] == b'/';
    let mut current = store.reopen(if absolute { root } else { cwd });

    let mut tokens = path.split(|&b| b == b'/').filter(|c| !c.is_empty());
    let Some(mut cur_tok) = tokens.next() else {
        return Ok(Resolved {
            parent: current,
            leaf: dir::parse_name(dir::DOT)?,
        });
    };
    let mut next_tok = tokens.next();

    while let Some(next) = next_tok {
        let name = dir::parse_name(cur_tok)?;
        let here = Dir::open(store.reopen(&current));
        let child = here.lookup(store, &name).ok_or(Error::NotFound)?;
        if !child.is_dir() {
            return Err(Error::NotDir);
        }
        current = child;
        cur_tok = next;
        next_tok = tokens.next();
    }

    let leaf = dir::parse_name(cur_tok)?;
    Ok(Resolved { parent: current, leaf })
}
