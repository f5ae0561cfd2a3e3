//! A teaching-OS storage engine: a write-back sector cache, indexed
//! inodes with on-demand growth, a directory layer built on top of regular
//! files, and a path resolver + descriptor table tying them together.
//!
//! Layering, leaves first: [`device`] → [`freemap`] → [`cache`] →
//! [`inode`] → [`dir`] → [`path`] → [`fs`], with [`fd`] sitting alongside
//! [`fs`] as the per-process view.

pub mod cache;
pub mod device;
pub mod dir;
pub mod error;
pub mod fd;
pub mod freemap;
pub mod fs;
pub mod inode;
pub mod path;
pub mod repr;

mod engine {
    use once_init::OnceInit;

    use crate::{device::FileDevice, fs::FileSystem};

    static ENGINE: OnceInit<FileSystem<FileDevice>> = OnceInit::new();

    /// Mounts (or, if `sector_count` sectors of zeros is all that's there,
    /// formats) `device` as the process-wide file system.
    ///
    /// # Panics
    /// Panics if called more than once per process.
    pub fn init(device: FileDevice, fresh: bool) {
        let fs = if fresh {
            FileSystem::format(device)
        } else {
            FileSystem::mount(device)
        };
        ENGINE.init(fs);
    }

    /// The process-wide file system.
    ///
    /// # Panics
    /// Panics if [`init`] has not yet run.
    pub fn get() -> &'static FileSystem<FileDevice> {
        ENGINE.get()
    }

    /// Flushes the buffer cache and persists the free-map. Call once,
    /// before process exit.
    pub fn shutdown() {
        ENGINE.get().shutdown();
    }
}

pub use engine::{get, init, shutdown};
