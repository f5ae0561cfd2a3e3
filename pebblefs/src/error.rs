//! Error kinds surfaced by the storage engine.

use strum::FromRepr;

/// Failure modes reachable from the public API.
///
/// Discriminants follow the POSIX errno a syscall-marshalling layer would
/// map these onto, so that layer (an external collaborator this crate
/// doesn't implement) can recover one from a raw return code via
/// [`Error::from_repr`].
///
/// `Fatal` is never returned to a caller: invariant violations and magic
/// mismatches panic the process instead, per the storage engine's
/// consistency contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, thiserror::Error)]
#[repr(i32)]
pub enum Error {
    #[error("no such file or directory")]
    NotFound = 2,
    #[error("bad file descriptor")]
    BadDescriptor = 9,
    #[error("device or resource busy")]
    Busy = 16,
    #[error("file or directory already exists")]
    Exists = 17,
    #[error("not a directory")]
    NotDir = 20,
    #[error("no space left on device")]
    NoSpace = 28,
    #[error("too many open files")]
    TooManyDescriptors = 24,
    #[error("text file busy")]
    WriteDenied = 26,
    #[error("file name too long")]
    NameTooLong = 36,
    #[error("directory not empty")]
    NotEmpty = 39,
}

pub type Result<T> = core::result::Result<T, Error>;
