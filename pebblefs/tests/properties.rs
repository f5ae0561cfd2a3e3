//! The laws from the storage engine's testable-properties section: round
//! trip, idempotent flush, open uniqueness, remove deferral.

use pebblefs::{
    device::MemoryDevice,
    fs::{FileSystem, Process},
};

const SECTORS: usize = 4_000;

fn new_fs() -> FileSystem<MemoryDevice> {
    FileSystem::format(MemoryDevice::new(SECTORS))
}

#[test]
fn round_trip_write_then_read_including_growth() {
    let fs = new_fs();
    let mut proc = Process::new(&fs);
    proc.create(&fs, b"/r", 0).unwrap();
    let fd = proc.open(&fs, b"/r").unwrap();

    let body: Vec<u8> = (0..2000u32).map(|i| (i % 256) as u8).collect();
    proc.write(fd, &body).unwrap();

    proc.seek(fd, 0).unwrap();
    let mut back = vec![0u8; body.len()];
    let n = proc.read(fd, &mut back).unwrap();

    assert_eq!(n, body.len());
    assert_eq!(back, body);
}

#[test]
fn idempotent_flush() {
    let fs = new_fs();
    let mut proc = Process::new(&fs);
    proc.create(&fs, b"/f", 0).unwrap();
    let fd = proc.open(&fs, b"/f").unwrap();
    proc.write(fd, b"hello").unwrap();

    fs.flush_cache();
    let writes_after_first_flush = fs.device_write_count();
    fs.flush_cache();
    assert_eq!(fs.device_write_count(), writes_after_first_flush);
}

#[test]
fn open_uniqueness_shares_state_until_last_close() {
    let fs = new_fs();
    let mut proc = Process::new(&fs);
    proc.create(&fs, b"/u", 0).unwrap();

    let fd_a = proc.open(&fs, b"/u").unwrap();
    let fd_b = proc.open(&fs, b"/u").unwrap();

    proc.write(fd_a, b"abc").unwrap();
    proc.close(fd_a).unwrap();

    // fd_b still works and observes fd_a's write, since both handles refer
    // to the same underlying inode record.
    proc.seek(fd_b, 0).unwrap();
    let mut buf = [0u8; 3];
    assert_eq!(proc.read(fd_b, &mut buf).unwrap(), 3);
    assert_eq!(&buf, b"abc");
    proc.close(fd_b).unwrap();
}

#[test]
fn remove_deferral_frees_sectors_only_after_last_close() {
    let fs = new_fs();
    let mut proc = Process::new(&fs);
    proc.create(&fs, b"/d", 0).unwrap();
    let fd = proc.open(&fs, b"/d").unwrap();
    proc.write(fd, &[1u8; 4096]).unwrap();

    proc.remove(&fs, b"/d").unwrap();

    // Still readable through the open descriptor.
    proc.seek(fd, 0).unwrap();
    let mut buf = [0u8; 4096];
    assert_eq!(proc.read(fd, &mut buf).unwrap(), 4096);

    proc.close(fd).unwrap();

    // Sectors are free again: a large allocation that would have failed
    // while they were held now succeeds.
    proc.create(&fs, b"/e", 0).unwrap();
    let fd_e = proc.open(&fs, b"/e").unwrap();
    proc.write(fd_e, &[2u8; 4096]).unwrap();
}
