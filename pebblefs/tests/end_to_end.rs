//! End-to-end scenarios exercising the full stack: device, cache, inode
//! store, directory layer, path resolver, and descriptor table together.

use pebblefs::{device::MemoryDevice, error::Error, fs::{FileSystem, Process}};

const SECTORS: usize = 20_000;

fn new_fs() -> FileSystem<MemoryDevice> {
    FileSystem::format(MemoryDevice::new(SECTORS))
}

#[test]
fn sparse_growth_exercises_doubly_indirect_path() {
    let fs = new_fs();
    let mut proc = Process::new(&fs);

    proc.create(&fs, b"/f", 0).unwrap();
    let fd = proc.open(&fs, b"/f").unwrap();
    proc.seek(fd, 300_000).unwrap();
    proc.write(fd, b"X").unwrap();

    assert_eq!(proc.filesize(fd).unwrap(), 300_001);

    proc.seek(fd, 0).unwrap();
    let mut buf = [0xFFu8; 1];
    assert_eq!(proc.read(fd, &mut buf).unwrap(), 1);
    assert_eq!(buf[0], 0);

    proc.seek(fd, 300_000).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(proc.read(fd, &mut buf).unwrap(), 1);
    assert_eq!(buf[0], b'X');
}

#[test]
fn cache_coalesces_single_byte_writes() {
    let fs = new_fs();
    fs.flush_cache();
    let mut proc = Process::new(&fs);

    proc.create(&fs, b"/b", 0).unwrap();
    let fd = proc.open(&fs, b"/b").unwrap();
    for _ in 0..65_536 {
        proc.write(fd, b"a").unwrap();
    }
    proc.close(fd).unwrap();

    let writes = fs.device_write_count();
    assert!(writes <= 128 + 64, "expected coalesced writes, got {writes}");
}

#[test]
fn hit_rate_improves_across_reopen() {
    let fs = new_fs();
    let mut proc = Process::new(&fs);

    proc.create(&fs, b"/big", 0).unwrap();
    let fd = proc.open(&fs, b"/big").unwrap();
    proc.write(fd, &[0u8; 30 * 1024]).unwrap();
    proc.close(fd).unwrap();
    fs.flush_cache();

    let fd = proc.open(&fs, b"/big").unwrap();
    let mut buf = vec![0u8; 30 * 1024];
    proc.seek(fd, 0).unwrap();
    proc.read(fd, &mut buf).unwrap();
    let h1 = fs.cache_hit_count();
    proc.close(fd).unwrap();

    let fd = proc.open(&fs, b"/big").unwrap();
    proc.seek(fd, 0).unwrap();
    proc.read(fd, &mut buf).unwrap();
    let h2 = fs.cache_hit_count();

    assert!(h2 > h1, "expected hit count to improve: {h1} -> {h2}");
}

#[test]
fn directory_semantics_insertion_order_and_kinds() {
    let fs = new_fs();
    let mut proc = Process::new(&fs);

    proc.mkdir(&fs, b"/a").unwrap();
    proc.mkdir(&fs, b"/a/b").unwrap();
    proc.chdir(&fs, b"/a").unwrap();
    proc.create(&fs, b"c", 0).unwrap();

    let b_fd = proc.open(&fs, b"b").unwrap();
    assert!(proc.isdir(b_fd).unwrap());

    let c_fd = proc.open(&fs, b"c").unwrap();
    assert!(!proc.isdir(c_fd).unwrap());

    let dir_fd = proc.open(&fs, b".").unwrap();
    let mut names = Vec::new();
    while let Some(name) = proc.readdir(dir_fd).unwrap() {
        names.push(name.to_vec());
    }
    assert_eq!(names, vec![b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn concurrent_extenders_write_disjoint_blocks() {
    use std::sync::Arc;
    use std::thread;

    let fs = Arc::new(new_fs());
    let mut setup = Process::new(&fs);
    setup.create(&fs, b"/shared", 0).unwrap();

    let handles: Vec<_> = (0..2)
        .map(|t: i64| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let mut proc = Process::new(&fs);
                let fd = proc.open(&fs, b"/shared").unwrap();
                proc.seek(fd, t * 512).unwrap();
                proc.write(fd, &[b'0' + t as u8; 512]).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let fd = setup.open(&fs, b"/shared").unwrap();
    assert_eq!(setup.filesize(fd).unwrap(), 1024);
    for t in 0..2i64 {
        setup.seek(fd, t * 512).unwrap();
        let mut buf = [0u8; 512];
        setup.read(fd, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == b'0' + t as u8));
    }
}

#[test]
fn remove_while_open_defers_reclamation() {
    let fs = new_fs();
    let mut proc = Process::new(&fs);

    proc.create(&fs, b"/x", 100).unwrap();
    let fd = proc.open(&fs, b"/x").unwrap();
    proc.remove(&fs, b"/x").unwrap();

    assert_eq!(proc.open(&fs, b"/x").unwrap_err(), Error::NotFound);

    let mut buf = [0u8; 10];
    assert_eq!(proc.read(fd, &mut buf).unwrap(), 10);

    proc.close(fd).unwrap();
    assert_eq!(proc.open(&fs, b"/x").unwrap_err(), Error::NotFound);
}
