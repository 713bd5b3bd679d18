//! Heap high-water marks for the streaming codec, measured by a counting global allocator.
//!
//! This binary holds a single test so no other test allocates concurrently.

use std::alloc::{GlobalAlloc, Layout, System};
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::sync::atomic::{AtomicUsize, Ordering};

use tabula_xlsx::{ReadOptions, RowRecord, StreamingReader, StreamingWriter, WriteOptions};

struct Counting;

static CURRENT: AtomicUsize = AtomicUsize::new(0);
static PEAK: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            let now = CURRENT.fetch_add(layout.size(), Ordering::SeqCst) + layout.size();
            PEAK.fetch_max(now, Ordering::SeqCst);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        CURRENT.fetch_sub(layout.size(), Ordering::SeqCst);
    }
}

#[global_allocator]
static GLOBAL: Counting = Counting;

/// Peak heap growth while `f` runs.
fn peak_growth<T>(f: impl FnOnce() -> T) -> (T, usize) {
    let base = CURRENT.load(Ordering::SeqCst);
    PEAK.store(base, Ordering::SeqCst);
    let out = f();
    (out, PEAK.load(Ordering::SeqCst).saturating_sub(base))
}

fn stream_write(rows: u32) -> File {
    let file = tempfile::tempfile().unwrap();
    let mut writer =
        StreamingWriter::open(file, "Numbers", &WriteOptions::default()).unwrap();
    for index in 1..=rows {
        writer
            .write_row(&RowRecord::new(index).with_cell(0, f64::from(index)))
            .unwrap();
    }
    let mut file = writer.finalize().unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file
}

fn stream_read(file: File) -> u32 {
    let reader =
        StreamingReader::from_reader(BufReader::new(file), 0usize, &ReadOptions::default())
            .unwrap();
    let mut last = 0;
    for row in reader {
        last = row.unwrap().index;
    }
    last
}

#[test]
fn heap_use_does_not_grow_with_row_count() {
    const SMALL: u32 = 1_000;
    const LARGE: u32 = 200_000;
    const SLACK: usize = 256 * 1024;

    let (small_file, small_write) = peak_growth(|| stream_write(SMALL));
    let (large_file, large_write) = peak_growth(|| stream_write(LARGE));
    assert!(
        large_write <= small_write + SLACK,
        "writing {LARGE} rows peaked at {large_write} bytes vs {small_write} for {SMALL}"
    );

    let (small_last, small_read) = peak_growth(|| stream_read(small_file));
    let (large_last, large_read) = peak_growth(|| stream_read(large_file));
    assert_eq!((small_last, large_last), (SMALL, LARGE));
    assert!(
        large_read <= small_read + SLACK,
        "reading {LARGE} rows peaked at {large_read} bytes vs {small_read} for {SMALL}"
    );
}
