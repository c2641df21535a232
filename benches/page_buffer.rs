use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

extern crate pagebuf;
use pagebuf::storage::{FileIo, MemoryDriver};
use pagebuf::{PageBuffer, PageBufferConfig, PageClass};

const PAGE_SIZE: usize = 4096;

fn setup(buffer_pages: usize, file_pages: usize) -> (PageBuffer, FileIo<MemoryDriver>) {
    let driver = MemoryDriver::new(PAGE_SIZE).with_eoa((file_pages * PAGE_SIZE) as u64);
    let io = FileIo::direct(driver);
    let page_buffer =
        PageBuffer::create(io.driver(), &PageBufferConfig::new(buffer_pages * PAGE_SIZE)).unwrap();
    (page_buffer, io)
}

fn page_buffer_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("page buffer");

    group.bench_function("read hits, 64 pages", |b| {
        let (mut page_buffer, mut io) = setup(64, 64);
        let mut buf = [0u8; 64];
        for page in 0..64u64 {
            page_buffer
                .read(&mut io, PageClass::RawData, page * PAGE_SIZE as u64, &mut buf)
                .unwrap();
        }
        let mut page = 0u64;
        b.iter(|| {
            page = (page + 7) % 64;
            page_buffer
                .read(&mut io, PageClass::RawData, black_box(page * PAGE_SIZE as u64), &mut buf)
                .unwrap();
        });
    });

    group.bench_function("writes with eviction, 64 of 256 pages", |b| {
        let (mut page_buffer, mut io) = setup(64, 256);
        let data = [1u8; 64];
        let mut page = 0u64;
        b.iter(|| {
            page = (page + 1) % 256;
            let class = if page % 4 == 0 {
                PageClass::Metadata
            } else {
                PageClass::RawData
            };
            page_buffer
                .write(&mut io, class, black_box(page * PAGE_SIZE as u64 + 8), &data)
                .unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, page_buffer_benchmark);
criterion_main!(benches);
