use pagebuf::pages::DEFAULT_PAGE_SIZE;
use pagebuf::storage::FileDriver;
use pagebuf::{AccumulatorConfig, PageBufferConfig, PageClass, PagedFile};

use std::path::PathBuf;

use miette::{IntoDiagnostic, Result, WrapErr, miette};
use tempfile::NamedTempFile;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: pbstat [page_size] [buffer_pages] [ops] [path]";

/// Linear congruential generator, keeps runs reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 11
    }
}

fn arg(args: &[String], idx: usize, default: usize) -> Result<usize> {
    match args.get(idx) {
        Some(value) => value
            .parse()
            .into_diagnostic()
            .wrap_err_with(|| format!("invalid argument {value:?}\n{USAGE}")),
        None => Ok(default),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().collect::<Vec<String>>();
    let page_size = arg(&args, 1, DEFAULT_PAGE_SIZE)?;
    let buffer_pages = arg(&args, 2, 64)?;
    let ops = arg(&args, 3, 100_000)?;
    if page_size < 2 || buffer_pages == 0 {
        return Err(miette!("page size must be at least 2 and the buffer hold a page\n{USAGE}"));
    }

    let temp;
    let path = match args.get(4) {
        Some(path) => PathBuf::from(path),
        None => {
            temp = NamedTempFile::new().into_diagnostic()?;
            temp.path().to_path_buf()
        }
    };

    let driver = FileDriver::create(&path, Some(page_size)).into_diagnostic()?;
    let mut file = PagedFile::open(driver, &AccumulatorConfig::default());
    file.enable_page_buffer(
        &PageBufferConfig::new(buffer_pages * page_size)
            .with_min_meta_perc(25)
            .with_min_raw_perc(25),
    )
    .into_diagnostic()?;

    // one metadata page out of four
    let file_pages = buffer_pages * 4;
    for page in 0..file_pages {
        let class = if page % 4 == 0 {
            PageClass::Metadata
        } else {
            PageClass::RawData
        };
        file.allocate_page(class).into_diagnostic()?;
    }
    let file_size = (file_pages * page_size) as u64;

    let mut rng = Lcg(0x5eed);
    let mut buf = vec![0u8; 2 * page_size];
    for op in 0..ops {
        let page = rng.next() as usize % file_pages;
        let class = if page % 4 == 0 {
            PageClass::Metadata
        } else {
            PageClass::RawData
        };
        let offset = rng.next() as usize % page_size;
        let addr = (page * page_size + offset) as u64;

        let len = match rng.next() % 16 {
            0 => 2 * page_size,
            _ => 1 + rng.next() as usize % (page_size / 2),
        };
        let len = len.min((file_size - addr) as usize);

        if rng.next() % 3 == 0 {
            buf[..len].fill(op as u8);
            file.write(class, addr, &buf[..len]).into_diagnostic()?;
        } else {
            file.read(class, addr, &mut buf[..len]).into_diagnostic()?;
        }
    }

    file.flush().into_diagnostic()?;
    if let Some(page_buffer) = file.page_buffer() {
        page_buffer.print_stats();
    }
    file.close().into_diagnostic()?;
    info!(path = %path.display(), ops, "workload finished");

    Ok(())
}
