//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use talon_common::page::{PageId, PAGE_SIZE};
use talon_common::{Result, StorageConfig, TalonError};

/// Name of the page data file within the data directory.
const DATA_FILE_NAME: &str = "pages.dat";

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Manages reading and writing pages to the data file.
///
/// Pages are addressed by their id at `page_id * PAGE_SIZE` within a single
/// file that grows as pages are written. Page ids are handed out by the
/// buffer pool before any bytes reach disk, so a read past the current end
/// of the file is not an error: the buffer is zero-filled, which is exactly
/// the content of a never-written page.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open data file handle plus its current length in pages.
    inner: Mutex<DiskFile>,
}

struct DiskFile {
    file: File,
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager, opening (or creating) the data file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let path = config.data_dir.join(DATA_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            config,
            inner: Mutex::new(DiskFile { file, num_pages }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn check_page_id(page_id: PageId) -> Result<()> {
        if !page_id.is_valid() {
            return Err(TalonError::InvalidArgument(format!(
                "cannot address {page_id} on disk"
            )));
        }
        Ok(())
    }

    /// Reads a page from disk into the provided buffer.
    ///
    /// A page beyond the current end of the file reads as all zeroes.
    pub fn read_page(&self, page_id: PageId, buffer: &mut [u8; PAGE_SIZE]) -> Result<()> {
        Self::check_page_id(page_id)?;

        let mut inner = self.inner.lock();

        if page_id.0 as u32 >= inner.num_pages {
            buffer.fill(0);
            return Ok(());
        }

        inner.file.seek(SeekFrom::Start(page_id.byte_offset()))?;
        inner.file.read_exact(buffer)?;

        Ok(())
    }

    /// Writes a page to disk, extending the file if needed.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        Self::check_page_id(page_id)?;

        let mut inner = self.inner.lock();

        inner.file.seek(SeekFrom::Start(page_id.byte_offset()))?;
        inner.file.write_all(data)?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        // Update page count if we extended the file
        if page_id.0 as u32 >= inner.num_pages {
            inner.num_pages = page_id.0 as u32 + 1;
        }

        Ok(())
    }

    /// Returns the number of pages currently materialized in the file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.inner.lock().file.sync_all();
    }
}
