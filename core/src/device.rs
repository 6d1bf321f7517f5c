use crate::{RofsError, RofsResult};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(not(unix))]
use std::sync::Mutex;
use tracing::{debug, trace};

/// Block-addressable backing store for an image.
///
/// Reads are positional and must be safe to issue from several threads at
/// once: the data path reads metadata on the caller's thread while batched
/// requests complete on worker threads.
pub trait BlockDevice: Send + Sync {
    /// Fixed block size in bytes.
    fn block_size(&self) -> u32;

    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Fill `buf` from byte `offset`; short reads are errors.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> RofsResult<()>;

    /// Read `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> RofsResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Read one whole block by index.
    fn read_block(&self, block: u64) -> RofsResult<Vec<u8>> {
        let block_size = self.block_size() as u64;
        self.read_at(block * block_size, block_size as usize)
    }
}

fn check_range(offset: u64, len: usize, device_len: u64) -> RofsResult<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or_else(|| RofsError::InvalidInput("read range overflows u64".to_string()))?;
    if end > device_len {
        return Err(RofsError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("read out of bounds: offset={} len={} device_len={}", offset, len, device_len),
        )));
    }
    Ok(())
}

/// Image file opened read-only.
///
/// On unix reads are positional (`pread`) and run concurrently; elsewhere
/// they seek and read under a lock.
pub struct FileDevice {
    path: PathBuf,
    file: File,
    #[cfg(not(unix))]
    seek_lock: Mutex<()>,
    len: u64,
    block_size: u32,
}

impl FileDevice {
    pub fn open(path: impl AsRef<Path>, block_size: u32) -> RofsResult<Self> {
        if !block_size.is_power_of_two() || block_size < 512 {
            return Err(RofsError::InvalidInput(format!("Invalid block size: {}", block_size)));
        }

        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        debug!(path = %path.display(), len, block_size, "opened image file");

        Ok(Self {
            path,
            file,
            #[cfg(not(unix))]
            seek_lock: Mutex::new(()),
            len,
            block_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockDevice for FileDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> RofsResult<()> {
        check_range(offset, buf.len(), self.len)?;
        trace!(offset, len = buf.len(), "file read");

        #[cfg(unix)]
        self.file.read_exact_at(buf, offset)?;

        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};

            let _guard = self.seek_lock.lock()
                .map_err(|_| RofsError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "image file lock poisoned",
                )))?;
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)?;
        }
        Ok(())
    }
}

/// Image held entirely in memory.
///
/// Counts every read so callers can tell whether an operation touched the
/// medium at all.
pub struct MemoryDevice {
    data: Vec<u8>,
    block_size: u32,
    reads: AtomicU64,
}

impl MemoryDevice {
    pub fn new(data: Vec<u8>, block_size: u32) -> Self {
        Self {
            data,
            block_size,
            reads: AtomicU64::new(0),
        }
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl BlockDevice for MemoryDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn len_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> RofsResult<()> {
        check_range(offset, buf.len(), self.data.len() as u64)?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }
}
