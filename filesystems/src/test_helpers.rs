// Test helpers for data path testing

use crate::data::request::{ReadRequest, Submit};
use crate::ondisk::{ChunkFormat, DataLayout, InodeLayout};
use rofs_core::{BlockDevice, MemoryDevice, RofsError, RofsResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// In-memory device of `blocks` zeroed blocks with `writes` applied at
/// their byte offsets
pub fn device_with(block_size: u32, blocks: usize, writes: &[(u64, &[u8])]) -> Arc<MemoryDevice> {
    let mut data = vec![0u8; block_size as usize * blocks];
    for (offset, bytes) in writes {
        let start = *offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
    }
    Arc::new(MemoryDevice::new(data, block_size))
}

/// Flat inode with a compact header and no xattrs
pub fn flat_layout(datalayout: DataLayout, raw_blkaddr: u32, size: u64) -> InodeLayout {
    InodeLayout {
        nid: 1,
        datalayout,
        raw_blkaddr,
        size,
        meta_offset: 0,
        inode_isize: 32,
        xattr_isize: 0,
        chunk_bits: 12,
        chunk_format: ChunkFormat::BlockMap,
    }
}

/// Chunk-based inode whose header sits at `meta_offset`
pub fn chunk_layout(chunk_format: ChunkFormat, meta_offset: u64, chunk_bits: u32, size: u64) -> InodeLayout {
    InodeLayout {
        nid: 2,
        datalayout: DataLayout::ChunkBased,
        raw_blkaddr: 0,
        size,
        meta_offset,
        inode_isize: 32,
        xattr_isize: 0,
        chunk_bits,
        chunk_format,
    }
}

/// Device whose reads fail when they touch a block marked bad
pub struct FailingDevice {
    inner: MemoryDevice,
    bad_blocks: Mutex<HashSet<u64>>,
}

impl FailingDevice {
    pub fn new(data: Vec<u8>, block_size: u32) -> Self {
        Self {
            inner: MemoryDevice::new(data, block_size),
            bad_blocks: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_block(&self, block: u64) {
        self.bad_blocks.lock().unwrap().insert(block);
    }

    pub fn heal_block(&self, block: u64) {
        self.bad_blocks.lock().unwrap().remove(&block);
    }
}

impl BlockDevice for FailingDevice {
    fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    fn len_bytes(&self) -> u64 {
        self.inner.len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> RofsResult<()> {
        let block_size = self.block_size() as u64;
        let first = offset / block_size;
        let last = (offset + buf.len().max(1) as u64 - 1) / block_size;
        let bad = self.bad_blocks.lock().unwrap();
        if let Some(block) = (first..=last).find(|b| bad.contains(b)) {
            return Err(RofsError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("simulated media error at block {}", block),
            )));
        }
        drop(bad);
        self.inner.read_exact_at(offset, buf)
    }
}

/// Executes requests on the submitting thread and records their shape
pub struct RecordingSubmitter {
    device: Arc<dyn BlockDevice>,
    requests: Mutex<Vec<(u64, usize)>>,
}

impl RecordingSubmitter {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            device,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// (start block, page count) of every request submitted so far
    pub fn requests(&self) -> Vec<(u64, usize)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Submit for RecordingSubmitter {
    fn submit(&self, request: ReadRequest) {
        self.requests.lock().unwrap().push((request.start_block(), request.len()));
        request.execute(&*self.device);
    }
}
