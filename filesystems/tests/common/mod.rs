// Synthetic image builder shared by the integration tests
#![allow(dead_code)]

use rofs_core::MemoryDevice;
use rofs_filesystems::ondisk::constants::*;
use rofs_filesystems::ondisk::superblock::superblock_checksum;
use std::sync::Arc;

pub const B: u64 = 4096;
pub const BLOCK_BITS: u8 = 12;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Byte `i` of a block filled by `fill_block`
pub fn pattern(block: u64, i: u64) -> u8 {
    (block.wrapping_mul(31) + i) as u8
}

/// Builds a single-device image in memory.
///
/// The superblock lives at byte 1024 of block 0, inodes start at block
/// `meta_blkaddr` (1 by default).
pub struct ImageBuilder {
    data: Vec<u8>,
    meta_blkaddr: u32,
    checksum: bool,
    extra_devices: u16,
    volume_name: String,
}

impl ImageBuilder {
    pub fn new(blocks: usize) -> Self {
        Self {
            data: vec![0u8; blocks * B as usize],
            meta_blkaddr: 1,
            checksum: false,
            extra_devices: 0,
            volume_name: "testvol".to_string(),
        }
    }

    pub fn with_checksum(mut self) -> Self {
        self.checksum = true;
        self
    }

    pub fn extra_devices(mut self, count: u16) -> Self {
        self.extra_devices = count;
        self
    }

    pub fn write(&mut self, offset: u64, bytes: &[u8]) {
        let start = offset as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Fill data block `block` with `pattern`
    pub fn fill_block(&mut self, block: u64) {
        let start = (block * B) as usize;
        for i in 0..B {
            self.data[start + i as usize] = pattern(block, i);
        }
    }

    pub fn inode_position(&self, nid: u64) -> u64 {
        self.meta_blkaddr as u64 * B + (nid << ISLOT_BITS)
    }

    /// Write an inode header; returns the byte position right after the
    /// header and xattrs.
    pub fn inode(&mut self, nid: u64, layout: u16, extended: bool, xattr_icount: u16, size: u64, i_u: u32) -> u64 {
        let pos = self.inode_position(nid);
        let header_size = (if extended { INODE_EXTENDED_SIZE } else { INODE_COMPACT_SIZE }) as usize;
        let mut raw = vec![0u8; header_size];

        let i_format = (layout << INODE_DATALAYOUT_SHIFT) | u16::from(extended);
        raw[0..2].copy_from_slice(&i_format.to_le_bytes());
        raw[2..4].copy_from_slice(&xattr_icount.to_le_bytes());
        raw[4..6].copy_from_slice(&0o100644u16.to_le_bytes());
        if extended {
            raw[8..16].copy_from_slice(&size.to_le_bytes());
        } else {
            raw[8..12].copy_from_slice(&(size as u32).to_le_bytes());
        }
        raw[16..20].copy_from_slice(&i_u.to_le_bytes());
        self.write(pos, &raw);

        let xattr_size = if xattr_icount == 0 {
            0
        } else {
            XATTR_IBODY_HEADER_SIZE + XATTR_ENTRY_SIZE * (xattr_icount as u32 - 1)
        };
        pos + header_size as u64 + xattr_size as u64
    }

    pub fn flat_plain(&mut self, nid: u64, raw_blkaddr: u32, size: u64) {
        self.inode(nid, DATALAYOUT_FLAT_PLAIN, false, 0, size, raw_blkaddr);
    }

    /// Flat inode whose last partial block is stored after the header
    pub fn flat_inline(&mut self, nid: u64, raw_blkaddr: u32, size: u64, xattr_icount: u16, tail: &[u8]) -> u64 {
        let tail_pos = self.inode(nid, DATALAYOUT_FLAT_INLINE, false, xattr_icount, size, raw_blkaddr);
        self.write(tail_pos, tail);
        tail_pos
    }

    /// Chunk-based inode with a block map; `NULL_ADDR` entries are holes.
    pub fn chunk_block_map(&mut self, nid: u64, chunk_blkbits: u16, size: u64, blocks: &[u32]) {
        let table = self.inode(nid, DATALAYOUT_CHUNK_BASED, false, 0, size, chunk_blkbits as u32);
        let table = table.div_ceil(BLOCK_MAP_ENTRY_SIZE) * BLOCK_MAP_ENTRY_SIZE;
        for (i, block) in blocks.iter().enumerate() {
            self.write(table + i as u64 * BLOCK_MAP_ENTRY_SIZE, &block.to_le_bytes());
        }
    }

    /// Chunk-based inode with chunk indexes given as (device id, blkaddr).
    pub fn chunk_indexes(&mut self, nid: u64, chunk_blkbits: u16, size: u64, chunks: &[(u16, u32)]) {
        let format = chunk_blkbits | CHUNK_FORMAT_INDEXES;
        let table = self.inode(nid, DATALAYOUT_CHUNK_BASED, true, 0, size, format as u32);
        let table = table.div_ceil(CHUNK_INDEX_SIZE) * CHUNK_INDEX_SIZE;
        for (i, (device_id, blkaddr)) in chunks.iter().enumerate() {
            let mut entry = [0u8; CHUNK_INDEX_SIZE as usize];
            entry[2..4].copy_from_slice(&device_id.to_le_bytes());
            entry[4..8].copy_from_slice(&blkaddr.to_le_bytes());
            self.write(table + i as u64 * CHUNK_INDEX_SIZE, &entry);
        }
    }

    pub fn build(mut self) -> Vec<u8> {
        let mut sb = vec![0u8; SUPER_SIZE];
        sb[0..4].copy_from_slice(&SUPER_MAGIC.to_le_bytes());
        let compat = if self.checksum { FEATURE_COMPAT_SB_CHKSUM } else { 0 };
        sb[8..12].copy_from_slice(&compat.to_le_bytes());
        sb[12] = BLOCK_BITS;
        sb[14..16].copy_from_slice(&36u16.to_le_bytes());
        sb[16..24].copy_from_slice(&8u64.to_le_bytes());
        sb[24..32].copy_from_slice(&1_700_000_000u64.to_le_bytes());
        sb[36..40].copy_from_slice(&((self.data.len() as u64 / B) as u32).to_le_bytes());
        sb[40..44].copy_from_slice(&self.meta_blkaddr.to_le_bytes());
        sb[48..64].copy_from_slice(&[0x5A; 16]);
        let name = self.volume_name.as_bytes();
        sb[64..64 + name.len()].copy_from_slice(name);
        sb[86..88].copy_from_slice(&self.extra_devices.to_le_bytes());
        self.write(SUPER_OFFSET, &sb);

        if self.checksum {
            let start = SUPER_OFFSET as usize;
            let crc = superblock_checksum(&self.data[start..B as usize]);
            self.write(SUPER_OFFSET + 4, &crc.to_le_bytes());
        }
        self.data
    }

    pub fn device(self) -> Arc<MemoryDevice> {
        Arc::new(MemoryDevice::new(self.build(), B as u32))
    }
}
