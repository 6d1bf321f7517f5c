// Inode header decoding
// Produces the layout descriptor the data path works from

use super::constants::*;
use byteorder::{ByteOrder, LittleEndian};
use rofs_core::{RofsError, RofsResult};

/// How an inode's data is laid out on the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLayout {
    /// One contiguous block run
    FlatPlain,
    /// Contiguous block run plus a tail packed after the inode header
    FlatInline,
    /// Fixed-size chunks mapped through a per-inode slot table
    ChunkBased,
}

/// Slot format of a chunk-based inode's table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFormat {
    /// Bare 4-byte block numbers
    BlockMap,
    /// 8-byte { advise, device id, block } entries
    IndexedChunks,
}

impl ChunkFormat {
    /// Size of one table slot in bytes
    pub fn unit_size(self) -> u64 {
        match self {
            ChunkFormat::BlockMap => BLOCK_MAP_ENTRY_SIZE,
            ChunkFormat::IndexedChunks => CHUNK_INDEX_SIZE,
        }
    }
}

/// Everything the data path needs to know about one inode.
///
/// Supplied per call and never mutated by the data path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeLayout {
    pub nid: u64,
    pub datalayout: DataLayout,
    /// First data block of a flat inode
    pub raw_blkaddr: u32,
    /// File size in bytes
    pub size: u64,
    /// Byte position of the inode header on the image
    pub meta_offset: u64,
    pub inode_isize: u32,
    pub xattr_isize: u32,
    /// log2 of the chunk size in bytes
    pub chunk_bits: u32,
    pub chunk_format: ChunkFormat,
}

impl InodeLayout {
    /// Header size implied by the first two bytes (`i_format`) of an inode.
    pub fn header_size(i_format: u16) -> u32 {
        if i_format & INODE_VERSION_EXTENDED != 0 {
            INODE_EXTENDED_SIZE
        } else {
            INODE_COMPACT_SIZE
        }
    }

    /// Decode an inode header.
    ///
    /// `raw` must hold at least the header (32 or 64 bytes) starting at the
    /// inode's position `meta_offset`.
    pub fn decode(nid: u64, meta_offset: u64, block_bits: u8, raw: &[u8]) -> RofsResult<Self> {
        if raw.len() < 2 {
            return Err(RofsError::corruption(format!("inode {} header truncated", nid)));
        }

        let i_format = LittleEndian::read_u16(&raw[0..2]);
        let inode_isize = Self::header_size(i_format);
        if raw.len() < inode_isize as usize {
            return Err(RofsError::corruption(format!(
                "inode {} header truncated: {} of {} bytes",
                nid, raw.len(), inode_isize
            )));
        }

        let xattr_icount = LittleEndian::read_u16(&raw[2..4]);
        let xattr_isize = if xattr_icount == 0 {
            0
        } else {
            XATTR_IBODY_HEADER_SIZE + XATTR_ENTRY_SIZE * (xattr_icount as u32 - 1)
        };

        let size = if inode_isize == INODE_EXTENDED_SIZE {
            LittleEndian::read_u64(&raw[8..16])
        } else {
            LittleEndian::read_u32(&raw[8..12]) as u64
        };
        let i_u = LittleEndian::read_u32(&raw[16..20]);

        let layout_bits = (i_format >> INODE_DATALAYOUT_SHIFT) & INODE_DATALAYOUT_MASK;
        let datalayout = match layout_bits {
            DATALAYOUT_FLAT_PLAIN => DataLayout::FlatPlain,
            DATALAYOUT_FLAT_INLINE => DataLayout::FlatInline,
            DATALAYOUT_CHUNK_BASED => DataLayout::ChunkBased,
            DATALAYOUT_COMPRESSED_FULL | DATALAYOUT_COMPRESSED_COMPACT => {
                return Err(RofsError::not_supported(format!(
                    "inode {} is compressed; compressed layouts are read by the decode layer",
                    nid
                )));
            }
            other => {
                return Err(RofsError::corruption(format!(
                    "inode {} has unknown data layout {}", nid, other
                )));
            }
        };

        let mut layout = InodeLayout {
            nid,
            datalayout,
            raw_blkaddr: 0,
            size,
            meta_offset,
            inode_isize,
            xattr_isize,
            chunk_bits: block_bits as u32,
            chunk_format: ChunkFormat::BlockMap,
        };

        if datalayout == DataLayout::ChunkBased {
            let format = (i_u & 0xFFFF) as u16;
            if format & !CHUNK_FORMAT_ALL != 0 {
                return Err(RofsError::not_supported(format!(
                    "inode {} uses unsupported chunk format 0x{:04X}", nid, format
                )));
            }
            layout.chunk_bits = block_bits as u32 + (format & CHUNK_FORMAT_BLKBITS_MASK) as u32;
            if format & CHUNK_FORMAT_INDEXES != 0 {
                layout.chunk_format = ChunkFormat::IndexedChunks;
            }
        } else {
            layout.raw_blkaddr = i_u;
        }

        Ok(layout)
    }

    /// Byte position right after the inode header and inline xattrs
    pub fn inline_data_offset(&self) -> u64 {
        self.meta_offset + self.inode_isize as u64 + self.xattr_isize as u64
    }

    pub fn chunk_size(&self) -> u64 {
        1u64 << self.chunk_bits
    }
}
