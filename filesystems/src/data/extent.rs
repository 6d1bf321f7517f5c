// Extent resolution
// Maps a logical file offset to where its bytes live on the image

use super::meta_cache::MetaBlockCache;
use crate::ondisk::constants::NULL_ADDR;
use crate::ondisk::{ChunkFormat, DataLayout, InodeLayout};
use byteorder::{ByteOrder, LittleEndian};
use log::{error, trace};
use rofs_core::{RofsError, RofsResult};

/// Where an extent's bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentFlags {
    /// Hole or past end of file; reads as zeroes
    Unmapped,
    /// Block-aligned run in the data region
    Mapped,
    /// Mapped inside a metadata block (inline tail)
    Meta,
}

/// Contiguous logical-to-physical byte mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub logical: u64,
    pub physical: u64,
    pub length: u64,
    pub flags: ExtentFlags,
}

impl Extent {
    fn unmapped(logical: u64, length: u64) -> Self {
        Self {
            logical,
            physical: 0,
            length,
            flags: ExtentFlags::Unmapped,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.flags != ExtentFlags::Unmapped
    }

    pub fn is_meta(&self) -> bool {
        self.flags == ExtentFlags::Meta
    }

    /// Physical byte position of logical offset `pos` inside this extent
    pub fn physical_at(&self, pos: u64) -> u64 {
        self.physical + (pos - self.logical)
    }

    /// One past the last logical byte covered
    pub fn logical_end(&self) -> u64 {
        self.logical + self.length
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// Resolves extents for inodes of one image.
///
/// Extents are computed on every call; nothing is cached here beyond the
/// metadata blocks the cache already holds.
pub struct ExtentResolver<'a> {
    cache: &'a MetaBlockCache,
    block_size: u64,
}

impl<'a> ExtentResolver<'a> {
    pub fn new(cache: &'a MetaBlockCache) -> Self {
        Self {
            block_size: cache.block_size(),
            cache,
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Resolve the extent containing logical offset `offset`.
    pub fn resolve(&self, inode: &InodeLayout, offset: u64) -> RofsResult<Extent> {
        if offset >= inode.size {
            // Out-of-bound access is left unmapped
            return Ok(Extent::unmapped(offset, 0));
        }

        let extent = match inode.datalayout {
            DataLayout::FlatPlain | DataLayout::FlatInline => self.resolve_flat(inode, offset)?,
            DataLayout::ChunkBased => self.resolve_chunk(inode, offset)?,
        };
        trace!(
            "nid {} offset {} -> {:?} @ {} (+{})",
            inode.nid, offset, extent.flags, extent.physical, extent.length
        );
        Ok(extent)
    }

    /// Resolve under the flat layout regardless of the inode's actual layout.
    pub fn resolve_flat(&self, inode: &InodeLayout, offset: u64) -> RofsResult<Extent> {
        let block_size = self.block_size;
        let tail_packing = inode.datalayout == DataLayout::FlatInline;
        let nblocks = inode.size.div_ceil(block_size);
        let last_block = nblocks - u64::from(tail_packing && nblocks > 0);
        let data_end = last_block * block_size;

        if offset < data_end {
            return Ok(Extent {
                logical: offset,
                physical: inode.raw_blkaddr as u64 * block_size + offset,
                length: data_end - offset,
                flags: ExtentFlags::Mapped,
            });
        }

        if tail_packing {
            // Inline tail: inode header, [xattrs], tail bytes
            let physical = inode.inline_data_offset() + (offset - data_end);
            let length = inode.size.saturating_sub(offset);

            if physical % block_size + length > block_size {
                error!(
                    "inline data crosses block boundary @ nid {} (offset {}, {} bytes)",
                    inode.nid, offset, length
                );
                return Err(RofsError::corruption(format!(
                    "inline data crosses block boundary @ nid {}", inode.nid
                )));
            }

            return Ok(Extent {
                logical: offset,
                physical,
                length,
                flags: ExtentFlags::Meta,
            });
        }

        error!(
            "internal error @ nid {} (size {}), offset 0x{:x}",
            inode.nid, inode.size, offset
        );
        Err(RofsError::corruption(format!(
            "offset {} of nid {} lies past its data blocks (size {})",
            offset, inode.nid, inode.size
        )))
    }

    fn resolve_chunk(&self, inode: &InodeLayout, offset: u64) -> RofsResult<Extent> {
        let block_size = self.block_size;
        if inode.chunk_bits < block_size.trailing_zeros() || inode.chunk_bits >= 64 {
            return Err(RofsError::corruption(format!(
                "nid {} has invalid chunk size 2^{}", inode.nid, inode.chunk_bits
            )));
        }

        let chunk_size = inode.chunk_size();
        let chunk_no = offset >> inode.chunk_bits;
        let chunk_count = inode.size.div_ceil(chunk_size);
        if chunk_no >= chunk_count {
            return Err(RofsError::corruption(format!(
                "chunk {} of nid {} is past its {} chunks", chunk_no, inode.nid, chunk_count
            )));
        }

        let unit = inode.chunk_format.unit_size();
        let pos = round_up(inode.inline_data_offset(), unit) + unit * chunk_no;
        let slot_offset = (pos % block_size) as usize;
        if slot_offset as u64 + unit > block_size {
            return Err(RofsError::corruption(format!(
                "chunk slot {} of nid {} straddles a metadata block", chunk_no, inode.nid
            )));
        }

        let block = self.cache.fetch(pos / block_size)?;
        let slot = &block[slot_offset..slot_offset + unit as usize];

        let logical = chunk_no << inode.chunk_bits;
        let length = chunk_size.min(round_up(inode.size - logical, block_size));

        let blkaddr = match inode.chunk_format {
            ChunkFormat::BlockMap => LittleEndian::read_u32(slot),
            ChunkFormat::IndexedChunks => {
                let device_id = LittleEndian::read_u16(&slot[2..4]);
                let blkaddr = LittleEndian::read_u32(&slot[4..8]);
                // Only one device is supported
                if blkaddr != NULL_ADDR && device_id != 0 {
                    error!(
                        "invalid device id {} @ chunk {} for nid {}",
                        device_id, chunk_no, inode.nid
                    );
                    return Err(RofsError::corruption(format!(
                        "invalid device id {} @ chunk {} for nid {}",
                        device_id, chunk_no, inode.nid
                    )));
                }
                blkaddr
            }
        };

        if blkaddr == NULL_ADDR {
            return Ok(Extent::unmapped(logical, length));
        }

        Ok(Extent {
            logical,
            physical: blkaddr as u64 * block_size,
            length,
            flags: ExtentFlags::Mapped,
        })
    }
}
