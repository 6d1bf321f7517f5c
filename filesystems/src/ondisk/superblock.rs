// Superblock decoding and validation

use super::constants::*;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error};
use rofs_core::{RofsError, RofsResult};
use uuid::Uuid;

/// Decoded superblock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub checksum: u32,
    pub feature_compat: u32,
    pub block_bits: u8,
    pub root_nid: u16,
    pub inos: u64,
    pub build_time: u64,
    pub build_time_nsec: u32,
    pub blocks: u32,
    pub meta_blkaddr: u32,
    pub xattr_blkaddr: u32,
    pub uuid: Uuid,
    pub volume_name: String,
    pub feature_incompat: u32,
    pub extra_devices: u16,
}

impl Superblock {
    /// Decode the superblock from bytes starting at `SUPER_OFFSET`.
    pub fn decode(raw: &[u8]) -> RofsResult<Self> {
        if raw.len() < SUPER_SIZE {
            return Err(RofsError::corruption(format!(
                "superblock truncated: {} bytes", raw.len()
            )));
        }

        let magic = LittleEndian::read_u32(&raw[0..4]);
        if magic != SUPER_MAGIC {
            return Err(RofsError::corruption(format!(
                "Invalid superblock magic: 0x{:08X}", magic
            )));
        }

        let block_bits = raw[12];
        if !(MIN_BLOCK_BITS..=MAX_BLOCK_BITS).contains(&block_bits) {
            return Err(RofsError::not_supported(format!(
                "block size 2^{} is outside the supported range", block_bits
            )));
        }

        let extra_devices = LittleEndian::read_u16(&raw[86..88]);
        if extra_devices != 0 {
            return Err(RofsError::not_supported(format!(
                "image references {} extra devices; only a single device is supported",
                extra_devices
            )));
        }

        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&raw[48..64]);

        let name_bytes = &raw[64..80];
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
        let volume_name = String::from_utf8_lossy(&name_bytes[..name_len]).to_string();

        let sb = Superblock {
            checksum: LittleEndian::read_u32(&raw[4..8]),
            feature_compat: LittleEndian::read_u32(&raw[8..12]),
            block_bits,
            root_nid: LittleEndian::read_u16(&raw[14..16]),
            inos: LittleEndian::read_u64(&raw[16..24]),
            build_time: LittleEndian::read_u64(&raw[24..32]),
            build_time_nsec: LittleEndian::read_u32(&raw[32..36]),
            blocks: LittleEndian::read_u32(&raw[36..40]),
            meta_blkaddr: LittleEndian::read_u32(&raw[40..44]),
            xattr_blkaddr: LittleEndian::read_u32(&raw[44..48]),
            uuid: Uuid::from_bytes(uuid_bytes),
            volume_name,
            feature_incompat: LittleEndian::read_u32(&raw[80..84]),
            extra_devices,
        };

        debug!(
            "Superblock: block size {}, {} blocks, meta_blkaddr {}, root nid {}",
            sb.block_size(), sb.blocks, sb.meta_blkaddr, sb.root_nid
        );
        Ok(sb)
    }

    pub fn block_size(&self) -> u32 {
        1u32 << self.block_bits
    }

    pub fn has_checksum(&self) -> bool {
        self.feature_compat & FEATURE_COMPAT_SB_CHKSUM != 0
    }

    /// Number of bytes, starting at `SUPER_OFFSET`, covered by the checksum
    pub fn checksum_len(&self) -> usize {
        let block_size = self.block_size() as usize;
        if block_size > SUPER_OFFSET as usize {
            block_size - SUPER_OFFSET as usize
        } else {
            block_size
        }
    }

    /// Byte position of inode `nid` on the image
    pub fn inode_position(&self, nid: u64) -> RofsResult<u64> {
        let meta_base = (self.meta_blkaddr as u64) << self.block_bits;
        nid.checked_mul(1 << ISLOT_BITS)
            .and_then(|slot| meta_base.checked_add(slot))
            .ok_or_else(|| RofsError::InvalidInput(format!("nid {} is out of range", nid)))
    }

    /// Check the superblock checksum over `region` (`checksum_len` bytes
    /// starting at `SUPER_OFFSET`).
    pub fn verify_checksum(&self, region: &[u8]) -> RofsResult<()> {
        if !self.has_checksum() {
            return Ok(());
        }
        if region.len() < self.checksum_len() {
            return Err(RofsError::corruption("superblock checksum region truncated"));
        }

        let actual = superblock_checksum(&region[..self.checksum_len()]);
        if actual != self.checksum {
            error!(
                "superblock checksum mismatch: stored 0x{:08X}, computed 0x{:08X}",
                self.checksum, actual
            );
            return Err(RofsError::corruption(format!(
                "superblock checksum mismatch: stored 0x{:08X}, computed 0x{:08X}",
                self.checksum, actual
            )));
        }
        Ok(())
    }
}

/// crc32c of the superblock region with its checksum field zeroed.
///
/// The stored value is the raw register (seed !0, no final inversion), which
/// is the bitwise complement of the standard crc32c.
pub fn superblock_checksum(region: &[u8]) -> u32 {
    let mut buf = region.to_vec();
    buf[4..8].fill(0);
    !crc32c::crc32c(&buf)
}
