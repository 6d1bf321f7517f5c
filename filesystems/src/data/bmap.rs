// Block map query for external block-enumeration tools

use super::extent::{ExtentFlags, ExtentResolver};
use crate::ondisk::{DataLayout, InodeLayout};
use log::debug;

/// Physical block backing logical block `block` of `inode`, or 0 when the
/// block is unmapped, inline, or cannot be resolved.
///
/// Only flat layouts are meaningful here. The inline tail of a FlatInline
/// inode is never reported.
pub fn bmap(resolver: &ExtentResolver<'_>, inode: &InodeLayout, block: u64) -> u64 {
    let block_size = resolver.block_size();

    if inode.datalayout == DataLayout::FlatInline {
        let data_blocks = inode.size.div_ceil(block_size).saturating_sub(1);
        if block >= data_blocks {
            return 0;
        }
    }

    let Some(offset) = block.checked_mul(block_size) else {
        return 0;
    };

    match resolver.resolve_flat(inode, offset) {
        Ok(extent) if extent.flags == ExtentFlags::Mapped => extent.physical / block_size,
        Ok(_) => 0,
        Err(e) => {
            debug!("bmap of block {} for nid {} failed: {}", block, inode.nid, e);
            0
        }
    }
}
