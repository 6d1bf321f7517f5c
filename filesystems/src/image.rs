// Image reader
// Validates the superblock and wires the metadata cache, I/O engine and read
// pipeline for one image.

use crate::data::{
    BatchReport, Extent, IoEngine, IoStats, MetaCacheStats, MetaBlockCache, Page, PageStatus,
    ReadPipeline,
};
use crate::ondisk::constants::{SUPER_OFFSET, SUPER_SIZE};
use crate::ondisk::{InodeLayout, Superblock};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use rofs_core::{BlockDevice, ReadConfig, RofsError, RofsResult};
use std::sync::Arc;

pub struct RofsImage {
    device: Arc<dyn BlockDevice>,
    superblock: Superblock,
    config: ReadConfig,
    pipeline: ReadPipeline<IoEngine>,
}

impl RofsImage {
    pub fn open(device: Arc<dyn BlockDevice>, config: ReadConfig) -> RofsResult<Self> {
        config.validate()?;

        let raw = device.read_at(SUPER_OFFSET, SUPER_SIZE)?;
        let superblock = Superblock::decode(&raw)?;
        if superblock.block_size() != device.block_size() {
            return Err(RofsError::not_supported(format!(
                "image block size {} does not match device block size {}",
                superblock.block_size(), device.block_size()
            )));
        }
        if superblock.has_checksum() {
            let region = device.read_at(SUPER_OFFSET, superblock.checksum_len())?;
            superblock.verify_checksum(&region)?;
        }

        info!(
            "Opened image {} ({}): {} blocks of {} bytes, root nid {}",
            superblock.uuid, superblock.volume_name, superblock.blocks,
            superblock.block_size(), superblock.root_nid
        );

        let cache = Arc::new(MetaBlockCache::new(device.clone(), config.meta_cache_blocks));
        let engine = Arc::new(IoEngine::new(device.clone(), config.io_workers)?);
        let pipeline = ReadPipeline::new(cache, engine, config.fan_out_limit);

        Ok(Self {
            device,
            superblock,
            config,
            pipeline,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn config(&self) -> &ReadConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    pub fn pipeline(&self) -> &ReadPipeline<IoEngine> {
        &self.pipeline
    }

    pub fn block_size(&self) -> u64 {
        self.superblock.block_size() as u64
    }

    /// Load the layout of inode `nid`.
    pub fn inode(&self, nid: u64) -> RofsResult<InodeLayout> {
        let pos = self.superblock.inode_position(nid)?;
        if pos >= self.device.len_bytes() {
            return Err(RofsError::InvalidInput(format!(
                "nid {} lies past the end of the image", nid
            )));
        }
        let cache = self.pipeline.cache();

        let head = cache.read_bytes(pos, 2)?;
        let header_size = InodeLayout::header_size(LittleEndian::read_u16(&head));
        let raw = cache.read_bytes(pos, header_size as usize)?;

        let inode = InodeLayout::decode(nid, pos, self.superblock.block_bits, &raw)?;
        debug!("nid {} @ {}: {:?}, {} bytes", nid, pos, inode.datalayout, inode.size);
        Ok(inode)
    }

    pub fn read_page(&self, inode: &InodeLayout, page: &Arc<Page>) -> RofsResult<()> {
        self.pipeline.read_page(inode, page)
    }

    pub fn read_page_sync(&self, inode: &InodeLayout, page: &Arc<Page>) -> RofsResult<()> {
        self.pipeline.read_page_sync(inode, page)
    }

    pub fn read_pages(&self, inode: &InodeLayout, pages: &[Arc<Page>]) -> BatchReport {
        self.pipeline.read_pages(inode, pages)
    }

    pub fn bmap(&self, inode: &InodeLayout, block: u64) -> u64 {
        self.pipeline.bmap(inode, block)
    }

    /// Every extent of `inode`, in logical order.
    pub fn extents(&self, inode: &InodeLayout) -> RofsResult<Vec<Extent>> {
        let resolver = self.pipeline.resolver();
        let mut extents = Vec::new();
        let mut offset = 0;

        while offset < inode.size {
            let extent = resolver.resolve(inode, offset)?;
            if extent.length == 0 {
                break;
            }
            offset = extent.logical_end();
            extents.push(extent);
        }
        Ok(extents)
    }

    /// Read the whole content of `inode`.
    ///
    /// Pages are read in batches of `readahead_pages`; a page the batch left
    /// in Error is retried synchronously and its error returned.
    pub fn read_file(&self, inode: &InodeLayout) -> RofsResult<Vec<u8>> {
        let size = usize::try_from(inode.size).map_err(|_| {
            RofsError::InvalidInput(format!("nid {} is too large to read at once", inode.nid))
        })?;
        let block_size = self.block_size();
        let total = inode.size.div_ceil(block_size);
        let batch = self.config.readahead_pages as u64;

        let mut data = Vec::with_capacity(size);
        let mut index = 0;
        while index < total {
            let end = (index + batch).min(total);
            let pages: Vec<Arc<Page>> = (index..end)
                .map(|i| Page::new(i, block_size as usize))
                .collect();

            let report = self.pipeline.read_pages(inode, &pages);
            debug!("nid {} pages {}..{}: {:?}", inode.nid, index, end, report);

            for page in &pages {
                if self.pipeline.wait(page) != PageStatus::UpToDate {
                    self.pipeline.read_page_sync(inode, page)?;
                }
                data.extend_from_slice(&page.data());
            }
            index = end;
        }

        data.truncate(size);
        Ok(data)
    }

    pub fn io_stats(&self) -> IoStats {
        self.pipeline.submitter().stats()
    }

    pub fn cache_stats(&self) -> MetaCacheStats {
        self.pipeline.cache().stats()
    }
}
