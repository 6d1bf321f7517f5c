// Read pipeline
// Turns page reads into hole fills, inline copies, or batched device reads

use super::bmap;
use super::engine::IoEngine;
use super::extent::{ExtentFlags, ExtentResolver};
use super::meta_cache::MetaBlockCache;
use super::page::{LockedPage, Page, PageStatus};
use super::request::{ReadRequestBuilder, Submit};
use crate::ondisk::InodeLayout;
use log::{trace, warn};
use rofs_core::{RofsError, RofsResult};
use std::sync::Arc;

/// What a batch read did with each page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Already valid, or locked by another reader
    pub skipped: usize,
    /// Zero-filled holes
    pub holes: usize,
    /// Filled from an inline tail
    pub inline: usize,
    /// Queued in device read requests
    pub queued: usize,
    /// Logical indices of pages that could not be resolved
    pub failed: Vec<u64>,
}

/// Outcome of resolving one page
enum Prepared {
    /// Zero-filled in place
    Hole,
    /// Copied from an inline tail in place
    Inline,
    /// Needs a device read of `block`; `span` blocks remain in the extent
    Io { block: u64, span: usize },
}

pub struct ReadPipeline<S: Submit = IoEngine> {
    cache: Arc<MetaBlockCache>,
    submitter: Arc<S>,
    fan_out_limit: usize,
}

impl<S: Submit> ReadPipeline<S> {
    pub fn new(cache: Arc<MetaBlockCache>, submitter: Arc<S>, fan_out_limit: usize) -> Self {
        Self {
            cache,
            submitter,
            fan_out_limit: fan_out_limit.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<MetaBlockCache> {
        &self.cache
    }

    pub fn submitter(&self) -> &Arc<S> {
        &self.submitter
    }

    pub fn block_size(&self) -> u64 {
        self.cache.block_size()
    }

    pub fn resolver(&self) -> ExtentResolver<'_> {
        ExtentResolver::new(&self.cache)
    }

    /// Read one page.
    ///
    /// Holes and inline tails are filled before returning; a plain mapped
    /// page is submitted and completes asynchronously (see `wait`). A
    /// resolution failure leaves the page in Error and is returned.
    pub fn read_page(&self, inode: &InodeLayout, page: &Arc<Page>) -> RofsResult<()> {
        let locked = page.lock();
        if locked.status() == PageStatus::UpToDate {
            return Ok(());
        }

        let block = match self.prepare(&self.resolver(), inode, &locked) {
            Ok(Prepared::Hole) | Ok(Prepared::Inline) => return Ok(()),
            Ok(Prepared::Io { block, .. }) => block,
            Err(e) => {
                locked.set_status(PageStatus::Error);
                return Err(e);
            }
        };

        let mut builder = ReadRequestBuilder::new(&*self.submitter);
        builder.open(block, 1);
        if let Err(locked) = builder.append(locked, block) {
            locked.set_status(PageStatus::Error);
            return Err(RofsError::InvalidInput(format!(
                "page {} could not be queued at block {}", locked.index(), block
            )));
        }
        builder.flush();
        Ok(())
    }

    /// Read a page and wait for it; a failed device read is an error.
    pub fn read_page_sync(&self, inode: &InodeLayout, page: &Arc<Page>) -> RofsResult<()> {
        self.read_page(inode, page)?;
        match self.wait(page) {
            PageStatus::UpToDate => Ok(()),
            status => Err(RofsError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("read of page {} of nid {} ended {:?}", page.index(), inode.nid, status),
            ))),
        }
    }

    /// Block until `page` is unlocked and return its final status.
    pub fn wait(&self, page: &Page) -> PageStatus {
        page.wait_unlocked()
    }

    /// Best-effort read of `pages`, given in logical order.
    ///
    /// A page that cannot be resolved is marked Error and the rest of the
    /// batch carries on.
    pub fn read_pages(&self, inode: &InodeLayout, pages: &[Arc<Page>]) -> BatchReport {
        let mut report = BatchReport::default();
        let mut builder = ReadRequestBuilder::new(&*self.submitter);
        let resolver = self.resolver();
        let total = pages.len();

        for (i, page) in pages.iter().enumerate() {
            let Some(locked) = page.try_lock() else {
                trace!("page {} is locked elsewhere, skipping", page.index());
                builder.flush();
                report.skipped += 1;
                continue;
            };
            if locked.status() == PageStatus::UpToDate {
                builder.flush();
                report.skipped += 1;
                continue;
            }

            let (block, span) = match self.prepare(&resolver, inode, &locked) {
                Ok(Prepared::Io { block, span }) => (block, span),
                Ok(settled) => {
                    // Filled in place, so the contiguous run ends here
                    builder.flush();
                    match settled {
                        Prepared::Hole => report.holes += 1,
                        _ => report.inline += 1,
                    }
                    continue;
                }
                Err(e) => {
                    warn!(
                        "readahead error at page {} of nid {}: {}",
                        locked.index(), inode.nid, e
                    );
                    locked.set_status(PageStatus::Error);
                    drop(locked);
                    builder.flush();
                    report.failed.push(page.index());
                    continue;
                }
            };

            let locked = match builder.append(locked, block) {
                Ok(()) => {
                    report.queued += 1;
                    continue;
                }
                Err(locked) => locked,
            };

            builder.open(block, (total - i).min(span).min(self.fan_out_limit));
            match builder.append(locked, block) {
                Ok(()) => report.queued += 1,
                Err(locked) => {
                    locked.set_status(PageStatus::Error);
                    report.failed.push(locked.index());
                }
            }
        }

        builder.flush();
        report
    }

    /// Single-block logical-to-physical lookup, 0 when unmapped.
    pub fn bmap(&self, inode: &InodeLayout, block: u64) -> u64 {
        bmap::bmap(&self.resolver(), inode, block)
    }

    /// Resolve the page and fill it in place when no device read is needed.
    fn prepare(
        &self,
        resolver: &ExtentResolver<'_>,
        inode: &InodeLayout,
        page: &LockedPage,
    ) -> RofsResult<Prepared> {
        let block_size = self.block_size();
        let pos = page.index()
            .checked_mul(block_size)
            .ok_or_else(|| RofsError::InvalidInput(format!("page index {} overflows", page.index())))?;
        let extent = resolver.resolve(inode, pos)?;

        match extent.flags {
            ExtentFlags::Unmapped => {
                trace!("page {} of nid {} is a hole", page.index(), inode.nid);
                page.zero();
                page.set_status(PageStatus::UpToDate);
                Ok(Prepared::Hole)
            }
            ExtentFlags::Meta => {
                if extent.length > block_size {
                    return Err(RofsError::corruption(format!(
                        "inline extent of {} bytes exceeds a block for nid {}",
                        extent.length, inode.nid
                    )));
                }

                let meta = self.cache.fetch(extent.physical / block_size)?;
                let start = (extent.physical % block_size) as usize;
                page.fill(&meta[start..start + extent.length as usize]);
                page.set_status(PageStatus::UpToDate);
                Ok(Prepared::Inline)
            }
            ExtentFlags::Mapped => {
                let physical = extent.physical_at(pos);
                if physical % block_size != 0 {
                    return Err(RofsError::corruption(format!(
                        "unaligned data extent at {} for nid {}", physical, inode.nid
                    )));
                }
                let span = (extent.logical_end() - pos).div_ceil(block_size) as usize;
                Ok(Prepared::Io { block: physical / block_size, span })
            }
        }
    }
}
