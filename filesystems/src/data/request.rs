// Batched read requests
// Coalesces physically contiguous pages into one device read

use super::page::{LockedPage, PageStatus};
use log::{debug, warn};
use rofs_core::{BlockDevice, RofsResult};

/// Destination for flushed requests.
///
/// Implementations own completion: every page of the request must end up
/// UpToDate or Error and be unlocked, which `ReadRequest::complete` (or
/// dropping the request) takes care of.
pub trait Submit {
    fn submit(&self, request: ReadRequest);
}

/// Run of pages read from consecutive physical blocks
pub struct ReadRequest {
    start_block: u64,
    capacity: usize,
    pages: Vec<LockedPage>,
}

impl std::fmt::Debug for ReadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadRequest")
            .field("start_block", &self.start_block)
            .field("pages", &self.pages.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl ReadRequest {
    pub fn new(start_block: u64, capacity: usize) -> Self {
        Self {
            start_block,
            capacity,
            pages: Vec::with_capacity(capacity),
        }
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.pages.len()
    }

    /// Physical block the next page must come from
    pub fn next_block(&self) -> u64 {
        self.start_block + self.pages.len() as u64
    }

    /// Logical indices of the queued pages, in order
    pub fn page_indices(&self) -> Vec<u64> {
        self.pages.iter().map(LockedPage::index).collect()
    }

    fn push(&mut self, page: LockedPage, physical_block: u64) -> Result<(), LockedPage> {
        if self.remaining() == 0 || physical_block != self.next_block() {
            return Err(page);
        }
        page.set_status(PageStatus::Locked);
        self.pages.push(page);
        Ok(())
    }

    /// Finish the request: every page becomes UpToDate on success or Error on
    /// failure, then is unlocked.
    pub fn complete(mut self, result: RofsResult<Vec<u8>>) -> bool {
        let pages = std::mem::take(&mut self.pages);
        match result {
            Ok(data) => {
                let chunk = if pages.is_empty() { 0 } else { data.len() / pages.len() };
                for (page, src) in pages.into_iter().zip(data.chunks(chunk.max(1))) {
                    page.fill(src);
                    page.set_status(PageStatus::UpToDate);
                }
                true
            }
            Err(e) => {
                warn!(
                    "read of {} blocks at block {} failed: {}",
                    pages.len(), self.start_block, e
                );
                for page in pages {
                    page.set_status(PageStatus::Error);
                }
                false
            }
        }
    }

    /// Read the request's blocks from `device` and complete it.
    pub fn execute(self, device: &dyn BlockDevice) -> bool {
        let block_size = device.block_size() as u64;
        let result = device.read_at(self.start_block * block_size, self.len() * block_size as usize);
        self.complete(result)
    }
}

impl Drop for ReadRequest {
    fn drop(&mut self) {
        // Never completed: pages must not stay locked or appear valid
        for page in self.pages.drain(..) {
            page.set_status(PageStatus::Error);
        }
    }
}

/// Builds at most one open request at a time and hands it to `submitter`
/// when it can no longer grow.
pub struct ReadRequestBuilder<'a, S: Submit + ?Sized> {
    submitter: &'a S,
    current: Option<ReadRequest>,
}

impl<'a, S: Submit + ?Sized> ReadRequestBuilder<'a, S> {
    pub fn new(submitter: &'a S) -> Self {
        Self {
            submitter,
            current: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<&ReadRequest> {
        self.current.as_ref()
    }

    /// Start a new request at `start_block`; any open request is flushed.
    pub fn open(&mut self, start_block: u64, capacity: usize) {
        self.flush();
        debug!("opening read request at block {} for up to {} pages", start_block, capacity);
        self.current = Some(ReadRequest::new(start_block, capacity.max(1)));
    }

    /// Append `page` read from `physical_block`.
    ///
    /// Hands the page back when there is no open request, it is full, or the
    /// block does not continue the run.
    pub fn append(&mut self, page: LockedPage, physical_block: u64) -> Result<(), LockedPage> {
        match self.current.as_mut() {
            Some(request) => request.push(page, physical_block),
            None => Err(page),
        }
    }

    /// Submit the open request, if any.
    pub fn flush(&mut self) {
        if let Some(request) = self.current.take() {
            if request.is_empty() {
                return;
            }
            debug!(
                "submitting read of {} pages at block {}",
                request.len(), request.start_block()
            );
            self.submitter.submit(request);
        }
    }
}

impl<S: Submit + ?Sized> Drop for ReadRequestBuilder<'_, S> {
    fn drop(&mut self) {
        self.flush();
    }
}
