// Page: one block-sized buffer of a file with its own lock and status
//
// The lock is a flag rather than a mutex guard so that it can be handed from
// the thread that queues a read to the thread that completes it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Read state of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// Never read
    Empty,
    /// Queued in a read request
    Locked,
    /// Holds valid data
    UpToDate,
    /// Last read attempt failed
    Error,
}

struct PageState {
    status: PageStatus,
    locked: bool,
    data: Vec<u8>,
}

pub struct Page {
    index: u64,
    state: Mutex<PageState>,
    unlocked: Condvar,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("status", &state.status)
            .field("locked", &state.locked)
            .finish()
    }
}

impl Page {
    /// New empty page for logical block `index`
    pub fn new(index: u64, block_size: usize) -> Arc<Self> {
        Arc::new(Self {
            index,
            state: Mutex::new(PageState {
                status: PageStatus::Empty,
                locked: false,
                data: vec![0u8; block_size],
            }),
            unlocked: Condvar::new(),
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn status(&self) -> PageStatus {
        self.state().status
    }

    pub fn is_uptodate(&self) -> bool {
        self.status() == PageStatus::UpToDate
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    /// Take the page lock, waiting for any current holder to release it.
    pub fn lock(self: &Arc<Self>) -> LockedPage {
        let mut state = self.state();
        while state.locked {
            state = self.unlocked.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.locked = true;
        LockedPage { page: self.clone() }
    }

    /// Take the page lock only if nobody holds it.
    pub fn try_lock(self: &Arc<Self>) -> Option<LockedPage> {
        let mut state = self.state();
        if state.locked {
            return None;
        }
        state.locked = true;
        Some(LockedPage { page: self.clone() })
    }

    /// Block until the page is unlocked and return its status.
    pub fn wait_unlocked(&self) -> PageStatus {
        let mut state = self.state();
        while state.locked {
            state = self.unlocked.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.status
    }

    /// Copy of the page contents
    pub fn data(&self) -> Vec<u8> {
        self.state().data.clone()
    }

    fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unlock(&self) {
        let mut state = self.state();
        state.locked = false;
        drop(state);
        self.unlocked.notify_all();
    }
}

/// Exclusive hold on a page. Dropping it unlocks the page.
pub struct LockedPage {
    page: Arc<Page>,
}

impl std::fmt::Debug for LockedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LockedPage").field(&self.page).finish()
    }
}

impl LockedPage {
    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn index(&self) -> u64 {
        self.page.index
    }

    pub fn status(&self) -> PageStatus {
        self.page.status()
    }

    pub fn set_status(&self, status: PageStatus) {
        self.page.state().status = status;
    }

    pub fn len(&self) -> usize {
        self.page.state().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` over the page buffer.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut state = self.page.state();
        f(&mut state.data)
    }

    /// Fill the page from `src` and zero whatever `src` does not cover.
    pub fn fill(&self, src: &[u8]) {
        self.with_buffer(|buf| {
            let n = src.len().min(buf.len());
            buf[..n].copy_from_slice(&src[..n]);
            buf[n..].fill(0);
        });
    }

    pub fn zero(&self) {
        self.with_buffer(|buf| buf.fill(0));
    }
}

impl Drop for LockedPage {
    fn drop(&mut self) {
        self.page.unlock();
    }
}
