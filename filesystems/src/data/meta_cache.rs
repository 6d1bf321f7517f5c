// Metadata block cache
// Blocks are populated once under a per-block lock and never written again

use log::{debug, trace};
use rofs_core::{BlockDevice, RofsError, RofsResult};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// One cache slot; `data` is set exactly once, while `populate` is held
struct MetaSlot {
    populate: Mutex<()>,
    data: OnceLock<Arc<[u8]>>,
}

impl MetaSlot {
    fn new() -> Self {
        Self {
            populate: Mutex::new(()),
            data: OnceLock::new(),
        }
    }
}

/// Handle on a valid metadata block.
///
/// Holding it keeps the block's bytes alive even if the owner evicts it;
/// dropping it releases the reference.
#[derive(Debug, Clone)]
pub struct MetaBlock {
    index: u64,
    data: Arc<[u8]>,
}

impl MetaBlock {
    pub fn index(&self) -> u64 {
        self.index
    }
}

impl Deref for MetaBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetaCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Cache of metadata blocks keyed by block index
pub struct MetaBlockCache {
    device: Arc<dyn BlockDevice>,
    capacity: usize,
    slots: RwLock<HashMap<u64, Arc<MetaSlot>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MetaBlockCache {
    pub fn new(device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        Self {
            device,
            capacity: capacity.max(1),
            slots: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.device.block_size() as u64
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    /// Fetch block `index`, reading it from the device on first use.
    pub fn fetch(&self, index: u64) -> RofsResult<MetaBlock> {
        let slot = self.slot(index);

        if let Some(data) = slot.data.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(MetaBlock { index, data: data.clone() });
        }

        let _populating = slot.populate.lock().unwrap_or_else(PoisonError::into_inner);

        // Another reader may have populated the slot while we waited
        if let Some(data) = slot.data.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(MetaBlock { index, data: data.clone() });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!("metadata block {} not cached, reading", index);

        let bytes = match self.device.read_block(index) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("failed to read metadata block {}: {}", index, e);
                self.forget_empty(index, &slot);
                return Err(e);
            }
        };
        let data: Arc<[u8]> = bytes.into();
        let data = slot.data.get_or_init(|| data).clone();

        Ok(MetaBlock { index, data })
    }

    /// Read `len` bytes at byte position `pos`, spanning metadata blocks if
    /// needed.
    pub fn read_bytes(&self, pos: u64, len: usize) -> RofsResult<Vec<u8>> {
        let block_size = self.block_size();
        let mut out = Vec::with_capacity(len);
        let mut cursor = pos;

        while out.len() < len {
            let block = self.fetch(cursor / block_size)?;
            let start = (cursor % block_size) as usize;
            let take = (len - out.len()).min(block.len() - start);
            if take == 0 {
                return Err(RofsError::corruption(format!(
                    "metadata block {} shorter than expected", block.index()
                )));
            }
            out.extend_from_slice(&block[start..start + take]);
            cursor += take as u64;
        }

        Ok(out)
    }

    fn slot(&self, index: u64) -> Arc<MetaSlot> {
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slots.get(&index) {
                return slot.clone();
            }
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(&index) {
            return slot.clone();
        }

        if slots.len() >= self.capacity {
            // Empty slots nobody is populating are as good as gone
            let victim = slots
                .iter()
                .find(|(_, slot)| slot.data.get().is_some() || Arc::strong_count(slot) == 1)
                .map(|(&victim, _)| victim);
            if let Some(victim) = victim {
                slots.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!("evicted metadata block {}", victim);
            }
        }

        let slot = Arc::new(MetaSlot::new());
        slots.insert(index, slot.clone());
        slot
    }

    /// Remove `slot` after a failed population, unless it was replaced or
    /// filled in the meantime.
    fn forget_empty(&self, index: u64, slot: &Arc<MetaSlot>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let stale = slots
            .get(&index)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && current.data.get().is_none());
        if stale {
            slots.remove(&index);
        }
    }

    /// Drop block `index` from the cache. Outstanding handles stay valid.
    pub fn evict(&self, index: u64) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let removed = slots.remove(&index).is_some();
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn clear(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MetaCacheStats {
        MetaCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
