// Asynchronous request execution
// Flushed requests run on a tokio blocking pool; completion happens there,
// never on the thread that queued the pages.

use super::request::{ReadRequest, Submit};
use log::{debug, trace};
use rofs_core::{BlockDevice, RofsResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tokio::runtime::{Builder, Runtime};

/// Submission counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    /// Requests handed to the engine
    pub requests: u64,
    /// Pages carried by those requests
    pub pages: u64,
    /// Requests whose device read failed
    pub failed_requests: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    pages: AtomicU64,
    failed_requests: AtomicU64,
}

/// Requests submitted but not yet completed
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn begin(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn end(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    /// Mark a request in flight until the returned guard is dropped.
    fn track(self: &Arc<Self>) -> InFlightGuard {
        self.begin();
        InFlightGuard(self.clone())
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self.idle.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Ends one in-flight request on drop, including when completion panics
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.end();
    }
}

pub struct IoEngine {
    device: Arc<dyn BlockDevice>,
    runtime: Runtime,
    counters: Arc<Counters>,
    in_flight: Arc<InFlight>,
}

impl IoEngine {
    /// Engine completing requests on up to `workers` threads
    pub fn new(device: Arc<dyn BlockDevice>, workers: usize) -> RofsResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers.max(1))
            .thread_name("rofs-io")
            .build()?;
        debug!("I/O engine started with {} completion threads", workers.max(1));

        Ok(Self {
            device,
            runtime,
            counters: Arc::new(Counters::default()),
            in_flight: Arc::new(InFlight::default()),
        })
    }

    pub fn stats(&self) -> IoStats {
        IoStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            pages: self.counters.pages.load(Ordering::Relaxed),
            failed_requests: self.counters.failed_requests.load(Ordering::Relaxed),
        }
    }

    /// Block until every submitted request has completed.
    pub fn wait_idle(&self) {
        self.in_flight.wait_idle();
    }
}

impl Submit for IoEngine {
    fn submit(&self, request: ReadRequest) {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        self.counters.pages.fetch_add(request.len() as u64, Ordering::Relaxed);
        let guard = self.in_flight.track();

        let device = self.device.clone();
        let counters = self.counters.clone();

        self.runtime.spawn_blocking(move || {
            let _guard = guard;
            trace!("completing {:?}", request);
            if !request.execute(&*device) {
                counters.failed_requests.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
}

impl Drop for IoEngine {
    fn drop(&mut self) {
        self.wait_idle();
    }
}
