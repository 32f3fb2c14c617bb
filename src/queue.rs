//! Bounded report queue with a deferred drain worker
//!
//! The queue decouples report arrival (transport delivery thread, driver
//! code) from report processing. Enqueueing copies the bytes into a
//! preallocated slot under a short lock and never blocks; a dedicated worker
//! drains the ring and hands every report to the queue's sink.
//!
//! The ring keeps one slot free to tell full from empty: `head == tail` is
//! empty, and a write that would make `head + 1 == tail` is dropped. A queue
//! of capacity C therefore holds at most C - 1 reports.
//!
//! Every queue is tagged with the id of the device that created it. Only that
//! device may destroy it; see [`ReportQueue::release`].

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{DeviceError, QueueError, WorkError};
use crate::workqueue::DeferredWork;

/// Default number of ring slots
pub const DEFAULT_CAPACITY: usize = 32;

/// Default maximum report size in bytes (the HID maximum buffer size)
pub const DEFAULT_MAX_REPORT_SIZE: usize = 4096;

/// Queue geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of ring slots; one is always kept free
    pub capacity: usize,
    /// Size of each slot in bytes
    pub max_report_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_report_size: DEFAULT_MAX_REPORT_SIZE,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.capacity < 2 {
            return Err(DeviceError::InvalidConfig(format!(
                "capacity must be at least 2, got {}",
                self.capacity
            )));
        }
        if self.max_report_size == 0 {
            return Err(DeviceError::InvalidConfig(
                "max_report_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// What the queue's worker does with each report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDirection {
    /// Reports from the device, handed to the driver's receive handler
    Input,
    /// Reports to the device, handed to the connection's send primitive
    Output,
}

impl fmt::Display for QueueDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueDirection::Input => write!(f, "in"),
            QueueDirection::Output => write!(f, "out"),
        }
    }
}

/// Consumer of drained reports, run on the queue's worker thread
pub type ReportSink = Box<dyn FnMut(&[u8]) + Send>;

/// Counters for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Reports currently waiting in the ring
    pub queued: usize,
    /// Reports handed to the sink
    pub delivered: u64,
    /// Reports rejected (full, oversized, closed), discarded on destroy, or
    /// whose handler panicked
    pub dropped: u64,
    /// A drain run is scheduled but has not started yet
    pub pending: bool,
}

struct Slot {
    data: Box<[u8]>,
    len: usize,
}

struct Ring {
    slots: Vec<Slot>,
    head: usize,
    tail: usize,
    closed: bool,
}

impl Ring {
    fn new(config: &QueueConfig) -> Self {
        let slots = (0..config.capacity)
            .map(|_| Slot {
                data: vec![0u8; config.max_report_size].into_boxed_slice(),
                len: 0,
            })
            .collect();
        Self {
            slots,
            head: 0,
            tail: 0,
            closed: false,
        }
    }

    fn len(&self) -> usize {
        (self.head + self.slots.len() - self.tail) % self.slots.len()
    }
}

struct Shared {
    name: String,
    ring: Mutex<Ring>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Fixed-capacity FIFO of raw reports drained by a deferred worker
pub struct ReportQueue {
    shared: Arc<Shared>,
    direction: QueueDirection,
    owner: u64,
    config: QueueConfig,
    work: DeferredWork,
}

impl ReportQueue {
    /// Allocate the ring and spawn its worker
    ///
    /// `owner` is the id of the device allowed to destroy the queue.
    pub fn new(
        name: impl Into<String>,
        direction: QueueDirection,
        owner: u64,
        config: QueueConfig,
        sink: ReportSink,
    ) -> Result<Self, DeviceError> {
        config.validate()?;
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            ring: Mutex::new(Ring::new(&config)),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let mut sink = sink;
        let mut scratch = vec![0u8; config.max_report_size];
        let work = DeferredWork::spawn(format!("lgx-{name}"), move || {
            drain(&worker_shared, &mut sink, &mut scratch)
        })?;

        debug!(
            "queue {} ({}) allocated: {} slots of {} bytes",
            name, direction, config.capacity, config.max_report_size
        );

        Ok(Self {
            shared,
            direction,
            owner,
            config,
            work,
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn direction(&self) -> QueueDirection {
        self.direction
    }

    /// Id of the device that owns this queue
    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn max_report_size(&self) -> usize {
        self.config.max_report_size
    }

    /// Number of reports waiting
    pub fn len(&self) -> usize {
        self.shared.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.ring.lock().closed
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.len(),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            pending: self.work.is_pending(),
        }
    }

    /// Copy one report into the ring
    ///
    /// Never blocks on the worker and never allocates. A rejected report is
    /// logged and counted as dropped; the error is informational.
    pub fn enqueue(&self, data: &[u8]) -> Result<(), QueueError> {
        if data.len() > self.config.max_report_size {
            warn!(
                "{}: report of {} bytes exceeds slot size {}, dropped",
                self.shared.name,
                data.len(),
                self.config.max_report_size
            );
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::Oversized {
                len: data.len(),
                max: self.config.max_report_size,
            });
        }

        let mut ring = self.shared.ring.lock();
        if ring.closed {
            warn!("{}: enqueue on closed queue, dropped", self.shared.name);
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::Closed(self.shared.name.clone()));
        }

        let was_empty = ring.head == ring.tail;
        let newhead = (ring.head + 1) % self.config.capacity;
        if newhead == ring.tail {
            warn!("{}: queue full, report dropped", self.shared.name);
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::Full {
                queue: self.shared.name.clone(),
                capacity: self.config.capacity,
            });
        }

        let head = ring.head;
        let slot = &mut ring.slots[head];
        slot.data[..data.len()].copy_from_slice(data);
        slot.len = data.len();
        ring.head = newhead;

        // Lock order: ring, then work state
        if was_empty {
            self.work.schedule();
        }
        Ok(())
    }

    /// Block until the ring is empty and the worker idle
    ///
    /// Returns immediately when called from the worker thread.
    pub fn flush(&self) {
        self.work.flush();
    }

    /// Close the queue and join its worker
    ///
    /// Enqueues are rejected from here on. A report being handed to the sink
    /// is waited for; reports still in the ring are discarded and counted as
    /// dropped. Once this returns the sink is never called again. Idempotent.
    ///
    /// Fails with [`WorkError::CancelFromWorker`] when called from the sink.
    pub fn destroy(&self) -> Result<(), WorkError> {
        {
            let mut ring = self.shared.ring.lock();
            if !ring.closed {
                ring.closed = true;
                debug!("queue {} closing", self.shared.name);
            }
        }

        self.work.cancel_sync()?;

        let mut ring = self.shared.ring.lock();
        let remaining = ring.len();
        if remaining > 0 {
            warn!(
                "{}: {} queued reports discarded on destroy",
                self.shared.name, remaining
            );
            self.shared
                .dropped
                .fetch_add(remaining as u64, Ordering::Relaxed);
            ring.tail = ring.head;
        }
        Ok(())
    }

    /// Destroy the queue on behalf of device `requester`
    ///
    /// Only the owning device frees the queue. For any other device this is a
    /// validation-only release: nothing happens and `false` is returned.
    pub fn release(&self, requester: u64) -> Result<bool, WorkError> {
        if requester != self.owner {
            debug!(
                "queue {}: device {} is not the owner ({}), not released",
                self.shared.name, requester, self.owner
            );
            return Ok(false);
        }
        self.destroy()?;
        Ok(true)
    }
}

impl fmt::Debug for ReportQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportQueue")
            .field("name", &self.shared.name)
            .field("direction", &self.direction)
            .field("owner", &self.owner)
            .field("capacity", &self.config.capacity)
            .finish()
    }
}

/// Worker body: hand every queued report to the sink, oldest first
///
/// The ring lock is held only to copy a report out and to advance `tail`;
/// the sink runs unlocked. Reports enqueued mid-drain are picked up by the
/// same run. A report whose sink call panics is counted as dropped.
fn drain(shared: &Shared, sink: &mut ReportSink, scratch: &mut [u8]) {
    loop {
        let len = {
            let ring = shared.ring.lock();
            if ring.closed || ring.head == ring.tail {
                break;
            }
            let slot = &ring.slots[ring.tail];
            scratch[..slot.len].copy_from_slice(&slot.data[..slot.len]);
            slot.len
        };

        // A panicking sink consumes its report like any other; the tail must
        // advance or the ring never drains again.
        let delivered = catch_unwind(AssertUnwindSafe(|| sink(&scratch[..len]))).is_ok();

        let mut ring = shared.ring.lock();
        ring.tail = (ring.tail + 1) % ring.slots.len();
        if delivered {
            shared.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            error!("{}: report handler panicked, report dropped", shared.name);
            shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
