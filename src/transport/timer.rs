//! Retransmission timers and clocks.
//!
//! - [`RetransmitTimer`]: the single timer slot of a connection. Arming
//!   always cancels whatever was pending, so there is never more than one
//!   live timer per connection.
//! - [`TimerQueue`]: a deadline-ordered [`TimerService`] that an event loop
//!   polls with [`TimerQueue::next_deadline`] and [`TimerQueue::pop_expired`].
//! - [`SystemClock`] and [`ManualClock`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::core::{Clock, ConnectionId, TimerHandle, TimerService};

/// Per-connection retransmission timer slot.
#[derive(Debug, Default)]
pub struct RetransmitTimer {
    pending: Option<TimerHandle>,
}

impl RetransmitTimer {
    /// Create an idle timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending timer and schedule a new one after `delay`.
    pub fn arm(&mut self, timers: &dyn TimerService, connection: ConnectionId, delay: Duration) {
        self.cancel(timers);
        self.pending = Some(timers.schedule_after(connection, delay));
    }

    /// Arm only if nothing is pending.
    pub fn ensure_armed(
        &mut self,
        timers: &dyn TimerService,
        connection: ConnectionId,
        delay: Duration,
    ) {
        if self.pending.is_none() {
            self.arm(timers, connection, delay);
        }
    }

    /// Cancel the pending timer, if any.
    pub fn cancel(&mut self, timers: &dyn TimerService) {
        if let Some(handle) = self.pending.take() {
            timers.cancel(handle);
        }
    }

    /// Accept an expiry for `handle`.
    ///
    /// Returns `false` for a stale handle (one that was re-armed or cancelled
    /// since); the slot is cleared only when the handle is current.
    pub fn fire(&mut self, handle: TimerHandle) -> bool {
        if self.pending == Some(handle) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Check if a timer is pending.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Handle of the pending timer.
    pub fn handle(&self) -> Option<TimerHandle> {
        self.pending
    }
}

/// Deadline-ordered timer service.
pub struct TimerQueue {
    clock: Rc<dyn Clock>,
    next_handle: Cell<u64>,
    by_deadline: RefCell<BTreeMap<(Instant, TimerHandle), ConnectionId>>,
    deadlines: RefCell<HashMap<TimerHandle, Instant>>,
}

impl TimerQueue {
    /// Create an empty queue that reads time from `clock`.
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            next_handle: Cell::new(1),
            by_deadline: RefCell::new(BTreeMap::new()),
            deadlines: RefCell::new(HashMap::new()),
        }
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline
            .borrow()
            .keys()
            .next()
            .map(|(deadline, _)| *deadline)
    }

    /// Remove and return every timer due at or before `now`, earliest first.
    pub fn pop_expired(&self, now: Instant) -> Vec<(ConnectionId, TimerHandle)> {
        let mut by_deadline = self.by_deadline.borrow_mut();
        let mut deadlines = self.deadlines.borrow_mut();
        let mut expired = Vec::new();

        while let Some(entry) = by_deadline.first_entry() {
            let (deadline, handle) = *entry.key();
            if deadline > now {
                break;
            }
            let connection = entry.remove();
            deadlines.remove(&handle);
            expired.push((connection, handle));
        }
        expired
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.deadlines.borrow().len()
    }

    /// Check if no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TimerService for TimerQueue {
    fn schedule_after(&self, connection: ConnectionId, delay: Duration) -> TimerHandle {
        let handle = TimerHandle::from_raw(self.next_handle.get());
        self.next_handle.set(handle.as_raw() + 1);

        let deadline = self.clock.now() + delay;
        self.by_deadline
            .borrow_mut()
            .insert((deadline, handle), connection);
        self.deadlines.borrow_mut().insert(handle, deadline);
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(deadline) = self.deadlines.borrow_mut().remove(&handle) {
            self.by_deadline.borrow_mut().remove(&(deadline, handle));
        }
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.len())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Start at the current instant.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Start at a specific instant.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}
