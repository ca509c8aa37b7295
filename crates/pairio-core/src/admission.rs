//! Per-collection admission control
//!
//! Every collection enforces two independent limits:
//!
//! | Limit | Unit | Enforcement |
//! |-------|------|-------------|
//! | `max_*_per_minute` | operations per calendar minute | reject |
//! | `max_concurrent` | in-flight operations | defer |
//!
//! Quota is charged when an operation starts and reconciled when it is
//! finalized, so a burst of simultaneously admitted operations cannot overrun
//! the limit before any of them completes. Deferred tickets reserve their
//! weight up front for the same reason.
//!
//! ## Ticket lifecycle
//!
//! ```text
//!  request_admission ──> quota exceeded ──> Err(QuotaExceeded)
//!         │
//!         ├── headroom ──────────────> Started ──┐
//!         │                              ▲       │
//!         └── no headroom ──> Deferred ──┘       ├──> finalize
//!                               │  (promoted on  │
//!                               │   finalize)    │
//!                               └── dropped ─────┴──> released
//! ```
//!
//! The accounting window is the calendar minute (UTC) of the most recent
//! request. It resets lazily when a request arrives in a different minute;
//! there is no timer.

use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::config::CollectionConfig;

/// Kind of operation being admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A `get`
    Read,
    /// A `set`
    Write,
}

impl OperationKind {
    /// Task name as it appears on the wire and in signatures
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "get",
            OperationKind::Write => "set",
        }
    }

    fn index(self) -> usize {
        match self {
            OperationKind::Read => 0,
            OperationKind::Write => 1,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar minute identifying an accounting window.
///
/// Field order makes the derived ordering chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
}

impl WindowKey {
    pub fn of(timestamp: &DateTime<Utc>) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
            day: timestamp.day(),
            hour: timestamp.hour(),
            minute: timestamp.minute(),
        }
    }
}

/// Identifier of a ticket within its collection's ticket table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(u64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Rejection because the per-minute quota is used up
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Exceeded number of {operation}s per minute for collection {collection} (limit {limit})")]
pub struct QuotaExceeded {
    pub collection: String,
    pub operation: OperationKind,
    pub limit: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct OpCounters {
    completed: u64,
    pending: u64,
    /// Weight of deferred tickets; always belongs to the current window
    reserved: u64,
}

impl OpCounters {
    fn committed(&self) -> u64 {
        self.completed + self.pending + self.reserved
    }
}

enum TicketState {
    Deferred { notify: watch::Sender<bool> },
    /// `charged_in` is the window whose pending counter holds the weight
    Started { charged_in: WindowKey },
}

struct TicketEntry {
    operation: OperationKind,
    weight: u64,
    state: TicketState,
}

struct CollectionInner {
    window_start: DateTime<Utc>,
    window: WindowKey,
    counters: [OpCounters; 2],
    active_count: u32,
    tickets: HashMap<TicketId, TicketEntry>,
    deferred_queue: VecDeque<TicketId>,
    next_ticket: u64,
}

impl CollectionInner {
    fn maybe_reset_window(&mut self, timestamp: DateTime<Utc>) {
        let key = WindowKey::of(&timestamp);
        // A request stamped before the current window is counted in it; the
        // window only moves forward.
        if key <= self.window {
            return;
        }
        self.window_start = timestamp;
        self.window = key;
        self.counters = [OpCounters::default(); 2];

        // Tickets still waiting keep their reservation in the new window.
        for id in &self.deferred_queue {
            if let Some(entry) = self.tickets.get(id) {
                self.counters[entry.operation.index()].reserved += entry.weight;
            }
        }
    }

    fn has_headroom(&self, max_concurrent: u32) -> bool {
        self.active_count < max_concurrent
    }

    fn start(&mut self, operation: OperationKind, weight: u64) -> WindowKey {
        self.active_count += 1;
        self.counters[operation.index()].pending += weight;
        self.window
    }

    /// Promote deferred tickets while concurrency headroom remains.
    ///
    /// Every deferred ticket needs the same single slot, so once one does not
    /// fit none of the later ones do and the scan stops.
    fn promote_deferred(&mut self, max_concurrent: u32) -> usize {
        let mut promoted = 0;
        while self.has_headroom(max_concurrent) {
            let Some(id) = self.deferred_queue.pop_front() else {
                break;
            };
            let Some((operation, weight)) = self
                .tickets
                .get(&id)
                .map(|entry| (entry.operation, entry.weight))
            else {
                continue;
            };

            let counters = &mut self.counters[operation.index()];
            counters.reserved = counters.reserved.saturating_sub(weight);
            let charged_in = self.start(operation, weight);

            if let Some(entry) = self.tickets.get_mut(&id) {
                let previous = std::mem::replace(&mut entry.state, TicketState::Started { charged_in });
                if let TicketState::Deferred { notify } = previous {
                    notify.send_replace(true);
                }
            }
            debug!("Promoted deferred {} ticket {}", operation, id);
            promoted += 1;
        }
        promoted
    }
}

/// Point-in-time view of a collection's counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub name: String,
    pub window_start: DateTime<Utc>,
    pub max_reads_per_minute: u64,
    pub max_writes_per_minute: u64,
    pub max_concurrent: u32,
    pub completed_reads: u64,
    pub completed_writes: u64,
    pub pending_reads: u64,
    pub pending_writes: u64,
    pub reserved_reads: u64,
    pub reserved_writes: u64,
    pub active_count: u32,
    pub deferred_count: usize,
}

/// Admission state of a single collection.
///
/// All mutation happens under one mutex; there is no locking across
/// collections.
pub struct CollectionState {
    name: String,
    max_reads_per_minute: u64,
    max_writes_per_minute: u64,
    max_concurrent: u32,
    inner: Mutex<CollectionInner>,
}

impl fmt::Debug for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionState")
            .field("name", &self.name)
            .field("max_reads_per_minute", &self.max_reads_per_minute)
            .field("max_writes_per_minute", &self.max_writes_per_minute)
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl CollectionState {
    /// Create collection state whose first window starts at `now`
    pub fn new(config: &CollectionConfig, now: DateTime<Utc>) -> Self {
        Self {
            name: config.name.clone(),
            max_reads_per_minute: config.max_gets_per_minute,
            max_writes_per_minute: config.max_sets_per_minute,
            max_concurrent: config.max_concurrent,
            inner: Mutex::new(CollectionInner {
                window_start: now,
                window: WindowKey::of(&now),
                counters: [OpCounters::default(); 2],
                active_count: 0,
                tickets: HashMap::new(),
                deferred_queue: VecDeque::new(),
                next_ticket: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent
    }

    /// Per-minute ceiling for an operation kind
    pub fn limit(&self, operation: OperationKind) -> u64 {
        match operation {
            OperationKind::Read => self.max_reads_per_minute,
            OperationKind::Write => self.max_writes_per_minute,
        }
    }

    /// Request admission for one operation.
    ///
    /// Returns a ticket that is either already started ([`AdmissionTicket::is_ready`])
    /// or queued until another ticket of this collection is finalized.
    /// Zero-weight operations still occupy a concurrency slot but are never
    /// rejected for quota.
    pub fn request_admission(
        self: &Arc<Self>,
        operation: OperationKind,
        weight: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<AdmissionTicket, QuotaExceeded> {
        let limit = self.limit(operation);
        let mut inner = self.inner.lock();
        inner.maybe_reset_window(timestamp);

        if weight > 0 && inner.counters[operation.index()].committed() + 1 > limit {
            debug!(
                collection = %self.name,
                "Rejected {}: per-minute quota of {} used up",
                operation, limit
            );
            return Err(QuotaExceeded {
                collection: self.name.clone(),
                operation,
                limit,
            });
        }

        let id = TicketId(inner.next_ticket);
        inner.next_ticket += 1;

        let (state, ready) = if inner.has_headroom(self.max_concurrent) {
            let charged_in = inner.start(operation, weight);
            let (_, ready) = watch::channel(true);
            (TicketState::Started { charged_in }, ready)
        } else {
            inner.counters[operation.index()].reserved += weight;
            inner.deferred_queue.push_back(id);
            let (notify, ready) = watch::channel(false);
            debug!(
                collection = %self.name,
                "Deferring {} ticket {} ({} waiting)",
                operation,
                id,
                inner.deferred_queue.len()
            );
            (TicketState::Deferred { notify }, ready)
        };

        inner.tickets.insert(
            id,
            TicketEntry {
                operation,
                weight,
                state,
            },
        );
        drop(inner);

        Ok(AdmissionTicket {
            id,
            collection: Arc::clone(self),
            operation,
            weight,
            timestamp,
            ready,
            released: false,
        })
    }

    /// Finalize a ticket issued by this collection
    pub fn finalize(&self, ticket: AdmissionTicket) {
        if !std::ptr::eq(Arc::as_ptr(&ticket.collection), self) {
            error!(
                "Ticket {} of collection {} finalized through collection {}",
                ticket.id, ticket.collection.name, self.name
            );
            debug_assert!(false, "ticket finalized through a foreign collection");
        }
        ticket.finalize();
    }

    /// Release a ticket: finalize it if started, withdraw it if still deferred
    fn release(&self, id: TicketId) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.tickets.remove(&id) else {
            error!(collection = %self.name, "Released unknown ticket {}", id);
            debug_assert!(false, "ticket released twice");
            return;
        };
        let index = entry.operation.index();

        match entry.state {
            TicketState::Started { charged_in } => {
                inner.active_count = inner.active_count.saturating_sub(1);
                if charged_in == inner.window {
                    let counters = &mut inner.counters[index];
                    counters.pending = counters.pending.saturating_sub(entry.weight);
                    counters.completed += entry.weight;
                }
                let promoted = inner.promote_deferred(self.max_concurrent);
                debug!(
                    collection = %self.name,
                    "Finalized {} ticket {} (active {}, promoted {})",
                    entry.operation, id, inner.active_count, promoted
                );
            }
            TicketState::Deferred { .. } => {
                let position = inner.deferred_queue.iter().position(|queued| *queued == id);
                if let Some(pos) = position {
                    inner.deferred_queue.remove(pos);
                }
                let counters = &mut inner.counters[index];
                counters.reserved = counters.reserved.saturating_sub(entry.weight);
                debug!(
                    collection = %self.name,
                    "Withdrew deferred {} ticket {}", entry.operation, id
                );
            }
        }
    }

    pub fn snapshot(&self) -> CollectionSnapshot {
        let inner = self.inner.lock();
        let reads = inner.counters[OperationKind::Read.index()];
        let writes = inner.counters[OperationKind::Write.index()];
        CollectionSnapshot {
            name: self.name.clone(),
            window_start: inner.window_start,
            max_reads_per_minute: self.max_reads_per_minute,
            max_writes_per_minute: self.max_writes_per_minute,
            max_concurrent: self.max_concurrent,
            completed_reads: reads.completed,
            completed_writes: writes.completed,
            pending_reads: reads.pending,
            pending_writes: writes.pending,
            reserved_reads: reads.reserved,
            reserved_writes: writes.reserved,
            active_count: inner.active_count,
            deferred_count: inner.deferred_queue.len(),
        }
    }
}

/// Handle for one admitted or deferred operation.
///
/// Consumed by [`AdmissionTicket::finalize`]. Dropping an unfinalized ticket
/// releases it as well: a started ticket is finalized, a deferred one is
/// withdrawn from the queue.
pub struct AdmissionTicket {
    id: TicketId,
    collection: Arc<CollectionState>,
    operation: OperationKind,
    weight: u64,
    timestamp: DateTime<Utc>,
    ready: watch::Receiver<bool>,
    released: bool,
}

impl fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionTicket")
            .field("id", &self.id)
            .field("collection", &self.collection.name)
            .field("operation", &self.operation)
            .field("weight", &self.weight)
            .field("timestamp", &self.timestamp)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl AdmissionTicket {
    pub fn id(&self) -> TicketId {
        self.id
    }

    pub fn collection(&self) -> &Arc<CollectionState> {
        &self.collection
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether the ticket holds a concurrency slot
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn is_deferred(&self) -> bool {
        !self.is_ready()
    }

    /// Wait until the ticket is promoted. Returns immediately if it already
    /// holds a slot.
    pub async fn wait_ready(&mut self) {
        // The collection keeps the sender alive until promotion publishes
        // `true`, so the channel cannot close while the flag is still false.
        let _ = self.ready.wait_for(|ready| *ready).await;
    }

    /// Finalize the operation, releasing its slot and reconciling quota
    pub fn finalize(mut self) {
        self.released = true;
        self.collection.release(self.id);
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.collection.release(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, second).unwrap()
    }

    fn collection(gets: u64, sets: u64) -> Arc<CollectionState> {
        Arc::new(CollectionState::new(
            &CollectionConfig::new("c", gets, sets),
            at(0, 0),
        ))
    }

    #[test]
    fn test_window_key_calendar_minute() {
        assert_eq!(WindowKey::of(&at(5, 0)), WindowKey::of(&at(5, 59)));
        assert_ne!(WindowKey::of(&at(5, 59)), WindowKey::of(&at(6, 0)));
        let next_day = Utc.with_ymd_and_hms(2024, 5, 2, 12, 5, 0).unwrap();
        assert_ne!(WindowKey::of(&at(5, 0)), WindowKey::of(&next_day));
        assert!(WindowKey::of(&at(59, 0)) < WindowKey::of(&next_day));
        assert!(WindowKey::of(&at(5, 59)) < WindowKey::of(&at(6, 0)));
    }

    #[test]
    fn test_late_timestamp_does_not_roll_window_back() {
        let c = collection(1, 1);
        let a = c.request_admission(OperationKind::Read, 1, at(2, 0)).unwrap();
        // Stamped in the previous minute but arriving after `a`
        assert!(c.request_admission(OperationKind::Read, 1, at(1, 59)).is_err());
        assert!(c.request_admission(OperationKind::Read, 1, at(2, 0)).is_err());
        a.finalize();

        let snap = c.snapshot();
        assert_eq!(snap.window_start, at(2, 0));
        assert_eq!(snap.completed_reads, 1);
        assert!(snap.completed_reads <= snap.max_reads_per_minute);
    }

    #[test]
    fn test_late_timestamp_is_charged_to_current_window() {
        let c = collection(2, 2);
        let a = c.request_admission(OperationKind::Write, 1, at(2, 0)).unwrap();
        let b = c.request_admission(OperationKind::Write, 1, at(1, 59)).unwrap();
        a.finalize();
        b.finalize();
        assert_eq!(c.snapshot().completed_writes, 2);
    }

    #[test]
    fn test_operation_kind_names() {
        assert_eq!(OperationKind::Read.as_str(), "get");
        assert_eq!(OperationKind::Write.to_string(), "set");
    }

    #[test]
    fn test_admit_and_finalize() {
        let c = collection(10, 10);
        let ticket = c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap();
        assert!(ticket.is_ready());

        let snap = c.snapshot();
        assert_eq!(snap.pending_reads, 1);
        assert_eq!(snap.active_count, 1);

        ticket.finalize();
        let snap = c.snapshot();
        assert_eq!(snap.pending_reads, 0);
        assert_eq!(snap.completed_reads, 1);
        assert_eq!(snap.active_count, 0);
    }

    #[test]
    fn test_reads_and_writes_counted_separately() {
        let c = collection(1, 1);
        let r = c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap();
        let w = c.request_admission(OperationKind::Write, 1, at(1, 0)).unwrap();
        assert!(c.request_admission(OperationKind::Read, 1, at(1, 0)).is_err());
        assert!(c.request_admission(OperationKind::Write, 1, at(1, 0)).is_err());
        r.finalize();
        w.finalize();

        let snap = c.snapshot();
        assert_eq!(snap.completed_reads, 1);
        assert_eq!(snap.completed_writes, 1);
    }

    #[test]
    fn test_quota_rejection_takes_no_slot() {
        let c = collection(0, 0);
        let err = c
            .request_admission(OperationKind::Write, 1, at(1, 0))
            .unwrap_err();
        assert_eq!(err.operation, OperationKind::Write);
        assert_eq!(err.limit, 0);
        assert_eq!(c.snapshot().active_count, 0);
    }

    #[test]
    fn test_zero_weight_never_rejected() {
        let c = collection(0, 0);
        let mut tickets = Vec::new();
        for _ in 0..10 {
            tickets.push(c.request_admission(OperationKind::Read, 0, at(1, 0)).unwrap());
        }
        let snap = c.snapshot();
        assert_eq!(snap.active_count, 3);
        assert_eq!(snap.deferred_count, 7);
        assert_eq!(snap.pending_reads, 0);

        for t in tickets {
            t.finalize();
        }
        let snap = c.snapshot();
        assert_eq!(snap.active_count, 0);
        assert_eq!(snap.completed_reads, 0);
    }

    #[test]
    fn test_finalize_in_later_minute_drops_weight() {
        let c = collection(10, 10);
        let ticket = c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap();
        // A request in the next minute rolls the window over.
        let other = c.request_admission(OperationKind::Read, 1, at(2, 0)).unwrap();
        assert_eq!(c.snapshot().pending_reads, 1);

        ticket.finalize();
        let snap = c.snapshot();
        assert_eq!(snap.completed_reads, 0);
        assert_eq!(snap.pending_reads, 1);
        assert_eq!(snap.active_count, 1);

        other.finalize();
        let snap = c.snapshot();
        assert_eq!(snap.completed_reads, 1);
        assert_eq!(snap.pending_reads, 0);
    }

    #[test]
    fn test_deferred_ticket_reserves_quota() {
        let c = collection(4, 10);
        let held: Vec<_> = (0..3)
            .map(|_| c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap())
            .collect();
        let deferred = c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap();
        assert!(deferred.is_deferred());
        assert_eq!(c.snapshot().reserved_reads, 1);

        // 3 pending + 1 reserved leaves nothing for a fifth read.
        assert!(c.request_admission(OperationKind::Read, 1, at(1, 0)).is_err());

        drop(held);
        assert!(deferred.is_ready());
        let snap = c.snapshot();
        assert_eq!(snap.reserved_reads, 0);
        assert_eq!(snap.pending_reads, 1);
        assert_eq!(snap.completed_reads, 3);
    }

    #[test]
    fn test_dropping_deferred_ticket_withdraws_it() {
        let c = collection(10, 10);
        let held: Vec<_> = (0..3)
            .map(|_| c.request_admission(OperationKind::Write, 1, at(1, 0)).unwrap())
            .collect();
        let deferred = c.request_admission(OperationKind::Write, 1, at(1, 0)).unwrap();
        assert_eq!(c.snapshot().deferred_count, 1);

        drop(deferred);
        let snap = c.snapshot();
        assert_eq!(snap.deferred_count, 0);
        assert_eq!(snap.reserved_writes, 0);
        assert_eq!(snap.active_count, 3);

        for t in held {
            t.finalize();
        }
        assert_eq!(c.snapshot().active_count, 0);
    }

    #[test]
    fn test_dropping_started_ticket_finalizes_it() {
        let c = collection(10, 10);
        {
            let _ticket = c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap();
            assert_eq!(c.snapshot().active_count, 1);
        }
        let snap = c.snapshot();
        assert_eq!(snap.active_count, 0);
        assert_eq!(snap.completed_reads, 1);
    }

    #[test]
    fn test_reservation_carries_into_new_window() {
        let c = collection(3, 10);
        let held: Vec<_> = (0..3)
            .map(|_| c.request_admission(OperationKind::Read, 0, at(1, 0)).unwrap())
            .collect();
        let deferred = c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap();
        assert!(deferred.is_deferred());

        // New minute: the waiting ticket still counts against the quota.
        let a = c.request_admission(OperationKind::Read, 1, at(2, 0)).unwrap();
        let b = c.request_admission(OperationKind::Read, 1, at(2, 0)).unwrap();
        assert!(c.request_admission(OperationKind::Read, 1, at(2, 0)).is_err());
        let snap = c.snapshot();
        assert_eq!(snap.reserved_reads, 3);
        assert_eq!(snap.deferred_count, 3);

        drop(held);
        assert!(deferred.is_ready());
        assert!(a.is_ready());
        assert!(b.is_ready());
        deferred.finalize();
        a.finalize();
        b.finalize();
        let snap = c.snapshot();
        assert_eq!(snap.completed_reads, 3);
        assert_eq!(snap.pending_reads, 0);
    }

    #[test]
    fn test_promotion_in_arrival_order() {
        let c = collection(100, 100);
        let held: Vec<_> = (0..3)
            .map(|_| c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap())
            .collect();
        let first = c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap();
        let second = c.request_admission(OperationKind::Write, 1, at(1, 0)).unwrap();

        let mut held = held.into_iter();
        held.next().unwrap().finalize();
        assert!(first.is_ready());
        assert!(second.is_deferred());

        held.next().unwrap().finalize();
        assert!(second.is_ready());
        assert_eq!(c.snapshot().active_count, 3);
    }

    #[tokio::test]
    async fn test_wait_ready_wakes_on_promotion() {
        let c = collection(100, 100);
        let held = c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap();
        let _b = c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap();
        let _c = c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap();
        let mut waiting = c.request_admission(OperationKind::Read, 1, at(1, 0)).unwrap();
        assert!(waiting.is_deferred());

        let waiter = tokio::spawn(async move {
            waiting.wait_ready().await;
            waiting
        });
        tokio::task::yield_now().await;
        held.finalize();

        let waiting = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(waiting.is_ready());
    }

    #[tokio::test]
    async fn test_wait_ready_returns_immediately_when_started() {
        let c = collection(100, 100);
        let mut ticket = c.request_admission(OperationKind::Write, 1, at(1, 0)).unwrap();
        tokio::time::timeout(std::time::Duration::from_millis(100), ticket.wait_ready())
            .await
            .unwrap();
    }
}
