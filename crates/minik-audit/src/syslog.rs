//! Syscall audit trail
//!
//! Every trap is recorded as a `Call` event and every completion as a
//! `Result` event pointing back at it. Calls that block stay in flight until
//! the process is dispatched again and the call finishes, so the result may
//! land many rotations after the call.
//!
//! The event ring is bounded; the in-flight index is not, so a call whose
//! event has been trimmed is still reported by `in_flight`.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::types::{EventId, ProcessId, Tick};

/// Events kept before the oldest are dropped
pub const MAX_SYSLOG_EVENTS: usize = 4096;

/// One audit record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysEvent {
    /// Monotonic across the whole trail
    pub id: EventId,
    /// Calling process
    pub sender: ProcessId,
    pub tick: Tick,
    pub event_type: SysEventType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SysEventType {
    /// Trap taken
    Request {
        syscall_num: u64,
        /// Argument registers as passed
        args: [u64; 3],
    },
    /// Call finished
    Response {
        request_id: EventId,
        /// Value written to the result register (negative = error)
        result: i64,
        /// Ticks the caller spent blocked inside the call
        waited: Tick,
    },
}

/// A call with no result yet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCall {
    pub request_id: EventId,
    pub sender: ProcessId,
    pub syscall_num: u64,
    /// Tick of the trap
    pub since: Tick,
}

/// The audit trail
pub struct SysLog {
    events: VecDeque<SysEvent>,
    limit: usize,
    in_flight: BTreeMap<EventId, PendingCall>,
    next_id: EventId,
}

impl SysLog {
    pub fn new() -> Self {
        Self::with_limit(MAX_SYSLOG_EVENTS)
    }

    /// Trail keeping at most `limit` events (at least one).
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: VecDeque::new(),
            limit: limit.max(1),
            in_flight: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Record a trap and return the id the result must quote.
    pub fn record_call(
        &mut self,
        sender: ProcessId,
        syscall_num: u64,
        args: [u64; 3],
        tick: Tick,
    ) -> EventId {
        let request_id = self.push(sender, tick, SysEventType::Request { syscall_num, args });
        self.in_flight.insert(
            request_id,
            PendingCall {
                request_id,
                sender,
                syscall_num,
                since: tick,
            },
        );
        request_id
    }

    /// Record the result of an in-flight call.
    ///
    /// Returns false (and records nothing) if `request_id` is not in flight.
    pub fn record_result(&mut self, request_id: EventId, result: i64, tick: Tick) -> bool {
        let Some(call) = self.in_flight.remove(&request_id) else {
            return false;
        };
        let waited = tick.saturating_sub(call.since);
        self.push(
            call.sender,
            tick,
            SysEventType::Response {
                request_id,
                result,
                waited,
            },
        );
        true
    }

    fn push(&mut self, sender: ProcessId, tick: Tick, event_type: SysEventType) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        if self.events.len() == self.limit {
            self.events.pop_front();
        }
        self.events.push_back(SysEvent {
            id,
            sender,
            tick,
            event_type,
        });
        id
    }

    /// Retained events, oldest first
    pub fn events(&self) -> &VecDeque<SysEvent> {
        &self.events
    }

    /// Calls still waiting for a result, oldest first
    pub fn in_flight(&self) -> Vec<PendingCall> {
        self.in_flight.values().copied().collect()
    }

    /// Result of the most recent call `sender` completed.
    pub fn last_result(&self, sender: ProcessId) -> Option<i64> {
        self.events.iter().rev().find_map(|e| match e.event_type {
            SysEventType::Response { result, .. } if e.sender == sender => Some(result),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for SysLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_quotes_its_call() {
        let mut log = SysLog::new();

        let lock = log.record_call(1, 8, [3, 0, 0], 10);
        assert!(log.record_result(lock, -8, 10));

        assert_eq!(log.len(), 2);
        assert_eq!(
            log.events()[1].event_type,
            SysEventType::Response {
                request_id: lock,
                result: -8,
                waited: 0
            }
        );
        assert_eq!(log.events()[1].sender, 1);
        assert_eq!(log.last_result(1), Some(-8));
        assert_eq!(log.last_result(2), None);
    }

    #[test]
    fn test_blocked_call_stays_in_flight() {
        let mut log = SysLog::new();

        let sleep = log.record_call(0, 4, [3, 0, 0], 10);
        let pid = log.record_call(1, 3, [0, 0, 0], 11);
        log.record_result(pid, 1, 11);

        let pending = log.in_flight();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_id, sleep);
        assert_eq!(pending[0].since, 10);

        log.record_result(sleep, 0, 310);
        assert!(log.in_flight().is_empty());
        assert!(matches!(
            log.events().back().unwrap().event_type,
            SysEventType::Response { waited: 300, .. }
        ));
    }

    #[test]
    fn test_unknown_result_is_ignored() {
        let mut log = SysLog::new();
        let call = log.record_call(0, 3, [0, 0, 0], 0);

        assert!(log.record_result(call, 0, 0));
        assert!(!log.record_result(call, 0, 1));
        assert!(!log.record_result(99, 0, 1));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_ring_drops_oldest_but_keeps_in_flight() {
        let mut log = SysLog::with_limit(4);

        let sleeper = log.record_call(0, 4, [1, 0, 0], 0);
        for tick in 1..=4 {
            let call = log.record_call(1, 3, [0, 0, 0], tick);
            log.record_result(call, 1, tick);
        }

        assert_eq!(log.len(), 4);
        assert_eq!(log.events()[0].id, 5);
        assert!(log.events().iter().all(|e| e.id != sleeper));
        assert_eq!(log.in_flight()[0].request_id, sleeper);

        assert!(log.record_result(sleeper, 0, 100));
        assert_eq!(log.last_result(0), Some(0));
    }

    #[test]
    fn test_event_serializes() {
        let mut log = SysLog::new();
        log.record_call(2, 6, [0x1000, 1, 0], 42);

        let json = serde_json::to_string(&log.events()[0]).unwrap();
        assert!(json.contains("\"sender\":2"));
        assert!(json.contains("\"Request\""));

        let back: SysEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, &log.events()[0]);
    }
}
