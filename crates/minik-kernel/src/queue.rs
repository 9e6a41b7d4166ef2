//! Index-linked FIFO wait queues
//!
//! A `WaitQueue` only stores its head and tail. The "next" links live in the
//! process descriptors themselves, reached through `QueueLinks`, so a process
//! can sit in at most one queue at a time and moving it between queues never
//! allocates.

use crate::types::ProcessId;

/// Access to the per-process "next" link used by wait queues.
pub trait QueueLinks {
    /// Link stored in `pid`
    fn next_link(&self, pid: ProcessId) -> Option<ProcessId>;
    /// Overwrite the link stored in `pid`
    fn set_next_link(&mut self, pid: ProcessId, next: Option<ProcessId>);
}

/// FIFO of processes threaded through `QueueLinks`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WaitQueue {
    head: Option<ProcessId>,
    tail: Option<ProcessId>,
    len: usize,
}

impl WaitQueue {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Append `pid` at the tail.
    pub fn push_back<L: QueueLinks + ?Sized>(&mut self, links: &mut L, pid: ProcessId) {
        debug_assert!(
            !self.contains(links, pid),
            "process {} queued twice",
            pid.0
        );
        links.set_next_link(pid, None);
        match self.tail {
            Some(tail) => links.set_next_link(tail, Some(pid)),
            None => self.head = Some(pid),
        }
        self.tail = Some(pid);
        self.len += 1;
    }

    /// Remove and return the head.
    pub fn pop_front<L: QueueLinks + ?Sized>(&mut self, links: &mut L) -> Option<ProcessId> {
        let head = self.head?;
        self.head = links.next_link(head);
        if self.head.is_none() {
            self.tail = None;
        }
        links.set_next_link(head, None);
        self.len -= 1;
        Some(head)
    }

    /// Unlink `pid` from anywhere in the queue.
    ///
    /// Returns `false` if it was not a member.
    pub fn remove<L: QueueLinks + ?Sized>(&mut self, links: &mut L, pid: ProcessId) -> bool {
        let mut prev: Option<ProcessId> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            let next = links.next_link(current);
            if current == pid {
                match prev {
                    Some(p) => links.set_next_link(p, next),
                    None => self.head = next,
                }
                if self.tail == Some(pid) {
                    self.tail = prev;
                }
                links.set_next_link(pid, None);
                self.len -= 1;
                return true;
            }
            prev = Some(current);
            cursor = next;
        }
        false
    }

    /// Head of the queue, without removing it.
    pub fn front(&self) -> Option<ProcessId> {
        self.head
    }

    /// Last element of the queue.
    pub fn back(&self) -> Option<ProcessId> {
        self.tail
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether `pid` is a member.
    pub fn contains<L: QueueLinks + ?Sized>(&self, links: &L, pid: ProcessId) -> bool {
        self.iter(links).any(|member| member == pid)
    }

    /// Members in FIFO order.
    ///
    /// The walk stops after `len` steps so a corrupted link chain cannot loop.
    pub fn iter<'a, L: QueueLinks + ?Sized>(&self, links: &'a L) -> Iter<'a, L> {
        Iter {
            links,
            cursor: self.head,
            remaining: self.len,
        }
    }
}

/// Iterator over a `WaitQueue`
pub struct Iter<'a, L: QueueLinks + ?Sized> {
    links: &'a L,
    cursor: Option<ProcessId>,
    remaining: usize,
}

impl<L: QueueLinks + ?Sized> Iterator for Iter<'_, L> {
    type Item = ProcessId;

    fn next(&mut self) -> Option<ProcessId> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.cursor?;
        self.cursor = self.links.next_link(current);
        self.remaining -= 1;
        Some(current)
    }
}
