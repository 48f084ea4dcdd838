use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::types::ReasoningTask;

/// Heap adapter: the most urgent task compares greatest.
#[derive(Debug)]
struct Urgent(ReasoningTask);

impl Urgent {
    fn key(&self) -> (u32, DateTime<Utc>, u64) {
        (self.0.priority, self.0.created_at, self.0.seq)
    }
}

impl PartialEq for Urgent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Urgent {}

impl PartialOrd for Urgent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Urgent {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Pending tasks ordered by `(priority, created_at, seq)` ascending.
#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Urgent>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: ReasoningTask) {
        self.heap.push(Urgent(task));
    }

    pub fn pop(&mut self) -> Option<ReasoningTask> {
        self.heap.pop().map(|u| u.0)
    }

    pub fn peek(&self) -> Option<&ReasoningTask> {
        self.heap.peek().map(|u| &u.0)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
