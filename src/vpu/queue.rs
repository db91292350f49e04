//! FIFO task queue backing a VPU
//!
//! The queue itself is not synchronized; it lives inside the VPU state mutex.

use std::collections::VecDeque;

use crate::task::TaskEntry;

/// Ordered sequence of task entries awaiting a flush.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    inner: VecDeque<TaskEntry>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: VecDeque::new(),
        }
    }

    /// Append a task to the tail.
    pub(crate) fn push_back(&mut self, entry: TaskEntry) {
        self.inner.push_back(entry);
    }

    /// Insert a task at the head, ahead of everything queued so far.
    pub(crate) fn push_front(&mut self, entry: TaskEntry) {
        self.inner.push_front(entry);
    }

    /// Pop the next task in FIFO order.
    pub(crate) fn pop_front(&mut self) -> Option<TaskEntry> {
        self.inner.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Names of queued tasks, for runaway diagnostics. Anonymous and canceled
    /// entries render via their `Display` form.
    pub(crate) fn task_names(&self) -> Vec<String> {
        self.inner.iter().map(|entry| entry.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> TaskEntry {
        TaskEntry::new(Some(name.to_string()), Box::new(|| {}))
    }

    #[test]
    fn fifo_order() {
        let mut queue = TaskQueue::new();
        queue.push_back(entry("a"));
        queue.push_back(entry("b"));
        queue.push_back(entry("c"));
        let drained: Vec<String> = std::iter::from_fn(|| queue.pop_front())
            .map(|e| e.name().unwrap())
            .collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn push_front_jumps_the_queue() {
        let mut queue = TaskQueue::new();
        queue.push_back(entry("second"));
        queue.push_front(entry("first"));
        assert_eq!(queue.pop_front().unwrap().name().unwrap(), "first");
        assert_eq!(queue.pop_front().unwrap().name().unwrap(), "second");
    }

    #[test]
    fn task_names_reflect_cancellation() {
        let mut queue = TaskQueue::new();
        let canceled = entry("gone");
        canceled.cancel();
        queue.push_back(entry("kept"));
        queue.push_back(canceled);
        assert_eq!(queue.task_names(), vec!["kept".to_string(), "-".to_string()]);
        assert_eq!(queue.len(), 2);
    }
}
