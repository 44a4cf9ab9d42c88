//! Outbound queue for messages composed while the transport is down

use livelink_shared::OutboundMessage;
use std::collections::VecDeque;

/// FIFO buffer of outbound messages
///
/// Unbounded unless a capacity is given; when full, the oldest message is
/// evicted to make room.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<OutboundMessage>,
    capacity: Option<usize>,
    dropped: u64,
}

impl OutboundQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Append a message, returning the evicted oldest one if the queue was full
    pub fn push(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        let evicted = match self.capacity {
            Some(0) => {
                self.dropped += 1;
                return Some(message);
            }
            Some(capacity) if self.messages.len() >= capacity => {
                self.dropped += 1;
                self.messages.pop_front()
            }
            _ => None,
        };
        self.messages.push_back(message);
        evicted
    }

    /// Put a message back at the head after a failed write
    pub fn push_front(&mut self, message: OutboundMessage) {
        self.messages.push_front(message);
    }

    pub fn pop_front(&mut self) -> Option<OutboundMessage> {
        self.messages.pop_front()
    }

    /// Discard everything, returning how many messages were dropped
    pub fn clear(&mut self) -> usize {
        let discarded = self.messages.len();
        self.messages.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Messages evicted because of the capacity limit
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: u64) -> OutboundMessage {
        OutboundMessage::new("data_update").field("n", n)
    }

    fn n_of(message: &OutboundMessage) -> u64 {
        message.payload()["n"].as_u64().unwrap_or(u64::MAX)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = OutboundQueue::default();
        for n in 0..5 {
            assert!(queue.push(msg(n)).is_none());
        }
        let drained: Vec<u64> = std::iter::from_fn(|| queue.pop_front()).map(|m| n_of(&m)).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_front_restores_head() {
        let mut queue = OutboundQueue::default();
        queue.push(msg(1));
        queue.push(msg(2));

        let head = queue.pop_front().expect("head");
        queue.push_front(head);

        assert_eq!(queue.pop_front().map(|m| n_of(&m)), Some(1));
        assert_eq!(queue.pop_front().map(|m| n_of(&m)), Some(2));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut queue = OutboundQueue::new(Some(2));
        queue.push(msg(1));
        queue.push(msg(2));

        let evicted = queue.push(msg(3)).expect("oldest evicted");
        assert_eq!(n_of(&evicted), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop_front().map(|m| n_of(&m)), Some(2));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut queue = OutboundQueue::new(Some(0));
        let rejected = queue.push(msg(1)).expect("rejected");
        assert_eq!(n_of(&rejected), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_reports_discarded() {
        let mut queue = OutboundQueue::default();
        queue.push(msg(1));
        queue.push(msg(2));
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.clear(), 0);
    }
}
