use std::collections::VecDeque;

use bytes::Bytes;

/// Bounded FIFO of audio chunks that drops the oldest chunk on overflow
///
/// Used both before streaming starts (small capacity, waiting for the control
/// message) and while streaming (larger capacity, waiting for the upstream).
#[derive(Debug)]
pub struct AudioQueue {
    chunks: VecDeque<Bytes>,
    capacity: usize,
    dropped: u64,
}

impl AudioQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append a chunk; returns the chunk evicted to make room, if any
    pub fn push(&mut self, chunk: Bytes) -> Option<Bytes> {
        let evicted = if self.chunks.len() >= self.capacity {
            self.dropped += 1;
            self.chunks.pop_front()
        } else {
            None
        };
        self.chunks.push_back(chunk);
        evicted
    }

    pub fn front(&self) -> Option<&Bytes> {
        self.chunks.front()
    }

    pub fn pop_front(&mut self) -> Option<Bytes> {
        self.chunks.pop_front()
    }

    /// Change the bound, evicting the oldest chunks if the queue is now too long
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.chunks.len() > self.capacity {
            self.chunks.pop_front();
            self.dropped += 1;
        }
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks evicted over the queue's lifetime
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
