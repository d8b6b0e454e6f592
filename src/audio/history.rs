//! Bounded sample history shared between producer and renderer
//!
//! One producer (capture loop or file decode worker) appends, one consumer
//! (the render tick) takes snapshots. The buffer is guarded by a mutex held
//! only for the duration of an append or a copy, so an append and a
//! concurrent snapshot can never observe a half-written element, and
//! trimming can never invalidate a snapshot already handed out.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::format::XyPoint;

/// FIFO history of the most recent normalized points, capacity-bounded.
pub struct HistoryBuffer {
    points: Mutex<VecDeque<XyPoint>>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer holding at most `capacity` points.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append points at the tail, evicting from the head so the length
    /// never exceeds capacity. Insertion order is preserved.
    pub fn append(&self, points: &[XyPoint]) {
        let mut queue = self.points.lock().unwrap();
        if points.len() >= self.capacity {
            // The new batch alone fills the buffer.
            queue.clear();
            queue.extend(points[points.len() - self.capacity..].iter().copied());
            return;
        }
        let overflow = (queue.len() + points.len()).saturating_sub(self.capacity);
        queue.drain(..overflow);
        queue.extend(points.iter().copied());
    }

    /// Point-in-time copy, oldest first. Safe to iterate while the
    /// producer keeps appending.
    pub fn snapshot(&self) -> Vec<XyPoint> {
        self.points.lock().unwrap().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.points.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.points.lock().unwrap().clear();
    }
}
