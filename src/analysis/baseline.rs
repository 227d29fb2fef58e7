// Baseline module - rolling median of recent magnitude
//
// The baseline statistic is the MEDIAN of the window. Blink artifacts are
// large, short outliers; the median ignores them where a mean would be
// dragged upward by every spike still inside the window.
//
// Alongside the FIFO ring a sorted copy is kept so the median is read in
// O(1) and each append costs one binary search plus a memmove.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct BaselineWindow {
    ring: VecDeque<f64>,
    sorted: Vec<f64>,
    capacity: usize,
    received: u64,
}

impl BaselineWindow {
    /// `capacity` is fixed for the lifetime of the window. Session configs
    /// holding no sample are rejected by `validate_for_session` before a
    /// window is built; a direct zero is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: VecDeque::with_capacity(capacity),
            sorted: Vec::with_capacity(capacity),
            capacity,
            received: 0,
        }
    }

    /// Window sized from a duration in seconds
    pub fn for_duration(duration_seconds: f64, sampling_rate: f64) -> Self {
        Self::new((duration_seconds * sampling_rate) as usize)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Total samples ever pushed
    pub fn received(&self) -> u64 {
        self.received
    }

    /// True once `capacity` samples have been received
    pub fn is_ready(&self) -> bool {
        self.ring.len() == self.capacity
    }

    pub fn push(&mut self, magnitude: f64) {
        if self.ring.len() == self.capacity {
            if let Some(old) = self.ring.pop_front() {
                let idx = self.sorted.partition_point(|v| v.total_cmp(&old).is_lt());
                if idx < self.sorted.len() {
                    self.sorted.remove(idx);
                }
            }
        }
        let idx = self
            .sorted
            .partition_point(|v| v.total_cmp(&magnitude).is_le());
        self.sorted.insert(idx, magnitude);
        self.ring.push_back(magnitude);
        self.received += 1;
    }

    /// Median of the samples currently held; `None` before warm-up completes.
    pub fn current_baseline(&self) -> Option<f64> {
        if !self.is_ready() {
            return None;
        }
        Some(self.median())
    }

    /// Median of whatever is buffered, ready or not
    pub fn median(&self) -> f64 {
        let n = self.sorted.len();
        if n == 0 {
            return 0.0;
        }
        let mid = n / 2;
        if n % 2 == 0 {
            0.5 * (self.sorted[mid - 1] + self.sorted[mid])
        } else {
            self.sorted[mid]
        }
    }

    pub fn clear(&mut self) {
        self.ring.clear();
        self.sorted.clear();
        self.received = 0;
    }
}
