use std::collections::VecDeque;

use crate::search::{l2_normalize, Embedding};

/// Weight given to the oldest buffered frame; the newest gets 1.0.
const OLDEST_WEIGHT: f32 = 0.7;
const NEWEST_WEIGHT: f32 = 1.0;

/// Bounded FIFO of frame embeddings.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: VecDeque<Embedding>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an embedding, evicting the oldest when full.
    pub fn push(&mut self, embedding: Embedding) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(embedding);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Recency-weighted mean of the buffered embeddings, L2-normalised.
    ///
    /// Weights rise linearly from 0.7 (oldest) to 1.0 (newest) and are
    /// normalised to sum to one. Returns `None` when the buffer is empty or
    /// the mean has zero length.
    pub fn weighted_query(&self) -> Option<Embedding> {
        let n = self.frames.len();
        let dim = self.frames.front()?.len();
        let weights = linspace(OLDEST_WEIGHT, NEWEST_WEIGHT, n);
        let total: f32 = weights.iter().sum();

        let mut query = vec![0.0f32; dim];
        for (frame, weight) in self.frames.iter().zip(&weights) {
            let w = weight / total;
            for (acc, x) in query.iter_mut().zip(frame) {
                *acc += w * x;
            }
        }

        l2_normalize(&mut query).then_some(query)
    }
}

fn linspace(start: f32, end: f32, n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f32;
            (0..n).map(|i| start + step * i as f32).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut buffer = FrameBuffer::new(2);
        buffer.push(vec![1.0]);
        buffer.push(vec![2.0]);
        buffer.push(vec![3.0]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.frames.front(), Some(&vec![2.0]));
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.7, 1.0, 1), vec![0.7]);
        let w = linspace(0.7, 1.0, 4);
        assert_eq!(w.len(), 4);
        assert!((w[0] - 0.7).abs() < 1e-6);
        assert!((w[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_query_favours_recent_frames() {
        let mut buffer = FrameBuffer::new(30);
        buffer.push(vec![1.0, 0.0]);
        buffer.push(vec![0.0, 1.0]);

        let q = buffer.weighted_query().unwrap();
        // weights 0.7 / 1.0 -> direction (0.7, 1.0)
        let norm = (0.7f32 * 0.7 + 1.0).sqrt();
        assert!((q[0] - 0.7 / norm).abs() < 1e-5);
        assert!((q[1] - 1.0 / norm).abs() < 1e-5);
        assert!(q[1] > q[0]);
    }

    #[test]
    fn test_weighted_query_empty_or_degenerate() {
        let mut buffer = FrameBuffer::new(4);
        assert!(buffer.weighted_query().is_none());

        buffer.push(vec![1.0, 0.0]);
        buffer.push(vec![-1.0, 0.0]);
        buffer.clear();
        buffer.push(vec![0.0, 0.0]);
        assert!(buffer.weighted_query().is_none());
    }
}
