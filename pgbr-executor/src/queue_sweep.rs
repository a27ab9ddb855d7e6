use std::collections::VecDeque;

/// The restore `job_source` sweep from spec §4.7: a worker's home queue is
/// `client_idx % queue_count`; even-numbered workers sweep the remaining
/// queues upward, odd-numbered ones downward, so two workers starting at
/// opposite ends rarely collide on the same queue. Callers pre-sort each
/// queue largest-file-first; `next_for` pops from the front.
pub struct QueueSweep<T> {
    queues: Vec<VecDeque<T>>,
}

impl<T> QueueSweep<T> {
    pub fn new(queues: Vec<VecDeque<T>>) -> Self {
        Self { queues }
    }

    /// Returns the next item for `client_idx`, trying its home queue first
    /// and then sweeping the rest in the worker's direction. `None` once
    /// every queue is drained.
    pub fn next_for(&mut self, client_idx: usize) -> Option<T> {
        let n = self.queues.len();
        if n == 0 {
            return None;
        }
        let start = (client_idx % n) as isize;
        let step: isize = if client_idx % 2 == 0 { 1 } else { -1 };
        for offset in 0..n as isize {
            let idx = (start + offset * step).rem_euclid(n as isize) as usize;
            if let Some(item) = self.queues[idx].pop_front() {
                return Some(item);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_largest_first_from_home_queue() {
        let mut sweep = QueueSweep::new(vec![VecDeque::from([30, 20, 10]), VecDeque::from([5])]);
        assert_eq!(sweep.next_for(0), Some(30));
        assert_eq!(sweep.next_for(0), Some(20));
    }

    #[test]
    fn even_and_odd_workers_sweep_in_opposite_directions() {
        let mut sweep = QueueSweep::new(vec![VecDeque::new(), VecDeque::from([99]), VecDeque::new()]);
        // client 0's home queue (0) is empty; even workers sweep +1, so it
        // should find queue 1 next rather than wrapping to queue 2 first.
        assert_eq!(sweep.next_for(0), Some(99));
    }

    #[test]
    fn returns_none_once_drained() {
        let mut sweep: QueueSweep<i32> = QueueSweep::new(vec![VecDeque::new()]);
        assert_eq!(sweep.next_for(0), None);
    }
}
