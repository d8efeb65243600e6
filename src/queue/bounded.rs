use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::queue::{Poll, Wait, WaitQueue};

/// Capacity-bounded queue with a shared condition variable.
///
/// Blocked consumers are served in no particular order.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    available: Condvar,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    /// Reserved slots.
    size: usize,
    waiting: usize,
    closed: bool,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                size: 0,
                waiting: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn take(&self, state: &mut State<T>) -> Option<Poll<T>> {
        if state.closed {
            return Some(Poll::Closed);
        }
        if let Some(item) = state.items.pop_front() {
            return Some(Poll::Item(item));
        }
        if state.size < self.capacity {
            state.size += 1;
            return Some(Poll::Slot);
        }
        None
    }
}

impl<T: Clone + Send> WaitQueue<T> for BoundedQueue<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed || state.items.len() >= self.capacity {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn poll(&self, wait: Wait) -> Poll<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(res) = self.take(&mut state) {
                return res;
            }
            let Wait::Until(deadline) = wait else {
                return Poll::TimedOut;
            };
            state.waiting += 1;
            let timed_out = match deadline {
                Some(deadline) => self
                    .available
                    .wait_until(&mut state, deadline)
                    .timed_out(),
                None => {
                    self.available.wait(&mut state);
                    false
                }
            };
            state.waiting -= 1;
            if timed_out {
                // A notification racing the timeout must not be lost.
                return self.take(&mut state).unwrap_or(Poll::TimedOut);
            }
        }
    }

    fn try_poll(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    fn reserve(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.size >= self.capacity {
            return false;
        }
        state.size += 1;
        true
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.size = state.size.saturating_sub(1);
        let notify = state.waiting > 0;
        drop(state);
        if notify {
            self.available.notify_one();
        }
    }

    fn size(&self) -> usize {
        self.state.lock().size
    }

    fn remove(&self, pred: &mut dyn FnMut(&T) -> bool) -> Vec<T> {
        let mut state = self.state.lock();
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(state.items.len());
        for item in state.items.drain(..) {
            if pred(&item) {
                removed.push(item);
            } else {
                kept.push_back(item);
            }
        }
        state.items = kept;
        removed
    }

    fn snapshot(&self) -> Vec<T> {
        self.state.lock().items.iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    fn until(timeout: Duration) -> Wait {
        Wait::Until(Some(Instant::now() + timeout))
    }

    #[test]
    fn offer_respects_capacity() {
        let queue = BoundedQueue::new(2);
        assert_eq!(queue.offer(1), Ok(()));
        assert_eq!(queue.offer(2), Ok(()));
        assert_eq!(queue.offer(3), Err(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.snapshot(), vec![1, 2]);
        assert_eq!(queue.try_poll(), Some(1));
        assert_eq!(queue.try_poll(), Some(2));
        assert_eq!(queue.try_poll(), None);
    }

    #[test]
    fn poll_prefers_items_over_slots() {
        let queue = BoundedQueue::new(2);
        assert!(queue.reserve());
        queue.offer(5).unwrap();
        assert_eq!(queue.poll(Wait::Never), Poll::Item(5));
        assert_eq!(queue.poll(Wait::Never), Poll::Slot);
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.poll(Wait::Never), Poll::TimedOut);
        assert!(!queue.reserve());
    }

    #[test]
    fn poll_times_out() {
        let queue = BoundedQueue::<u32>::new(1);
        assert!(queue.reserve());
        let started = Instant::now();
        assert_eq!(queue.poll(until(Duration::from_millis(50))), Poll::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(queue.waiting(), 0);
    }

    #[test]
    fn poll_receives_offer() {
        let queue = Arc::new(BoundedQueue::new(1));
        assert!(queue.reserve());
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.poll(until(Duration::from_secs(5))))
        };
        while queue.waiting() == 0 {
            thread::yield_now();
        }
        queue.offer(7).unwrap();
        assert_eq!(waiter.join().unwrap(), Poll::Item(7));
    }

    #[test]
    fn released_slot_reaches_waiter() {
        let queue = Arc::new(BoundedQueue::<u32>::new(1));
        assert!(queue.reserve());
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.poll(Wait::Until(None)))
        };
        while queue.waiting() == 0 {
            thread::yield_now();
        }
        queue.release();
        assert_eq!(waiter.join().unwrap(), Poll::Slot);
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn slot_released_before_waiting_is_not_missed() {
        let queue = BoundedQueue::<u32>::new(1);
        assert!(queue.reserve());
        assert_eq!(queue.poll(Wait::Never), Poll::TimedOut);
        // Released between a failed attempt and the blocking one.
        queue.release();
        assert_eq!(queue.poll(until(Duration::from_secs(5))), Poll::Slot);
    }

    #[test]
    fn close_refuses_offers_and_wakes() {
        let queue = Arc::new(BoundedQueue::<u32>::new(1));
        assert!(queue.reserve());
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.poll(Wait::Until(None)))
            })
            .collect();
        while queue.waiting() < 2 {
            thread::yield_now();
        }
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.offer(2), Err(2));
        assert!(!queue.reserve());
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Poll::Closed);
        }
    }

    #[test]
    fn stored_items_survive_close() {
        let queue = BoundedQueue::new(2);
        queue.offer(1).unwrap();
        queue.close();
        assert_eq!(queue.poll(Wait::Never), Poll::Closed);
        assert_eq!(queue.try_poll(), Some(1));
    }

    #[test]
    fn remove_matching() {
        let queue = BoundedQueue::new(8);
        for i in 0..6 {
            queue.offer(i).unwrap();
        }
        let removed = queue.remove(&mut |i| i % 2 == 0);
        assert_eq!(removed, vec![0, 2, 4]);
        assert_eq!(queue.snapshot(), vec![1, 3, 5]);
    }
}
