use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use parking_lot::{Condvar, Mutex};

use crate::queue::{Poll, Wait, WaitQueue};

/// Queue serving blocked consumers strictly in arrival order.
///
/// Every waiter gets its own condition variable, so an offered item or a released slot is handed
/// over to the longest-waiting consumer and nobody else is woken. While anyone waits, newcomers
/// queue up behind them.
#[derive(Debug)]
pub struct FairQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    /// Reserved slots, including those handed over to waiters.
    size: usize,
    waiters: VecDeque<Arc<Waiter>>,
    /// Items or slots handed over to specific waiters, keyed by ticket.
    handed: HashMap<u64, Handoff<T>>,
    next_ticket: u64,
    closed: bool,
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    signal: Condvar,
}

#[derive(Debug)]
enum Handoff<T> {
    Item(T),
    Slot,
    Closed,
}

impl<T> From<Handoff<T>> for Poll<T> {
    fn from(value: Handoff<T>) -> Self {
        match value {
            Handoff::Item(item) => Poll::Item(item),
            Handoff::Slot => Poll::Slot,
            Handoff::Closed => Poll::Closed,
        }
    }
}

impl<T> FairQueue<T> {
    /// Create an empty queue with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                size: 0,
                waiters: VecDeque::new(),
                handed: HashMap::new(),
                next_ticket: 0,
                closed: false,
            }),
        }
    }

    fn take(&self, state: &mut State<T>) -> Option<Poll<T>> {
        if state.closed {
            return Some(Poll::Closed);
        }
        if !state.waiters.is_empty() {
            return None;
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

impl<T> State<T> {
    fn hand_over(&mut self, handoff: Handoff<T>) -> Result<(), Handoff<T>> {
        match self.waiters.pop_front() {
            Some(waiter) => {
                self.handed.insert(waiter.ticket, handoff);
                waiter.signal.notify_one();
                Ok(())
            }
            None => Err(handoff),
        }
    }
}

impl<T: Clone + Send> WaitQueue<T> for FairQueue<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(item);
        }
        match state.hand_over(Handoff::Item(item)) {
            Ok(()) => Ok(()),
            Err(Handoff::Item(item)) if state.items.len() >= self.capacity => Err(item),
            Err(Handoff::Item(item)) => {
                state.items.push_back(item);
                Ok(())
            }
            Err(Handoff::Slot | Handoff::Closed) => Ok(()),
        }
    }

    fn poll(&self, wait: Wait) -> Poll<T> {
        let mut state = self.state.lock();
        if let Some(res) = self.take(&mut state) {
            return res;
        }
        let Wait::Until(deadline) = wait else {
            return Poll::TimedOut;
        };
        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        let waiter = Arc::new(Waiter {
            ticket,
            signal: Condvar::new(),
        });
        state.waiters.push_back(waiter.clone());
        loop {
            if let Some(handoff) = state.handed.remove(&ticket) {
                return handoff.into();
            }
            let timed_out = match deadline {
                Some(deadline) => waiter.signal.wait_until(&mut state, deadline).timed_out(),
                None => {
                    waiter.signal.wait(&mut state);
                    false
                }
            };
            if timed_out {
                // Satisfied concurrently with the timeout: keep what was handed over.
                if let Some(handoff) = state.handed.remove(&ticket) {
                    return handoff.into();
                }
                state.waiters.retain(|w| w.ticket != ticket);
                return Poll::TimedOut;
            }
        }
    }

    fn try_poll(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    fn reserve(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed || !state.waiters.is_empty() || state.size >= self.capacity {
            return false;
        }
        state.size += 1;
        true
    }

    fn release(&self) {
        let mut state = self.state.lock();
        // The slot stays reserved when it goes to a waiter.
        if state.hand_over(Handoff::Slot).is_err() {
            state.size = state.size.saturating_sub(1);
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
        self.state.lock().waiters.len()
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        while state.hand_over(Handoff::Closed).is_ok() {}
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
