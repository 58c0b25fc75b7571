//! Credit counters for flow-controlled links.
//!
//! Every credited channel owns one counter. A credit represents one reserved
//! buffer entry at the destination input end: a sender takes a credit before
//! transmitting and the credit comes back when the receiver dequeues the
//! word. The counter therefore bounds in-flight traffic to the configured
//! budget at all times, which is the fabric's deadlock-avoidance invariant.
//!
//! Local multicast links carry no counter; they are bounded by the
//! destination input buffer depth instead.

use parking_lot::{Condvar, Mutex};

/// Credit state for one configured channel.
///
/// Shared between the owning channel slot and every word of that slot's
/// traffic still sitting in a destination buffer.
#[derive(Debug)]
pub(crate) struct CreditCounter {
    budget: u32,
    available: Mutex<u32>,
    changed: Condvar,
}

impl CreditCounter {
    /// Create a counter with all credits available.
    pub(crate) fn new(budget: u32) -> Self {
        assert!(budget > 0, "credited channel needs a non-zero budget");
        Self {
            budget,
            available: Mutex::new(budget),
            changed: Condvar::new(),
        }
    }

    /// Take one credit, blocking while the budget is exhausted.
    pub(crate) fn take(&self) {
        let mut available = self.available.lock();
        while *available == 0 {
            self.changed.wait(&mut available);
        }
        *available -= 1;
    }

    /// Return one credit. Called when the destination dequeues the word.
    pub(crate) fn give(&self) {
        let mut available = self.available.lock();
        debug_assert!(*available < self.budget, "credit returned twice");
        *available += 1;
        self.changed.notify_all();
    }

    /// Credits currently available.
    pub(crate) fn available(&self) -> u32 {
        *self.available.lock()
    }

    /// Whether every credit is home: no traffic in flight.
    pub(crate) fn is_full(&self) -> bool {
        self.available() == self.budget
    }

    /// Block until every credit has returned.
    pub(crate) fn wait_full(&self) {
        let mut available = self.available.lock();
        while *available != self.budget {
            self.changed.wait(&mut available);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_take_and_give() {
        let c = CreditCounter::new(2);
        c.take();
        c.take();
        assert_eq!(c.available(), 0);
        c.give();
        assert_eq!(c.available(), 1);
        c.give();
        assert!(c.is_full());
    }

    #[test]
    fn test_take_blocks_until_given() {
        let c = Arc::new(CreditCounter::new(1));
        c.take();

        let taker = {
            let c = Arc::clone(&c);
            std::thread::spawn(move || {
                c.take();
            })
        };

        // The taker should be stuck until the credit comes back.
        std::thread::sleep(Duration::from_millis(20));
        assert!(!taker.is_finished());
        c.give();
        taker.join().unwrap();
        assert_eq!(c.available(), 0);
    }

    #[test]
    fn test_wait_full_blocks_until_drained() {
        let c = Arc::new(CreditCounter::new(3));
        c.take();
        c.take();

        let waiter = {
            let c = Arc::clone(&c);
            std::thread::spawn(move || c.wait_full())
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        c.give();
        c.give();
        waiter.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "non-zero budget")]
    fn test_zero_budget_is_fatal() {
        let _ = CreditCounter::new(0);
    }
}
