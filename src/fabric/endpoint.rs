//! Per-core input endpoints.
//!
//! Each core owns a fixed set of input channel ends (see
//! [`crate::chip::CORE_INPUT_ENDS`]): end 0 is the instruction FIFO feeding
//! the bootstrap loop, ends 2-7 are the register-mapped data inputs. All
//! ends of one core share a single lock so that `wait_any` can observe them
//! together and pick a ready input with round-robin fairness.
//!
//! Senders block while a destination buffer is full (local, uncredited
//! traffic) or rely on their credit counter having reserved space (credited
//! traffic, pushed without a capacity check). Receivers block while an input
//! is empty. These are the only suspension points in the fabric.
//!
//! An *interrupt* is out-of-band: it is a flag, not a queued message, and is
//! observed only by [`CoreEndpoint::pop_interruptible`], the hook the
//! dataflow pattern uses to break participants out of unbounded loops.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::chip::CORE_INPUT_ENDS;
use crate::fabric::link::CreditCounter;
use crate::runtime::CoreCtx;
use crate::Word;

/// A task pushed to another core's instruction FIFO.
pub(crate) type TaskPacket = Box<dyn FnOnce(&mut CoreCtx) + Send>;

/// Interruption of a blocked receive.
///
/// Raised only by the interruptible receive variants, when another core has
/// injected a cancellation with `send_interrupt`. The receiving loop is
/// expected to run its tidy code and return to the bootstrap loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted while blocked on a channel input")]
pub struct Interrupted;

/// One queued message.
pub(crate) enum Flit {
    /// A data word. Carries the sender's credit counter when the channel is
    /// credited; the credit is returned when the word is dequeued.
    Word {
        value: Word,
        credit: Option<Arc<CreditCounter>>,
    },
    /// An instruction packet for the bootstrap loop.
    Task(TaskPacket),
    /// Shut the bootstrap loop down.
    Halt,
}

impl std::fmt::Debug for Flit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Flit::Word { value, credit } => f
                .debug_struct("Word")
                .field("value", value)
                .field("credited", &credit.is_some())
                .finish(),
            Flit::Task(_) => f.write_str("Task"),
            Flit::Halt => f.write_str("Halt"),
        }
    }
}

/// Mutable endpoint state, all inputs of one core under one lock.
struct EndpointState {
    queues: [VecDeque<Flit>; CORE_INPUT_ENDS],
    /// Which core (by global index) has acquired each input end through the
    /// connect handshake. `None` means unclaimed.
    claims: [Option<usize>; CORE_INPUT_ENDS],
    /// Pending out-of-band cancellation.
    interrupted: bool,
    /// Round-robin cursor for `wait_any` fairness, in input-number space.
    select_cursor: usize,
}

/// The input side of one core.
pub(crate) struct CoreEndpoint {
    state: Mutex<EndpointState>,
    /// Signalled when data arrives or an interrupt is injected.
    arrived: Condvar,
    /// Signalled when a queue entry is consumed.
    drained: Condvar,
}

impl CoreEndpoint {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(EndpointState {
                queues: Default::default(),
                claims: [None; CORE_INPUT_ENDS],
                interrupted: false,
                select_cursor: 0,
            }),
            arrived: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    /// Enqueue a flit on `input`.
    ///
    /// With `capacity` given, blocks while the queue holds that many entries
    /// (local backpressure). Credited senders pass `None`: their credit has
    /// already reserved the space.
    pub(crate) fn push(&self, input: usize, flit: Flit, capacity: Option<usize>) {
        assert!(input < CORE_INPUT_ENDS, "input end {input} out of range");
        let mut state = self.state.lock();
        if let Some(capacity) = capacity {
            while state.queues[input].len() >= capacity {
                self.drained.wait(&mut state);
            }
        }
        state.queues[input].push_back(flit);
        self.arrived.notify_all();
    }

    /// Dequeue from `input`, blocking until data is present. Returns the
    /// sender's credit before handing the flit back.
    pub(crate) fn pop(&self, input: usize) -> Flit {
        assert!(input < CORE_INPUT_ENDS, "input end {input} out of range");
        let mut state = self.state.lock();
        while state.queues[input].is_empty() {
            self.arrived.wait(&mut state);
        }
        self.take_front(&mut state, input)
    }

    /// Like [`CoreEndpoint::pop`], but returns early if an interrupt has
    /// been injected. The pending interrupt is consumed.
    pub(crate) fn pop_interruptible(&self, input: usize) -> Result<Flit, Interrupted> {
        assert!(input < CORE_INPUT_ENDS, "input end {input} out of range");
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                state.interrupted = false;
                return Err(Interrupted);
            }
            if !state.queues[input].is_empty() {
                return Ok(self.take_front(&mut state, input));
            }
            self.arrived.wait(&mut state);
        }
    }

    /// Non-blocking poll: is data waiting on `input`?
    pub(crate) fn test(&self, input: usize) -> bool {
        assert!(input < CORE_INPUT_ENDS, "input end {input} out of range");
        !self.state.lock().queues[input].is_empty()
    }

    /// Block until one of `inputs` has data; return that input.
    ///
    /// When several are ready, ties break round-robin: the cursor walks the
    /// input-number space so no ready input can be passed over twice in a
    /// row.
    pub(crate) fn wait_any(&self, inputs: &[usize]) -> usize {
        assert!(!inputs.is_empty(), "wait_any needs at least one input");
        for &input in inputs {
            assert!(input < CORE_INPUT_ENDS, "input end {input} out of range");
        }
        let mut state = self.state.lock();
        loop {
            let cursor = state.select_cursor;
            let ready = inputs
                .iter()
                .copied()
                .filter(|&i| !state.queues[i].is_empty())
                .min_by_key(|&i| (i + CORE_INPUT_ENDS - cursor) % CORE_INPUT_ENDS);
            if let Some(input) = ready {
                state.select_cursor = (input + 1) % CORE_INPUT_ENDS;
                return input;
            }
            self.arrived.wait(&mut state);
        }
    }

    /// Inject an out-of-band cancellation, waking any blocked receiver.
    pub(crate) fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.arrived.notify_all();
    }

    /// Try to acquire an input end for exclusive use by `owner` (a global
    /// core index). Succeeds if the end is unclaimed or already ours.
    pub(crate) fn claim(&self, input: usize, owner: usize) -> bool {
        assert!(input < CORE_INPUT_ENDS, "input end {input} out of range");
        let mut state = self.state.lock();
        match state.claims[input] {
            None => {
                state.claims[input] = Some(owner);
                true
            }
            Some(current) => current == owner,
        }
    }

    /// Release a previously acquired input end. Releasing an end claimed by
    /// someone else is a protocol violation and is ignored with a warning.
    pub(crate) fn release(&self, input: usize, owner: usize) {
        assert!(input < CORE_INPUT_ENDS, "input end {input} out of range");
        let mut state = self.state.lock();
        match state.claims[input] {
            Some(current) if current == owner => state.claims[input] = None,
            Some(current) => {
                log::warn!("core {owner} released input {input} held by core {current}");
            }
            None => {}
        }
    }

    /// Who currently holds the claim on `input`, if anyone.
    pub(crate) fn claimant(&self, input: usize) -> Option<usize> {
        self.state.lock().claims[input]
    }

    fn take_front(&self, state: &mut EndpointState, input: usize) -> Flit {
        let flit = state.queues[input].pop_front().expect("queue checked non-empty");
        if let Flit::Word { credit: Some(credit), .. } = &flit {
            credit.give();
        }
        self.drained.notify_all();
        flit
    }
}
