//! Per-core execution context and channel transport operations.
//!
//! A [`CoreCtx`] is handed to exactly one thread of control (the core it
//! belongs to) and never shared. It owns the core's channel map table, its
//! scratchpad, and a handle to the fabric. All communication goes through
//! it:
//!
//! - `configure` writes a table slot (destination plus credit budget)
//! - `send`/`receive`/`test`/`wait_any` move words
//! - `connect`/`disconnect` run the acquire/release handshake for credited
//!   point-to-point channels
//! - `load_word`/`store_word` reach the tile's memory banks; results come
//!   back over the memory-response input like any other message
//!
//! # Table conventions
//!
//! Slots 0 and 1 are reserved for the instruction and data memory
//! connections; slots 2 and up are general purpose. Several library
//! operations document which slots they overwrite; callers preserve entries
//! they care about with [`CoreCtx::save_slot`] / [`CoreCtx::restore_slot`].
//!
//! # Failure model
//!
//! Misconfiguration is fatal: out-of-range slots or inputs abort the calling
//! core. The transport carries no negative acknowledgement; the only
//! recoverable conditions are a pending asynchronous connect and an
//! interrupted receive.

use std::sync::Arc;

use crate::chip::{
    CHANNEL_MAP_TABLE_SIZE, CORES_PER_TILE, CORE_INPUT_BUFFER_DEPTH, CORE_INPUT_ENDS,
    DEFAULT_CREDIT_COUNT, DEFAULT_IPK_FIFO_CREDIT_COUNT, INPUT_MEMORY_RESPONSE, IPK_FIFO_DEPTH,
    SLOT_DATA_MEMORY, SLOT_INSTRUCTION_MEMORY,
};
use crate::config::Config;
use crate::fabric::endpoint::Flit;
use crate::fabric::link::CreditCounter;
use crate::fabric::{Fabric, Interrupted, Word};
use crate::scratchpad::Scratchpad;
use crate::topology::{group_member, mask_members, single_core_bitmask, CoreId, CoreMask, TileId};

/// Where a channel slot points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A single core anywhere on the chip, over the credited network.
    Core {
        /// Destination core.
        core: CoreId,
        /// Input end at the destination.
        input: usize,
    },
    /// Any subset of cores on the sender's own tile, over the local
    /// interconnect. Uncredited; bounded by the input buffer depth.
    Local {
        /// Bit *i* selects core *i* of the sender's tile.
        mask: CoreMask,
        /// Input end at every selected core.
        input: usize,
    },
    /// A group of local memory banks.
    Memory {
        /// First bank of the group.
        bank: usize,
        /// Banks in the group; lines interleave across them.
        group: usize,
        /// Input end memory responses return to.
        return_input: usize,
    },
}

/// Result of polling an asynchronous connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// The handshake is complete; the channel is usable.
    Ready,
    /// Credits are still outstanding or the acquire has not landed yet.
    /// Retry and backoff are the caller's choice.
    Pending,
}

/// One channel map table entry.
#[derive(Debug, Clone, Default)]
struct Slot {
    dest: Option<Destination>,
    credits: Option<Arc<CreditCounter>>,
    acquired: bool,
}

/// A saved channel map entry, for restoring callee-saved slots.
#[derive(Debug, Clone)]
pub struct SavedSlot(Slot);

/// The per-core execution context.
///
/// Exactly one exists per booted core, owned by that core's thread. Role
/// functions and task packets receive `&mut CoreCtx`.
pub struct CoreCtx {
    id: CoreId,
    config: Config,
    pub(crate) fabric: Arc<Fabric>,
    table: Vec<Slot>,
    scratchpad: Scratchpad,
}

impl CoreCtx {
    pub(crate) fn new(id: CoreId, fabric: Arc<Fabric>) -> Self {
        let config = fabric.config().clone();
        let mut ctx = Self {
            id,
            config,
            fabric,
            table: vec![Slot::default(); CHANNEL_MAP_TABLE_SIZE],
            scratchpad: Scratchpad::new(),
        };
        ctx.point_memory_slots_at_assignment();
        ctx
    }

    /// Point slots 0/1 at the bank groups the tile's installed assignment
    /// gives this core. Run at boot and again by the reconfiguration
    /// protocol after a new assignment lands.
    pub(crate) fn point_memory_slots_at_assignment(&mut self) {
        let (icache, dcache) = {
            let mem = self.fabric.tile_memory(self.id.tile).lock();
            (
                mem.assignment().icache_group(self.id.pos),
                mem.assignment().dcache_group(self.id.pos),
            )
        };
        if let Some((bank, group)) = icache {
            self.table[SLOT_INSTRUCTION_MEMORY] = Slot {
                dest: Some(Destination::Memory { bank, group, return_input: 1 }),
                credits: None,
                acquired: true,
            };
        }
        if let Some((bank, group)) = dcache {
            self.table[SLOT_DATA_MEMORY] = Slot {
                dest: Some(Destination::Memory {
                    bank,
                    group,
                    return_input: INPUT_MEMORY_RESPONSE,
                }),
                credits: None,
                acquired: true,
            };
        }
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// This core's id.
    #[inline]
    pub fn id(&self) -> CoreId {
        self.id
    }

    /// This core's tile.
    #[inline]
    pub fn tile(&self) -> TileId {
        self.id.tile
    }

    /// Position within the tile.
    #[inline]
    pub fn position(&self) -> u8 {
        self.id.pos
    }

    /// Chip-wide contiguous index.
    #[inline]
    pub fn global_index(&self) -> usize {
        self.id.global_index()
    }

    /// The configuration the runtime booted with.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The core's private scratchpad.
    #[inline]
    pub fn scratchpad(&mut self) -> &mut Scratchpad {
        &mut self.scratchpad
    }

    // ------------------------------------------------------------------
    // Channel map table
    // ------------------------------------------------------------------

    /// Overwrite a table slot. No handshake is performed; the previous
    /// entry is discarded along with any credit state it held.
    ///
    /// A zero budget on a `Core` destination produces an uncredited global
    /// channel, bounded only by the destination buffer.
    pub fn configure(&mut self, slot: usize, dest: Destination, credit_budget: u32) {
        self.check_slot(slot);
        let credits = match (&dest, credit_budget) {
            (Destination::Core { .. }, n) if n > 0 => Some(Arc::new(CreditCounter::new(n))),
            _ => None,
        };
        if self.config.trace_channels {
            log::trace!("core {:?} slot {slot} -> {dest:?} budget {credit_budget}", self.id);
        }
        self.table[slot] = Slot { dest: Some(dest), credits, acquired: false };
    }

    /// Configure with the deadlock-safe default budget for the destination
    /// input (larger for the instruction FIFO).
    pub fn configure_default(&mut self, slot: usize, dest: Destination) {
        let budget = match &dest {
            Destination::Core { input, .. } => default_credit_count(*input),
            _ => 0,
        };
        self.configure(slot, dest, budget);
    }

    /// Save a slot to be restored later. Credit state travels with it, so
    /// in-flight traffic keeps draining against the same counter.
    pub fn save_slot(&self, slot: usize) -> SavedSlot {
        self.check_slot(slot);
        SavedSlot(self.table[slot].clone())
    }

    /// Restore a previously saved slot.
    pub fn restore_slot(&mut self, slot: usize, saved: SavedSlot) {
        self.check_slot(slot);
        self.table[slot] = saved.0;
    }

    /// Replace a slot, returning the old entry for later restoration.
    pub fn swap_slot(&mut self, slot: usize, dest: Destination, credit_budget: u32) -> SavedSlot {
        let saved = self.save_slot(slot);
        self.configure(slot, dest, credit_budget);
        saved
    }

    // ------------------------------------------------------------------
    // Send / receive
    // ------------------------------------------------------------------

    /// Send one word on a configured output slot.
    ///
    /// Blocks while the credit budget is exhausted, or, on uncredited
    /// links, while a destination buffer is full. Delivery is FIFO per
    /// (sender, channel).
    pub fn send(&mut self, slot: usize, value: Word) {
        let entry = self.slot_entry(slot);
        let dest = entry.dest.clone().expect("send on unconfigured slot");
        let credits = entry.credits.clone();
        if self.config.trace_channels {
            log::trace!("core {:?} send {value} on slot {slot}", self.id);
        }
        match dest {
            Destination::Core { core, input } => {
                if let Some(c) = &credits {
                    c.take();
                    self.fabric
                        .endpoint(core)
                        .push(input, Flit::Word { value, credit: Some(Arc::clone(c)) }, None);
                } else {
                    self.fabric.endpoint(core).push(
                        input,
                        Flit::Word { value, credit: None },
                        Some(depth_for(input)),
                    );
                }
            }
            Destination::Local { mask, input } => {
                for pos in mask_members(mask) {
                    let member = CoreId::new(self.id.tile, pos);
                    self.fabric.endpoint(member).push(
                        input,
                        Flit::Word { value, credit: None },
                        Some(depth_for(input)),
                    );
                }
            }
            Destination::Memory { .. } => {
                panic!("data sends on memory slots go through load/store operations")
            }
        }
    }

    /// Send a token (payload 0) on a configured output slot.
    #[inline]
    pub fn send_token(&mut self, slot: usize) {
        self.send(slot, 0);
    }

    /// Send a word slice, in order, on one channel.
    pub fn send_words(&mut self, slot: usize, words: &[Word]) {
        for &w in words {
            self.send(slot, w);
        }
    }

    /// Receive one word from a register-mapped input, blocking until data
    /// is present. FIFO per input.
    pub fn receive(&mut self, input: usize) -> Word {
        self.check_data_input(input);
        match self.fabric.endpoint(self.id).pop(input) {
            Flit::Word { value, .. } => {
                if self.config.trace_channels {
                    log::trace!("core {:?} received {value} on input {input}", self.id);
                }
                value
            }
            other => panic!("unexpected {other:?} on data input {input}"),
        }
    }

    /// Receive and discard a token.
    #[inline]
    pub fn receive_token(&mut self, input: usize) {
        let _ = self.receive(input);
    }

    /// Fill a word slice from one input, in order.
    pub fn receive_words(&mut self, input: usize, words: &mut [Word]) {
        for w in words.iter_mut() {
            *w = self.receive(input);
        }
    }

    /// Like [`CoreCtx::receive`], but observes an injected cancellation.
    ///
    /// This is the yield point unbounded loops use: a participant blocked
    /// here returns `Err(Interrupted)` when the coordinator cancels it.
    pub fn receive_interruptible(&mut self, input: usize) -> Result<Word, Interrupted> {
        self.check_data_input(input);
        match self.fabric.endpoint(self.id).pop_interruptible(input)? {
            Flit::Word { value, .. } => Ok(value),
            other => panic!("unexpected {other:?} on data input {input}"),
        }
    }

    /// Non-blocking poll: is data waiting on `input`?
    pub fn test(&self, input: usize) -> bool {
        self.check_data_input(input);
        self.fabric.endpoint(self.id).test(input)
    }

    /// Block until one of `inputs` has data; return that input. Ties break
    /// round-robin so no ready input starves.
    pub fn wait_any(&mut self, inputs: &[usize]) -> usize {
        for &input in inputs {
            self.check_data_input(input);
        }
        self.fabric.endpoint(self.id).wait_any(inputs)
    }

    /// Wait for data on any of `inputs` and receive it.
    pub fn receive_any(&mut self, inputs: &[usize]) -> (usize, Word) {
        let input = self.wait_any(inputs);
        let value = self.receive(input);
        (input, value)
    }

    /// Inject a cancellation at the destination core(s) of a slot.
    ///
    /// Out-of-band: it does not occupy buffer space and overtakes queued
    /// data. The destination observes it at its next interruptible
    /// blocking point.
    pub fn send_interrupt(&mut self, slot: usize) {
        let dest = self.slot_entry(slot).dest.clone().expect("interrupt on unconfigured slot");
        match dest {
            Destination::Core { core, .. } => self.fabric.endpoint(core).interrupt(),
            Destination::Local { mask, .. } => {
                for pos in mask_members(mask) {
                    self.fabric.endpoint(CoreId::new(self.id.tile, pos)).interrupt();
                }
            }
            Destination::Memory { .. } => panic!("interrupts target cores, not memory"),
        }
    }

    // ------------------------------------------------------------------
    // Connect / disconnect
    // ------------------------------------------------------------------

    /// Begin an asynchronous connection: configure the slot with the
    /// default deadlock-safe budget and issue the first acquire probe.
    /// Completion is observed through [`CoreCtx::poll_connect`].
    pub fn connect_async(&mut self, slot: usize, core: CoreId, input: usize) {
        self.configure_default(slot, Destination::Core { core, input });
        let _ = self.poll_connect(slot);
    }

    /// Test whether an asynchronous connection has completed.
    ///
    /// Local multicast and memory slots are connected by construction. A
    /// credited channel is ready once every credit is home *and* the
    /// destination input end has been acquired; the acquire request is
    /// (re)issued as a side effect while pending.
    pub fn poll_connect(&mut self, slot: usize) -> ConnectStatus {
        self.check_slot(slot);
        let me = self.id.global_index();
        let entry = &mut self.table[slot];
        let Some(dest) = entry.dest.clone() else {
            panic!("poll_connect on unconfigured slot {slot}")
        };
        match dest {
            Destination::Local { .. } | Destination::Memory { .. } => ConnectStatus::Ready,
            Destination::Core { core, input } => {
                let Some(credits) = entry.credits.clone() else {
                    // Uncredited global channel: nothing to hand back.
                    return ConnectStatus::Ready;
                };
                if !credits.is_full() {
                    return ConnectStatus::Pending;
                }
                if entry.acquired {
                    ConnectStatus::Ready
                } else {
                    // Issue the acquire; a later poll observes the result.
                    if self.fabric.endpoint(core).claim(input, me) {
                        self.table[slot].acquired = true;
                    } else if self.config.strict() {
                        log::warn!(
                            "core {me} contends for input {input} of {core:?} held by {:?}",
                            self.fabric.endpoint(core).claimant(input)
                        );
                    }
                    ConnectStatus::Pending
                }
            }
        }
    }

    /// Block until an asynchronous connection completes.
    pub fn connect_wait(&mut self, slot: usize) {
        while self.poll_connect(slot) == ConnectStatus::Pending {
            self.wait_empty(slot);
        }
    }

    /// Synchronous connect: configure, handshake, return when usable.
    pub fn connect(&mut self, slot: usize, core: CoreId, input: usize) {
        self.connect_async(slot, core, input);
        self.connect_wait(slot);
    }

    /// Connect to the `index`-th member of the contiguous group starting at
    /// `first`.
    pub fn connect_member(&mut self, slot: usize, first: CoreId, index: usize, input: usize) {
        let member = group_member(first, index);
        self.connect(slot, member, input);
    }

    /// Connect to the core `offset` positions ahead in a local ring of
    /// `group_size` cores starting at position 0, wrapping within the
    /// group.
    pub fn connect_ring(&mut self, slot: usize, offset: isize, input: usize, group_size: usize) {
        assert!(group_size > 0 && group_size <= CORES_PER_TILE, "ring wider than a tile");
        let this = self.id.pos as isize;
        let next = (this + offset).rem_euclid(group_size as isize) as u8;
        self.configure(slot, Destination::Local { mask: single_core_bitmask(next), input }, 0);
    }

    /// Release a credited channel so another core may connect to its
    /// destination: drain outstanding credits, then drop the claim.
    pub fn disconnect(&mut self, slot: usize) {
        self.check_slot(slot);
        let entry = self.table[slot].clone();
        let Some(Destination::Core { core, input }) = entry.dest else {
            // Multicast and memory channels hold no claim.
            return;
        };
        if entry.credits.is_some() {
            self.wait_empty(slot);
        }
        if entry.acquired {
            self.fabric.endpoint(core).release(input, self.id.global_index());
            self.table[slot].acquired = false;
        }
    }

    /// Block until every credit of a slot has returned: no traffic from
    /// this slot remains in flight.
    pub fn wait_empty(&mut self, slot: usize) {
        if let Some(credits) = &self.slot_entry(slot).credits {
            credits.wait_full();
        }
    }

    // ------------------------------------------------------------------
    // Memory access
    // ------------------------------------------------------------------

    /// Load one word through the tile's banks. The value returns over the
    /// memory-response input, preserving the transport discipline.
    pub fn load_word(&mut self, addr: u32) -> Word {
        let value = {
            let mut mem = self.fabric.tile_memory(self.id.tile).lock();
            if self.config.strict() {
                self.audit_memory_slot(mem.assignment().dcache_group(self.id.pos));
            }
            mem.load(self.id.pos, addr, self.fabric.main_memory())
        };
        self.fabric
            .endpoint(self.id)
            .push(INPUT_MEMORY_RESPONSE, Flit::Word { value, credit: None }, None);
        self.receive(INPUT_MEMORY_RESPONSE)
    }

    /// Store one word through the tile's banks. Posted; does not wait.
    pub fn store_word(&mut self, addr: u32, value: Word) {
        let mut mem = self.fabric.tile_memory(self.id.tile).lock();
        if self.config.strict() {
            self.audit_memory_slot(mem.assignment().dcache_group(self.id.pos));
        }
        mem.store(self.id.pos, addr, value, self.fabric.main_memory());
    }

    /// Release side of the cross-tile discipline: push this core's dirty
    /// data-cache lines to the shared level.
    pub fn publish_data(&mut self) {
        let mut mem = self.fabric.tile_memory(self.id.tile).lock();
        if let Some((first, count)) = mem.assignment().dcache_group(self.id.pos) {
            for bank in first..first + count {
                mem.flush_bank(bank, self.fabric.main_memory());
            }
        }
    }

    /// Acquire side of the cross-tile discipline: flush this core's
    /// data-cache group, then drop it, so subsequent loads refetch from the
    /// shared level.
    pub fn refresh_data_view(&mut self) {
        let mut mem = self.fabric.tile_memory(self.id.tile).lock();
        if let Some(group) = mem.assignment().dcache_group(self.id.pos) {
            mem.flush_and_invalidate_group(group, self.fabric.main_memory());
        }
    }

    fn audit_memory_slot(&self, live_group: Option<(usize, usize)>) {
        if let Some(Destination::Memory { bank, group, .. }) = &self.table[SLOT_DATA_MEMORY].dest {
            if live_group != Some((*bank, *group)) {
                log::warn!(
                    "core {:?} data channel points at banks {:?} but assignment serves {:?}",
                    self.id,
                    (bank, group),
                    live_group
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    #[inline]
    fn check_slot(&self, slot: usize) {
        assert!(slot < CHANNEL_MAP_TABLE_SIZE, "channel map slot {slot} out of range");
    }

    #[inline]
    fn check_data_input(&self, input: usize) {
        assert!(
            (INPUT_MEMORY_RESPONSE..CORE_INPUT_ENDS).contains(&input),
            "input end {input} is not register-mapped"
        );
    }

    #[inline]
    fn slot_entry(&self, slot: usize) -> &Slot {
        self.check_slot(slot);
        &self.table[slot]
    }

}

/// Deadlock-safe default budget for a connection to `input`.
#[inline]
pub fn default_credit_count(input: usize) -> u32 {
    if input == 0 {
        DEFAULT_IPK_FIFO_CREDIT_COUNT
    } else {
        DEFAULT_CREDIT_COUNT
    }
}

/// Buffer depth of an input end.
#[inline]
pub(crate) fn depth_for(input: usize) -> usize {
    if input == 0 {
        IPK_FIFO_DEPTH
    } else {
        CORE_INPUT_BUFFER_DEPTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_credit_counts() {
        assert_eq!(default_credit_count(0), DEFAULT_IPK_FIFO_CREDIT_COUNT);
        for input in 2..CORE_INPUT_ENDS {
            assert_eq!(default_credit_count(input), DEFAULT_CREDIT_COUNT);
        }
    }

    #[test]
    fn test_depths() {
        assert_eq!(depth_for(0), IPK_FIFO_DEPTH);
        assert_eq!(depth_for(6), CORE_INPUT_BUFFER_DEPTH);
    }
}
