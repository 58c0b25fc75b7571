//! Atomic reconfiguration of a tile's memory system.
//!
//! Changes the bank-to-role assignment and/or the miss directory of the
//! coordinator's tile without any core observing a mixture of old and new
//! state, and without racing an in-flight instruction fetch.
//!
//! # Protocol
//!
//! 1. Flush, then fully invalidate, every bank of the tile.
//! 2. Collect an acknowledgement from every bank **over channels**, a
//!    token on the memory-response input per bank, confirming its flush
//!    is globally complete. Memory is never used to signal, since its
//!    behaviour is exactly what is changing.
//! 3. Install the new assignment and directory, and re-point every
//!    participant's instruction and data channels at it. The switch
//!    packets are materialised *before* the install, so the switching
//!    sequence is already in flight when the old configuration becomes
//!    unreachable; the install itself is one indivisible step under the
//!    tile's memory lock.
//! 4. The guard for the switch sequence is that it never fetches: packets
//!    pushed in step 3 sit resident in the participants' instruction
//!    FIFOs, so no genuine fetch (which would itself depend on whichever
//!    configuration is installed) can race the transition.
//!
//! # Precondition
//!
//! The tile must be otherwise quiesced by the caller: every other core of
//! the tile idle in its bootstrap loop, no memory traffic in flight. The
//! coordinator collects a confirmation token from each participant after
//! its channels are re-pointed, so when the call returns, every
//! subsequent access from any core on the tile observes only the new
//! assignment.

use crate::chip::{BANKS_PER_TILE, CORES_PER_TILE, INPUT_LOCAL_CHAIN, INPUT_MEMORY_RESPONSE};
use crate::fabric::endpoint::Flit;
use crate::memconf::{CacheConfig, DirectoryConfig};
use crate::runtime::context::{CoreCtx, Destination};
use crate::topology::{single_core_bitmask, CoreId};

/// Scratch slot participants confirm the switch on.
const SLOT_CONFIRM: usize = 10;

impl CoreCtx {
    /// Atomically install a new cache assignment and miss directory on
    /// this core's tile. See the module docs for the protocol and its
    /// precondition.
    pub fn reconfigure_tile(&mut self, cache: &CacheConfig, directory: &DirectoryConfig) {
        self.reconfigure(Some(cache), Some(directory));
    }

    /// Atomically install a new cache assignment, keeping the directory.
    pub fn reconfigure_caches(&mut self, cache: &CacheConfig) {
        self.reconfigure(Some(cache), None);
    }

    /// Atomically install a new miss directory, keeping the assignment.
    /// The full flush still runs: dirty lines must reach the next level
    /// under the routing they were written with.
    pub fn reconfigure_directory(&mut self, directory: &DirectoryConfig) {
        self.reconfigure(None, Some(directory));
    }

    fn reconfigure(&mut self, cache: Option<&CacheConfig>, directory: Option<&DirectoryConfig>) {
        log::info!("tile {:?} reconfiguring memory system", self.tile());

        // Steps 1-2: flush and invalidate with per-bank acknowledgements.
        self.flush_and_invalidate_all_banks();

        // Step 3a: materialise the switch packets first (step 4's guard).
        let participants = self.tile_participants();
        let coordinator = self.position();
        for &member in &participants {
            self.remote_execute(member, move |ctx| {
                ctx.point_memory_slots_at_assignment();
                ctx.configure(
                    SLOT_CONFIRM,
                    Destination::Local {
                        mask: single_core_bitmask(coordinator),
                        input: INPUT_LOCAL_CHAIN,
                    },
                    0,
                );
                ctx.send_token(SLOT_CONFIRM);
            });
        }

        // Step 3b: the indivisible install.
        {
            let mut mem = self.fabric.tile_memory(self.tile()).lock();
            if let Some(cache) = cache {
                mem.install_assignment(*cache);
            }
            if let Some(directory) = directory {
                mem.install_directory(*directory);
            }
        }

        // Step 3c: re-point our own channels and wait for every
        // participant to confirm theirs.
        self.point_memory_slots_at_assignment();
        for _ in &participants {
            self.receive_token(INPUT_LOCAL_CHAIN);
        }
        log::info!("tile {:?} reconfiguration complete", self.tile());
    }

    /// Flush then invalidate every bank of the tile, collecting one
    /// acknowledgement token per bank over the memory-response input.
    fn flush_and_invalidate_all_banks(&mut self) {
        for bank in 0..BANKS_PER_TILE {
            {
                let mut mem = self.fabric.tile_memory(self.tile()).lock();
                let flushed = mem.flush_bank(bank, self.fabric.main_memory());
                let dropped = mem.invalidate_bank(bank);
                log::debug!(
                    "tile {:?} bank {bank}: flushed {flushed}, invalidated {dropped} lines",
                    self.tile()
                );
            }
            // The bank's completion token travels back over the data
            // network like any other memory response.
            self.fabric.endpoint(self.id()).push(
                INPUT_MEMORY_RESPONSE,
                Flit::Word { value: 0, credit: None },
                None,
            );
        }
        for _ in 0..BANKS_PER_TILE {
            self.receive_token(INPUT_MEMORY_RESPONSE);
        }
    }

    /// The booted cores of this tile, coordinator excluded.
    fn tile_participants(&self) -> Vec<CoreId> {
        let booted = self.fabric.booted_cores();
        (0..CORES_PER_TILE as u8)
            .map(|pos| CoreId::new(self.tile(), pos))
            .filter(|&core| core != self.id() && core.global_index() < booted)
            .collect()
    }
}
