//! Barriers and the end-of-work signal.
//!
//! The chip-wide barrier is a two-level token chain:
//!
//! ```text
//!   within each tile          among tile leaders         release
//!   p3 -> p2 -> p1 -> p0      t3 -> t2 -> t1 -> t0   t0 fans to leaders,
//!   (token per hop)           (token per hop)        leaders fan locally
//! ```
//!
//! Each participant waits for a token from its higher-position neighbour,
//! forwards one toward position 0, then waits for the release. Nobody needs
//! to know the group size beyond its own neighbourhood, the message count
//! is O(n), and no participant returns before the last caller has entered.
//!
//! The chain uses input ends 5 (leader chain) and 6 (local chain and
//! release) and overwrites channel map slot 10; entries callers care about
//! go through [`CoreCtx::save_slot`] first.

use crate::chip::{DEFAULT_CREDIT_COUNT, INPUT_JOB, INPUT_LEADER_CHAIN, INPUT_LOCAL_CHAIN};
use crate::runtime::context::{CoreCtx, Destination};
use crate::topology::{
    cores_on_tile, group_bitmask_excluding, single_core_bitmask, tiles_needed, CoreId, TileId,
};

/// Scratch slot the synchronisation chains use.
const SLOT_SYNC: usize = 10;

impl CoreCtx {
    /// Wait until all `cores` cores of the group have reached this point.
    ///
    /// The group occupies cores 0..cores in chip order. Returns on every
    /// participant only once the last one has entered. Overwrites slot 10
    /// and uses inputs 5 and 6.
    pub fn barrier(&mut self, cores: usize) {
        if cores <= 1 {
            return;
        }
        let pos = self.position() as usize;
        let tile = self.tile().index();
        let local = cores_on_tile(cores, tile);

        // Collection: tokens flow from the highest position toward 0.
        if pos < local - 1 {
            self.receive_token(INPUT_LOCAL_CHAIN);
        }
        if pos > 0 {
            self.configure(
                SLOT_SYNC,
                Destination::Local {
                    mask: single_core_bitmask(pos as u8 - 1),
                    input: INPUT_LOCAL_CHAIN,
                },
                0,
            );
            self.send_token(SLOT_SYNC);
            // Release arrives from our leader once all tiles have drained.
            self.receive_token(INPUT_LOCAL_CHAIN);
        } else {
            self.leader_barrier(tiles_needed(cores));
            if local > 1 {
                self.configure(
                    SLOT_SYNC,
                    Destination::Local {
                        mask: group_bitmask_excluding(local, 0),
                        input: INPUT_LOCAL_CHAIN,
                    },
                    0,
                );
                self.send_token(SLOT_SYNC);
            }
        }
        log::trace!("core {:?} passed barrier({cores})", self.id());
    }

    /// Intra-tile barrier over the first `cores` cores of this tile.
    ///
    /// Cheaper than [`CoreCtx::barrier`] when the group fits one tile;
    /// wider groups are fatal. Overwrites slot 10 and uses input 6.
    pub fn tile_barrier(&mut self, cores: usize) {
        assert!(
            cores <= crate::chip::CORES_PER_TILE,
            "tile barrier over {cores} cores exceeds the tile"
        );
        if cores <= 1 {
            return;
        }
        let pos = self.position() as usize;

        if pos < cores - 1 {
            self.receive_token(INPUT_LOCAL_CHAIN);
        }
        if pos > 0 {
            self.configure(
                SLOT_SYNC,
                Destination::Local {
                    mask: single_core_bitmask(pos as u8 - 1),
                    input: INPUT_LOCAL_CHAIN,
                },
                0,
            );
            self.send_token(SLOT_SYNC);
            self.receive_token(INPUT_LOCAL_CHAIN);
        } else {
            self.configure(
                SLOT_SYNC,
                Destination::Local {
                    mask: group_bitmask_excluding(cores, 0),
                    input: INPUT_LOCAL_CHAIN,
                },
                0,
            );
            self.send_token(SLOT_SYNC);
        }
    }

    /// Barrier among the position-0 leaders of the first `tiles` tiles.
    ///
    /// Callable only from position 0; elsewhere is fatal. The identical
    /// chain shape as the local level, run over the credited inter-tile
    /// network on input 5. Overwrites slot 10.
    pub fn leader_barrier(&mut self, tiles: usize) {
        if tiles <= 1 {
            return;
        }
        assert_eq!(self.position(), 0, "only tile leaders run the leader chain");
        let tile = self.tile().index();

        if tile < tiles - 1 {
            self.receive_token(INPUT_LEADER_CHAIN);
        }
        if tile > 0 {
            self.configure(
                SLOT_SYNC,
                Destination::Core {
                    core: CoreId::new(TileId::from_index(tile - 1), 0),
                    input: INPUT_LEADER_CHAIN,
                },
                DEFAULT_CREDIT_COUNT,
            );
            self.send_token(SLOT_SYNC);
            self.receive_token(INPUT_LEADER_CHAIN);
        } else {
            // Every chain has drained into us; release the leaders.
            for dest in 1..tiles {
                self.configure(
                    SLOT_SYNC,
                    Destination::Core {
                        core: CoreId::new(TileId::from_index(dest), 0),
                        input: INPUT_LEADER_CHAIN,
                    },
                    DEFAULT_CREDIT_COUNT,
                );
                self.send_token(SLOT_SYNC);
            }
        }
    }

    /// Signal that the current parallel section has produced all required
    /// results. One token goes to the fixed coordinator input, core
    /// (0, 0) input 7, whose owner then terminates any participants still
    /// inside unbounded loops. Overwrites slot 2.
    pub fn end_of_work(&mut self) {
        let coordinator = CoreId::new(TileId::from_index(0), 0);
        let dest = if self.tile() == coordinator.tile {
            Destination::Local {
                mask: single_core_bitmask(0),
                input: INPUT_JOB,
            }
        } else {
            Destination::Core { core: coordinator, input: INPUT_JOB }
        };
        self.configure(crate::chip::SLOT_FIRST_FREE, dest, DEFAULT_CREDIT_COUNT);
        self.send_token(crate::chip::SLOT_FIRST_FREE);
        log::debug!("core {:?} signalled end of work", self.id());
    }

    /// Consume the end-of-work token. Must execute on core (0, 0).
    pub fn wait_end_of_work(&mut self) {
        assert_eq!(self.global_index(), 0, "the end-of-work coordinator is core (0, 0)");
        self.receive_token(INPUT_JOB);
    }
}
