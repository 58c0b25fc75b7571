//! The software fabric: everything the cores share.
//!
//! This module provides the chip model the coordination layer runs against:
//!
//! - One [`CoreEndpoint`] per core position on the grid (the input side of
//!   that core)
//! - One [`TileMemory`] per tile, behind a per-tile lock
//! - A single flat [`MainMemory`] backing store
//!
//! ```text
//!            tile (x, y)
//!   +---------------------------+
//!   | core0 core1 ... core7     |     inter-tile network:
//!   |  |      |        |        |     credited point-to-point
//!   | [endpoints: 8 inputs each]|<===============+
//!   |                           |                |
//!   | bank0 ... bank7  directory|          other tiles
//!   +------------|--------------+
//!                v
//!           main memory
//! ```
//!
//! The fabric is passive. All behaviour lives in the per-core contexts; the
//! fabric just owns the shared endpoints and memory, so that a context can
//! reach the input side of any destination core.

pub(crate) mod banks;
pub(crate) mod endpoint;
pub(crate) mod link;

pub use endpoint::Interrupted;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::chip::{COMPUTE_TILES, CORES_PER_TILE};
use crate::config::Config;
use crate::topology::{CoreId, TileId};

use banks::{MainMemory, TileMemory};
use endpoint::CoreEndpoint;

/// One word of channel payload.
pub type Word = i32;

/// The shared state of the whole chip model.
pub(crate) struct Fabric {
    endpoints: Vec<Arc<CoreEndpoint>>,
    tiles: Vec<Mutex<TileMemory>>,
    main: MainMemory,
    config: Config,
    booted: usize,
}

impl Fabric {
    /// Build the fabric for the full compute grid. `booted` is the number
    /// of cores that will actually run threads; the rest of the grid keeps
    /// passive endpoints.
    pub(crate) fn new(config: Config, booted: usize) -> Self {
        let cores = COMPUTE_TILES * CORES_PER_TILE;
        Self {
            endpoints: (0..cores).map(|_| Arc::new(CoreEndpoint::new())).collect(),
            tiles: (0..COMPUTE_TILES).map(|_| Mutex::new(TileMemory::new())).collect(),
            main: MainMemory::default(),
            config,
            booted,
        }
    }

    /// Number of cores with a live thread behind them.
    #[inline]
    pub(crate) fn booted_cores(&self) -> usize {
        self.booted
    }

    /// The input side of a core.
    #[inline]
    pub(crate) fn endpoint(&self, core: CoreId) -> &Arc<CoreEndpoint> {
        &self.endpoints[core.global_index()]
    }

    /// A tile's memory state.
    #[inline]
    pub(crate) fn tile_memory(&self, tile: TileId) -> &Mutex<TileMemory> {
        &self.tiles[tile.index()]
    }

    /// The backing store.
    #[inline]
    pub(crate) fn main_memory(&self) -> &MainMemory {
        &self.main
    }

    /// The configuration the fabric was booted with.
    #[inline]
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }
}
