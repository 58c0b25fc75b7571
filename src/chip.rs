//! Chip geometry and protocol constants.
//!
//! All coordination code sizes its tables and loops from the values in this
//! module. They describe the reference configuration of the fabric:
//!
//! - 4×4 grid of compute tiles
//! - 8 cores and 8 memory banks per tile
//! - 16-entry channel map table per core
//! - 8 input channel ends per core, each buffering 4 entries
//!
//! Changing a value here resizes the whole model consistently; nothing else
//! hard-codes these numbers.

/// Number of cores in each tile.
pub const CORES_PER_TILE: usize = 8;

/// Number of memory banks in each tile.
pub const BANKS_PER_TILE: usize = 8;

/// Rows of compute tiles on the chip (excluding the I/O halo).
pub const COMPUTE_TILE_ROWS: usize = 4;

/// Columns of compute tiles on the chip (excluding the I/O halo).
pub const COMPUTE_TILE_COLUMNS: usize = 4;

/// Total compute tiles.
pub const COMPUTE_TILES: usize = COMPUTE_TILE_ROWS * COMPUTE_TILE_COLUMNS;

/// Entries in each core's channel map table, including reserved entries.
pub const CHANNEL_MAP_TABLE_SIZE: usize = 16;

/// Input channel ends per core.
///
/// End 0 is the instruction FIFO, end 1 the instruction cache feed, ends 2-7
/// are the register-mapped data inputs.
pub const CORE_INPUT_ENDS: usize = 8;

/// Entries buffered at each core input end.
pub const CORE_INPUT_BUFFER_DEPTH: usize = 4;

/// Entries buffered in the instruction packet FIFO (input end 0).
pub const IPK_FIFO_DEPTH: usize = 8;

/// Default credit budget for a general-purpose credited channel. This value
/// is deadlock safe for arbitrary communication flows.
pub const DEFAULT_CREDIT_COUNT: u32 = 4;

/// Default credit budget for a connection to the instruction FIFO.
pub const DEFAULT_IPK_FIFO_CREDIT_COUNT: u32 = 8;

/// Words in each core's local scratchpad.
pub const SCRATCHPAD_NUM_WORDS: usize = 256;

/// Words in one cache line.
pub const CACHE_LINE_WORDS: usize = 8;

/// Bytes in one cache line.
pub const CACHE_LINE_BYTES: usize = CACHE_LINE_WORDS * 4;

/// Log base 2 of the miss-directory size.
pub const DIRECTORY_SIZE_LOG2: u32 = 4;

/// Entries in each tile's miss directory. Always a power of 2.
pub const DIRECTORY_SIZE: usize = 1 << DIRECTORY_SIZE_LOG2;

/// Channel map slot reserved for the instruction memory connection.
pub const SLOT_INSTRUCTION_MEMORY: usize = 0;

/// Channel map slot reserved for the data memory connection.
pub const SLOT_DATA_MEMORY: usize = 1;

/// First general-purpose channel map slot.
pub const SLOT_FIRST_FREE: usize = 2;

/// Input end used for memory responses. The transport layer routes load
/// results and flush acknowledgements here.
pub const INPUT_MEMORY_RESPONSE: usize = 2;

/// Input end used by the hierarchical barrier for the tile-leader chain.
pub const INPUT_LEADER_CHAIN: usize = 5;

/// Input end used by the hierarchical barrier for the intra-tile chain and
/// release fan-out, and by the pipeline patterns for inter-stage traffic.
pub const INPUT_LOCAL_CHAIN: usize = 6;

/// Input end used for job arguments and the end-of-work signal.
pub const INPUT_JOB: usize = 7;

/// Largest number of argument words a spawned call may carry.
pub const SPAWN_MAX_ARGS: usize = 5;

/// Smallest and largest worker counts a worker farm supports. The upper
/// bound is the number of receive ports a coordinator can watch at once.
pub const FARM_MIN_WORKERS: usize = 2;
/// See [`FARM_MIN_WORKERS`].
pub const FARM_MAX_WORKERS: usize = 6;
