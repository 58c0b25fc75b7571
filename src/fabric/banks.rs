//! Tile memory banks and the main-memory backing store.
//!
//! Each tile's eight banks cache 8-word lines of a flat, word-addressed
//! main memory. Which bank serves an access is decided by the tile's current
//! [`CacheConfig`]: the contiguous group of banks assigned to the accessing
//! core's data-cache role, with lines interleaved across the group. Misses
//! consult the miss directory, which rewrites the routing slice of the
//! address before the next level is touched.
//!
//! Same-tile sharing is coherent because one lock guards the whole tile's
//! memory state. There is deliberately no coherence *across* tiles: a writer
//! must flush and a reader must invalidate before an update is guaranteed
//! visible, exactly the discipline remote execution enforces.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::chip::{BANKS_PER_TILE, CACHE_LINE_WORDS};
use crate::memconf::{CacheConfig, DirectoryConfig};
use crate::Word;

/// One cached line.
#[derive(Debug, Clone, Copy)]
struct CacheLine {
    words: [Word; CACHE_LINE_WORDS],
    dirty: bool,
}

/// One memory bank: a software-managed set of cached lines, keyed by the
/// line address the core used.
#[derive(Debug, Default)]
pub(crate) struct Bank {
    lines: HashMap<u32, CacheLine>,
}

impl Bank {
    fn line_count(&self) -> usize {
        self.lines.len()
    }
}

/// The flat backing store behind every tile.
#[derive(Debug, Default)]
pub(crate) struct MainMemory {
    lines: Mutex<HashMap<u32, [Word; CACHE_LINE_WORDS]>>,
}

impl MainMemory {
    pub(crate) fn read_line(&self, line_addr: u32) -> [Word; CACHE_LINE_WORDS] {
        self.lines
            .lock()
            .get(&line_addr)
            .copied()
            .unwrap_or([0; CACHE_LINE_WORDS])
    }

    pub(crate) fn write_line(&self, line_addr: u32, words: [Word; CACHE_LINE_WORDS]) {
        self.lines.lock().insert(line_addr, words);
    }

    /// Read a single word without going through any cache.
    pub(crate) fn read_word(&self, addr: u32) -> Word {
        let line = addr / CACHE_LINE_WORDS as u32;
        let offset = (addr % CACHE_LINE_WORDS as u32) as usize;
        self.read_line(line)[offset]
    }

    /// Write a single word without going through any cache.
    pub(crate) fn write_word(&self, addr: u32, value: Word) {
        let line = addr / CACHE_LINE_WORDS as u32;
        let offset = (addr % CACHE_LINE_WORDS as u32) as usize;
        let mut lines = self.lines.lock();
        let entry = lines.entry(line).or_insert([0; CACHE_LINE_WORDS]);
        entry[offset] = value;
    }
}

/// The memory state of one tile: banks plus the installed configuration.
///
/// Held behind one mutex per tile (see [`super::Fabric`]); every access goes
/// through that lock, which is what makes same-tile sharing coherent and the
/// reconfiguration switch indivisible.
#[derive(Debug)]
pub(crate) struct TileMemory {
    banks: [Bank; BANKS_PER_TILE],
    assignment: CacheConfig,
    directory: DirectoryConfig,
}

impl TileMemory {
    pub(crate) fn new() -> Self {
        Self {
            banks: Default::default(),
            assignment: CacheConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }

    pub(crate) fn assignment(&self) -> &CacheConfig {
        &self.assignment
    }

    pub(crate) fn directory(&self) -> &DirectoryConfig {
        &self.directory
    }

    /// Install a new bank assignment. Only the reconfiguration protocol may
    /// call this, with the tile quiesced and the banks clean.
    pub(crate) fn install_assignment(&mut self, assignment: CacheConfig) {
        // Validate contiguity for every served core up front; a bad group
        // must fail loudly here rather than on some later access.
        for core in 0..8u8 {
            let _ = assignment.dcache_group(core);
            let _ = assignment.icache_group(core);
        }
        self.assignment = assignment;
    }

    /// Install a new miss directory. Same caveats as
    /// [`TileMemory::install_assignment`].
    pub(crate) fn install_directory(&mut self, directory: DirectoryConfig) {
        self.directory = directory;
    }

    /// Load one word on behalf of `core`.
    pub(crate) fn load(&mut self, core: u8, addr: u32, main: &MainMemory) -> Word {
        let line_addr = addr / CACHE_LINE_WORDS as u32;
        let offset = (addr % CACHE_LINE_WORDS as u32) as usize;
        match self.assignment.dcache_group(core) {
            None => main.read_word(self.directory.translate(line_addr) * CACHE_LINE_WORDS as u32 + offset as u32),
            Some(group) => {
                let bank = Self::bank_for(group, line_addr);
                self.fill(bank, line_addr, main);
                self.banks[bank].lines[&line_addr].words[offset]
            }
        }
    }

    /// Store one word on behalf of `core`. Write-allocates on miss.
    pub(crate) fn store(&mut self, core: u8, addr: u32, value: Word, main: &MainMemory) {
        let line_addr = addr / CACHE_LINE_WORDS as u32;
        let offset = (addr % CACHE_LINE_WORDS as u32) as usize;
        match self.assignment.dcache_group(core) {
            None => {
                main.write_word(
                    self.directory.translate(line_addr) * CACHE_LINE_WORDS as u32 + offset as u32,
                    value,
                );
            }
            Some(group) => {
                let bank = Self::bank_for(group, line_addr);
                self.fill(bank, line_addr, main);
                let line = self.banks[bank].lines.get_mut(&line_addr).expect("line just filled");
                line.words[offset] = value;
                line.dirty = true;
            }
        }
    }

    /// Write every dirty line of one bank back to the next level and mark it
    /// clean. Returns the number of lines written.
    pub(crate) fn flush_bank(&mut self, bank: usize, main: &MainMemory) -> usize {
        assert!(bank < BANKS_PER_TILE, "bank {bank} out of range");
        let directory = self.directory;
        let mut written = 0;
        for (&line_addr, line) in self.banks[bank].lines.iter_mut() {
            if line.dirty {
                main.write_line(directory.translate(line_addr), line.words);
                line.dirty = false;
                written += 1;
            }
        }
        written
    }

    /// Drop every line of one bank. Dirty data is lost; flush first if it
    /// must survive.
    pub(crate) fn invalidate_bank(&mut self, bank: usize) -> usize {
        assert!(bank < BANKS_PER_TILE, "bank {bank} out of range");
        let dropped = self.banks[bank].line_count();
        self.banks[bank].lines.clear();
        dropped
    }

    /// Flush then invalidate a contiguous bank group.
    pub(crate) fn flush_and_invalidate_group(
        &mut self,
        group: (usize, usize),
        main: &MainMemory,
    ) {
        let (first, count) = group;
        for bank in first..first + count {
            self.flush_bank(bank, main);
            self.invalidate_bank(bank);
        }
    }

    fn bank_for((first, count): (usize, usize), line_addr: u32) -> usize {
        first + (line_addr as usize) % count
    }

    fn fill(&mut self, bank: usize, line_addr: u32, main: &MainMemory) {
        if self.banks[bank].lines.contains_key(&line_addr) {
            return;
        }
        let entry = *self.directory.entry_for(line_addr);
        let words = if entry.scratchpad {
            // Scratchpad level: the line materialises locally, no fill.
            [0; CACHE_LINE_WORDS]
        } else {
            main.read_line(self.directory.translate(line_addr))
        };
        self.banks[bank].lines.insert(line_addr, CacheLine { words, dirty: false });
    }
}
