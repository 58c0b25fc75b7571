//! Core bring-up and lifetime management.
//!
//! [`Runtime::boot`] creates the fabric and starts one host thread per core
//! of the requested group. Each thread runs the *bootstrap loop*: it blocks
//! on its instruction FIFO (input end 0), executes every task packet that
//! arrives, and goes back to waiting: the software stand-in for a core
//! sleeping until an instruction packet is pushed at it.
//!
//! User code enters the chip through [`Runtime::run`], which executes a
//! closure on the primary core (tile 0, position 0) and hands back its
//! result. Everything else (starting sibling cores, patterns, barriers)
//! happens from inside, through the [`CoreCtx`] the closure receives.
//!
//! Shutdown pushes a halt packet at every booted core and joins the
//! threads. Dropping the runtime does the same.

pub mod context;
pub mod remote;
pub mod sync;

pub use context::{ConnectStatus, CoreCtx, Destination, SavedSlot};

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::chip::{COMPUTE_TILES, CORES_PER_TILE};
use crate::config::Config;
use crate::fabric::endpoint::Flit;
use crate::fabric::Fabric;
use crate::topology::CoreId;

/// A booted group of cores.
pub struct Runtime {
    fabric: Arc<Fabric>,
    cores: usize,
    handles: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Boot `cores` cores, filling tiles in chip order, and leave them
    /// parked in their bootstrap loops.
    pub fn boot(cores: usize, config: &Config) -> Self {
        assert!(cores >= 1, "cannot boot an empty group");
        assert!(
            cores <= COMPUTE_TILES * CORES_PER_TILE,
            "group of {cores} exceeds the chip"
        );
        let fabric = Arc::new(Fabric::new(config.clone(), cores));
        let mut handles = Vec::with_capacity(cores);
        for index in 0..cores {
            let id = CoreId::from_global_index(index);
            let fabric = Arc::clone(&fabric);
            let handle = std::thread::Builder::new()
                .name(format!("core-{}.{}", id.tile.index(), id.pos))
                .spawn(move || bootstrap(CoreCtx::new(id, fabric)))
                .expect("failed to spawn core thread");
            handles.push(handle);
        }
        log::info!("booted {cores} cores across {} tiles", crate::topology::tiles_needed(cores));
        Self { fabric, cores, handles }
    }

    /// Number of booted cores.
    #[inline]
    pub fn cores(&self) -> usize {
        self.cores
    }

    /// Execute `entry` on the primary core and return its result.
    ///
    /// Blocks the calling (host) thread until the closure completes. The
    /// closure runs inside the primary core's bootstrap loop, so it may use
    /// every coordination operation, including ones that assume they run on
    /// core 0.
    pub fn run<R, F>(&self, entry: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&mut CoreCtx) -> R + Send + 'static,
    {
        let primary = CoreId::from_global_index(0);
        let (tx, rx) = mpsc::channel();
        let packet: crate::fabric::endpoint::TaskPacket = Box::new(move |ctx: &mut CoreCtx| {
            let result = entry(ctx);
            // The host may have gone away on panic; nothing to do then.
            let _ = tx.send(result);
        });
        self.fabric.endpoint(primary).push(
            0,
            Flit::Task(packet),
            Some(crate::chip::IPK_FIFO_DEPTH),
        );
        rx.recv().expect("primary core terminated without a result")
    }

    /// Halt every core and join the threads.
    pub fn shutdown(mut self) {
        self.halt_and_join();
    }

    fn halt_and_join(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        log::info!("halting {} cores", self.cores);
        for index in 0..self.cores {
            let id = CoreId::from_global_index(index);
            self.fabric.endpoint(id).push(0, Flit::Halt, None);
        }
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.join() {
                log::error!("core thread panicked: {e:?}");
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.halt_and_join();
    }
}

/// The per-core bootstrap loop.
///
/// Runs until a halt packet arrives. Words on the instruction FIFO that are
/// not packets indicate a misdirected send; they are dropped with a
/// warning rather than silently corrupting the instruction stream.
fn bootstrap(mut ctx: CoreCtx) {
    log::debug!("core {:?} entering bootstrap loop", ctx.id());
    let endpoint = Arc::clone(ctx.fabric.endpoint(ctx.id()));
    loop {
        match endpoint.pop(0) {
            Flit::Task(task) => task(&mut ctx),
            Flit::Halt => break,
            Flit::Word { value, .. } => {
                log::warn!("core {:?} dropped stray word {value} on instruction input", ctx.id());
            }
        }
    }
    log::debug!("core {:?} halted", ctx.id());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_and_run_roundtrip() {
        let rt = Runtime::boot(2, &Config::default());
        let id = rt.run(|ctx| ctx.global_index());
        assert_eq!(id, 0);
        rt.shutdown();
    }

    #[test]
    fn test_run_twice_keeps_core_state() {
        let rt = Runtime::boot(1, &Config::default());
        rt.run(|ctx| ctx.scratchpad().write(0, 11));
        let value = rt.run(|ctx| ctx.scratchpad().read(0));
        assert_eq!(value, 11);
    }

    #[test]
    #[should_panic(expected = "exceeds the chip")]
    fn test_overwide_boot_is_fatal() {
        let _ = Runtime::boot(COMPUTE_TILES * CORES_PER_TILE + 1, &Config::default());
    }
}
