//! Remote execution: pushing work at other cores.
//!
//! Three mechanisms, in increasing order of ceremony:
//!
//! - [`CoreCtx::remote_execute`] pushes one task packet at one core.
//! - [`CoreCtx::distribute`] runs the same function on every core of a
//!   group, bootstrapping remote tiles through their leaders.
//! - [`CoreCtx::spawn`] runs a word-in/word-out call on the fixed helper
//!   core and routes the single-word result to a chosen destination.
//!
//! # Memory visibility
//!
//! A same-tile target shares the sender's banks, so arguments are visible
//! under native tile-local coherence. A cross-tile target is **not**
//! coherent with the sender: `remote_execute` publishes the sender's dirty
//! data first, and the packet refreshes the target's view before the task
//! body runs: an explicit release/acquire pair standing in for the
//! coherence the fabric does not provide.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::chip::{
    INPUT_JOB, IPK_FIFO_DEPTH, SLOT_FIRST_FREE, SPAWN_MAX_ARGS,
};
use crate::fabric::endpoint::{Flit, TaskPacket};
use crate::fabric::Word;
use crate::runtime::context::{CoreCtx, Destination};
use crate::topology::{cores_on_tile, single_core_bitmask, tiles_needed, CoreId, TileId};

/// A function every core of a [`distribute`](CoreCtx::distribute) group
/// runs. Shared read-only across the group.
pub type DistributedFn = Arc<dyn Fn(&mut CoreCtx) + Send + Sync>;

/// Job descriptor for [`CoreCtx::distribute`].
///
/// Written once by the initiator before the job starts; read-only
/// afterwards. The initiator's `distribute` call returns only after every
/// participant has finished, so dropping the descriptor afterwards is safe.
pub struct DistributeJob {
    /// Number of participating cores, starting at core (0, 0).
    pub cores: usize,
    /// The function every participant runs.
    pub func: DistributedFn,
}

/// A spawned call: up to [`SPAWN_MAX_ARGS`] words in, one word out.
pub type SpawnFn = fn(&[Word]) -> Word;

impl CoreCtx {
    /// Execute a task on another core.
    ///
    /// Same-core calls run the task directly. Same-tile calls push the
    /// packet over the target's instruction FIFO. Cross-tile calls
    /// additionally run the flush/refresh discipline described in the
    /// module docs.
    pub fn remote_execute<F>(&mut self, target: CoreId, task: F)
    where
        F: FnOnce(&mut CoreCtx) + Send + 'static,
    {
        if target == self.id() {
            task(self);
            return;
        }
        let packet: TaskPacket = if target.same_tile(self.id()) {
            Box::new(task)
        } else {
            self.publish_data();
            Box::new(move |ctx: &mut CoreCtx| {
                ctx.refresh_data_view();
                task(ctx)
            })
        };
        log::trace!("core {:?} pushes task at {:?}", self.id(), target);
        self.fabric.endpoint(target).push(0, Flit::Task(packet), Some(IPK_FIFO_DEPTH));
    }

    /// Run the same function on every core of a group.
    ///
    /// Must be called on core (0, 0), the first core of the group. Remote
    /// tiles are bootstrapped through their position-0 leaders, which fan
    /// the job out locally before participating themselves. The call
    /// returns once every participant has finished (the group runs a full
    /// barrier after the function), so no configuration race survives it.
    pub fn distribute(&mut self, job: &Arc<DistributeJob>) {
        assert_eq!(self.global_index(), 0, "distribute initiates on core (0, 0)");
        let cores = job.cores;
        if cores <= 1 {
            (job.func)(self);
            return;
        }
        for tile in 1..tiles_needed(cores) {
            let leader = CoreId::new(TileId::from_index(tile), 0);
            let job = Arc::clone(job);
            self.remote_execute(leader, move |ctx| distribute_local(ctx, &job));
        }
        distribute_local(self, job);
    }

    /// Run `entry` on the fixed helper core (position 1 of this tile) and
    /// send its single-word result to `reply`.
    ///
    /// At most [`SPAWN_MAX_ARGS`] argument words; more is fatal. The
    /// arguments travel over the helper's job input as a bounded serialized
    /// buffer: count first, then the words.
    pub fn spawn(&mut self, entry: SpawnFn, reply: Destination, args: &[Word]) {
        assert!(
            args.len() <= SPAWN_MAX_ARGS,
            "spawn takes at most {SPAWN_MAX_ARGS} argument words, got {}",
            args.len()
        );
        let helper = CoreId::new(self.tile(), 1);
        assert_ne!(helper, self.id(), "the helper core cannot spawn onto itself");

        self.remote_execute(helper, move |ctx| spawn_prep(ctx, entry, reply));

        // Argument channel to the helper's job input.
        let data_slot = SLOT_FIRST_FREE + 1;
        self.configure(
            data_slot,
            Destination::Local { mask: single_core_bitmask(helper.pos), input: INPUT_JOB },
            0,
        );
        self.send(data_slot, args.len() as Word);
        self.send_words(data_slot, args);
    }
}

/// Start every local member of a distribute group, then take part.
fn distribute_local(ctx: &mut CoreCtx, job: &Arc<DistributeJob>) {
    let tile = ctx.tile().index();
    let local = cores_on_tile(job.cores, tile);
    for pos in 1..local as u8 {
        let member = CoreId::new(ctx.tile(), pos);
        let job = Arc::clone(job);
        ctx.remote_execute(member, move |ctx| distribute_member(ctx, &job));
    }
    distribute_member(ctx, job);
}

/// One participant's share: run the function, then synchronise so the
/// initiator knows the whole group is done.
fn distribute_member(ctx: &mut CoreCtx, job: &Arc<DistributeJob>) {
    (job.func)(ctx);
    ctx.barrier(job.cores);
}

/// Receive the serialized argument buffer, call the entry, return the
/// result. Runs on the helper core.
fn spawn_prep(ctx: &mut CoreCtx, entry: SpawnFn, reply: Destination) {
    let argc = ctx.receive(INPUT_JOB);
    assert!(
        (0..=SPAWN_MAX_ARGS as Word).contains(&argc),
        "malformed spawn argument count {argc}"
    );
    let mut args: SmallVec<[Word; SPAWN_MAX_ARGS]> = SmallVec::new();
    for _ in 0..argc {
        args.push(ctx.receive(INPUT_JOB));
    }
    let result = entry(&args);
    ctx.configure_default(SLOT_FIRST_FREE, reply);
    ctx.send(SLOT_FIRST_FREE, result);
}
