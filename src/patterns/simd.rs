//! The SIMD loop pattern.
//!
//! Every participant runs the same loop body, but not in lockstep:
//! iteration *i* goes to core *i mod n*, so the stripes interleave without
//! any division to find a core's share.
//!
//! With a helper function present, the core at position 0 stops executing
//! iterations and instead runs the shared precompute once per round,
//! granting the remaining cores permission for one round of work at a time
//! over a multicast channel. The last, partial round is granted only to the
//! cores that still have an iteration left.
//!
//! Termination uses the hierarchical barrier, so the initiating call
//! returns only when every participant has finished (and tidied); the
//! optional reduce then runs on the initiator.

use std::sync::Arc;

use crate::chip::{CORES_PER_TILE, INPUT_JOB};
use crate::patterns::LoopJob;
use crate::runtime::context::{CoreCtx, Destination};
use crate::topology::{
    cores_on_tile, group_bitmask_excluding, tiles_needed, CoreId, TileId,
};

/// Scratch slot the helper core grants permissions on.
const SLOT_GRANT: usize = 10;

/// Run a loop across `job.cores` cores with a fixed striped mapping of
/// iterations. Must be initiated on core (0, 0); returns once the whole
/// group is done and any reduce has run.
pub fn simd_loop(ctx: &mut CoreCtx, job: &Arc<LoopJob>) {
    assert_eq!(ctx.global_index(), 0, "the SIMD loop initiates on core (0, 0)");
    if job.helper.is_some() {
        assert!(
            job.cores <= CORES_PER_TILE,
            "helper-gated SIMD loops grant permission over the local interconnect \
             and cannot span tiles"
        );
        assert!(job.cores >= 2, "a helper core needs at least one worker");
    }

    if job.cores > 1 {
        for tile in 1..tiles_needed(job.cores) {
            let leader = CoreId::new(TileId::from_index(tile), 0);
            let job = Arc::clone(job);
            ctx.remote_execute(leader, move |ctx| start_local_tile(ctx, &job));
        }
        let job_local = Arc::clone(job);
        start_members(ctx, &job_local);
    }

    member(ctx, job, 0);
}

/// Start the members of one tile, leader included. Runs on each tile
/// leader.
fn start_local_tile(ctx: &mut CoreCtx, job: &Arc<LoopJob>) {
    start_members(ctx, job);
    let index = ctx.global_index();
    member(ctx, job, index);
}

/// Push the member task at every local core above position 0.
fn start_members(ctx: &mut CoreCtx, job: &Arc<LoopJob>) {
    let local = cores_on_tile(job.cores, ctx.tile().index());
    for pos in 1..local as u8 {
        let target = CoreId::new(ctx.tile(), pos);
        let index = target.global_index();
        let job = Arc::clone(job);
        ctx.remote_execute(target, move |ctx| member(ctx, &job, index));
    }
}

/// One participant. Position 0 becomes the helper when the job has one;
/// everyone else executes iterations.
fn member(ctx: &mut CoreCtx, job: &Arc<LoopJob>, index: usize) {
    if index == 0 {
        if job.helper.is_some() {
            helper_core(ctx, job);
        } else {
            worker_core(ctx, job, 0);
        }
        if let Some(reduce) = &job.reduce {
            let workers = if job.helper.is_some() { job.cores - 1 } else { job.cores };
            reduce(ctx, workers);
        }
    } else {
        worker_core(ctx, job, index);
    }
}

/// The loop a single SIMD core executes. Iterations are striped: next
/// iteration = current + active worker count.
fn worker_core(ctx: &mut CoreCtx, job: &Arc<LoopJob>, index: usize) {
    let cores = job.cores;
    let iterations = job.iterations;

    if let Some(init) = &job.initialise {
        init(ctx, cores, iterations, index);
    }

    if job.helper.is_none() {
        let mut iter = index;
        while iter < iterations {
            (job.iteration)(ctx, iter, index);
            iter += cores;
        }
    } else {
        // Helper-gated: position 0 is the helper, so this worker's stripe
        // starts one lower and advances by the worker count.
        let worker = index - 1;
        let mut iter = worker;
        while ctx.receive(INPUT_JOB) != 0 {
            (job.iteration)(ctx, iter, worker);
            iter += cores - 1;
        }
    }

    if let Some(tidy) = &job.tidy {
        tidy(ctx, cores, iterations, index);
    }

    ctx.barrier(cores);
}

/// The helper core: run the shared precompute once per round and grant the
/// workers permission round by round.
fn helper_core(ctx: &mut CoreCtx, job: &Arc<LoopJob>) {
    let workers = job.cores - 1;
    let helper = job.helper.as_ref().expect("helper mode without a helper function");

    let everyone = Destination::Local {
        mask: group_bitmask_excluding(job.cores, 0),
        input: INPUT_JOB,
    };
    ctx.configure(SLOT_GRANT, everyone.clone(), 0);

    if let Some(init) = &job.helper_init {
        init(ctx);
    }

    let mut issued = 0;
    while issued + workers < job.iterations {
        ctx.send(SLOT_GRANT, 1);
        helper(ctx);
        issued += workers;
    }

    // Partial final round: only the cores with an iteration left get a
    // grant.
    if issued != job.iterations {
        let remaining = job.iterations - issued;
        ctx.configure(
            SLOT_GRANT,
            Destination::Local {
                mask: group_bitmask_excluding(remaining + 1, 0),
                input: INPUT_JOB,
            },
            0,
        );
        ctx.send(SLOT_GRANT, 1);
        helper(ctx);
    }

    // Everyone stops on a zero grant.
    ctx.configure(SLOT_GRANT, everyone, 0);
    ctx.send(SLOT_GRANT, 0);

    ctx.barrier(job.cores);
}
