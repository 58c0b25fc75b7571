//! The worker farm pattern.
//!
//! One coordinator hands out loop iterations dynamically. Workers announce
//! readiness by sending their position to a per-worker port on the
//! coordinator; the coordinator serves whichever request it sees first
//! (arrival order, with the round-robin tie-break of `wait_any`; no
//! stronger fairness is promised) and replies with the next unissued
//! iteration index. A reserved sentinel index idles each worker out once
//! the iteration space is exhausted.
//!
//! The farm is bounded to 2-6 workers by the coordinator's receive ports:
//! worker at position *w* owns coordinator input *w + 1*, so six workers
//! cover inputs 2 through 7. Everything runs on one tile.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::chip::{FARM_MAX_WORKERS, FARM_MIN_WORKERS, INPUT_JOB};
use crate::fabric::Word;
use crate::patterns::LoopJob;
use crate::runtime::context::{CoreCtx, Destination};
use crate::topology::{single_core_bitmask, CoreId};

/// Reply that idles a worker out. Never a valid iteration index.
const NO_MORE_WORK: Word = -1;

/// Coordinator slot for replies to workers.
const SLOT_REPLY: usize = 3;

/// Worker slot for requests to the coordinator.
const SLOT_REQUEST: usize = 2;

/// Run a loop with iterations allocated to workers as they become
/// available. `job.cores` counts the coordinator plus 2-6 workers; any
/// other size is fatal. Must initiate on core (0, 0); returns after the
/// optional reduce.
pub fn worker_farm(ctx: &mut CoreCtx, job: &Arc<LoopJob>) {
    assert_eq!(ctx.global_index(), 0, "the worker farm initiates on core (0, 0)");
    let workers = job.cores.checked_sub(1).expect("a farm needs a coordinator");
    assert!(
        (FARM_MIN_WORKERS..=FARM_MAX_WORKERS).contains(&workers),
        "worker farms take {FARM_MIN_WORKERS}-{FARM_MAX_WORKERS} workers, got {workers}"
    );

    for w in 1..=workers as u8 {
        let target = CoreId::new(ctx.tile(), w);
        let job = Arc::clone(job);
        ctx.remote_execute(target, move |ctx| worker(ctx, &job));
    }

    // One receive port per worker: position w announces on input w + 1.
    let ports: SmallVec<[usize; FARM_MAX_WORKERS]> =
        (1..=workers).map(|w| w + 1).collect();

    for iter in 0..job.iterations {
        let requester = next_requester(ctx, &ports);
        reply(ctx, requester, iter as Word);
    }

    // Idle every worker out after its final request.
    for _ in 0..workers {
        let requester = next_requester(ctx, &ports);
        reply(ctx, requester, NO_MORE_WORK);
    }
    log::debug!("farm coordinator issued {} iterations to {workers} workers", job.iterations);

    if let Some(reduce) = &job.reduce {
        reduce(ctx, workers);
    }
}

/// Wait for any worker's request and return the requesting position.
fn next_requester(ctx: &mut CoreCtx, ports: &[usize]) -> u8 {
    let (_, position) = ctx.receive_any(ports);
    position as u8
}

/// Serve one request: connect to the requester's job input and send the
/// index.
fn reply(ctx: &mut CoreCtx, position: u8, index: Word) {
    ctx.configure(
        SLOT_REPLY,
        Destination::Local { mask: single_core_bitmask(position), input: INPUT_JOB },
        0,
    );
    ctx.send(SLOT_REPLY, index);
}

/// The loop each worker executes: request, work, repeat, until the
/// coordinator replies with the sentinel.
fn worker(ctx: &mut CoreCtx, job: &Arc<LoopJob>) {
    let position = ctx.position();
    let index = position as usize - 1;

    ctx.configure(
        SLOT_REQUEST,
        Destination::Local {
            mask: single_core_bitmask(0),
            input: position as usize + 1,
        },
        0,
    );

    loop {
        ctx.send(SLOT_REQUEST, position as Word);
        let iteration = ctx.receive(INPUT_JOB);
        if iteration == NO_MORE_WORK {
            break;
        }
        (job.iteration)(ctx, iteration as usize, index);
    }
}
