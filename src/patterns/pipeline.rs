//! The pipeline patterns.
//!
//! Both variants place one stage per core, in position order on one tile,
//! with a link from each stage to its successor on input 6 and a link from
//! the last stage back to stage 0 closing the ring.
//!
//! In the **token pipeline**, stages never exchange data: each works on a
//! private, index-addressed slice and forwards a bare token to say "you may
//! start iteration i". Stage 0's call returns only once the ring token
//! comes back from the last stage, i.e. once the whole pipeline has
//! drained.
//!
//! In the **data-driven pipeline** the values themselves flow down the
//! chain. Stage 0 is the sole producer and decides when the stream ends by
//! producing the job's reserved sentinel, which then propagates down the
//! chain exactly once; the stage with no successor raises the end-of-work
//! signal, which stage 0 consumes before returning.

use std::sync::Arc;

use crate::chip::{CORES_PER_TILE, INPUT_LOCAL_CHAIN};
use crate::fabric::Word;
use crate::runtime::context::{CoreCtx, Destination};
use crate::topology::{single_core_bitmask, CoreId};

/// Per-stage setup or teardown hook.
pub type StageHookFn = Arc<dyn Fn(&mut CoreCtx) + Send + Sync>;

/// A token-pipeline stage body: (iteration).
pub type StageFn = Arc<dyn Fn(&mut CoreCtx, usize) + Send + Sync>;

/// A data-driven stage body: value in, value out. Stage 0 receives the
/// iteration index as its input and may return the sentinel to end the
/// stream; the last stage's return value is discarded.
pub type StreamStageFn = Arc<dyn Fn(&mut CoreCtx, Word) -> Word + Send + Sync>;

/// Slot every stage uses for its forward (or ring-closing) link.
const SLOT_NEXT: usize = 2;

/// Describes a token pipeline with one core per stage.
pub struct PipelineJob {
    /// Number of stages and cores.
    pub stages: usize,
    /// Iterations to push through the pipeline.
    pub iterations: usize,
    /// Per-stage initialisation, run before the first iteration. Empty, or
    /// one (optional) entry per stage.
    pub initialise: Vec<Option<StageHookFn>>,
    /// One body per stage.
    pub stage_fns: Vec<StageFn>,
    /// Per-stage teardown. Empty, or one (optional) entry per stage.
    pub tidy: Vec<Option<StageHookFn>>,
}

/// Describes a data-driven pipeline with one core per stage.
pub struct StreamPipelineJob {
    /// Number of stages and cores.
    pub stages: usize,
    /// Reserved value that signals end of stream instead of carrying data.
    pub end_of_stream: Word,
    /// Per-stage initialisation. Empty, or one (optional) entry per stage.
    pub initialise: Vec<Option<StageHookFn>>,
    /// One body per stage; see [`StreamStageFn`] for the stage-0 contract.
    pub stage_fns: Vec<StreamStageFn>,
    /// Per-stage teardown. Empty, or one (optional) entry per stage.
    pub tidy: Vec<Option<StageHookFn>>,
}

/// Run a token pipeline. Must initiate on core (0, 0); returns once the
/// ring token has confirmed the whole pipeline drained.
pub fn pipeline_loop(ctx: &mut CoreCtx, job: &Arc<PipelineJob>) {
    assert_eq!(ctx.global_index(), 0, "pipelines initiate on core (0, 0)");
    check_stage_tables(job.stages, job.stage_fns.len(), &job.initialise, &job.tidy);

    for stage in 1..job.stages {
        let target = CoreId::new(ctx.tile(), stage as u8);
        let job = Arc::clone(job);
        ctx.remote_execute(target, move |ctx| pipeline_stage(ctx, &job, stage));
    }
    pipeline_stage(ctx, job, 0);
}

/// Run a data-driven pipeline. Must initiate on core (0, 0); returns once
/// the end-of-work signal has arrived back at stage 0.
pub fn stream_pipeline_loop(ctx: &mut CoreCtx, job: &Arc<StreamPipelineJob>) {
    assert_eq!(ctx.global_index(), 0, "pipelines initiate on core (0, 0)");
    check_stage_tables(job.stages, job.stage_fns.len(), &job.initialise, &job.tidy);

    for stage in 1..job.stages {
        let target = CoreId::new(ctx.tile(), stage as u8);
        let job = Arc::clone(job);
        ctx.remote_execute(target, move |ctx| stream_stage(ctx, &job, stage));
    }
    stream_stage(ctx, job, 0);

    // The pipeline has fully drained once the final stage signals; only
    // then is it safe to reuse the cores.
    ctx.wait_end_of_work();
}

fn check_stage_tables(
    stages: usize,
    bodies: usize,
    init: &[Option<StageHookFn>],
    tidy: &[Option<StageHookFn>],
) {
    assert!(stages >= 1, "a pipeline needs at least one stage");
    assert!(
        stages <= CORES_PER_TILE,
        "pipelines link stages over the local interconnect and cannot span tiles"
    );
    assert_eq!(bodies, stages, "one stage body per core");
    assert!(init.is_empty() || init.len() == stages, "initialise table length mismatch");
    assert!(tidy.is_empty() || tidy.len() == stages, "tidy table length mismatch");
}

/// Point the forward link at the next stage, or back at stage 0 from the
/// end of the chain.
fn connect_next(ctx: &mut CoreCtx, stage: usize, stages: usize) -> bool {
    let have_successor = stage + 1 < stages;
    let next = if have_successor { stage as u8 + 1 } else { 0 };
    ctx.configure(
        SLOT_NEXT,
        Destination::Local {
            mask: single_core_bitmask(next),
            input: INPUT_LOCAL_CHAIN,
        },
        0,
    );
    have_successor
}

/// One stage of the token pipeline.
fn pipeline_stage(ctx: &mut CoreCtx, job: &Arc<PipelineJob>, stage: usize) {
    let have_predecessor = stage > 0;
    let have_successor = connect_next(ctx, stage, job.stages);

    if let Some(Some(init)) = job.initialise.get(stage) {
        init(ctx);
    }

    for i in 0..job.iterations {
        // The predecessor's token says iteration i's inputs are ready.
        if have_predecessor {
            ctx.receive_token(INPUT_LOCAL_CHAIN);
        }
        (job.stage_fns[stage])(ctx, i);
        if have_successor {
            ctx.send_token(SLOT_NEXT);
        }
    }

    // The final stage closes the ring; stage 0 returns only once the ring
    // token arrives, so the whole pipeline has drained.
    if !have_successor {
        ctx.send_token(SLOT_NEXT);
    }
    if !have_predecessor {
        ctx.receive_token(INPUT_LOCAL_CHAIN);
    }

    if let Some(Some(tidy)) = job.tidy.get(stage) {
        tidy(ctx);
    }
}

/// One stage of the data-driven pipeline.
fn stream_stage(ctx: &mut CoreCtx, job: &Arc<StreamPipelineJob>, stage: usize) {
    let have_successor = connect_next(ctx, stage, job.stages);
    let body = &job.stage_fns[stage];

    if let Some(Some(init)) = job.initialise.get(stage) {
        init(ctx);
    }

    if stage == 0 {
        // Sole producer: feed the chain until the body reports end of
        // stream by returning the sentinel.
        let mut arg: Word = 0;
        loop {
            let result = body(ctx, arg);
            if result == job.end_of_stream {
                if have_successor {
                    ctx.send(SLOT_NEXT, result);
                }
                break;
            }
            if have_successor {
                ctx.send(SLOT_NEXT, result);
            }
            arg += 1;
        }
    } else {
        // Work on whatever arrives, for as long as it arrives.
        loop {
            let arg = ctx.receive(INPUT_LOCAL_CHAIN);
            if arg == job.end_of_stream {
                if have_successor {
                    ctx.send(SLOT_NEXT, arg);
                }
                break;
            }
            let result = body(ctx, arg);
            if have_successor {
                ctx.send(SLOT_NEXT, result);
            }
        }
    }

    if let Some(Some(tidy)) = job.tidy.get(stage) {
        tidy(ctx);
    }

    // The stage that forwards no further reports completion.
    if !have_successor {
        ctx.end_of_work();
    }
}
