//! Reusable parallel execution patterns.
//!
//! Five ways to spread a computation over a group of cores, all built on
//! the transport, remote-execution and synchronisation layers:
//!
//! | Pattern | Shape |
//! |---------|-------|
//! | [`simd::simd_loop`] | every core runs the same loop body on a striped share of the iterations |
//! | [`farm::worker_farm`] | workers pull iteration indices from a coordinator as they go idle |
//! | [`pipeline::pipeline_loop`] | stages pass permission tokens; data stays in place |
//! | [`pipeline::stream_pipeline_loop`] | stages pass the values themselves; a sentinel ends the stream |
//! | [`dataflow::start_dataflow`] | an arbitrary static graph of repeating receive/compute/send bodies |
//!
//! Every pattern is initiated from core (0, 0) with a job descriptor the
//! initiator writes once before the run; participants only ever read it.
//! The initiator's call returns once the whole pattern has terminated, so
//! the descriptor can be dropped immediately afterwards.

pub mod dataflow;
pub mod farm;
pub mod pipeline;
pub mod simd;

use std::sync::Arc;

use crate::runtime::CoreCtx;

/// Per-core hook run before or after a loop: (cores, iterations, core).
pub type HookFn = Arc<dyn Fn(&mut CoreCtx, usize, usize, usize) + Send + Sync>;

/// One loop iteration: (iteration, core).
pub type IterationFn = Arc<dyn Fn(&mut CoreCtx, usize, usize) + Send + Sync>;

/// Shared-precompute body for the helper core, and its initialiser.
pub type HelperFn = Arc<dyn Fn(&mut CoreCtx) + Send + Sync>;

/// Combine partial results: (participating worker count).
pub type ReduceFn = Arc<dyn Fn(&mut CoreCtx, usize) + Send + Sync>;

/// Describes the parallel execution of a loop, for both the SIMD loop and
/// the worker farm.
///
/// Written once by the initiator before the job starts; read-only for all
/// participants; freed by the initiator after the initiating call returns.
pub struct LoopJob {
    /// Number of cores, including the coordinator or helper.
    pub cores: usize,
    /// Number of iterations.
    pub iterations: usize,
    /// Per-core setup, run before any iteration (optional).
    pub initialise: Option<HookFn>,
    /// Helper-core setup (optional, SIMD loop only).
    pub helper_init: Option<HelperFn>,
    /// The loop body.
    pub iteration: IterationFn,
    /// Shared precompute run once per round by the helper core (optional,
    /// SIMD loop only). Its presence switches the SIMD loop into
    /// helper-gated mode.
    pub helper: Option<HelperFn>,
    /// Per-core teardown, run after the core's last iteration (optional).
    pub tidy: Option<HookFn>,
    /// Combines partial results on the initiator once the loop is done
    /// (optional).
    pub reduce: Option<ReduceFn>,
}

impl LoopJob {
    /// A job with just a body: `cores` cores, `iterations` iterations, no
    /// hooks.
    pub fn new(cores: usize, iterations: usize, iteration: IterationFn) -> Self {
        Self {
            cores,
            iterations,
            initialise: None,
            helper_init: None,
            iteration,
            helper: None,
            tidy: None,
            reduce: None,
        }
    }
}
