//! The dataflow pattern.
//!
//! An arbitrary static graph of cores. Every participant except the root
//! runs one fixed node body over and over (receive operands, compute, send
//! results) with no control flow beyond the self-loop. The root (core 0)
//! feeds the network, and the graph must route a completion signal back to
//! it: some node calls [`CoreCtx::end_of_work`] once all results exist.
//!
//! Because the node bodies never terminate on their own, the root
//! force-terminates them once it has consumed the end-of-work signal. The
//! cancellation is injected out of band with `send_interrupt` and observed
//! at each participant's next interruptible receive, rather than waiting
//! for the body to finish a round; the participant then runs its tidy
//! routine and returns to its bootstrap loop.
//!
//! Node bodies must therefore block with
//! [`CoreCtx::receive_interruptible`] and propagate the interruption.

use std::sync::Arc;

use crate::chip::CORES_PER_TILE;
use crate::fabric::Interrupted;
use crate::runtime::context::{CoreCtx, Destination};
use crate::topology::{group_bitmask_excluding, CoreId};

/// One repeating round of a node: receive, compute, send. Returning
/// `Err(Interrupted)` ends the node's loop.
pub type NodeFn = Arc<dyn Fn(&mut CoreCtx) -> Result<(), Interrupted> + Send + Sync>;

/// Clean-up run after a node's loop is broken.
pub type NodeTidyFn = Arc<dyn Fn(&mut CoreCtx) + Send + Sync>;

/// Slot the root uses to broadcast the termination interrupt.
const SLOT_CANCEL: usize = 2;

/// One participant of a dataflow network.
pub struct DataflowNode {
    /// The repeating body. For the root (node 0) this runs exactly once
    /// and contains its own feed loop.
    pub body: NodeFn,
    /// Optional clean-up once the loop is broken.
    pub tidy: Option<NodeTidyFn>,
}

impl DataflowNode {
    /// A node with no tidy routine.
    pub fn new(body: NodeFn) -> Self {
        Self { body, tidy: None }
    }
}

/// Describes a dataflow network: one node per core, root first.
pub struct DataflowJob {
    /// Number of participating cores.
    pub cores: usize,
    /// One node per core.
    pub nodes: Vec<DataflowNode>,
}

/// Execute a dataflow network to completion.
///
/// Must initiate on core (0, 0), which is the root and the sole consumer
/// of the end-of-work signal. Returns once every other participant has
/// been cancelled.
pub fn start_dataflow(ctx: &mut CoreCtx, job: &Arc<DataflowJob>) {
    assert_eq!(ctx.global_index(), 0, "dataflow initiates on core (0, 0)");
    assert_eq!(job.nodes.len(), job.cores, "one node per core");
    assert!(
        job.cores <= CORES_PER_TILE,
        "dataflow cancellation is broadcast over the local interconnect \
         and cannot span tiles"
    );

    // Start every non-root node looping.
    for index in 1..job.cores {
        let target = CoreId::new(ctx.tile(), index as u8);
        let job = Arc::clone(job);
        ctx.remote_execute(target, move |ctx| run_node(ctx, &job, index));
    }

    // The root feeds the network; its body runs once.
    if let Err(Interrupted) = (job.nodes[0].body)(ctx) {
        log::warn!("dataflow root was interrupted; no one should cancel the root");
    }

    // Wait for the network to drain, then break everyone's loop.
    ctx.wait_end_of_work();
    ctx.configure(
        SLOT_CANCEL,
        Destination::Local {
            mask: group_bitmask_excluding(job.cores, 0),
            input: 0,
        },
        0,
    );
    ctx.send_interrupt(SLOT_CANCEL);
    log::debug!("dataflow network of {} nodes cancelled", job.cores);

    if let Some(tidy) = &job.nodes[0].tidy {
        tidy(ctx);
    }
}

/// A non-root participant: repeat the body until cancelled, then tidy.
fn run_node(ctx: &mut CoreCtx, job: &Arc<DataflowJob>, index: usize) {
    let node = &job.nodes[index];
    loop {
        if (node.body)(ctx).is_err() {
            break;
        }
    }
    if let Some(tidy) = &node.tidy {
        tidy(ctx);
    }
}
