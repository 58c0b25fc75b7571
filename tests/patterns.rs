//! End-to-end tests for the five execution patterns.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tessera_rt::chip::INPUT_LOCAL_CHAIN;
use tessera_rt::patterns::dataflow::{start_dataflow, DataflowJob, DataflowNode};
use tessera_rt::patterns::farm::worker_farm;
use tessera_rt::patterns::pipeline::{
    pipeline_loop, stream_pipeline_loop, PipelineJob, StreamPipelineJob,
};
use tessera_rt::patterns::simd::simd_loop;
use tessera_rt::patterns::LoopJob;
use tessera_rt::{Config, Destination, Runtime, Word};

fn boot(cores: usize) -> Runtime {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::boot(cores, &Config::default())
}

// ---------------------------------------------------------------------
// SIMD loop
// ---------------------------------------------------------------------

/// 8 cores, 1000 iterations, striped accumulation, reduce sums partials.
/// The partials live in the tile's banks, so the reduce also exercises
/// same-tile coherence.
#[test]
fn simd_sum_over_one_tile() {
    let cores = 8;
    let rt = boot(cores);
    let result = rt.run(move |ctx| {
        let job = Arc::new(LoopJob {
            initialise: Some(Arc::new(|ctx, _, _, core| {
                ctx.store_word(core as u32, 0);
            })),
            reduce: Some(Arc::new(|ctx, workers| {
                let mut sum = 0;
                for core in 0..workers {
                    sum += ctx.load_word(core as u32);
                }
                ctx.store_word(100, sum);
            })),
            ..LoopJob::new(
                8,
                1000,
                Arc::new(|ctx, iter, core| {
                    let partial = ctx.load_word(core as u32);
                    ctx.store_word(core as u32, partial + iter as Word);
                }),
            )
        });
        simd_loop(ctx, &job);
        ctx.load_word(100)
    });
    assert_eq!(result, 499_500);
    rt.shutdown();
}

/// Striping partitions the iteration space exactly, whatever the core
/// count, including a group that spans two tiles.
#[test]
fn simd_sum_spans_tiles() {
    let cores = 12;
    let rt = boot(cores);
    let sum = Arc::new(AtomicI64::new(0));
    let hits = Arc::new(AtomicUsize::new(0));
    let job = Arc::new(LoopJob::new(cores, 1000, {
        let sum = Arc::clone(&sum);
        let hits = Arc::clone(&hits);
        Arc::new(move |_ctx, iter, _core| {
            sum.fetch_add(iter as i64, Ordering::SeqCst);
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }));
    rt.run({
        let job = Arc::clone(&job);
        move |ctx| simd_loop(ctx, &job)
    });
    assert_eq!(sum.load(Ordering::SeqCst), 499_500);
    assert_eq!(hits.load(Ordering::SeqCst), 1000);
    rt.shutdown();
}

/// Helper-gated mode: position 0 runs the shared precompute once per
/// round and the workers cover the iteration space exactly.
#[test]
fn simd_helper_grants_rounds() {
    let cores = 4; // 1 helper + 3 workers
    let iterations = 10;
    let rt = boot(cores);
    let rounds = Arc::new(AtomicUsize::new(0));
    let sum = Arc::new(AtomicI64::new(0));
    let job = Arc::new(LoopJob {
        helper: Some({
            let rounds = Arc::clone(&rounds);
            Arc::new(move |_ctx| {
                rounds.fetch_add(1, Ordering::SeqCst);
            })
        }),
        helper_init: Some(Arc::new(|_ctx| {})),
        ..LoopJob::new(cores, iterations, {
            let sum = Arc::clone(&sum);
            Arc::new(move |_ctx, iter, _worker| {
                sum.fetch_add(iter as i64, Ordering::SeqCst);
            })
        })
    });
    rt.run({
        let job = Arc::clone(&job);
        move |ctx| simd_loop(ctx, &job)
    });
    assert_eq!(sum.load(Ordering::SeqCst), 45);
    // 3 full rounds of 3 workers, one partial round for the leftover.
    assert_eq!(rounds.load(Ordering::SeqCst), 4);
    rt.shutdown();
}

#[test]
fn simd_zero_iterations() {
    let rt = boot(2);
    let hits = Arc::new(AtomicUsize::new(0));
    let job = Arc::new(LoopJob::new(2, 0, {
        let hits = Arc::clone(&hits);
        Arc::new(move |_ctx, _, _| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }));
    rt.run({
        let job = Arc::clone(&job);
        move |ctx| simd_loop(ctx, &job)
    });
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    rt.shutdown();
}

// ---------------------------------------------------------------------
// Worker farm
// ---------------------------------------------------------------------

/// Every iteration index is issued exactly once, whatever the worker
/// count.
fn farm_covers_iteration_space(workers: usize, iterations: usize) {
    let rt = boot(workers + 1);
    let issued: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let job = Arc::new(LoopJob {
        reduce: Some(Arc::new(|_ctx, _workers| {})),
        ..LoopJob::new(workers + 1, iterations, {
            let issued = Arc::clone(&issued);
            Arc::new(move |_ctx, iter, _worker| {
                issued.lock().unwrap().push(iter);
            })
        })
    });
    rt.run({
        let job = Arc::clone(&job);
        move |ctx| worker_farm(ctx, &job)
    });
    let mut seen = issued.lock().unwrap().clone();
    seen.sort_unstable();
    let expected: Vec<usize> = (0..iterations).collect();
    assert_eq!(seen, expected, "multiset of issued indices must be exact");
    rt.shutdown();
}

#[test]
fn farm_two_workers() {
    farm_covers_iteration_space(2, 100);
}

#[test]
fn farm_six_workers() {
    farm_covers_iteration_space(6, 200);
}

#[test]
fn farm_zero_iterations() {
    farm_covers_iteration_space(3, 0);
}

#[test]
fn farm_fewer_iterations_than_workers() {
    farm_covers_iteration_space(5, 2);
}

// ---------------------------------------------------------------------
// Token pipeline
// ---------------------------------------------------------------------

/// 3 stages computing f(i) = i² + 1 for i = 0..10. The last stage must
/// observe the results in strictly increasing iteration order, no gaps,
/// no repeats.
#[test]
fn token_pipeline_squares_plus_one() {
    let iterations = 10;
    let rt = boot(3);
    let squares = Arc::new(Mutex::new(vec![0 as Word; iterations]));
    let plus_one = Arc::new(Mutex::new(vec![0 as Word; iterations]));
    let observed = Arc::new(Mutex::new(Vec::<(usize, Word)>::new()));

    let job = Arc::new(PipelineJob {
        stages: 3,
        iterations,
        initialise: vec![],
        stage_fns: vec![
            {
                let squares = Arc::clone(&squares);
                Arc::new(move |_ctx, i| {
                    squares.lock().unwrap()[i] = (i * i) as Word;
                })
            },
            {
                let squares = Arc::clone(&squares);
                let plus_one = Arc::clone(&plus_one);
                Arc::new(move |_ctx, i| {
                    plus_one.lock().unwrap()[i] = squares.lock().unwrap()[i] + 1;
                })
            },
            {
                let plus_one = Arc::clone(&plus_one);
                let observed = Arc::clone(&observed);
                Arc::new(move |_ctx, i| {
                    observed.lock().unwrap().push((i, plus_one.lock().unwrap()[i]));
                })
            },
        ],
        tidy: vec![],
    });
    rt.run({
        let job = Arc::clone(&job);
        move |ctx| pipeline_loop(ctx, &job)
    });

    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), iterations);
    for (k, &(i, value)) in observed.iter().enumerate() {
        assert_eq!(i, k, "final stage saw iterations out of order");
        assert_eq!(value, (k * k) as Word + 1);
    }
    rt.shutdown();
}

#[test]
fn token_pipeline_runs_stage_hooks() {
    let rt = boot(2);
    let inits = Arc::new(AtomicUsize::new(0));
    let tidies = Arc::new(AtomicUsize::new(0));
    let hook = |counter: &Arc<AtomicUsize>| {
        let counter = Arc::clone(counter);
        Some(Arc::new(move |_: &mut tessera_rt::CoreCtx| {
            counter.fetch_add(1, Ordering::SeqCst);
        }) as Arc<dyn Fn(&mut tessera_rt::CoreCtx) + Send + Sync>)
    };
    let job = Arc::new(PipelineJob {
        stages: 2,
        iterations: 3,
        initialise: vec![hook(&inits), hook(&inits)],
        stage_fns: vec![Arc::new(|_, _| {}), Arc::new(|_, _| {})],
        tidy: vec![hook(&tidies), None],
    });
    rt.run({
        let job = Arc::clone(&job);
        move |ctx| pipeline_loop(ctx, &job)
    });
    assert_eq!(inits.load(Ordering::SeqCst), 2);
    // Stage 0 is the only tidy hook installed; it runs after the ring
    // token confirms the drain.
    assert_eq!(tidies.load(Ordering::SeqCst), 1);
    rt.shutdown();
}

// ---------------------------------------------------------------------
// Data-driven pipeline
// ---------------------------------------------------------------------

const END_OF_STREAM: Word = -1;

/// Values pass directly between stages; the sentinel propagates exactly
/// once and the run terminates through the end-of-work signal.
#[test]
fn stream_pipeline_squares_plus_one() {
    let rt = boot(3);
    let observed = Arc::new(Mutex::new(Vec::<Word>::new()));
    let job = Arc::new(StreamPipelineJob {
        stages: 3,
        end_of_stream: END_OF_STREAM,
        initialise: vec![],
        stage_fns: vec![
            Arc::new(|_ctx, i| if i < 10 { i * i } else { END_OF_STREAM }),
            Arc::new(|_ctx, v| v + 1),
            {
                let observed = Arc::clone(&observed);
                Arc::new(move |_ctx, v| {
                    observed.lock().unwrap().push(v);
                    0
                })
            },
        ],
        tidy: vec![],
    });
    let leftover = rt.run({
        let job = Arc::clone(&job);
        move |ctx| {
            stream_pipeline_loop(ctx, &job);
            // A second end-of-work token would still be queued here.
            ctx.test(tessera_rt::chip::INPUT_JOB)
        }
    });
    let observed = observed.lock().unwrap();
    let expected: Vec<Word> = (0..10).map(|i| i * i + 1).collect();
    assert_eq!(*observed, expected);
    assert!(!leftover, "end_of_work fired more than once");
    rt.shutdown();
}

#[test]
fn stream_pipeline_empty_stream() {
    let rt = boot(2);
    let hits = Arc::new(AtomicUsize::new(0));
    let job = Arc::new(StreamPipelineJob {
        stages: 2,
        end_of_stream: END_OF_STREAM,
        initialise: vec![],
        stage_fns: vec![
            Arc::new(|_ctx, _| END_OF_STREAM),
            {
                let hits = Arc::clone(&hits);
                Arc::new(move |_ctx, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    0
                })
            },
        ],
        tidy: vec![],
    });
    rt.run({
        let job = Arc::clone(&job);
        move |ctx| stream_pipeline_loop(ctx, &job)
    });
    assert_eq!(hits.load(Ordering::SeqCst), 0, "no value precedes the sentinel");
    rt.shutdown();
}

// ---------------------------------------------------------------------
// Dataflow
// ---------------------------------------------------------------------

/// root -> doubler -> accumulator; the accumulator raises end-of-work
/// after the last value and the root cancels the looping nodes, which
/// then run their tidy routines.
#[test]
fn dataflow_network_drains_and_cancels() {
    const VALUES: Word = 50;
    let rt = boot(3);
    let total = Arc::new(AtomicI64::new(0));
    let tidied = Arc::new([AtomicBool::new(false), AtomicBool::new(false)]);

    let root = DataflowNode::new(Arc::new(|ctx: &mut tessera_rt::CoreCtx| {
        ctx.configure(
            3,
            Destination::Local { mask: 0b010, input: INPUT_LOCAL_CHAIN },
            0,
        );
        for v in 1..=VALUES {
            ctx.send(3, v);
        }
        Ok(())
    }));

    let doubler = DataflowNode {
        body: Arc::new(|ctx: &mut tessera_rt::CoreCtx| {
            let v = ctx.receive_interruptible(INPUT_LOCAL_CHAIN)?;
            ctx.configure(
                3,
                Destination::Local { mask: 0b100, input: INPUT_LOCAL_CHAIN },
                0,
            );
            ctx.send(3, v * 2);
            Ok(())
        }),
        tidy: Some({
            let tidied = Arc::clone(&tidied);
            Arc::new(move |_ctx| tidied[0].store(true, Ordering::SeqCst))
        }),
    };

    let accumulator = DataflowNode {
        body: {
            let total = Arc::clone(&total);
            Arc::new(move |ctx: &mut tessera_rt::CoreCtx| {
                let v = ctx.receive_interruptible(INPUT_LOCAL_CHAIN)?;
                let sum = total.fetch_add(v as i64, Ordering::SeqCst) + v as i64;
                if sum == (VALUES as i64) * (VALUES as i64 + 1) {
                    // 2 * (1 + ... + VALUES): everything has arrived.
                    ctx.end_of_work();
                }
                Ok(())
            })
        },
        tidy: Some({
            let tidied = Arc::clone(&tidied);
            Arc::new(move |_ctx| tidied[1].store(true, Ordering::SeqCst))
        }),
    };

    let job = Arc::new(DataflowJob { cores: 3, nodes: vec![root, doubler, accumulator] });
    rt.run({
        let job = Arc::clone(&job);
        move |ctx| start_dataflow(ctx, &job)
    });
    rt.shutdown();

    assert_eq!(total.load(Ordering::SeqCst), (VALUES as i64) * (VALUES as i64 + 1));
    assert!(tidied[0].load(Ordering::SeqCst), "doubler never ran its tidy routine");
    assert!(tidied[1].load(Ordering::SeqCst), "accumulator never ran its tidy routine");
}

/// A looping node blocked mid-receive is cancelled at its yield point even
/// though its body would never finish another round on its own.
#[test]
fn dataflow_cancels_blocked_nodes() {
    let rt = boot(2);
    let cancelled = Arc::new(AtomicBool::new(false));
    let root = DataflowNode::new(Arc::new(|ctx: &mut tessera_rt::CoreCtx| {
        // Produce nothing; the network is already drained.
        ctx.end_of_work();
        Ok(())
    }));
    let starved = DataflowNode {
        body: Arc::new(|ctx: &mut tessera_rt::CoreCtx| {
            ctx.receive_interruptible(INPUT_LOCAL_CHAIN)?;
            Ok(())
        }),
        tidy: Some({
            let cancelled = Arc::clone(&cancelled);
            Arc::new(move |_ctx| cancelled.store(true, Ordering::SeqCst))
        }),
    };
    let job = Arc::new(DataflowJob { cores: 2, nodes: vec![root, starved] });
    rt.run({
        let job = Arc::clone(&job);
        move |ctx| start_dataflow(ctx, &job)
    });
    rt.shutdown();
    assert!(cancelled.load(Ordering::SeqCst));
}

// ---------------------------------------------------------------------
// Patterns compose
// ---------------------------------------------------------------------

/// Back-to-back patterns on the same booted group: the cores return to
/// their bootstrap loops cleanly between runs.
#[test]
fn patterns_run_back_to_back() {
    let rt = boot(4);
    let simd_sum = Arc::new(AtomicI64::new(0));
    let farm_sum = Arc::new(AtomicI64::new(0));

    let simd_job = Arc::new(LoopJob::new(4, 100, {
        let sum = Arc::clone(&simd_sum);
        Arc::new(move |_ctx, iter, _| {
            sum.fetch_add(iter as i64, Ordering::SeqCst);
        })
    }));
    let farm_job = Arc::new(LoopJob::new(4, 100, {
        let sum = Arc::clone(&farm_sum);
        Arc::new(move |_ctx, iter, _| {
            sum.fetch_add(iter as i64, Ordering::SeqCst);
        })
    }));
    rt.run({
        let simd_job = Arc::clone(&simd_job);
        let farm_job = Arc::clone(&farm_job);
        move |ctx| {
            simd_loop(ctx, &simd_job);
            worker_farm(ctx, &farm_job);
        }
    });
    assert_eq!(simd_sum.load(Ordering::SeqCst), 4950);
    assert_eq!(farm_sum.load(Ordering::SeqCst), 4950);
    rt.shutdown();
}
