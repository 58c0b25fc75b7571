//! tessera-rt library
//!
//! Coordination runtime for tiled many-core processors whose cores
//! communicate over explicitly-configured, credit-flow-controlled message
//! channels. Provides the channel transport, topology and addressing,
//! remote execution, hierarchical barriers, five parallel execution
//! patterns, and the atomic memory-reconfiguration protocol, together with
//! the in-process fabric model they run against.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera_rt::{Config, Runtime};
//! use tessera_rt::patterns::{simd::simd_loop, LoopJob};
//!
//! let rt = Runtime::boot(8, &Config::default());
//! rt.run(|ctx| {
//!     let job = Arc::new(LoopJob::new(
//!         8,
//!         1000,
//!         Arc::new(|ctx, iter, core| {
//!             let sum = ctx.scratchpad().read(0);
//!             ctx.scratchpad().write(0, sum + iter as i32);
//!             let _ = core;
//!         }),
//!     ));
//!     simd_loop(ctx, &job);
//! });
//! rt.shutdown();
//! ```

pub mod alloc;
pub mod chip;
pub mod config;
pub mod fabric;
pub mod memconf;
pub mod patterns;
pub mod runtime;
pub mod scratchpad;
pub mod topology;

pub use config::{Config, Environment};
pub use fabric::{Interrupted, Word};
pub use runtime::{ConnectStatus, CoreCtx, Destination, Runtime, SavedSlot};
pub use scratchpad::Scratchpad;
pub use topology::{CoreId, CoreMask, TileId};
