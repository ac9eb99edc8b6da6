//! GeoTrack Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the GeoTrack engines run
//! in both **Production** (tokio, wall-clock pacing) and **Simulation**
//! (virtual clock, seeded randomness) environments.
//!
//! # Core Concept
//!
//! The load generator and the classifier never touch I/O directly:
//! - Time (`now()`, `sleep()`)
//! - Delivery (`Transport::send()`)
//! - Randomness (`derive_rng()`)
//!
//! By deriving all entropy from a single 64-bit seed, a simulated run can be
//! replayed exactly from its seed number.
//!
//! # Example
//!
//! ```ignore
//! use geotrack_env::{TrackerContext, Transport};
//!
//! async fn tick_loop<Ctx: TrackerContext, T: Transport>(ctx: &Ctx, transport: &T) {
//!     loop {
//!         let started = ctx.now();
//!         // ... dispatch events through `transport` ...
//!         let elapsed = ctx.now() - started;
//!         ctx.sleep(Duration::from_secs(1).saturating_sub(elapsed)).await;
//!     }
//! }
//! ```

mod context;
mod transport;
mod types;
mod error;
mod tokio_impl;

pub use context::{stream_seed, TrackerContext};
pub use transport::Transport;
pub use types::EntityId;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
