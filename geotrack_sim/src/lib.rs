//! GeoTrack simulation harness and operator tooling
//!
//! This crate runs the load generator and the classifier together, either
//! against the real clock (the `geotrack` binary) or inside a deterministic
//! simulation where time only moves when the dispatcher sleeps.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          SimWorld                            │
//! │                                                              │
//! │  SimContext (virtual clock, seeded RNG streams)              │
//! │       │                                                      │
//! │  ┌────▼──────────┐   bytes   ┌────────────────┐              │
//! │  │PacedDispatcher├──────────►│ FaultyTransport│ loss/latency │
//! │  └────▲──────────┘           └───────┬────────┘              │
//! │       │ attack                       │                       │
//! │  AttackInjector              ┌───────▼────────┐              │
//! │                              │ ClassifierPool ├──► Store     │
//! │                              └────────────────┘              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use geotrack_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_ticks(30).run(ScenarioId::AttackWave).await;
//! assert!(result.passed);
//! ```

mod context;
pub mod control;
mod network;
mod runner;
pub mod scenarios;
mod world;

pub use context::SimContext;
pub use control::{clamp_population, Command, DEFAULT_ATTACK_IDS};
pub use network::{FaultConfig, FaultStats, FaultyTransport};
pub use runner::{ScenarioResult, ScenarioRunner};
pub use world::{synthetic_catalog, SimConfig, SimDispatcher, SimError, SimTransport, SimWorld, RATE_TOLERANCE};
