//! Capability prober and smoke harness (spec §4.8, §4.9): discovers and
//! verifies which features each `(provider, model, reasoning-mode)` tuple
//! actually supports, against the `Scenario`/`Score` data model defined in
//! `genai_core::scoreboard`.

pub mod fixtures;
pub mod prober;
pub mod smoke;

pub use prober::{ProbeReport, probe};
pub use smoke::{Mismatch, SmokeReport, run as run_smoke_test, unused_declared_pairs};
