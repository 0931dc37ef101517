//! Phase machine domain: the barrier table and its evaluation.

pub mod phase;

pub use phase::{barrier_met, next_phase, required_completions};
