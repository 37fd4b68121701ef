//! The issue delivery loop.
//!
//! One invocation is a "pass": lock acquisition, checkpoint recovery or
//! initialization, the per-recipient send loop, durable finalization, and
//! cleanup. Interrupted passes resume from the checkpoint; concurrent
//! passes are excluded by the lock.

pub mod engine;
pub mod run;


pub use engine::{Engine, EngineConfig, PassError, PassOutcome, PassReport};
pub use run::DeliveryRun;
