//! Execution environment for the serving-time inference core.
//!
//! The environment is configured once per server lifetime and read-only
//! thereafter: it validates the model hyperparameters, owns the rotary table
//! and the device/sharding layout, and is the single source of truth for
//! tensor shapes. It is also the factory for the per-layer cache stores used
//! across prefill and decode.

pub mod config;
pub mod env;
pub mod error;
pub mod sharding;

pub use config::EngineConfig;
pub use env::EngineEnv;
pub use error::EngineError;
pub use sharding::{AxisSharded, Replicated, ShardSpec, ShardingPolicy};
