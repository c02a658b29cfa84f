#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod alloc;
pub mod code;
pub mod config;
pub mod engine;
pub mod gate;
pub mod hook;
pub mod lifecycle;
pub mod patcher;
pub mod replace;
pub mod resolve;
pub mod rewrite;
pub mod runtime;

pub use config::InstrumentationConfig;
pub use engine::{ApplyReport, Engine, EngineState, RevertReport, TargetOutcome};
pub use hook::{HookError, HookHost};
pub use lifecycle::Instrumentation;
