// Execution machinery: registry, lifecycle and output streaming.

pub mod decode;
pub mod document;
pub mod execution;
pub mod join;
pub mod registry;
pub mod status;
pub mod streamer;

pub use execution::{Execution, ExecutionState};
pub use registry::ExecutionRegistry;
pub use streamer::{ExecutionHandle, ExecutionOutcome, StreamRequest, StreamerContext};
