// fencerun-daemon library entry point: the codeblock execution engine.

pub mod config;
pub mod editor;
pub mod engine;
pub mod error;
pub mod exec;
pub mod mirror;
pub mod rpc;
pub mod runner;
pub mod runtime;
