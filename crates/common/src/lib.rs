// fencerun-common: shared types and parsers for the fencerun workspace

pub mod codeblock;
pub mod protocol;
pub mod section;
pub mod types;
