pub mod env;
pub mod parser;

pub use env::{parse_env_text, resolve_env};
pub use parser::{ancestry, enclosing_section, parse_sections};
