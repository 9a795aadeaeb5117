//! Operator-facing terminal I/O

pub mod prompt;
pub mod render;
