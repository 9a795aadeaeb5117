//! Data models

pub mod attempt;
pub mod release;
pub mod target;
